use crate::calc::aggregate::ScoredRecord;
use crate::calc::distribution::summarize;
use crate::calc::insights::InsightPolicy;
use crate::calc::trend::{compare_with_previous, direction_of, ordered_periods, student_trend, trend_series};
use crate::calc::{parse_subject_filter, SubjectFilter};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, db_conn, effective_policy, load_scope, optional_str, query_err, required_str,
    scored_for_subjects,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AssessmentComponent, Dataset, Subject};
use serde_json::json;
use std::collections::HashSet;

fn policy_for(state: &AppState, req: &Request) -> Result<InsightPolicy, serde_json::Value> {
    let conn = db_conn(state, req)?;
    effective_policy(state, conn).map_err(|e| query_err(req, e))
}

/// Trend and compare requests take the grade level and subject name as flat params.
fn trend_filter(req: &Request) -> Result<SubjectFilter, serde_json::Value> {
    Ok(SubjectFilter {
        grade_level_id: optional_str(req, "gradeLevelId")?,
        subject_name: optional_str(req, "subjectName")?,
        academic_year_id: None,
        trimester_id: None,
    })
}

fn matching_subjects<'a>(data: &'a Dataset, filter: &SubjectFilter) -> Vec<&'a Subject> {
    data.subjects.iter().filter(|s| filter.matches(s)).collect()
}

fn components_of(data: &Dataset, subjects: &[&Subject]) -> Vec<AssessmentComponent> {
    let ids: HashSet<&str> = subjects.iter().map(|s| s.id.as_str()).collect();
    data.components
        .iter()
        .filter(|c| ids.contains(c.subject_id.as_str()))
        .cloned()
        .collect()
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match parse_subject_filter(req.params.get("filters")) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subjects = matching_subjects(&data, &filter);
    let records = match scored_for_subjects(state, req, &teacher_id, subjects.iter().copied()) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let summary = summarize(&records, &components_of(&data, &subjects));
    let student_count = records
        .iter()
        .map(|r| r.score.student_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    ok(
        &req.id,
        json!({
            "filters": filter,
            "subjectCount": subjects.len(),
            "studentCount": student_count,
            "distribution": summary.distribution,
            "summary": summary
        }),
    )
}

fn handle_trend_cohort(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match trend_filter(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match policy_for(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subjects = matching_subjects(&data, &filter);
    let records = match scored_for_subjects(state, req, &teacher_id, subjects.iter().copied()) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let periods = ordered_periods(&data.academic_years, &data.trimesters);
    let refs: Vec<&ScoredRecord> = records.iter().collect();
    let points = trend_series(&periods, &data.subjects, &refs);
    let direction = direction_of(&points, policy.trend_stable_band);

    ok(
        &req.id,
        json!({
            "filters": filter,
            "points": points,
            "direction": direction
        }),
    )
}

fn handle_trend_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match policy_for(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(student) = data.students.iter().find(|s| s.id == student_id) else {
        return err(&req.id, "not_found", "student not found", None);
    };
    let records = match scored_for_subjects(state, req, &teacher_id, &data.subjects) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let periods = ordered_periods(&data.academic_years, &data.trimesters);
    let points = student_trend(&periods, &data.subjects, &records, &student_id);
    let direction = direction_of(&points, policy.trend_stable_band);

    ok(
        &req.id,
        json!({
            "studentId": student.id,
            "displayName": student.display_name(),
            "points": points,
            "direction": direction
        }),
    )
}

fn handle_compare(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let trimester_id = match required_str(req, "trimesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match trend_filter(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match policy_for(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let periods = ordered_periods(&data.academic_years, &data.trimesters);
    let Some(position) = periods.iter().position(|p| p.trimester_id == trimester_id) else {
        return err(&req.id, "not_found", "trimester not found", None);
    };
    let subjects = matching_subjects(&data, &filter);
    let records = match scored_for_subjects(state, req, &teacher_id, subjects.iter().copied()) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let refs: Vec<&ScoredRecord> = records.iter().collect();
    let comparison = compare_with_previous(
        &periods,
        &data.subjects,
        &refs,
        &trimester_id,
        policy.trend_stable_band,
    );
    let previous_trimester_id = position
        .checked_sub(1)
        .map(|i| periods[i].trimester_id.clone());

    ok(
        &req.id,
        json!({
            "trimesterId": trimester_id,
            "previousTrimesterId": previous_trimester_id,
            "filters": filter,
            "comparison": comparison
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.overview" => Some(handle_overview(state, req)),
        "analytics.trend.cohort" => Some(handle_trend_cohort(state, req)),
        "analytics.trend.student" => Some(handle_trend_student(state, req)),
        "analytics.compare" => Some(handle_compare(state, req)),
        _ => None,
    }
}
