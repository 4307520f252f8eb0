use crate::calc::distribution::{summarize, PerformanceBand};
use crate::calc::ranking::{rank_cohort, rank_composite};
use crate::calc::SubjectFilter;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{load_scope, optional_str, required_str, scored_for_subjects, scored_subject};
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use serde_json::json;
use std::collections::HashMap;

fn display_names(students: &[Student]) -> HashMap<&str, String> {
    students
        .iter()
        .map(|s| (s.id.as_str(), s.display_name()))
        .collect()
}

fn handle_subject_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(subject) = data.subjects.iter().find(|s| s.id == subject_id) else {
        return err(&req.id, "not_found", "subject not found", None);
    };
    let records = match scored_subject(state, req, &teacher_id, &subject_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let components: Vec<_> = data
        .components
        .iter()
        .filter(|c| c.subject_id == subject_id)
        .cloned()
        .collect();
    let summary = summarize(&records, &components);
    let names = display_names(&data.students);

    let rows: Vec<serde_json::Value> = rank_cohort(records)
        .into_iter()
        .map(|r| {
            let record = &r.item;
            json!({
                "scoreId": record.score.id,
                "studentId": record.score.student_id,
                "displayName": names
                    .get(record.score.student_id.as_str())
                    .cloned()
                    .unwrap_or_else(|| record.score.student_id.clone()),
                "examScore": record.score.exam_score,
                "classAssessmentScores": record.score.class_assessment_scores,
                "assessmentScore": record.breakdown.assessment_score,
                "recordedComponents": record.breakdown.recorded_components,
                "finalScore": record.final_score(),
                "band": PerformanceBand::classify(record.final_score()).as_str(),
                "rank": r.rank,
                "rankLabel": r.rank_label
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "subject": subject,
            "components": components,
            "rows": rows,
            "summary": summary
        }),
    )
}

fn handle_grade_level_ranking(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_level_id = match required_str(req, "gradeLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match optional_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let trimester_id = match optional_str(req, "trimesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let filter = SubjectFilter {
        grade_level_id: Some(grade_level_id.clone()),
        subject_name: None,
        academic_year_id,
        trimester_id,
    };
    let subjects = data.subjects.iter().filter(|s| filter.matches(s));
    let subject_count = subjects.clone().count();
    let records = match scored_for_subjects(state, req, &teacher_id, subjects) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let names = display_names(&data.students);
    let rows: Vec<serde_json::Value> = rank_composite(&records)
        .into_iter()
        .map(|r| {
            json!({
                "studentId": r.item.student_id,
                "displayName": names
                    .get(r.item.student_id.as_str())
                    .cloned()
                    .unwrap_or_else(|| r.item.student_id.clone()),
                "average": r.item.average,
                "subjectCount": r.item.subject_count,
                "rank": r.rank,
                "rankLabel": r.rank_label
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "gradeLevelId": grade_level_id,
            "subjectCount": subject_count,
            "rows": rows
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.subject.open" => Some(handle_subject_open(state, req)),
        "grades.gradeLevel.ranking" => Some(handle_grade_level_ranking(state, req)),
        _ => None,
    }
}
