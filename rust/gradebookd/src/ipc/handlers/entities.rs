use crate::cache::CacheKey;
use crate::db::{self, Owned};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_scope, query_err, required_str, update_err};
use crate::ipc::types::{AppState, Request};
use crate::model::{AssessmentComponent, Dataset, StudentScore};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

fn ids<'a, T, F>(batch: &'a [T], stored: &'a [T], id_of: F) -> HashSet<&'a str>
where
    F: Fn(&'a T) -> &'a str,
{
    batch.iter().chain(stored).map(id_of).collect()
}

/// Data contract checks for an import batch. References may point at entities in the
/// batch or at ones the teacher already owns.
fn contract_violations(batch: &Dataset, stored: &Dataset) -> Vec<String> {
    let grade_ids = ids(&batch.grade_levels, &stored.grade_levels, |g| g.id.as_str());
    let year_ids = ids(&batch.academic_years, &stored.academic_years, |y| y.id.as_str());
    let term_ids = ids(&batch.trimesters, &stored.trimesters, |t| t.id.as_str());
    let subject_ids = ids(&batch.subjects, &stored.subjects, |s| s.id.as_str());
    let student_ids = ids(&batch.students, &stored.students, |s| s.id.as_str());

    let mut out = Vec::new();
    let blank_ids = batch.grade_levels.iter().any(|g| g.id.trim().is_empty())
        || batch.academic_years.iter().any(|y| y.id.trim().is_empty())
        || batch.trimesters.iter().any(|t| t.id.trim().is_empty())
        || batch.subjects.iter().any(|s| s.id.trim().is_empty())
        || batch.students.iter().any(|s| s.id.trim().is_empty());
    if blank_ids {
        out.push("every grade level, year, trimester, subject and student needs an id".to_string());
    }

    for t in &batch.trimesters {
        if !year_ids.contains(t.academic_year_id.as_str()) {
            out.push(format!("trimester {} references unknown academic year {:?}", t.id, t.academic_year_id));
        }
    }
    for s in &batch.subjects {
        if s.grade_level_id.is_empty() || s.academic_year_id.is_empty() || s.trimester_id.is_empty() {
            out.push(format!("subject {} needs gradeLevelId, academicYearId and trimesterId", s.id));
            continue;
        }
        if !grade_ids.contains(s.grade_level_id.as_str()) {
            out.push(format!("subject {} references unknown grade level {:?}", s.id, s.grade_level_id));
        }
        if !year_ids.contains(s.academic_year_id.as_str()) {
            out.push(format!("subject {} references unknown academic year {:?}", s.id, s.academic_year_id));
        }
        if !term_ids.contains(s.trimester_id.as_str()) {
            out.push(format!("subject {} references unknown trimester {:?}", s.id, s.trimester_id));
        }
    }
    for c in &batch.components {
        if !subject_ids.contains(c.subject_id.as_str()) {
            out.push(format!("component {:?} references unknown subject {:?}", c.name, c.subject_id));
        }
    }
    for s in &batch.students {
        if !grade_ids.contains(s.grade_level_id.as_str()) {
            out.push(format!("student {} references unknown grade level {:?}", s.id, s.grade_level_id));
        }
    }
    for s in &batch.scores {
        if s.student_id.is_empty() || s.subject_id.is_empty() {
            out.push("every score needs studentId and subjectId".to_string());
            continue;
        }
        if !student_ids.contains(s.student_id.as_str()) {
            out.push(format!("score references unknown student {:?}", s.student_id));
        }
        if !subject_ids.contains(s.subject_id.as_str()) {
            out.push(format!("score references unknown subject {:?}", s.subject_id));
        }
    }
    out
}

/// Ids in the batch that another teacher already owns.
fn foreign_ids(conn: &Connection, teacher_id: &str, batch: &Dataset) -> anyhow::Result<Vec<String>> {
    let ids = batch
        .grade_levels
        .iter()
        .map(|g| (Owned::GradeLevel, g.id.as_str()))
        .chain(batch.academic_years.iter().map(|y| (Owned::AcademicYear, y.id.as_str())))
        .chain(batch.trimesters.iter().map(|t| (Owned::Trimester, t.id.as_str())))
        .chain(batch.subjects.iter().map(|s| (Owned::Subject, s.id.as_str())))
        .chain(batch.components.iter().map(|c| (Owned::Component, c.id.as_str())))
        .chain(batch.students.iter().map(|s| (Owned::Student, s.id.as_str())))
        .chain(batch.scores.iter().map(|s| (Owned::Score, s.id.as_str())))
        .filter(|(_, id)| !id.trim().is_empty());

    let mut out = Vec::new();
    for (kind, id) in ids {
        if matches!(db::owner_of(conn, kind, id)?, Some(owner) if owner != teacher_id) {
            out.push(format!("{} {} belongs to another teacher", kind.label(), id));
        }
    }
    Ok(out)
}

fn fill_missing_ids(batch: &mut Dataset) {
    for c in batch.components.iter_mut().filter(|c| c.id.trim().is_empty()) {
        c.id = Uuid::new_v4().to_string();
    }
    for s in batch.scores.iter_mut().filter(|s| s.id.trim().is_empty()) {
        s.id = Uuid::new_v4().to_string();
    }
}

fn handle_dataset_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut batch: Dataset = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid dataset: {}", e), None),
    };
    let stored = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut violations = contract_violations(&batch, &stored);
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match foreign_ids(conn, &teacher_id, &batch) {
        Ok(v) => violations.extend(v),
        Err(e) => return query_err(req, e),
    }
    if !violations.is_empty() {
        tracing::warn!(teacher = %teacher_id, count = violations.len(), "dataset import rejected");
        return err(
            &req.id,
            "bad_params",
            "dataset violates data contracts",
            Some(json!({ "violations": violations })),
        );
    }
    fill_missing_ids(&mut batch);

    let counts = match db::import_dataset(conn, &teacher_id, &batch) {
        Ok(v) => v,
        Err(e) => return update_err(req, e),
    };
    state.cache.invalidate_teacher(&teacher_id);

    ok(
        &req.id,
        json!({
            "imported": {
                "gradeLevels": counts.grade_levels,
                "academicYears": counts.academic_years,
                "trimesters": counts.trimesters,
                "subjects": counts.subjects,
                "components": counts.components,
                "students": counts.students,
                "scores": counts.scores
            }
        }),
    )
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let grade_names: HashMap<&str, &str> =
        data.grade_levels.iter().map(|g| (g.id.as_str(), g.name.as_str())).collect();
    let year_names: HashMap<&str, &str> =
        data.academic_years.iter().map(|y| (y.id.as_str(), y.name.as_str())).collect();
    let term_names: HashMap<&str, &str> =
        data.trimesters.iter().map(|t| (t.id.as_str(), t.name.as_str())).collect();
    let mut component_counts: HashMap<&str, usize> = HashMap::new();
    for c in &data.components {
        *component_counts.entry(c.subject_id.as_str()).or_default() += 1;
    }

    let subjects: Vec<serde_json::Value> = data
        .subjects
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "gradeLevelId": s.grade_level_id,
                "gradeLevelName": grade_names.get(s.grade_level_id.as_str()),
                "academicYearId": s.academic_year_id,
                "academicYearName": year_names.get(s.academic_year_id.as_str()),
                "trimesterId": s.trimester_id,
                "trimesterName": term_names.get(s.trimester_id.as_str()),
                "componentCount": component_counts.get(s.id.as_str()).copied().unwrap_or(0)
            })
        })
        .collect();
    ok(&req.id, json!({ "subjects": subjects }))
}

fn owned_subject(state: &AppState, req: &Request, teacher_id: &str, subject_id: &str) -> Option<serde_json::Value> {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return Some(e),
    };
    match db::owns_subject(conn, teacher_id, subject_id) {
        Ok(true) => None,
        Ok(false) => Some(err(&req.id, "not_found", "subject not found", None)),
        Err(e) => Some(query_err(req, e)),
    }
}

fn handle_components_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("component") else {
        return err(&req.id, "bad_params", "missing component", None);
    };
    let mut component: AssessmentComponent = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid component: {}", e), None),
    };
    if component.name.trim().is_empty() {
        return err(&req.id, "bad_params", "component.name must not be empty", None);
    }
    if component.id.trim().is_empty() {
        component.id = Uuid::new_v4().to_string();
    }
    component.subject_id = subject_id.clone();

    if let Some(e) = owned_subject(state, req, &teacher_id, &subject_id) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    // a component moved between subjects stales the one it left as well
    let previous_subject = match db::component_subject(conn, &teacher_id, &component.id) {
        Ok(v) => v,
        Err(e) => return query_err(req, e),
    };
    match db::upsert_component(conn, &teacher_id, &component) {
        Ok(0) => return err(&req.id, "not_found", "component not found", None),
        Ok(_) => {}
        Err(e) => return update_err(req, e),
    }
    state.cache.invalidate(&CacheKey::new(&teacher_id, &subject_id));
    if let Some(previous) = previous_subject.filter(|p| *p != subject_id) {
        state.cache.invalidate(&CacheKey::new(&teacher_id, &previous));
    }
    ok(&req.id, json!({ "componentId": component.id }))
}

fn handle_components_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let component_id = match required_str(req, "componentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match db::delete_component(conn, &teacher_id, &component_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "component not found", None),
        Err(e) => return update_err(req, e),
    };
    state.cache.invalidate(&CacheKey::new(&teacher_id, &subject_id));
    ok(&req.id, json!({ "deleted": true, "subjectId": subject_id }))
}

fn handle_scores_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("score") else {
        return err(&req.id, "bad_params", "missing score", None);
    };
    let mut score: StudentScore = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid score: {}", e), None),
    };
    if score.student_id.trim().is_empty() || score.subject_id.trim().is_empty() {
        tracing::warn!(teacher = %teacher_id, "score without studentId or subjectId rejected");
        return err(&req.id, "bad_params", "score needs studentId and subjectId", None);
    }
    if score.id.trim().is_empty() {
        score.id = Uuid::new_v4().to_string();
    }

    if let Some(e) = owned_subject(state, req, &teacher_id, &score.subject_id) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::owns_student(conn, &teacher_id, &score.student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return query_err(req, e),
    }
    match db::owner_of(conn, Owned::Score, &score.id) {
        Ok(Some(owner)) if owner != teacher_id => {
            return err(&req.id, "not_found", "score not found", None)
        }
        Ok(_) => {}
        Err(e) => return query_err(req, e),
    }
    match db::upsert_score(conn, &teacher_id, &score) {
        Ok(0) => return err(&req.id, "not_found", "score not found", None),
        Ok(_) => {}
        Err(e) => return update_err(req, e),
    }
    state.cache.invalidate(&CacheKey::new(&teacher_id, &score.subject_id));
    ok(&req.id, json!({ "scoreId": score.id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dataset.import" => Some(handle_dataset_import(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "components.upsert" => Some(handle_components_upsert(state, req)),
        "components.delete" => Some(handle_components_delete(state, req)),
        "scores.upsert" => Some(handle_scores_upsert(state, req)),
        _ => None,
    }
}
