use crate::calc::insights::{evaluate, InsightInput, InsightKind};
use crate::calc::trend::ordered_periods;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, effective_policy, load_scope, query_err, required_str, scored_for_subjects};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_insights_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let raw_kind = match required_str(req, "type") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind: InsightKind = match raw_kind.parse() {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    let policy = match db_conn(state, req).and_then(|conn| {
        effective_policy(state, conn).map_err(|e| query_err(req, e))
    }) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = match load_scope(state, req, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let records = match scored_for_subjects(state, req, &teacher_id, &data.subjects) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let periods = ordered_periods(&data.academic_years, &data.trimesters);
    let input = InsightInput {
        students: &data.students,
        subjects: &data.subjects,
        components: &data.components,
        periods: &periods,
        records: &records,
    };
    let output = evaluate(kind, &input, &policy);
    tracing::debug!(teacher = %teacher_id, kind = kind.as_str(), records = records.len(), "insights evaluated");

    ok(
        &req.id,
        json!({
            "type": kind.as_str(),
            "insights": output
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "insights.get" => Some(handle_insights_get(state, req)),
        _ => None,
    }
}
