use crate::cache::CacheKey;
use crate::calc::aggregate::{score_records, ScoredRecord};
use crate::calc::insights::InsightPolicy;
use crate::calc::CalcError;
use crate::config::merge_policy_patch;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::{Dataset, Subject};
use rusqlite::Connection;

pub const INSIGHTS_SETTINGS_KEY: &str = "setup.insights";

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent, null and blank all read as `None`; any other non-string is rejected.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be string or null", key),
                None,
            )),
        },
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn calc_err(req: &Request, e: CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

pub fn query_err(req: &Request, e: anyhow::Error) -> serde_json::Value {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

pub fn update_err(req: &Request, e: anyhow::Error) -> serde_json::Value {
    err(&req.id, "db_update_failed", e.to_string(), None)
}

/// Entity collections owned by `teacher_id`.
pub fn load_scope(state: &AppState, req: &Request, teacher_id: &str) -> Result<Dataset, serde_json::Value> {
    let conn = db_conn(state, req)?;
    db::load_dataset(conn, teacher_id).map_err(|e| query_err(req, e))
}

/// Final-scored records of one subject offering, served from the score cache when
/// the entry is still valid.
pub fn scored_subject(
    state: &mut AppState,
    req: &Request,
    teacher_id: &str,
    subject_id: &str,
) -> Result<Vec<ScoredRecord>, serde_json::Value> {
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))?;
    state
        .cache
        .get_or_try_insert_with(CacheKey::new(teacher_id, subject_id), || {
            let components = db::load_components(conn, teacher_id, Some(subject_id))?;
            let scores = db::load_scores(conn, teacher_id, subject_id)?;
            Ok::<_, anyhow::Error>(score_records(&scores, &components))
        })
        .map_err(|e| query_err(req, e))
}

pub fn scored_for_subjects<'s, I>(
    state: &mut AppState,
    req: &Request,
    teacher_id: &str,
    subjects: I,
) -> Result<Vec<ScoredRecord>, serde_json::Value>
where
    I: IntoIterator<Item = &'s Subject>,
{
    let mut out = Vec::new();
    for s in subjects {
        out.extend(scored_subject(state, req, teacher_id, &s.id)?);
    }
    Ok(out)
}

/// Base policy (defaults plus `gradebook.toml`) with saved overrides applied. A saved
/// section that no longer validates is ignored as a whole.
pub fn effective_policy(state: &AppState, conn: &Connection) -> anyhow::Result<InsightPolicy> {
    let mut policy = state.base_policy.clone();
    let Some(saved) = db::settings_get_json(conn, INSIGHTS_SETTINGS_KEY)? else {
        return Ok(policy);
    };
    let Some(patch) = saved.as_object() else {
        tracing::warn!(key = INSIGHTS_SETTINGS_KEY, "saved insights settings are not an object; ignored");
        return Ok(policy);
    };
    let mut merged = policy.clone();
    match merge_policy_patch(&mut merged, patch) {
        Ok(()) => policy = merged,
        Err(e) => tracing::warn!(error = %e, "saved insights settings rejected; using base policy"),
    }
    Ok(policy)
}
