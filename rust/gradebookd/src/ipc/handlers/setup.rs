use crate::calc::insights::InsightPolicy;
use crate::config::merge_policy_patch;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{effective_policy, INSIGHTS_SETTINGS_KEY};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Insights,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "insights" => Some(Self::Insights),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Insights => INSIGHTS_SETTINGS_KEY,
        }
    }
}

/// Only the keys a user has overridden are stored, so `gradebook.toml` edits still
/// show through for everything else.
fn load_overrides(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Map<String, Value>> {
    Ok(db::settings_get_json(conn, section.key())?
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let insights = match effective_policy(state, conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let overrides = match load_overrides(conn, SetupSection::Insights) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "insights": insights,
            "insightsOverrides": overrides,
            "insightsDefaults": InsightPolicy::default()
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut overrides = match load_overrides(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for (k, v) in patch_obj {
        overrides.insert(k.clone(), v.clone());
    }
    // Validate the whole override set against a scratch copy; nothing is saved on error.
    let mut merged = state.base_policy.clone();
    if let Err(msg) = merge_policy_patch(&mut merged, &overrides) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &Value::Object(overrides)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section_raw, "setup section updated");
    ok(&req.id, json!({ "ok": true, "insights": merged }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
