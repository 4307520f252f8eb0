use crate::calc::insights::InsightPolicy;
use crate::config::{load_workspace_config, CONFIG_FILE_NAME};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "scoreCache": state.cache.stats()
        }),
    )
}

/// A broken config file must not keep the workspace from opening.
fn base_policy_for(workspace: &Path) -> (InsightPolicy, bool) {
    match load_workspace_config(workspace) {
        Ok(Some(cfg)) => {
            tracing::info!(file = CONFIG_FILE_NAME, "loaded workspace config");
            (cfg.insights, true)
        }
        Ok(None) => (InsightPolicy::default(), false),
        Err(e) => {
            tracing::warn!(file = CONFIG_FILE_NAME, error = %e, "ignoring workspace config");
            (InsightPolicy::default(), false)
        }
    }
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            let (policy, config_loaded) = base_policy_for(&path);
            tracing::info!(workspace = %path.display(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.base_policy = policy;
            state.cache.clear();
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "configLoaded": config_loaded
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
