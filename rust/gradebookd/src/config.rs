//! Workspace configuration.
//!
//! An optional `gradebook.toml` next to the workspace database tunes the insight
//! thresholds. Overrides saved through `setup.update` are layered on top of it.

use crate::calc::insights::InsightPolicy;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "gradebook.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid [insights] table: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradebookConfig {
    pub insights: InsightPolicy,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    insights: Map<String, Value>,
}

/// The `[insights]` table goes through the same field checks as a `setup.update` patch.
pub fn parse_config(text: &str) -> Result<GradebookConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    let mut insights = InsightPolicy::default();
    merge_policy_patch(&mut insights, &raw.insights).map_err(ConfigError::Invalid)?;
    Ok(GradebookConfig { insights })
}

/// `Ok(None)` when the workspace has no config file.
pub fn load_workspace_config(workspace: &Path) -> Result<Option<GradebookConfig>, ConfigError> {
    let path = workspace.join(CONFIG_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    parse_config(&text).map(Some)
}

fn parse_mark(v: &Value, key: &str) -> Result<f64, String> {
    let Some(n) = v.as_f64() else {
        return Err(format!("{} must be a number", key));
    };
    if !(0.0..=100.0).contains(&n) {
        return Err(format!("{} must be in range 0..=100", key));
    }
    Ok(n)
}

fn parse_positive(v: &Value, key: &str) -> Result<f64, String> {
    let Some(n) = v.as_f64() else {
        return Err(format!("{} must be a number", key));
    };
    if !(n > 0.0 && n.is_finite()) {
        return Err(format!("{} must be > 0", key));
    }
    Ok(n)
}

fn parse_count(v: &Value, key: &str, max: u64) -> Result<u64, String> {
    let Some(n) = v.as_u64() else {
        return Err(format!("{} must be a non-negative integer", key));
    };
    if n > max {
        return Err(format!("{} must be <= {}", key, max));
    }
    Ok(n)
}

/// Applies a camelCase patch field by field. Unknown keys are rejected so typos do
/// not silently fall back to defaults.
pub fn merge_policy_patch(policy: &mut InsightPolicy, patch: &Map<String, Value>) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "passMark" => policy.pass_mark = parse_mark(v, k)?,
            "failingSubjectMark" => policy.failing_subject_mark = parse_mark(v, k)?,
            "trendStableBand" => policy.trend_stable_band = parse_positive(v, k)?,
            "riskFlagScore" => policy.risk_flag_score = parse_count(v, k, 100)? as u32,
            "topPerformerMin" => policy.top_performer_min = parse_mark(v, k)?,
            "topPerformerMinSubjects" => {
                policy.top_performer_min_subjects = parse_count(v, k, 50)? as usize
            }
            "strongestSubjectCount" => policy.strongest_subject_count = parse_count(v, k, 20)? as usize,
            "summarySubjectCount" => policy.summary_subject_count = parse_count(v, k, 20)? as usize,
            "improvementThreshold" => policy.improvement_threshold = parse_mark(v, k)?,
            "anomalySwingPct" => policy.anomaly_swing_pct = parse_positive(v, k)?,
            "inconsistencyStdDev" => policy.inconsistency_std_dev = parse_positive(v, k)?,
            _ => return Err(format!("unknown insights field: {}", k)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = parse_config(
            r#"
[insights]
passMark = 55.0
anomalySwingPct = 30.0
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.insights.pass_mark, 55.0);
        assert_eq!(cfg.insights.anomaly_swing_pct, 30.0);
        assert_eq!(cfg.insights.top_performer_min, InsightPolicy::default().top_performer_min);
        assert_eq!(parse_config("").expect("empty config"), GradebookConfig::default());
    }

    #[test]
    fn out_of_range_values_are_rejected_like_patches() {
        assert!(matches!(
            parse_config("[insights]\ntrendStableBand = 0.0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("[insights]\npassMark = 500.0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("[insights]\npasMark = 55\n"),
            Err(ConfigError::Invalid(_))
        ));
        let cfg = parse_config("[insights]\npassMark = 55\n").expect("integer mark");
        assert_eq!(cfg.insights.pass_mark, 55.0);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            parse_config("[insights\npassMark = 1"),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn patch_validates_each_field() {
        let mut p = InsightPolicy::default();
        let patch = json!({ "passMark": 65, "summarySubjectCount": 5 });
        merge_policy_patch(&mut p, patch.as_object().expect("object")).expect("valid patch");
        assert_eq!(p.pass_mark, 65.0);
        assert_eq!(p.summary_subject_count, 5);

        let bad = json!({ "passMark": 150 });
        assert!(merge_policy_patch(&mut p, bad.as_object().expect("object")).is_err());
        let unknown = json!({ "colour": "red" });
        assert!(merge_policy_patch(&mut p, unknown.as_object().expect("object")).is_err());
        assert_eq!(p.pass_mark, 65.0);
    }

    #[test]
    fn absent_config_file_is_none() {
        let dir = std::env::temp_dir().join(format!(
            "gradebookd-config-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        assert!(load_workspace_config(&dir).expect("load").is_none());
        std::fs::write(dir.join(CONFIG_FILE_NAME), "[insights]\nriskFlagScore = 25\n").expect("write");
        let cfg = load_workspace_config(&dir).expect("load").expect("config present");
        assert_eq!(cfg.insights.risk_flag_score, 25);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
