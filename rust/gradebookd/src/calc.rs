//! Grade computation engine: aggregation, ranking, distribution, trend and insight
//! logic. Every function here is a pure transformation over in-memory entities.

pub mod aggregate;
pub mod distribution;
pub mod insights;
pub mod ranking;
pub mod trend;

use crate::model::Subject;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One-decimal rounding used for every displayed score:
/// `floor(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation, `None` for an empty slice.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

pub fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Upstream cohort selection. The analyzers themselves are filter-agnostic; callers
/// narrow the subject offerings with this before handing records over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectFilter {
    pub grade_level_id: Option<String>,
    pub subject_name: Option<String>,
    pub academic_year_id: Option<String>,
    pub trimester_id: Option<String>,
}

impl SubjectFilter {
    pub fn matches(&self, subject: &Subject) -> bool {
        let grade_ok = self
            .grade_level_id
            .as_deref()
            .map(|g| subject.grade_level_id == g)
            .unwrap_or(true);
        let name_ok = self
            .subject_name
            .as_deref()
            .map(|n| subject.name.trim().eq_ignore_ascii_case(n.trim()))
            .unwrap_or(true);
        let year_ok = self
            .academic_year_id
            .as_deref()
            .map(|y| subject.academic_year_id == y)
            .unwrap_or(true);
        let term_ok = self
            .trimester_id
            .as_deref()
            .map(|t| subject.trimester_id == t)
            .unwrap_or(true);
        grade_ok && name_ok && year_ok && term_ok
    }
}

pub fn parse_subject_filter(raw: Option<&serde_json::Value>) -> Result<SubjectFilter, CalcError> {
    let Some(raw) = raw else {
        return Ok(SubjectFilter::default());
    };
    if raw.is_null() {
        return Ok(SubjectFilter::default());
    }
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "filters must be an object"));
    };

    let field = |key: &str| -> Result<Option<String>, CalcError> {
        match obj.get(key) {
            None => Ok(None),
            Some(v) if v.is_null() => Ok(None),
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(CalcError::new(
                        "bad_params",
                        format!("filters.{} must be string or null", key),
                    ));
                };
                let t = s.trim();
                if t.is_empty() || t.eq_ignore_ascii_case("ALL") {
                    Ok(None)
                } else {
                    Ok(Some(t.to_string()))
                }
            }
        }
    };

    Ok(SubjectFilter {
        grade_level_id: field("gradeLevelId")?,
        subject_name: field("subjectName")?,
        academic_year_id: field("academicYearId")?,
        trimester_id: field("trimesterId")?,
    })
}
