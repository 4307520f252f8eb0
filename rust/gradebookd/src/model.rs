use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reads a JSON number or numeric string. Anything else (null, bool, garbage text,
/// NaN/inf) is treated as absent.
pub fn lenient_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn de_lenient_opt<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw.as_ref().and_then(lenient_number))
}

fn de_lenient_or_zero<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_lenient_opt(d)?.unwrap_or(0.0))
}

fn de_lenient_map<'de, D>(d: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    let mut out = BTreeMap::new();
    if let Some(Value::Object(obj)) = raw {
        for (k, v) in obj {
            // Unrecorded entries stay out of the map so they never reach a denominator.
            if let Some(n) = lenient_number(&v) {
                out.insert(k, n);
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeLevel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Chronological key, e.g. 2024 for "2024-2025".
    #[serde(default)]
    pub start_year: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trimester {
    pub id: String,
    #[serde(default)]
    pub academic_year_id: String,
    #[serde(default)]
    pub name: String,
    /// Position within the academic year (1, 2, 3).
    #[serde(default)]
    pub sort_order: i64,
}

/// A subject offering: one subject bound to a grade level, academic year and trimester.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub grade_level_id: String,
    #[serde(default)]
    pub academic_year_id: String,
    #[serde(default)]
    pub trimester_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentComponent {
    /// Left blank by callers creating a component; the store assigns one.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub name: String,
    /// Intended percentage; not guaranteed to sum to 100 across a subject.
    #[serde(default, deserialize_with = "de_lenient_or_zero")]
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub grade_level_id: String,
}

impl Student {
    pub fn display_name(&self) -> String {
        match (self.last_name.trim(), self.first_name.trim()) {
            ("", "") => self.id.clone(),
            (last, "") => last.to_string(),
            ("", first) => first.to_string(),
            (last, first) => format!("{}, {}", last, first),
        }
    }
}

/// Raw inputs for one (student, subject offering) pair. Final score and rank are
/// always derived from this, never stored alongside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentScore {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default, deserialize_with = "de_lenient_opt")]
    pub exam_score: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_map")]
    pub class_assessment_scores: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Everything one teacher owns, already scoped by the data layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub grade_levels: Vec<GradeLevel>,
    #[serde(default)]
    pub academic_years: Vec<AcademicYear>,
    #[serde(default)]
    pub trimesters: Vec<Trimester>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub components: Vec<AssessmentComponent>,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub scores: Vec<StudentScore>,
}
