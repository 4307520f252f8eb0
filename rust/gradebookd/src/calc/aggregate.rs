use super::round_off_1_decimal;
use crate::model::{AssessmentComponent, StudentScore};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const EXAM_SHARE: f64 = 0.5;
pub const ASSESSMENT_SHARE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentAverage {
    /// Normalized to 0..=100 regardless of how the active weights sum.
    pub score: f64,
    pub weight_total: f64,
    pub recorded_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub exam_score: f64,
    pub assessment_score: f64,
    pub weight_total: f64,
    pub recorded_components: usize,
    pub final_score: f64,
}

/// A raw score record with its derived final score attached. The record itself is
/// untouched so it can always be recomputed against different components.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub score: StudentScore,
    pub breakdown: ScoreBreakdown,
}

impl ScoredRecord {
    pub fn final_score(&self) -> f64 {
        self.breakdown.final_score
    }
}

pub(crate) fn clamp_score(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

/// Components weighted at zero, below zero or NaN take no part in any average.
pub fn is_active(c: &AssessmentComponent) -> bool {
    !c.weight.is_nan() && c.weight > 0.0
}

/// Weighted component average. Components without a recorded score are absent: they
/// contribute to neither the weighted sum nor the weight total.
pub fn assessment_average(
    recorded: &BTreeMap<String, f64>,
    components: &[AssessmentComponent],
) -> AssessmentAverage {
    let mut weighted_sum = 0.0_f64;
    let mut weight_total = 0.0_f64;
    let mut recorded_count = 0_usize;

    for c in components {
        if !is_active(c) {
            continue;
        }
        let Some(raw) = recorded.get(&c.id).copied() else {
            continue;
        };
        weighted_sum += clamp_score(raw) * (c.weight / 100.0);
        weight_total += c.weight;
        recorded_count += 1;
    }

    let score = if weight_total > 0.0 {
        (weighted_sum / weight_total) * 100.0
    } else {
        0.0
    };

    AssessmentAverage {
        score,
        weight_total,
        recorded_count,
    }
}

/// Final score for one record against the components active for its subject offering.
/// A missing exam score counts as 0, unlike missing component scores.
pub fn compute_final_score(score: &StudentScore, components: &[AssessmentComponent]) -> ScoreBreakdown {
    let exam = clamp_score(score.exam_score.unwrap_or(0.0));
    let avg = assessment_average(&score.class_assessment_scores, components);
    let final_score = round_off_1_decimal(EXAM_SHARE * exam + ASSESSMENT_SHARE * avg.score);
    ScoreBreakdown {
        exam_score: exam,
        assessment_score: round_off_1_decimal(avg.score),
        weight_total: avg.weight_total,
        recorded_components: avg.recorded_count,
        final_score,
    }
}

/// Scores every record against its own subject's components.
pub fn score_records(scores: &[StudentScore], components: &[AssessmentComponent]) -> Vec<ScoredRecord> {
    let mut by_subject: HashMap<&str, Vec<AssessmentComponent>> = HashMap::new();
    for c in components {
        by_subject
            .entry(c.subject_id.as_str())
            .or_default()
            .push(c.clone());
    }

    scores
        .iter()
        .map(|s| {
            let active = by_subject
                .get(s.subject_id.as_str())
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            ScoredRecord {
                score: s.clone(),
                breakdown: compute_final_score(s, active),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(id: &str, weight: f64) -> AssessmentComponent {
        AssessmentComponent {
            id: id.into(),
            subject_id: "math".into(),
            name: id.into(),
            weight,
        }
    }

    fn record(exam: Option<f64>, recorded: &[(&str, f64)]) -> StudentScore {
        StudentScore {
            id: "sc".into(),
            student_id: "st".into(),
            subject_id: "math".into(),
            exam_score: exam,
            class_assessment_scores: recorded
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            updated_at: None,
        }
    }

    #[test]
    fn weights_renormalize_when_not_summing_to_100() {
        let comps = vec![component("quiz", 25.0), component("homework", 25.0)];
        let r = record(Some(0.0), &[("quiz", 80.0), ("homework", 60.0)]);
        let avg = assessment_average(&r.class_assessment_scores, &comps);
        assert!((avg.score - 70.0).abs() < 1e-9);
        assert_eq!(avg.weight_total, 50.0);
    }

    #[test]
    fn unrecorded_component_is_absent_not_zero() {
        let comps = vec![component("quiz", 25.0), component("homework", 25.0)];
        let r = record(Some(90.0), &[("quiz", 70.0)]);
        let b = compute_final_score(&r, &comps);
        assert_eq!(b.assessment_score, 70.0);
        assert_eq!(b.recorded_components, 1);
        assert_eq!(b.final_score, 80.0);
    }

    #[test]
    fn missing_exam_counts_as_zero() {
        let comps = vec![component("quiz", 100.0)];
        let b = compute_final_score(&record(None, &[("quiz", 90.0)]), &comps);
        assert_eq!(b.exam_score, 0.0);
        assert_eq!(b.final_score, 45.0);
    }

    #[test]
    fn no_components_yields_zero_assessment() {
        let b = compute_final_score(&record(Some(77.0), &[("quiz", 90.0)]), &[]);
        assert_eq!(b.assessment_score, 0.0);
        assert_eq!(b.weight_total, 0.0);
        assert_eq!(b.final_score, 38.5);
    }

    #[test]
    fn zero_weight_components_are_ignored() {
        let comps = vec![component("quiz", 0.0), component("lab", 40.0)];
        let b = compute_final_score(&record(Some(60.0), &[("quiz", 10.0), ("lab", 80.0)]), &comps);
        assert_eq!(b.assessment_score, 80.0);
        assert_eq!(b.final_score, 70.0);
    }

    #[test]
    fn final_score_stays_in_range() {
        let comps = vec![component("quiz", 50.0)];
        let b = compute_final_score(&record(Some(140.0), &[("quiz", -20.0)]), &comps);
        assert_eq!(b.final_score, 50.0);
        let b = compute_final_score(&record(Some(100.0), &[("quiz", 100.0)]), &comps);
        assert_eq!(b.final_score, 100.0);
    }

    #[test]
    fn score_records_uses_each_subjects_components() {
        let mut sci = component("lab", 50.0);
        sci.subject_id = "science".into();
        let comps = vec![component("quiz", 50.0), sci];
        let mut a = record(Some(80.0), &[("quiz", 60.0), ("lab", 100.0)]);
        a.subject_id = "math".into();
        let mut b = record(Some(80.0), &[("quiz", 60.0), ("lab", 100.0)]);
        b.subject_id = "science".into();
        let scored = score_records(&[a, b], &comps);
        assert_eq!(scored[0].final_score(), 70.0);
        assert_eq!(scored[1].final_score(), 90.0);
    }
}
