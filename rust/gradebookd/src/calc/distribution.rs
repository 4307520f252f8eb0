use super::aggregate::{clamp_score, ScoredRecord};
use super::{compute_median, mean, round_off_1_decimal};
use crate::model::{AssessmentComponent, StudentScore};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const PASS_MARK: f64 = 60.0;
pub const EXCELLENCE_MARK: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceBand {
    Excellent,
    Good,
    Average,
    Poor,
}

impl PerformanceBand {
    /// Excellent >= 80, good >= 65, average >= 50, poor below.
    pub fn classify(score: f64) -> Self {
        if score >= 80.0 {
            PerformanceBand::Excellent
        } else if score >= 65.0 {
            PerformanceBand::Good
        } else if score >= 50.0 {
            PerformanceBand::Average
        } else {
            PerformanceBand::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceBand::Excellent => "excellent",
            PerformanceBand::Good => "good",
            PerformanceBand::Average => "average",
            PerformanceBand::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    pub excellent: usize,
    pub good: usize,
    pub average: usize,
    pub poor: usize,
}

pub fn grade_distribution(scores: &[f64]) -> GradeDistribution {
    let mut d = GradeDistribution::default();
    for s in scores {
        match PerformanceBand::classify(*s) {
            PerformanceBand::Excellent => d.excellent += 1,
            PerformanceBand::Good => d.good += 1,
            PerformanceBand::Average => d.average += 1,
            PerformanceBand::Poor => d.poor += 1,
        }
    }
    d
}

/// Display average; 0 for an empty set.
pub fn average(scores: &[f64]) -> f64 {
    mean(scores).map(round_off_1_decimal).unwrap_or(0.0)
}

/// Percentage of scores at or above `threshold`; 0 for an empty set.
pub fn rate_at_or_above(scores: &[f64], threshold: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let hits = scores.iter().filter(|s| **s >= threshold).count();
    round_off_1_decimal(100.0 * hits as f64 / scores.len() as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPerformance {
    pub component_id: String,
    pub name: Option<String>,
    pub average: f64,
    pub recorded_count: usize,
}

/// Mean score (clamped to 0..=100) per component across every record that has an
/// entry for it, independent of weights. Names come from `components` when known.
pub fn component_performance(
    scores: &[&StudentScore],
    components: &[AssessmentComponent],
) -> Vec<ComponentPerformance> {
    let names: HashMap<&str, &str> = components
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();

    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for s in scores {
        for (component_id, raw) in &s.class_assessment_scores {
            values
                .entry(component_id.as_str())
                .or_default()
                .push(clamp_score(*raw));
        }
    }

    values
        .into_iter()
        .map(|(component_id, raws)| ComponentPerformance {
            component_id: component_id.to_string(),
            name: names.get(component_id).map(|n| n.to_string()),
            average: average(&raws),
            recorded_count: raws.len(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    pub record_count: usize,
    pub average: f64,
    pub median: f64,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    pub pass_rate: f64,
    pub excellence_rate: f64,
    pub distribution: GradeDistribution,
    pub components: Vec<ComponentPerformance>,
}

/// Summary over an already filtered set of final-scored records.
pub fn summarize(records: &[ScoredRecord], components: &[AssessmentComponent]) -> CohortSummary {
    let finals: Vec<f64> = records.iter().map(|r| r.final_score()).collect();
    let raw: Vec<&StudentScore> = records.iter().map(|r| &r.score).collect();
    CohortSummary {
        record_count: finals.len(),
        average: average(&finals),
        median: round_off_1_decimal(compute_median(&finals)),
        highest: finals.iter().copied().reduce(f64::max),
        lowest: finals.iter().copied().reduce(f64::min),
        pass_rate: rate_at_or_above(&finals, PASS_MARK),
        excellence_rate: rate_at_or_above(&finals, EXCELLENCE_MARK),
        distribution: grade_distribution(&finals),
        components: component_performance(&raw, components),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(PerformanceBand::classify(80.0), PerformanceBand::Excellent);
        assert_eq!(PerformanceBand::classify(79.9), PerformanceBand::Good);
        assert_eq!(PerformanceBand::classify(65.0), PerformanceBand::Good);
        assert_eq!(PerformanceBand::classify(64.9), PerformanceBand::Average);
        assert_eq!(PerformanceBand::classify(50.0), PerformanceBand::Average);
        assert_eq!(PerformanceBand::classify(49.9), PerformanceBand::Poor);
    }

    #[test]
    fn empty_set_is_all_zero() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(rate_at_or_above(&[], PASS_MARK), 0.0);
        let d = grade_distribution(&[]);
        assert_eq!(d, GradeDistribution::default());
        let s = summarize(&[], &[]);
        assert_eq!(s.record_count, 0);
        assert_eq!(s.highest, None);
        assert!(s.components.is_empty());
    }

    #[test]
    fn three_student_cohort() {
        let finals = [92.0, 92.0, 75.0];
        assert_eq!(average(&finals), 86.3);
        assert_eq!(rate_at_or_above(&finals, EXCELLENCE_MARK), 66.7);
        assert_eq!(rate_at_or_above(&finals, PASS_MARK), 100.0);
        let d = grade_distribution(&finals);
        assert_eq!((d.excellent, d.good, d.average, d.poor), (2, 1, 0, 0));
    }

    #[test]
    fn component_average_ignores_absent_entries() {
        let a = StudentScore {
            class_assessment_scores: [("quiz".to_string(), 80.0), ("hw".to_string(), 50.0)]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let b = StudentScore {
            class_assessment_scores: [("quiz".to_string(), 60.0)].into_iter().collect(),
            ..Default::default()
        };
        let comps = vec![AssessmentComponent {
            id: "quiz".into(),
            subject_id: "m".into(),
            name: "Quizzes".into(),
            weight: 25.0,
        }];
        let perf = component_performance(&[&a, &b], &comps);
        assert_eq!(perf.len(), 2);
        assert_eq!(perf[0].component_id, "hw");
        assert_eq!(perf[0].average, 50.0);
        assert_eq!(perf[0].name, None);
        assert_eq!(perf[1].average, 70.0);
        assert_eq!(perf[1].recorded_count, 2);
        assert_eq!(perf[1].name.as_deref(), Some("Quizzes"));
    }

    #[test]
    fn component_average_clamps_out_of_range_entries() {
        let a = StudentScore {
            class_assessment_scores: [("quiz".to_string(), 140.0)].into_iter().collect(),
            ..Default::default()
        };
        let b = StudentScore {
            class_assessment_scores: [("quiz".to_string(), -20.0)].into_iter().collect(),
            ..Default::default()
        };
        let perf = component_performance(&[&a, &b], &[]);
        assert_eq!(perf[0].average, 50.0);
    }
}
