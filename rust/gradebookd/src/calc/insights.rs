//! Heuristic classification over final scores and per-student trends.
//!
//! Thresholds live in [`InsightPolicy`] so they can be tuned per workspace. Risk score
//! points: below-pass average 40, declining trend 25, 15 per failing subject (max 30),
//! nothing recorded in the grade level's latest period 20. Capped at 100.

use super::aggregate::{clamp_score, is_active, ScoredRecord};
use super::distribution::{average, rate_at_or_above, EXCELLENCE_MARK};
use super::trend::{direction_of, period_index, student_trend, Period, TrendDirection, TrendPoint};
use super::{mean, round_off_1_decimal, std_dev};
use crate::model::{AssessmentComponent, Student, Subject};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use thiserror::Error;

const BELOW_PASS_POINTS: u32 = 40;
const DECLINING_POINTS: u32 = 25;
const FAILING_SUBJECT_POINTS: u32 = 15;
const FAILING_SUBJECT_CAP: u32 = 30;
const MISSING_RECENT_POINTS: u32 = 20;
const MAX_RISK_SCORE: u32 = 100;

/// Minimum recorded assessments (exam included) before spread is meaningful.
const MIN_INCONSISTENCY_SAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InsightPolicy {
    pub pass_mark: f64,
    pub failing_subject_mark: f64,
    pub trend_stable_band: f64,
    pub risk_flag_score: u32,
    pub top_performer_min: f64,
    pub top_performer_min_subjects: usize,
    pub strongest_subject_count: usize,
    pub summary_subject_count: usize,
    pub improvement_threshold: f64,
    /// Percent swing of the latest score against the student's earlier average.
    pub anomaly_swing_pct: f64,
    pub inconsistency_std_dev: f64,
}

impl Default for InsightPolicy {
    fn default() -> Self {
        Self {
            pass_mark: 60.0,
            failing_subject_mark: 50.0,
            trend_stable_band: 5.0,
            risk_flag_score: 40,
            top_performer_min: 85.0,
            top_performer_min_subjects: 2,
            strongest_subject_count: 3,
            summary_subject_count: 3,
            improvement_threshold: 70.0,
            anomaly_swing_pct: 20.0,
            inconsistency_std_dev: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightKind {
    AtRisk,
    TopPerformers,
    Summary,
    Anomalies,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown insight type: {0} (expected at-risk, top-performers, summary, anomalies or all)")]
pub struct UnknownInsightKind(pub String);

impl FromStr for InsightKind {
    type Err = UnknownInsightKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "at-risk" => Ok(InsightKind::AtRisk),
            "top-performers" => Ok(InsightKind::TopPerformers),
            "summary" => Ok(InsightKind::Summary),
            "anomalies" => Ok(InsightKind::Anomalies),
            "all" => Ok(InsightKind::All),
            other => Err(UnknownInsightKind(other.to_string())),
        }
    }
}

impl InsightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightKind::AtRisk => "at-risk",
            InsightKind::TopPerformers => "top-performers",
            InsightKind::Summary => "summary",
            InsightKind::Anomalies => "anomalies",
            InsightKind::All => "all",
        }
    }
}

/// Everything the engine needs, already scoped to one teacher.
#[derive(Debug, Clone, Copy)]
pub struct InsightInput<'a> {
    pub students: &'a [Student],
    pub subjects: &'a [Subject],
    pub components: &'a [AssessmentComponent],
    pub periods: &'a [Period],
    pub records: &'a [ScoredRecord],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskStudent {
    pub student_id: String,
    pub display_name: String,
    pub grade_level_id: String,
    pub average: f64,
    pub risk_score: u32,
    pub risk_factors: Vec<String>,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject_id: String,
    pub subject_name: String,
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPerformer {
    pub student_id: String,
    pub display_name: String,
    pub average: f64,
    pub strongest_subjects: Vec<SubjectScore>,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject_name: String,
    pub average: f64,
    pub record_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub class_average: f64,
    pub student_count: usize,
    pub record_count: usize,
    pub pass_rate: f64,
    pub excellence_rate: f64,
    pub top_subjects: Vec<SubjectAverage>,
    pub needs_improvement: Vec<SubjectAverage>,
    pub narrative: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SuddenDrop,
    SuddenImprovement,
    Inconsistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub student_id: String,
    pub display_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllInsights {
    pub at_risk: Vec<AtRiskStudent>,
    pub top_performers: Vec<TopPerformer>,
    pub summary: PerformanceSummary,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InsightOutput {
    AtRisk(Vec<AtRiskStudent>),
    TopPerformers(Vec<TopPerformer>),
    Summary(PerformanceSummary),
    Anomalies(Vec<Anomaly>),
    All(Box<AllInsights>),
}

pub fn evaluate(kind: InsightKind, input: &InsightInput<'_>, policy: &InsightPolicy) -> InsightOutput {
    match kind {
        InsightKind::AtRisk => InsightOutput::AtRisk(at_risk_students(input, policy)),
        InsightKind::TopPerformers => InsightOutput::TopPerformers(top_performers(input, policy)),
        InsightKind::Summary => InsightOutput::Summary(performance_summary(input, policy)),
        InsightKind::Anomalies => InsightOutput::Anomalies(detect_anomalies(input, policy)),
        InsightKind::All => InsightOutput::All(Box::new(AllInsights {
            at_risk: at_risk_students(input, policy),
            top_performers: top_performers(input, policy),
            summary: performance_summary(input, policy),
            anomalies: detect_anomalies(input, policy),
        })),
    }
}

struct StudentProfile<'a> {
    student: &'a Student,
    records: Vec<&'a ScoredRecord>,
    average: f64,
    series: Vec<TrendPoint>,
    trend: TrendDirection,
}

/// Students with at least one record, in input order.
fn build_profiles<'a>(input: &InsightInput<'a>, policy: &InsightPolicy) -> Vec<StudentProfile<'a>> {
    let mut by_student: HashMap<&str, Vec<&'a ScoredRecord>> = HashMap::new();
    for r in input.records {
        by_student
            .entry(r.score.student_id.as_str())
            .or_default()
            .push(r);
    }

    input
        .students
        .iter()
        .filter_map(|student| {
            let records = by_student.remove(student.id.as_str())?;
            let finals: Vec<f64> = records.iter().map(|r| r.final_score()).collect();
            let series = student_trend(input.periods, input.subjects, input.records, &student.id);
            let trend = direction_of(&series, policy.trend_stable_band);
            Some(StudentProfile {
                student,
                records,
                average: average(&finals),
                series,
                trend,
            })
        })
        .collect()
}

fn subject_lookup<'a>(subjects: &'a [Subject]) -> HashMap<&'a str, &'a Subject> {
    subjects.iter().map(|s| (s.id.as_str(), s)).collect()
}

fn subject_name(lookup: &HashMap<&str, &Subject>, subject_id: &str) -> String {
    lookup
        .get(subject_id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| subject_id.to_string())
}

pub fn at_risk_students(input: &InsightInput<'_>, policy: &InsightPolicy) -> Vec<AtRiskStudent> {
    let subjects = subject_lookup(input.subjects);
    let positions = period_index(input.periods, input.subjects);

    // Latest period in which each grade level has any score at all.
    let mut latest_by_grade: HashMap<&str, usize> = HashMap::new();
    for r in input.records {
        let (Some(subject), Some(pos)) = (
            subjects.get(r.score.subject_id.as_str()),
            positions.get(&r.score.subject_id),
        ) else {
            continue;
        };
        let entry = latest_by_grade
            .entry(subject.grade_level_id.as_str())
            .or_insert(*pos);
        *entry = (*entry).max(*pos);
    }

    let mut out: Vec<AtRiskStudent> = build_profiles(input, policy)
        .into_iter()
        .filter_map(|p| {
            let mut risk = 0_u32;
            let mut factors = Vec::new();

            if p.average < policy.pass_mark {
                risk += BELOW_PASS_POINTS;
                factors.push(format!(
                    "Average {:.1} is below the pass mark of {:.0}",
                    p.average, policy.pass_mark
                ));
            }

            if p.trend == TrendDirection::Declining {
                if let [.., prev, last] = p.series.as_slice() {
                    risk += DECLINING_POINTS;
                    factors.push(format!(
                        "Declining trend ({:+.1} points since {})",
                        round_off_1_decimal(last.average - prev.average),
                        prev.label
                    ));
                }
            }

            let mut failing: Vec<String> = Vec::new();
            for r in p.records.iter().filter(|r| r.final_score() < policy.failing_subject_mark) {
                let name = subject_name(&subjects, &r.score.subject_id);
                if !failing.contains(&name) {
                    failing.push(name);
                }
            }
            if !failing.is_empty() {
                risk += (FAILING_SUBJECT_POINTS * failing.len() as u32).min(FAILING_SUBJECT_CAP);
                factors.push(format!(
                    "Failing {} subject(s): {}",
                    failing.len(),
                    failing.join(", ")
                ));
            }

            let own_latest = p
                .records
                .iter()
                .filter_map(|r| positions.get(&r.score.subject_id).copied())
                .max();
            let cohort_latest = latest_by_grade.get(p.student.grade_level_id.as_str()).copied();
            if let (Some(own), Some(cohort)) = (own_latest, cohort_latest) {
                if own < cohort {
                    risk += MISSING_RECENT_POINTS;
                    factors.push(format!(
                        "No scores recorded in {}",
                        input.periods[cohort].label
                    ));
                }
            }

            let risk_score = risk.min(MAX_RISK_SCORE);
            if risk_score < policy.risk_flag_score {
                return None;
            }
            Some(AtRiskStudent {
                student_id: p.student.id.clone(),
                display_name: p.student.display_name(),
                grade_level_id: p.student.grade_level_id.clone(),
                average: p.average,
                risk_score,
                risk_factors: factors,
                trend: p.trend,
            })
        })
        .collect();

    out.sort_by(|a, b| {
        b.risk_score
            .cmp(&a.risk_score)
            .then_with(|| a.average.total_cmp(&b.average))
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    out
}

pub fn top_performers(input: &InsightInput<'_>, policy: &InsightPolicy) -> Vec<TopPerformer> {
    let subjects = subject_lookup(input.subjects);
    let mut out: Vec<TopPerformer> = build_profiles(input, policy)
        .into_iter()
        .filter(|p| {
            p.average >= policy.top_performer_min && p.records.len() >= policy.top_performer_min_subjects
        })
        .map(|p| {
            let mut best = p.records.clone();
            best.sort_by(|a, b| b.final_score().total_cmp(&a.final_score()));
            let strongest_subjects = best
                .into_iter()
                .take(policy.strongest_subject_count)
                .map(|r| SubjectScore {
                    subject_id: r.score.subject_id.clone(),
                    subject_name: subject_name(&subjects, &r.score.subject_id),
                    final_score: r.final_score(),
                })
                .collect();
            TopPerformer {
                student_id: p.student.id.clone(),
                display_name: p.student.display_name(),
                average: p.average,
                strongest_subjects,
                trend: p.trend,
            }
        })
        .collect();
    out.sort_by(|a, b| {
        b.average
            .total_cmp(&a.average)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    out
}

fn subject_averages(input: &InsightInput<'_>) -> Vec<SubjectAverage> {
    let subjects = subject_lookup(input.subjects);
    // Offerings of the same subject in different trimesters are pooled by name.
    let mut pooled: BTreeMap<String, (String, Vec<f64>)> = BTreeMap::new();
    for r in input.records {
        let name = subject_name(&subjects, &r.score.subject_id);
        let key = name.trim().to_ascii_lowercase();
        pooled
            .entry(key)
            .or_insert_with(|| (name.trim().to_string(), Vec::new()))
            .1
            .push(r.final_score());
    }
    let mut out: Vec<SubjectAverage> = pooled
        .into_values()
        .map(|(subject_name, finals)| SubjectAverage {
            subject_name,
            average: average(&finals),
            record_count: finals.len(),
        })
        .collect();
    out.sort_by(|a, b| {
        b.average
            .total_cmp(&a.average)
            .then_with(|| a.subject_name.cmp(&b.subject_name))
    });
    out
}

pub fn performance_summary(input: &InsightInput<'_>, policy: &InsightPolicy) -> PerformanceSummary {
    let finals: Vec<f64> = input.records.iter().map(|r| r.final_score()).collect();
    let class_average = average(&finals);
    let student_count = {
        let mut ids: Vec<&str> = input.records.iter().map(|r| r.score.student_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    };

    let ranked = subject_averages(input);
    let top_subjects: Vec<SubjectAverage> = ranked
        .iter()
        .take(policy.summary_subject_count)
        .cloned()
        .collect();
    let needs_improvement: Vec<SubjectAverage> = ranked
        .iter()
        .rev()
        .filter(|s| s.average < policy.improvement_threshold)
        .take(policy.summary_subject_count)
        .cloned()
        .collect();

    let narrative = if finals.is_empty() {
        "No final scores have been recorded yet.".to_string()
    } else {
        let mut text = format!(
            "Class average is {:.1} across {} student(s) and {} score record(s).",
            class_average,
            student_count,
            finals.len()
        );
        if let Some(best) = top_subjects.first() {
            text.push_str(&format!(
                " Strongest subject: {} ({:.1}).",
                best.subject_name, best.average
            ));
        }
        if needs_improvement.is_empty() {
            text.push_str(&format!(
                " No subject averages fall below {:.0}.",
                policy.improvement_threshold
            ));
        } else {
            let names: Vec<&str> = needs_improvement
                .iter()
                .map(|s| s.subject_name.as_str())
                .collect();
            text.push_str(&format!(" Needs attention: {}.", names.join(", ")));
        }
        text
    };

    PerformanceSummary {
        class_average,
        student_count,
        record_count: finals.len(),
        pass_rate: rate_at_or_above(&finals, policy.pass_mark),
        excellence_rate: rate_at_or_above(&finals, EXCELLENCE_MARK),
        top_subjects,
        needs_improvement,
        narrative,
    }
}

fn swing_severity(change_pct: f64, threshold: f64) -> Severity {
    let ratio = change_pct.abs() / threshold;
    if ratio >= 2.0 {
        Severity::High
    } else if ratio >= 1.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn spread_severity(spread: f64, threshold: f64) -> Severity {
    let ratio = spread / threshold;
    if ratio >= 1.5 {
        Severity::High
    } else if ratio >= 1.25 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Flags (student, subject) pairs. A drop or improvement compares the latest final
/// score against the mean of the same subject's earlier periods; inconsistency looks
/// at the spread of the latest record's exam and active component scores.
pub fn detect_anomalies(input: &InsightInput<'_>, policy: &InsightPolicy) -> Vec<Anomaly> {
    let subjects = subject_lookup(input.subjects);
    let active: HashSet<(&str, &str)> = input
        .components
        .iter()
        .filter(|c| is_active(c))
        .map(|c| (c.subject_id.as_str(), c.id.as_str()))
        .collect();
    let positions = period_index(input.periods, input.subjects);
    let students: HashMap<&str, &Student> =
        input.students.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut groups: BTreeMap<(&str, String), Vec<&ScoredRecord>> = BTreeMap::new();
    for r in input.records {
        if !students.contains_key(r.score.student_id.as_str()) {
            continue;
        }
        let name = subject_name(&subjects, &r.score.subject_id);
        groups
            .entry((r.score.student_id.as_str(), name.trim().to_ascii_lowercase()))
            .or_default()
            .push(r);
    }

    let mut out = Vec::new();
    for ((student_id, _), mut history) in groups {
        history.sort_by_key(|r| positions.get(&r.score.subject_id).copied().unwrap_or(usize::MAX));
        let Some(latest) = history.last().copied() else {
            continue;
        };
        let display_name = students
            .get(student_id)
            .map(|s| s.display_name())
            .unwrap_or_else(|| student_id.to_string());
        let name = subject_name(&subjects, &latest.score.subject_id);

        let earlier: Vec<f64> = history[..history.len() - 1]
            .iter()
            .map(|r| r.final_score())
            .collect();
        if let Some(hist) = mean(&earlier).filter(|h| *h > 0.0) {
            let last = latest.final_score();
            let change_pct = round_off_1_decimal((last - hist) / hist * 100.0);
            let kind = if change_pct <= -policy.anomaly_swing_pct {
                Some(AnomalyKind::SuddenDrop)
            } else if change_pct >= policy.anomaly_swing_pct {
                Some(AnomalyKind::SuddenImprovement)
            } else {
                None
            };
            if let Some(kind) = kind {
                out.push(Anomaly {
                    student_id: student_id.to_string(),
                    display_name: display_name.clone(),
                    subject_id: latest.score.subject_id.clone(),
                    subject_name: name.clone(),
                    kind,
                    severity: swing_severity(change_pct, policy.anomaly_swing_pct),
                    detail: format!(
                        "{} moved from an earlier average of {:.1} to {:.1} ({:+.1}%)",
                        name, hist, last, change_pct
                    ),
                    change_pct: Some(change_pct),
                    std_dev: None,
                });
            }
        }

        let mut samples: Vec<f64> = latest
            .score
            .class_assessment_scores
            .iter()
            .filter(|(id, _)| active.contains(&(latest.score.subject_id.as_str(), id.as_str())))
            .map(|(_, v)| clamp_score(*v))
            .collect();
        if let Some(exam) = latest.score.exam_score {
            samples.push(clamp_score(exam));
        }
        if samples.len() >= MIN_INCONSISTENCY_SAMPLES {
            if let Some(spread) = std_dev(&samples).filter(|s| *s >= policy.inconsistency_std_dev) {
                let spread = round_off_1_decimal(spread);
                let lo = samples.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                out.push(Anomaly {
                    student_id: student_id.to_string(),
                    display_name,
                    subject_id: latest.score.subject_id.clone(),
                    subject_name: name.clone(),
                    kind: AnomalyKind::Inconsistent,
                    severity: spread_severity(spread, policy.inconsistency_std_dev),
                    detail: format!(
                        "Assessment scores in {} range from {:.0} to {:.0} (std dev {:.1})",
                        name, lo, hi, spread
                    ),
                    change_pct: None,
                    std_dev: Some(spread),
                });
            }
        }
    }

    out.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then_with(|| a.subject_name.cmp(&b.subject_name))
    });
    out
}
