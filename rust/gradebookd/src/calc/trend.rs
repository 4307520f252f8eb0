use super::aggregate::ScoredRecord;
use super::distribution::average;
use super::round_off_1_decimal;
use crate::model::{AcademicYear, Subject, Trimester};
use serde::Serialize;
use std::collections::HashMap;

/// One trimester placed on the global timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub trimester_id: String,
    pub academic_year_id: String,
    pub label: String,
}

/// Orders trimesters by (academic year start, trimester position). Trimesters whose
/// year is unknown sort after every known year.
pub fn ordered_periods(years: &[AcademicYear], trimesters: &[Trimester]) -> Vec<Period> {
    let by_id: HashMap<&str, &AcademicYear> = years.iter().map(|y| (y.id.as_str(), y)).collect();

    let mut keyed: Vec<((i64, i64, &str), Period)> = trimesters
        .iter()
        .map(|t| {
            let year = by_id.get(t.academic_year_id.as_str());
            let year_key = year.map(|y| y.start_year).unwrap_or(i64::MAX);
            let label = match year {
                Some(y) if !y.name.trim().is_empty() => format!("{} {}", t.name, y.name),
                _ => t.name.clone(),
            };
            (
                (year_key, t.sort_order, t.id.as_str()),
                Period {
                    trimester_id: t.id.clone(),
                    academic_year_id: t.academic_year_id.clone(),
                    label,
                },
            )
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, p)| p).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub trimester_id: String,
    pub academic_year_id: String,
    pub label: String,
    pub average: f64,
    pub record_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

impl TrendDirection {
    /// `delta` within `stable_band` either way counts as stable.
    pub fn from_delta(delta: f64, stable_band: f64) -> Self {
        if delta >= stable_band {
            TrendDirection::Improving
        } else if delta <= -stable_band {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        }
    }
}

/// Direction from the two most recent points; stable when fewer than two exist.
pub fn direction_of(points: &[TrendPoint], stable_band: f64) -> TrendDirection {
    match points {
        [.., prev, last] => TrendDirection::from_delta(last.average - prev.average, stable_band),
        _ => TrendDirection::Stable,
    }
}

/// Maps a subject offering id to its position in `periods`.
pub fn period_index(periods: &[Period], subjects: &[Subject]) -> HashMap<String, usize> {
    let positions: HashMap<(&str, &str), usize> = periods
        .iter()
        .enumerate()
        .map(|(i, p)| ((p.trimester_id.as_str(), p.academic_year_id.as_str()), i))
        .collect();
    subjects
        .iter()
        .filter_map(|s| {
            positions
                .get(&(s.trimester_id.as_str(), s.academic_year_id.as_str()))
                .map(|i| (s.id.clone(), *i))
        })
        .collect()
}

fn finals_per_period(
    periods: &[Period],
    subjects: &[Subject],
    records: &[&ScoredRecord],
) -> Vec<Vec<f64>> {
    let index = period_index(periods, subjects);
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); periods.len()];
    for r in records {
        if let Some(i) = index.get(&r.score.subject_id) {
            buckets[*i].push(r.final_score());
        }
    }
    buckets
}

/// Chronological `(period, average)` series. Periods with no matching record are
/// left out instead of reported as a zero average.
pub fn trend_series(periods: &[Period], subjects: &[Subject], records: &[&ScoredRecord]) -> Vec<TrendPoint> {
    finals_per_period(periods, subjects, records)
        .into_iter()
        .zip(periods)
        .filter(|(finals, _)| !finals.is_empty())
        .map(|(finals, p)| TrendPoint {
            trimester_id: p.trimester_id.clone(),
            academic_year_id: p.academic_year_id.clone(),
            label: p.label.clone(),
            average: average(&finals),
            record_count: finals.len(),
        })
        .collect()
}

/// One student's series across all their subjects.
pub fn student_trend(
    periods: &[Period],
    subjects: &[Subject],
    records: &[ScoredRecord],
    student_id: &str,
) -> Vec<TrendPoint> {
    let mine: Vec<&ScoredRecord> = records
        .iter()
        .filter(|r| r.score.student_id == student_id)
        .collect();
    trend_series(periods, subjects, &mine)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodComparison {
    pub current: TrendPoint,
    pub previous: TrendPoint,
    pub delta: f64,
    pub direction: TrendDirection,
}

/// Compares `current_trimester_id` with the trimester right before it in `periods`.
/// `None` when the current trimester is first or unknown, or either side has no
/// records to average.
pub fn compare_with_previous(
    periods: &[Period],
    subjects: &[Subject],
    records: &[&ScoredRecord],
    current_trimester_id: &str,
    stable_band: f64,
) -> Option<PeriodComparison> {
    let idx = periods
        .iter()
        .position(|p| p.trimester_id == current_trimester_id)?;
    if idx == 0 {
        return None;
    }
    let buckets = finals_per_period(periods, subjects, records);
    let point = |i: usize| -> Option<TrendPoint> {
        let finals = &buckets[i];
        if finals.is_empty() {
            return None;
        }
        Some(TrendPoint {
            trimester_id: periods[i].trimester_id.clone(),
            academic_year_id: periods[i].academic_year_id.clone(),
            label: periods[i].label.clone(),
            average: average(finals),
            record_count: finals.len(),
        })
    };
    let current = point(idx)?;
    let previous = point(idx - 1)?;
    let delta = round_off_1_decimal(current.average - previous.average);
    Some(PeriodComparison {
        direction: TrendDirection::from_delta(delta, stable_band),
        current,
        previous,
        delta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::aggregate::ScoreBreakdown;
    use crate::model::StudentScore;

    fn year(id: &str, start: i64) -> AcademicYear {
        AcademicYear {
            id: id.into(),
            name: format!("{}-{}", start, start + 1),
            start_year: start,
        }
    }

    fn term(id: &str, year: &str, order: i64) -> Trimester {
        Trimester {
            id: id.into(),
            academic_year_id: year.into(),
            name: format!("T{}", order),
            sort_order: order,
        }
    }

    fn subject(id: &str, year: &str, term: &str) -> Subject {
        Subject {
            id: id.into(),
            name: "Math".into(),
            grade_level_id: "g7".into(),
            academic_year_id: year.into(),
            trimester_id: term.into(),
        }
    }

    fn scored(student: &str, subject: &str, final_score: f64) -> ScoredRecord {
        ScoredRecord {
            score: StudentScore {
                student_id: student.into(),
                subject_id: subject.into(),
                ..Default::default()
            },
            breakdown: ScoreBreakdown {
                exam_score: final_score,
                assessment_score: final_score,
                weight_total: 0.0,
                recorded_components: 0,
                final_score,
            },
        }
    }

    fn fixture() -> (Vec<Period>, Vec<Subject>) {
        let years = vec![year("y25", 2025), year("y24", 2024)];
        let terms = vec![
            term("y25t1", "y25", 1),
            term("y24t3", "y24", 3),
            term("y24t1", "y24", 1),
            term("y24t2", "y24", 2),
        ];
        let subjects = vec![
            subject("m1", "y24", "y24t1"),
            subject("m2", "y24", "y24t2"),
            subject("m3", "y24", "y24t3"),
            subject("m4", "y25", "y25t1"),
        ];
        (ordered_periods(&years, &terms), subjects)
    }

    #[test]
    fn periods_follow_year_then_trimester_order() {
        let (periods, _) = fixture();
        let ids: Vec<&str> = periods.iter().map(|p| p.trimester_id.as_str()).collect();
        assert_eq!(ids, vec!["y24t1", "y24t2", "y24t3", "y25t1"]);
        assert_eq!(periods[0].label, "T1 2024-2025");
    }

    #[test]
    fn empty_periods_are_omitted() {
        let (periods, subjects) = fixture();
        let records = vec![scored("a", "m1", 70.0), scored("b", "m1", 80.0), scored("a", "m3", 60.0)];
        let refs: Vec<&ScoredRecord> = records.iter().collect();
        let series = trend_series(&periods, &subjects, &refs);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].trimester_id, "y24t1");
        assert_eq!(series[0].average, 75.0);
        assert_eq!(series[0].record_count, 2);
        assert_eq!(series[1].trimester_id, "y24t3");
        assert!(trend_series(&periods, &subjects, &[]).is_empty());
    }

    #[test]
    fn same_trimester_name_in_another_year_is_distinct() {
        let years = vec![year("y24", 2024), year("y25", 2025)];
        let terms = vec![term("t1", "y24", 1), term("t1", "y25", 1)];
        let periods = ordered_periods(&years, &terms);
        let subjects = vec![subject("m1", "y24", "t1"), subject("m2", "y25", "t1")];
        let records = vec![scored("a", "m1", 50.0), scored("a", "m2", 90.0)];
        let series = student_trend(&periods, &subjects, &records, "a");
        let avgs: Vec<f64> = series.iter().map(|p| p.average).collect();
        assert_eq!(avgs, vec![50.0, 90.0]);
    }

    #[test]
    fn student_trend_spans_subjects() {
        let (periods, subjects) = fixture();
        let records = vec![
            scored("a", "m1", 60.0),
            scored("a", "m2", 70.0),
            scored("b", "m2", 10.0),
            scored("a", "m4", 90.0),
        ];
        let series = student_trend(&periods, &subjects, &records, "a");
        assert_eq!(series.len(), 3);
        assert_eq!(direction_of(&series, 5.0), TrendDirection::Improving);
    }

    #[test]
    fn comparison_uses_preceding_period_by_position() {
        let (periods, subjects) = fixture();
        let records = vec![scored("a", "m2", 80.0), scored("a", "m3", 71.5)];
        let refs: Vec<&ScoredRecord> = records.iter().collect();
        let cmp = compare_with_previous(&periods, &subjects, &refs, "y24t3", 5.0).expect("comparison");
        assert_eq!(cmp.previous.trimester_id, "y24t2");
        assert_eq!(cmp.delta, -8.5);
        assert_eq!(cmp.direction, TrendDirection::Declining);

        assert!(compare_with_previous(&periods, &subjects, &refs, "y24t1", 5.0).is_none());
        // previous trimester (y24t3) exists but y25t1 has nothing recorded
        assert!(compare_with_previous(&periods, &subjects, &refs, "y25t1", 5.0).is_none());
        assert!(compare_with_previous(&periods, &subjects, &refs, "nope", 5.0).is_none());
    }

    #[test]
    fn direction_needs_two_points() {
        assert_eq!(direction_of(&[], 5.0), TrendDirection::Stable);
        assert_eq!(TrendDirection::from_delta(4.9, 5.0), TrendDirection::Stable);
        assert_eq!(TrendDirection::from_delta(-5.0, 5.0), TrendDirection::Declining);
    }
}
