use super::aggregate::ScoredRecord;
use super::{mean, round_off_1_decimal};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranked<T> {
    #[serde(flatten)]
    pub item: T,
    pub rank: usize,
    pub rank_label: String,
}

/// `1st`, `2nd`, `3rd`, then `Nth`.
pub fn ordinal_label(rank: usize) -> String {
    match rank {
        1 => "1st".to_string(),
        2 => "2nd".to_string(),
        3 => "3rd".to_string(),
        n => format!("{}th", n),
    }
}

fn sort_key(score: Option<f64>) -> f64 {
    match score {
        Some(v) if !v.is_nan() => v,
        _ => f64::NEG_INFINITY,
    }
}

/// Competition ranking with gaps: scores 90, 80, 80, 70 rank 1, 2, 2, 4.
/// Missing or NaN scores sort last. The sort is stable so equal scores keep their
/// input order, which makes re-ranking an already ranked list a no-op.
pub fn competition_rank<T, F>(items: Vec<T>, score_of: F) -> Vec<Ranked<T>>
where
    F: Fn(&T) -> Option<f64>,
{
    let mut keyed: Vec<(f64, T)> = items
        .into_iter()
        .map(|it| (sort_key(score_of(&it)), it))
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut out = Vec::with_capacity(keyed.len());
    let mut current_rank = 0_usize;
    let mut previous: Option<f64> = None;
    for (idx, (key, item)) in keyed.into_iter().enumerate() {
        if previous != Some(key) {
            current_rank = idx + 1;
        }
        previous = Some(key);
        out.push(Ranked {
            item,
            rank: current_rank,
            rank_label: ordinal_label(current_rank),
        });
    }
    out
}

/// Ranks one subject offering's cohort by final score.
pub fn rank_cohort(records: Vec<ScoredRecord>) -> Vec<Ranked<ScoredRecord>> {
    competition_rank(records, |r| Some(r.final_score()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeStanding {
    pub student_id: String,
    pub average: f64,
    pub subject_count: usize,
}

/// Grade-level ranking: each student's mean final score across the subject offerings
/// present in `records`.
pub fn rank_composite(records: &[ScoredRecord]) -> Vec<Ranked<CompositeStanding>> {
    let mut by_student: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in records {
        by_student
            .entry(r.score.student_id.as_str())
            .or_default()
            .push(r.final_score());
    }
    let standings = by_student
        .into_iter()
        .map(|(student_id, finals)| CompositeStanding {
            student_id: student_id.to_string(),
            average: mean(&finals).map(round_off_1_decimal).unwrap_or(0.0),
            subject_count: finals.len(),
        })
        .collect::<Vec<_>>();
    competition_rank(standings, |s| Some(s.average))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::aggregate::ScoreBreakdown;
    use crate::model::StudentScore;

    fn ranks_of(scores: &[Option<f64>]) -> Vec<usize> {
        competition_rank(scores.to_vec(), |s| *s)
            .into_iter()
            .map(|r| r.rank)
            .collect()
    }

    fn scored(student: &str, subject: &str, final_score: f64) -> ScoredRecord {
        ScoredRecord {
            score: StudentScore {
                id: format!("{}-{}", student, subject),
                student_id: student.into(),
                subject_id: subject.into(),
                ..Default::default()
            },
            breakdown: ScoreBreakdown {
                exam_score: final_score,
                assessment_score: final_score,
                weight_total: 100.0,
                recorded_components: 1,
                final_score,
            },
        }
    }

    #[test]
    fn ties_share_rank_and_leave_gap() {
        assert_eq!(
            ranks_of(&[Some(90.0), Some(80.0), Some(80.0), Some(70.0)]),
            vec![1, 2, 2, 4]
        );
        assert_eq!(ranks_of(&[Some(92.0), Some(75.0), Some(92.0)]), vec![1, 1, 3]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(ranks_of(&[]).is_empty());
    }

    #[test]
    fn missing_and_nan_sort_last() {
        let ranked = competition_rank(vec![None, Some(f64::NAN), Some(10.0)], |s| *s);
        assert_eq!(ranked[0].item, Some(10.0));
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[2].rank, 2);
    }

    #[test]
    fn reranking_is_idempotent() {
        let first = rank_cohort(vec![
            scored("a", "m", 70.0),
            scored("b", "m", 80.0),
            scored("c", "m", 80.0),
            scored("d", "m", 90.0),
        ]);
        let ids_first: Vec<(String, usize)> = first
            .iter()
            .map(|r| (r.item.score.student_id.clone(), r.rank))
            .collect();
        let second = rank_cohort(first.into_iter().map(|r| r.item).collect());
        let ids_second: Vec<(String, usize)> = second
            .iter()
            .map(|r| (r.item.score.student_id.clone(), r.rank))
            .collect();
        assert_eq!(ids_first, ids_second);
    }

    #[test]
    fn ordinal_labels() {
        let labels: Vec<String> = [1, 2, 3, 4, 11, 21].iter().map(|n| ordinal_label(*n)).collect();
        assert_eq!(labels, vec!["1st", "2nd", "3rd", "4th", "11th", "21th"]);
    }

    #[test]
    fn composite_ranking_averages_subjects() {
        let ranked = rank_composite(&[
            scored("a", "math", 90.0),
            scored("a", "sci", 70.0),
            scored("b", "math", 80.0),
            scored("c", "math", 95.0),
        ]);
        let flat: Vec<(&str, f64, usize)> = ranked
            .iter()
            .map(|r| (r.item.student_id.as_str(), r.item.average, r.rank))
            .collect();
        assert_eq!(flat, vec![("c", 95.0, 1), ("a", 80.0, 2), ("b", 80.0, 2)]);
    }
}
