use super::{Cohort, MarkCell};
use serde::Serialize;
use std::collections::HashMap;

/// Minimum number of numeric marks before a subject can standardize scores.
pub const MIN_SUBJECT_SAMPLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnusableReason {
    TooFewMarks,
    ZeroVariance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SubjectStats {
    #[serde(rename_all = "camelCase")]
    Usable {
        mean: f64,
        std_dev: f64,
        count: usize,
    },
    #[serde(rename_all = "camelCase")]
    Unusable {
        count: usize,
        reason: UnusableReason,
    },
}

impl SubjectStats {
    /// Mean and population standard deviation, when the subject can discriminate.
    pub fn usable(&self) -> Option<(f64, f64)> {
        match *self {
            SubjectStats::Usable { mean, std_dev, .. } => Some((mean, std_dev)),
            SubjectStats::Unusable { .. } => None,
        }
    }
}

pub fn subject_stats(values: &[f64]) -> SubjectStats {
    let n = values.len();
    if n < MIN_SUBJECT_SAMPLE {
        return SubjectStats::Unusable {
            count: n,
            reason: UnusableReason::TooFewMarks,
        };
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return SubjectStats::Unusable {
            count: n,
            reason: UnusableReason::ZeroVariance,
        };
    }
    SubjectStats::Usable {
        mean,
        std_dev,
        count: n,
    }
}

#[derive(Debug, Clone, Default)]
pub struct CohortStatistics {
    by_subject: HashMap<String, SubjectStats>,
}

impl CohortStatistics {
    pub fn get(&self, subject_id: &str) -> Option<&SubjectStats> {
        self.by_subject.get(subject_id)
    }
}

pub fn cohort_statistics(cohort: &Cohort) -> CohortStatistics {
    let mut by_subject = HashMap::with_capacity(cohort.subjects.len());
    for (idx, subject) in cohort.subjects.iter().enumerate() {
        let values: Vec<f64> = cohort
            .students
            .iter()
            .filter_map(|s| match s.marks[idx] {
                MarkCell::Numeric(v) => Some(f64::from(v)),
                MarkCell::Absent | MarkCell::NoEntry => None,
            })
            .collect();
        let stats = subject_stats(&values);
        if stats.usable().is_none() {
            tracing::debug!(
                subject = %subject.subject.id,
                count = values.len(),
                "subject excluded from z-scores"
            );
        }
        by_subject.insert(subject.subject.id.clone(), stats);
    }
    CohortStatistics { by_subject }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::test_support::{cohort, m};
    use crate::ranking::MarkCell;

    #[test]
    fn population_stddev_for_spread_marks() {
        let stats = subject_stats(&[60.0, 70.0, 80.0, 90.0]);
        let (mean, sd) = stats.usable().expect("usable");
        assert_eq!(mean, 75.0);
        assert!((sd - 11.1803).abs() < 1e-4);
    }

    #[test]
    fn single_mark_is_unusable() {
        assert_eq!(
            subject_stats(&[88.0]),
            SubjectStats::Unusable {
                count: 1,
                reason: UnusableReason::TooFewMarks
            }
        );
        assert_eq!(
            subject_stats(&[]),
            SubjectStats::Unusable {
                count: 0,
                reason: UnusableReason::TooFewMarks
            }
        );
    }

    #[test]
    fn identical_marks_are_unusable() {
        assert_eq!(
            subject_stats(&[70.0, 70.0, 70.0]),
            SubjectStats::Unusable {
                count: 3,
                reason: UnusableReason::ZeroVariance
            }
        );
    }

    #[test]
    fn absent_and_blank_cells_are_not_sampled() {
        let c = cohort(
            &[("phy", "Science")],
            &[
                ("s1", vec![m(60)]),
                ("s2", vec![MarkCell::Absent]),
                ("s3", vec![MarkCell::NoEntry]),
                ("s4", vec![m(80)]),
            ],
        );
        let stats = cohort_statistics(&c);
        assert_eq!(
            stats.get("phy"),
            Some(&SubjectStats::Usable {
                mean: 70.0,
                std_dev: 10.0,
                count: 2
            })
        );
    }
}
