use super::stats::CohortStatistics;
use super::subject::ClassifiedSubject;
use super::MarkCell;
use serde::Serialize;

/// Fixed divisor for the main-subject average. Assumes three main subjects per student.
pub const AVERAGE_DIVISOR: f64 = 3.0;

/// Main subjects with numeric marks a student needs for a composite Z-score.
pub const MIN_ZSCORE_SUBJECTS: usize = 3;

/// Stand-in for a composite that rounds to zero, sorting below every real score.
pub const NO_ZSCORE_SENTINEL: f64 = -20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMetrics {
    pub total_marks: f64,
    pub average: f64,
    pub z_score: Option<f64>,
}

fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (x * factor).round() / factor
}

pub fn round_average(x: f64) -> f64 {
    round_to(x, 2)
}

pub fn round_z_score(x: f64) -> f64 {
    round_to(x, 4)
}

pub fn total_marks(subjects: &[ClassifiedSubject], marks: &[MarkCell], include_common: bool) -> f64 {
    subjects
        .iter()
        .zip(marks)
        .filter(|(s, _)| include_common || !s.is_common)
        .map(|(_, m)| m.effective_value())
        .sum()
}

pub fn main_subject_average(subjects: &[ClassifiedSubject], marks: &[MarkCell]) -> f64 {
    let sum: f64 = subjects
        .iter()
        .zip(marks)
        .filter(|(s, _)| !s.is_common)
        .map(|(_, m)| m.effective_value())
        .sum();
    round_average(sum / AVERAGE_DIVISOR)
}

/// Mean of per-subject Z-scores over usable main subjects, before rounding.
///
/// Returns 0 when the student has fewer than `MIN_ZSCORE_SUBJECTS` numeric
/// main-subject marks or when no usable subject contributed.
pub fn composite_z_score(
    subjects: &[ClassifiedSubject],
    marks: &[MarkCell],
    stats: &CohortStatistics,
) -> f64 {
    let mut valid = 0_usize;
    let mut contributed = 0_usize;
    let mut sum = 0.0_f64;
    for (subject, cell) in subjects.iter().zip(marks) {
        if subject.is_common {
            continue;
        }
        let value = match *cell {
            MarkCell::Numeric(v) => f64::from(v),
            MarkCell::Absent | MarkCell::NoEntry => continue,
        };
        valid += 1;
        let Some((mean, std_dev)) = stats.get(&subject.subject.id).and_then(|s| s.usable()) else {
            continue;
        };
        sum += (value - mean) / std_dev;
        contributed += 1;
    }
    if valid < MIN_ZSCORE_SUBJECTS || contributed == 0 {
        return 0.0;
    }
    sum / contributed as f64
}

/// Rounds to four places and swaps an exact zero for the sentinel.
pub fn finalize_z_score(raw: f64) -> f64 {
    let rounded = round_z_score(raw);
    if rounded == 0.0 {
        NO_ZSCORE_SENTINEL
    } else {
        rounded
    }
}

/// Per-student metrics. `stats` is only supplied when ranking by Z-score.
pub fn aggregate(
    subjects: &[ClassifiedSubject],
    marks: &[MarkCell],
    include_common: bool,
    stats: Option<&CohortStatistics>,
) -> StudentMetrics {
    StudentMetrics {
        total_marks: total_marks(subjects, marks, include_common),
        average: main_subject_average(subjects, marks),
        z_score: stats.map(|st| finalize_z_score(composite_z_score(subjects, marks, st))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::stats::cohort_statistics;
    use crate::ranking::test_support::{cohort, m};
    use crate::ranking::MarkCell;

    #[test]
    fn average_divides_by_three_regardless_of_subject_count() {
        let c = cohort(
            &[
                ("eng", "Common"),
                ("phy", "Science"),
                ("che", "Science"),
                ("bio", "Science"),
            ],
            &[("s1", vec![m(95), m(80), m(70), m(90)])],
        );
        assert_eq!(main_subject_average(&c.subjects, &c.students[0].marks), 80.0);

        let c = cohort(
            &[("phy", "Science"), ("che", "Science"), ("bio", "Science"), ("ict", "Tech")],
            &[("s1", vec![m(80), m(70), m(90), m(60)])],
        );
        assert_eq!(main_subject_average(&c.subjects, &c.students[0].marks), 100.0);
    }

    #[test]
    fn average_is_zero_without_main_subjects() {
        let c = cohort(&[("eng", "Common")], &[("s1", vec![m(77)])]);
        assert_eq!(main_subject_average(&c.subjects, &c.students[0].marks), 0.0);
    }

    #[test]
    fn average_rounds_to_two_places() {
        let c = cohort(
            &[("phy", "Science"), ("che", "Science")],
            &[("s1", vec![m(50), m(51)])],
        );
        assert_eq!(main_subject_average(&c.subjects, &c.students[0].marks), 33.67);
    }

    #[test]
    fn total_respects_include_common_flag() {
        let c = cohort(
            &[("eng", "Common"), ("phy", "Science")],
            &[("s1", vec![m(40), MarkCell::Absent])],
        );
        let s = &c.students[0];
        assert_eq!(total_marks(&c.subjects, &s.marks, true), 40.0);
        assert_eq!(total_marks(&c.subjects, &s.marks, false), 0.0);
    }

    #[test]
    fn per_subject_z_matches_population_formula() {
        let c = cohort(
            &[("phy", "Science"), ("che", "Science"), ("bio", "Science")],
            &[
                ("s1", vec![m(60), m(50), m(50)]),
                ("s2", vec![m(70), m(50), m(50)]),
                ("s3", vec![m(80), m(60), m(60)]),
                ("s4", vec![m(90), m(60), m(60)]),
            ],
        );
        let stats = cohort_statistics(&c);
        // che and bio: mean 55, sd 5 => s4 scores +1 in both.
        let z = composite_z_score(&c.subjects, &c.students[3].marks, &stats);
        let expected = (1.3416 + 1.0 + 1.0) / 3.0;
        assert!((z - expected).abs() < 1e-4, "z = {z}");
    }

    #[test]
    fn fewer_than_three_valid_main_marks_gives_sentinel() {
        let c = cohort(
            &[("phy", "Science"), ("che", "Science"), ("bio", "Science")],
            &[
                ("s1", vec![m(60), m(50), MarkCell::Absent]),
                ("s2", vec![m(70), m(55), m(40)]),
                ("s3", vec![m(80), m(65), m(45)]),
            ],
        );
        let stats = cohort_statistics(&c);
        assert_eq!(composite_z_score(&c.subjects, &c.students[0].marks, &stats), 0.0);
        let metrics = aggregate(&c.subjects, &c.students[0].marks, true, Some(&stats));
        assert_eq!(metrics.z_score, Some(NO_ZSCORE_SENTINEL));
    }

    #[test]
    fn unusable_subjects_never_contribute() {
        let c = cohort(
            &[
                ("phy", "Science"),
                ("che", "Science"),
                ("bio", "Science"),
                ("ict", "Tech"),
            ],
            &[
                ("s1", vec![m(60), m(70), m(50), m(99)]),
                ("s2", vec![m(80), m(70), m(70), MarkCell::NoEntry]),
            ],
        );
        let stats = cohort_statistics(&c);
        // che has zero variance, ict has one mark: only phy and bio count.
        let z = composite_z_score(&c.subjects, &c.students[0].marks, &stats);
        assert_eq!(z, -1.0);
    }

    #[test]
    fn exact_zero_composite_becomes_sentinel() {
        assert_eq!(finalize_z_score(0.0), NO_ZSCORE_SENTINEL);
        assert_eq!(finalize_z_score(0.00004), NO_ZSCORE_SENTINEL);
        assert_eq!(finalize_z_score(-0.00004), NO_ZSCORE_SENTINEL);
        assert_eq!(finalize_z_score(0.00006), 0.0001);
        assert_eq!(finalize_z_score(-1.23456), -1.2346);
    }

    #[test]
    fn z_score_absent_unless_requested() {
        let c = cohort(&[("phy", "Science")], &[("s1", vec![m(60)])]);
        let metrics = aggregate(&c.subjects, &c.students[0].marks, true, None);
        assert_eq!(metrics.z_score, None);
        assert_eq!(metrics.total_marks, 60.0);
        assert_eq!(metrics.average, 20.0);
    }
}
