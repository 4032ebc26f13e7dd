//! Cohort ranking: subject classification, mark normalization, cohort
//! statistics, per-student aggregation, competition ranking and the
//! attendance merge. Everything here is a pure function of its inputs.

pub mod aggregate;
pub mod attendance;
pub mod mark;
pub mod rank;
pub mod stats;
pub mod subject;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use aggregate::StudentMetrics;
pub use attendance::{AttendanceFeed, AttendanceFields, AttendanceRecord, AttendanceSummary};
pub use mark::{normalize_mark, MarkCell, MarkDisplay, MarkInputError};
pub use rank::RankingMethod;
pub use stats::SubjectStats;
pub use subject::{classify_subjects, ClassifiedSubject, Subject};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub index_number: String,
    pub name: String,
    #[serde(default)]
    pub class_name: Option<String>,
}

/// A student with whatever marks were recorded, keyed by subject id.
#[derive(Debug, Clone)]
pub struct StudentEntry {
    pub student: Student,
    pub marks: HashMap<String, MarkCell>,
}

#[derive(Debug, Clone)]
pub struct CohortStudent {
    pub student: Student,
    /// One cell per subject, aligned with `Cohort::subjects`.
    pub marks: Vec<MarkCell>,
}

#[derive(Debug, Clone)]
pub struct Cohort {
    pub subjects: Vec<ClassifiedSubject>,
    pub students: Vec<CohortStudent>,
}

impl Cohort {
    /// Lays every student's marks out in subject order, filling gaps with `NoEntry`.
    pub fn assemble(subjects: &[Subject], entries: Vec<StudentEntry>) -> Self {
        let subjects = classify_subjects(subjects);
        let students = entries
            .into_iter()
            .map(|entry| {
                for key in entry.marks.keys() {
                    if !subjects.iter().any(|s| &s.subject.id == key) {
                        tracing::debug!(
                            student = %entry.student.id,
                            subject = %key,
                            "dropping mark for unknown subject"
                        );
                    }
                }
                let marks = subjects
                    .iter()
                    .map(|s| {
                        entry
                            .marks
                            .get(&s.subject.id)
                            .copied()
                            .unwrap_or(MarkCell::NoEntry)
                    })
                    .collect();
                CohortStudent {
                    student: entry.student,
                    marks,
                }
            })
            .collect();
        Cohort { subjects, students }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingOptions {
    pub method: RankingMethod,
    pub include_common_in_total: bool,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            method: RankingMethod::TotalMarks,
            include_common_in_total: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMark {
    pub subject_id: String,
    pub state: &'static str,
    pub display: MarkDisplay,
    pub effective: f64,
}

impl RankedMark {
    fn new(subject_id: &str, cell: MarkCell) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            state: cell.state_str(),
            display: cell.display(),
            effective: cell.effective_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub rank: u32,
    pub student: Student,
    pub marks: Vec<RankedMark>,
    pub total_marks: f64,
    pub average: f64,
    pub z_score: Option<f64>,
    #[serde(flatten)]
    pub attendance: AttendanceFields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatsRow {
    pub subject_id: String,
    #[serde(flatten)]
    pub stats: SubjectStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    pub ranking_method: RankingMethod,
    pub include_common_in_total: bool,
    pub subjects: Vec<ClassifiedSubject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_stats: Option<Vec<SubjectStatsRow>>,
    pub attendance: AttendanceSummary,
    pub rows: Vec<RankedStudent>,
}

impl RankedResult {
    /// Rows ranked within the first `n`, ties at the boundary included.
    pub fn top(&self, n: u32) -> Vec<RankedStudent> {
        self.rows.iter().filter(|r| r.rank <= n).cloned().collect()
    }
}

pub fn rank_cohort(
    cohort: &Cohort,
    options: &RankingOptions,
    attendance: &AttendanceFeed,
) -> RankedResult {
    let stats = match options.method {
        RankingMethod::ZScore => Some(stats::cohort_statistics(cohort)),
        RankingMethod::TotalMarks | RankingMethod::Average => None,
    };

    let scored: Vec<(&CohortStudent, StudentMetrics)> = cohort
        .students
        .iter()
        .map(|s| {
            let metrics = aggregate::aggregate(
                &cohort.subjects,
                &s.marks,
                options.include_common_in_total,
                stats.as_ref(),
            );
            (s, metrics)
        })
        .collect();

    let method = options.method;
    let ranked = rank::rank_by(scored, |(_, m)| method.metric(m));

    let (fields, summary) = attendance::merge_attendance(
        ranked.iter().map(|(_, (s, _))| s.student.id.as_str()),
        attendance,
    );

    let rows: Vec<RankedStudent> = ranked
        .into_iter()
        .zip(fields)
        .map(|((rank, (s, metrics)), attendance)| RankedStudent {
            rank,
            student: s.student.clone(),
            marks: cohort
                .subjects
                .iter()
                .zip(&s.marks)
                .map(|(subj, cell)| RankedMark::new(&subj.subject.id, *cell))
                .collect(),
            total_marks: metrics.total_marks,
            average: metrics.average,
            z_score: metrics.z_score,
            attendance,
        })
        .collect();

    let subject_stats = stats.map(|st| {
        cohort
            .subjects
            .iter()
            .filter_map(|s| {
                st.get(&s.subject.id).map(|x| SubjectStatsRow {
                    subject_id: s.subject.id.clone(),
                    stats: *x,
                })
            })
            .collect()
    });

    RankedResult {
        ranking_method: options.method,
        include_common_in_total: options.include_common_in_total,
        subjects: cohort.subjects.clone(),
        subject_stats,
        attendance: summary,
        rows,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn m(v: u8) -> MarkCell {
        MarkCell::Numeric(v)
    }

    /// Builds a cohort from (subject id, stream) pairs and (student id, marks in subject order).
    pub fn cohort(subjects: &[(&str, &str)], students: &[(&str, Vec<MarkCell>)]) -> Cohort {
        let subjects: Vec<Subject> = subjects
            .iter()
            .map(|(id, stream)| Subject {
                id: id.to_string(),
                name: id.to_uppercase(),
                code: id.to_string(),
                stream: stream.to_string(),
            })
            .collect();
        let entries = students
            .iter()
            .enumerate()
            .map(|(i, (id, marks))| StudentEntry {
                student: Student {
                    id: id.to_string(),
                    index_number: format!("{:04}", i + 1),
                    name: format!("Student {}", id),
                    class_name: None,
                },
                marks: subjects
                    .iter()
                    .zip(marks)
                    .map(|(s, c)| (s.id.clone(), *c))
                    .collect(),
            })
            .collect();
        Cohort::assemble(&subjects, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{cohort, m};
    use super::*;
    use serde_json::json;

    fn sample() -> Cohort {
        cohort(
            &[
                ("eng", "Common"),
                ("phy", "Science"),
                ("che", "Science"),
                ("bio", "Science"),
            ],
            &[
                ("s1", vec![m(50), m(60), m(55), m(70)]),
                ("s2", vec![m(90), m(90), m(80), m(75)]),
                ("s3", vec![m(70), m(70), MarkCell::Absent, m(60)]),
                ("s4", vec![m(40), m(85), m(90), m(75)]),
            ],
        )
    }

    #[test]
    fn missing_cells_are_synthesized_as_no_entry() {
        let subjects = vec![
            Subject {
                id: "phy".into(),
                name: "Physics".into(),
                code: "PHY".into(),
                stream: "Science".into(),
            },
            Subject {
                id: "eng".into(),
                name: "English".into(),
                code: "ENG".into(),
                stream: "Common".into(),
            },
        ];
        let mut marks = HashMap::new();
        marks.insert("eng".to_string(), m(61));
        marks.insert("ghost".to_string(), m(99));
        let c = Cohort::assemble(
            &subjects,
            vec![StudentEntry {
                student: Student {
                    id: "s1".into(),
                    index_number: "1".into(),
                    name: "One".into(),
                    class_name: None,
                },
                marks,
            }],
        );
        assert_eq!(c.students[0].marks, vec![MarkCell::NoEntry, m(61)]);
    }

    #[test]
    fn total_marks_ranking_with_common_included() {
        let result = rank_cohort(
            &sample(),
            &RankingOptions::default(),
            &AttendanceFeed::Records(vec![]),
        );
        let order: Vec<(u32, &str, f64)> = result
            .rows
            .iter()
            .map(|r| (r.rank, r.student.id.as_str(), r.total_marks))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, "s2", 335.0),
                (2, "s4", 290.0),
                (3, "s1", 235.0),
                (4, "s3", 200.0)
            ]
        );
        assert!(result.subject_stats.is_none());
        assert!(result.rows.iter().all(|r| r.z_score.is_none()));
    }

    #[test]
    fn excluding_common_subjects_changes_order() {
        let result = rank_cohort(
            &sample(),
            &RankingOptions {
                method: RankingMethod::TotalMarks,
                include_common_in_total: false,
            },
            &AttendanceFeed::Records(vec![]),
        );
        let order: Vec<(u32, &str)> = result
            .rows
            .iter()
            .map(|r| (r.rank, r.student.id.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "s4"), (2, "s2"), (3, "s1"), (4, "s3")]);
    }

    #[test]
    fn switching_method_reranks_without_touching_inputs() {
        let c = sample();
        let before = c.students.iter().map(|s| s.marks.clone()).collect::<Vec<_>>();
        let by_total = rank_cohort(&c, &RankingOptions::default(), &AttendanceFeed::Records(vec![]));
        let by_z = rank_cohort(
            &c,
            &RankingOptions {
                method: RankingMethod::ZScore,
                include_common_in_total: true,
            },
            &AttendanceFeed::Records(vec![]),
        );
        let after = c.students.iter().map(|s| s.marks.clone()).collect::<Vec<_>>();
        assert_eq!(before, after);

        assert_eq!(by_total.rows[0].student.id, "s2");
        assert_eq!(by_z.rows[0].student.id, "s4");
        // s3 has two numeric main marks, so it falls to the sentinel.
        let s3 = by_z.rows.iter().find(|r| r.student.id == "s3").expect("s3");
        assert_eq!(s3.z_score, Some(aggregate::NO_ZSCORE_SENTINEL));
        assert_eq!(by_z.rows.last().map(|r| r.student.id.as_str()), Some("s3"));
        assert!(by_z.subject_stats.is_some());
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let options = RankingOptions {
            method: RankingMethod::Average,
            include_common_in_total: true,
        };
        let a = rank_cohort(&sample(), &options, &AttendanceFeed::Records(vec![]));
        let b = rank_cohort(&sample(), &options, &AttendanceFeed::Records(vec![]));
        assert_eq!(a, b);
    }

    #[test]
    fn cells_keep_display_and_effective_forms() {
        let result = rank_cohort(&sample(), &RankingOptions::default(), &AttendanceFeed::Records(vec![]));
        let s3 = result.rows.iter().find(|r| r.student.id == "s3").expect("s3");
        let che = &s3.marks[2];
        assert_eq!(che.subject_id, "che");
        assert_eq!(che.state, "absent");
        assert_eq!(che.effective, 0.0);
        let v = serde_json::to_value(che).expect("serialize");
        assert_eq!(v["display"], json!("AB"));
    }

    #[test]
    fn attendance_fields_are_null_when_source_failed() {
        let result = rank_cohort(
            &sample(),
            &RankingOptions::default(),
            &AttendanceFeed::Unavailable {
                reason: "timeout".into(),
            },
        );
        let v = serde_json::to_value(&result.rows[0]).expect("serialize");
        assert_eq!(v["absentDays"], json!(null));
        assert_eq!(v["attendancePercentage"], json!(null));
        assert_eq!(v["totalSchoolDays"], json!(null));
        assert_eq!(result.attendance.status, attendance::AttendanceStatus::Unavailable);
    }

    #[test]
    fn top_includes_boundary_ties() {
        let c = cohort(
            &[("phy", "Science")],
            &[("a", vec![m(90)]), ("b", vec![m(90)]), ("c", vec![m(80)])],
        );
        let result = rank_cohort(&c, &RankingOptions::default(), &AttendanceFeed::Records(vec![]));
        let ranks: Vec<u32> = result.rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
        assert_eq!(result.top(1).len(), 2);
        assert_eq!(result.top(3).len(), 3);
        assert!(result.top(0).is_empty());
    }
}
