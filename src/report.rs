use crate::ranking::{
    self, attendance::AttendanceStatus, normalize_mark, AttendanceFeed, AttendanceRecord, Cohort,
    MarkInputError, RankedResult, RankingOptions, Student, StudentEntry, Subject,
};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("missing selection: {0}")]
    MissingSelection(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("failed to load {what}: {source}")]
    UpstreamFetch {
        what: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("stored mark for student {student_id} in subject {subject_id} is invalid: {source}")]
    InvalidStoredMark {
        student_id: String,
        subject_id: String,
        #[source]
        source: MarkInputError,
    },
}

impl ReportError {
    pub fn code(&self) -> &'static str {
        match self {
            ReportError::MissingSelection(_) => "missing_selection",
            ReportError::NotFound(_) => "not_found",
            ReportError::UpstreamFetch { .. } | ReportError::InvalidStoredMark { .. } => {
                "upstream_fetch_failed"
            }
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ReportError::MissingSelection(field) => Some(json!({ "field": field })),
            ReportError::InvalidStoredMark {
                student_id,
                subject_id,
                ..
            } => Some(json!({ "studentId": student_id, "subjectId": subject_id })),
            ReportError::NotFound(_) | ReportError::UpstreamFetch { .. } => None,
        }
    }
}

fn fetch_err(what: &'static str) -> impl Fn(rusqlite::Error) -> ReportError {
    move |source| ReportError::UpstreamFetch { what, source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportScope {
    Class,
    Term,
}

impl ReportScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Some(Self::Class),
            "term" => Some(Self::Term),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Term => "term",
        }
    }
}

/// What the caller picked. Blank ids count as missing.
#[derive(Debug, Clone, Default)]
pub struct ReportSelection {
    pub term_id: Option<String>,
    pub class_id: Option<String>,
    pub scope: Option<ReportScope>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelection {
    pub term_id: String,
    pub class_id: Option<String>,
    pub scope: ReportScope,
}

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ReportSelection {
    pub fn resolve(&self) -> Result<ResolvedSelection, ReportError> {
        let term_id = non_blank(&self.term_id).ok_or(ReportError::MissingSelection("termId"))?;
        let class_id = non_blank(&self.class_id);
        let scope = self.scope.unwrap_or(if class_id.is_some() {
            ReportScope::Class
        } else {
            ReportScope::Term
        });
        match scope {
            ReportScope::Class => {
                let class_id = class_id.ok_or(ReportError::MissingSelection("classId"))?;
                Ok(ResolvedSelection {
                    term_id,
                    class_id: Some(class_id),
                    scope,
                })
            }
            ReportScope::Term => Ok(ResolvedSelection {
                term_id,
                class_id: None,
                scope,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct TermCohort {
    pub term: TermSummary,
    pub class: Option<ClassSummary>,
    pub cohort: Cohort,
}

pub fn fetch_cohort(conn: &Connection, sel: &ResolvedSelection) -> Result<TermCohort, ReportError> {
    let term_name: Option<String> = conn
        .query_row("SELECT name FROM terms WHERE id = ?", [&sel.term_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(fetch_err("term"))?;
    let Some(term_name) = term_name else {
        return Err(ReportError::NotFound("term"));
    };

    let class = match sel.class_id.as_deref() {
        None => None,
        Some(class_id) => {
            let name: Option<String> = conn
                .query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
                    r.get(0)
                })
                .optional()
                .map_err(fetch_err("class"))?;
            let Some(name) = name else {
                return Err(ReportError::NotFound("class"));
            };
            Some(ClassSummary {
                id: class_id.to_string(),
                name,
            })
        }
    };

    let class_filter = sel.class_id.as_deref();

    let mut students_stmt = conn
        .prepare(
            "SELECT s.id, s.index_number, s.name, c.name
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE (?2 IS NULL OR s.class_id = ?2)
               AND EXISTS(SELECT 1 FROM marks m WHERE m.term_id = ?1 AND m.student_id = s.id)
             ORDER BY c.name, s.index_number, s.id",
        )
        .map_err(fetch_err("students"))?;
    let students: Vec<Student> = students_stmt
        .query_map((&sel.term_id, class_filter), |r| {
            Ok(Student {
                id: r.get(0)?,
                index_number: r.get(1)?,
                name: r.get(2)?,
                class_name: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(fetch_err("students"))?;

    let mut subjects_stmt = conn
        .prepare(
            "SELECT DISTINCT sub.id, sub.name, sub.code, sub.stream, sub.sort_order
             FROM subjects sub
             JOIN marks m ON m.subject_id = sub.id
             JOIN students s ON s.id = m.student_id
             WHERE m.term_id = ?1 AND (?2 IS NULL OR s.class_id = ?2)
             ORDER BY sub.sort_order, sub.code, sub.id",
        )
        .map_err(fetch_err("subjects"))?;
    let subjects: Vec<Subject> = subjects_stmt
        .query_map((&sel.term_id, class_filter), |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
                stream: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(fetch_err("subjects"))?;

    let mut marks_stmt = conn
        .prepare(
            "SELECT m.student_id, m.subject_id, m.raw_value, m.status
             FROM marks m
             JOIN students s ON s.id = m.student_id
             WHERE m.term_id = ?1 AND (?2 IS NULL OR s.class_id = ?2)",
        )
        .map_err(fetch_err("marks"))?;
    let rows = marks_stmt
        .query_map((&sel.term_id, class_filter), |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let raw_value: Option<i64> = r.get(2)?;
            let status: Option<String> = r.get(3)?;
            Ok((student_id, subject_id, raw_value, status))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(fetch_err("marks"))?;

    let mut marks_by_student: HashMap<String, HashMap<String, ranking::MarkCell>> = HashMap::new();
    for (student_id, subject_id, raw_value, status) in rows {
        let raw = raw_value.map(serde_json::Value::from);
        let cell = normalize_mark(raw.as_ref(), status.as_deref()).map_err(|source| {
            ReportError::InvalidStoredMark {
                student_id: student_id.clone(),
                subject_id: subject_id.clone(),
                source,
            }
        })?;
        marks_by_student
            .entry(student_id)
            .or_default()
            .insert(subject_id, cell);
    }

    let entries = students
        .into_iter()
        .map(|student| {
            let marks = marks_by_student.remove(&student.id).unwrap_or_default();
            StudentEntry { student, marks }
        })
        .collect();

    Ok(TermCohort {
        term: TermSummary {
            id: sel.term_id.clone(),
            name: term_name,
        },
        class,
        cohort: Cohort::assemble(&subjects, entries),
    })
}

fn coerce_sql_f64(v: Value) -> Option<f64> {
    match v {
        Value::Integer(n) => Some(n as f64),
        Value::Real(x) if x.is_finite() => Some(x),
        Value::Text(s) => ranking::attendance::coerce_f64(&serde_json::Value::String(s)),
        _ => None,
    }
}

fn coerce_sql_i64(v: Value) -> Option<i64> {
    match v {
        Value::Integer(n) => Some(n),
        Value::Real(x) if x.is_finite() && x.fract() == 0.0 => Some(x as i64),
        Value::Text(s) => ranking::attendance::coerce_days(&serde_json::Value::String(s)),
        _ => None,
    }
}

/// Loads attendance for the term. Never fails: a broken source degrades to `Unavailable`.
pub fn fetch_attendance(conn: &Connection, sel: &ResolvedSelection) -> AttendanceFeed {
    let load = || -> rusqlite::Result<Vec<AttendanceRecord>> {
        let mut stmt = conn.prepare(
            "SELECT student_id, absent_days, total_school_days, attendance_percentage
             FROM term_attendance
             WHERE term_id = ?",
        )?;
        let rows = stmt
            .query_map([&sel.term_id], |r| {
                Ok(AttendanceRecord {
                    student_id: r.get(0)?,
                    absent_days: coerce_sql_i64(r.get::<_, Value>(1)?),
                    total_school_days: coerce_sql_i64(r.get::<_, Value>(2)?),
                    attendance_percentage: coerce_sql_f64(r.get::<_, Value>(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    };
    match load() {
        Ok(records) => AttendanceFeed::Records(records),
        Err(e) => {
            tracing::warn!(term = %sel.term_id, error = %e, "attendance unavailable");
            AttendanceFeed::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermReport {
    pub term: TermSummary,
    pub class: Option<ClassSummary>,
    pub scope: ReportScope,
    #[serde(flatten)]
    pub result: RankedResult,
}

/// Fetches both sources, waits for both, then runs the engine.
///
/// A failed marks fetch aborts with no rows. Attendance problems only null the
/// attendance fields.
pub fn generate_report(
    conn: &Connection,
    selection: &ReportSelection,
    options: &RankingOptions,
) -> Result<TermReport, ReportError> {
    let sel = selection.resolve()?;

    let cohort = fetch_cohort(conn, &sel);
    let attendance = fetch_attendance(conn, &sel);
    let cohort = cohort?;

    let result = ranking::rank_cohort(&cohort.cohort, options, &attendance);
    if result.attendance.status != AttendanceStatus::Loaded {
        tracing::warn!(
            term = %sel.term_id,
            missing = result.attendance.missing,
            "attendance degraded for report"
        );
    }
    tracing::info!(
        term = %sel.term_id,
        scope = sel.scope.as_str(),
        method = options.method.as_str(),
        students = result.rows.len(),
        subjects = result.subjects.len(),
        "ranking report generated"
    );

    Ok(TermReport {
        term: cohort.term,
        class: cohort.class,
        scope: sel.scope,
        result,
    })
}
