use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub absent_days: Option<i64>,
    pub total_school_days: Option<i64>,
    pub attendance_percentage: Option<f64>,
}

/// Attendance as handed to the merger. `Unavailable` covers a failed or malformed source.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceFeed {
    Records(Vec<AttendanceRecord>),
    Unavailable { reason: String },
}

/// The three attendance fields on a ranked row. `None` means no data, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceFields {
    pub absent_days: Option<i64>,
    pub total_school_days: Option<i64>,
    pub attendance_percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    Loaded,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub status: AttendanceStatus,
    pub matched: usize,
    pub missing: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn coerce_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
        serde_json::Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite()),
        _ => None,
    }
}

pub fn coerce_days(v: &serde_json::Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    coerce_f64(v).filter(|x| x.fract() == 0.0).map(|x| x as i64)
}

fn field<'a>(
    obj: &'a serde_json::Map<String, serde_json::Value>,
    camel: &str,
    snake: &str,
) -> Option<&'a serde_json::Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

impl AttendanceFeed {
    /// Reads a caller-supplied attendance payload. Anything but an array is malformed.
    pub fn from_json(value: Option<&serde_json::Value>) -> Self {
        let Some(value) = value else {
            return AttendanceFeed::Unavailable {
                reason: "missing".to_string(),
            };
        };
        let Some(items) = value.as_array() else {
            return AttendanceFeed::Unavailable {
                reason: "malformed".to_string(),
            };
        };
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let Some(obj) = item.as_object() else {
                tracing::debug!("skipping non-object attendance entry");
                continue;
            };
            let student_id = match field(obj, "studentId", "student_id") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => {
                    tracing::debug!("skipping attendance entry without student id");
                    continue;
                }
            };
            records.push(AttendanceRecord {
                student_id,
                absent_days: field(obj, "absentDays", "absent_days").and_then(coerce_days),
                total_school_days: field(obj, "totalSchoolDays", "total_school_days")
                    .and_then(coerce_days),
                attendance_percentage: field(obj, "attendancePercentage", "attendance_percentage")
                    .and_then(coerce_f64),
            });
        }
        AttendanceFeed::Records(records)
    }
}

/// Looks up attendance for each student id in order. First record per student wins.
pub fn merge_attendance<'a, I>(
    student_ids: I,
    feed: &AttendanceFeed,
) -> (Vec<AttendanceFields>, AttendanceSummary)
where
    I: IntoIterator<Item = &'a str>,
{
    let records = match feed {
        AttendanceFeed::Records(records) => records,
        AttendanceFeed::Unavailable { reason } => {
            let fields: Vec<AttendanceFields> = student_ids
                .into_iter()
                .map(|_| AttendanceFields::default())
                .collect();
            let missing = fields.len();
            return (
                fields,
                AttendanceSummary {
                    status: AttendanceStatus::Unavailable,
                    matched: 0,
                    missing,
                    reason: Some(reason.clone()),
                },
            );
        }
    };

    let mut by_student: HashMap<&str, &AttendanceRecord> = HashMap::with_capacity(records.len());
    for r in records {
        by_student.entry(r.student_id.as_str()).or_insert(r);
    }

    let mut matched = 0_usize;
    let mut missing = 0_usize;
    let fields = student_ids
        .into_iter()
        .map(|id| match by_student.get(id) {
            Some(r) => {
                matched += 1;
                AttendanceFields {
                    absent_days: r.absent_days,
                    total_school_days: r.total_school_days,
                    attendance_percentage: r.attendance_percentage,
                }
            }
            None => {
                missing += 1;
                AttendanceFields::default()
            }
        })
        .collect();

    let status = if missing == 0 {
        AttendanceStatus::Loaded
    } else {
        AttendanceStatus::Degraded
    };
    (
        fields,
        AttendanceSummary {
            status,
            matched,
            missing,
            reason: None,
        },
    )
}
