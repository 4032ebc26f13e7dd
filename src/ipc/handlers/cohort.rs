use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ranking::{normalize_mark, MarkCell};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

const IMPORT_MAX_MARKS: usize = 50_000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn bad_params(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details,
        }
    }

    fn db_update(e: rusqlite::Error) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassIn {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TermIn {
    id: String,
    name: String,
    #[serde(default)]
    sort_order: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectIn {
    id: String,
    name: String,
    #[serde(default)]
    code: String,
    stream: String,
    #[serde(default)]
    sort_order: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentIn {
    id: String,
    class_id: String,
    index_number: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkIn {
    term_id: String,
    student_id: String,
    subject_id: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceIn {
    term_id: String,
    student_id: String,
    #[serde(default)]
    absent_days: Option<i64>,
    #[serde(default)]
    total_school_days: Option<i64>,
    #[serde(default)]
    attendance_percentage: Option<serde_json::Value>,
}

fn parse_list<T: DeserializeOwned>(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<T>, HandlerErr> {
    match params.get(key) {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", key, e), None)),
    }
}

fn percentage_sql(v: Option<&serde_json::Value>) -> Result<rusqlite::types::Value, HandlerErr> {
    use rusqlite::types::Value;
    match v {
        None | Some(serde_json::Value::Null) => Ok(Value::Null),
        Some(serde_json::Value::Number(n)) => Ok(n
            .as_f64()
            .map(Value::Real)
            .unwrap_or(Value::Null)),
        Some(serde_json::Value::String(s)) => Ok(Value::Text(s.clone())),
        Some(other) => Err(HandlerErr::bad_params(
            "attendancePercentage must be number, string or null",
            Some(json!({ "attendancePercentage": other })),
        )),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ImportCounts {
    classes: usize,
    terms: usize,
    subjects: usize,
    students: usize,
    marks: usize,
    attendance: usize,
}

fn cohort_import(conn: &Connection, params: &serde_json::Value) -> Result<ImportCounts, HandlerErr> {
    let classes: Vec<ClassIn> = parse_list(params, "classes")?;
    let terms: Vec<TermIn> = parse_list(params, "terms")?;
    let subjects: Vec<SubjectIn> = parse_list(params, "subjects")?;
    let students: Vec<StudentIn> = parse_list(params, "students")?;
    let marks: Vec<MarkIn> = parse_list(params, "marks")?;
    let attendance: Vec<AttendanceIn> = parse_list(params, "attendance")?;

    if marks.len() > IMPORT_MAX_MARKS {
        return Err(HandlerErr::bad_params(
            format!("too many marks (max {})", IMPORT_MAX_MARKS),
            Some(json!({ "count": marks.len() })),
        ));
    }

    // Validate every mark before touching the database.
    let mut cells: Vec<MarkCell> = Vec::with_capacity(marks.len());
    for (index, m) in marks.iter().enumerate() {
        let cell = normalize_mark(m.value.as_ref(), m.status.as_deref()).map_err(|e| {
            HandlerErr::bad_params(
                e.to_string(),
                Some(json!({
                    "index": index,
                    "studentId": m.student_id,
                    "subjectId": m.subject_id,
                    "termId": m.term_id,
                })),
            )
        })?;
        cells.push(cell);
    }
    let mut percentages = Vec::with_capacity(attendance.len());
    for a in &attendance {
        percentages.push(percentage_sql(a.attendance_percentage.as_ref())?);
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_update)?;
    for c in &classes {
        tx.execute(
            "INSERT INTO classes(id, name) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            (&c.id, &c.name),
        )
        .map_err(HandlerErr::db_update)?;
    }
    for t in &terms {
        tx.execute(
            "INSERT INTO terms(id, name, sort_order) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, sort_order = excluded.sort_order",
            (&t.id, &t.name, t.sort_order),
        )
        .map_err(HandlerErr::db_update)?;
    }
    for s in &subjects {
        tx.execute(
            "INSERT INTO subjects(id, name, code, stream, sort_order) VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                code = excluded.code,
                stream = excluded.stream,
                sort_order = excluded.sort_order",
            (&s.id, &s.name, &s.code, &s.stream, s.sort_order),
        )
        .map_err(HandlerErr::db_update)?;
    }
    for s in &students {
        tx.execute(
            "INSERT INTO students(id, class_id, index_number, name) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                class_id = excluded.class_id,
                index_number = excluded.index_number,
                name = excluded.name",
            (&s.id, &s.class_id, &s.index_number, &s.name),
        )
        .map_err(HandlerErr::db_update)?;
    }
    for (m, cell) in marks.iter().zip(&cells) {
        let (raw_value, status) = cell.to_storage();
        tx.execute(
            "INSERT INTO marks(term_id, student_id, subject_id, raw_value, status)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(term_id, student_id, subject_id) DO UPDATE SET
                raw_value = excluded.raw_value,
                status = excluded.status",
            (&m.term_id, &m.student_id, &m.subject_id, raw_value, status),
        )
        .map_err(HandlerErr::db_update)?;
    }
    for (a, pct) in attendance.iter().zip(percentages) {
        tx.execute(
            "INSERT INTO term_attendance(term_id, student_id, absent_days, total_school_days, attendance_percentage)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(term_id, student_id) DO UPDATE SET
                absent_days = excluded.absent_days,
                total_school_days = excluded.total_school_days,
                attendance_percentage = excluded.attendance_percentage",
            (&a.term_id, &a.student_id, a.absent_days, a.total_school_days, pct),
        )
        .map_err(HandlerErr::db_update)?;
    }
    tx.commit().map_err(HandlerErr::db_update)?;

    let counts = ImportCounts {
        classes: classes.len(),
        terms: terms.len(),
        subjects: subjects.len(),
        students: students.len(),
        marks: marks.len(),
        attendance: attendance.len(),
    };
    tracing::info!(
        students = counts.students,
        marks = counts.marks,
        numeric = cells.iter().filter(|c| c.is_numeric()).count(),
        blank = cells.iter().filter(|c| !c.has_entry()).count(),
        attendance = counts.attendance,
        "cohort data imported"
    );
    Ok(counts)
}

fn handle_cohort_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match cohort_import(conn, &req.params) {
        Ok(c) => ok(
            &req.id,
            json!({
                "imported": {
                    "classes": c.classes,
                    "terms": c.terms,
                    "subjects": c.subjects,
                    "students": c.students,
                    "marks": c.marks,
                    "attendance": c.attendance,
                }
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cohort.import" => Some(handle_cohort_import(state, req)),
        _ => None,
    }
}
