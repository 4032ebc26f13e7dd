use super::setup::{self, RankingDefaults};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ranking::{
    self, normalize_mark, AttendanceFeed, Cohort, RankingMethod, RankingOptions, Student,
    StudentEntry, Subject,
};
use crate::report::{self, ReportError, ReportScope, ReportSelection};
use crate::saved;
use serde_json::json;
use std::collections::HashMap;

fn report_err(req: &Request, e: ReportError) -> serde_json::Value {
    tracing::warn!(method = %req.method, error = %e, "report generation failed");
    err(&req.id, e.code(), e.to_string(), e.details())
}

fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    optional_str(req, key)
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_options(
    req: &Request,
    defaults: &RankingDefaults,
) -> Result<RankingOptions, serde_json::Value> {
    let method = match req.params.get("rankingMethod") {
        None => defaults.method,
        Some(v) if v.is_null() => defaults.method,
        Some(v) => v.as_str().and_then(RankingMethod::parse).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "rankingMethod must be one of: totalMarks, average, zscore",
                Some(json!({ "rankingMethod": v })),
            )
        })?,
    };
    let include_common_in_total = match req.params.get("includeCommonInTotal") {
        None => defaults.include_common_in_total,
        Some(v) if v.is_null() => defaults.include_common_in_total,
        Some(v) => v.as_bool().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "includeCommonInTotal must be boolean",
                None,
            )
        })?,
    };
    Ok(RankingOptions {
        method,
        include_common_in_total,
    })
}

/// `topN: true` takes the configured default count.
fn parse_top_n(req: &Request, defaults: &RankingDefaults) -> Result<Option<u32>, serde_json::Value> {
    match req.params.get("topN") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(serde_json::Value::Bool(true)) => Ok(Some(defaults.top_count)),
        Some(serde_json::Value::Bool(false)) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) if (1..=u64::from(u32::MAX)).contains(&n) => Ok(Some(n as u32)),
            _ => Err(err(
                &req.id,
                "bad_params",
                "topN must be a positive integer or boolean",
                Some(json!({ "topN": v })),
            )),
        },
    }
}

fn parse_selection(req: &Request) -> Result<ReportSelection, serde_json::Value> {
    let scope = match optional_str(req, "scope") {
        None => None,
        Some(s) => Some(ReportScope::parse(s).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "scope must be one of: class, term",
                Some(json!({ "scope": s })),
            )
        })?),
    };
    Ok(ReportSelection {
        term_id: optional_str(req, "termId").map(str::to_string),
        class_id: optional_str(req, "classId").map(str::to_string),
        scope,
    })
}

fn render_result<T: serde::Serialize>(
    req: &Request,
    value: &T,
    result: &ranking::RankedResult,
    top_n: Option<u32>,
) -> serde_json::Value {
    let mut out = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    out["totalRows"] = json!(result.rows.len());
    if let Some(n) = top_n {
        out["rows"] = json!(result.top(n));
        out["topN"] = json!(n);
    }
    if let Some(g) = req.params.get("generationId") {
        out["generationId"] = g.clone();
    }
    ok(&req.id, out)
}

fn parse_inline_student(
    req: &Request,
    index: usize,
    raw: &serde_json::Value,
) -> Result<StudentEntry, serde_json::Value> {
    let bad = |message: String| {
        err(
            &req.id,
            "bad_params",
            message,
            Some(json!({ "studentIndex": index })),
        )
    };
    let student: Student = serde_json::from_value(raw.clone())
        .map_err(|e| bad(format!("invalid student: {}", e)))?;

    let mut marks = HashMap::new();
    match raw.get("marks") {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::Object(map)) => {
            for (subject_id, v) in map {
                let cell = normalize_mark(Some(v), None)
                    .map_err(|e| bad(format!("{} ({})", e, subject_id)))?;
                marks.insert(subject_id.clone(), cell);
            }
        }
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                let Some(subject_id) = item.get("subjectId").and_then(|v| v.as_str()) else {
                    return Err(bad("mark entries need subjectId".to_string()));
                };
                let status = item.get("status").and_then(|v| v.as_str());
                let cell = normalize_mark(item.get("value"), status)
                    .map_err(|e| bad(format!("{} ({})", e, subject_id)))?;
                marks.insert(subject_id.to_string(), cell);
            }
        }
        Some(_) => return Err(bad("marks must be an object or array".to_string())),
    }
    Ok(StudentEntry { student, marks })
}

fn handle_rank_cohort(state: &mut AppState, req: &Request) -> serde_json::Value {
    let defaults = match state.db.as_ref() {
        Some(conn) => match setup::ranking_defaults(conn) {
            Ok(d) => d,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => RankingDefaults {
            method: RankingMethod::default(),
            include_common_in_total: true,
            top_count: 10,
        },
    };
    let options = match parse_options(req, &defaults) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    let top_n = match parse_top_n(req, &defaults) {
        Ok(n) => n,
        Err(resp) => return resp,
    };

    let subjects: Vec<Subject> = match req.params.get("subjects") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(s) => s,
            Err(e) => {
                return err(&req.id, "bad_params", format!("invalid subjects: {}", e), None)
            }
        },
        None => return err(&req.id, "bad_params", "missing subjects", None),
    };
    let Some(raw_students) = req.params.get("students").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "students must be an array", None);
    };
    let mut entries = Vec::with_capacity(raw_students.len());
    for (i, raw) in raw_students.iter().enumerate() {
        match parse_inline_student(req, i, raw) {
            Ok(e) => entries.push(e),
            Err(resp) => return resp,
        }
    }

    let attendance = AttendanceFeed::from_json(req.params.get("attendance"));
    let cohort = Cohort::assemble(&subjects, entries);
    let result = ranking::rank_cohort(&cohort, &options, &attendance);
    render_result(req, &result, &result, top_n)
}

fn generate(
    state: &AppState,
    req: &Request,
) -> Result<(report::TermReport, Option<u32>), serde_json::Value> {
    let conn = state.require_db(req)?;
    let defaults = setup::ranking_defaults(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let options = parse_options(req, &defaults)?;
    let top_n = parse_top_n(req, &defaults)?;
    let selection = parse_selection(req)?;
    let report = report::generate_report(conn, &selection, &options).map_err(|e| report_err(req, e))?;
    Ok((report, top_n))
}

fn handle_term_ranking_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    match generate(state, req) {
        Ok((report, top_n)) => render_result(req, &report, &report.result, top_n),
        Err(resp) => resp,
    }
}

fn handle_save_ranking(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (report, _) = match generate(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let title = optional_str(req, "title")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match &report.class {
            Some(c) => format!("{} - {}", report.term.name, c.name),
            None => report.term.name.clone(),
        });
    match saved::save_report(conn, &title, &report) {
        Ok(meta) => ok(&req.id, json!({ "report": meta })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_saved_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match saved::list_saved(conn, optional_str(req, "termId")) {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_saved_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match saved::open_saved(conn, &report_id) {
        Ok(Some((meta, payload))) => ok(&req.id, json!({ "report": meta, "payload": payload })),
        Ok(None) => err(&req.id, "not_found", "saved report not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_saved_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match saved::delete_saved(conn, &report_id) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => err(&req.id, "not_found", "saved report not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.rankCohort" => Some(handle_rank_cohort(state, req)),
        "reports.termRankingModel" => Some(handle_term_ranking_model(state, req)),
        "reports.saveRanking" => Some(handle_save_ranking(state, req)),
        "reports.savedList" => Some(handle_saved_list(state, req)),
        "reports.savedOpen" => Some(handle_saved_open(state, req)),
        "reports.savedDelete" => Some(handle_saved_delete(state, req)),
        _ => None,
    }
}
