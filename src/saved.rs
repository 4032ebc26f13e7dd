use crate::ranking::RankedStudent;
use crate::report::TermReport;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedReportMeta {
    pub id: String,
    pub title: String,
    pub term_id: String,
    pub class_id: Option<String>,
    pub scope: String,
    pub ranking_method: String,
    pub include_common_in_total: bool,
    pub row_count: i64,
    pub digest: String,
    pub created_at: String,
}

pub fn rows_digest(rows: &[RankedStudent]) -> anyhow::Result<String> {
    let bytes = serde_json::to_vec(rows).context("failed to serialize ranked rows")?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn save_report(
    conn: &Connection,
    title: &str,
    report: &TermReport,
) -> anyhow::Result<SavedReportMeta> {
    let meta = SavedReportMeta {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        term_id: report.term.id.clone(),
        class_id: report.class.as_ref().map(|c| c.id.clone()),
        scope: report.scope.as_str().to_string(),
        ranking_method: report.result.ranking_method.as_str().to_string(),
        include_common_in_total: report.result.include_common_in_total,
        row_count: report.result.rows.len() as i64,
        digest: rows_digest(&report.result.rows)?,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    let payload = serde_json::to_string(report).context("failed to serialize report")?;
    conn.execute(
        "INSERT INTO saved_reports(
            id, title, term_id, class_id, scope, ranking_method, include_common,
            row_count, digest, created_at, payload_json
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            meta.id,
            meta.title,
            meta.term_id,
            meta.class_id,
            meta.scope,
            meta.ranking_method,
            meta.include_common_in_total as i64,
            meta.row_count,
            meta.digest,
            meta.created_at,
            payload,
        ],
    )?;
    tracing::info!(report = %meta.id, term = %meta.term_id, rows = meta.row_count, "report snapshot saved");
    Ok(meta)
}

const META_COLUMNS: &str = "id, title, term_id, class_id, scope, ranking_method, include_common,
     row_count, digest, created_at";

fn meta_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SavedReportMeta> {
    Ok(SavedReportMeta {
        id: r.get(0)?,
        title: r.get(1)?,
        term_id: r.get(2)?,
        class_id: r.get(3)?,
        scope: r.get(4)?,
        ranking_method: r.get(5)?,
        include_common_in_total: r.get::<_, i64>(6)? != 0,
        row_count: r.get(7)?,
        digest: r.get(8)?,
        created_at: r.get(9)?,
    })
}

pub fn list_saved(conn: &Connection, term_id: Option<&str>) -> anyhow::Result<Vec<SavedReportMeta>> {
    let sql = format!(
        "SELECT {} FROM saved_reports
         WHERE (?1 IS NULL OR term_id = ?1)
         ORDER BY created_at DESC, rowid DESC",
        META_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([term_id], meta_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn open_saved(
    conn: &Connection,
    id: &str,
) -> anyhow::Result<Option<(SavedReportMeta, serde_json::Value)>> {
    let sql = format!(
        "SELECT {}, payload_json FROM saved_reports WHERE id = ?",
        META_COLUMNS
    );
    let row = conn
        .query_row(&sql, [id], |r| {
            let meta = meta_from_row(r)?;
            let payload: String = r.get(10)?;
            Ok((meta, payload))
        })
        .optional()?;
    let Some((meta, payload)) = row else {
        return Ok(None);
    };
    let payload: serde_json::Value =
        serde_json::from_str(&payload).context("stored report payload is not valid JSON")?;
    Ok(Some((meta, payload)))
}

pub fn delete_saved(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM saved_reports WHERE id = ?", [id])?;
    Ok(n > 0)
}
