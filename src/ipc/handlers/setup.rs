use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ranking::RankingMethod;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Ranking,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ranking" => Some(Self::Ranking),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Ranking => "setup.ranking",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Ranking => json!({
            "defaultRankingMethod": "totalMarks",
            "includeCommonInTotal": true,
            "defaultTopCount": 10
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_field(
    section: SetupSection,
    obj: &mut Map<String, Value>,
    k: &str,
    v: &Value,
) -> Result<(), String> {
    match section {
        SetupSection::Ranking => match k {
            "defaultRankingMethod" => {
                let method = v
                    .as_str()
                    .and_then(RankingMethod::parse)
                    .ok_or_else(|| {
                        "defaultRankingMethod must be one of: totalMarks, average, zscore"
                            .to_string()
                    })?;
                obj.insert(k.to_string(), Value::String(method.as_str().to_string()));
            }
            "includeCommonInTotal" => {
                obj.insert(k.to_string(), Value::Bool(parse_bool(v, k)?));
            }
            "defaultTopCount" => {
                obj.insert(k.to_string(), Value::from(parse_i64_range(v, k, 1, 500)?));
            }
            _ => return Err(format!("unknown ranking field: {}", k)),
        },
    }
    Ok(())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        merge_field(section, obj, k, v)?;
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            let obj = as_object_mut(&mut current).map_err(anyhow::Error::msg)?;
            for (k, v) in saved_obj {
                // Field-by-field so one bad stored value keeps the rest.
                if let Err(e) = merge_field(section, obj, k, v) {
                    tracing::debug!(field = %k, error = %e, "ignoring stored setting");
                }
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingDefaults {
    pub method: RankingMethod,
    pub include_common_in_total: bool,
    pub top_count: u32,
}

pub fn ranking_defaults(conn: &rusqlite::Connection) -> anyhow::Result<RankingDefaults> {
    let v = load_section(conn, SetupSection::Ranking)?;
    Ok(RankingDefaults {
        method: v
            .get("defaultRankingMethod")
            .and_then(|m| m.as_str())
            .and_then(RankingMethod::parse)
            .unwrap_or_default(),
        include_common_in_total: v
            .get("includeCommonInTotal")
            .and_then(|b| b.as_bool())
            .unwrap_or(true),
        top_count: v
            .get("defaultTopCount")
            .and_then(|n| n.as_u64())
            .map(|n| n as u32)
            .unwrap_or(10),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let ranking = match load_section(conn, SetupSection::Ranking) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "ranking": ranking }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_values_apply_field_by_field() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        db::settings_set_json(
            &conn,
            "setup.ranking",
            &json!({ "defaultRankingMethod": "zscore", "defaultTopCount": "lots" }),
        )
        .expect("seed");
        let d = ranking_defaults(&conn).expect("defaults");
        assert_eq!(d.method, RankingMethod::ZScore);
        assert_eq!(d.top_count, 10);
        assert!(d.include_common_in_total);

        db::settings_set_json(&conn, "setup.ranking", &json!({ "defaultRankingMethod": "z-score" }))
            .expect("seed alias");
        let d = ranking_defaults(&conn).expect("defaults");
        assert_eq!(d.method, RankingMethod::TotalMarks);
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let mut current = default_section(SetupSection::Ranking);
        let patch = json!({ "divisor": 4 });
        let e = merge_section_patch(
            SetupSection::Ranking,
            &mut current,
            patch.as_object().expect("object"),
        )
        .expect_err("unknown field");
        assert!(e.contains("divisor"));
    }
}
