use serde::{Serialize, Serializer};
use thiserror::Error;

pub const MAX_MARK: u8 = 100;

/// Display token for an explicit absence.
pub const ABSENT_TOKEN: &str = "AB";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkCell {
    Numeric(u8),
    Absent,
    NoEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkDisplay {
    Value(u8),
    Absent,
    Blank,
}

impl Serialize for MarkDisplay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MarkDisplay::Value(v) => serializer.serialize_u8(*v),
            MarkDisplay::Absent => serializer.serialize_str(ABSENT_TOKEN),
            MarkDisplay::Blank => serializer.serialize_str(""),
        }
    }
}

impl MarkCell {
    /// Contribution to sums. Absent and NoEntry both count as 0.
    pub fn effective_value(self) -> f64 {
        match self {
            MarkCell::Numeric(v) => f64::from(v),
            MarkCell::Absent | MarkCell::NoEntry => 0.0,
        }
    }

    pub fn display(self) -> MarkDisplay {
        match self {
            MarkCell::Numeric(v) => MarkDisplay::Value(v),
            MarkCell::Absent => MarkDisplay::Absent,
            MarkCell::NoEntry => MarkDisplay::Blank,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, MarkCell::Numeric(_))
    }

    /// True when anything was recorded, including an absence.
    pub fn has_entry(self) -> bool {
        !matches!(self, MarkCell::NoEntry)
    }

    pub fn state_str(self) -> &'static str {
        match self {
            MarkCell::Numeric(_) => "numeric",
            MarkCell::Absent => "absent",
            MarkCell::NoEntry => "noEntry",
        }
    }

    pub fn to_storage(self) -> (Option<i64>, Option<&'static str>) {
        match self {
            MarkCell::Numeric(v) => (Some(i64::from(v)), None),
            MarkCell::Absent => (None, Some("absent")),
            MarkCell::NoEntry => (None, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarkInputError {
    #[error("mark {0} is outside 0..=100")]
    OutOfRange(f64),
    #[error("mark {0} is not a whole number")]
    NotWhole(f64),
    #[error("unrecognized mark value: {0}")]
    Unrecognized(String),
}

fn is_absence_token(s: &str) -> bool {
    let t = s.trim();
    t.eq_ignore_ascii_case("ab") || t.eq_ignore_ascii_case("abs") || t.eq_ignore_ascii_case("absent")
}

fn numeric_cell(v: f64) -> Result<MarkCell, MarkInputError> {
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(MarkInputError::NotWhole(v));
    }
    if !(0.0..=f64::from(MAX_MARK)).contains(&v) {
        return Err(MarkInputError::OutOfRange(v));
    }
    Ok(MarkCell::Numeric(v as u8))
}

/// Maps a raw mark cell plus an optional stored status flag to a `MarkCell`.
///
/// A status of `absent` wins over whatever value sits in the cell. Blank or
/// missing cells become `NoEntry`. Numbers must be whole and within 0..=100.
pub fn normalize_mark(
    raw: Option<&serde_json::Value>,
    status: Option<&str>,
) -> Result<MarkCell, MarkInputError> {
    if status.map(is_absence_token).unwrap_or(false) {
        return Ok(MarkCell::Absent);
    }
    let Some(raw) = raw else {
        return Ok(MarkCell::NoEntry);
    };
    match raw {
        serde_json::Value::Null => Ok(MarkCell::NoEntry),
        serde_json::Value::Number(n) => {
            let Some(v) = n.as_f64() else {
                return Err(MarkInputError::Unrecognized(n.to_string()));
            };
            numeric_cell(v)
        }
        serde_json::Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(MarkCell::NoEntry);
            }
            if is_absence_token(t) {
                return Ok(MarkCell::Absent);
            }
            match t.parse::<f64>() {
                Ok(v) => numeric_cell(v),
                Err(_) => Err(MarkInputError::Unrecognized(t.to_string())),
            }
        }
        other => Err(MarkInputError::Unrecognized(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_no_entry_share_effective_zero_but_not_display() {
        assert_eq!(MarkCell::Absent.effective_value(), 0.0);
        assert_eq!(MarkCell::NoEntry.effective_value(), 0.0);
        assert_ne!(MarkCell::Absent.display(), MarkCell::NoEntry.display());
        assert!(MarkCell::Absent.has_entry());
        assert!(!MarkCell::NoEntry.has_entry());
        assert!(!MarkCell::Absent.is_numeric());
    }

    #[test]
    fn display_serializes_to_distinct_json() {
        assert_eq!(serde_json::to_value(MarkCell::Numeric(0).display()).unwrap(), json!(0));
        assert_eq!(serde_json::to_value(MarkCell::Absent.display()).unwrap(), json!("AB"));
        assert_eq!(serde_json::to_value(MarkCell::NoEntry.display()).unwrap(), json!(""));
    }

    #[test]
    fn normalizes_numbers_tokens_and_blanks() {
        assert_eq!(normalize_mark(Some(&json!(75)), None), Ok(MarkCell::Numeric(75)));
        assert_eq!(normalize_mark(Some(&json!(0)), None), Ok(MarkCell::Numeric(0)));
        assert_eq!(normalize_mark(Some(&json!("88")), None), Ok(MarkCell::Numeric(88)));
        assert_eq!(normalize_mark(Some(&json!("ab")), None), Ok(MarkCell::Absent));
        assert_eq!(normalize_mark(Some(&json!("Absent")), None), Ok(MarkCell::Absent));
        assert_eq!(normalize_mark(Some(&json!("  ")), None), Ok(MarkCell::NoEntry));
        assert_eq!(normalize_mark(Some(&json!(null)), None), Ok(MarkCell::NoEntry));
        assert_eq!(normalize_mark(None, None), Ok(MarkCell::NoEntry));
    }

    #[test]
    fn absent_status_overrides_value() {
        assert_eq!(normalize_mark(Some(&json!(64)), Some("absent")), Ok(MarkCell::Absent));
        assert_eq!(normalize_mark(None, Some("AB")), Ok(MarkCell::Absent));
        assert_eq!(normalize_mark(Some(&json!(64)), Some("present")), Ok(MarkCell::Numeric(64)));
    }

    #[test]
    fn rejects_out_of_range_and_fractional() {
        assert_eq!(
            normalize_mark(Some(&json!(101)), None),
            Err(MarkInputError::OutOfRange(101.0))
        );
        assert_eq!(
            normalize_mark(Some(&json!(-1)), None),
            Err(MarkInputError::OutOfRange(-1.0))
        );
        assert_eq!(
            normalize_mark(Some(&json!(72.5)), None),
            Err(MarkInputError::NotWhole(72.5))
        );
        assert!(matches!(
            normalize_mark(Some(&json!("seventy")), None),
            Err(MarkInputError::Unrecognized(_))
        ));
        assert!(matches!(
            normalize_mark(Some(&json!([1])), None),
            Err(MarkInputError::Unrecognized(_))
        ));
    }

    #[test]
    fn storage_form_keeps_states_apart() {
        assert_eq!(MarkCell::Numeric(50).to_storage(), (Some(50), None));
        assert_eq!(MarkCell::Absent.to_storage(), (None, Some("absent")));
        assert_eq!(MarkCell::NoEntry.to_storage(), (None, None));
    }
}
