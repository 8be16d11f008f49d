//! Typed cell values and the locale-invariant text forms they travel in.
//!
//! Every cell that flows through the encoder, the sentence parser, and the
//! predicate builder is a [`CellValue`]. [`CellValue::render`] produces the
//! canonical text used inside row sentences; [`CellValue::from_text`] is
//! the generic coercion applied when reading that text back.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Serialize, Serializer};

/// Literal written for an absent value and recognised when parsing.
pub const NULL_LITERAL: &str = "NULL";

/// Largest magnitude for which an integral `f64` is rendered without a
/// fractional part through an `i64` conversion.
const INTEGRAL_RENDER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
    Null,
}

impl CellValue {
    /// Canonical, culture-invariant text form.
    ///
    /// Integral numbers carry no fractional part, booleans are lowercase,
    /// dates are ISO-8601 (date only when the time is midnight) and nulls
    /// render as [`NULL_LITERAL`].
    pub fn render(&self) -> String {
        match self {
            CellValue::String(s) => s.clone(),
            CellValue::Number(n) => render_number(*n),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(d) => render_date(d),
            CellValue::Null => NULL_LITERAL.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Generic coercion: `NULL`, then boolean, integer, finite float,
    /// and finally the text itself.
    pub fn from_text(text: &str) -> CellValue {
        if text == NULL_LITERAL {
            return CellValue::Null;
        }
        if let Some(b) = parse_bool(text) {
            return CellValue::Bool(b);
        }
        if let Ok(i) = text.trim().parse::<i64>() {
            return CellValue::Number(i as f64);
        }
        if let Some(f) = parse_number(text) {
            return CellValue::Number(f);
        }
        CellValue::String(text.to_string())
    }

    /// Lift a JSON scalar into a cell. Strings go through [`from_text`](Self::from_text).
    pub fn from_json(value: &serde_json::Value) -> CellValue {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() => CellValue::Number(f),
                _ => CellValue::String(n.to_string()),
            },
            serde_json::Value::String(s) => CellValue::from_text(s),
            other => CellValue::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::String(s) => serde_json::Value::String(s.clone()),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < INTEGRAL_RENDER_LIMIT {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Date(d) => serde_json::Value::String(render_date(d)),
            CellValue::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < INTEGRAL_RENDER_LIMIT {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn render_date(d: &NaiveDateTime) -> String {
    let time = d.time();
    if time.num_seconds_from_midnight() == 0 && time.nanosecond() == 0 {
        d.format("%Y-%m-%d").to_string()
    } else if time.nanosecond() == 0 {
        d.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
    }
}

/// `true`/`false`, case-insensitive.
pub fn parse_bool(text: &str) -> Option<bool> {
    let t = text.trim();
    if t.eq_ignore_ascii_case("true") {
        Some(true)
    } else if t.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Finite decimal numbers. `inf`, `NaN` and friends are rejected.
pub fn parse_number(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    match t.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(f),
        _ => None,
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Recognised date and date-time shapes: ISO (`T` or space separated),
/// RFC 3339 with an offset (normalised to UTC), `MM/DD/YYYY` and
/// `YYYY/MM/DD`, each optionally followed by a time.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim();
    if t.len() < 8 {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(dt);
        }
    }
    DateTime::parse_from_rfc3339(t).ok().map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_render_numbers() {
        assert_eq!(CellValue::Number(8080.0).render(), "8080");
        assert_eq!(CellValue::Number(-3.0).render(), "-3");
        assert_eq!(CellValue::Number(2.5).render(), "2.5");
        assert_eq!(CellValue::Number(0.1).render(), "0.1");
    }

    #[test]
    fn test_render_other_variants() {
        assert_eq!(CellValue::Bool(true).render(), "true");
        assert_eq!(CellValue::Null.render(), "NULL");
        assert_eq!(CellValue::Date(date(2024, 1, 15)).render(), "2024-01-15");
        let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(CellValue::Date(dt).render(), "2024-01-15T09:30:00");
    }

    #[test]
    fn test_from_text_order() {
        assert_eq!(CellValue::from_text("NULL"), CellValue::Null);
        assert_eq!(CellValue::from_text("TRUE"), CellValue::Bool(true));
        assert_eq!(CellValue::from_text("42"), CellValue::Number(42.0));
        assert_eq!(CellValue::from_text("4.5"), CellValue::Number(4.5));
        assert_eq!(
            CellValue::from_text("SVR01"),
            CellValue::String("SVR01".into())
        );
        // lowercase "null" is an ordinary string
        assert_eq!(
            CellValue::from_text("null"),
            CellValue::String("null".into())
        );
    }

    #[test]
    fn test_non_finite_numbers_stay_strings() {
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(
            CellValue::from_text("infinity"),
            CellValue::String("infinity".into())
        );
    }

    #[test]
    fn test_parse_date_shapes() {
        assert_eq!(parse_date("2024-01-15"), Some(date(2024, 1, 15)));
        assert_eq!(parse_date("2024/01/15"), Some(date(2024, 1, 15)));
        assert_eq!(parse_date("01/15/2024"), Some(date(2024, 1, 15)));
        assert!(parse_date("2024-01-15T10:00:00").is_some());
        assert!(parse_date("2024-01-15 10:00:00").is_some());
        assert!(parse_date("2024-01-15T10:00:00+02:00").is_some());
        assert_eq!(parse_date("15.01.2024"), None);
        assert_eq!(parse_date("42"), None);
    }

    #[test]
    fn test_json_serialization_is_untagged() {
        let v = serde_json::to_value(CellValue::Number(8080.0)).unwrap();
        assert_eq!(v, serde_json::json!(8080));
        let v = serde_json::to_value(CellValue::Null).unwrap();
        assert!(v.is_null());
    }
}
