//! Typed cell values and literal parsers.
//!
//! Converters turn raw field bytes into [`Value`]s appended to column
//! sinks. Parsers are deliberately forgiving about formats (several date
//! and datetime layouts, a truthy/falsy boolean set) but strict about
//! garbage: anything unparseable is an error for the caller's
//! lenient/strict policy to resolve.

use std::fmt;

use anyhow::{Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Decimal(Decimal),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Decimal(d) => d.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn parse_boolean(value: &str) -> Result<bool> {
    let lowered = value.to_ascii_lowercase();
    match lowered.as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => bail!("Failed to parse '{value}' as boolean"),
    }
}

pub fn parse_decimal(value: &str) -> Result<Decimal> {
    value
        .parse::<Decimal>()
        .map_err(|_| anyhow!("Failed to parse '{value}' as decimal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_naive_date_supports_multiple_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_naive_date("2024-05-06").unwrap(), expected);
        assert_eq!(parse_naive_date("06/05/2024").unwrap(), expected);
        assert_eq!(parse_naive_date("2024/05/06").unwrap(), expected);
        assert!(parse_naive_date("sometime").is_err());
    }

    #[test]
    fn parse_naive_datetime_supports_multiple_formats() {
        let expected =
            NaiveDateTime::parse_from_str("2024-05-06 14:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            parse_naive_datetime("2024-05-06T14:30:00").unwrap(),
            expected
        );
        assert_eq!(parse_naive_datetime("2024-05-06 14:30").unwrap(), expected);
    }

    #[test]
    fn parse_boolean_accepts_truthy_and_falsy_sets() {
        assert!(parse_boolean("Yes").unwrap());
        assert!(parse_boolean("T").unwrap());
        assert!(!parse_boolean("0").unwrap());
        assert!(!parse_boolean("no").unwrap());
        assert!(parse_boolean("maybe").is_err());
    }

    #[test]
    fn parse_decimal_keeps_scale() {
        let parsed = parse_decimal("12.3400").unwrap();
        assert_eq!(parsed.to_string(), "12.3400");
        assert!(parse_decimal("12.34.56").is_err());
    }

    #[test]
    fn float_display_drops_trailing_zero_fraction() {
        assert_eq!(Value::Float(3.0).as_display(), "3");
        assert_eq!(Value::Float(3.5).as_display(), "3.5");
    }
}
