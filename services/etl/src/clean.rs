//! Numeric and categorical cleaning.
//!
//! The survey export carries numbers such as `"': 42.5"` and `"1,234.0"`.
//! Cleaning follows one small grammar:
//!
//! 1. trim surrounding whitespace
//! 2. strip leading artifact characters (quotes, backticks, colons, semicolons)
//! 3. drop thousands separators
//! 4. parse as `f64`
//!
//! Anything that does not survive the grammar becomes `0.0`. Zero is the
//! "unknown" sentinel for this domain, so downstream ratios and averages must
//! treat it as possibly-missing.

use crate::extract::RawValue;

/// Category label used when the source has none.
pub const MISSING_CATEGORY: &str = "None";

const ARTIFACT_PREFIX: &[char] = &['\'', '"', '`', ':', ';'];
const THOUSANDS_SEPARATOR: char = ',';

/// Why a value fell back to the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericFault {
    Missing,
    Unparseable,
}

pub fn try_clean_numeric(value: &RawValue) -> Result<f64, NumericFault> {
    match value {
        RawValue::Missing => Err(NumericFault::Missing),
        RawValue::Number(n) if n.is_finite() => Ok(*n),
        RawValue::Number(_) => Err(NumericFault::Unparseable),
        RawValue::Text(text) => try_clean_numeric_str(text),
    }
}

pub fn try_clean_numeric_str(raw: &str) -> Result<f64, NumericFault> {
    let stripped = raw
        .trim()
        .trim_start_matches(|c: char| ARTIFACT_PREFIX.contains(&c) || c.is_whitespace());
    if stripped.is_empty() {
        return Err(NumericFault::Missing);
    }

    let digits: String = stripped
        .chars()
        .filter(|c| *c != THOUSANDS_SEPARATOR)
        .collect();

    match digits.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(NumericFault::Unparseable),
    }
}

/// Cleaned number, `0.0` when the grammar rejects the value.
pub fn clean_numeric(value: &RawValue) -> f64 {
    try_clean_numeric(value).unwrap_or(0.0)
}

pub fn clean_numeric_str(raw: &str) -> f64 {
    try_clean_numeric_str(raw).unwrap_or(0.0)
}

/// Trimmed label; missing or blank becomes the literal `"None"` category so
/// grouping keeps unknowns as their own bucket.
pub fn clean_category(value: &RawValue) -> String {
    match value.as_text() {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => MISSING_CATEGORY.to_string(),
    }
}

/// Year from a header or cell rendered as text: `"2021"` or `"2021.0"`.
pub fn coerce_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    let year = match raw.parse::<i32>() {
        Ok(year) => year,
        Err(_) => {
            let float = raw.parse::<f64>().ok()?;
            if float.fract() != 0.0 {
                return None;
            }
            float as i32
        }
    };
    (1000..=9999).contains(&year).then_some(year)
}

pub fn coerce_year_value(value: &RawValue) -> Option<i32> {
    value.as_text().and_then(|text| coerce_year(&text))
}
