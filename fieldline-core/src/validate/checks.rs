//! Type and format checks for single values.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Outcome of one check, with a human-readable reason on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Format a field is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    Numeric,
    Date,
    Email,
    Phone,
    PostalCode,
}

/// Date and date-time formats tried, in order, after a declared format.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d{1,3}(,\d{3})+|\d+)(\.\d+)?([eE][+-]?\d+)?$|^[+-]?\.\d+$")
        .expect("valid regex")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("valid regex")
});
static PHONE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[\d\s().-]+$").expect("valid regex"));
static POSTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(\d{5}(-\d{4})?",               // US ZIP, ZIP+4
        r"|[A-Z]{1,2}\d[A-Z\d]? ?\d[A-Z]{2}", // UK
        r"|[A-Z]\d[A-Z] ?\d[A-Z]\d",          // Canada
        r"|\d{4}|\d{6}",                      // 4- and 6-digit numeric codes
        r"|\d{3}-\d{4})$",                    // Japan
    ))
    .expect("valid regex")
});

pub fn check_numeric(value: &str) -> CheckOutcome {
    let v = value.trim();
    if NUMERIC.is_match(v) {
        CheckOutcome::pass()
    } else {
        CheckOutcome::fail(format!("'{value}' is not a number"))
    }
}

/// Try the declared format first, then [`DATE_FORMATS`], then RFC 3339.
pub fn check_date(value: &str, declared_format: Option<&str>) -> CheckOutcome {
    let v = value.trim();
    let parses = |format: &str| {
        NaiveDate::parse_from_str(v, format).is_ok()
            || NaiveDateTime::parse_from_str(v, format).is_ok()
    };
    if declared_format.is_some_and(|f| parses(f))
        || DATE_FORMATS.iter().any(|f| parses(f))
        || DateTime::parse_from_rfc3339(v).is_ok()
    {
        return CheckOutcome::pass();
    }
    match declared_format {
        Some(format) => CheckOutcome::fail(format!(
            "'{value}' does not match '{format}' or any known date format"
        )),
        None => CheckOutcome::fail(format!("'{value}' is not a recognized date")),
    }
}

pub fn check_email(value: &str) -> CheckOutcome {
    let v = value.trim();
    if v.contains("..") {
        return CheckOutcome::fail(format!("'{value}' has consecutive dots"));
    }
    if EMAIL.is_match(v) {
        CheckOutcome::pass()
    } else {
        CheckOutcome::fail(format!("'{value}' is not a valid email address"))
    }
}

/// 7 to 15 digits (E.164 bounds) with common separators.
pub fn check_phone(value: &str) -> CheckOutcome {
    let v = value.trim();
    if !PHONE_CHARS.is_match(v) {
        return CheckOutcome::fail(format!("'{value}' contains invalid phone characters"));
    }
    let digits = v.chars().filter(|c| c.is_ascii_digit()).count();
    if (7..=15).contains(&digits) {
        CheckOutcome::pass()
    } else {
        CheckOutcome::fail(format!("'{value}' has {digits} digits, expected 7-15"))
    }
}

pub fn check_postal_code(value: &str) -> CheckOutcome {
    let v = value.trim().to_ascii_uppercase();
    if POSTAL.is_match(&v) {
        CheckOutcome::pass()
    } else {
        CheckOutcome::fail(format!("'{value}' is not a recognized postal code"))
    }
}

/// Run the check for a format.
pub fn check_format(format: FieldFormat, value: &str, date_format: Option<&str>) -> CheckOutcome {
    match format {
        FieldFormat::Numeric => check_numeric(value),
        FieldFormat::Date => check_date(value, date_format),
        FieldFormat::Email => check_email(value),
        FieldFormat::Phone => check_phone(value),
        FieldFormat::PostalCode => check_postal_code(value),
    }
}
