//! Similarity signals used by the auto mapper.

use crate::mapping::model::{MappingNode, SemanticType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Name similarity
// ---------------------------------------------------------------------------

/// Normalize a field name: split camelCase, unify `_ - . /` and whitespace
/// into single spaces, lowercase.
pub fn normalize_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if matches!(c, '_' | '-' | '.' | '/') || c.is_whitespace() {
            out.push(' ');
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower)
            {
                out.push(' ');
            }
        }
        out.extend(c.to_lowercase());
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Name similarity in [0, 1].
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    let ca = na.replace(' ', "");
    let cb = nb.replace(' ', "");
    if ca == cb {
        return 1.0;
    }
    if ca.contains(&cb) || cb.contains(&ca) {
        let (short, long) = if ca.len() < cb.len() {
            (ca.len(), cb.len())
        } else {
            (cb.len(), ca.len())
        };
        return 0.8 + 0.2 * (short as f64 / long as f64);
    }
    let by_chars = TextDiff::from_chars(na.as_str(), nb.as_str()).ratio() as f64;
    let by_words = TextDiff::from_words(na.as_str(), nb.as_str()).ratio() as f64;
    by_chars.max(by_words)
}

// ---------------------------------------------------------------------------
// Type compatibility
// ---------------------------------------------------------------------------

/// Fixed, symmetric compatibility between declared types.
pub fn type_compatibility(a: SemanticType, b: SemanticType) -> f64 {
    use SemanticType::*;
    if a == b && a != Unknown {
        return 1.0;
    }
    let (x, y) = if a <= b { (a, b) } else { (b, a) };
    match (x, y) {
        (Integer, Float) | (Integer, Decimal) | (Float, Decimal) => 0.9,
        (Date, DateTime) => 0.9,
        (String, Date) | (String, DateTime) => 0.6,
        (String, Email) | (String, Phone) | (String, PostalCode) => 0.7,
        (Integer, PostalCode) | (Integer, Phone) => 0.5,
        (Integer, Boolean) => 0.4,
        (String, Unknown) | (Unknown, _) | (_, Unknown) => 0.3,
        (String, _) => 0.5,
        _ => 0.3,
    }
}

// ---------------------------------------------------------------------------
// Sample pattern agreement
// ---------------------------------------------------------------------------

/// Coarse shape of a sample value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleShape {
    Boolean,
    Integer,
    Decimal,
    Date,
    DateTime,
    Email,
    Phone,
    PostalCode,
    Text,
}

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d{1,3}(,\d{3})+|\d+)$").expect("valid regex"));
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?((\d{1,3}(,\d{3})+|\d+)(\.\d+)?|\.\d+)([eE][+-]?\d+)?$")
        .expect("valid regex")
});
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4})$")
        .expect("valid regex")
});
static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?$")
        .expect("valid regex")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid regex")
});
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[\d\s().-]{7,20}$").expect("valid regex"));
static POSTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{5}(-\d{4})?|[A-Z]{1,2}\d[A-Z\d]? ?\d[A-Z]{2}|[A-Z]\d[A-Z] ?\d[A-Z]\d|\d{4,6})$",
    )
    .expect("valid regex")
});

/// Classify a sample value by shape.
pub fn classify_sample(value: &str) -> SampleShape {
    let v = value.trim();
    if matches!(
        v.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no"
    ) {
        return SampleShape::Boolean;
    }
    if INTEGER.is_match(v) {
        return SampleShape::Integer;
    }
    if DECIMAL.is_match(v) {
        return SampleShape::Decimal;
    }
    if DATE_TIME.is_match(v) {
        return SampleShape::DateTime;
    }
    if DATE.is_match(v) {
        return SampleShape::Date;
    }
    if EMAIL.is_match(v) {
        return SampleShape::Email;
    }
    if POSTAL.is_match(v) {
        return SampleShape::PostalCode;
    }
    if PHONE.is_match(v) && v.chars().filter(|c| c.is_ascii_digit()).count() >= 7 {
        return SampleShape::Phone;
    }
    SampleShape::Text
}

/// Shapes a value of the given declared type is expected to have.
fn expected_shapes(semantic_type: SemanticType) -> Option<&'static [SampleShape]> {
    use SampleShape as S;
    match semantic_type {
        SemanticType::Integer => Some(&[S::Integer]),
        SemanticType::Float | SemanticType::Decimal => Some(&[S::Integer, S::Decimal]),
        SemanticType::Boolean => Some(&[S::Boolean]),
        SemanticType::Date => Some(&[S::Date]),
        SemanticType::DateTime => Some(&[S::DateTime, S::Date]),
        SemanticType::Email => Some(&[S::Email]),
        SemanticType::Phone => Some(&[S::Phone, S::Integer]),
        SemanticType::PostalCode => Some(&[S::PostalCode, S::Integer]),
        SemanticType::String => Some(&[S::Text, S::Email, S::Phone, S::PostalCode]),
        SemanticType::Unknown => None,
    }
}

fn shapes_compatible(a: SampleShape, b: SampleShape) -> bool {
    use SampleShape::*;
    matches!(
        (a, b),
        (Integer, Decimal)
            | (Decimal, Integer)
            | (Date, DateTime)
            | (DateTime, Date)
            | (Integer, PostalCode)
            | (PostalCode, Integer)
            | (Integer, Phone)
            | (Phone, Integer)
    )
}

/// Agreement of sample values, falling back to conformance of one side's
/// sample with the other side's declared type. 0.5 when there is no evidence.
pub fn pattern_score(source: &MappingNode, target: &MappingNode) -> f64 {
    match (source.sample.as_deref(), target.sample.as_deref()) {
        (Some(s), Some(t)) => {
            let (a, b) = (classify_sample(s), classify_sample(t));
            if a == b {
                1.0
            } else if shapes_compatible(a, b) {
                0.7
            } else {
                0.0
            }
        }
        (Some(sample), None) => conformance(sample, target.semantic_type),
        (None, Some(sample)) => conformance(sample, source.semantic_type),
        (None, None) => 0.5,
    }
}

fn conformance(sample: &str, semantic_type: SemanticType) -> f64 {
    match expected_shapes(semantic_type) {
        Some(shapes) if shapes.contains(&classify_sample(sample)) => 1.0,
        Some(_) => 0.0,
        None => 0.5,
    }
}

// ---------------------------------------------------------------------------
// Heuristic signal
// ---------------------------------------------------------------------------

/// The optional learned/heuristic signal of the composite score.
pub trait HeuristicScorer: Send + Sync {
    /// Score in [0, 1].
    fn score(&self, source: &MappingNode, target: &MappingNode) -> f64;
}

/// Scores 1.0 when both names fall into the same synonym group.
#[derive(Debug, Clone)]
pub struct SynonymHeuristic {
    groups: Vec<Vec<String>>,
}

impl SynonymHeuristic {
    pub fn new(groups: Vec<Vec<String>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|group| group.iter().map(|n| compact(n)).collect())
            .collect();
        Self { groups }
    }
}

impl Default for SynonymHeuristic {
    fn default() -> Self {
        let groups: &[&[&str]] = &[
            &["amt", "amount", "total", "sum", "value"],
            &["name", "fullname", "full name", "customer name"],
            &["zip", "zipcode", "postal", "postcode", "postal code"],
            &["phone", "tel", "telephone", "mobile", "phone number"],
            &["email", "mail", "e mail", "email address"],
            &["dob", "birthdate", "date of birth", "birthday"],
            &["qty", "quantity", "count", "units"],
            &["id", "identifier", "key", "code"],
            &["addr", "address", "street"],
            &["desc", "description", "details"],
        ];
        Self::new(
            groups
                .iter()
                .map(|g| g.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }
}

impl HeuristicScorer for SynonymHeuristic {
    fn score(&self, source: &MappingNode, target: &MappingNode) -> f64 {
        let (a, b) = (compact(&source.name), compact(&target.name));
        if a == b {
            return 1.0;
        }
        let shared = self
            .groups
            .iter()
            .any(|group| group.contains(&a) && group.contains(&b));
        if shared { 1.0 } else { 0.0 }
    }
}

fn compact(name: &str) -> String {
    normalize_name(name).replace(' ', "")
}
