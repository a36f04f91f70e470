//! Field delimiter detection on a decoded sample.

use serde::{Deserialize, Serialize};

/// Candidate delimiters, in tie-break order.
pub const CANDIDATES: &[char] = &[',', '\t', ';', '|', ' '];

/// Records inspected by the quote-aware sniff.
const SNIFF_RECORDS: usize = 20;

/// How a delimiter was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterMethod {
    Declared,
    Sniffed,
    Frequency,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterGuess {
    pub delimiter: u8,
    pub method: DelimiterMethod,
}

/// Detect the delimiter of `text`.
///
/// `complete` is false when the text is a prefix of the source, in which
/// case its last record may be cut short and is ignored by the sniff.
pub fn detect_delimiter(text: &str, complete: bool) -> DelimiterGuess {
    if let Some(delimiter) = sniff(text, complete) {
        return DelimiterGuess {
            delimiter: delimiter as u8,
            method: DelimiterMethod::Sniffed,
        };
    }
    if let Some(delimiter) = most_frequent(text) {
        return DelimiterGuess {
            delimiter: delimiter as u8,
            method: DelimiterMethod::Frequency,
        };
    }
    DelimiterGuess {
        delimiter: b',',
        method: DelimiterMethod::Default,
    }
}

/// Quote-aware sniff: a candidate qualifies when every sampled record has the
/// same non-zero count of it outside quotes. The highest count wins.
fn sniff(text: &str, complete: bool) -> Option<char> {
    let mut records = split_records(text, SNIFF_RECORDS + 1);
    if !complete && records.len() > 1 {
        records.pop();
    }
    records.truncate(SNIFF_RECORDS);
    if records.is_empty() {
        return None;
    }

    let mut best: Option<(char, usize)> = None;
    for &candidate in CANDIDATES {
        let counts: Vec<usize> = records
            .iter()
            .map(|record| count_unquoted(record, candidate))
            .collect();
        let first = counts[0];
        if first == 0 || counts.iter().any(|&c| c != first) {
            continue;
        }
        if best.is_none_or(|(_, count)| first > count) {
            best = Some((candidate, first));
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn most_frequent(text: &str) -> Option<char> {
    let mut best: Option<(char, usize)> = None;
    for &candidate in CANDIDATES {
        let count = text.chars().filter(|&c| c == candidate).count();
        if count > 0 && best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((candidate, count));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Split on newlines that are outside double quotes, skipping blank records.
fn split_records(text: &str, max: usize) -> Vec<&str> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\n' if !in_quotes => {
                let record = text[start..idx].trim_end_matches('\r');
                if !record.trim().is_empty() {
                    records.push(record);
                    if records.len() >= max {
                        return records;
                    }
                }
                start = idx + 1;
            }
            _ => {}
        }
    }
    let tail = text[start..].trim_end_matches('\r');
    if !tail.trim().is_empty() {
        records.push(tail);
    }
    records
}

fn count_unquoted(record: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in record.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}
