//! Character encoding detection over a bounded sample window.
//!
//! Order of evidence: byte-order mark, declared label, the `chardetng`
//! statistical detector, then a fixed fallback list. When nothing decodes
//! the sample cleanly the most permissive single-byte encoding is used and
//! the detection is flagged as degraded.

use crate::error::IngestError;
use chardetng::EncodingDetector;
use encoding_rs::{
    BIG5, EUC_KR, Encoding, GBK, SHIFT_JIS, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1252,
};
use serde::{Deserialize, Serialize};

/// Encodings tried in order when the statistical detector is not confident.
pub fn fallback_encodings() -> [&'static Encoding; 5] {
    [UTF_8, SHIFT_JIS, EUC_KR, GBK, BIG5]
}

/// Decodes every byte sequence; used when detection fails.
pub fn permissive_encoding() -> &'static Encoding {
    WINDOWS_1252
}

/// How an encoding was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMethod {
    Bom,
    Declared,
    Statistical,
    Fallback,
    Default,
}

/// Outcome of encoding detection.
#[derive(Debug, Clone, Copy)]
pub struct EncodingGuess {
    pub encoding: &'static Encoding,
    pub method: EncodingMethod,
    /// No candidate decoded the sample; output may contain mojibake.
    pub degraded: bool,
}

/// Resolve an encoding label such as `"latin1"` or `"utf-16le"`.
pub fn resolve_label(label: &str) -> Result<&'static Encoding, IngestError> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| IngestError::UnknownEncoding {
        label: label.to_string(),
    })
}

/// Detect the encoding of `sample`.
///
/// `complete` is true when the sample holds the whole source, so a trailing
/// partial character cannot be blamed on the sample boundary.
pub fn detect_encoding(
    sample: &[u8],
    complete: bool,
    declared: Option<&str>,
    strict: bool,
    source_name: &str,
) -> Result<EncodingGuess, IngestError> {
    if let Some(label) = declared {
        return Ok(EncodingGuess {
            encoding: resolve_label(label)?,
            method: EncodingMethod::Declared,
            degraded: false,
        });
    }

    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return Ok(EncodingGuess {
            encoding,
            method: EncodingMethod::Bom,
            degraded: false,
        });
    }

    let mut detector = EncodingDetector::new();
    detector.feed(sample, complete);
    let (guess, confident) = detector.guess_assess(None, true);
    settle_encoding(
        sample,
        complete,
        confident.then_some(guess),
        strict,
        source_name,
    )
}

/// Pick an encoding once the detector has spoken: its guess when it decodes
/// the sample, else the first clean fallback, else the permissive encoding
/// flagged as degraded. Strict mode fails instead of degrading.
pub fn settle_encoding(
    sample: &[u8],
    complete: bool,
    statistical: Option<&'static Encoding>,
    strict: bool,
    source_name: &str,
) -> Result<EncodingGuess, IngestError> {
    if let Some(guess) = statistical.filter(|g| decodes_cleanly(*g, sample, complete)) {
        return Ok(EncodingGuess {
            encoding: guess,
            method: EncodingMethod::Statistical,
            degraded: false,
        });
    }

    if let Some(encoding) = try_fallbacks(sample, complete) {
        return Ok(EncodingGuess {
            encoding,
            method: EncodingMethod::Fallback,
            degraded: false,
        });
    }

    if strict {
        return Err(IngestError::EncodingDetection {
            source_name: source_name.to_string(),
        });
    }
    tracing::warn!(
        source = source_name,
        encoding = permissive_encoding().name(),
        "No encoding decodes the sample cleanly; continuing degraded"
    );
    Ok(EncodingGuess {
        encoding: permissive_encoding(),
        method: EncodingMethod::Default,
        degraded: true,
    })
}

/// First fallback encoding that decodes the sample without errors.
pub fn try_fallbacks(sample: &[u8], complete: bool) -> Option<&'static Encoding> {
    fallback_encodings()
        .into_iter()
        .find(|encoding| decodes_cleanly(encoding, sample, complete))
}

/// Whether `encoding` decodes the sample with no malformed sequences,
/// ignoring a character cut off by the sample boundary.
pub fn decodes_cleanly(encoding: &'static Encoding, sample: &[u8], complete: bool) -> bool {
    let bytes = if complete {
        sample
    } else {
        trim_to_boundary(encoding, sample)
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .is_some()
}

fn trim_to_boundary<'a>(encoding: &'static Encoding, sample: &'a [u8]) -> &'a [u8] {
    if encoding == UTF_16LE || encoding == UTF_16BE {
        // Drop a possibly split surrogate pair at the end.
        let even = sample.len() & !1;
        return &sample[..even.saturating_sub(2)];
    }
    match sample.iter().rposition(|&b| b == b'\n') {
        Some(pos) => &sample[..=pos],
        None => sample,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bom_wins() {
        let mut sample = vec![0xEF, 0xBB, 0xBF];
        sample.extend_from_slice(b"a,b\n1,2\n");
        let guess = detect_encoding(&sample, true, None, false, "t").unwrap();
        assert_eq!(guess.encoding, UTF_8);
        assert_eq!(guess.method, EncodingMethod::Bom);
    }

    #[test]
    fn test_declared_label() {
        let guess = detect_encoding(b"abc", true, Some("latin1"), false, "t").unwrap();
        assert_eq!(guess.encoding, WINDOWS_1252);
        assert_eq!(guess.method, EncodingMethod::Declared);
        assert!(detect_encoding(b"abc", true, Some("klingon"), false, "t").is_err());
    }

    #[test]
    fn test_ascii_is_not_degraded() {
        let guess = detect_encoding(b"id,name\n1,Jane\n", true, None, false, "t").unwrap();
        assert!(!guess.degraded);
        assert!(guess.encoding.is_ascii_compatible());
    }

    #[test]
    fn test_utf8_multibyte_detected() {
        let text = "name,city\nJosé,São Paulo\nRenée,Zürich\nŁukasz,Kraków\n".repeat(20);
        let guess = detect_encoding(text.as_bytes(), true, None, false, "t").unwrap();
        assert_eq!(guess.encoding, UTF_8);
    }

    #[test]
    fn test_split_character_at_sample_boundary_tolerated() {
        let text = "a,b\nü,x\nü";
        let bytes = text.as_bytes();
        // Cut inside the final two-byte character.
        let cut = &bytes[..bytes.len() - 1];
        assert!(decodes_cleanly(UTF_8, cut, false));
        assert!(!decodes_cleanly(UTF_8, cut, true));
    }

    #[test]
    fn test_no_fallback_decodes_garbage() {
        let sample = b"a,b\n\xff\xff\xff\n";
        assert!(try_fallbacks(sample, true).is_none());
    }

    #[test]
    fn test_undecodable_sample_degrades_to_permissive_encoding() {
        let sample = b"a,b\n\xff\xff\xff\n";
        let guess = settle_encoding(sample, true, None, false, "t").unwrap();
        assert_eq!(guess.encoding, WINDOWS_1252);
        assert_eq!(guess.method, EncodingMethod::Default);
        assert!(guess.degraded);

        // A detector guess that cannot decode the sample is not trusted.
        let guess = settle_encoding(sample, true, Some(SHIFT_JIS), false, "t").unwrap();
        assert_eq!(guess.method, EncodingMethod::Default);
        assert!(guess.degraded);
    }

    #[test]
    fn test_undecodable_sample_fails_in_strict_mode() {
        let sample = b"a,b\n\xff\xff\xff\n";
        let err = settle_encoding(sample, true, None, true, "legacy.csv").unwrap_err();
        assert!(matches!(
            err,
            IngestError::EncodingDetection { ref source_name } if source_name == "legacy.csv"
        ));
    }

    #[test]
    fn test_statistical_guess_used_when_it_decodes() {
        let guess = settle_encoding(b"a,b\n1,2\n", true, Some(UTF_8), true, "t").unwrap();
        assert_eq!(guess.encoding, UTF_8);
        assert_eq!(guess.method, EncodingMethod::Statistical);
        assert!(!guess.degraded);
    }

    #[test]
    fn test_windows_1252_always_decodes() {
        assert!(decodes_cleanly(permissive_encoding(), b"\xff\x80\x81", true));
    }
}
