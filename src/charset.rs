//! Charset normalization for response bodies.
//!
//! Bodies arrive as raw bytes in whatever encoding the upstream server chose.
//! Before pattern matching they are converted to UTF-8:
//!
//! 1. A byte-order mark, if present, decides the encoding outright.
//! 2. Otherwise [`chardetng`] makes a statistical best guess.
//! 3. The guess is decoded with the matching [`encoding_rs`] table.
//!
//! Only a fixed set of encodings is accepted: UTF-8, GBK/GB18030 (which also
//! covers GB2312 content), Big5, Shift_JIS, EUC-KR and windows-1252 (the WHATWG
//! decoder for ISO-8859-1). Anything else, or bytes that are malformed for the
//! guessed encoding, yields [`RespGuardError::Charset`]. Callers are expected to
//! fall back to the raw bytes in that case; see [`normalize_or_raw`].

use std::borrow::Cow;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, BIG5, EUC_KR, GB18030, GBK, SHIFT_JIS, UTF_8, WINDOWS_1252};
use tracing::{debug, warn};

use crate::error::{RespGuardError, Result};

/// Converts a raw body into UTF-8 text.
///
/// The scan scheduler holds one of these behind an `Arc`, so implementations
/// must be shareable across worker threads.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, raw: &[u8]) -> Result<String>;
}

/// Default normalizer: BOM sniffing, then `chardetng` detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharsetNormalizer;

impl TextNormalizer for CharsetNormalizer {
    fn normalize(&self, raw: &[u8]) -> Result<String> {
        convert_to_utf8(raw)
    }
}

/// Whether `encoding` is one the normalizer is willing to decode.
pub fn is_supported(encoding: &'static Encoding) -> bool {
    [UTF_8, GBK, GB18030, BIG5, SHIFT_JIS, EUC_KR, WINDOWS_1252].contains(&encoding)
}

/// Best-guess encoding for the given bytes.
pub fn detect(raw: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(raw, true);
    detector.guess(None, true)
}

/// Decode `raw` using `encoding`, failing on malformed input or unsupported encodings.
pub fn decode(raw: &[u8], encoding: &'static Encoding) -> Result<String> {
    if !is_supported(encoding) {
        return Err(RespGuardError::Charset(format!(
            "unsupported charset: {}",
            encoding.name()
        )));
    }
    if encoding == UTF_8 {
        return std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| RespGuardError::Charset(format!("invalid UTF-8: {}", e)));
    }
    match encoding.decode_without_bom_handling_and_without_replacement(raw) {
        Some(Cow::Borrowed(text)) => Ok(text.to_owned()),
        Some(Cow::Owned(text)) => Ok(text),
        None => Err(RespGuardError::Charset(format!(
            "charset conversion error: malformed {} input",
            encoding.name()
        ))),
    }
}

/// Detect the encoding of `raw` and decode it to UTF-8.
pub fn convert_to_utf8(raw: &[u8]) -> Result<String> {
    if raw.is_empty() {
        return Ok(String::new());
    }

    if let Some((encoding, bom_len)) = Encoding::for_bom(raw) {
        // UTF-16 is only ever accepted when announced by a BOM.
        let (text, had_errors) = encoding.decode_without_bom_handling(&raw[bom_len..]);
        if had_errors {
            return Err(RespGuardError::Charset(format!(
                "charset conversion error: malformed {} input",
                encoding.name()
            )));
        }
        return Ok(text.into_owned());
    }

    let encoding = detect(raw);
    debug!(charset = encoding.name(), len = raw.len(), "Detected body charset");
    decode(raw, encoding)
}

/// Normalize with `normalizer`, falling back to a lossy reading of the raw bytes.
pub fn normalize_or_raw(normalizer: &dyn TextNormalizer, raw: &[u8], locator: &str) -> String {
    match normalizer.normalize(raw) {
        Ok(text) => text,
        Err(e) => {
            warn!("{}: {}; scanning raw bytes instead", locator, e);
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}
