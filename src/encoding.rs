//! Character encodings for configured tokens and per-record decoding.
//!
//! Tokens are encoded to bytes once, at configuration compile time, so the
//! scanner can compare record-key fields byte-for-byte without decoding every
//! record. Only records the configuration cares about are decoded back to
//! text.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::errors::SpanError;

/// Supported character encodings for tokens, delimiters, and record decoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// UTF-8 (default). Decoding is lossy on invalid sequences.
    #[default]
    Utf8,
    /// 7-bit ASCII. Encoding fails on any non-ASCII character.
    Ascii,
    /// ISO-8859-1. Every byte decodes; encoding fails above U+00FF.
    Latin1,
}

impl Encoding {
    /// Stable name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Ascii => "us-ascii",
            Encoding::Latin1 => "iso-8859-1",
        }
    }

    /// Encode `text` into this encoding's byte representation.
    ///
    /// Fails with [`SpanError::Encoding`] when a character has no
    /// representation, which per the error contract is a construction-time
    /// failure: callers encode all configured tokens up front.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, SpanError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Ascii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err(self.unrepresentable(text))
                }
            }
            Encoding::Latin1 => {
                let mut bytes = Vec::with_capacity(text.len());
                for ch in text.chars() {
                    let code = ch as u32;
                    if code > 0xFF {
                        return Err(self.unrepresentable(text));
                    }
                    bytes.push(code as u8);
                }
                Ok(bytes)
            }
        }
    }

    /// Decode raw record bytes to text.
    ///
    /// Mid-scan decoding never fails: UTF-8 replaces invalid sequences and the
    /// single-byte encodings map every byte.
    pub fn decode(self, bytes: &[u8]) -> Cow<'_, str> {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes),
            Encoding::Ascii | Encoding::Latin1 => {
                if bytes.is_ascii() {
                    // ASCII bytes are valid UTF-8 as-is.
                    Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default())
                } else {
                    Cow::Owned(bytes.iter().map(|&b| b as char).collect())
                }
            }
        }
    }

    fn unrepresentable(self, token: &str) -> SpanError {
        SpanError::Encoding {
            token: token.to_string(),
            encoding: self.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_round_trips_arbitrary_text() {
        let text = "clé;数";
        let bytes = Encoding::Utf8.encode(text).unwrap();
        assert_eq!(Encoding::Utf8.decode(&bytes), text);
    }

    #[test]
    fn ascii_rejects_non_ascii_tokens() {
        let err = Encoding::Ascii.encode("clé").unwrap_err();
        assert!(matches!(err, SpanError::Encoding { encoding: "us-ascii", .. }));
    }

    #[test]
    fn latin1_encodes_single_bytes() {
        let bytes = Encoding::Latin1.encode("clé").unwrap();
        assert_eq!(bytes, vec![b'c', b'l', 0xE9]);
        assert_eq!(Encoding::Latin1.decode(&bytes), "clé");
        assert!(Encoding::Latin1.encode("数").is_err());
    }
}
