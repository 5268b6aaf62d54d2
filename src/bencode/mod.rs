//! # Bencode Codec
//!
//! Bencode is the self-describing binary format used by metainfo files and
//! tracker replies. It has four value kinds: integers, byte strings,
//! lists, and dictionaries with byte-string keys in ascending order.
//!
//! Decoding runs in two phases: the tokenizer validates the syntax of the
//! whole document (every error carries a byte offset), then a serde
//! deserializer binds the token stream to the caller's types. Encoding
//! always produces the canonical form — dictionary keys sorted by raw
//! bytes — because the torrent info-hash is computed over encoded bytes
//! and any other ordering would produce the wrong hash.
//!
//! ## Decoding into typed structures
//!
//! ```ignore
//! #[derive(Deserialize)]
//! struct Info {
//!     #[serde(rename = "piece length", default)]
//!     piece_length: u32,
//!     #[serde(default)]
//!     pieces: serde_bytes::ByteBuf,
//! }
//!
//! let info: Info = bencode::from_bytes(&data)?;
//! ```
//!
//! For documents without a fixed shape there is [`Value`], the dynamic
//! target.

mod de;
mod scanner;
mod ser;
mod value;

use std::fmt;
use std::ops::Range;

pub use de::from_bytes;
pub use ser::to_bytes;
pub use value::Value;

use scanner::{Scanner, TokenKind};

/// The ways a bencode operation can fail.
#[derive(Debug)]
pub enum Error {
    /// The input is not syntactically valid bencode.
    Syntax { msg: String, offset: usize },
    /// The input is valid but its shape does not fit the target type.
    Mismatch {
        found: &'static str,
        target: String,
        offset: usize,
    },
    /// An integer literal does not fit the host field.
    IntegerOverflow { offset: usize },
    /// The host type cannot be represented in the format.
    Unsupported(&'static str),
    /// Any other binding failure, reported by serde.
    Message(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Syntax { msg, offset } => {
                write!(f, "bencode: {} at offset {}", msg, offset)
            }
            Error::Mismatch {
                found,
                target,
                offset,
            } => write!(
                f,
                "bencode: cannot decode {} into {} at offset {}",
                found, target, offset
            ),
            Error::IntegerOverflow { offset } => {
                write!(f, "bencode: integer out of range at offset {}", offset)
            }
            Error::Unsupported(what) => write!(f, "bencode: unsupported type: {}", what),
            Error::Message(msg) => write!(f, "bencode: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl serde::de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl serde::ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

/// Checks whether `data` is a single well-formed bencode value.
pub fn valid(data: &[u8]) -> bool {
    scanner::valid(data)
}

/// Returns the byte range occupied by the value stored under `key` in the
/// top-level dictionary of `data`, or `None` if the document is not a
/// dictionary or has no such key.
///
/// The range points into the original input, so callers can work with the
/// value's bytes exactly as they appeared on the wire — which is how the
/// info-hash must be computed.
pub fn value_span(data: &[u8], key: &[u8]) -> Result<Option<Range<usize>>, Error> {
    let mut scanner = Scanner::new(data);
    scanner.validate()?;
    let tokens = scanner.tokens;

    match tokens.first() {
        Some(tok) if tok.kind == TokenKind::Dict => {}
        _ => return Ok(None),
    }

    // Walk the top-level entries: key token, then the value subtree
    let mut i = 1;
    while tokens[i].kind != TokenKind::End {
        let key_tok = tokens[i];
        let value_start = i + 1;
        let value_end = subtree_end(&tokens, value_start);

        if key_tok.str_bytes(data) == key {
            let span = tokens[value_start].start..tokens[value_end - 1].end;
            return Ok(Some(span));
        }

        i = value_end;
    }

    Ok(None)
}

/// Returns the token index one past the value subtree starting at `i`.
fn subtree_end(tokens: &[scanner::Token], i: usize) -> usize {
    match tokens[i].kind {
        TokenKind::Integer | TokenKind::Str => i + 1,
        _ => {
            let mut depth = 1usize;
            let mut j = i + 1;
            while depth > 0 {
                match tokens[j].kind {
                    TokenKind::List | TokenKind::Dict => depth += 1,
                    TokenKind::End => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            j
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[test]
    fn value_span_finds_nested_dictionaries() {
        let data = b"d8:announce3:url4:infod6:lengthi7e4:name1:aee";
        let span = value_span(data, b"info").unwrap().unwrap();
        assert_eq!(&data[span], b"d6:lengthi7e4:name1:ae");

        let span = value_span(data, b"announce").unwrap().unwrap();
        assert_eq!(&data[span], b"3:url");

        assert!(value_span(data, b"missing").unwrap().is_none());
    }

    #[test]
    fn value_span_skips_earlier_subtrees() {
        let data = b"d1:al1:bd1:ci1eee4:infoi9ee";
        let span = value_span(data, b"info").unwrap().unwrap();
        assert_eq!(&data[span], b"i9e");
    }

    #[test]
    fn value_span_rejects_invalid_documents() {
        assert!(value_span(b"d1:a", b"a").is_err());
    }

    #[test]
    fn value_span_on_non_dictionaries() {
        assert!(value_span(b"li1ee", b"a").unwrap().is_none());
        assert!(value_span(b"i1e", b"a").unwrap().is_none());
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Entry {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        label: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        nested: Vec<i64>,
    }

    #[test]
    fn typed_round_trip() {
        let entry = Entry {
            id: -5,
            label: String::from("x"),
            nested: vec![1, 2, 3],
        };

        let encoded = to_bytes(&entry).unwrap();
        let decoded: Entry = from_bytes(&encoded).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn canonical_input_survives_decode_encode() {
        // decode to the dynamic value and re-encode; canonical inputs
        // must come back byte-identical
        for input in [
            &b"i0e"[..],
            b"0:",
            b"de",
            b"le",
            b"d1:a1:b1:cli1ei-2eee",
            b"d4:spamd1:ai1e1:bi2eee",
        ] {
            let value: Value = from_bytes(input).unwrap();
            assert_eq!(to_bytes(&value).unwrap(), input.to_vec());
        }
    }
}
