//! # Bencode Deserializer
//!
//! The binding half of decoding: a serde `Deserializer` that walks the
//! token stream produced by the scanner and feeds host types. The scanner
//! has already fully validated the input, so the walk itself can assume a
//! well-formed stream; every remaining failure is a binding error (wrong
//! shape for the target, integer overflow, non-UTF-8 text).
//!
//! Field-name overrides, default values for missing keys, and ignoring
//! unknown keys all come from serde's declarative attributes on the
//! target type.

use std::str;

use serde::de::{self, DeserializeSeed, Visitor};

use crate::bencode::scanner::{Scanner, Token, TokenKind};
use crate::bencode::Error;

/// Decodes a single bencode value from `data` into `T`.
///
/// The whole input must be consumed: trailing bytes after the top-level
/// value are a syntax error.
pub fn from_bytes<'de, T>(data: &'de [u8]) -> Result<T, Error>
where
    T: de::Deserialize<'de>,
{
    let mut scanner = Scanner::new(data);
    scanner.validate()?;

    let mut deserializer = Deserializer {
        data,
        tokens: scanner.tokens,
        pos: 0,
    };

    T::deserialize(&mut deserializer)
}

/// A deserializer over a validated token stream.
pub struct Deserializer<'de> {
    data: &'de [u8],
    tokens: Vec<Token>,
    pos: usize,
}

impl<'de> Deserializer<'de> {
    /// Returns the next token without consuming it.
    ///
    /// The scanner guarantees a complete stream, so a deserialization
    /// driven by it can never run past the end; the bound is checked all
    /// the same to keep the walk panic-free.
    fn peek(&self) -> Result<Token, Error> {
        match self.tokens.get(self.pos) {
            Some(tok) => Ok(*tok),
            None => Err(Error::Message(String::from(
                "unexpected end of token stream",
            ))),
        }
    }

    fn next(&mut self) -> Result<Token, Error> {
        let tok = self.peek()?;
        self.pos += 1;
        Ok(tok)
    }

    /// Consumes an integer token and parses its literal as `i64`.
    fn integer(&mut self) -> Result<i64, Error> {
        let tok = self.peek()?;
        if tok.kind != TokenKind::Integer {
            return Err(self.mismatch("integer"));
        }
        self.next()?;

        let digits = tok.int_digits(self.data);
        let literal = str::from_utf8(digits)
            .map_err(|_| Error::Message(String::from("non-ascii integer literal")))?;

        literal
            .parse::<i64>()
            .map_err(|_| Error::IntegerOverflow { offset: tok.start })
    }

    /// Consumes a string token and returns its payload bytes.
    fn bytes(&mut self) -> Result<&'de [u8], Error> {
        let tok = self.peek()?;
        if tok.kind != TokenKind::Str {
            return Err(self.mismatch("string"));
        }
        self.next()?;

        Ok(tok.str_bytes(self.data))
    }

    /// Skips one complete value, containers included.
    fn skip_value(&mut self) -> Result<(), Error> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Integer | TokenKind::Str => Ok(()),
            TokenKind::List | TokenKind::Dict => {
                let mut depth = 1usize;
                while depth > 0 {
                    match self.next()?.kind {
                        TokenKind::List | TokenKind::Dict => depth += 1,
                        TokenKind::End => depth -= 1,
                        _ => {}
                    }
                }
                Ok(())
            }
            TokenKind::End => Err(Error::Message(String::from(
                "unexpected container terminator",
            ))),
        }
    }

    /// Builds a structural mismatch error for the current position.
    fn mismatch(&self, target: &'static str) -> Error {
        let (found, offset) = match self.tokens.get(self.pos) {
            Some(tok) => {
                let found = match tok.kind {
                    TokenKind::Integer => "integer",
                    TokenKind::Str => "string",
                    TokenKind::List => "list",
                    TokenKind::Dict => "dictionary",
                    TokenKind::End => "end of container",
                };
                (found, tok.start)
            }
            None => ("end of input", self.data.len()),
        };

        Error::Mismatch {
            found,
            target: String::from(target),
            offset,
        }
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        match self.peek()?.kind {
            TokenKind::Integer => visitor.visit_i64(self.integer()?),
            TokenKind::Str => visitor.visit_borrowed_bytes(self.bytes()?),
            TokenKind::List => self.deserialize_seq(visitor),
            TokenKind::Dict => self.deserialize_map(visitor),
            TokenKind::End => Err(self.mismatch("value")),
        }
    }

    fn deserialize_bool<V>(self, _visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        Err(Error::Unsupported("bool"))
    }

    fn deserialize_i8<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_i16<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_i32<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_i64<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_u8<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_u16<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_u32<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_u64<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.integer()?)
    }

    fn deserialize_f32<V>(self, _visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        Err(Error::Unsupported("f32"))
    }

    fn deserialize_f64<V>(self, _visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        Err(Error::Unsupported("f64"))
    }

    fn deserialize_char<V>(self, _visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        Err(Error::Unsupported("char"))
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        let bytes = self.bytes()?;
        match str::from_utf8(bytes) {
            Ok(text) => visitor.visit_borrowed_str(text),
            Err(_) => Err(Error::Message(String::from(
                "string contains non-UTF-8 bytes",
            ))),
        }
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(self.bytes()?)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(self.bytes()?)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        // The format has no notion of null; a present value is `Some`
        visitor.visit_some(self)
    }

    fn deserialize_unit<V>(self, _visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        Err(Error::Unsupported("unit"))
    }

    fn deserialize_unit_struct<V>(self, _name: &'static str, _visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        Err(Error::Unsupported("unit struct"))
    }

    fn deserialize_newtype_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        if self.peek()?.kind != TokenKind::List {
            return Err(self.mismatch("list"));
        }
        self.next()?;

        let value = visitor.visit_seq(SeqWalker { de: &mut *self })?;

        // The walker stops at the terminator; a visitor that bailed out
        // early leaves elements behind, which is a shape mismatch
        if self.peek()?.kind != TokenKind::End {
            return Err(self.mismatch("end of list"));
        }
        self.next()?;

        Ok(value)
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        if self.peek()?.kind != TokenKind::Dict {
            return Err(self.mismatch("dictionary"));
        }
        self.next()?;

        let value = visitor.visit_map(MapWalker { de: &mut *self })?;

        if self.peek()?.kind != TokenKind::End {
            return Err(self.mismatch("end of dictionary"));
        }
        self.next()?;

        Ok(value)
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        Err(Error::Unsupported("enum"))
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        let bytes = self.bytes()?;
        match str::from_utf8(bytes) {
            Ok(text) => visitor.visit_borrowed_str(text),
            Err(_) => visitor.visit_borrowed_bytes(bytes),
        }
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        self.skip_value()?;
        visitor.visit_unit()
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Walks the elements of a list.
struct SeqWalker<'de, 'a> {
    de: &'a mut Deserializer<'de>,
}

impl<'de, 'a> de::SeqAccess<'de> for SeqWalker<'de, 'a> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Error>
    where
        T: DeserializeSeed<'de>,
    {
        if self.de.peek()?.kind == TokenKind::End {
            return Ok(None);
        }

        seed.deserialize(&mut *self.de).map(Some)
    }
}

/// Walks the entries of a dictionary.
struct MapWalker<'de, 'a> {
    de: &'a mut Deserializer<'de>,
}

impl<'de, 'a> de::MapAccess<'de> for MapWalker<'de, 'a> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, Error>
    where
        K: DeserializeSeed<'de>,
    {
        if self.de.peek()?.kind == TokenKind::End {
            return Ok(None);
        }

        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, Error>
    where
        V: DeserializeSeed<'de>,
    {
        seed.deserialize(&mut *self.de)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_bytes::ByteBuf;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Inner {
        #[serde(default)]
        count: i64,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Outer {
        #[serde(rename = "full name", default)]
        name: String,
        #[serde(default)]
        blob: ByteBuf,
        #[serde(default)]
        inner: Inner,
    }

    #[test]
    fn binds_structs_with_renamed_fields() {
        let data = b"d4:blob2:\x00\x019:full name5:remora5:innerd5:counti42e4:tagsl1:a1:beee";
        let outer: Outer = from_bytes(data).unwrap();

        assert_eq!(outer.name, "remora");
        assert_eq!(outer.blob.as_ref(), &[0x00, 0x01]);
        assert_eq!(outer.inner.count, 42);
        assert_eq!(outer.inner.tags, vec!["a", "b"]);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let outer: Outer = from_bytes(b"de").unwrap();
        assert_eq!(outer, Outer::default());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let data = b"d5:extrali1ed1:x1:yee9:full name2:ok7:unknowni1ee";
        let outer: Outer = from_bytes(data).unwrap();
        assert_eq!(outer.name, "ok");
    }

    #[test]
    fn integers_overflowing_the_target_are_errors() {
        // does not fit in i64 at all
        let err = from_bytes::<i64>(b"i9223372036854775808e").unwrap_err();
        assert!(matches!(err, Error::IntegerOverflow { .. }));

        // fits in i64 but not in the narrower host field
        #[derive(Debug, Deserialize)]
        struct Narrow {
            #[allow(dead_code)]
            small: u8,
        }
        assert!(from_bytes::<Narrow>(b"d5:smalli300ee").is_err());

        // negative into unsigned
        assert!(from_bytes::<u32>(b"i-1e").is_err());
    }

    #[test]
    fn structural_mismatches_are_reported() {
        let err = from_bytes::<i64>(b"d1:a0:e").unwrap_err();
        assert!(matches!(err, Error::Mismatch { .. }));

        let err = from_bytes::<Vec<i64>>(b"i1e").unwrap_err();
        assert!(matches!(err, Error::Mismatch { .. }));
    }

    #[test]
    fn rejects_trailing_input() {
        assert!(from_bytes::<i64>(b"i1ei2e").is_err());
    }

    #[test]
    fn decodes_primitives() {
        assert_eq!(from_bytes::<i64>(b"i-42e").unwrap(), -42);
        assert_eq!(from_bytes::<u16>(b"i6881e").unwrap(), 6881);
        assert_eq!(from_bytes::<String>(b"4:spam").unwrap(), "spam");
        assert_eq!(
            from_bytes::<ByteBuf>(b"3:\xde\xad\x00").unwrap().as_ref(),
            &[0xde, 0xad, 0x00]
        );
        assert_eq!(from_bytes::<Vec<i64>>(b"li1ei2ei3ee").unwrap(), vec![1, 2, 3]);
    }
}
