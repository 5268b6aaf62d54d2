//! # Bencode Serializer
//!
//! A serde `Serializer` emitting canonical bencode. The one rule that
//! matters here is dictionary key order: keys MUST come out sorted by
//! their raw bytes, whatever order the host struct declares its fields
//! in, because info-hashes are computed over the encoded form. Map and
//! struct entries are therefore buffered and sorted before being written.
//!
//! Per-field omission (the "omit if empty" option) is expressed with
//! serde's `skip_serializing_if` attribute on the schema type.

use serde::ser::{self, Impossible, Serialize};

use crate::bencode::Error;

/// Encodes `value` as canonical bencode.
pub fn to_bytes<T>(value: &T) -> Result<Vec<u8>, Error>
where
    T: Serialize + ?Sized,
{
    let mut serializer = Serializer { out: Vec::new() };
    value.serialize(&mut serializer)?;
    Ok(serializer.out)
}

/// A serializer accumulating encoded bytes.
pub struct Serializer {
    out: Vec<u8>,
}

impl Serializer {
    fn put_int(&mut self, v: i64) {
        self.out.push(b'i');
        self.out.extend_from_slice(v.to_string().as_bytes());
        self.out.push(b'e');
    }

    fn put_uint(&mut self, v: u64) {
        self.out.push(b'i');
        self.out.extend_from_slice(v.to_string().as_bytes());
        self.out.push(b'e');
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.out.extend_from_slice(v.len().to_string().as_bytes());
        self.out.push(b':');
        self.out.extend_from_slice(v);
    }
}

impl<'a> ser::Serializer for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    type SerializeSeq = SeqEmitter<'a>;
    type SerializeTuple = SeqEmitter<'a>;
    type SerializeTupleStruct = SeqEmitter<'a>;
    type SerializeTupleVariant = Impossible<(), Error>;
    type SerializeMap = DictEmitter<'a>;
    type SerializeStruct = DictEmitter<'a>;
    type SerializeStructVariant = Impossible<(), Error>;

    fn serialize_bool(self, _v: bool) -> Result<(), Error> {
        Err(Error::Unsupported("bool"))
    }

    fn serialize_i8(self, v: i8) -> Result<(), Error> {
        self.put_int(v as i64);
        Ok(())
    }

    fn serialize_i16(self, v: i16) -> Result<(), Error> {
        self.put_int(v as i64);
        Ok(())
    }

    fn serialize_i32(self, v: i32) -> Result<(), Error> {
        self.put_int(v as i64);
        Ok(())
    }

    fn serialize_i64(self, v: i64) -> Result<(), Error> {
        self.put_int(v);
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<(), Error> {
        self.put_uint(v as u64);
        Ok(())
    }

    fn serialize_u16(self, v: u16) -> Result<(), Error> {
        self.put_uint(v as u64);
        Ok(())
    }

    fn serialize_u32(self, v: u32) -> Result<(), Error> {
        self.put_uint(v as u64);
        Ok(())
    }

    fn serialize_u64(self, v: u64) -> Result<(), Error> {
        self.put_uint(v);
        Ok(())
    }

    fn serialize_f32(self, _v: f32) -> Result<(), Error> {
        Err(Error::Unsupported("f32"))
    }

    fn serialize_f64(self, _v: f64) -> Result<(), Error> {
        Err(Error::Unsupported("f64"))
    }

    fn serialize_char(self, _v: char) -> Result<(), Error> {
        Err(Error::Unsupported("char"))
    }

    fn serialize_str(self, v: &str) -> Result<(), Error> {
        self.put_bytes(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), Error> {
        self.put_bytes(v);
        Ok(())
    }

    fn serialize_none(self) -> Result<(), Error> {
        // The format cannot express an absent value; optional fields are
        // omitted at the schema level with `skip_serializing_if`
        Err(Error::Unsupported("absent optional value"))
    }

    fn serialize_some<T>(self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), Error> {
        Err(Error::Unsupported("unit"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), Error> {
        Err(Error::Unsupported("unit struct"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<(), Error> {
        Err(Error::Unsupported("enum"))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::Unsupported("enum"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<SeqEmitter<'a>, Error> {
        self.out.push(b'l');
        Ok(SeqEmitter { ser: self })
    }

    fn serialize_tuple(self, _len: usize) -> Result<SeqEmitter<'a>, Error> {
        self.out.push(b'l');
        Ok(SeqEmitter { ser: self })
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<SeqEmitter<'a>, Error> {
        self.out.push(b'l');
        Ok(SeqEmitter { ser: self })
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Impossible<(), Error>, Error> {
        Err(Error::Unsupported("enum"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<DictEmitter<'a>, Error> {
        Ok(DictEmitter {
            ser: self,
            entries: Vec::new(),
            key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<DictEmitter<'a>, Error> {
        Ok(DictEmitter {
            ser: self,
            entries: Vec::new(),
            key: None,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Impossible<(), Error>, Error> {
        Err(Error::Unsupported("enum"))
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Emits list elements in order.
pub struct SeqEmitter<'a> {
    ser: &'a mut Serializer,
}

impl<'a> ser::SerializeSeq for SeqEmitter<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut *self.ser)
    }

    fn end(self) -> Result<(), Error> {
        self.ser.out.push(b'e');
        Ok(())
    }
}

impl<'a> ser::SerializeTuple for SeqEmitter<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut *self.ser)
    }

    fn end(self) -> Result<(), Error> {
        self.ser.out.push(b'e');
        Ok(())
    }
}

impl<'a> ser::SerializeTupleStruct for SeqEmitter<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut *self.ser)
    }

    fn end(self) -> Result<(), Error> {
        self.ser.out.push(b'e');
        Ok(())
    }
}

/// Buffers dictionary entries so they can be emitted in canonical order.
pub struct DictEmitter<'a> {
    ser: &'a mut Serializer,
    /// Encoded `(key, value)` pairs, sorted at `end`.
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Key awaiting its value.
    key: Option<Vec<u8>>,
}

impl<'a> DictEmitter<'a> {
    fn encode_value<T>(value: &T) -> Result<Vec<u8>, Error>
    where
        T: Serialize + ?Sized,
    {
        let mut nested = Serializer { out: Vec::new() };
        value.serialize(&mut nested)?;
        Ok(nested.out)
    }

    fn finish(mut self) -> Result<(), Error> {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));

        self.ser.out.push(b'd');
        for (key, value) in self.entries {
            self.ser.put_bytes(&key);
            self.ser.out.extend_from_slice(&value);
        }
        self.ser.out.push(b'e');

        Ok(())
    }
}

impl<'a> ser::SerializeMap for DictEmitter<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        self.key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let key = match self.key.take() {
            Some(key) => key,
            None => return Err(Error::Message(String::from("map value without a key"))),
        };

        self.entries.push((key, Self::encode_value(value)?));
        Ok(())
    }

    fn end(self) -> Result<(), Error> {
        self.finish()
    }
}

impl<'a> ser::SerializeStruct for DictEmitter<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, name: &'static str, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        self.entries
            .push((name.as_bytes().to_vec(), Self::encode_value(value)?));
        Ok(())
    }

    fn end(self) -> Result<(), Error> {
        self.finish()
    }
}

/// Serializes a dictionary key, which must be a string.
struct KeySerializer;

impl ser::Serializer for KeySerializer {
    type Ok = Vec<u8>;
    type Error = Error;

    type SerializeSeq = Impossible<Vec<u8>, Error>;
    type SerializeTuple = Impossible<Vec<u8>, Error>;
    type SerializeTupleStruct = Impossible<Vec<u8>, Error>;
    type SerializeTupleVariant = Impossible<Vec<u8>, Error>;
    type SerializeMap = Impossible<Vec<u8>, Error>;
    type SerializeStruct = Impossible<Vec<u8>, Error>;
    type SerializeStructVariant = Impossible<Vec<u8>, Error>;

    fn serialize_str(self, v: &str) -> Result<Vec<u8>, Error> {
        Ok(v.as_bytes().to_vec())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(v.to_vec())
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Vec<u8>, Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_some<T>(self, value: &T) -> Result<Vec<u8>, Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_i8(self, _v: i8) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_i16(self, _v: i16) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_i32(self, _v: i32) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_i64(self, _v: i64) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_u8(self, _v: u8) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_u16(self, _v: u16) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_u32(self, _v: u32) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_u64(self, _v: u64) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_f32(self, _v: f32) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_f64(self, _v: f64) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_char(self, _v: char) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_none(self) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_unit(self) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<Vec<u8>, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Vec<u8>, Error>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Err(Error::Unsupported("dictionary key"))
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_bytes::ByteBuf;

    #[derive(Serialize)]
    struct Scrambled {
        zebra: i64,
        apple: String,
        #[serde(rename = "middle key")]
        middle: Vec<i64>,
    }

    #[test]
    fn struct_keys_come_out_sorted() {
        let value = Scrambled {
            zebra: 1,
            apple: String::from("red"),
            middle: vec![2, 3],
        };

        let encoded = to_bytes(&value).unwrap();
        assert_eq!(encoded, b"d5:apple3:red10:middle keyli2ei3ee5:zebrai1ee");
    }

    #[derive(Serialize)]
    struct Sparse {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        length: Option<u64>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        files: Vec<i64>,
    }

    #[test]
    fn empty_fields_can_be_omitted() {
        let value = Sparse {
            name: String::from("a"),
            length: Some(7),
            files: Vec::new(),
        };
        assert_eq!(to_bytes(&value).unwrap(), b"d6:lengthi7e4:name1:ae");

        let value = Sparse {
            name: String::from("a"),
            length: None,
            files: vec![1],
        };
        assert_eq!(to_bytes(&value).unwrap(), b"d5:filesli1ee4:name1:ae");
    }

    #[test]
    fn encodes_primitives() {
        assert_eq!(to_bytes(&0i64).unwrap(), b"i0e");
        assert_eq!(to_bytes(&-17i64).unwrap(), b"i-17e");
        assert_eq!(to_bytes("spam").unwrap(), b"4:spam");
        assert_eq!(to_bytes("").unwrap(), b"0:");
        assert_eq!(to_bytes(&ByteBuf::from(vec![0u8, 255])).unwrap(), b"2:\x00\xff");
        assert_eq!(to_bytes(&vec![1i64, 2]).unwrap(), b"li1ei2ee");
    }

    #[test]
    fn maps_sort_by_raw_key_bytes() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(String::from("b"), 2i64);
        map.insert(String::from("a"), 1i64);
        map.insert(String::from("aa"), 3i64);

        assert_eq!(to_bytes(&map).unwrap(), b"d1:ai1e2:aai3e1:bi2ee");
    }
}
