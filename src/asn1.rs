//! Recursive BER/DER TLV parser and encoder.
//!
//! Only single-byte tags and definite lengths up to 4 length bytes are
//! supported, which covers everything a PKCS#15 token exposes. Parsing is
//! all-or-nothing per node: a malformed child aborts the whole parent.

use std::fmt;

use time::{Date, Month, PrimitiveDateTime, Time};

use crate::helpers;
use crate::types::{Error, Result};

pub const BOOLEAN: u8 = 0x01;
pub const INTEGER: u8 = 0x02;
pub const BIT_STRING: u8 = 0x03;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const OBJECT_IDENTIFIER: u8 = 0x06;
pub const OBJECT_DESCRIPTOR: u8 = 0x07;
pub const ENUMERATED: u8 = 0x0A;
pub const UTF8_STRING: u8 = 0x0C;
pub const RELATIVE_OID: u8 = 0x0D;
pub const NUMERIC_STRING: u8 = 0x12;
pub const PRINTABLE_STRING: u8 = 0x13;
pub const T61_STRING: u8 = 0x14;
pub const VIDEOTEX_STRING: u8 = 0x15;
pub const IA5_STRING: u8 = 0x16;
pub const UTC_TIME: u8 = 0x17;
pub const GENERALIZED_TIME: u8 = 0x18;
pub const GRAPHIC_STRING: u8 = 0x19;
pub const VISIBLE_STRING: u8 = 0x1A;
pub const GENERAL_STRING: u8 = 0x1B;
pub const UNIVERSAL_STRING: u8 = 0x1C;
pub const CHARACTER_STRING: u8 = 0x1D;
pub const BMP_STRING: u8 = 0x1E;
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;

/// A decoded value, one variant per decode rule the tag table supports.
#[derive(Debug, Clone, PartialEq)]
pub enum Asn1Value {
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i32),
    Str(String),
    DateTime(PrimitiveDateTime),
    Null,
}

/// One node of a decoded ASN.1 tree.
///
/// `total_length` counts the tag byte, the length field and the value, so
/// `offset + total_length` locates the next sibling in a byte stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Asn1 {
    pub tag: u8,
    pub length: usize,
    pub total_length: usize,
    pub children: Vec<Asn1>,
    pub name: Option<String>,
    pub type_label: Option<String>,
    value: Vec<u8>,
}

impl Asn1 {
    /// Parses one TLV node at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Asn1> {
        Self::parse_at(data, 0)
    }

    /// Parses one TLV node at `offset`, recursing into constructed values.
    pub fn parse_at(data: &[u8], offset: usize) -> Result<Asn1> {
        let tag = *data
            .get(offset)
            .ok_or(Error::MalformedEncoding("offset past end of buffer"))?;
        if tag & 0x1F == 0x1F {
            return Err(Error::UnsupportedTag(tag));
        }
        let (length, length_size) = parse_length(data, offset + 1)?;
        let value_offset = offset + 1 + length_size;
        if value_offset + length > data.len() {
            return Err(Error::MalformedEncoding("declared length past end of buffer"));
        }
        let value = data[value_offset..value_offset + length].to_vec();

        let mut children = Vec::new();
        if tag & 0x20 != 0 {
            let mut consumed = 0usize;
            while consumed < length {
                let child = Self::parse_at(data, value_offset + consumed)?;
                if consumed + child.total_length > length {
                    return Err(Error::MalformedEncoding(
                        "child extends past parent's declared length",
                    ));
                }
                consumed += child.total_length;
                children.push(child);
            }
        }

        Ok(Asn1 {
            tag,
            length,
            total_length: 1 + length_size + length,
            children,
            name: None,
            type_label: None,
            value,
        })
    }

    /// Builds a node from a tag and a value by encoding the length field
    /// and re-parsing the result, so encode and decode stay inverses.
    pub fn from_tag_and_value(tag: u8, value: &[u8]) -> Result<Asn1> {
        let mut data = vec![tag];
        data.extend_from_slice(&length_array(value.len()));
        data.extend_from_slice(value);
        Self::parse(&data)
    }

    /// Like [`Asn1::from_tag_and_value`] with the value EMV-padded first.
    pub fn from_tag_and_padded_value(tag: u8, value: &[u8]) -> Result<Asn1> {
        Self::from_tag_and_value(tag, &helpers::emv_pad(value))
    }

    /// The raw value bytes of this node.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Re-encodes the node as tag, length field and value bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.tag];
        out.extend_from_slice(&length_array(self.value.len()));
        out.extend_from_slice(&self.value);
        return out;
    }

    pub fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }

    /// Tag class from bits 6-7: 0 universal, 1 application, 2 context,
    /// 3 private.
    pub fn tag_class(&self) -> u8 {
        (self.tag & 0xC0) >> 6
    }

    pub fn is_context(&self) -> bool {
        self.tag_class() == 2
    }

    /// Tag number with the class and constructed bits masked off.
    pub fn tag_number(&self) -> u8 {
        self.tag & 0x1F
    }

    pub fn child(&self, index: usize) -> Option<&Asn1> {
        self.children.get(index)
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    pub fn set_type_label(&mut self, label: &str) {
        self.type_label = Some(label.to_string());
    }

    /// Decodes the value per the node's tag into the matching
    /// [`Asn1Value`] variant. Tags with no decode rule fail with
    /// [`Error::InvalidConversion`].
    pub fn typed_value(&self) -> Result<Asn1Value> {
        match self.tag {
            0x00 => Ok(Asn1Value::Bytes(self.value.clone())),
            BOOLEAN => Ok(Asn1Value::Bool(self.bool_value()?)),
            INTEGER | ENUMERATED => Ok(Asn1Value::Int(self.int_value()?)),
            NULL => Ok(Asn1Value::Null),
            GENERALIZED_TIME | UTC_TIME => Ok(Asn1Value::DateTime(self.date_time_value()?)),
            BIT_STRING | OCTET_STRING | OBJECT_IDENTIFIER | OBJECT_DESCRIPTOR | UTF8_STRING
            | RELATIVE_OID | NUMERIC_STRING | PRINTABLE_STRING | T61_STRING | VIDEOTEX_STRING
            | IA5_STRING | GRAPHIC_STRING | VISIBLE_STRING | GENERAL_STRING | UNIVERSAL_STRING
            | CHARACTER_STRING | BMP_STRING => Ok(Asn1Value::Str(self.str_value()?)),
            tag => Err(Error::InvalidConversion {
                requested: "typed value",
                tag,
            }),
        }
    }

    /// Non-committal probe: `None` when the tag has no decode rule or the
    /// value does not decode, instead of an error.
    pub fn try_typed_value(&self) -> Option<Asn1Value> {
        self.typed_value().ok()
    }

    pub fn bool_value(&self) -> Result<bool> {
        if self.tag != BOOLEAN {
            return Err(Error::InvalidConversion {
                requested: "bool",
                tag: self.tag,
            });
        }
        let byte = *self
            .value
            .first()
            .ok_or(Error::MalformedEncoding("empty BOOLEAN value"))?;
        Ok(byte != 0x00)
    }

    pub fn int_value(&self) -> Result<i32> {
        match self.tag {
            INTEGER | ENUMERATED => helpers::to_signed(&self.value),
            BIT_STRING => helpers::int_from_bit_string(&self.value),
            tag => Err(Error::InvalidConversion {
                requested: "int",
                tag,
            }),
        }
    }

    pub fn uint_value(&self) -> Result<u32> {
        match self.tag {
            INTEGER | ENUMERATED => helpers::to_unsigned(&self.value),
            tag => Err(Error::InvalidConversion {
                requested: "unsigned int",
                tag,
            }),
        }
    }

    /// String rendering of the value: bit string for BIT STRING, hex for
    /// OCTET STRING, dotted form for OID tags, text per the tag's
    /// character encoding otherwise.
    pub fn str_value(&self) -> Result<String> {
        match self.tag {
            BIT_STRING => bit_string_value(&self.value),
            OCTET_STRING => Ok(helpers::to_hex(&self.value)),
            OBJECT_IDENTIFIER | OBJECT_DESCRIPTOR | RELATIVE_OID => {
                helpers::bytes_to_oid(&self.value)
            }
            UTF8_STRING => String::from_utf8(self.value.clone())
                .map_err(|_| Error::MalformedEncoding("invalid UTF-8 in string value")),
            NUMERIC_STRING | PRINTABLE_STRING | T61_STRING | VIDEOTEX_STRING | IA5_STRING
            | GRAPHIC_STRING | VISIBLE_STRING | GENERAL_STRING | CHARACTER_STRING | UTC_TIME
            | GENERALIZED_TIME => String::from_utf8(self.value.clone())
                .map_err(|_| Error::MalformedEncoding("non-ASCII byte in string value")),
            UNIVERSAL_STRING | BMP_STRING => utf16_be_value(&self.value),
            tag => Err(Error::InvalidConversion {
                requested: "string",
                tag,
            }),
        }
    }

    /// Parses GeneralizedTime (`yyyyMMddhhmmss.ffffZ`) or UTCTime
    /// (`yyMMddHHmmssZ`) values into a date-time.
    pub fn date_time_value(&self) -> Result<PrimitiveDateTime> {
        let text = String::from_utf8(self.value.clone())
            .map_err(|_| Error::MalformedEncoding("non-ASCII byte in time value"))?;
        match self.tag {
            GENERALIZED_TIME => parse_generalized_time(&text),
            UTC_TIME => parse_utc_time(&text),
            tag => Err(Error::InvalidConversion {
                requested: "date-time",
                tag,
            }),
        }
    }
}

/// Decodes a BER length field, returning (length, size of length field).
fn parse_length(data: &[u8], offset: usize) -> Result<(usize, usize)> {
    let first = *data
        .get(offset)
        .ok_or(Error::MalformedEncoding("missing length field"))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    if first == 0x80 {
        return Err(Error::UnsupportedLength("indefinite length"));
    }
    let count = (first & 0x7F) as usize;
    if count > 4 {
        return Err(Error::UnsupportedLength("length field longer than 4 bytes"));
    }
    let mut length = 0usize;
    for i in 0..count {
        let byte = *data
            .get(offset + 1 + i)
            .ok_or(Error::MalformedEncoding("truncated length field"))?;
        length = (length << 8) | byte as usize;
    }
    Ok((length, 1 + count))
}

/// Encodes a value length as a BER length field: one byte short form
/// below 128, `0x80 | n` plus n big-endian bytes otherwise.
fn length_array(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let mut bytes = Vec::new();
    let mut rest = length;
    while rest > 0 {
        bytes.insert(0, (rest & 0xFF) as u8);
        rest >>= 8;
    }
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend_from_slice(&bytes);
    return out;
}

/// BIT STRING content as a bit sequence with the declared unused trailing
/// bits stripped. A single-byte BIT STRING must be all zero and renders
/// empty.
fn bit_string_value(value: &[u8]) -> Result<String> {
    if value.is_empty() {
        return Err(Error::MalformedEncoding("empty BIT STRING value"));
    }
    if value.len() == 1 {
        if value[0] != 0 {
            return Err(Error::MalformedEncoding("single-byte BIT STRING not zero"));
        }
        return Ok(String::new());
    }
    let unused = value[0] as usize;
    let mut bits = helpers::to_bits(&value[1..]);
    if unused > bits.len() {
        return Err(Error::MalformedEncoding("BIT STRING unused bit count too large"));
    }
    bits.truncate(bits.len() - unused);
    Ok(bits)
}

fn utf16_be_value(value: &[u8]) -> Result<String> {
    if value.len() % 2 != 0 {
        return Err(Error::MalformedEncoding("odd-length UTF-16 string value"));
    }
    let units: Vec<u16> = value
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| Error::MalformedEncoding("invalid UTF-16 string value"))
}

fn digits(text: &str, range: std::ops::Range<usize>) -> Result<u32> {
    text.get(range)
        .and_then(|part| part.parse().ok())
        .ok_or(Error::MalformedEncoding("malformed time value"))
}

fn build_date_time(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    micros: u32,
) -> Result<PrimitiveDateTime> {
    let bad = Error::MalformedEncoding("time value out of range");
    let month = Month::try_from(month as u8).map_err(|_| bad.clone())?;
    let date = Date::from_calendar_date(year, month, day as u8).map_err(|_| bad.clone())?;
    let time = Time::from_hms_micro(hour as u8, minute as u8, second as u8, micros)
        .map_err(|_| bad)?;
    Ok(PrimitiveDateTime::new(date, time))
}

/// `yyyyMMddhhmmss.ffffZ` with a fixed four-digit fraction.
pub(crate) fn parse_generalized_time(text: &str) -> Result<PrimitiveDateTime> {
    if text.len() != 20 || !text.ends_with('Z') || text.as_bytes().get(14) != Some(&b'.') {
        return Err(Error::MalformedEncoding("malformed GeneralizedTime value"));
    }
    build_date_time(
        digits(text, 0..4)? as i32,
        digits(text, 4..6)?,
        digits(text, 6..8)?,
        digits(text, 8..10)?,
        digits(text, 10..12)?,
        digits(text, 12..14)?,
        digits(text, 15..19)? * 100,
    )
}

/// `yyMMddHHmmssZ`. Two-digit years below 50 fall in 2000-2049, the rest
/// in 1950-1999.
fn parse_utc_time(text: &str) -> Result<PrimitiveDateTime> {
    if text.len() != 13 || !text.ends_with('Z') {
        return Err(Error::MalformedEncoding("malformed UTCTime value"));
    }
    let year = digits(text, 0..2)?;
    let year = if year < 50 { 2000 + year } else { 1900 + year };
    build_date_time(
        year as i32,
        digits(text, 2..4)?,
        digits(text, 4..6)?,
        digits(text, 6..8)?,
        digits(text, 8..10)?,
        digits(text, 10..12)?,
        0,
    )
}

impl fmt::Display for Asn1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at_depth(f, 0)
    }
}

impl Asn1 {
    fn fmt_at_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "\t".repeat(depth + 1);
        let class = match self.tag_class() {
            0 => "Universal".to_string(),
            1 => "Application".to_string(),
            3 => "Private".to_string(),
            _ => format!("Context {}", self.tag_number()),
        };
        write!(
            f,
            "{}{}{}tag = 0x{:02x} [{}] {}; length = {}",
            indent,
            self.name.as_deref().map(|n| format!("{} ", n)).unwrap_or_default(),
            self.type_label.as_deref().map(|t| format!("{}: ", t)).unwrap_or_default(),
            self.tag,
            class,
            if self.is_constructed() { "constructed" } else { "primitive" },
            self.length,
        )?;
        if self.is_constructed() {
            for child in &self.children {
                writeln!(f)?;
                child.fmt_at_depth(f, depth + 1)?;
            }
            Ok(())
        } else {
            write!(f, "\n{}  {}", indent, helpers::to_hex(&self.value))
        }
    }
}
