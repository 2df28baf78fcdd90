// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! The typed value model
//!
//! A `Value` is a (type, bytes) pair. Numeric values carry the canonical
//! decimal text form used by the MySQL text protocol; construction through
//! [`Value::new`] validates that the bytes parse for the claimed type.

use crate::types::MySqlType;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use proxy_common::{ProxyError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Marker in the escape map for bytes that pass through unescaped.
const DONT_ESCAPE: u8 = 255;

/// How to escape binary data with '\'. Complies to
/// http://dev.mysql.com/doc/refman/5.1/en/string-syntax.html
static SQL_ENCODE_MAP: [u8; 256] = build_sql_encode_map();

const fn build_sql_encode_map() -> [u8; 256] {
    let mut map = [DONT_ESCAPE; 256];
    map[0x00] = b'0';
    map[b'\'' as usize] = b'\'';
    map[b'"' as usize] = b'"';
    map[0x08] = b'b';
    map[0x0A] = b'n';
    map[0x0D] = b'r';
    map[0x09] = b't';
    map[26] = b'Z'; // ctrl-Z
    map[b'\\' as usize] = b'\\';
    map
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value {
    value_type: MySqlType,
    value: Vec<u8>,
}

impl Default for Value {
    fn default() -> Self {
        Value::NULL
    }
}

impl Value {
    pub const NULL: Value = Value {
        value_type: MySqlType::Null,
        value: Vec::new(),
    };

    /// Builds a `Value` after validating that `val` conforms to `typ`.
    pub fn new(typ: MySqlType, val: Vec<u8>) -> Result<Value> {
        if typ.is_signed() {
            parse_i64_base0(std::str::from_utf8(&val).unwrap_or(""))?;
            return Ok(Value::make_trusted(typ, val));
        }
        if typ.is_unsigned() {
            parse_u64_base0(std::str::from_utf8(&val).unwrap_or(""))?;
            return Ok(Value::make_trusted(typ, val));
        }
        if typ.is_float() || typ == MySqlType::Decimal {
            std::str::from_utf8(&val)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or(ProxyError::IncompatibleCast)?;
            return Ok(Value::make_trusted(typ, val));
        }
        if typ.is_quoted() || typ == MySqlType::Bit || typ == MySqlType::Null {
            return Ok(Value::make_trusted(typ, val));
        }
        Err(ProxyError::InvalidType(format!("{typ:?}")))
    }

    /// Builds a `Value` without validation. Callers must know the bytes
    /// conform to the type's rules.
    pub fn make_trusted(typ: MySqlType, val: Vec<u8>) -> Value {
        if typ == MySqlType::Null {
            return Value::NULL;
        }
        Value {
            value_type: typ,
            value: val,
        }
    }

    /// Builds an integral value from text: `Int64` when the value fits
    /// signed, `Uint64` otherwise.
    pub fn new_integral(val: &str) -> Result<Value> {
        if let Ok(signed) = parse_i64_base0(val) {
            return Ok(Value::new_int64(signed));
        }
        let unsigned = parse_u64_base0(val)?;
        Ok(Value::new_uint64(unsigned))
    }

    pub fn new_int8(v: i8) -> Value {
        Value::make_trusted(MySqlType::Int8, v.to_string().into_bytes())
    }

    pub fn new_int32(v: i32) -> Value {
        Value::make_trusted(MySqlType::Int32, v.to_string().into_bytes())
    }

    pub fn new_int64(v: i64) -> Value {
        Value::make_trusted(MySqlType::Int64, v.to_string().into_bytes())
    }

    pub fn new_uint32(v: u32) -> Value {
        Value::make_trusted(MySqlType::Uint32, v.to_string().into_bytes())
    }

    pub fn new_uint64(v: u64) -> Value {
        Value::make_trusted(MySqlType::Uint64, v.to_string().into_bytes())
    }

    pub fn new_float32(v: f32) -> Value {
        Value::make_trusted(MySqlType::Float32, format!("{v}").into_bytes())
    }

    pub fn new_float64(v: f64) -> Value {
        Value::make_trusted(MySqlType::Float64, format!("{v}").into_bytes())
    }

    pub fn new_varchar(v: impl Into<String>) -> Value {
        Value::make_trusted(MySqlType::VarChar, v.into().into_bytes())
    }

    pub fn new_varbinary(v: impl Into<Vec<u8>>) -> Value {
        Value::make_trusted(MySqlType::VarBinary, v.into())
    }

    #[inline]
    pub fn value_type(&self) -> MySqlType {
        self.value_type
    }

    /// The internal byte representation.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.value
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The bytes MySQL would return for this value. `Expression` is not
    /// materialisable and yields empty bytes.
    pub fn to_bytes(&self) -> &[u8] {
        if self.value_type == MySqlType::Expression {
            return &[];
        }
        &self.value
    }

    /// The value as text; `Expression` yields the empty string.
    pub fn to_text(&self) -> String {
        if self.value_type == MySqlType::Expression {
            return String::new();
        }
        String::from_utf8_lossy(&self.value).into_owned()
    }

    pub fn is_null(&self) -> bool {
        self.value_type == MySqlType::Null
    }

    pub fn is_integral(&self) -> bool {
        self.value_type.is_integral()
    }

    pub fn is_signed(&self) -> bool {
        self.value_type.is_signed()
    }

    pub fn is_unsigned(&self) -> bool {
        self.value_type.is_unsigned()
    }

    pub fn is_float(&self) -> bool {
        self.value_type.is_float()
    }

    pub fn is_quoted(&self) -> bool {
        self.value_type.is_quoted()
    }

    pub fn is_text(&self) -> bool {
        self.value_type.is_text()
    }

    pub fn is_binary(&self) -> bool {
        self.value_type.is_binary()
    }

    pub fn is_datetime(&self) -> bool {
        self.value_type.is_datetime()
    }

    pub fn to_i64(&self) -> Result<i64> {
        if !self.is_integral() {
            return Err(ProxyError::IncompatibleCast);
        }
        self.to_text()
            .parse::<i64>()
            .map_err(|_| ProxyError::IncompatibleCast)
    }

    pub fn to_u64(&self) -> Result<u64> {
        if !self.is_integral() {
            return Err(ProxyError::IncompatibleCast);
        }
        self.to_text()
            .parse::<u64>()
            .map_err(|_| ProxyError::IncompatibleCast)
    }

    pub fn to_f64(&self) -> Result<f64> {
        if !self.value_type.is_number() {
            return Err(ProxyError::IncompatibleCast);
        }
        self.to_text()
            .parse::<f64>()
            .map_err(|_| ProxyError::IncompatibleCast)
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self.to_i64()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ProxyError::IncompatibleCast),
        }
    }

    /// Encodes the value into an SQL statement. Can be binary.
    pub fn encode_sql(&self, buf: &mut Vec<u8>) {
        if self.value_type == MySqlType::Null {
            buf.extend_from_slice(b"null");
        } else if self.value_type == MySqlType::Bit {
            // Bit carries the quoted flag but renders as b'...'; check it
            // before the generic quoted path.
            encode_bytes_sql_bits(&self.value, buf);
        } else if self.is_quoted() {
            encode_bytes_sql(&self.value, buf);
        } else {
            buf.extend_from_slice(&self.value);
        }
    }

    /// Encodes the value using 7-bit clean ascii bytes.
    pub fn encode_ascii(&self, buf: &mut Vec<u8>) {
        if self.value_type == MySqlType::Null {
            buf.extend_from_slice(b"null");
        } else if self.is_quoted() || self.value_type == MySqlType::Bit {
            buf.push(b'\'');
            buf.extend_from_slice(BASE64.encode(&self.value).as_bytes());
            buf.push(b'\'');
        } else {
            buf.extend_from_slice(&self.value);
        }
    }

    /// The SQL-literal rendering used by the rewriter.
    pub fn to_sql_string(&self) -> String {
        let mut buf = Vec::with_capacity(self.value.len() + 2);
        self.encode_sql(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value_type == MySqlType::Null {
            return write!(f, "NULL");
        }
        if self.is_quoted() || self.value_type == MySqlType::Bit {
            return write!(
                f,
                "{:?}({:?})",
                self.value_type,
                String::from_utf8_lossy(&self.value)
            );
        }
        write!(
            f,
            "{:?}({})",
            self.value_type,
            String::from_utf8_lossy(&self.value)
        )
    }
}

fn encode_bytes_sql(val: &[u8], buf: &mut Vec<u8>) {
    buf.push(b'\'');
    for &ch in val {
        let encoded = SQL_ENCODE_MAP[ch as usize];
        if encoded == DONT_ESCAPE {
            buf.push(ch);
        } else {
            buf.push(b'\\');
            buf.push(encoded);
        }
    }
    buf.push(b'\'');
}

fn encode_bytes_sql_bits(val: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"b'");
    for &ch in val {
        for bit in (0..8).rev() {
            buf.push(if ch >> bit & 1 == 1 { b'1' } else { b'0' });
        }
    }
    buf.push(b'\'');
}

/// Parses signed integer text in base 0: decimal, `0x` hex, `0o`/leading-zero
/// octal, `0b` binary, optional sign. The MySQL literal convention.
pub fn parse_i64_base0(s: &str) -> Result<i64> {
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = parse_magnitude_base0(digits)?;
    if negative {
        if magnitude > i64::MAX as u64 + 1 {
            return Err(ProxyError::IncompatibleCast);
        }
        Ok((magnitude as i128).wrapping_neg() as i64)
    } else {
        if magnitude > i64::MAX as u64 {
            return Err(ProxyError::IncompatibleCast);
        }
        Ok(magnitude as i64)
    }
}

/// Unsigned variant of [`parse_i64_base0`]; a sign is rejected.
pub fn parse_u64_base0(s: &str) -> Result<u64> {
    let digits = match s.as_bytes().first() {
        Some(b'+') => &s[1..],
        Some(b'-') => return Err(ProxyError::IncompatibleCast),
        _ => s,
    };
    parse_magnitude_base0(digits)
}

fn parse_magnitude_base0(digits: &str) -> Result<u64> {
    let (radix, rest) = if let Some(hex) = digits.strip_prefix("0x").or(digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if let Some(oct) = digits.strip_prefix("0o").or(digits.strip_prefix("0O")) {
        (8, oct)
    } else if let Some(bin) = digits.strip_prefix("0b").or(digits.strip_prefix("0B")) {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    u64::from_str_radix(rest, radix).map_err(|_| ProxyError::IncompatibleCast)
}

// JSON support exists for tests only; it is not a complete implementation.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.is_quoted() || self.value_type == MySqlType::Bit {
            return serializer.serialize_str(&self.to_text());
        }
        match self.value_type {
            MySqlType::Null => serializer.serialize_unit(),
            t if t.is_signed() => serializer
                .serialize_i64(self.to_i64().map_err(serde::ser::Error::custom)?),
            t if t.is_unsigned() => serializer
                .serialize_u64(self.to_u64().map_err(serde::ser::Error::custom)?),
            _ => serializer.serialize_f64(self.to_f64().map_err(serde::ser::Error::custom)?),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a MySQL value")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::new_int64(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::new_uint64(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::new_float64(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::new_varbinary(v.as_bytes().to_vec()))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::NULL)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::NULL)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(v: &Value) -> String {
        v.to_sql_string()
    }

    #[test]
    fn test_new_validates_integrals() {
        assert!(Value::new(MySqlType::Int64, b"123".to_vec()).is_ok());
        assert!(Value::new(MySqlType::Int64, b"-123".to_vec()).is_ok());
        assert!(Value::new(MySqlType::Int64, b"0x1f".to_vec()).is_ok());
        assert!(Value::new(MySqlType::Int64, b"0755".to_vec()).is_ok());
        assert!(Value::new(MySqlType::Int64, b"abc".to_vec()).is_err());
        assert!(Value::new(MySqlType::Uint64, b"-1".to_vec()).is_err());
        assert!(Value::new(MySqlType::Float64, b"1.5e3".to_vec()).is_ok());
        assert!(Value::new(MySqlType::Float64, b"nope".to_vec()).is_err());
        assert!(Value::new(MySqlType::Expression, b"x".to_vec()).is_err());
    }

    #[test]
    fn test_round_trip_raw() {
        let v = Value::new(MySqlType::VarChar, b"hello".to_vec()).unwrap();
        let again = Value::new(v.value_type(), v.raw().to_vec()).unwrap();
        assert_eq!(again.raw(), v.raw());
        assert_eq!(again, v);
    }

    #[test]
    fn test_new_integral_prefers_signed() {
        let v = Value::new_integral("42").unwrap();
        assert_eq!(v.value_type(), MySqlType::Int64);
        let v = Value::new_integral("-42").unwrap();
        assert_eq!(v.value_type(), MySqlType::Int64);
        let v = Value::new_integral("18446744073709551615").unwrap();
        assert_eq!(v.value_type(), MySqlType::Uint64);
        assert!(Value::new_integral("99999999999999999999").is_err());
    }

    #[test]
    fn test_base0_parsing() {
        assert_eq!(parse_i64_base0("0x10").unwrap(), 16);
        assert_eq!(parse_i64_base0("-0x10").unwrap(), -16);
        assert_eq!(parse_i64_base0("010").unwrap(), 8);
        assert_eq!(parse_i64_base0("0b101").unwrap(), 5);
        assert_eq!(parse_i64_base0("0o17").unwrap(), 15);
        assert_eq!(parse_i64_base0("0").unwrap(), 0);
        assert_eq!(parse_i64_base0("-9223372036854775808").unwrap(), i64::MIN);
        assert!(parse_i64_base0("9223372036854775808").is_err());
        assert_eq!(parse_u64_base0("18446744073709551615").unwrap(), u64::MAX);
        assert!(parse_u64_base0("-1").is_err());
    }

    #[test]
    fn test_encode_sql_plain_string() {
        let v = Value::new_varchar("safe string");
        assert_eq!(sql(&v), "'safe string'");
    }

    #[test]
    fn test_encode_sql_escapes() {
        let v = Value::new_varchar("O'Brien\n");
        assert_eq!(sql(&v), r"'O\'Brien\n'");

        let v = Value::new_varbinary(vec![0x00, b'"', 0x08, 0x09, 0x0D, 0x1A, b'\\']);
        assert_eq!(sql(&v), r#"'\0\"\b\t\r\Z\\'"#);
    }

    #[test]
    fn test_escape_map_covers_exactly_nine_bytes() {
        let escaped: Vec<usize> = (0..256usize)
            .filter(|&b| SQL_ENCODE_MAP[b] != DONT_ESCAPE)
            .collect();
        assert_eq!(
            escaped,
            vec![
                0x00,
                0x08,
                0x09,
                0x0A,
                0x0D,
                0x1A,
                b'"' as usize,
                b'\'' as usize,
                b'\\' as usize
            ]
        );
    }

    #[test]
    fn test_encode_sql_every_unescaped_byte_is_literal() {
        for b in 0..=255u8 {
            if SQL_ENCODE_MAP[b as usize] != DONT_ESCAPE {
                continue;
            }
            let v = Value::new_varbinary(vec![b]);
            let mut out = Vec::new();
            v.encode_sql(&mut out);
            assert_eq!(out, vec![b'\'', b, b'\'']);
        }
    }

    #[test]
    fn test_encode_sql_bit() {
        let v = Value::make_trusted(MySqlType::Bit, vec![0b1010_0001, 0x01]);
        assert_eq!(sql(&v), "b'1010000100000001'");
    }

    #[test]
    fn test_encode_sql_null_and_numeric() {
        assert_eq!(sql(&Value::NULL), "null");
        assert_eq!(sql(&Value::new_int64(-7)), "-7");
        assert_eq!(sql(&Value::new_float64(1.5)), "1.5");
    }

    #[test]
    fn test_encode_ascii() {
        let v = Value::new_varchar("abc");
        let mut out = Vec::new();
        v.encode_ascii(&mut out);
        assert_eq!(out, b"'YWJj'");

        let mut out = Vec::new();
        Value::NULL.encode_ascii(&mut out);
        assert_eq!(out, b"null");

        let mut out = Vec::new();
        Value::new_int64(12).encode_ascii(&mut out);
        assert_eq!(out, b"12");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::new_int64(-5).to_i64().unwrap(), -5);
        assert_eq!(Value::new_uint64(5).to_u64().unwrap(), 5);
        assert_eq!(Value::new_float64(2.5).to_f64().unwrap(), 2.5);
        assert!(Value::new_varchar("5").to_i64().is_err());
        assert!(Value::new_float64(1.0).to_i64().is_err());
        assert!(!Value::new_int64(0).to_bool().unwrap());
        assert!(Value::new_int64(1).to_bool().unwrap());
        assert!(Value::new_int64(2).to_bool().is_err());
    }

    #[test]
    fn test_expression_is_empty() {
        let v = Value::make_trusted(MySqlType::Expression, b"a + b".to_vec());
        assert_eq!(v.to_bytes(), b"");
        assert_eq!(v.to_text(), "");
    }

    #[test]
    fn test_json_round_trip() {
        let cases = vec![
            Value::new_int64(-12),
            Value::new_uint64(12),
            Value::NULL,
            Value::new_varbinary(b"bytes".to_vec()),
        ];
        for v in cases {
            let encoded = serde_json::to_string(&v).unwrap();
            let decoded: Value = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded.to_bytes(), v.to_bytes());
        }
        // Positive integers decode as unsigned, negative as signed.
        let decoded: Value = serde_json::from_str("12").unwrap();
        assert_eq!(decoded.value_type(), MySqlType::Uint64);
        let decoded: Value = serde_json::from_str("-12").unwrap();
        assert_eq!(decoded.value_type(), MySqlType::Int64);
        let decoded: Value = serde_json::from_str("null").unwrap();
        assert!(decoded.is_null());
        let decoded: Value = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(decoded.value_type(), MySqlType::VarBinary);
    }
}
