//! Binary re-encoding of decoded values.
//!
//! This is not a general Ion encoder: it emits trees that came out of the
//! reader (possibly with symbol IDs rewritten), so it only has to produce
//! one valid encoding for each node.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

use super::cursor::VAR_LEN;
use super::decimal::Decimal;
use super::reader::ION_BVM;
use super::timestamp::{Precision, Timestamp};
use super::value::{IonData, IonStruct, IonValue};

/// Accumulates an Ion binary stream.
#[derive(Debug, Default)]
pub struct IonWriter {
    buf: Vec<u8>,
}

impl IonWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bvm(&mut self) {
        self.buf.extend_from_slice(&ION_BVM);
    }

    pub fn write_value(&mut self, value: &IonValue) {
        let encoded = encode_value(value);
        self.buf.extend_from_slice(&encoded);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Type descriptor for a payload of `len` bytes.
    pub fn write_header(out: &mut Vec<u8>, code: u8, len: usize) {
        if len < usize::from(VAR_LEN) {
            out.push((code << 4) | len as u8);
        } else {
            out.push((code << 4) | VAR_LEN);
            write_var_uint(out, len as u64);
        }
    }
}

/// BVM followed by `values`.
pub fn encode_stream(values: &[IonValue]) -> Vec<u8> {
    let mut writer = IonWriter::new();
    writer.write_bvm();
    for value in values {
        writer.write_value(value);
    }
    writer.into_bytes()
}

pub fn write_var_uint(out: &mut Vec<u8>, value: u64) {
    let mut groups = [0u8; 10];
    let mut n = 0;
    let mut v = value;
    loop {
        groups[n] = (v & 0x7f) as u8;
        n += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let stop = if i == 0 { 0x80 } else { 0 };
        out.push(groups[i] | stop);
    }
}

/// VarInt from magnitude and sign. The first byte holds six magnitude bits.
pub fn write_var_int(out: &mut Vec<u8>, magnitude: u64, negative: bool) {
    let mut groups = [0u8; 11];
    let mut n = 0;
    let mut v = magnitude;
    loop {
        groups[n] = (v & 0x7f) as u8;
        n += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    // the leading group must leave room for the sign bit
    if groups[n - 1] & 0x40 != 0 {
        groups[n] = 0;
        n += 1;
    }
    for i in (0..n).rev() {
        let mut byte = groups[i];
        if i == n - 1 && negative {
            byte |= 0x40;
        }
        if i == 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Sign-magnitude Int bytes. Zero is empty unless negative.
fn int_bytes(magnitude: &BigUint, negative: bool) -> Vec<u8> {
    if magnitude.is_zero() {
        return if negative { vec![0x80] } else { Vec::new() };
    }
    let mut bytes = magnitude.to_bytes_be();
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    if negative {
        bytes[0] |= 0x80;
    }
    bytes
}

fn with_header(code: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    IonWriter::write_header(&mut out, code, payload.len());
    out.extend_from_slice(&payload);
    out
}

fn encode_value(value: &IonValue) -> Vec<u8> {
    let body = encode_data(&value.data);
    if value.annotations.is_empty() {
        return body;
    }
    let mut ids = Vec::new();
    for &id in &value.annotations {
        write_var_uint(&mut ids, id);
    }
    let mut payload = Vec::with_capacity(ids.len() + body.len() + 2);
    write_var_uint(&mut payload, ids.len() as u64);
    payload.extend_from_slice(&ids);
    payload.extend_from_slice(&body);
    with_header(14, payload)
}

fn encode_data(data: &IonData) -> Vec<u8> {
    match data {
        IonData::Null(t) => vec![(t.type_code() << 4) | 0x0f],
        IonData::Bool(b) => vec![0x10 | u8::from(*b)],
        IonData::Int(i) => encode_int(i),
        IonData::Float(f) => {
            if *f == 0.0 && f.is_sign_positive() {
                vec![0x40]
            } else {
                let mut out = vec![0x48];
                out.extend_from_slice(&f.to_be_bytes());
                out
            }
        }
        IonData::Decimal(d) => encode_decimal(d),
        IonData::Timestamp(ts) => with_header(6, timestamp_payload(ts)),
        IonData::Symbol(0) => vec![0x70],
        IonData::Symbol(sid) => {
            let bytes = sid.to_be_bytes();
            let skip = bytes.iter().take_while(|&&b| b == 0).count();
            with_header(7, bytes[skip..].to_vec())
        }
        IonData::String(s) => with_header(8, s.as_bytes().to_vec()),
        IonData::Clob(b) => with_header(9, b.clone()),
        IonData::Blob(b) => with_header(10, b.clone()),
        IonData::List(items) => with_header(11, items.iter().flat_map(encode_value).collect()),
        IonData::Sexp(items) => with_header(12, items.iter().flat_map(encode_value).collect()),
        IonData::Struct(s) => encode_struct(s),
    }
}

fn encode_int(i: &BigInt) -> Vec<u8> {
    let (sign, magnitude) = i.to_bytes_be();
    match sign {
        Sign::NoSign => vec![0x20],
        Sign::Plus => with_header(2, magnitude),
        Sign::Minus => with_header(3, magnitude),
    }
}

fn encode_decimal(d: &Decimal) -> Vec<u8> {
    if d.is_zero() && !d.negative && d.exponent == 0 {
        return vec![0x50];
    }
    let mut payload = Vec::new();
    write_var_int(&mut payload, u64::from(d.exponent.unsigned_abs()), d.exponent < 0);
    payload.extend(int_bytes(&d.coefficient, d.negative));
    with_header(5, payload)
}

fn timestamp_payload(ts: &Timestamp) -> Vec<u8> {
    let mut out = Vec::new();
    match ts.offset {
        None => write_var_int(&mut out, 0, true),
        Some(m) => write_var_int(&mut out, u64::from(m.unsigned_abs()), m < 0),
    }
    write_var_uint(&mut out, u64::from(ts.year));
    if ts.precision >= Precision::Month {
        write_var_uint(&mut out, u64::from(ts.month));
    }
    if ts.precision >= Precision::Day {
        write_var_uint(&mut out, u64::from(ts.day));
    }
    if ts.precision >= Precision::Minute {
        write_var_uint(&mut out, u64::from(ts.hour));
        write_var_uint(&mut out, u64::from(ts.minute));
    }
    if ts.precision >= Precision::Second {
        write_var_uint(&mut out, u64::from(ts.second));
    }
    if let Some(fraction) = &ts.fraction {
        write_var_int(
            &mut out,
            u64::from(fraction.exponent.unsigned_abs()),
            fraction.exponent < 0,
        );
        out.extend(int_bytes(&fraction.coefficient, false));
    }
    out
}

fn encode_struct(s: &IonStruct) -> Vec<u8> {
    let mut payload = Vec::new();
    for (field, value) in &s.fields {
        write_var_uint(&mut payload, *field);
        payload.extend(encode_value(value));
    }
    if s.sorted && !payload.is_empty() {
        let mut out = vec![0xd1];
        write_var_uint(&mut out, payload.len() as u64);
        out.extend_from_slice(&payload);
        out
    } else {
        with_header(13, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kfx::ion::reader::read_value_stream;
    use crate::kfx::ion::value::IonType;

    fn encoded(value: IonValue) -> Vec<u8> {
        let mut w = IonWriter::new();
        w.write_value(&value);
        w.into_bytes()
    }

    #[test]
    fn test_var_uint_bytes() {
        let mut out = Vec::new();
        write_var_uint(&mut out, 0);
        write_var_uint(&mut out, 127);
        write_var_uint(&mut out, 598);
        assert_eq!(out, vec![0x80, 0xff, 0x04, 0xd6]);
    }

    #[test]
    fn test_var_int_bytes() {
        let mut out = Vec::new();
        write_var_int(&mut out, 0, true);
        assert_eq!(out, vec![0xc0]);

        out.clear();
        write_var_int(&mut out, 420, true);
        assert_eq!(out, vec![0x43, 0xa4]);

        // 64 needs a second byte to keep the sign bit free
        out.clear();
        write_var_int(&mut out, 64, false);
        assert_eq!(out, vec![0x00, 0xc0]);
    }

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(encoded(IonData::Int(BigInt::from(0)).into()), vec![0x20]);
        assert_eq!(encoded(IonData::Int(BigInt::from(-42)).into()), vec![0x31, 0x2a]);
        assert_eq!(encoded(IonData::Symbol(0).into()), vec![0x70]);
        assert_eq!(encoded(IonData::Symbol(598).into()), vec![0x72, 0x02, 0x56]);
        assert_eq!(encoded(IonData::Null(IonType::Struct).into()), vec![0xdf]);
        assert_eq!(encoded(IonData::Null(IonType::Null).into()), vec![0x0f]);
        assert_eq!(encoded(IonData::Decimal(Decimal::zero()).into()), vec![0x50]);
        assert_eq!(
            encoded(IonData::Decimal(Decimal::new(true, BigUint::zero(), 0)).into()),
            vec![0x52, 0x80, 0x80]
        );
    }

    #[test]
    fn test_annotation_wrapper() {
        let value = IonValue::new(IonData::Symbol(11)).with_annotations(vec![598]);
        assert_eq!(encoded(value), vec![0xe5, 0x82, 0x04, 0xd6, 0x71, 0x0b]);
    }

    #[test]
    fn test_long_payload_uses_var_length() {
        let text = "a".repeat(200);
        let bytes = encoded(IonData::String(text.clone()).into());
        assert_eq!(&bytes[..3], &[0x8e, 0x01, 0xc8]);
        let mut stream = ION_BVM.to_vec();
        stream.extend_from_slice(&bytes);
        assert_eq!(read_value_stream(&stream).unwrap()[0].as_str(), Some(text.as_str()));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let payloads: [&[u8]; 4] = [
            &[0x63, 0xc0, 0x0f, 0xe0],
            &[0x68, 0x43, 0xa4, 0x0f, 0xe0, 0x82, 0x82, 0x87, 0x80],
            &[0x6b, 0x43, 0xa4, 0x0f, 0xe0, 0x82, 0x82, 0x87, 0x80, 0x9e, 0xc3, 0x01],
            &[0x6c, 0x43, 0xa4, 0x0f, 0xe0, 0x82, 0x82, 0x87, 0x80, 0x9e, 0xc6, 0x03, 0xe8],
        ];
        for payload in payloads {
            let mut stream = ION_BVM.to_vec();
            stream.extend_from_slice(payload);
            let values = read_value_stream(&stream).unwrap();
            assert_eq!(encode_stream(&values), stream);
        }
    }

    #[test]
    fn test_sorted_struct_keeps_marker() {
        let value = IonValue::new(IonData::Struct(IonStruct {
            fields: vec![(10, IonData::Int(BigInt::from(1)).into())],
            sorted: true,
        }));
        assert_eq!(encoded(value), vec![0xd1, 0x83, 0x8a, 0x21, 0x01]);
    }
}
