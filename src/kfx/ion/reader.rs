//! Binary Ion decoding.
//!
//! Each value starts with a one byte type descriptor: the high nibble is the
//! type code, the low nibble is either the payload length, `14` (a VarUInt
//! length follows) or `15` (typed null).

use num_bigint::{BigInt, Sign};

use super::IonError;
use super::cursor::{Cursor, NULL_NIBBLE, VAR_LEN};
use super::decimal::Decimal;
use super::timestamp::Timestamp;
use super::value::{IonData, IonStruct, IonType, IonValue, SymbolId};

/// Ion 1.0 binary version marker.
pub const ION_BVM: [u8; 4] = [0xe0, 0x01, 0x00, 0xea];

const ANNOTATION: u8 = 14;
const RESERVED: u8 = 15;

/// Containers nested deeper than this are rejected rather than recursed into.
const MAX_DEPTH: usize = 256;

/// Reads top-level values from a BVM-prefixed stream.
pub struct IonReader<'a> {
    cur: Cursor<'a>,
}

impl<'a> IonReader<'a> {
    /// Start reading after the leading version marker.
    pub fn new(data: &'a [u8]) -> Result<Self, IonError> {
        let mut cur = Cursor::new(data);
        expect_bvm(&mut cur)?;
        Ok(Self { cur })
    }

    /// Next top-level value, or `None` at the end of the stream.
    ///
    /// Version markers between values are consumed, NOP pads are skipped.
    pub fn next_value(&mut self) -> Result<Option<IonValue>, IonError> {
        loop {
            match self.cur.peek_u8() {
                None => return Ok(None),
                Some(0xe0) => expect_bvm(&mut self.cur)?,
                Some(_) => {
                    if let Some(value) = read_at(&mut self.cur, 0)? {
                        return Ok(Some(value));
                    }
                }
            }
        }
    }
}

/// Decode every top-level value of a BVM-prefixed stream.
pub fn read_value_stream(data: &[u8]) -> Result<Vec<IonValue>, IonError> {
    let mut reader = IonReader::new(data)?;
    let mut values = Vec::new();
    while let Some(value) = reader.next_value()? {
        values.push(value);
    }
    Ok(values)
}

/// Decode one value at the cursor. Returns `None` for a NOP pad.
pub fn read_value(cur: &mut Cursor<'_>) -> Result<Option<IonValue>, IonError> {
    read_at(cur, 0)
}

fn expect_bvm(cur: &mut Cursor<'_>) -> Result<(), IonError> {
    let offset = cur.offset();
    match cur.read_bytes(ION_BVM.len()) {
        Ok(marker) if marker == ION_BVM => Ok(()),
        _ => Err(IonError::BadVersionMarker { offset }),
    }
}

fn read_at(cur: &mut Cursor<'_>, depth: usize) -> Result<Option<IonValue>, IonError> {
    let offset = cur.offset();
    let descriptor = cur.read_u8()?;
    let code = descriptor >> 4;
    let nibble = descriptor & 0x0f;

    match code {
        0 if nibble == NULL_NIBBLE => Ok(Some(IonValue::new(IonData::Null(IonType::Null)))),
        0 => {
            let len = cur.read_length(nibble)?;
            cur.skip(len)?;
            Ok(None)
        }
        1 => match nibble {
            0 => Ok(Some(IonValue::new(IonData::Bool(false)))),
            1 => Ok(Some(IonValue::new(IonData::Bool(true)))),
            NULL_NIBBLE => Ok(Some(IonValue::new(IonData::Null(IonType::Bool)))),
            _ => Err(IonError::malformed(
                offset,
                "bool",
                format!("length nibble {nibble}"),
            )),
        },
        ANNOTATION => read_annotated(cur, offset, nibble, depth).map(Some),
        RESERVED => Err(IonError::ReservedType { offset, descriptor }),
        _ => {
            // codes 2..=13 all map to a type
            let Some(ion_type) = IonType::from_code(code) else {
                return Err(IonError::ReservedType { offset, descriptor });
            };
            if nibble == NULL_NIBBLE {
                return Ok(Some(IonValue::new(IonData::Null(ion_type))));
            }
            read_typed(cur, offset, code, nibble, depth).map(|data| Some(IonValue::new(data)))
        }
    }
}

fn read_typed(
    cur: &mut Cursor<'_>,
    offset: usize,
    code: u8,
    nibble: u8,
    depth: usize,
) -> Result<IonData, IonError> {
    if code == 13 && nibble == 1 {
        return read_sorted_struct(cur, offset, depth);
    }
    let mut payload = cur.take_declared(nibble)?;

    let data = match code {
        2 => {
            let magnitude = payload.read_big_uint(payload.remaining())?;
            IonData::Int(BigInt::from_biguint(Sign::Plus, magnitude))
        }
        3 => {
            if nibble == 0 {
                return Err(IonError::malformed(offset, "int", "negative int without magnitude"));
            }
            let magnitude = payload.read_big_uint(payload.remaining())?;
            if magnitude.bits() == 0 {
                return Err(IonError::malformed(offset, "int", "negative zero"));
            }
            IonData::Int(BigInt::from_biguint(Sign::Minus, magnitude))
        }
        4 => IonData::Float(read_float(&mut payload, offset, nibble)?),
        5 => {
            if payload.is_empty() {
                IonData::Decimal(Decimal::zero())
            } else {
                let (coefficient, negative, exponent) = payload.read_decimal_parts()?;
                IonData::Decimal(Decimal::new(negative, coefficient, exponent))
            }
        }
        6 => IonData::Timestamp(Timestamp::decode(&mut payload)?),
        7 => {
            let sid: SymbolId = payload.read_uint(payload.remaining())?;
            IonData::Symbol(sid)
        }
        8 => {
            let bytes = payload.read_bytes(payload.remaining())?;
            let text = std::str::from_utf8(bytes)
                .map_err(|_| IonError::InvalidUtf8 { offset })?;
            IonData::String(text.to_owned())
        }
        9 => IonData::Clob(payload.read_bytes(payload.remaining())?.to_vec()),
        10 => IonData::Blob(payload.read_bytes(payload.remaining())?.to_vec()),
        11 => IonData::List(read_sequence(&mut payload, offset, depth)?),
        12 => IonData::Sexp(read_sequence(&mut payload, offset, depth)?),
        13 => IonData::Struct(IonStruct {
            fields: read_fields(&mut payload, offset, depth)?,
            sorted: false,
        }),
        _ => {
            return Err(IonError::ReservedType {
                offset,
                descriptor: (code << 4) | nibble,
            });
        }
    };
    Ok(data)
}

fn read_float(payload: &mut Cursor<'_>, offset: usize, nibble: u8) -> Result<f64, IonError> {
    match nibble {
        0 => Ok(0.0),
        4 => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(payload.read_bytes(4)?);
            Ok(f64::from(f32::from_be_bytes(bytes)))
        }
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(payload.read_bytes(8)?);
            Ok(f64::from_be_bytes(bytes))
        }
        _ => Err(IonError::malformed(
            offset,
            "float",
            format!("length {nibble}"),
        )),
    }
}

/// `0xD1`: a struct whose fields are sorted by ID, length as a VarUInt.
fn read_sorted_struct(
    cur: &mut Cursor<'_>,
    offset: usize,
    depth: usize,
) -> Result<IonData, IonError> {
    let mut payload = cur.take_declared(VAR_LEN)?;
    if payload.is_empty() {
        return Err(IonError::malformed(offset, "struct", "empty sorted struct"));
    }
    // a sorted struct of NOP pads has no fields left to be sorted
    let fields = read_fields(&mut payload, offset, depth)?;
    let sorted = !fields.is_empty();
    Ok(IonData::Struct(IonStruct { fields, sorted }))
}

fn enter(offset: usize, depth: usize) -> Result<usize, IonError> {
    if depth >= MAX_DEPTH {
        return Err(IonError::malformed(offset, "container", "nesting too deep"));
    }
    Ok(depth + 1)
}

fn read_sequence(
    payload: &mut Cursor<'_>,
    offset: usize,
    depth: usize,
) -> Result<Vec<IonValue>, IonError> {
    let depth = enter(offset, depth)?;
    let mut items = Vec::new();
    while !payload.is_empty() {
        if let Some(value) = read_at(payload, depth)? {
            items.push(value);
        }
    }
    Ok(items)
}

fn read_fields(
    payload: &mut Cursor<'_>,
    offset: usize,
    depth: usize,
) -> Result<Vec<(SymbolId, IonValue)>, IonError> {
    let depth = enter(offset, depth)?;
    let mut fields = Vec::new();
    while !payload.is_empty() {
        let field = payload.read_var_uint()?;
        // a field whose value is a NOP pad is padding as well
        if let Some(value) = read_at(payload, depth)? {
            fields.push((field, value));
        }
    }
    Ok(fields)
}

fn read_annotated(
    cur: &mut Cursor<'_>,
    offset: usize,
    nibble: u8,
    depth: usize,
) -> Result<IonValue, IonError> {
    match nibble {
        0 => return Err(IonError::BadVersionMarker { offset }),
        1 | 2 => {
            return Err(IonError::malformed(
                offset,
                "annotation wrapper",
                format!("length {nibble} too short"),
            ));
        }
        NULL_NIBBLE => {
            return Err(IonError::malformed(offset, "annotation wrapper", "null annotation wrapper"));
        }
        _ => {}
    }

    let mut payload = cur.take_declared(nibble)?;
    let annot_len = payload.read_length(VAR_LEN)?;
    if annot_len == 0 {
        return Err(IonError::malformed(offset, "annotation wrapper", "no annotations"));
    }
    let mut ids = payload.take(annot_len)?;
    let mut annotations = Vec::new();
    while !ids.is_empty() {
        annotations.push(ids.read_var_uint()?);
    }

    match payload.peek_u8() {
        None => {
            return Err(IonError::malformed(offset, "annotation wrapper", "missing wrapped value"));
        }
        Some(b) if b >> 4 == ANNOTATION => {
            return Err(IonError::malformed(
                offset,
                "annotation wrapper",
                "wraps another annotation wrapper",
            ));
        }
        Some(_) => {}
    }

    let Some(value) = read_at(&mut payload, depth)? else {
        return Err(IonError::malformed(offset, "annotation wrapper", "wraps a NOP pad"));
    };
    if !payload.is_empty() {
        return Err(IonError::malformed(
            offset,
            "annotation wrapper",
            format!("{} bytes after wrapped value", payload.remaining()),
        ));
    }
    Ok(value.with_annotations(annotations))
}
