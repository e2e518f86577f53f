//! Bounded byte cursor and Ion's integer primitives.
//!
//! Every reader consumes exactly the bytes of its own field. Type payloads
//! are decoded from sub-cursors created with [`Cursor::take`] or
//! [`Cursor::take_declared`], so a malformed length can never make a reader
//! run into the next value.

use num_bigint::BigUint;
use num_traits::Zero;

use super::IonError;

/// Length nibble announcing that a VarUInt length follows the descriptor.
pub const VAR_LEN: u8 = 14;

/// Length nibble marking a typed null.
pub const NULL_NIBBLE: u8 = 15;

/// Read position over a borrowed byte span.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    /// Absolute offset of `data[0]`, for error reporting.
    base: usize,
}

impl<'a> Cursor<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }

    /// Absolute offset of the next unread byte.
    #[inline]
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Unread bytes, without consuming them.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, IonError> {
        let byte = self.peek_u8().ok_or(IonError::Truncated {
            offset: self.offset(),
            what: "byte",
        })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read exactly `len` bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], IonError> {
        if len > self.remaining() {
            return Err(IonError::Truncated {
                offset: self.offset(),
                what: "field",
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), IonError> {
        self.read_bytes(len).map(|_| ())
    }

    /// Split off the next `len` bytes as an independent, bounded cursor.
    pub fn take(&mut self, len: usize) -> Result<Cursor<'a>, IonError> {
        let base = self.offset();
        let data = self.read_bytes(len)?;
        Ok(Cursor { data, pos: 0, base })
    }

    /// Resolve a descriptor length nibble: `14` means a VarUInt length follows.
    pub fn read_length(&mut self, nibble: u8) -> Result<usize, IonError> {
        if nibble == VAR_LEN {
            let offset = self.offset();
            let len = self.read_var_uint()?;
            usize::try_from(len).map_err(|_| IonError::Overflow {
                offset,
                what: "length",
                target: "usize",
            })
        } else {
            Ok(usize::from(nibble))
        }
    }

    /// Sub-cursor over a payload whose length is given by `nibble`.
    pub fn take_declared(&mut self, nibble: u8) -> Result<Cursor<'a>, IonError> {
        let len = self.read_length(nibble)?;
        self.take(len)
    }

    // --- VarUInt / VarInt ---

    /// Read a VarUInt into a `u64` (7 bits per byte, high bit marks the last byte).
    pub fn read_var_uint(&mut self) -> Result<u64, IonError> {
        let start = self.offset();
        let mut value: u64 = 0;
        loop {
            let byte = self.stop_bit_byte(start, "VarUInt")?;
            if value >> 57 != 0 {
                return Err(IonError::Overflow {
                    offset: start,
                    what: "VarUInt",
                    target: "u64",
                });
            }
            value = (value << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 != 0 {
                return Ok(value);
            }
        }
    }

    pub fn read_var_uint32(&mut self) -> Result<u32, IonError> {
        let start = self.offset();
        let value = self.read_var_uint()?;
        u32::try_from(value).map_err(|_| IonError::Overflow {
            offset: start,
            what: "VarUInt",
            target: "u32",
        })
    }

    /// Read a VarUInt of any size.
    pub fn read_var_big_uint(&mut self) -> Result<BigUint, IonError> {
        let start = self.offset();
        let mut value = BigUint::zero();
        loop {
            let byte = self.stop_bit_byte(start, "VarUInt")?;
            value = (value << 7u32) | BigUint::from(byte & 0x7f);
            if byte & 0x80 != 0 {
                return Ok(value);
            }
        }
    }

    /// Read a VarInt as magnitude and sign, keeping negative zero visible.
    pub fn read_var_int_parts(&mut self) -> Result<(u64, bool), IonError> {
        let start = self.offset();
        let first = self.stop_bit_byte(start, "VarInt")?;
        let negative = first & 0x40 != 0;
        let mut magnitude = u64::from(first & 0x3f);
        if first & 0x80 != 0 {
            return Ok((magnitude, negative));
        }
        loop {
            let byte = self.stop_bit_byte(start, "VarInt")?;
            if magnitude >> 57 != 0 {
                return Err(IonError::Overflow {
                    offset: start,
                    what: "VarInt",
                    target: "u64",
                });
            }
            magnitude = (magnitude << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 != 0 {
                return Ok((magnitude, negative));
            }
        }
    }

    pub fn read_var_int(&mut self) -> Result<i64, IonError> {
        let start = self.offset();
        let (magnitude, negative) = self.read_var_int_parts()?;
        signed(magnitude, negative).ok_or(IonError::Overflow {
            offset: start,
            what: "VarInt",
            target: "i64",
        })
    }

    pub fn read_var_int32(&mut self) -> Result<i32, IonError> {
        let start = self.offset();
        let value = self.read_var_int()?;
        i32::try_from(value).map_err(|_| IonError::Overflow {
            offset: start,
            what: "VarInt",
            target: "i32",
        })
    }

    // --- UInt / Int (fixed length) ---

    /// Read a big-endian UInt of `len` bytes into a `u64`.
    pub fn read_uint(&mut self, len: usize) -> Result<u64, IonError> {
        let start = self.offset();
        let bytes = self.read_bytes(len)?;
        fold_be(bytes).ok_or(IonError::Overflow {
            offset: start,
            what: "UInt",
            target: "u64",
        })
    }

    pub fn read_big_uint(&mut self, len: usize) -> Result<BigUint, IonError> {
        Ok(BigUint::from_bytes_be(self.read_bytes(len)?))
    }

    /// Read a sign-magnitude Int of `len` bytes.
    ///
    /// The flag is true only for negative zero, which has no `i64` spelling.
    pub fn read_int(&mut self, len: usize) -> Result<(i64, bool), IonError> {
        let start = self.offset();
        let (magnitude, negative) = self.read_big_int_parts(len)?;
        let overflow = IonError::Overflow {
            offset: start,
            what: "Int",
            target: "i64",
        };
        let magnitude = u64::try_from(magnitude).map_err(|_| overflow.clone())?;
        let value = signed(magnitude, negative).ok_or(overflow)?;
        Ok((value, negative && magnitude == 0))
    }

    /// Read a sign-magnitude Int of `len` bytes as magnitude and sign.
    pub fn read_big_int_parts(&mut self, len: usize) -> Result<(BigUint, bool), IonError> {
        let bytes = self.read_bytes(len)?;
        let Some((&first, tail)) = bytes.split_first() else {
            return Ok((BigUint::zero(), false));
        };
        let negative = first & 0x80 != 0;
        let mut magnitude = Vec::with_capacity(bytes.len());
        magnitude.push(first & 0x7f);
        magnitude.extend_from_slice(tail);
        Ok((BigUint::from_bytes_be(&magnitude), negative))
    }

    /// Read the rest of this cursor as decimal components:
    /// a VarInt exponent followed by a sign-magnitude coefficient.
    ///
    /// Returns `(coefficient, negative, exponent)`.
    pub fn read_decimal_parts(&mut self) -> Result<(BigUint, bool, i32), IonError> {
        let exponent = self.read_var_int32()?;
        let (coefficient, negative) = self.read_big_int_parts(self.remaining())?;
        Ok((coefficient, negative, exponent))
    }

    #[inline]
    fn stop_bit_byte(&mut self, start: usize, what: &'static str) -> Result<u8, IonError> {
        self.read_u8()
            .map_err(|_| IonError::Truncated { offset: start, what })
    }
}

/// Fold big-endian bytes into a `u64`, ignoring leading zero bytes.
fn fold_be(bytes: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    for &b in bytes {
        if value >> 56 != 0 {
            return None;
        }
        value = (value << 8) | u64::from(b);
    }
    Some(value)
}

/// Apply a sign to a magnitude; `i64::MIN` has magnitude 2^63.
fn signed(magnitude: u64, negative: bool) -> Option<i64> {
    if !negative {
        return i64::try_from(magnitude).ok();
    }
    if magnitude <= i64::MAX as u64 {
        Some(-(magnitude as i64))
    } else if magnitude == i64::MAX as u64 + 1 {
        Some(i64::MIN)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kfx::ion::writer::{write_var_int, write_var_uint};
    use proptest::prelude::*;

    #[test]
    fn test_var_uint_single_and_multi_byte() {
        assert_eq!(Cursor::new(&[0x8a]).read_var_uint(), Ok(10));
        // 0x7f << 7 | 0x7f
        assert_eq!(Cursor::new(&[0x7f, 0xff]).read_var_uint(), Ok(16383));
        // leading zero groups are padding
        assert_eq!(Cursor::new(&[0x00, 0x00, 0x81]).read_var_uint(), Ok(1));
    }

    #[test]
    fn test_var_uint_truncated() {
        let err = Cursor::new(&[0x01, 0x02]).read_var_uint().unwrap_err();
        assert!(matches!(err, IonError::Truncated { offset: 0, .. }));
    }

    #[test]
    fn test_var_uint_overflow_is_not_truncation() {
        let mut data = vec![0x7f; 10];
        data.push(0xff);
        let err = Cursor::new(&data).read_var_uint().unwrap_err();
        assert!(matches!(err, IonError::Overflow { target: "u64", .. }));
        // the arbitrary precision reader accepts it
        assert!(Cursor::new(&data).read_var_big_uint().is_ok());
    }

    #[test]
    fn test_var_uint32_overflow() {
        // 2^35
        let err = Cursor::new(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x80])
            .read_var_uint32()
            .unwrap_err();
        assert!(matches!(err, IonError::Overflow { target: "u32", .. }));
    }

    #[test]
    fn test_var_int_sign() {
        assert_eq!(Cursor::new(&[0x81]).read_var_int(), Ok(1));
        assert_eq!(Cursor::new(&[0xc1]).read_var_int(), Ok(-1));
        assert_eq!(Cursor::new(&[0xc0]).read_var_int_parts(), Ok((0, true)));
        // -1000: 0x47 0xe8
        assert_eq!(Cursor::new(&[0x47, 0xe8]).read_var_int(), Ok(-1000));
    }

    #[test]
    fn test_uint_fixed_width() {
        let mut cursor = Cursor::new(&[0x01, 0x2f, 0xef, 0xcc, 0x99]);
        assert_eq!(cursor.read_uint(4), Ok(0x012f_efcc));
        assert_eq!(cursor.remaining(), 1);

        let nine = [0x01, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            Cursor::new(&nine).read_uint(9),
            Err(IonError::Overflow { .. })
        ));
        // leading zero padding does not count against the width
        let padded = [0, 0, 0, 0, 0, 0, 0, 0, 0x05];
        assert_eq!(Cursor::new(&padded).read_uint(9), Ok(5));
    }

    #[test]
    fn test_read_past_field_boundary() {
        let mut outer = Cursor::new(&[0x01, 0x02, 0x03]);
        let mut inner = outer.take(2).unwrap();
        assert!(inner.read_uint(3).is_err());
        assert_eq!(outer.read_u8(), Ok(0x03));
    }

    #[test]
    fn test_int_sign_magnitude() {
        assert_eq!(Cursor::new(&[0x81]).read_int(1), Ok((-1, false)));
        assert_eq!(Cursor::new(&[0x80]).read_int(1), Ok((0, true)));
        assert_eq!(Cursor::new(&[0x00, 0xa0]).read_int(2), Ok((160, false)));
        assert_eq!(Cursor::new(&[]).read_int(0), Ok((0, false)));
    }

    #[test]
    fn test_decimal_parts() {
        // exponent -20, coefficient 1234
        let mut cursor = Cursor::new(&[0xd4, 0x04, 0xd2]);
        let (coefficient, negative, exponent) = cursor.read_decimal_parts().unwrap();
        assert_eq!(coefficient, BigUint::from(1234u32));
        assert!(!negative);
        assert_eq!(exponent, -20);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_take_declared_var_len() {
        let mut cursor = Cursor::new(&[0x82, 0xaa, 0xbb, 0xcc]);
        let sub = cursor.take_declared(VAR_LEN).unwrap();
        assert_eq!(sub.rest(), &[0xaa, 0xbb]);
        assert_eq!(sub.offset(), 1);
        assert_eq!(cursor.rest(), &[0xcc]);
    }

    proptest! {
        #[test]
        fn prop_var_uint_agrees_with_encoder(value in any::<u64>()) {
            let mut out = Vec::new();
            write_var_uint(&mut out, value);
            let mut cursor = Cursor::new(&out);
            prop_assert_eq!(cursor.read_var_uint(), Ok(value));
            prop_assert!(cursor.is_empty());
        }

        #[test]
        fn prop_var_int_agrees_with_encoder(magnitude in 0u64..=(1u64 << 62), negative in any::<bool>()) {
            let mut out = Vec::new();
            write_var_int(&mut out, magnitude, negative);
            prop_assert_eq!(Cursor::new(&out).read_var_int_parts(), Ok((magnitude, negative)));
        }
    }
}
