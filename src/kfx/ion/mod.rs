//! Amazon Ion binary format.
//!
//! Ion is Amazon's self-describing serialization format used for every
//! structured fragment inside KDF databases and KFX containers. This module
//! decodes the full binary type system and re-emits already decoded trees.
//!
//! ## Module structure
//!
//! - `cursor` - bounded byte cursor and the VarUInt/VarInt/UInt/Int primitives
//! - `value` - the decoded value tree
//! - `decimal` - arbitrary precision decimals that keep negative zero
//! - `timestamp` - calendar timestamps with precision and offset
//! - `reader` - descriptor dispatch and value stream decoding
//! - `writer` - binary re-encoding of decoded values
//!
//! Reference: <https://amazon-ion.github.io/ion-docs/docs/binary.html>

use thiserror::Error;

pub mod cursor;
pub mod decimal;
pub mod reader;
pub mod timestamp;
pub mod value;
pub mod writer;

pub use cursor::Cursor;
pub use decimal::Decimal;
pub use reader::{ION_BVM, IonReader, read_value_stream};
pub use timestamp::{Precision, Timestamp, check_day};
pub use value::{IonData, IonStruct, IonType, IonValue, SymbolId};
pub use writer::IonWriter;

/// Malformed Ion data.
///
/// Once one of these is raised the stream position can no longer be
/// trusted, so callers never try to resynchronize.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IonError {
    #[error("truncated {what} at offset {offset}")]
    Truncated { offset: usize, what: &'static str },

    #[error("{what} at offset {offset} overflows {target}")]
    Overflow {
        offset: usize,
        what: &'static str,
        target: &'static str,
    },

    #[error("reserved type descriptor 0x{descriptor:02x} at offset {offset}")]
    ReservedType { offset: usize, descriptor: u8 },

    #[error("bad Ion version marker at offset {offset}")]
    BadVersionMarker { offset: usize },

    #[error("invalid {what} at offset {offset}: {reason}")]
    Malformed {
        offset: usize,
        what: &'static str,
        reason: String,
    },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },
}

impl IonError {
    /// Byte offset (from the start of the decoded buffer) where the problem was found.
    pub fn offset(&self) -> usize {
        match self {
            IonError::Truncated { offset, .. }
            | IonError::Overflow { offset, .. }
            | IonError::ReservedType { offset, .. }
            | IonError::BadVersionMarker { offset }
            | IonError::Malformed { offset, .. }
            | IonError::InvalidUtf8 { offset } => *offset,
        }
    }

    pub(crate) fn malformed(offset: usize, what: &'static str, reason: impl Into<String>) -> Self {
        IonError::Malformed {
            offset,
            what,
            reason: reason.into(),
        }
    }
}
