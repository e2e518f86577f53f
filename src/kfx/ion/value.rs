//! Decoded Ion value tree.

use num_bigint::BigInt;

use super::decimal::Decimal;
use super::timestamp::Timestamp;

/// Numeric symbol ID. Text is resolved through a symbol table.
pub type SymbolId = u64;

/// Ion type codes (the high nibble of a type descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IonType {
    Null,
    Bool,
    Int,
    Float,
    Decimal,
    Timestamp,
    Symbol,
    String,
    Clob,
    Blob,
    List,
    Sexp,
    Struct,
}

impl IonType {
    /// Type code used when emitting a typed null or a non-negative value.
    pub fn type_code(self) -> u8 {
        match self {
            IonType::Null => 0,
            IonType::Bool => 1,
            IonType::Int => 2,
            IonType::Float => 4,
            IonType::Decimal => 5,
            IonType::Timestamp => 6,
            IonType::Symbol => 7,
            IonType::String => 8,
            IonType::Clob => 9,
            IonType::Blob => 10,
            IonType::List => 11,
            IonType::Sexp => 12,
            IonType::Struct => 13,
        }
    }

    /// Map a descriptor type code to its Ion type. Codes 0, 14 and 15 have
    /// no value type of their own and return `None`.
    pub fn from_code(code: u8) -> Option<IonType> {
        Some(match code {
            1 => IonType::Bool,
            2 | 3 => IonType::Int,
            4 => IonType::Float,
            5 => IonType::Decimal,
            6 => IonType::Timestamp,
            7 => IonType::Symbol,
            8 => IonType::String,
            9 => IonType::Clob,
            10 => IonType::Blob,
            11 => IonType::List,
            12 => IonType::Sexp,
            13 => IonType::Struct,
            _ => return None,
        })
    }
}

/// Struct fields in encounter order. Duplicate field IDs are allowed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IonStruct {
    pub fields: Vec<(SymbolId, IonValue)>,
    /// The encoder declared the fields sorted by ID. Informational only.
    pub sorted: bool,
}

impl IonStruct {
    /// First field with the given ID.
    pub fn get(&self, field: SymbolId) -> Option<&IonValue> {
        self.fields
            .iter()
            .find(|(id, _)| *id == field)
            .map(|(_, v)| v)
    }
}

/// Typed payload of a decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum IonData {
    /// A typed null; the type says which null it was.
    Null(IonType),
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Decimal(Decimal),
    Timestamp(Timestamp),
    Symbol(SymbolId),
    String(String),
    Clob(Vec<u8>),
    Blob(Vec<u8>),
    List(Vec<IonValue>),
    Sexp(Vec<IonValue>),
    Struct(IonStruct),
}

/// A decoded value and the annotations attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct IonValue {
    pub annotations: Vec<SymbolId>,
    pub data: IonData,
}

impl IonValue {
    pub fn new(data: IonData) -> Self {
        Self {
            annotations: Vec::new(),
            data,
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<SymbolId>) -> Self {
        self.annotations = annotations;
        self
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self.data, IonData::Null(_))
    }

    pub fn ion_type(&self) -> IonType {
        match &self.data {
            IonData::Null(t) => *t,
            IonData::Bool(_) => IonType::Bool,
            IonData::Int(_) => IonType::Int,
            IonData::Float(_) => IonType::Float,
            IonData::Decimal(_) => IonType::Decimal,
            IonData::Timestamp(_) => IonType::Timestamp,
            IonData::Symbol(_) => IonType::Symbol,
            IonData::String(_) => IonType::String,
            IonData::Clob(_) => IonType::Clob,
            IonData::Blob(_) => IonType::Blob,
            IonData::List(_) => IonType::List,
            IonData::Sexp(_) => IonType::Sexp,
            IonData::Struct(_) => IonType::Struct,
        }
    }

    pub fn has_annotation(&self, id: SymbolId) -> bool {
        self.annotations.contains(&id)
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match &self.data {
            IonData::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            IonData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<SymbolId> {
        match self.data {
            IonData::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&IonStruct> {
        match &self.data {
            IonData::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[IonValue]> {
        match &self.data {
            IonData::List(items) => Some(items),
            _ => None,
        }
    }

    /// Field lookup on a struct value.
    pub fn get(&self, field: SymbolId) -> Option<&IonValue> {
        self.as_struct().and_then(|s| s.get(field))
    }
}

impl From<IonData> for IonValue {
    fn from(data: IonData) -> Self {
        IonValue::new(data)
    }
}
