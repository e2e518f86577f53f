//! Error types for kfxpack operations.

use thiserror::Error;

use crate::kfx::ion::IonError;

/// The book database does not look like anything this crate knows how to read.
///
/// These are raised when the external conversion tool produced a layout we
/// never validated, or when the database contradicts itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("file too short to be a wrapped database ({len} bytes)")]
    TooShort { len: usize },

    #[error("bad database signature")]
    BadSignature,

    #[error("bad wrapper frame fingerprint at offset 0x{offset:x}")]
    BadFrameFingerprint { offset: usize },

    #[error("bad wrapper frame header at offset 0x{offset:x}")]
    BadFrameHeader { offset: usize },

    #[error("archive has no entry {0}")]
    MissingArchiveEntry(String),

    #[error("unexpected schema for table {table}: {sql}")]
    UnknownTableSchema { table: String, sql: String },

    #[error("table {found} declared with the schema of table {expected}")]
    TableNameMismatch { found: String, expected: String },

    #[error("mandatory tables missing: {0:?}")]
    MissingTables(Vec<String>),

    #[error("fragment {0} not found")]
    MissingFragment(&'static str),

    #[error("unexpected payload type {ptype} for fragment {id}")]
    UnexpectedPayloadType { id: String, ptype: String },

    #[error("unexpected import chain {found:?} in $ion_symbol_table")]
    UnexpectedImports { found: Vec<String> },

    #[error("invalid import {name}: {reason}")]
    InvalidImport { name: String, reason: String },

    #[error("$ion_symbol_table holds a {ion_type} value instead of a symbol table")]
    MaterializedSymbolTable { ion_type: String },

    #[error("unexpected value in max_id fragment: {0}")]
    InvalidMaxId(String),

    #[error("max_id ({max_id}) differs from the {table} max_id ({expected})")]
    MaxIdMismatch {
        max_id: u64,
        table: String,
        expected: u64,
    },

    #[error("fragment property has unknown key: {key} ({id}:{value})")]
    UnknownPropertyKey {
        id: String,
        key: String,
        value: String,
    },

    #[error("unexpected {column} storage class in table {table}")]
    UnexpectedColumnType { table: &'static str, column: &'static str },
}

/// Errors that abort a container transformation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed Ion in {context}: {source}")]
    Ion {
        context: String,
        #[source]
        source: IonError,
    },

    #[error("bad book database schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("fragment {id} is DRM protected")]
    Drm { id: String },

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Broad error categories, for callers that present failures to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed Ion; the byte stream cannot be trusted.
    Structural,
    /// Database layout unknown or inconsistent.
    Schema,
    /// Protected content.
    ContentPolicy,
    /// File system, archive or database engine failure.
    Environment,
    /// Unreadable settings file.
    Config,
}

impl Error {
    pub fn ion(context: impl Into<String>, source: IonError) -> Self {
        Error::Ion {
            context: context.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Ion { .. } => ErrorClass::Structural,
            Error::Schema(_) => ErrorClass::Schema,
            Error::Drm { .. } => ErrorClass::ContentPolicy,
            Error::Config(_) => ErrorClass::Config,
            Error::Io(_) | Error::Zip(_) | Error::Sqlite(_) => ErrorClass::Environment,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let ion = Error::ion("fragment c0", IonError::BadVersionMarker { offset: 4 });
        assert_eq!(ion.class(), ErrorClass::Structural);
        assert_eq!(
            ion.to_string(),
            "malformed Ion in fragment c0: bad Ion version marker at offset 4"
        );

        let drm = Error::Drm { id: "c1".into() };
        assert_eq!(drm.class(), ErrorClass::ContentPolicy);

        let schema: Error = SchemaError::BadFrameFingerprint { offset: 0x100800 }.into();
        assert_eq!(schema.class(), ErrorClass::Schema);
        assert!(schema.to_string().contains("0x100800"));
    }
}
