//! KDF to KFX transformation.
//!
//! Kindle Previewer stores a book as a KPF archive whose `book.kdf` entry
//! is a framed SQLite database of Ion fragments. KFX wants the same
//! fragments as a flat, self-contained list with one local symbol table.
//!
//! ## Module structure
//!
//! - `ion` - Amazon Ion binary decoder and re-encoder
//! - `symbols` - symbol tables and well-known symbol IDs
//! - `kdf` - KPF archive access and removal of the KDF wrapper frames
//! - `tables` - schema checks and queries against the KDF database
//! - `fragment` - KFX fragment representation
//! - `transformer` - row by row KDF to KFX fragment conversion
//! - `container` - the finished package for the container writer

pub mod container;
pub mod fragment;
pub mod ion;
pub mod kdf;
pub mod symbols;
pub mod tables;
pub mod transformer;

pub use container::Container;
pub use fragment::Fragment;
pub use transformer::{FragmentIssue, Severity, TransformOutput, Transformer, transform};
