//! # kfxpack
//!
//! Repack Kindle Previewer books (KPF/KDF) into the fragment form used by
//! KFX containers.
//!
//! ## Features
//!
//! - Extract and unwrap the KDF database inside a KPF archive
//! - Full binary Ion decoding, including timestamps and big decimals
//! - Rebuild a single local symbol table and resolve `kfx_id` references
//! - Reject DRM protected books up front
//!
//! ## Quick Start
//!
//! ```no_run
//! use kfxpack::{Config, convert_kpf};
//!
//! let container = convert_kpf("book.kpf", &Config::default()).unwrap();
//! println!("{container}");
//! for fragment in &container.fragments {
//!     println!("{fragment}");
//! }
//! ```

pub mod config;
pub mod error;
pub mod kfx;

use std::path::Path;

use tracing::info_span;

pub use config::Config;
pub use error::{Error, ErrorClass, Result, SchemaError};
pub use kfx::{Container, Fragment, FragmentIssue, Severity};

use kfx::kdf::{DatabaseFile, load_kdf, unwrap_sqlite_db};
use kfx::tables::KdfDatabase;

/// Convert a KPF archive on disk.
pub fn convert_kpf(path: impl AsRef<Path>, config: &Config) -> Result<Container> {
    let path = path.as_ref();
    let _span = info_span!("convert_kpf", path = %path.display()).entered();
    let db = load_kdf(path, config)?;
    convert_database(&db, config)
}

/// Convert a KDF file that is not inside a KPF archive.
pub fn convert_kdf_bytes(wrapped: &[u8], config: &Config) -> Result<Container> {
    let _span = info_span!("convert_kdf", len = wrapped.len()).entered();
    let db = unwrap_sqlite_db(wrapped)?;
    convert_database(&db, config)
}

/// Convert an already unwrapped SQLite database.
pub fn convert_database(db: &[u8], config: &Config) -> Result<Container> {
    let file = DatabaseFile::stage(db, config)?;
    let db = KdfDatabase::open(file.path())?;
    let output = kfx::transform(&db)?;
    Ok(Container::new(output, db.read_capabilities()?))
}
