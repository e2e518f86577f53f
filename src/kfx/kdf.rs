//! KPF archives and the wrapped KDF database inside them.
//!
//! A KPF is a ZIP archive. Its `resources/book.kdf` entry is an SQLite
//! database with a 0x400 byte wrapper frame inserted after the first 0x400
//! bytes and then after every 0x100000 bytes of payload:
//!
//! ```text
//! [db 0..0x400] [frame] [db 0x100000 bytes] [frame] [db ...] ...
//! ```
//!
//! Every frame starts with a fixed fingerprint and header. Removing the
//! frames restores the original database file byte for byte.

use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use zip::ZipArchive;

use crate::config::Config;
use crate::error::{Error, Result, SchemaError};

/// Where the first wrapper frame starts.
pub const WRAPPER_OFFSET: usize = 0x400;
/// Size of one wrapper frame.
pub const WRAPPER_LENGTH: usize = 0x400;
/// Database bytes between two wrapper frames.
pub const WRAPPER_FRAME_LENGTH: usize = 0x100000;

pub const SQLITE_SIGNATURE: &[u8; 16] = b"SQLite format 3\0";
pub const FRAME_FINGERPRINT: [u8; 4] = [0xfa, 0x50, 0x0a, 0x5f];
pub const FRAME_HEADER: [u8; 5] = [0x01, 0x00, 0x00, 0x40, 0x20];

/// File name used when the unwrapped database is kept in the work directory.
pub const UNWRAPPED_NAME: &str = "book.sqlite";

/// Strip the wrapper frames from a KDF file.
///
/// Any frame with a wrong fingerprint or header fails the whole file: a
/// genuine KDF never has one, so there is nothing sensible to recover.
pub fn unwrap_sqlite_db(data: &[u8]) -> std::result::Result<Vec<u8>, SchemaError> {
    if data.len() <= SQLITE_SIGNATURE.len() || data.len() < 2 * WRAPPER_OFFSET {
        return Err(SchemaError::TooShort { len: data.len() });
    }
    if !data.starts_with(SQLITE_SIGNATURE) {
        return Err(SchemaError::BadSignature);
    }

    let mut unwrapped = Vec::with_capacity(data.len());
    let mut prev = 0;
    let mut curr = WRAPPER_OFFSET;
    while curr + WRAPPER_LENGTH <= data.len() {
        let frame = &data[curr..curr + WRAPPER_LENGTH];
        if frame[..FRAME_FINGERPRINT.len()] != FRAME_FINGERPRINT {
            return Err(SchemaError::BadFrameFingerprint { offset: curr });
        }
        let header = &frame[FRAME_FINGERPRINT.len()..FRAME_FINGERPRINT.len() + FRAME_HEADER.len()];
        if header != FRAME_HEADER {
            return Err(SchemaError::BadFrameHeader {
                offset: curr + FRAME_FINGERPRINT.len(),
            });
        }
        unwrapped.extend_from_slice(&data[prev..curr]);
        prev = curr + WRAPPER_LENGTH;
        curr += WRAPPER_LENGTH + WRAPPER_FRAME_LENGTH;
    }
    unwrapped.extend_from_slice(&data[prev..]);

    debug!(
        wrapped = data.len(),
        unwrapped = unwrapped.len(),
        "unwrapped KDF database"
    );
    Ok(unwrapped)
}

/// Read the wrapped database entry out of a KPF archive on disk.
pub fn extract_kdf(path: impl AsRef<Path>, entry: &str) -> Result<Vec<u8>> {
    let file = File::open(path.as_ref())?;
    read_kdf_entry(file, entry)
}

/// Read the wrapped database entry out of a KPF archive.
pub fn read_kdf_entry<R: Read + Seek>(reader: R, entry: &str) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut file = match archive.by_name(entry) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(SchemaError::MissingArchiveEntry(entry.to_string()).into());
        }
        Err(e) => return Err(e.into()),
    };
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// The unwrapped database on disk, for as long as it is needed.
///
/// A temporary file is deleted when this is dropped; a kept file stays.
#[derive(Debug)]
pub enum DatabaseFile {
    Temporary(NamedTempFile),
    Kept(PathBuf),
}

impl DatabaseFile {
    /// Write `db` where `config` says it should live.
    pub fn stage(db: &[u8], config: &Config) -> Result<Self> {
        match (&config.work_dir, config.keep_unwrapped) {
            (Some(dir), true) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(UNWRAPPED_NAME);
                fs::write(&path, db)?;
                Ok(DatabaseFile::Kept(path))
            }
            (Some(dir), false) => {
                fs::create_dir_all(dir)?;
                Self::temporary(NamedTempFile::new_in(dir)?, db)
            }
            (None, _) => Self::temporary(NamedTempFile::new()?, db),
        }
    }

    fn temporary(mut file: NamedTempFile, db: &[u8]) -> Result<Self> {
        file.write_all(db)?;
        file.flush()?;
        Ok(DatabaseFile::Temporary(file))
    }

    pub fn path(&self) -> &Path {
        match self {
            DatabaseFile::Temporary(file) => file.path(),
            DatabaseFile::Kept(path) => path,
        }
    }
}

/// Extract and unwrap in one step.
pub fn load_kdf(path: impl AsRef<Path>, config: &Config) -> Result<Vec<u8>> {
    let wrapped = extract_kdf(path, &config.kdf_entry)?;
    unwrap_sqlite_db(&wrapped).map_err(Error::from)
}
