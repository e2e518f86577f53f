//! KFX fragment representation.
//!
//! A fragment is the unit handed to the container serializer: a typed,
//! identified payload. Structured fragments carry a re-encoded Ion stream,
//! resource fragments carry their bytes untouched.

use std::fmt;

use serde::Serialize;

use super::ion::ION_BVM;
use super::symbols::{SymbolToken, sym};

pub const DEFAULT_FRAGMENT_VERSION: u32 = 1;
pub const DEFAULT_COMPRESSION: u32 = 0;
pub const DEFAULT_DRM_SCHEME: u32 = 0;

/// A transformed KDF row.
///
/// `ftype` and `fid` are always symbols of the output symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub version: u32,
    pub compression: u32,
    pub drm_scheme: u32,
    /// Fragment type (`$417` for resources, else the value's annotation).
    pub ftype: SymbolToken,
    /// Fragment ID.
    pub fid: SymbolToken,
    pub data: Vec<u8>,
}

impl Fragment {
    pub fn new(ftype: SymbolToken, fid: SymbolToken, data: Vec<u8>) -> Self {
        Self {
            version: DEFAULT_FRAGMENT_VERSION,
            compression: DEFAULT_COMPRESSION,
            drm_scheme: DEFAULT_DRM_SCHEME,
            ftype,
            fid,
            data,
        }
    }

    /// Check if this fragment is an opaque resource.
    pub fn is_raw(&self) -> bool {
        self.ftype.sid == sym::RAW_MEDIA
    }

    /// Check if the payload is an Ion stream.
    pub fn is_ion(&self) -> bool {
        self.data.starts_with(&ION_BVM)
    }

    pub fn summary(&self) -> FragmentSummary {
        FragmentSummary {
            ftype: self.ftype.clone(),
            fid: self.fid.clone(),
            size: self.data.len(),
            raw: self.is_raw(),
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} bytes)", self.ftype, self.fid, self.data.len())
    }
}

/// What `--json` prints for each fragment.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentSummary {
    pub ftype: SymbolToken,
    pub fid: SymbolToken,
    pub size: usize,
    pub raw: bool,
}
