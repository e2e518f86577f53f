//! Output package handed to the KFX container serializer.
//!
//! Collects the transformed fragments together with the settings a KFX
//! container header needs. Nothing here does I/O.

use std::fmt;

use super::fragment::{DEFAULT_COMPRESSION, DEFAULT_DRM_SCHEME, Fragment, FragmentSummary};
use super::symbols::LocalSymbolTable;
use super::tables::Capability;
use super::transformer::{FragmentIssue, Severity, TransformOutput};

/// Container format version written by current Kindle tooling.
pub const CONTAINER_VERSION: u32 = 2;
/// Preferred container chunk size.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

/// Everything needed to write one KFX container.
#[derive(Debug, Clone)]
pub struct Container {
    pub version: u32,
    pub compression: u32,
    pub drm_scheme: u32,
    pub chunk_size: u32,
    pub capabilities: Vec<Capability>,
    /// SHA-1 over the fragment payloads in order, lowercase hex.
    pub digest: String,
    pub symbols: LocalSymbolTable,
    /// `symbols` encoded as an `$ion_symbol_table` Ion stream.
    pub symbol_data: Vec<u8>,
    pub fragments: Vec<Fragment>,
    /// Rows and values left out of `fragments`.
    pub issues: Vec<FragmentIssue>,
}

impl Container {
    pub fn new(output: TransformOutput, capabilities: Vec<Capability>) -> Self {
        let TransformOutput {
            fragments,
            symbols,
            issues,
        } = output;
        let digest = payload_sha1(&fragments);
        let symbol_data = symbols.encode();
        Self {
            version: CONTAINER_VERSION,
            compression: DEFAULT_COMPRESSION,
            drm_scheme: DEFAULT_DRM_SCHEME,
            chunk_size: DEFAULT_CHUNK_SIZE,
            capabilities,
            digest,
            symbols,
            symbol_data,
            fragments,
            issues,
        }
    }

    pub fn fragment_summaries(&self) -> Vec<FragmentSummary> {
        self.fragments.iter().map(Fragment::summary).collect()
    }

    /// Look up a fragment by its id text.
    pub fn fragment(&self, fid: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.fid.text == fid)
    }

    pub fn resource_count(&self) -> usize {
        self.fragments.iter().filter(|f| f.is_raw()).count()
    }

    /// Issues at or above `severity`.
    pub fn issues_at_least(&self, severity: Severity) -> impl Iterator<Item = &FragmentIssue> {
        self.issues.iter().filter(move |i| i.severity() >= severity)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KFX container v{}: {} fragments ({} resources), {} local symbols, \
             {} capabilities, {} skipped, sha1 {}",
            self.version,
            self.fragments.len(),
            self.resource_count(),
            self.symbols.symbols.len(),
            self.capabilities.len(),
            self.issues.len(),
            self.digest,
        )
    }
}

fn payload_sha1(fragments: &[Fragment]) -> String {
    let mut hasher = sha1_smol::Sha1::new();
    for fragment in fragments {
        hasher.update(&fragment.data);
    }
    hasher.digest().to_string()
}
