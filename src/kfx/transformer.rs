//! KDF fragments to KFX fragments.
//!
//! The `$ion_symbol_table` and `max_id` rows set up the symbol context;
//! every other row of the `fragments` table becomes at most one
//! [`Fragment`]. Rows that cannot be used are logged and skipped, while
//! anything suggesting the database itself is wrong aborts the whole pass.

use std::collections::HashMap;

use tracing::{debug, error, info, info_span, warn};

use crate::error::{Error, Result, SchemaError};
use crate::kfx::fragment::Fragment;
use crate::kfx::ion::writer::encode_stream;
use crate::kfx::ion::{ION_BVM, IonData, IonStruct, IonType, IonValue, read_value_stream};
use crate::kfx::symbols::{
    DocumentSymbols, EidTranslations, ImportDescriptor, LocalSymbolTable, LocalSymbolTableBuilder,
    SYSTEM_TABLE, SharedSymbolTable, YJ_SYMBOLS, read_document_symbols, sym,
};
use crate::kfx::tables::{KdfDatabase, MAX_ID_ID, RawFragmentRow, SYMBOL_TABLE_ID};

/// Rows with this id are expected to hold nothing but a version marker.
pub const BOOK_NAVIGATION_ID: &str = "book_navigation";
/// Dictionary-only row, meaningless for books.
pub const MAX_EID_IN_SECTIONS_ID: &str = "max_eid_in_sections";
/// Prefix of resource fragment ids.
pub const RESOURCE_PREFIX: &str = "resource/";

/// How loudly a skipped row or value is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warn,
    Error,
}

/// A row or value that was skipped without failing the conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FragmentIssue {
    #[error("empty KDF fragment (data is empty), ignoring ({ftype})")]
    EmptyPayload { id: String, ftype: String },

    #[error("unexpected max_eid_in_sections for non-dictionary, ignoring")]
    MaxEidInSections { id: String },

    #[error("empty KDF fragment (version marker only), ignoring")]
    VersionMarkerOnly { id: String },

    #[error("KDF fragment cannot be empty, ignoring")]
    EmptyValue { id: String },

    #[error("KDF fragment must have an annotation, skipping")]
    MissingAnnotation { id: String },

    #[error("KDF fragment should have a single annotation, has {count}, skipping")]
    AnnotationCount { id: String, count: usize },

    #[error("undefined eid {eid} in kfx_id reference, value dropped")]
    UnresolvedEid { id: String, eid: String },

    #[error("unexpected {ion_type:?} value under kfx_id annotation, left as is")]
    UnexpectedLinkType { id: String, ion_type: IonType },
}

impl FragmentIssue {
    /// Row the issue was found in.
    pub fn id(&self) -> &str {
        match self {
            FragmentIssue::EmptyPayload { id, .. }
            | FragmentIssue::MaxEidInSections { id }
            | FragmentIssue::VersionMarkerOnly { id }
            | FragmentIssue::EmptyValue { id }
            | FragmentIssue::MissingAnnotation { id }
            | FragmentIssue::AnnotationCount { id, .. }
            | FragmentIssue::UnresolvedEid { id, .. }
            | FragmentIssue::UnexpectedLinkType { id, .. } => id,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            FragmentIssue::EmptyPayload { .. } => Severity::Debug,
            FragmentIssue::VersionMarkerOnly { id } if id == BOOK_NAVIGATION_ID => Severity::Debug,
            FragmentIssue::VersionMarkerOnly { .. } | FragmentIssue::MaxEidInSections { .. } => {
                Severity::Warn
            }
            FragmentIssue::EmptyValue { .. }
            | FragmentIssue::MissingAnnotation { .. }
            | FragmentIssue::AnnotationCount { .. }
            | FragmentIssue::UnresolvedEid { .. }
            | FragmentIssue::UnexpectedLinkType { .. } => Severity::Error,
        }
    }

    fn log(&self) {
        let id = self.id();
        match self.severity() {
            Severity::Debug => debug!(id, "{self}"),
            Severity::Warn => warn!(id, "{self}"),
            Severity::Error => error!(id, "{self}"),
        }
    }
}

/// Result of a transformation pass.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Fragments in database order.
    pub fragments: Vec<Fragment>,
    /// Output symbol table: the document's symbols plus everything added.
    pub symbols: LocalSymbolTable,
    /// Everything skipped along the way.
    pub issues: Vec<FragmentIssue>,
}

/// Transforms the fragments of one book database.
pub struct Transformer<'db> {
    db: &'db KdfDatabase,
    eids: EidTranslations,
    props: HashMap<String, String>,
}

/// Run a full pass over `db`.
pub fn transform(db: &KdfDatabase) -> Result<TransformOutput> {
    Transformer::new(db)?.run()
}

impl<'db> Transformer<'db> {
    /// Load the lookup tables. Protected books are refused here, before
    /// any payload is looked at.
    pub fn new(db: &'db KdfDatabase) -> Result<Self> {
        db.check_drm()?;
        let eids = db.read_eid_translations()?;
        let props = db.read_fragment_properties()?;
        debug!(
            eids = eids.len(),
            element_types = props.len(),
            "loaded reference tables"
        );
        Ok(Self { db, eids, props })
    }

    pub fn run(self) -> Result<TransformOutput> {
        let _span = info_span!("transform").entered();

        let mut symbols = self.load_symbol_context()?;
        let mut fragments = Vec::new();
        let mut issues = Vec::new();

        self.db.for_each_fragment(|row| {
            if let Some(fragment) = self.transform_row(row, &mut symbols, &mut issues)? {
                fragments.push(fragment);
            }
            Ok(())
        })?;

        info!(
            fragments = fragments.len(),
            skipped = issues.len(),
            added_symbols = symbols.added().len(),
            "transformed KDF fragments"
        );
        Ok(TransformOutput {
            fragments,
            symbols: symbols.build(),
            issues,
        })
    }

    /// Decode `$ion_symbol_table` and `max_id`, check that they agree and
    /// seed the output symbol table from them.
    fn load_symbol_context(&self) -> Result<LocalSymbolTableBuilder> {
        let document = read_document_symbols(&self.blob_row(SYMBOL_TABLE_ID)?)?;
        let yj = check_imports(&document)?;

        let max_id = read_max_id(&self.blob_row(MAX_ID_ID)?)?;
        if max_id != yj.max_id {
            return Err(SchemaError::MaxIdMismatch {
                max_id,
                table: yj.name.clone(),
                expected: yj.max_id,
            }
            .into());
        }

        let shared = SharedSymbolTable::create_placeholder(&yj.name, yj.version, yj.max_id);
        let mut symbols = LocalSymbolTableBuilder::new(&shared);
        for text in &document.symbols {
            symbols.declare(text.as_deref());
        }
        debug!(
            max_id,
            local_symbols = document.symbols.len(),
            "symbol context loaded"
        );
        Ok(symbols)
    }

    fn blob_row(&self, id: &'static str) -> Result<Vec<u8>> {
        match self.db.fragment(id)? {
            Some(row) if row.payload_type == "blob" => Ok(row.payload),
            _ => Err(SchemaError::MissingFragment(id).into()),
        }
    }

    fn transform_row(
        &self,
        row: RawFragmentRow,
        symbols: &mut LocalSymbolTableBuilder,
        issues: &mut Vec<FragmentIssue>,
    ) -> Result<Option<Fragment>> {
        let RawFragmentRow {
            id,
            payload_type,
            payload,
        } = row;
        match payload_type.as_str() {
            "path" => Ok(Some(resource_fragment(id, payload, symbols))),
            "blob" => self.transform_blob(id, payload, symbols, issues),
            _ => Err(SchemaError::UnexpectedPayloadType {
                id,
                ptype: payload_type,
            }
            .into()),
        }
    }

    fn transform_blob(
        &self,
        id: String,
        payload: Vec<u8>,
        symbols: &mut LocalSymbolTableBuilder,
        issues: &mut Vec<FragmentIssue>,
    ) -> Result<Option<Fragment>> {
        if payload.is_empty() {
            let ftype = self.props.get(&id).cloned().unwrap_or_else(|| "$0".to_string());
            return Ok(skip(issues, FragmentIssue::EmptyPayload { id, ftype }));
        }
        if id == MAX_EID_IN_SECTIONS_ID {
            return Ok(skip(issues, FragmentIssue::MaxEidInSections { id }));
        }
        if !payload.starts_with(&ION_BVM) {
            // normally stored as a "path" row
            return Ok(Some(resource_fragment(id, payload, symbols)));
        }
        if payload == ION_BVM {
            return Ok(skip(issues, FragmentIssue::VersionMarkerOnly { id }));
        }

        let mut values =
            read_value_stream(&payload).map_err(|e| Error::ion(format!("fragment {id}"), e))?;
        let Some(first) = values.first_mut() else {
            return Ok(skip(issues, FragmentIssue::EmptyValue { id }));
        };
        let ftype = match first.annotations.as_slice() {
            [] => return Ok(skip(issues, FragmentIssue::MissingAnnotation { id })),
            [ftype] | [ftype, sym::FRAGMENT_LINK] => *ftype,
            many => {
                let count = many.len();
                return Ok(skip(issues, FragmentIssue::AnnotationCount { id, count }));
            }
        };
        // the type moves into the fragment header
        first.annotations.clear();

        let mut deref = Dereferencer {
            id: &id,
            symbols: &mut *symbols,
            eids: &self.eids,
            issues: &mut *issues,
        };
        let values: Vec<IonValue> = values
            .into_iter()
            .filter_map(|v| deref.dereference(v))
            .collect();

        let ftype = symbols.token_for_id(ftype);
        let fid = symbols.token(&id);
        Ok(Some(Fragment::new(ftype, fid, encode_stream(&values))))
    }
}

/// The import chain must be exactly the system table then `YJ_symbols`.
fn check_imports(document: &DocumentSymbols) -> Result<&ImportDescriptor> {
    let names = document.import_names();
    if names != [SYSTEM_TABLE, YJ_SYMBOLS] {
        return Err(SchemaError::UnexpectedImports {
            found: names.iter().map(|n| n.to_string()).collect(),
        }
        .into());
    }
    Ok(&document.imports[1])
}

/// The `max_id` row holds a single non-negative integer.
fn read_max_id(data: &[u8]) -> Result<u64> {
    let values = read_value_stream(data).map_err(|e| Error::ion(MAX_ID_ID, e))?;
    match values.as_slice() {
        [] => Err(SchemaError::InvalidMaxId("<nil>".to_string()).into()),
        [value] => value
            .as_int()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| SchemaError::InvalidMaxId(format!("{:?}", value.data)).into()),
        many => Err(SchemaError::InvalidMaxId(format!("{} values", many.len())).into()),
    }
}

fn resource_fragment(id: String, payload: Vec<u8>, symbols: &mut LocalSymbolTableBuilder) -> Fragment {
    let id = if id.starts_with(RESOURCE_PREFIX) {
        id
    } else {
        format!("{RESOURCE_PREFIX}{id}")
    };
    Fragment::new(
        symbols.token_for_id(sym::RAW_MEDIA),
        symbols.token(&id),
        payload,
    )
}

fn skip(issues: &mut Vec<FragmentIssue>, issue: FragmentIssue) -> Option<Fragment> {
    issue.log();
    issues.push(issue);
    None
}

/// Rewrites `$598` (kfx_id) references into output symbols.
struct Dereferencer<'a> {
    id: &'a str,
    symbols: &'a mut LocalSymbolTableBuilder,
    eids: &'a EidTranslations,
    issues: &'a mut Vec<FragmentIssue>,
}

impl Dereferencer<'_> {
    /// Walk `value`, returning `None` when it has to be dropped.
    fn dereference(&mut self, mut value: IonValue) -> Option<IonValue> {
        if value.has_annotation(sym::KFX_ID) && !value.is_null() {
            let resolved = match &value.data {
                IonData::String(text) => Some(self.symbols.add(text)),
                IonData::Int(eid) => {
                    let sid = i64::try_from(eid)
                        .ok()
                        .and_then(|eid| self.eids.resolve(eid, self.symbols));
                    if sid.is_none() {
                        self.report(FragmentIssue::UnresolvedEid {
                            id: self.id.to_string(),
                            eid: eid.to_string(),
                        });
                        return None;
                    }
                    sid
                }
                _ => {
                    let ion_type = value.ion_type();
                    self.report(FragmentIssue::UnexpectedLinkType {
                        id: self.id.to_string(),
                        ion_type,
                    });
                    None
                }
            };
            if let Some(sid) = resolved {
                value.annotations.retain(|&a| a != sym::KFX_ID);
                value.data = IonData::Symbol(sid);
                return Some(value);
            }
        }

        value.data = match value.data {
            IonData::List(items) => IonData::List(self.dereference_all(items)),
            IonData::Sexp(items) => IonData::Sexp(self.dereference_all(items)),
            IonData::Struct(s) => {
                let fields: Vec<_> = s
                    .fields
                    .into_iter()
                    .filter_map(|(field, v)| self.dereference(v).map(|v| (field, v)))
                    .collect();
                let sorted = s.sorted && !fields.is_empty();
                IonData::Struct(IonStruct { fields, sorted })
            }
            other => other,
        };
        Some(value)
    }

    fn dereference_all(&mut self, items: Vec<IonValue>) -> Vec<IonValue> {
        items
            .into_iter()
            .filter_map(|v| self.dereference(v))
            .collect()
    }

    fn report(&mut self, issue: FragmentIssue) {
        issue.log();
        self.issues.push(issue);
    }
}
