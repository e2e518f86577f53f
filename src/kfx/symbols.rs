//! KFX symbol tables.
//!
//! KDF fragments are encoded against three layers of symbols: the Ion
//! system table (`$1`..`$9`), the `YJ_symbols` shared table whose texts
//! are not published (only its size is known), and the document's own
//! local symbols declared in the `$ion_symbol_table` fragment. While
//! fragments are transformed, new local symbols are appended after those.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result, SchemaError};
use crate::kfx::ion::{IonData, IonStruct, IonType, IonValue, SymbolId, read_value_stream};
use crate::kfx::ion::writer::encode_stream;

/// Ion 1.0 system symbols, `$1` through `$9`.
pub const SYSTEM_SYMBOLS: [&str; 9] = [
    "$ion",
    "$ion_1_0",
    "$ion_symbol_table",
    "name",
    "version",
    "imports",
    "symbols",
    "max_id",
    "$ion_shared_symbol_table",
];

pub const SYSTEM_MAX_ID: u64 = SYSTEM_SYMBOLS.len() as u64;

/// Name of the system symbol table.
pub const SYSTEM_TABLE: &str = "$ion";

/// Name of the Amazon shared symbol table every KDF imports.
pub const YJ_SYMBOLS: &str = "YJ_symbols";

/// `$0`: the symbol with unknown text.
pub const UNKNOWN_SYMBOL: SymbolId = 0;

/// Well-known symbol IDs.
pub mod sym {
    use crate::kfx::ion::SymbolId;

    pub const ION_SYMBOL_TABLE: SymbolId = 3; // $3 - local symbol table annotation
    pub const NAME: SymbolId = 4; // $4 - import name
    pub const VERSION: SymbolId = 5; // $5 - import version
    pub const IMPORTS: SymbolId = 6; // $6 - imports list
    pub const SYMBOLS: SymbolId = 7; // $7 - local symbol list
    pub const MAX_ID: SymbolId = 8; // $8 - import max_id

    pub const RAW_MEDIA: SymbolId = 417; // $417 - bcRawMedia, resource fragments
    pub const KFX_ID: SymbolId = 598; // $598 - kfx_id, reference to dereference
    pub const FRAGMENT_LINK: SymbolId = 608; // $608 - allowed second fragment annotation
}

/// Shared symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSymbolTable {
    pub name: String,
    pub version: u32,
    pub symbols: Vec<String>,
}

impl SharedSymbolTable {
    pub fn system() -> Self {
        Self {
            name: SYSTEM_TABLE.to_string(),
            version: 1,
            symbols: SYSTEM_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// A table of `max_id` placeholder texts (`$10`, `$11`, ...) numbered
    /// right after the system symbols. Stands in for tables whose real
    /// texts are unknown.
    pub fn create_placeholder(name: &str, version: u32, max_id: u64) -> Self {
        Self {
            name: name.to_string(),
            version,
            symbols: (SYSTEM_MAX_ID + 1..=SYSTEM_MAX_ID + max_id)
                .map(|id| format!("${id}"))
                .collect(),
        }
    }

    pub fn max_id(&self) -> u64 {
        self.symbols.len() as u64
    }
}

/// A symbol with both its text and its ID in the output table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolToken {
    pub text: String,
    pub sid: SymbolId,
}

impl std::fmt::Display for SymbolToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.text, self.sid)
    }
}

/// One entry of a symbol table's import list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportDescriptor {
    pub name: String,
    pub version: u32,
    pub max_id: u64,
}

impl ImportDescriptor {
    fn system() -> Self {
        Self {
            name: SYSTEM_TABLE.to_string(),
            version: 1,
            max_id: SYSTEM_MAX_ID,
        }
    }

    fn to_ion(&self) -> IonValue {
        IonValue::new(IonData::Struct(IonStruct {
            fields: vec![
                (sym::NAME, IonData::String(self.name.clone()).into()),
                (sym::VERSION, IonData::Int(self.version.into()).into()),
                (sym::MAX_ID, IonData::Int(self.max_id.into()).into()),
            ],
            sorted: false,
        }))
    }
}

/// Symbol context declared by a `$ion_symbol_table` fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSymbols {
    /// Import chain, starting with the system table.
    pub imports: Vec<ImportDescriptor>,
    /// Local symbols; `None` marks a declared slot without text.
    pub symbols: Vec<Option<String>>,
}

impl DocumentSymbols {
    pub fn import_names(&self) -> Vec<&str> {
        self.imports.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn import(&self, name: &str) -> Option<&ImportDescriptor> {
        self.imports.iter().find(|i| i.name == name)
    }

    /// Highest symbol ID the document can refer to.
    pub fn max_id(&self) -> u64 {
        self.imports.iter().map(|i| i.max_id).sum::<u64>() + self.symbols.len() as u64
    }
}

/// Decode a `$ion_symbol_table` fragment.
///
/// The stream must consist of symbol table directives only. Any other
/// top-level value is an error: this fragment defines context, it carries
/// no content.
pub fn read_document_symbols(data: &[u8]) -> Result<DocumentSymbols> {
    let values = read_value_stream(data).map_err(|e| Error::ion("$ion_symbol_table", e))?;

    let mut doc = DocumentSymbols {
        imports: vec![ImportDescriptor::system()],
        symbols: Vec::new(),
    };

    for value in values {
        let directive = match value.annotations.first() {
            Some(&sym::ION_SYMBOL_TABLE) => value.as_struct(),
            _ => None,
        };
        let Some(table) = directive else {
            return Err(SchemaError::MaterializedSymbolTable {
                ion_type: format!("{:?}", value.ion_type()),
            }
            .into());
        };

        match table.get(sym::IMPORTS).map(|v| &v.data) {
            // append to the current context
            Some(IonData::Symbol(sym::ION_SYMBOL_TABLE)) => {}
            Some(IonData::List(items)) => {
                doc.imports = vec![ImportDescriptor::system()];
                doc.symbols.clear();
                for item in items {
                    if let Some(import) = read_import(item)? {
                        doc.imports.push(import);
                    }
                }
            }
            _ => {
                doc.imports = vec![ImportDescriptor::system()];
                doc.symbols.clear();
            }
        }

        if let Some(list) = table.get(sym::SYMBOLS).and_then(IonValue::as_list) {
            doc.symbols
                .extend(list.iter().map(|s| s.as_str().map(str::to_string)));
        }
    }

    Ok(doc)
}

fn read_import(item: &IonValue) -> Result<Option<ImportDescriptor>> {
    let Some(import) = item.as_struct() else {
        return Ok(None);
    };
    let Some(name) = import.get(sym::NAME).and_then(IonValue::as_str) else {
        return Ok(None);
    };
    if name == SYSTEM_TABLE {
        return Ok(None);
    }
    let version = match import.get(sym::VERSION).and_then(IonValue::as_int) {
        Some(v) => u32::try_from(v).ok().filter(|v| *v >= 1).unwrap_or(1),
        None => 1,
    };
    let max_id = import
        .get(sym::MAX_ID)
        .and_then(IonValue::as_int)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| SchemaError::InvalidImport {
            name: name.to_string(),
            reason: "missing or invalid max_id".to_string(),
        })?;
    Ok(Some(ImportDescriptor {
        name: name.to_string(),
        version,
        max_id,
    }))
}

/// Builder for the output local symbol table.
///
/// IDs are stable for the life of the builder: everything the document
/// already declared keeps its ID, new texts are appended.
#[derive(Debug, Clone)]
pub struct LocalSymbolTableBuilder {
    imports: Vec<ImportDescriptor>,
    import_max_id: u64,
    symbols: Vec<Option<String>>,
    /// Number of leading `symbols` declared by the document.
    declared: usize,
    index: HashMap<String, SymbolId>,
}

impl LocalSymbolTableBuilder {
    /// Builder importing `shared` after the system table.
    pub fn new(shared: &SharedSymbolTable) -> Self {
        let mut index = HashMap::new();
        for (i, text) in SYSTEM_SYMBOLS.iter().enumerate() {
            index.insert(text.to_string(), i as SymbolId + 1);
        }
        Self {
            imports: vec![ImportDescriptor {
                name: shared.name.clone(),
                version: shared.version,
                max_id: shared.max_id(),
            }],
            import_max_id: SYSTEM_MAX_ID + shared.max_id(),
            symbols: Vec::new(),
            declared: 0,
            index,
        }
    }

    /// Reserve the next ID for a symbol the document itself declared.
    /// Unlike [`add`](Self::add) this always takes a new slot.
    pub fn declare(&mut self, text: Option<&str>) -> SymbolId {
        let id = self.max_id() + 1;
        if let Some(text) = text {
            self.index.entry(text.to_string()).or_insert(id);
        }
        self.symbols.push(text.map(str::to_string));
        self.declared = self.symbols.len();
        id
    }

    /// ID for `text`, appending it if it is new.
    ///
    /// Text of the form `$<n>` is already a symbol ID and is returned as is.
    /// Any other `$` text cannot be interpreted and maps to `$0`.
    pub fn add(&mut self, text: &str) -> SymbolId {
        if let Some(digits) = text.strip_prefix('$') {
            return match digits.parse::<SymbolId>() {
                Ok(id) => id,
                Err(_) => {
                    warn!(symbol = text, "unable to interpret symbol");
                    UNKNOWN_SYMBOL
                }
            };
        }
        if let Some(&id) = self.index.get(text) {
            return id;
        }
        let id = self.max_id() + 1;
        self.symbols.push(Some(text.to_string()));
        self.index.insert(text.to_string(), id);
        id
    }

    pub fn token(&mut self, text: &str) -> SymbolToken {
        let sid = self.add(text);
        SymbolToken {
            text: text.to_string(),
            sid,
        }
    }

    pub fn token_for_id(&self, sid: SymbolId) -> SymbolToken {
        SymbolToken {
            text: self.text(sid).unwrap_or_else(|| format!("${sid}")),
            sid,
        }
    }

    /// Text of a symbol: system and local symbols have real text, shared
    /// symbols have their `$<n>` placeholder.
    pub fn text(&self, sid: SymbolId) -> Option<String> {
        if sid == UNKNOWN_SYMBOL {
            return None;
        }
        if sid <= SYSTEM_MAX_ID {
            return Some(SYSTEM_SYMBOLS[(sid - 1) as usize].to_string());
        }
        if sid <= self.import_max_id {
            return Some(format!("${sid}"));
        }
        let local = usize::try_from(sid - self.import_max_id - 1).ok()?;
        self.symbols.get(local).cloned().flatten()
    }

    pub fn max_id(&self) -> u64 {
        self.import_max_id + self.symbols.len() as u64
    }

    /// Symbols appended since the document's own declarations.
    pub fn added(&self) -> &[Option<String>] {
        &self.symbols[self.declared..]
    }

    pub fn build(self) -> LocalSymbolTable {
        LocalSymbolTable {
            max_id: self.max_id(),
            imports: self.imports,
            symbols: self.symbols,
            declared: self.declared,
        }
    }
}

/// Finished local symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSymbolTable {
    /// Imports after the system table.
    pub imports: Vec<ImportDescriptor>,
    pub symbols: Vec<Option<String>>,
    pub declared: usize,
    pub max_id: u64,
}

impl LocalSymbolTable {
    pub fn added(&self) -> &[Option<String>] {
        &self.symbols[self.declared..]
    }

    /// `$ion_symbol_table::{imports: [...], symbols: [...]}`
    pub fn to_ion(&self) -> IonValue {
        let mut fields = vec![(
            sym::IMPORTS,
            IonData::List(self.imports.iter().map(ImportDescriptor::to_ion).collect()).into(),
        )];
        if !self.symbols.is_empty() {
            let symbols = self
                .symbols
                .iter()
                .map(|s| match s {
                    Some(text) => IonValue::new(IonData::String(text.clone())),
                    None => IonValue::new(IonData::Null(IonType::String)),
                })
                .collect();
            fields.push((sym::SYMBOLS, IonData::List(symbols).into()));
        }
        IonValue::new(IonData::Struct(IonStruct {
            fields,
            sorted: false,
        }))
        .with_annotations(vec![sym::ION_SYMBOL_TABLE])
    }

    /// The table as a BVM-prefixed Ion stream.
    pub fn encode(&self) -> Vec<u8> {
        encode_stream(&[self.to_ion()])
    }
}

/// Legacy numeric references (`eid`) and the symbol text each stands for.
#[derive(Debug, Clone, Default)]
pub struct EidTranslations {
    map: HashMap<i64, String>,
}

impl EidTranslations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, eid: i64, kfxid: String) {
        self.map.insert(eid, kfxid);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Symbol for `eid`, or `None` if the translation table has no entry.
    pub fn resolve(&self, eid: i64, symbols: &mut LocalSymbolTableBuilder) -> Option<SymbolId> {
        self.map.get(&eid).map(|kfxid| symbols.add(kfxid))
    }
}
