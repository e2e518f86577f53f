//! Typed access to the unwrapped KDF database.
//!
//! Amazon changes this database at will, so nothing is read before every
//! table has been matched against a schema we know. Only fixed queries are
//! issued.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result, SchemaError};
use crate::kfx::symbols::EidTranslations;

/// Every table definition we have seen from the conversion tool, with its name.
pub const KNOWN_SCHEMAS: [(&str, &str); 7] = [
    (
        "CREATE TABLE index_info(namespace char(256), index_name char(256), property char(40), primary key (namespace, index_name)) without rowid",
        "index_info",
    ),
    (
        "CREATE TABLE kfxid_translation(eid INTEGER, kfxid char(40), primary key(eid)) without rowid",
        "kfxid_translation",
    ),
    (
        "CREATE TABLE fragment_properties(id char(40), key char(40), value char(40), primary key (id, key, value)) without rowid",
        "fragment_properties",
    ),
    (
        "CREATE TABLE fragments(id char(40), payload_type char(10), payload_value blob, primary key (id))",
        "fragments",
    ),
    (
        "CREATE TABLE gc_fragment_properties(id varchar(40), key varchar(40), value varchar(40), primary key (id, key, value)) without rowid",
        "gc_fragment_properties",
    ),
    (
        "CREATE TABLE gc_reachable(id varchar(40), primary key (id)) without rowid",
        "gc_reachable",
    ),
    (
        "CREATE TABLE capabilities(key char(20), version smallint, primary key (key, version)) without rowid",
        "capabilities",
    ),
];

pub const MANDATORY_TABLES: [&str; 2] = ["capabilities", "fragments"];

pub const TABLE_FRAGMENTS: &str = "fragments";
pub const TABLE_KFXID_TRANSLATION: &str = "kfxid_translation";
pub const TABLE_FRAGMENT_PROPERTIES: &str = "fragment_properties";

/// Leading bytes of a DRM protected payload.
pub const DRM_SIGNATURE: &[u8; 8] = b"\xeaDRMION\xee";

/// Fragment rows holding symbol context rather than content.
pub const SYMBOL_TABLE_ID: &str = "$ion_symbol_table";
pub const MAX_ID_ID: &str = "max_id";

/// One row of the `fragments` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFragmentRow {
    pub id: String,
    pub payload_type: String,
    pub payload: Vec<u8>,
}

impl RawFragmentRow {
    /// Build from `(id, payload_type, payload_value)`.
    ///
    /// A payload may be stored as a blob or as text; both are taken as raw
    /// bytes. Protected payloads are refused here so that they can never
    /// reach the Ion decoder.
    fn from_row(row: &Row<'_>) -> Result<Self> {
        let id: String = row.get(0)?;
        let payload_type: String = row.get(1)?;
        let payload = match row.get_ref(2)? {
            ValueRef::Blob(b) | ValueRef::Text(b) => b.to_vec(),
            ValueRef::Null => Vec::new(),
            ValueRef::Integer(_) | ValueRef::Real(_) => {
                return Err(SchemaError::UnexpectedColumnType {
                    table: TABLE_FRAGMENTS,
                    column: "payload_value",
                }
                .into());
            }
        };
        if payload.starts_with(DRM_SIGNATURE) {
            return Err(Error::Drm { id });
        }
        Ok(Self {
            id,
            payload_type,
            payload,
        })
    }
}

/// A `capabilities` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub key: String,
    pub version: i64,
}

/// An open, schema checked book database.
///
/// The connection is read only and closes when this is dropped.
#[derive(Debug)]
pub struct KdfDatabase {
    conn: Connection,
    tables: BTreeSet<String>,
}

impl KdfDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Validate the schema of an already open database.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let tables = check_schema(&conn)?;
        debug!(tables = ?tables, "book database schema accepted");
        Ok(Self { conn, tables })
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    /// Fail with [`Error::Drm`] if any fragment payload is protected.
    pub fn check_drm(&self) -> Result<()> {
        let protected: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM fragments \
                 WHERE substr(CAST(payload_value AS BLOB), 1, 8) = ?1 LIMIT 1",
                [&DRM_SIGNATURE[..]],
                |row| row.get(0),
            )
            .optional()?;
        match protected {
            Some(id) => Err(Error::Drm { id }),
            None => Ok(()),
        }
    }

    /// The `kfxid_translation` table, empty when the table is absent.
    pub fn read_eid_translations(&self) -> Result<EidTranslations> {
        let mut eids = EidTranslations::new();
        if !self.has_table(TABLE_KFXID_TRANSLATION) {
            return Ok(eids);
        }
        let mut stmt = self.conn.prepare("SELECT eid, kfxid FROM kfxid_translation")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            eids.insert(row.get(0)?, row.get(1)?);
        }
        Ok(eids)
    }

    /// Element type per fragment id, from `fragment_properties`.
    ///
    /// `child` rows are known and ignored; any other key is a schema change.
    pub fn read_fragment_properties(&self) -> Result<HashMap<String, String>> {
        let mut props = HashMap::new();
        if !self.has_table(TABLE_FRAGMENT_PROPERTIES) {
            return Ok(props);
        }
        let mut stmt = self
            .conn
            .prepare("SELECT id, key, value FROM fragment_properties")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let key: String = row.get(1)?;
            let value: String = row.get(2)?;
            match key.as_str() {
                "child" => {}
                "element_type" => {
                    props.insert(id, value);
                }
                _ => return Err(SchemaError::UnknownPropertyKey { id, key, value }.into()),
            }
        }
        Ok(props)
    }

    pub fn read_capabilities(&self) -> Result<Vec<Capability>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, version FROM capabilities ORDER BY key, version")?;
        let rows = stmt.query_map([], |row| {
            Ok(Capability {
                key: row.get(0)?,
                version: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// A single fragment row by id.
    pub fn fragment(&self, id: &str) -> Result<Option<RawFragmentRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, payload_type, payload_value FROM fragments WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => RawFragmentRow::from_row(row).map(Some),
            None => Ok(None),
        }
    }

    /// Visit every content fragment in storage order, skipping the
    /// symbol context rows.
    pub fn for_each_fragment<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(RawFragmentRow) -> Result<()>,
    {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload_type, payload_value FROM fragments \
             WHERE id != ?1 AND id != ?2 ORDER BY rowid",
        )?;
        let mut rows = stmt.query([MAX_ID_ID, SYMBOL_TABLE_ID])?;
        while let Some(row) = rows.next()? {
            f(RawFragmentRow::from_row(row)?)?;
        }
        Ok(())
    }
}

/// Match every table against [`KNOWN_SCHEMAS`] and return the table names.
fn check_schema(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT name, sql FROM sqlite_master WHERE type = 'table'")?;
    let mut rows = stmt.query([])?;
    let mut names = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        let sql: Option<String> = row.get(1)?;
        let sql = sql.unwrap_or_default();
        let Some(&(_, expected)) = KNOWN_SCHEMAS.iter().find(|(known, _)| *known == sql) else {
            return Err(SchemaError::UnknownTableSchema { table, sql }.into());
        };
        if expected != table {
            return Err(SchemaError::TableNameMismatch {
                found: table,
                expected: expected.to_string(),
            }
            .into());
        }
        names.insert(table);
    }

    let missing: Vec<String> = MANDATORY_TABLES
        .iter()
        .filter(|t| !names.contains(**t))
        .map(|t| t.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingTables(missing).into());
    }
    Ok(names)
}
