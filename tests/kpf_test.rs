//! End-to-end conversion of generated KPF archives.
//!
//! Each test builds a real SQLite database with the conversion tool's
//! table layout, wraps it in KDF frames, zips it as `resources/book.kdf`
//! and runs the full pipeline over it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use num_bigint::BigInt;
use rusqlite::{Connection, params};
use tempfile::TempDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use kfxpack::kfx::ion::writer::encode_stream;
use kfxpack::kfx::ion::{ION_BVM, IonData, IonStruct, IonType, IonValue, read_value_stream};
use kfxpack::kfx::kdf::{FRAME_FINGERPRINT, FRAME_HEADER, WRAPPER_FRAME_LENGTH, WRAPPER_LENGTH, WRAPPER_OFFSET};
use kfxpack::kfx::symbols::{SYSTEM_MAX_ID, sym};
use kfxpack::kfx::tables::{DRM_SIGNATURE, KNOWN_SCHEMAS};
use kfxpack::{Config, Error, ErrorClass, FragmentIssue, SchemaError, Severity, convert_kdf_bytes, convert_kpf};

const YJ_MAX_ID: u64 = 800;

fn schema(name: &str) -> &'static str {
    KNOWN_SCHEMAS
        .iter()
        .find(|(_, table)| *table == name)
        .map(|(sql, _)| *sql)
        .unwrap()
}

fn struct_value(fields: Vec<(u64, IonValue)>) -> IonValue {
    IonValue::new(IonData::Struct(IonStruct {
        fields,
        sorted: false,
    }))
}

fn string(text: &str) -> IonValue {
    IonValue::new(IonData::String(text.to_string()))
}

fn int(value: i64) -> IonValue {
    IonValue::new(IonData::Int(BigInt::from(value)))
}

/// `$ion_symbol_table::{imports: [{name: "YJ_symbols", version: 10, max_id}], symbols: [...]}`
fn symbol_table(max_id: u64, locals: &[&str]) -> Vec<u8> {
    let import = struct_value(vec![
        (sym::NAME, string("YJ_symbols")),
        (sym::VERSION, int(10)),
        (sym::MAX_ID, int(max_id as i64)),
    ]);
    let mut fields = vec![(sym::IMPORTS, IonValue::new(IonData::List(vec![import])))];
    if !locals.is_empty() {
        let symbols = locals.iter().map(|s| string(s)).collect();
        fields.push((sym::SYMBOLS, IonValue::new(IonData::List(symbols))));
    }
    encode_stream(&[struct_value(fields).with_annotations(vec![sym::ION_SYMBOL_TABLE])])
}

/// A book database under construction.
struct Book {
    conn: Connection,
    path: PathBuf,
}

impl Book {
    fn new(dir: &Path, max_id: u64) -> Self {
        let path = dir.join("source.sqlite");
        let conn = Connection::open(&path).unwrap();
        for table in ["fragments", "capabilities", "kfxid_translation", "fragment_properties"] {
            conn.execute_batch(schema(table)).unwrap();
        }
        conn.execute(
            "INSERT INTO capabilities (key, version) VALUES ('db.schema', 1)",
            [],
        )
        .unwrap();
        let book = Self { conn, path };
        book.row("$ion_symbol_table", "blob", &symbol_table(YJ_MAX_ID, &[]))
            .row("max_id", "blob", &encode_stream(&[int(max_id as i64)]))
    }

    fn row(self, id: &str, ptype: &str, payload: &[u8]) -> Self {
        self.conn
            .execute(
                "INSERT INTO fragments (id, payload_type, payload_value) VALUES (?1, ?2, ?3)",
                params![id, ptype, payload],
            )
            .unwrap();
        self
    }

    fn fragment(self, id: &str, value: IonValue) -> Self {
        self.row(id, "blob", &encode_stream(&[value]))
    }

    fn eid(self, eid: i64, kfxid: &str) -> Self {
        self.conn
            .execute(
                "INSERT INTO kfxid_translation (eid, kfxid) VALUES (?1, ?2)",
                params![eid, kfxid],
            )
            .unwrap();
        self
    }

    /// Close the database and return its bytes.
    fn finish(self) -> Vec<u8> {
        let Book { conn, path } = self;
        conn.close().map_err(|(_, e)| e).unwrap();
        fs::read(path).unwrap()
    }
}

fn wrap(db: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; WRAPPER_LENGTH];
    frame[..4].copy_from_slice(&FRAME_FINGERPRINT);
    frame[4..9].copy_from_slice(&FRAME_HEADER);

    let mut out = db[..WRAPPER_OFFSET].to_vec();
    for chunk in db[WRAPPER_OFFSET..].chunks(WRAPPER_FRAME_LENGTH) {
        out.extend_from_slice(&frame);
        out.extend_from_slice(chunk);
    }
    out
}

fn write_kpf(dir: &Path, kdf: &[u8]) -> PathBuf {
    let path = dir.join("book.kpf");
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file("book.kpfinfo", stored).unwrap();
    zip.write_all(b"{}").unwrap();
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file("resources/book.kdf", deflated).unwrap();
    zip.write_all(kdf).unwrap();
    zip.finish().unwrap();
    path
}

fn kpf(dir: &TempDir, book: Book) -> PathBuf {
    let db = book.finish();
    write_kpf(dir.path(), &wrap(&db))
}

#[test]
fn test_symbol_context_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("source.sqlite");
    let conn = Connection::open(&path).unwrap();
    for table in ["fragments", "capabilities"] {
        conn.execute_batch(schema(table)).unwrap();
    }
    let book = Book { conn, path };
    let book = book
        .row("$ion_symbol_table", "blob", &symbol_table(5, &[]))
        .row("max_id", "blob", &encode_stream(&[int(5)]));

    let container = convert_kpf(kpf(&dir, book), &Config::default()).unwrap();
    assert!(container.fragments.is_empty());
    assert!(container.issues.is_empty());
    assert!(container.symbols.added().is_empty());
    assert_eq!(container.symbols.max_id, SYSTEM_MAX_ID + 5);
    assert!(container.symbol_data.starts_with(&ION_BVM));
}

#[test]
fn test_path_row_becomes_resource() {
    let dir = TempDir::new().unwrap();
    let book = Book::new(dir.path(), YJ_MAX_ID)
        .row("cover.jpg", "path", b"cover.jpg")
        .row("resource/rsrc2", "path", b"rsrc2");

    let container = convert_kpf(kpf(&dir, book), &Config::default()).unwrap();
    assert_eq!(container.fragments.len(), 2);

    let cover = &container.fragments[0];
    assert_eq!(cover.fid.text, "resource/cover.jpg");
    assert_eq!(cover.ftype.sid, sym::RAW_MEDIA);
    assert_eq!(cover.data, b"cover.jpg");
    assert!(cover.is_raw());
    assert_eq!(container.fragments[1].fid.text, "resource/rsrc2");
    assert_eq!(container.capabilities.len(), 1);
    assert_eq!(container.capabilities[0].key, "db.schema");
}

#[test]
fn test_version_marker_only_rows() {
    let dir = TempDir::new().unwrap();
    let book = Book::new(dir.path(), YJ_MAX_ID)
        .row("book_navigation", "blob", &ION_BVM)
        .row("c7", "blob", &ION_BVM)
        .row("c8", "blob", b"");

    let container = convert_kpf(kpf(&dir, book), &Config::default()).unwrap();
    assert!(container.fragments.is_empty());
    assert_eq!(
        container.issues,
        vec![
            FragmentIssue::VersionMarkerOnly {
                id: "book_navigation".into()
            },
            FragmentIssue::VersionMarkerOnly { id: "c7".into() },
            FragmentIssue::EmptyPayload {
                id: "c8".into(),
                ftype: "$0".into()
            },
        ]
    );
    let loud: Vec<_> = container.issues_at_least(Severity::Warn).collect();
    assert_eq!(loud.len(), 1);
    assert_eq!(loud[0].id(), "c7");
}

#[test]
fn test_string_reference_becomes_local_symbol() {
    let dir = TempDir::new().unwrap();
    let content = struct_value(vec![(
        165,
        string("res/42").with_annotations(vec![sym::KFX_ID]),
    )])
    .with_annotations(vec![260]);
    let book = Book::new(dir.path(), YJ_MAX_ID).fragment("c0", content);

    let container = convert_kpf(kpf(&dir, book), &Config::default()).unwrap();
    assert_eq!(container.fragments.len(), 1);
    let fragment = &container.fragments[0];
    assert_eq!(fragment.ftype.sid, 260);
    assert_eq!(fragment.fid.text, "c0");

    let first_local = SYSTEM_MAX_ID + YJ_MAX_ID + 1;
    assert_eq!(
        container.symbols.symbols,
        vec![Some("res/42".to_string()), Some("c0".to_string())]
    );
    assert_eq!(fragment.fid.sid, first_local + 1);

    let values = read_value_stream(&fragment.data).unwrap();
    assert_eq!(values.len(), 1);
    assert!(values[0].annotations.is_empty());
    assert_eq!(
        values[0].get(165),
        Some(&IonValue::new(IonData::Symbol(first_local)))
    );
}

#[test]
fn test_eid_references() {
    let dir = TempDir::new().unwrap();
    let content = IonValue::new(IonData::List(vec![
        int(1001).with_annotations(vec![sym::KFX_ID]),
        int(1002).with_annotations(vec![sym::KFX_ID]),
        string("kept"),
    ]))
    .with_annotations(vec![259, sym::FRAGMENT_LINK]);
    let book = Book::new(dir.path(), YJ_MAX_ID)
        .eid(1001, "section-1")
        .fragment("c1", content);

    let container = convert_kpf(kpf(&dir, book), &Config::default()).unwrap();
    let fragment = container.fragment("c1").unwrap();
    assert_eq!(fragment.ftype.sid, 259);

    let values = read_value_stream(&fragment.data).unwrap();
    let first_local = SYSTEM_MAX_ID + YJ_MAX_ID + 1;
    assert_eq!(
        values[0].as_list().unwrap(),
        &[IonValue::new(IonData::Symbol(first_local)), string("kept")]
    );
    assert_eq!(
        container.issues,
        vec![FragmentIssue::UnresolvedEid {
            id: "c1".into(),
            eid: "1002".into()
        }]
    );
}

#[test]
fn test_bad_annotations_skip_only_that_fragment() {
    let dir = TempDir::new().unwrap();
    let book = Book::new(dir.path(), YJ_MAX_ID)
        .fragment("c0", int(1))
        .fragment("c1", int(2).with_annotations(vec![260, 261]))
        .fragment("c2", int(3).with_annotations(vec![260]));

    let container = convert_kpf(kpf(&dir, book), &Config::default()).unwrap();
    assert_eq!(container.fragments.len(), 1);
    assert_eq!(container.fragments[0].fid.text, "c2");
    assert_eq!(
        container.issues,
        vec![
            FragmentIssue::MissingAnnotation { id: "c0".into() },
            FragmentIssue::AnnotationCount {
                id: "c1".into(),
                count: 2
            },
        ]
    );
}

#[test]
fn test_annotated_null_is_kept() {
    let dir = TempDir::new().unwrap();
    let null = IonValue::new(IonData::Null(IonType::Struct)).with_annotations(vec![260]);
    let book = Book::new(dir.path(), YJ_MAX_ID)
        .fragment("c0", null)
        // a NOP pad only, no value at all
        .row("c1", "blob", &[0xe0, 0x01, 0x00, 0xea, 0x00]);

    let container = convert_kpf(kpf(&dir, book), &Config::default()).unwrap();
    assert_eq!(container.issues, vec![FragmentIssue::EmptyValue { id: "c1".into() }]);
    assert_eq!(container.fragments.len(), 1);
    let fragment = &container.fragments[0];
    assert_eq!(fragment.ftype.sid, 260);
    assert_eq!(
        read_value_stream(&fragment.data).unwrap(),
        vec![IonValue::new(IonData::Null(IonType::Struct))]
    );
}

#[test]
fn test_drm_payload_is_content_policy_error() {
    let dir = TempDir::new().unwrap();
    let mut payload = DRM_SIGNATURE.to_vec();
    payload.extend_from_slice(&[0xff; 32]);
    let book = Book::new(dir.path(), YJ_MAX_ID)
        .fragment("c0", int(1).with_annotations(vec![260]))
        .row("c1", "blob", &payload)
        .row("c2", "bogus", b"x");

    let err = convert_kpf(kpf(&dir, book), &Config::default()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ContentPolicy);
    assert!(matches!(err, Error::Drm { ref id } if id == "c1"));
}

#[test]
fn test_max_id_mismatch_fails_before_fragments() {
    let dir = TempDir::new().unwrap();
    // this row would be a structural error if it were ever decoded
    let book = Book::new(dir.path(), YJ_MAX_ID + 1).row("c0", "blob", &[0xe0, 0x01, 0x00, 0xea, 0xf0]);

    let err = convert_kpf(kpf(&dir, book), &Config::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Schema(SchemaError::MaxIdMismatch {
            max_id: 801,
            expected: 800,
            ..
        })
    ));
}

#[test]
fn test_malformed_fragment_is_fatal() {
    let dir = TempDir::new().unwrap();
    let book = Book::new(dir.path(), YJ_MAX_ID).row("c0", "blob", &[0xe0, 0x01, 0x00, 0xea, 0xf0]);

    let err = convert_kpf(kpf(&dir, book), &Config::default()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(err.to_string().contains("fragment c0"));
}

#[test]
fn test_unexpected_payload_type() {
    let dir = TempDir::new().unwrap();
    let book = Book::new(dir.path(), YJ_MAX_ID).row("c0", "bogus", b"x");

    let err = convert_kpf(kpf(&dir, book), &Config::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Schema(SchemaError::UnexpectedPayloadType { ref id, ref ptype }) if id == "c0" && ptype == "bogus"
    ));
}

#[test]
fn test_corrupted_frame_is_schema_error() {
    let dir = TempDir::new().unwrap();
    let db = Book::new(dir.path(), YJ_MAX_ID).finish();
    let mut kdf = wrap(&db);
    kdf[WRAPPER_OFFSET] ^= 0xff;

    let err = convert_kpf(write_kpf(dir.path(), &kdf), &Config::default()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Schema);
    assert!(matches!(
        err,
        Error::Schema(SchemaError::BadFrameFingerprint { offset: WRAPPER_OFFSET })
    ));
}

#[test]
fn test_kept_database_matches_original() {
    let dir = TempDir::new().unwrap();
    let db = Book::new(dir.path(), YJ_MAX_ID).finish();
    let work = dir.path().join("work");
    let config = Config {
        work_dir: Some(work.clone()),
        keep_unwrapped: true,
        ..Config::default()
    };

    let container = convert_kdf_bytes(&wrap(&db), &config).unwrap();
    assert!(container.fragments.is_empty());
    assert_eq!(fs::read(work.join("book.sqlite")).unwrap(), db);
}

#[test]
fn test_missing_kdf_entry() {
    let dir = TempDir::new().unwrap();
    let db = Book::new(dir.path(), YJ_MAX_ID).finish();
    let path = write_kpf(dir.path(), &wrap(&db));
    let config = Config {
        kdf_entry: "resources/other.kdf".into(),
        ..Config::default()
    };

    let err = convert_kpf(path, &config).unwrap_err();
    assert!(matches!(
        err,
        Error::Schema(SchemaError::MissingArchiveEntry(ref entry)) if entry == "resources/other.kdf"
    ));
}
