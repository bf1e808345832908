//! Integration test: finalize guards, throttling and corruption detection.
//!
//! Validates that:
//! - finalize never overwrites an existing file
//! - the write cap holds across the whole payload (manual clock)
//! - payload and header damage is reported, not decoded

use std::sync::Arc;
use std::time::Duration;

use column_file::format::FIXED_HEADER_SIZE;
use column_file::{
    Clock, ColumnDef, ColumnType, CompressKind, ManualClock, Row, SegmentError, SegmentReader, SegmentWriter,
    TableSchema, Value, WriterOptions,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MIB: u64 = 1024 * 1024;

fn schema() -> Arc<TableSchema> {
    Arc::new(
        TableSchema::new(vec![
            ColumnDef::new(0, "ts", ColumnType::BigInt).not_null(),
            ColumnDef::new(1, "reading", ColumnType::Double),
        ])
        .with_rows_per_block(256),
    )
}

fn row(i: i64) -> Row {
    vec![
        Value::BigInt(1_700_000_000_000 + i * 1000),
        Value::Double((i as f64).sin() * 1e6),
    ]
}

fn write_rows(writer: &mut SegmentWriter, n: i64) {
    for i in 0..n {
        writer.write(&row(i)).unwrap();
    }
}

// ---------------------------------------------------------------------------
// Tests: Exclusive Create
// ---------------------------------------------------------------------------

#[test]
fn finalize_refuses_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("taken.col");
    let original = b"somebody else's segment".to_vec();
    std::fs::write(&path, &original).unwrap();

    let mut writer = SegmentWriter::new(&path, schema(), WriterOptions::default());
    writer.init(0).unwrap();
    write_rows(&mut writer, 100);

    let err = writer.finalize().unwrap_err();
    assert!(matches!(err, SegmentError::AlreadyExists(_)), "unexpected error: {}", err);
    assert_eq!(err.code(), "FILE_EXISTS");
    assert_eq!(std::fs::read(&path).unwrap(), original, "existing file must be untouched");
}

#[test]
fn missing_directory_is_io_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("no/such/dir/seg.col");
    let mut writer = SegmentWriter::new(&path, schema(), WriterOptions::default());
    writer.init(0).unwrap();
    write_rows(&mut writer, 3);
    assert!(matches!(writer.finalize().unwrap_err(), SegmentError::Io(_)));
}

// ---------------------------------------------------------------------------
// Tests: Throughput Cap
// ---------------------------------------------------------------------------

#[test]
fn write_cap_bounds_total_duration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("capped.col");
    let clock = Arc::new(ManualClock::new());

    let mut writer =
        SegmentWriter::new(&path, schema(), WriterOptions::default()).with_clock(clock.clone());
    writer.init(1).unwrap();
    write_rows(&mut writer, 200_000);
    writer.finalize().unwrap();

    let reader = SegmentReader::open(&path).unwrap();
    let payload = reader.header().payload_length();
    assert!(payload > MIB, "payload of {} bytes should exceed the 1 MiB/s cap", payload);

    let minimum = Duration::from_secs_f64(payload as f64 / MIB as f64);
    assert!(
        clock.now() >= minimum,
        "wrote {} bytes in {:?}, cap requires at least {:?}",
        payload,
        clock.now(),
        minimum
    );
    assert!(clock.slept() > Duration::ZERO);
}

#[test]
fn uncapped_write_never_sleeps() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new());
    let mut writer = SegmentWriter::new(dir.path().join("free.col"), schema(), WriterOptions::default())
        .with_clock(clock.clone());
    writer.init(0).unwrap();
    write_rows(&mut writer, 50_000);
    writer.finalize().unwrap();
    assert_eq!(clock.slept(), Duration::ZERO);
}

// ---------------------------------------------------------------------------
// Tests: Corruption
// ---------------------------------------------------------------------------

fn finished_segment(dir: &TempDir, kind: CompressKind) -> Vec<u8> {
    let path = dir.path().join("good.col");
    let schema = Arc::new(
        TableSchema::new(vec![
            ColumnDef::new(0, "ts", ColumnType::BigInt).not_null(),
            ColumnDef::new(1, "reading", ColumnType::Double),
        ])
        .with_compression(kind),
    );
    let mut writer = SegmentWriter::new(&path, schema, WriterOptions::default());
    writer.init(0).unwrap();
    write_rows(&mut writer, 1000);
    writer.finalize().unwrap();
    std::fs::read(&path).unwrap()
}

#[test]
fn payload_bit_flip_is_checksum_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut bytes = finished_segment(&dir, CompressKind::Snappy);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let err = SegmentReader::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, SegmentError::ChecksumMismatch { .. }), "unexpected error: {}", err);
    assert_eq!(err.code(), "CORRUPTION");

    // The header itself is intact.
    let reader = SegmentReader::from_bytes_unchecked(&bytes).unwrap();
    assert!(reader.verify_checksum().is_err());
}

#[test]
fn header_bit_flip_is_detected() {
    let dir = TempDir::new().unwrap();
    let mut bytes = finished_segment(&dir, CompressKind::None);
    bytes[FIXED_HEADER_SIZE + 3] ^= 0x40;
    assert!(SegmentReader::from_bytes(&bytes).is_err());
}

#[test]
fn truncated_segment_is_rejected() {
    let dir = TempDir::new().unwrap();
    let bytes = finished_segment(&dir, CompressKind::Lz4);
    let err = SegmentReader::from_bytes(&bytes[..bytes.len() - 10]).unwrap_err();
    assert!(matches!(err, SegmentError::Corruption(_)), "unexpected error: {}", err);
    assert!(SegmentReader::from_bytes(&bytes[..FIXED_HEADER_SIZE - 1]).is_err());
}

#[test]
fn unfinalized_placeholder_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut bytes = finished_segment(&dir, CompressKind::None);
    // Zero file_length and checksum: what a crash between phases leaves.
    bytes[0..12].fill(0);
    let err = SegmentReader::from_bytes_unchecked(&bytes).unwrap_err();
    assert!(err.to_string().contains("never finalized"), "unexpected error: {}", err);
}
