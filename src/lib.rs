//! Column File: compressed, seekable columnar segment files.
//!
//! A [`SegmentWriter`] turns rows into one immutable segment; a
//! [`SegmentReader`] maps it back and decodes columns, whole or from any
//! row via the block index.

pub mod checksum;
pub mod compression;
pub mod error;
pub mod format;
pub mod schema;
pub mod throttle;

pub use compression::CompressKind;
pub use error::{Result, SegmentError};
pub use format::{SegmentReader, SegmentWriter, WriterState};
pub use schema::{ColumnDef, ColumnType, Row, TableSchema, Value, WriterOptions};
pub use throttle::{Clock, ManualClock, SystemClock, Throttle};
