//! Columnar segment format.
//!
//! Immutable, self-describing segment files: a two-phase header followed by
//! per-column streams (row index, presence, data, lengths, dictionary,
//! bloom filters), each chunk-compressed and seekable by block.

pub mod types;
pub mod stream_name;
pub mod varint;
pub mod run_length;
pub mod out_stream;
pub mod in_stream;
pub mod bloom;
pub mod statistics;
pub mod file_header;
pub mod column_writer;
pub mod column_reader;
pub mod segment_writer;
pub mod segment_reader;

pub use types::*;
pub use stream_name::{StreamKind, StreamName};
pub use run_length::{RunLengthByteReader, RunLengthByteWriter};
pub use out_stream::{ByteSink, OutStream, OutStreamFactory, StreamId};
pub use in_stream::{ByteSource, InStream, PositionProvider};
pub use bloom::BloomFilter;
pub use statistics::ColumnStatistics;
pub use file_header::{FileHeader, FIXED_HEADER_SIZE};
pub use column_writer::{ColumnEncoder, ColumnWriter};
pub use column_reader::{ColumnDecoder, ColumnReader};
pub use segment_writer::{SegmentWriter, WriterState};
pub use segment_reader::SegmentReader;
