//! Table schema, column values and writer options.
//!
//! The schema is read-only configuration shared by every writer of a table.
//! It is stored as JSON next to the data, the same way the database config
//! is.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compression::CompressKind;
use crate::error::{Result, SegmentError};

/// Default uncompressed chunk size for every stream (256 KiB).
pub const DEFAULT_STREAM_BUFFER_SIZE: u32 = 256 * 1024;

/// Default rows per row block.
pub const DEFAULT_ROWS_PER_BLOCK: u32 = 1024;

/// Default bloom filter false-positive target.
pub const DEFAULT_BLOOM_FILTER_FPP: f64 = 0.05;

// ── Column Type ────────────────────────────────────────────────────

/// Logical column type (stored as u8 in the header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum ColumnType {
    Boolean = 0,
    TinyInt = 1,
    Int = 2,
    BigInt = 3,
    Double = 4,
    Varchar = 5,
}

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
        }
    }
}

// ── Value ──────────────────────────────────────────────────────────

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Varchar(String),
}

/// Row as handed to the segment writer: one value per root column.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be stored in a column of `column_type`.
    pub fn matches(&self, column_type: ColumnType) -> bool {
        matches!(
            (self, column_type),
            (Value::Null, _)
                | (Value::Boolean(_), ColumnType::Boolean)
                | (Value::TinyInt(_), ColumnType::TinyInt)
                | (Value::Int(_), ColumnType::Int)
                | (Value::BigInt(_), ColumnType::BigInt)
                | (Value::Double(_), ColumnType::Double)
                | (Value::Varchar(_), ColumnType::Varchar)
        )
    }

    /// Canonical bytes hashed into bloom filter keys. Integers of every
    /// width hash as i64 so a probe does not depend on the column width.
    pub fn key_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(vec![*b as u8]),
            Value::TinyInt(v) => Some(i64::from(*v).to_le_bytes().to_vec()),
            Value::Int(v) => Some(i64::from(*v).to_le_bytes().to_vec()),
            Value::BigInt(v) => Some(v.to_le_bytes().to_vec()),
            Value::Double(v) => Some(v.to_bits().to_le_bytes().to_vec()),
            Value::Varchar(s) => Some(s.as_bytes().to_vec()),
        }
    }

    /// Order two non-null values of the same type. Doubles use IEEE total
    /// order, strings compare bytewise.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::TinyInt(a), Value::TinyInt(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => Some(a.total_cmp(b)),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            _ => None,
        }
    }

    /// Convert a JSON cell to a value of `column_type`.
    pub fn from_json(json: &serde_json::Value, column_type: ColumnType) -> Result<Value> {
        use serde_json::Value as J;

        let mismatch = || {
            SegmentError::Schema(format!(
                "cannot store {} in a {} column",
                json,
                column_type.name()
            ))
        };

        match (json, column_type) {
            (J::Null, _) => Ok(Value::Null),
            (J::Bool(b), ColumnType::Boolean) => Ok(Value::Boolean(*b)),
            (J::Number(n), ColumnType::TinyInt) => n
                .as_i64()
                .and_then(|v| i8::try_from(v).ok())
                .map(Value::TinyInt)
                .ok_or_else(mismatch),
            (J::Number(n), ColumnType::Int) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int)
                .ok_or_else(mismatch),
            (J::Number(n), ColumnType::BigInt) => n.as_i64().map(Value::BigInt).ok_or_else(mismatch),
            (J::Number(n), ColumnType::Double) => n.as_f64().map(Value::Double).ok_or_else(mismatch),
            (J::String(s), ColumnType::Varchar) => Ok(Value::Varchar(s.clone())),
            _ => Err(mismatch()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::from(*b),
            Value::TinyInt(v) => serde_json::Value::from(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::BigInt(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Value::from(*v),
            Value::Varchar(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Varchar(s) => write!(f, "{:?}", s),
        }
    }
}

// ── Column Definition ──────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Unique column id, stable across schema changes. Names streams.
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub bloom_filter: bool,
    /// Dictionary-encode a VARCHAR column instead of storing it directly.
    #[serde(default)]
    pub dictionary: bool,
    /// Only root columns are materialized into segments.
    #[serde(default = "default_true")]
    pub is_root_column: bool,
}

impl ColumnDef {
    pub fn new(id: u32, name: &str, column_type: ColumnType) -> Self {
        Self {
            id,
            name: name.to_string(),
            column_type,
            nullable: true,
            bloom_filter: false,
            dictionary: false,
            is_root_column: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_bloom_filter(mut self) -> Self {
        self.bloom_filter = true;
        self
    }

    pub fn with_dictionary(mut self) -> Self {
        self.dictionary = true;
        self
    }
}

// ── Table Schema ───────────────────────────────────────────────────

fn default_rows_per_block() -> u32 {
    DEFAULT_ROWS_PER_BLOCK
}

fn default_bloom_filter_fpp() -> f64 {
    DEFAULT_BLOOM_FILTER_FPP
}

/// Ordered column definitions plus table-wide storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub compress_kind: CompressKind,
    #[serde(default = "default_rows_per_block")]
    pub num_rows_per_block: u32,
    #[serde(default = "default_bloom_filter_fpp")]
    pub bloom_filter_fpp: f64,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            compress_kind: CompressKind::None,
            num_rows_per_block: DEFAULT_ROWS_PER_BLOCK,
            bloom_filter_fpp: DEFAULT_BLOOM_FILTER_FPP,
        }
    }

    pub fn with_compression(mut self, kind: CompressKind) -> Self {
        self.compress_kind = kind;
        self
    }

    pub fn with_rows_per_block(mut self, rows: u32) -> Self {
        self.num_rows_per_block = rows;
        self
    }

    pub fn with_bloom_filter_fpp(mut self, fpp: f64) -> Self {
        self.bloom_filter_fpp = fpp;
        self
    }

    /// Schema indices of root columns, in schema order.
    pub fn root_column_indices(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_root_column)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_rows_per_block == 0 {
            return Err(SegmentError::Schema("num_rows_per_block must be positive".into()));
        }
        if !(self.bloom_filter_fpp > 0.0 && self.bloom_filter_fpp < 1.0) {
            return Err(SegmentError::Schema(format!(
                "bloom_filter_fpp must be in (0, 1), got {}",
                self.bloom_filter_fpp
            )));
        }
        if !self.columns.iter().any(|c| c.is_root_column) {
            return Err(SegmentError::Schema("schema has no root columns".into()));
        }
        let mut ids = HashSet::new();
        for column in &self.columns {
            if !ids.insert(column.id) {
                return Err(SegmentError::Schema(format!("duplicate column id {}", column.id)));
            }
            if column.dictionary && column.column_type != ColumnType::Varchar {
                return Err(SegmentError::Schema(format!(
                    "column '{}': dictionary encoding needs VARCHAR, got {}",
                    column.name,
                    column.column_type.name()
                )));
            }
        }
        Ok(())
    }

    /// Read a schema from a JSON file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let schema: Self = serde_json::from_str(&contents)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Write the schema as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ── Writer Options ─────────────────────────────────────────────────

/// Per-writer settings that are not part of the table definition. The
/// write cap is not one of them; it is passed to `SegmentWriter::init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOptions {
    pub stream_buffer_size: u32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
        }
    }
}
