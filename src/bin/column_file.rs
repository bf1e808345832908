//! column-file: write, inspect, verify and dump columnar segment files.
//!
//! Usage:
//!   column-file write --schema schema.json --rows rows.jsonl --output seg.col
//!   column-file inspect seg.col
//!   column-file verify seg.col
//!   column-file dump seg.col [--from ROW] [--limit N]
//!
//! Row input is JSON lines. Each line is either an array with one value per
//! root column, or an object keyed by root column name (missing keys are
//! NULL).

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use column_file::schema::DEFAULT_STREAM_BUFFER_SIZE;
use column_file::{ColumnDef, Row, SegmentError, SegmentReader, SegmentWriter, TableSchema, Value, WriterOptions};

#[derive(Parser)]
#[command(name = "column-file")]
#[command(version, about = "Columnar segment file tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a segment from a schema and JSON-lines rows
    Write {
        /// Table schema (JSON)
        #[arg(long)]
        schema: PathBuf,
        /// Rows, one JSON value per line; `-` reads stdin
        #[arg(long)]
        rows: PathBuf,
        /// Segment to create (must not exist)
        #[arg(long, short)]
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_STREAM_BUFFER_SIZE)]
        stream_buffer_size: u32,
        /// Payload write cap in MiB/s, 0 for unlimited
        #[arg(long, default_value_t = 0)]
        write_mbytes_per_sec: u32,
    },
    /// Print the segment header as JSON
    Inspect { segment: PathBuf },
    /// Check the header and payload checksum
    Verify { segment: PathBuf },
    /// Print rows as JSON lines
    Dump {
        segment: PathBuf,
        /// First row to print
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_row(line: &str, columns: &[&ColumnDef]) -> Result<Row> {
    let json: serde_json::Value = serde_json::from_str(line).context("row is not valid JSON")?;
    match json {
        serde_json::Value::Array(values) => {
            if values.len() != columns.len() {
                bail!("row has {} values, schema has {} root columns", values.len(), columns.len());
            }
            values
                .iter()
                .zip(columns)
                .map(|(v, c)| Value::from_json(v, c.column_type).with_context(|| format!("column '{}'", c.name)))
                .collect()
        }
        serde_json::Value::Object(map) => columns
            .iter()
            .map(|c| {
                let v = map.get(&c.name).unwrap_or(&serde_json::Value::Null);
                Value::from_json(v, c.column_type).with_context(|| format!("column '{}'", c.name))
            })
            .collect(),
        other => bail!("row must be a JSON array or object, got {}", other),
    }
}

fn write_segment(
    schema_path: PathBuf,
    rows_path: PathBuf,
    output: PathBuf,
    options: WriterOptions,
    write_mbytes_per_sec: u32,
) -> Result<()> {
    let schema = Arc::new(
        TableSchema::read_from(&schema_path)
            .with_context(|| format!("reading schema {}", schema_path.display()))?,
    );
    let columns: Vec<&ColumnDef> = schema.columns.iter().filter(|c| c.is_root_column).collect();

    let input: Box<dyn BufRead> = if rows_path.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&rows_path).with_context(|| format!("opening {}", rows_path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut writer = SegmentWriter::new(&output, schema.clone(), options);
    writer.init(write_mbytes_per_sec)?;

    for (line_no, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_row(&line, &columns).with_context(|| format!("line {}", line_no + 1))?;
        writer
            .write(&row)
            .with_context(|| format!("line {}", line_no + 1))?;
    }

    let rows = writer.row_count();
    let length = writer.finalize()?;
    info!(rows, length, "wrote {}", output.display());
    println!("{}: {} rows, {} bytes", output.display(), rows, length);
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let reader = SegmentReader::open_unchecked(&path)?;
    let summary = serde_json::json!({
        "file_length": reader.file_length(),
        "checksum": format!("{:#010x}", reader.checksum()),
        "payload_offset": reader.payload_offset(),
        "blocks": reader.block_count(),
        "header": reader.header(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn verify(path: PathBuf) -> Result<()> {
    let reader = SegmentReader::open(&path)?;
    for column in 0..reader.columns().len() {
        reader.row_index(column)?;
        reader.bloom_filters(column)?;
    }
    println!(
        "{}: OK ({} rows, checksum {:#010x})",
        path.display(),
        reader.number_of_rows(),
        reader.checksum()
    );
    Ok(())
}

fn dump(path: PathBuf, from: u64, limit: Option<usize>) -> Result<()> {
    let reader = SegmentReader::open(&path)?;
    let rows = reader.rows_from(from)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for row in rows.iter().take(limit.unwrap_or(usize::MAX)) {
        let json: Vec<serde_json::Value> = row.iter().map(Value::to_json).collect();
        writeln!(out, "{}", serde_json::Value::Array(json))?;
    }
    out.flush()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Write {
            schema,
            rows,
            output,
            stream_buffer_size,
            write_mbytes_per_sec,
        } => write_segment(
            schema,
            rows,
            output,
            WriterOptions { stream_buffer_size },
            write_mbytes_per_sec,
        ),
        Commands::Inspect { segment } => inspect(segment),
        Commands::Verify { segment } => verify(segment),
        Commands::Dump { segment, from, limit } => dump(segment, from, limit),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        let code = err
            .downcast_ref::<SegmentError>()
            .map_or("ERROR", SegmentError::code);
        eprintln!("[column-file] {}: {:#}", code, err);
        process::exit(1);
    }
}
