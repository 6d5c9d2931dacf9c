pub mod buffer;
pub mod cli;
pub mod convert;
pub mod errors;
pub mod reader;
pub mod scanner;
pub mod schema;
pub mod sink;
pub mod source;
pub mod tokenizer;
pub mod value;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, ContextArg, FormatArgs},
    reader::ParseOptions,
    scanner::{CsvScanner, ScanContext, ScanOptions},
    schema::SlotSchema,
    source::FileSource,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => handle_probe(&args),
        Commands::Scan(args) => handle_scan(&args),
    }
}

fn parse_options_from(format: &FormatArgs) -> ParseOptions {
    ParseOptions {
        column_delimiter: format.delimiter.as_bytes().to_vec(),
        row_delimiter: format.row_delimiter.as_bytes().to_vec(),
        skip_header: format.skip_header,
        trim_space: format.trim_space,
        enclose: format.enclose,
        escape: format.escape,
    }
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    info!(
        "Probing '{}' with column delimiter {}",
        args.input.display(),
        display_bytes(args.format.delimiter.as_bytes())
    );
    let source = FileSource::open(&args.input)
        .with_context(|| format!("Opening input file {:?}", args.input))?;
    let options = ScanOptions {
        parse: parse_options_from(&args.format),
        schema_sample_rows: args.sample_rows,
        ..ScanOptions::default()
    };
    let mut scanner = CsvScanner::new(source, SlotSchema::default(), options)?;
    let schema = match scanner.infer_schema() {
        Ok(schema) => schema,
        Err(err) if err.is_end_of_stream() => SlotSchema::default(),
        Err(err) => {
            return Err(err).with_context(|| format!("Inferring schema from {:?}", args.input));
        }
    };
    if schema.slots.is_empty() {
        info!("No columns inferred.");
        return Ok(());
    }
    info!("Inferred schema: {}", schema.summary());
    if let Some(meta) = &args.meta {
        schema
            .save(meta)
            .with_context(|| format!("Writing schema to {meta:?}"))?;
        info!(
            "Inferred schema for {} column(s) written to {meta:?}",
            schema.field_count()
        );
    }
    Ok(())
}

fn handle_scan(args: &cli::ScanArgs) -> Result<()> {
    let parse = parse_options_from(&args.format);
    let schema = match &args.meta {
        Some(path) => {
            SlotSchema::load(path).with_context(|| format!("Loading schema from {path:?}"))?
        }
        None => {
            let source = FileSource::open(&args.input)
                .with_context(|| format!("Opening input file {:?}", args.input))?;
            let options = ScanOptions {
                parse: parse.clone(),
                schema_sample_rows: args.sample_rows,
                ..ScanOptions::default()
            };
            let mut prober = CsvScanner::new(source, SlotSchema::default(), options)?;
            match prober.infer_schema() {
                Ok(schema) => schema,
                Err(err) if err.is_end_of_stream() => SlotSchema::default(),
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Inferring schema from {:?}", args.input));
                }
            }
        }
    };
    if schema.slots.is_empty() {
        info!("No columns to scan in '{}'", args.input.display());
        return Ok(());
    }
    info!(
        "Scanning '{}' against {} column(s)",
        args.input.display(),
        schema.field_count()
    );

    let options = ScanOptions {
        parse,
        context: match args.context {
            ContextArg::Load => ScanContext::Load,
            ContextArg::Insert => ScanContext::InsertFromFiles,
            ContextArg::Query => ScanContext::Query,
        },
        strict_mode: args.strict,
        flexible_column_mapping: args.flexible_columns,
        schema_sample_rows: args.sample_rows,
        chunk_capacity: args.chunk_size,
        log_rejected_records: args.log_rejected,
    };
    let source = FileSource::open(&args.input)
        .with_context(|| format!("Opening input file {:?}", args.input))?;
    let mut scanner = CsvScanner::new(source, schema, options)?;

    let mut rows_converted = 0usize;
    let mut batches = 0usize;
    loop {
        match scanner.next_batch() {
            Ok(batch) => {
                rows_converted += batch.row_count();
                batches += 1;
            }
            Err(err) if err.is_end_of_stream() => break,
            Err(err) => {
                return Err(err).with_context(|| format!("Scanning {:?}", args.input));
            }
        }
    }
    let counter = scanner.counter();
    info!(
        "Converted {rows_converted} row(s) in {batches} batch(es); filtered {} row(s); read {} byte(s)",
        counter.rows_filtered, counter.bytes_read
    );
    Ok(())
}

/// Renders a byte sequence in escaped printable form for diagnostics,
/// e.g. `','`, `'\n'`, `'0x1f'`.
pub(crate) fn display_bytes(bytes: &[u8]) -> String {
    let mut rendered = String::from("'");
    for &b in bytes {
        match b {
            b'\n' => rendered.push_str("\\n"),
            b'\t' => rendered.push_str("\\t"),
            b'\r' => rendered.push_str("\\r"),
            0x20..=0x7e => rendered.push(b as char),
            other => rendered.push_str(&format!("0x{other:02x}")),
        }
    }
    rendered.push('\'');
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_bytes_escapes_control_and_hex() {
        assert_eq!(display_bytes(b","), "','");
        assert_eq!(display_bytes(b"\r\n"), "'\\r\\n'");
        assert_eq!(display_bytes(&[0x01]), "'0x01'");
    }
}
