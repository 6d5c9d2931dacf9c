use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about = "Stream, validate, and type CSV data for loading", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Probe a delimited file and infer a positional column schema
    Probe(ProbeArgs),
    /// Scan a delimited file, converting rows and reporting filtered counts
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination schema file (.meta.json); printed only when omitted
    #[arg(short, long)]
    pub meta: Option<PathBuf>,
    /// Number of non-blank rows to sample when inferring types
    #[arg(long, default_value_t = 100)]
    pub sample_rows: usize,
    #[command(flatten)]
    pub format: FormatArgs,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Input file to scan
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Schema file describing target columns; inferred when omitted
    #[arg(short, long)]
    pub meta: Option<PathBuf>,
    /// Scan context deciding the column-count policy
    #[arg(long, value_enum, default_value_t = ContextArg::Load)]
    pub context: ContextArg,
    /// Fail rows on malformed values instead of converting them to null
    #[arg(long)]
    pub strict: bool,
    /// Disable column-count enforcement
    #[arg(long = "flexible-columns")]
    pub flexible_columns: bool,
    /// Mirror every rejected row to the log, beyond the report cap
    #[arg(long = "log-rejected")]
    pub log_rejected: bool,
    /// Accepted-row capacity of one batch
    #[arg(long, default_value_t = 4096)]
    pub chunk_size: usize,
    /// Number of non-blank rows sampled when inferring a schema
    #[arg(long, default_value_t = 100)]
    pub sample_rows: usize,
    #[command(flatten)]
    pub format: FormatArgs,
}

/// Tokenization flags shared by every subcommand.
#[derive(Debug, Args)]
pub struct FormatArgs {
    /// Column delimiter, possibly multi-byte (supports \t, \r, \n escapes)
    #[arg(long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: String,
    /// Row delimiter, possibly multi-byte (supports \t, \r, \n escapes)
    #[arg(long = "row-delimiter", default_value = "\\n", value_parser = parse_delimiter)]
    pub row_delimiter: String,
    /// Header rows to skip once per file
    #[arg(long = "skip-header", default_value_t = 0)]
    pub skip_header: u64,
    /// Exclude leading/trailing ASCII spaces from each field
    #[arg(long = "trim-space")]
    pub trim_space: bool,
    /// Enclosure byte suspending delimiter recognition (e.g. '"')
    #[arg(long, value_parser = parse_single_byte)]
    pub enclose: Option<u8>,
    /// Escape byte yielding the following byte literally (e.g. '\')
    #[arg(long, value_parser = parse_single_byte)]
    pub escape: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContextArg {
    /// Bulk load: row width must match the schema exactly
    Load,
    /// Insert-from-files: narrow rows filtered, extras ignored
    Insert,
    /// Interactive query: narrow rows fail the scan
    Query,
}

/// Unescapes a delimiter argument into the literal byte sequence. The
/// result stays ASCII, so its UTF-8 bytes are the delimiter bytes.
fn parse_delimiter(raw: &str) -> Result<String, String> {
    let mut unescaped = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('t') => unescaped.push('\t'),
                Some('n') => unescaped.push('\n'),
                Some('r') => unescaped.push('\r'),
                Some('\\') => unescaped.push('\\'),
                Some(other) => return Err(format!("Unknown escape '\\{other}'")),
                None => return Err("Trailing backslash in delimiter".to_string()),
            }
        } else if c.is_ascii() {
            unescaped.push(c);
        } else {
            return Err(format!("Delimiter must be ASCII, got '{c}'"));
        }
    }
    if unescaped.is_empty() {
        return Err("Delimiter must not be empty".to_string());
    }
    Ok(unescaped)
}

fn parse_single_byte(raw: &str) -> Result<u8, String> {
    let unescaped = parse_delimiter(raw)?;
    match unescaped.as_bytes() {
        [single] => Ok(*single),
        _ => Err(format!("Expected a single byte, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiters_unescape_control_sequences() {
        assert_eq!(parse_delimiter(",").unwrap(), ",");
        assert_eq!(parse_delimiter("\\t").unwrap(), "\t");
        assert_eq!(parse_delimiter("\\r\\n").unwrap(), "\r\n");
        assert_eq!(parse_delimiter("||").unwrap(), "||");
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("\\q").is_err());
    }

    #[test]
    fn single_byte_parser_rejects_sequences() {
        assert_eq!(parse_single_byte("\"").unwrap(), b'"');
        assert_eq!(parse_single_byte("\\\\").unwrap(), b'\\');
        assert!(parse_single_byte("ab").is_err());
    }
}
