//! I/O helpers shared by the dataset loader and the bulk-load stream.
//!
//! - **Decoding**: delimited exports are decoded as UTF-8 first and retried once
//!   with the legacy single-byte encoding (windows-1252, the WHATWG superset of
//!   ISO-8859-1) when that fails.
//! - **Delimiters**: extension-based detection (`.csv` → comma, `.tsv` → tab).
//! - **Reader/writer construction**: CSV readers for report exports and the
//!   CSV writer that produces the `COPY ... FROM STDIN` payload.
//! - **Digests**: SHA-256 of a refreshed file for run provenance.

use std::{fs::File, io, io::Read, path::Path};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use sha2::{Digest, Sha256};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// Encoding tried after UTF-8 fails.
pub const LEGACY_FALLBACK_ENCODING: &Encoding = WINDOWS_1252;

pub fn resolve_input_delimiter(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

/// Decodes `bytes` as UTF-8, falling back once to the legacy encoding.
///
/// Returns the decoded text together with the encoding that succeeded.
pub fn decode_with_fallback(bytes: &[u8]) -> Result<(String, &'static Encoding)> {
    match decode_bytes(bytes, UTF_8) {
        Ok(text) => Ok((text, UTF_8)),
        Err(primary) => {
            let text = decode_bytes(bytes, LEGACY_FALLBACK_ENCODING)
                .with_context(|| format!("Retrying after: {primary}"))?;
            Ok((text, LEGACY_FALLBACK_ENCODING))
        }
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Writer for the bulk-load payload.
///
/// Quoting is only applied where required so that an empty unquoted field
/// reaches the server as NULL.
pub fn open_copy_writer<W>(writer: W) -> csv::Writer<W>
where
    W: io::Write,
{
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(DEFAULT_CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    builder.from_writer(writer)
}

pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Opening {path:?} for hashing"))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("Hashing {path:?}"))?;
    let digest = hasher.finalize();
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}
