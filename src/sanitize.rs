//! Identifier normalization for table and column names.
//!
//! Report file names and header cells are free-form text. Before they can be
//! used unquoted in DDL they are lower-cased, separators are folded to `_`,
//! and a fixed set of punctuation is dropped. The transformation never
//! introduces a character it would later remove or substitute, so applying it
//! twice is the same as applying it once.

use std::path::Path;

use crate::schema::SchemaError;

/// Characters dropped outright.
const REMOVED: &[char] = &['?', '$', '%', '(', ')', '#', '\''];

/// Characters folded to `_`.
const SUBSTITUTED: &[char] = &[' ', '-', '/', '\\'];

/// PostgreSQL truncates identifiers beyond `NAMEDATALEN - 1` bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

pub fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| !REMOVED.contains(c))
        .map(|c| if SUBSTITUTED.contains(&c) { '_' } else { c })
        .collect()
}

/// Table name for a report file: the sanitized file name up to its first `.`.
///
/// `"My Report.xlsx"` becomes `"my_report"`. Only the final path component is
/// considered, so callers may pass a full path.
pub fn table_name(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(file_name);
    let sanitized = sanitize_identifier(base);
    sanitized.split('.').next().unwrap_or_default().to_string()
}

/// Checks that a sanitized name is usable as an unquoted identifier.
pub fn validate_identifier(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(SchemaError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier is empty after sanitization",
        });
    };
    if !(first.is_alphabetic() || first == '_') {
        return Err(SchemaError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier must start with a letter or underscore",
        });
    }
    if chars.any(|c| !(c.is_alphanumeric() || c == '_')) {
        return Err(SchemaError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier may only contain letters, digits, and underscores",
        });
    }
    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(SchemaError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier is longer than 63 bytes",
        });
    }
    Ok(())
}
