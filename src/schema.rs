//! Relational schema derivation.
//!
//! This module owns the [`SqlType`] keywords emitted in DDL, the fixed
//! inferred-type mapping table, and [`ColumnSchema`], the ordered
//! `(column, type)` list a table is created from. Column names are sanitized
//! and validated here; duplicates after sanitization are rejected rather than
//! merged.

use std::fmt;

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::{
    dataset::{InferredType, TabularDataset},
    sanitize::{sanitize_identifier, validate_identifier},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("inferred type '{0}' has no relational mapping")]
    UnmappedType(InferredType),
    #[error("duplicate column name(s) after sanitization: {}", .0.join(", "))]
    DuplicateColumns(Vec<String>),
    #[error("invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },
    #[error("dataset has no columns")]
    NoColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Text,
    Float,
    Int,
    Timestamp,
}

impl SqlType {
    pub fn keyword(&self) -> &'static str {
        match self {
            SqlType::Text => "text",
            SqlType::Float => "float",
            SqlType::Int => "int",
            SqlType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Inferred column type → relational keyword. Durations are stored as text.
const TYPE_MAPPING: &[(InferredType, SqlType)] = &[
    (InferredType::Text, SqlType::Text),
    (InferredType::Float, SqlType::Float),
    (InferredType::Integer, SqlType::Int),
    (InferredType::Timestamp, SqlType::Timestamp),
    (InferredType::Duration, SqlType::Text),
];

pub fn map_type(inferred: InferredType) -> Result<SqlType, SchemaError> {
    TYPE_MAPPING
        .iter()
        .find(|(from, _)| *from == inferred)
        .map(|(_, to)| *to)
        .ok_or(SchemaError::UnmappedType(inferred))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaColumn {
    pub name: String,
    pub sql_type: SqlType,
    #[serde(skip)]
    pub source_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub columns: Vec<SchemaColumn>,
}

impl ColumnSchema {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Column list as used inside `CREATE TABLE t (...)`.
    pub fn definition(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.sql_type))
            .join(", ")
    }
}

pub fn derive_schema(dataset: &TabularDataset) -> Result<ColumnSchema, SchemaError> {
    if dataset.columns().is_empty() {
        return Err(SchemaError::NoColumns);
    }

    let columns = dataset
        .columns()
        .iter()
        .map(|column| {
            let name = sanitize_identifier(&column.name);
            validate_identifier(&name)?;
            Ok(SchemaColumn {
                name,
                sql_type: map_type(column.inferred)?,
                source_name: column.name.clone(),
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let duplicates = columns
        .iter()
        .map(|c| c.name.clone())
        .duplicates()
        .collect::<Vec<_>>();
    if !duplicates.is_empty() {
        return Err(SchemaError::DuplicateColumns(duplicates));
    }

    Ok(ColumnSchema { columns })
}
