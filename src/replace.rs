//! Destructive table replacement.
//!
//! A load is one database session: the target table is dropped, recreated
//! from the derived [`ColumnSchema`], bulk-loaded through `COPY ... FROM
//! STDIN`, granted to `PUBLIC`, and committed. Sessions are opened per table
//! through a [`Connector`]; the PostgreSQL implementation lives in
//! [`crate::postgres`].
//!
//! Partial-failure states for [`ReplaceStrategy::DropCreate`] when the engine
//! does not roll the session back: failing after the drop leaves the table
//! absent; failing during the copy leaves it created but empty.
//! [`ReplaceStrategy::ShadowSwap`] loads into a side table and only touches
//! the live name in its last two statements.

use std::{fmt, io::Read};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::TabularDataset,
    io_utils,
    sanitize::validate_identifier,
    schema::{ColumnSchema, SchemaError},
};

/// Suffix of the side table used by [`ReplaceStrategy::ShadowSwap`].
pub const SHADOW_SUFFIX: &str = "__load";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    #[default]
    DropCreate,
    ShadowSwap,
}

impl ReplaceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplaceStrategy::DropCreate => "drop-create",
            ReplaceStrategy::ShadowSwap => "shadow-swap",
        }
    }
}

impl fmt::Display for ReplaceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One open database session.
///
/// Implementations start a transaction when the session is opened; nothing
/// issued through the session is visible to other sessions before `commit`.
pub trait LoadSession {
    fn execute(&mut self, statement: &str) -> Result<()>;

    /// Runs a `COPY ... FROM STDIN` statement fed from `payload` and returns
    /// the number of rows the server reports as loaded.
    fn copy_in(&mut self, statement: &str, payload: &mut dyn Read) -> Result<u64>;

    fn commit(self) -> Result<()>;

    fn rollback(self) -> Result<()>;
}

pub trait Connector {
    type Session: LoadSession;

    fn open(&self) -> Result<Self::Session>;
}

impl<C: Connector + ?Sized> Connector for &C {
    type Session = C::Session;

    fn open(&self) -> Result<Self::Session> {
        (**self).open()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Execute(String),
    Copy(String),
}

impl Step {
    pub fn sql(&self) -> &str {
        match self {
            Step::Execute(sql) | Step::Copy(sql) => sql,
        }
    }
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table};")
}

pub fn create_table_sql(table: &str, schema: &ColumnSchema) -> String {
    format!("CREATE TABLE {table} ({});", schema.definition())
}

pub fn copy_sql(table: &str) -> String {
    format!("COPY {table} FROM STDIN WITH (FORMAT csv, HEADER true);")
}

pub fn grant_select_sql(table: &str) -> String {
    format!("GRANT SELECT ON TABLE {table} TO PUBLIC;")
}

pub fn rename_table_sql(from: &str, to: &str) -> String {
    format!("ALTER TABLE {from} RENAME TO {to};")
}

/// Statements issued for one table load, in order, excluding the commit.
pub fn plan(
    strategy: ReplaceStrategy,
    table: &str,
    schema: &ColumnSchema,
) -> Result<Vec<Step>, SchemaError> {
    validate_identifier(table)?;
    let steps = match strategy {
        ReplaceStrategy::DropCreate => vec![
            Step::Execute(drop_table_sql(table)),
            Step::Execute(create_table_sql(table, schema)),
            Step::Copy(copy_sql(table)),
            Step::Execute(grant_select_sql(table)),
        ],
        ReplaceStrategy::ShadowSwap => {
            let shadow = format!("{table}{SHADOW_SUFFIX}");
            validate_identifier(&shadow)?;
            vec![
                Step::Execute(drop_table_sql(&shadow)),
                Step::Execute(create_table_sql(&shadow, schema)),
                Step::Copy(copy_sql(&shadow)),
                Step::Execute(grant_select_sql(&shadow)),
                Step::Execute(drop_table_sql(table)),
                Step::Execute(rename_table_sql(&shadow, table)),
            ]
        }
    };
    Ok(steps)
}

/// Header-included, comma-delimited UTF-8 rendering of `dataset` using the
/// sanitized column names from `schema`.
pub fn copy_payload(schema: &ColumnSchema, dataset: &TabularDataset) -> Result<Vec<u8>> {
    let mut writer = io_utils::open_copy_writer(Vec::new());
    writer
        .write_record(schema.names())
        .context("Writing COPY header")?;
    for (idx, row) in dataset.rows().iter().enumerate() {
        writer
            .write_record(row.iter().map(|cell| cell.render().unwrap_or_default()))
            .with_context(|| format!("Writing COPY row {}", idx + 1))?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("Flushing COPY payload: {}", err.error()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows_loaded: u64,
}

#[derive(Debug)]
pub struct TableReplacer<C> {
    connector: C,
    strategy: ReplaceStrategy,
}

impl<C: Connector> TableReplacer<C> {
    pub fn new(connector: C, strategy: ReplaceStrategy) -> Self {
        Self {
            connector,
            strategy,
        }
    }

    pub fn strategy(&self) -> ReplaceStrategy {
        self.strategy
    }

    pub fn replace(
        &self,
        table: &str,
        schema: &ColumnSchema,
        dataset: &TabularDataset,
    ) -> Result<LoadSummary> {
        let steps = plan(self.strategy, table, schema)?;
        let payload = copy_payload(schema, dataset)?;
        let expected = dataset.row_count() as u64;

        let mut session = self
            .connector
            .open()
            .with_context(|| format!("Opening database session for table {table}"))?;
        match run_steps(&mut session, &steps, &payload, expected) {
            Ok(rows_loaded) => {
                session
                    .commit()
                    .with_context(|| format!("Committing load of table {table}"))?;
                info!("Table {table} replaced with {rows_loaded} row(s)");
                Ok(LoadSummary {
                    table: table.to_string(),
                    rows_loaded,
                })
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback() {
                    warn!("Rollback after failed load of {table} also failed: {rollback_err:#}");
                }
                Err(err.context(format!("Loading table {table}")))
            }
        }
    }
}

fn run_steps<S: LoadSession>(
    session: &mut S,
    steps: &[Step],
    payload: &[u8],
    expected_rows: u64,
) -> Result<u64> {
    let mut rows_loaded = 0;
    for step in steps {
        debug!("SQL: {}", step.sql());
        match step {
            Step::Execute(sql) => session
                .execute(sql)
                .with_context(|| format!("Executing `{sql}`"))?,
            Step::Copy(sql) => {
                let mut reader = payload;
                rows_loaded = session
                    .copy_in(sql, &mut reader)
                    .with_context(|| format!("Streaming rows via `{sql}`"))?;
                if rows_loaded != expected_rows {
                    bail!("COPY loaded {rows_loaded} row(s) but the dataset has {expected_rows}");
                }
            }
        }
    }
    Ok(rows_loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::Cell, schema::derive_schema};

    fn sample() -> (ColumnSchema, TabularDataset) {
        let dataset = TabularDataset::from_cells(
            vec!["Name".into(), "Amount ($)".into()],
            vec![
                vec![Cell::Text("Widget, large".into()), Cell::Float(2.5)],
                vec![Cell::Text("Gadget".into()), Cell::Empty],
            ],
        )
        .expect("dataset");
        (derive_schema(&dataset).expect("schema"), dataset)
    }

    #[test]
    fn drop_create_plan_matches_statement_shapes() {
        let (schema, _) = sample();
        let steps = plan(ReplaceStrategy::DropCreate, "order_report", &schema).expect("plan");
        let sql: Vec<_> = steps.iter().map(Step::sql).collect();
        assert_eq!(
            sql,
            vec![
                "DROP TABLE IF EXISTS order_report;",
                "CREATE TABLE order_report (name text, amount_ float);",
                "COPY order_report FROM STDIN WITH (FORMAT csv, HEADER true);",
                "GRANT SELECT ON TABLE order_report TO PUBLIC;",
            ]
        );
    }

    #[test]
    fn shadow_swap_touches_live_table_last() {
        let (schema, _) = sample();
        let steps = plan(ReplaceStrategy::ShadowSwap, "sales", &schema).expect("plan");
        assert_eq!(steps[2], Step::Copy(copy_sql("sales__load")));
        assert_eq!(
            steps[steps.len() - 2..],
            [
                Step::Execute("DROP TABLE IF EXISTS sales;".into()),
                Step::Execute("ALTER TABLE sales__load RENAME TO sales;".into()),
            ]
        );
    }

    #[test]
    fn shadow_name_must_fit_identifier_limit() {
        let (schema, _) = sample();
        let table = "t".repeat(60);
        assert!(plan(ReplaceStrategy::DropCreate, &table, &schema).is_ok());
        assert!(plan(ReplaceStrategy::ShadowSwap, &table, &schema).is_err());
    }

    #[test]
    fn payload_has_header_and_null_fields() {
        let (schema, dataset) = sample();
        let payload = String::from_utf8(copy_payload(&schema, &dataset).expect("payload")).unwrap();
        assert_eq!(payload, "name,amount_\n\"Widget, large\",2.5\nGadget,\n");
    }
}
