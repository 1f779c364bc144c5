//! Offline view of what a load would do for one report.
//!
//! Nothing is refreshed and no database session is opened; the report is
//! parsed as it is on disk.

use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::InspectArgs,
    dataset::load_dataset,
    replace::plan,
    sanitize::{sanitize_identifier, table_name},
    schema::{derive_schema, map_type},
    table::TextTable,
};

pub fn execute(args: &InspectArgs) -> Result<()> {
    let loaded =
        load_dataset(&args.input).with_context(|| format!("Inspecting {:?}", args.input))?;
    let dataset = loaded.dataset;
    let file_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let table = table_name(&file_name);

    println!("table: {table}");
    println!("rows: {}", dataset.row_count());
    println!("encoding: {}", loaded.encoding.name());

    let mut columns = TextTable::new(["#", "source", "inferred", "column", "type"]);
    for (idx, column) in dataset.columns().iter().enumerate() {
        let sql_type = map_type(column.inferred)?;
        columns.push_row([
            (idx + 1).to_string(),
            column.name.clone(),
            column.inferred.to_string(),
            sanitize_identifier(&column.name),
            sql_type.to_string(),
        ]);
    }
    if columns.is_empty() {
        println!("No columns found.");
        return Ok(());
    }
    print!("{columns}");

    let schema = derive_schema(&dataset).with_context(|| format!("Deriving schema for {table}"))?;
    let steps = plan(args.strategy, &table, &schema)
        .with_context(|| format!("Planning load of {table}"))?;
    println!();
    for step in &steps {
        println!("{}", step.sql());
    }

    if args.preview > 0 && dataset.row_count() > 0 {
        let mut preview = TextTable::new(schema.names());
        for row in dataset.rows().iter().take(args.preview) {
            preview.push_row(row.iter().map(|cell| cell.render().unwrap_or_default()));
        }
        println!();
        print!("{preview}");
    }
    info!(
        "Inspected {:?}: {} column(s), {} row(s)",
        args.input,
        schema.len(),
        dataset.row_count()
    );
    Ok(())
}
