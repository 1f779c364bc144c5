use std::fs::File;

use anyhow::{Context, Result, bail};
use log::info;

use crate::{
    cli::RunArgs,
    config::Config,
    pipeline::{FileOutcome, Pipeline, PipelineOptions, RunReport},
    postgres::PostgresConnector,
    refresh::{Refresher, SkipRefresh},
    replace::TableReplacer,
    table::TextTable,
};

pub fn execute(args: &RunArgs) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("Loading config from {:?}", args.config))?;
    let strategy = args.strategy.unwrap_or(config.strategy);
    let refresher: Box<dyn Refresher> = if args.skip_refresh {
        Box::new(SkipRefresh)
    } else {
        config.refresh.build()?
    };
    info!(
        "Loading '{}' reports into {} using {strategy}",
        config.extension, config.database
    );

    let replacer = TableReplacer::new(PostgresConnector::new(config.database.clone()), strategy);
    let options = PipelineOptions {
        source_dir: config.source_dir.clone(),
        staging_dir: config.staging_dir.clone(),
        extension: config.extension.clone(),
        fail_fast: args.fail_fast,
    };
    let report = Pipeline::new(refresher, replacer, options).run()?;

    print!("{}", summary_table(&report));
    if let Some(path) = &args.report {
        let file = File::create(path).with_context(|| format!("Creating report file {path:?}"))?;
        serde_json::to_writer_pretty(file, &report).context("Writing run report JSON")?;
        info!("Run report written to {path:?}");
    }

    if report.failed() > 0 {
        bail!(
            "{} of {} report(s) failed",
            report.failed(),
            report.outcomes.len()
        );
    }
    Ok(())
}

pub fn summary_table(report: &RunReport) -> TextTable {
    let mut table = TextTable::new(["file", "table", "status", "rows", "detail"]);
    for outcome in &report.outcomes {
        let (status, rows, detail) = match outcome {
            FileOutcome::Loaded { rows, columns, .. } => (
                "loaded".to_string(),
                rows.to_string(),
                format!("{columns} column(s)"),
            ),
            FileOutcome::Failed { stage, error, .. } => {
                (format!("failed: {stage}"), String::new(), error.clone())
            }
        };
        table.push_row([
            outcome.file().to_string(),
            outcome.table().to_string(),
            status,
            rows,
            detail,
        ]);
    }
    table
}
