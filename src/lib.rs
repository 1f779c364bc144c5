pub mod cli;
pub mod config;
pub mod dataset;
pub mod inspect;
pub mod io_utils;
pub mod pipeline;
pub mod postgres;
pub mod refresh;
pub mod replace;
pub mod run_cmd;
pub mod sanitize;
pub mod schema;
pub mod stage;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("report_mirror", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_cmd::execute(&args),
        Commands::Inspect(args) => inspect::execute(&args),
    }
}
