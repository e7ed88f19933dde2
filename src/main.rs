mod atomic;
mod backend;
mod cli;
mod commands;
mod config;
mod manifest;
mod paths;
mod progress;
mod runner;
mod state;
mod subsystems;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub json: bool,
    pub overrides: config::Overrides,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        json: cli.json,
        overrides: config::Overrides {
            jobs: cli.jobs,
            timeout_secs: cli.timeout,
            all_or_nothing: cli.all_or_nothing,
        },
    };

    let code = match &cli.command {
        Command::Staged(args) => commands::diff::staged(&ctx, args.subsystem.as_deref())?,
        Command::Drift(args) => commands::diff::drift(&ctx, args.subsystem.as_deref())?,
        Command::Sync(args) => commands::sync::run(&ctx, args)?,
        Command::Capture(args) => commands::capture::run(&ctx, args.subsystem.as_deref())?,
        Command::Baseline(args) => commands::baseline::run(&ctx, args)?,
        Command::Add(args) => commands::edit::add(&ctx, args)?,
        Command::Remove(args) => commands::edit::remove(&ctx, args)?,
        Command::Subsystems => commands::subsystems::run(&ctx)?,
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "strata", &mut io::stdout());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
