//! Command implementations. Each returns the process exit code.

pub mod baseline;
pub mod capture;
pub mod diff;
pub mod edit;
pub mod subsystems;
pub mod sync;

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::report::EXIT_FAILED;
use reconcile::{
    Engine, EngineOptions, Flagged, Outcome, PassReport, Registry, SubsystemReport, Target,
};
use serde::Serialize;

use crate::Context;
use crate::config::Config;
use crate::manifest::TomlManifestStore;
use crate::paths;
use crate::progress::PassProgress;
use crate::state::FileBaselineStore;
use crate::ui;

/// Everything a command needs: configuration, registry and both stores
pub struct Session {
    pub registry: Registry,
    pub manifest: TomlManifestStore,
    pub baselines: FileBaselineStore,
    pub options: EngineOptions,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let config = Config::load()?;
        let registry =
            crate::subsystems::registry(&config).context("Failed to build the subsystem registry")?;
        let manifest = TomlManifestStore::new(paths::manifest_file()?);
        let baselines = FileBaselineStore::new(paths::baseline_dir()?);
        let options = config.engine_options(ctx.overrides);
        log::debug!(
            "manifest: {}, baselines: {}",
            manifest.path().display(),
            baselines.dir().display()
        );

        Ok(Self {
            registry,
            manifest,
            baselines,
            options,
        })
    }

    pub fn engine(&self) -> Engine<'_> {
        Engine::new(
            &self.registry,
            &self.manifest,
            &self.baselines,
            self.options.clone(),
        )
    }
}

/// Progress display for a pass, silent for JSON output
pub fn progress(ctx: &Context) -> PassProgress {
    if ctx.json {
        PassProgress::hidden()
    } else {
        PassProgress::new(ctx.quiet)
    }
}

pub fn target(subsystem: Option<&str>) -> Target {
    Target::from_option(subsystem)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize report")?
    );
    Ok(())
}

/// Print one subsystem's heading, and its failure if it has one.
///
/// Returns the value when the subsystem succeeded.
pub fn print_outcome<T>(report: &SubsystemReport<T>) -> Option<&T> {
    let title = format!("{} ({})", report.subsystem, report.tier);
    match &report.outcome {
        Outcome::Ok(value) => {
            ui::section(&title);
            Some(value)
        }
        Outcome::Failed(e) => {
            ui::section(&title);
            ui::error(&e.to_string());
            None
        }
        Outcome::Skipped(reason) => {
            ui::section(&title);
            ui::dim(&format!("skipped: {reason}"));
            None
        }
        Outcome::Cancelled => {
            ui::section(&title);
            ui::warn("cancelled");
            None
        }
    }
}

/// Close a pass: JSON or a summary line, advice for failures, then the
/// exit code. The all-or-nothing policy turns any failure into a pass failure.
pub fn finish<T: Flagged + Serialize>(
    ctx: &Context,
    session: &Session,
    report: &PassReport<T>,
) -> Result<i32> {
    if ctx.json {
        print_json(report)?;
    } else {
        let ok = report.succeeded().count();
        let failed = report.failed_count();
        let conflicts = report.total_conflicts();
        println!();
        let mut line = format!("{} subsystem(s): {ok} ok", report.reports.len());
        if failed > 0 {
            line.push_str(&format!(", {}", format!("{failed} failed").red()));
        }
        if conflicts > 0 {
            line.push_str(&format!(", {}", format!("{conflicts} conflict(s)").yellow()));
        }
        println!("{line}");
        ui::advice(&report.failure_categories());
    }

    if let Err(e) = report.check(session.options.all_or_nothing) {
        if !ctx.json {
            ui::error(&e.to_string());
        }
        return Ok(EXIT_FAILED);
    }
    Ok(report.exit_code())
}
