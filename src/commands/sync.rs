//! `sync`: converge runtime state onto the manifest

use anyhow::Result;
use colored::Colorize;
use reconcile::{
    ActionKind, AutoConfirm, AutoDecline, ConfirmCallback, Side, SyncOptions, SyncReport,
};
use std::io::IsTerminal;

use super::{Session, finish, print_outcome, progress, target};
use crate::Context;
use crate::cli::SyncArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &SyncArgs) -> Result<i32> {
    let session = Session::open(ctx)?;
    let options = SyncOptions {
        dry_run: args.dry_run,
        prune: args.prune,
    };

    let mut confirm = confirmer(ctx, args.yes);
    let mut progress = progress(ctx);
    let report = session.engine().sync(
        &target(args.subsystem.as_deref()),
        options,
        confirm.as_mut(),
        &mut progress,
    )?;

    if !ctx.json {
        for sub in &report.reports {
            if let Some(sync) = print_outcome(sub) {
                print_sync(sync, args.prune);
            }
        }
    }
    finish(ctx, &session, &report)
}

/// `--yes` applies without asking; without a terminal nothing is applied
fn confirmer(ctx: &Context, yes: bool) -> Box<dyn ConfirmCallback> {
    if yes {
        Box::new(AutoConfirm)
    } else if !std::io::stdin().is_terminal() || ctx.json {
        if !ctx.json {
            ui::warn("stdin is not a terminal; pass --yes to apply changes");
        }
        Box::new(AutoDecline)
    } else {
        Box::new(ui::PromptConfirm)
    }
}

fn print_sync(report: &SyncReport, prune: bool) {
    let plan = &report.plan;

    for action in &plan.actions {
        let kind = match action.kind {
            ActionKind::Install => action.kind.as_str().green(),
            ActionKind::Reinstall => action.kind.as_str().yellow(),
            ActionKind::Remove => action.kind.as_str().red(),
        };
        let status = if report.applied.contains(&action.id) {
            "✓".green().to_string()
        } else {
            String::new()
        };
        println!("  {} {:<10} {} {}", ui::change_marker(action.change), kind, action.id, status);
    }

    for conflict in &plan.conflicts {
        println!(
            "  {} {:<10} {} {}",
            ui::change_marker(conflict.change),
            "conflict".red().bold(),
            conflict.id,
            format!(
                "manifest {}, runtime {}",
                Side::display(conflict.manifest.as_ref()),
                Side::display(conflict.observed.as_ref())
            )
            .dimmed()
        );
    }

    if !plan.untracked.is_empty() && !prune {
        ui::dim(&format!(
            "{} untracked item(s) left in place (use --prune to remove)",
            plan.untracked.len()
        ));
    }

    for failure in &report.failures {
        ui::error(&format!("{} {}: {}", failure.kind.as_str(), failure.id, failure.error));
    }

    if plan.is_empty() {
        ui::success("nothing to do");
    } else if report.dry_run {
        ui::info(&format!("{} action(s) planned (dry run)", plan.actions.len()));
    } else if !report.applied.is_empty() {
        ui::success(&format!("{} action(s) applied", report.applied.len()));
    }

    if report.rebaselined {
        ui::dim("baseline updated");
    }
}
