//! `baseline`: re-anchor the last-known-good state

use anyhow::Result;

use super::{Session, finish, print_outcome, progress, target};
use crate::Context;
use crate::cli::BaselineArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &BaselineArgs) -> Result<i32> {
    let session = Session::open(ctx)?;
    let mut progress = progress(ctx);
    let report = session.engine().baseline(
        &target(args.subsystem.as_deref()),
        args.force,
        &mut progress,
    )?;

    if !ctx.json {
        for sub in &report.reports {
            if let Some(baseline) = print_outcome(sub) {
                let origin = if baseline.from_staged {
                    "pending deployment"
                } else {
                    "current state"
                };
                if baseline.changed {
                    ui::success(&format!("{} item(s) from {origin}", baseline.items));
                } else {
                    ui::dim(&format!("unchanged ({} item(s))", baseline.items));
                }
            }
        }
    }
    finish(ctx, &session, &report)
}
