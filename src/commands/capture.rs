//! `capture`: adopt current state as both manifest and baseline

use anyhow::Result;

use super::{Session, finish, print_outcome, progress, target};
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, subsystem: Option<&str>) -> Result<i32> {
    let session = Session::open(ctx)?;
    let mut progress = progress(ctx);
    let report = session
        .engine()
        .capture(&target(subsystem), &mut progress)?;

    if !ctx.json {
        for sub in &report.reports {
            if let Some(capture) = print_outcome(sub) {
                ui::success(&format!("captured {} item(s)", capture.captured));
                if capture.replaced > 0 {
                    ui::dim(&format!("replaced {} declared item(s)", capture.replaced));
                }
            }
        }
    }
    finish(ctx, &session, &report)
}
