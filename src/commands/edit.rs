//! `add` and `remove`: declare or undeclare a single item

use anyhow::Result;
use reconcile::report::{EXIT_FAILED, EXIT_OK};
use reconcile::{EditOutcome, Item, Legality, Operation, SubsystemTier};
use serde_json::json;

use super::{Session, print_json};
use crate::Context;
use crate::cli::{AddArgs, RemoveArgs};
use crate::ui;

pub fn add(ctx: &Context, args: &AddArgs) -> Result<i32> {
    let session = Session::open(ctx)?;
    let mut item = Item::new(args.id.as_str());
    if let Some(fingerprint) = &args.fingerprint {
        item = item.with_fingerprint(fingerprint.as_str());
    }
    for (key, value) in &args.source {
        item = item.with_source(key.as_str(), value.as_str());
    }

    let result = session.engine().add(&args.subsystem, item, args.defer);
    report(ctx, &session, result)
}

pub fn remove(ctx: &Context, args: &RemoveArgs) -> Result<i32> {
    let session = Session::open(ctx)?;
    let result = session.engine().remove(&args.subsystem, &args.id, args.defer);
    report(ctx, &session, result)
}

fn report(
    ctx: &Context,
    session: &Session,
    result: reconcile::Result<EditOutcome>,
) -> Result<i32> {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            let category = e.category();
            if ctx.json {
                print_json(&json!({
                    "error": e.to_string(),
                    "category": category.description(),
                }))?;
            } else {
                ui::error(&e.to_string());
                ui::advice(&[category]);
            }
            return Ok(EXIT_FAILED);
        }
    };

    if ctx.json {
        print_json(&outcome)?;
        return Ok(EXIT_OK);
    }

    let verb = match outcome.operation {
        Operation::Remove => "removed",
        _ => "added",
    };
    let subject = format!("{}/{}", outcome.subsystem, outcome.item);

    if !outcome.manifest_changed && outcome.legality == Legality::Deferred {
        ui::info(&format!("{subject} already {verb}"));
        return Ok(EXIT_OK);
    }

    match outcome.legality {
        Legality::Immediate => ui::success(&format!("{subject} {verb}")),
        _ => {
            ui::success(&format!("{subject} {verb} in the manifest"));
            let tier = session
                .registry
                .find(outcome.subsystem.as_str())
                .map(|s| s.tier())
                .unwrap_or(SubsystemTier::Convergent);
            ui::dim(next_step(tier));
        }
    }
    Ok(EXIT_OK)
}

fn next_step(tier: SubsystemTier) -> &'static str {
    match tier {
        SubsystemTier::Atomic => "takes effect after the next image rebuild and reboot",
        SubsystemTier::Convergent => "run `strata sync` to apply it",
    }
}
