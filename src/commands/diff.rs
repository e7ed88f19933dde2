//! `staged` and `drift`: read-only comparison passes

use anyhow::Result;
use colored::Colorize;
use reconcile::{Change, DiffEntry, DiffMode, DiffReport, PassReport, Side};

use super::{Session, finish, print_outcome, progress, target};
use crate::Context;
use crate::ui;

const FINGERPRINT_WIDTH: usize = 24;

pub fn staged(ctx: &Context, subsystem: Option<&str>) -> Result<i32> {
    let session = Session::open(ctx)?;
    let mut progress = progress(ctx);
    let report = session
        .engine()
        .staged(&target(subsystem), &mut progress)?;
    render(ctx, &session, &report)
}

pub fn drift(ctx: &Context, subsystem: Option<&str>) -> Result<i32> {
    let session = Session::open(ctx)?;
    let mut progress = progress(ctx);
    let report = session.engine().drift(&target(subsystem), &mut progress)?;
    render(ctx, &session, &report)
}

fn render(ctx: &Context, session: &Session, report: &PassReport<DiffReport>) -> Result<i32> {
    if !ctx.json {
        for sub in &report.reports {
            if let Some(diff) = print_outcome(sub) {
                print_diff(diff, ctx.verbose > 0);
            }
        }
    }
    finish(ctx, session, report)
}

fn print_diff(diff: &DiffReport, show_unchanged: bool) {
    if diff.staged_pending == Some(false) {
        ui::dim("no pending deployment");
    } else if diff.is_clean() {
        ui::success("in sync");
    }
    for entry in &diff.entries {
        if entry.change.is_actionable() || show_unchanged {
            print_entry(entry, diff.mode);
        }
    }

    let summary = diff.summary();
    if summary.actionable() > 0 {
        ui::dim(&format!(
            "{} added, {} removed, {} modified, {} conflict(s)",
            summary.added, summary.removed, summary.modified, summary.conflicts
        ));
    }
}

fn print_entry(entry: &DiffEntry, mode: DiffMode) {
    println!(
        "  {} {:<40} {}",
        ui::change_marker(entry.change),
        entry.id.as_str(),
        describe(entry, mode).dimmed()
    );
}

/// Side-by-side fingerprints. The staged-vs-booted comparison never reads
/// the manifest; conflicts keep both values whole.
fn describe(entry: &DiffEntry, mode: DiffMode) -> String {
    let mut sides = Vec::new();
    if mode == DiffMode::StagedTwoWay {
        sides.push(("staged", entry.staged.as_ref()));
    } else {
        sides.push(("manifest", entry.manifest.as_ref()));
    }
    sides.push(("runtime", entry.observed.as_ref()));
    if entry.baseline.is_some() {
        sides.push(("baseline", entry.baseline.as_ref()));
    }

    let width = match entry.change {
        Change::Conflict => None,
        _ => Some(FINGERPRINT_WIDTH),
    };
    sides
        .into_iter()
        .map(|(label, side)| format!("{label} {}", fingerprint(side, width)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn fingerprint(side: Option<&Side>, width: Option<usize>) -> String {
    let shown = Side::display(side);
    match width {
        Some(width) => ui::truncate_middle(&shown, width),
        None => shown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(fp: &str) -> Option<Side> {
        Some(Side {
            fingerprint: Some(fp.to_string()),
        })
    }

    fn entry(change: Change) -> DiffEntry {
        DiffEntry {
            id: "Tool".into(),
            change,
            manifest: None,
            observed: None,
            baseline: None,
            staged: None,
            relation: None,
        }
    }

    #[test]
    fn test_fingerprint_display() {
        assert_eq!(fingerprint(None, Some(FINGERPRINT_WIDTH)), "(absent)");
        assert_eq!(
            fingerprint(Some(&Side { fingerprint: None }), Some(FINGERPRINT_WIDTH)),
            "(any)"
        );
        let long = side("sha256:0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(
            fingerprint(Some(&long), Some(FINGERPRINT_WIDTH)).chars().count(),
            FINGERPRINT_WIDTH
        );
    }

    #[test]
    fn test_staged_entry_has_no_manifest_column() {
        let staged = DiffEntry {
            staged: side("9.1"),
            observed: side("9.0"),
            ..entry(Change::Modified)
        };
        assert_eq!(
            describe(&staged, DiffMode::StagedTwoWay),
            "staged 9.1, runtime 9.0"
        );

        let dropped = DiffEntry {
            observed: side("2.4"),
            ..entry(Change::Removed)
        };
        assert_eq!(
            describe(&dropped, DiffMode::StagedTwoWay),
            "staged (absent), runtime 2.4"
        );

        let drifted = DiffEntry {
            manifest: side("1"),
            observed: side("2"),
            ..entry(Change::Drifted)
        };
        assert_eq!(describe(&drifted, DiffMode::Drift), "manifest 1, runtime 2");
    }

    #[test]
    fn test_conflict_shows_full_fingerprints() {
        let ours = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";
        let theirs = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3263";
        let conflict = DiffEntry {
            manifest: side(ours),
            observed: side(theirs),
            ..entry(Change::Conflict)
        };
        let text = describe(&conflict, DiffMode::StagedThreeWay);
        assert!(text.contains(ours));
        assert!(text.contains(theirs));

        let modified = DiffEntry {
            manifest: side(ours),
            observed: side(theirs),
            ..entry(Change::Modified)
        };
        assert!(!describe(&modified, DiffMode::Drift).contains(ours));
    }
}
