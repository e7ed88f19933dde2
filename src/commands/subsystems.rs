//! `subsystems`: what this host can reconcile

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::print_json;
use crate::Context;
use crate::config::Config;
use crate::subsystems;
use crate::ui;

#[derive(Serialize)]
struct Row<'a> {
    id: &'a str,
    tier: &'a str,
    description: &'a str,
    enabled: bool,
    available: bool,
}

pub fn run(ctx: &Context) -> Result<i32> {
    let config = Config::load()?;
    let all = subsystems::all(&config);
    let rows: Vec<Row<'_>> = all
        .iter()
        .map(|s| {
            let enabled = !config.is_disabled(s.id().as_str());
            Row {
                id: s.id().as_str(),
                tier: s.tier().as_str(),
                description: s.description(),
                enabled,
                available: enabled && s.is_available(),
            }
        })
        .collect();

    if ctx.json {
        print_json(&rows)?;
        return Ok(0);
    }

    ui::header("Subsystems");
    for row in &rows {
        let status = if !row.enabled {
            "-".dimmed()
        } else if row.available {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {:<12} {:<12} {}",
            status,
            row.id,
            row.tier.dimmed(),
            row.description
        );
    }
    Ok(0)
}
