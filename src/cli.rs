use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Reconcile declared, running and baselined state across an immutable OS",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Subsystems processed in parallel
    #[arg(short, long, global = true, env = "STRATA_JOBS")]
    pub jobs: Option<usize>,

    /// Seconds before a backend call is abandoned
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fail the whole pass when any subsystem fails
    #[arg(long, global = true)]
    pub all_or_nothing: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show pending changes: staged image vs booted, or manifest vs runtime
    Staged(TargetArgs),

    /// Converge runtime state onto the manifest
    Sync(SyncArgs),

    /// Write current state into the manifest and baseline
    Capture(TargetArgs),

    /// Show how runtime state moved away from the manifest
    Drift(TargetArgs),

    /// Re-anchor the baseline on current state
    Baseline(BaselineArgs),

    /// Declare an item
    #[command(disable_version_flag = true)]
    Add(AddArgs),

    /// Undeclare an item
    #[command(alias = "rm")]
    Remove(RemoveArgs),

    /// List registered subsystems
    Subsystems,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct TargetArgs {
    /// Subsystem to operate on (default: all)
    pub subsystem: Option<String>,
}

#[derive(Args)]
pub struct SyncArgs {
    /// Subsystem to operate on (default: all)
    pub subsystem: Option<String>,

    /// Show the plan without applying it
    #[arg(long)]
    pub dry_run: bool,

    /// Also remove items that were never declared
    #[arg(long)]
    pub prune: bool,

    /// Apply without asking
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct BaselineArgs {
    /// Subsystem to operate on (default: all)
    pub subsystem: Option<String>,

    /// Re-anchor even with unresolved conflicts or an unreadable baseline
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct AddArgs {
    /// Subsystem the item belongs to
    pub subsystem: String,

    /// Item id (package, extension uuid, dconf key, ...)
    pub id: String,

    /// Pin a version or configuration value
    #[arg(long = "version", value_name = "VERSION")]
    pub fingerprint: Option<String>,

    /// Source metadata, repeatable (e.g. --source origin=flathub)
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub source: Vec<(String, String)>,

    /// Only record it in the manifest; the next sync installs it
    #[arg(long)]
    pub defer: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Subsystem the item belongs to
    pub subsystem: String,

    /// Item id
    pub id: String,

    /// Only drop it from the manifest
    #[arg(long)]
    pub defer: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_flags() {
        let cli = Cli::parse_from(["strata", "-vv", "sync", "flatpak", "--dry-run", "--prune"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.subsystem.as_deref(), Some("flatpak"));
                assert!(args.dry_run);
                assert!(args.prune);
                assert!(!args.yes);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_add_with_sources() {
        let cli = Cli::parse_from([
            "strata",
            "add",
            "appimage",
            "Obsidian",
            "--version",
            "1.6.7",
            "--source",
            "url=https://example.com/o.AppImage?x=1",
            "--defer",
        ]);
        match cli.command {
            Command::Add(args) => {
                assert_eq!(args.subsystem, "appimage");
                assert_eq!(
                    args.source,
                    vec![(
                        "url".to_string(),
                        "https://example.com/o.AppImage?x=1".to_string()
                    )]
                );
                assert!(args.defer);
                assert_eq!(args.fingerprint.as_deref(), Some("1.6.7"));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["strata", "drift", "--json", "--timeout", "5", "--all-or-nothing"]);
        assert!(cli.json);
        assert_eq!(cli.timeout, Some(5));
        assert!(cli.all_or_nothing);
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("origin=flathub").unwrap(),
            ("origin".to_string(), "flathub".to_string())
        );
        assert!(parse_key_value("origin").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
