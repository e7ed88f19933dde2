//! Flatpak applications

use reconcile::{Backend, Item, ItemId, ItemSet, Result};

use crate::runner;

const NAME: &str = "flatpak";
const DEFAULT_ORIGIN: &str = "flathub";

/// Parse `flatpak list --app --columns=application,version,origin`
pub fn parse_list(output: &str) -> ItemSet {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split('\t').map(str::trim);
            let id = cols.next().filter(|id| !id.is_empty())?;
            let mut item = Item::new(id);
            if let Some(version) = cols.next().filter(|v| !v.is_empty()) {
                item = item.with_fingerprint(version);
            }
            if let Some(origin) = cols.next().filter(|o| !o.is_empty()) {
                item = item.with_source("origin", origin);
            }
            Some(item)
        })
        .collect()
}

/// Commands that bring `item` to its declared state.
///
/// `install --or-update` only reaches the latest release, so a differing
/// version can be pinned only through a `commit` source.
fn install_steps<'a>(current: Option<&Item>, item: &'a Item) -> Result<Vec<Vec<&'a str>>> {
    if current.is_some_and(|c| c.matches(item)) {
        return Ok(Vec::new());
    }
    let id = item.id.as_str();
    let commit = item.source("commit");
    let mut steps = Vec::new();
    match (current, commit) {
        (Some(current), None) => {
            return Err(runner::unpinned(NAME, item, current.fingerprint.as_deref()));
        }
        (Some(_), Some(_)) => {}
        (None, _) => {
            let origin = item.source("origin").unwrap_or(DEFAULT_ORIGIN);
            steps.push(vec![
                "install",
                "--or-update",
                "-y",
                "--noninteractive",
                origin,
                id,
            ]);
        }
    }
    if let Some(commit) = commit {
        steps.push(vec!["update", "-y", "--noninteractive", "--commit", commit, id]);
    }
    Ok(steps)
}

#[derive(Debug, Default)]
pub struct FlatpakBackend;

impl Backend for FlatpakBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        runner::command_exists("flatpak")
    }

    fn list(&self) -> Result<ItemSet> {
        let out = runner::run_checked(
            NAME,
            "flatpak",
            &["list", "--app", "--columns=application,version,origin"],
            None,
        )?;
        Ok(parse_list(&out))
    }

    fn install(&self, item: &Item) -> Result<()> {
        let installed = self.list()?;
        for args in install_steps(installed.get(item.id.as_str()), item)? {
            runner::run_checked(NAME, "flatpak", &args, Some(item.id.as_str()))?;
        }
        runner::ensure_pinned(NAME, item, self.list()?.get(item.id.as_str()))
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        runner::run_idempotent(
            NAME,
            "flatpak",
            &["uninstall", "-y", "--noninteractive", id.as_str()],
            Some(id.as_str()),
            &["not installed"],
        )
    }
}
