//! User-level Homebrew formulae (Linuxbrew under the home directory)

use reconcile::{Backend, Item, ItemId, ItemSet, Result};

use crate::runner;

const NAME: &str = "brew";

/// Parse `brew list --formula --versions`; with several kegs the newest
/// (last listed) version wins
pub fn parse_versions(output: &str) -> ItemSet {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let item = Item::new(name);
            Some(match parts.last() {
                Some(version) => item.with_fingerprint(version),
                None => item,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct HomebrewBackend;

impl Backend for HomebrewBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        runner::command_exists("brew")
    }

    fn list(&self) -> Result<ItemSet> {
        let out = runner::run_checked(NAME, "brew", &["list", "--formula", "--versions"], None)?;
        Ok(parse_versions(&out))
    }

    fn install(&self, item: &Item) -> Result<()> {
        let installed = self.list()?;
        match installed.get(item.id.as_str()) {
            Some(current) if current.matches(item) => return Ok(()),
            // `brew upgrade` only reaches the latest release
            Some(current) => {
                return Err(runner::unpinned(NAME, item, current.fingerprint.as_deref()));
            }
            None => {
                runner::run_checked(
                    NAME,
                    "brew",
                    &["install", "--formula", item.id.as_str()],
                    Some(item.id.as_str()),
                )?;
            }
        }
        runner::ensure_pinned(NAME, item, self.list()?.get(item.id.as_str()))
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        runner::run_idempotent(
            NAME,
            "brew",
            &["uninstall", "--formula", id.as_str()],
            Some(id.as_str()),
            &["no such keg", "is not installed"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        let items = parse_versions("jq 1.7.1\nopenssl@3 3.3.1 3.3.2\n\nripgrep\n");
        assert_eq!(items.len(), 3);
        assert_eq!(items.get("jq").unwrap().fingerprint.as_deref(), Some("1.7.1"));
        assert_eq!(
            items.get("openssl@3").unwrap().fingerprint.as_deref(),
            Some("3.3.2")
        );
        assert_eq!(items.get("ripgrep").unwrap().fingerprint, None);
    }
}
