//! Enabled GNOME Shell extensions

use reconcile::{Backend, Item, ItemId, ItemSet, Result};

use crate::runner;

const NAME: &str = "gnome-extensions";

pub fn parse_list(output: &str) -> ItemSet {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(Item::new)
        .collect()
}

#[derive(Debug, Default)]
pub struct ExtensionsBackend;

impl Backend for ExtensionsBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        runner::command_exists("gnome-extensions")
    }

    fn list(&self) -> Result<ItemSet> {
        let out = runner::run_checked(NAME, "gnome-extensions", &["list", "--enabled"], None)?;
        Ok(parse_list(&out))
    }

    fn install(&self, item: &Item) -> Result<()> {
        runner::run_idempotent(
            NAME,
            "gnome-extensions",
            &["enable", item.id.as_str()],
            Some(item.id.as_str()),
            &["already enabled"],
        )
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        runner::run_idempotent(
            NAME,
            "gnome-extensions",
            &["disable", id.as_str()],
            Some(id.as_str()),
            &["already disabled", "not enabled"],
        )
    }
}
