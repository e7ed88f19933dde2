//! Layered packages of the booted and pending rpm-ostree deployments

use reconcile::{Backend, Error, Item, ItemSet, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::runner;

const NAME: &str = "rpm-ostree";

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Deployment {
    #[serde(default)]
    pub osname: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub serial: u32,
    #[serde(default)]
    pub booted: bool,
    #[serde(default)]
    pub staged: bool,
    #[serde(default)]
    pub requested_packages: Vec<String>,
    #[serde(default)]
    pub requested_local_packages: Vec<String>,
}

impl Status {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::AdapterFailed {
            backend: NAME.to_string(),
            message: format!("unexpected status output: {e}"),
            stderr: String::new(),
            category: reconcile::ErrorCategory::Other,
        })
    }

    /// Query `rpm-ostree status --json`
    pub fn query() -> Result<Self> {
        Self::parse(&runner::run_checked(NAME, "rpm-ostree", &["status", "--json"], None)?)
    }

    pub fn booted(&self) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.booted)
    }

    /// The deployment the next boot will use, if it is not the booted one.
    ///
    /// Deployments are listed newest first, so a non-booted head is pending.
    pub fn pending(&self) -> Option<&Deployment> {
        if let Some(staged) = self.deployments.iter().find(|d| d.staged && !d.booted) {
            return Some(staged);
        }
        self.deployments.first().filter(|d| !d.booted)
    }
}

impl Deployment {
    /// Layered packages, as items without fingerprints
    pub fn items(&self) -> ItemSet {
        self.requested_packages
            .iter()
            .chain(&self.requested_local_packages)
            .map(|p| Item::new(p.as_str()).with_source("layer", "rpm-ostree"))
            .collect()
    }

    /// Root of this deployment's filesystem tree
    pub fn root(&self) -> PathBuf {
        PathBuf::from("/ostree/deploy")
            .join(&self.osname)
            .join("deploy")
            .join(format!("{}.{}", self.checksum, self.serial))
    }
}

/// `system`: packages layered onto the OS image
#[derive(Debug, Default)]
pub struct RpmOstreeBackend;

impl Backend for RpmOstreeBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        runner::command_exists("rpm-ostree")
    }

    fn list(&self) -> Result<ItemSet> {
        let status = Status::query()?;
        let booted = status
            .booted()
            .ok_or_else(|| Error::unavailable(NAME, "no booted deployment"))?;
        Ok(booted.items())
    }

    fn staged(&self) -> Result<Option<ItemSet>> {
        Ok(Status::query()?.pending().map(Deployment::items))
    }
}
