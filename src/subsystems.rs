//! The subsystems this host knows about, in pass order

use reconcile::{Backend, Registry, Result, Subsystem, SubsystemTier};
use std::sync::Arc;

use crate::backend::{
    AppImageBackend, DconfBackend, ExtensionsBackend, FlatpakBackend, HomebrewBackend,
    RpmOstreeBackend, ShimBackend, ToolboxBackend, UpstreamBackend,
};
use crate::config::Config;

/// Every known subsystem, enabled or not
pub fn all(config: &Config) -> Vec<Subsystem> {
    let entries: Vec<(&str, SubsystemTier, &str, Arc<dyn Backend>)> = vec![
        (
            "system",
            SubsystemTier::Atomic,
            "Packages layered onto the OS image",
            Arc::new(RpmOstreeBackend),
        ),
        (
            "upstream",
            SubsystemTier::Atomic,
            "Packages shipped by the image vendor",
            Arc::new(UpstreamBackend::new(&config.paths.upstream_manifest)),
        ),
        (
            "flatpak",
            SubsystemTier::Convergent,
            "Flatpak applications",
            Arc::new(FlatpakBackend),
        ),
        (
            "extensions",
            SubsystemTier::Convergent,
            "Enabled GNOME Shell extensions",
            Arc::new(ExtensionsBackend),
        ),
        (
            "dconf",
            SubsystemTier::Convergent,
            "Desktop settings",
            Arc::new(DconfBackend),
        ),
        (
            "toolbox",
            SubsystemTier::Convergent,
            "Toolbox containers",
            Arc::new(ToolboxBackend),
        ),
        (
            "appimage",
            SubsystemTier::Convergent,
            "AppImages",
            Arc::new(AppImageBackend::new(config.paths.appimage_dir())),
        ),
        (
            "shim",
            SubsystemTier::Convergent,
            "Command wrappers on PATH",
            Arc::new(ShimBackend::new(config.paths.shim_dir())),
        ),
        (
            "homebrew",
            SubsystemTier::Convergent,
            "User-level Homebrew formulae",
            Arc::new(HomebrewBackend),
        ),
    ];

    entries
        .into_iter()
        .map(|(id, tier, description, backend)| Subsystem::new(id, tier, description, backend))
        .collect()
}

/// Registry of the enabled subsystems
pub fn registry(config: &Config) -> Result<Registry> {
    let mut registry = Registry::new();
    for subsystem in all(config) {
        if config.is_disabled(subsystem.id().as_str()) {
            log::debug!("Skipping disabled subsystem {}", subsystem.id());
            continue;
        }
        registry.register(subsystem)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{Legality, Operation};

    #[test]
    fn test_default_registry_order() {
        let registry = registry(&Config::default()).unwrap();
        let ids: Vec<_> = registry.ids().map(|id| id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "system",
                "upstream",
                "flatpak",
                "extensions",
                "dconf",
                "toolbox",
                "appimage",
                "shim",
                "homebrew"
            ]
        );
    }

    #[test]
    fn test_tiers() {
        let registry = registry(&Config::default()).unwrap();
        let system = registry.find("system").unwrap();
        assert_eq!(system.supports(Operation::Sync), Legality::Unsupported);
        assert_eq!(system.supports(Operation::Add), Legality::Deferred);

        let flatpak = registry.find("flatpak").unwrap();
        assert_eq!(flatpak.supports(Operation::Sync), Legality::Immediate);
    }

    #[test]
    fn test_disabled_are_left_out() {
        let config = Config::parse("[subsystems]\ndisabled = [\"homebrew\", \"toolbox\"]\n").unwrap();
        let registry = registry(&config).unwrap();
        assert_eq!(registry.len(), 7);
        assert!(registry.find("homebrew").is_err());
    }
}
