//! The single enumeration of subsystems
//!
//! Registration order is iteration order. Nothing else keeps its own list.

use crate::error::{Error, Result};
use crate::subsystem::Subsystem;
use crate::types::{Operation, SubsystemId, Target};

#[derive(Debug, Default)]
pub struct Registry {
    subsystems: Vec<Subsystem>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subsystem. A duplicate id is rejected and the first one kept.
    pub fn register(&mut self, subsystem: Subsystem) -> Result<()> {
        if self.subsystems.iter().any(|s| s.id() == subsystem.id()) {
            return Err(Error::DuplicateSubsystem {
                id: subsystem.id().clone(),
            });
        }
        log::debug!("Registered {} ({})", subsystem.id(), subsystem.tier());
        self.subsystems.push(subsystem);
        Ok(())
    }

    /// Every subsystem, in registration order
    pub fn all(&self) -> &[Subsystem] {
        &self.subsystems
    }

    pub fn find(&self, id: &str) -> Result<&Subsystem> {
        self.subsystems
            .iter()
            .find(|s| s.id().as_str() == id)
            .ok_or_else(|| Error::NotFound {
                id: SubsystemId::from(id),
            })
    }

    /// Subsystems a pass runs over.
    ///
    /// `All` drops subsystems whose tier does not support `op`. A single
    /// named subsystem is returned as is so the pass reports
    /// `UnsupportedForTier` for it.
    pub fn select(&self, target: &Target, op: Operation) -> Result<Vec<&Subsystem>> {
        match target {
            Target::All => Ok(self
                .subsystems
                .iter()
                .filter(|s| s.supports(op).is_supported())
                .collect()),
            Target::One(id) => Ok(vec![self.find(id.as_str())?]),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &SubsystemId> {
        self.subsystems.iter().map(Subsystem::id)
    }

    pub fn len(&self) -> usize {
        self.subsystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::types::SubsystemTier;
    use std::sync::Arc;

    fn sub(id: &str, tier: SubsystemTier, description: &str) -> Subsystem {
        Subsystem::new(id, tier, description, Arc::new(MockBackend::new(id)))
    }

    #[test]
    fn test_duplicate_is_rejected_and_first_kept() {
        let mut registry = Registry::new();
        registry
            .register(sub("flatpak", SubsystemTier::Convergent, "first"))
            .unwrap();

        let err = registry
            .register(sub("flatpak", SubsystemTier::Convergent, "second"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateSubsystem { .. }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find("flatpak").unwrap().description(), "first");
    }

    #[test]
    fn test_order_is_registration_order() {
        let mut registry = Registry::new();
        for id in ["system", "flatpak", "dconf", "appimage"] {
            registry.register(sub(id, SubsystemTier::Convergent, "")).unwrap();
        }
        let ids: Vec<_> = registry.ids().map(SubsystemId::as_str).collect();
        assert_eq!(ids, vec!["system", "flatpak", "dconf", "appimage"]);
    }

    #[test]
    fn test_find_unknown() {
        let registry = Registry::new();
        assert!(matches!(
            registry.find("nope").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_select_filters_by_tier_only_for_all() {
        let mut registry = Registry::new();
        registry.register(sub("system", SubsystemTier::Atomic, "")).unwrap();
        registry.register(sub("flatpak", SubsystemTier::Convergent, "")).unwrap();

        let all = registry.select(&Target::All, Operation::Drift).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id().as_str(), "flatpak");

        let one = registry
            .select(&Target::One("system".into()), Operation::Drift)
            .unwrap();
        assert_eq!(one.len(), 1);
    }
}
