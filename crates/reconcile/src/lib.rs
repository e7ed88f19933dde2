//! Tier-aware reconciliation of declared, running and baselined state
//!
//! This crate provides:
//! - Subsystem registry with tier metadata (atomic image layers vs
//!   convergent runtime state)
//! - Two-way and three-way diff algorithms with conflict detection
//! - Parallel reconciliation passes with per-subsystem failure isolation
//! - Store and backend traits, with in-memory implementations for tests
//!
//! # Example
//!
//! ```
//! use reconcile::{
//!     Engine, EngineOptions, Item, ItemSet, MemoryBaselineStore, MemoryManifestStore,
//!     MockBackend, NoProgress, Registry, Subsystem, SubsystemTier, Target,
//! };
//! use std::sync::Arc;
//!
//! let backend = MockBackend::new("flatpak")
//!     .with_items(ItemSet::from_iter([Item::new("org.gnome.Maps")]));
//! let mut registry = Registry::new();
//! registry
//!     .register(Subsystem::new(
//!         "flatpak",
//!         SubsystemTier::Convergent,
//!         "Flatpak applications",
//!         Arc::new(backend),
//!     ))
//!     .unwrap();
//!
//! let manifest = MemoryManifestStore::new();
//! let baselines = MemoryBaselineStore::new();
//! let engine = Engine::new(&registry, &manifest, &baselines, EngineOptions::default());
//!
//! engine.capture(&Target::All, &mut NoProgress).unwrap();
//! let drift = engine.drift(&Target::All, &mut NoProgress).unwrap();
//! assert_eq!(drift.exit_code(), 0);
//! ```

pub mod backend;
pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod registry;
pub mod report;
pub mod retry;
pub mod store;
pub mod subsystem;
pub mod tier;
pub mod types;

pub use backend::{Backend, MockBackend};
pub use context::{
    AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use diff::{BaselineRelation, Change, ChangeGroup, DiffEntry, DiffMode, DiffReport, Side};
pub use engine::{Engine, EngineOptions, SyncOptions};
pub use error::{Error, ErrorCategory, Result};
pub use registry::Registry;
pub use report::{
    ActionFailure, ActionKind, BaselineReport, CaptureReport, EditOutcome, Flagged, Outcome,
    PassReport, SubsystemReport, SyncAction, SyncPlan, SyncReport,
};
pub use retry::{RetryCallback, RetryConfig, with_retry};
pub use store::{
    BaselineRecord, BaselineSnapshot, BaselineStore, ManifestSnapshot, ManifestStore,
    MemoryBaselineStore, MemoryManifestStore,
};
pub use subsystem::{CallPolicy, Subsystem};
pub use tier::{Legality, legality};
pub use types::{Item, ItemId, ItemSet, Operation, SubsystemId, SubsystemTier, Target};
