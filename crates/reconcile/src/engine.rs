//! Reconciliation engine - runs passes over the registry with bounded
//! parallelism and per-subsystem commits

use crate::context::{CancelToken, ConfirmCallback, ProgressCallback};
use crate::diff::{Change, DiffReport};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::report::{
    ActionFailure, ActionKind, BaselineReport, CaptureReport, EditOutcome, Outcome, PassReport,
    SubsystemReport, SyncAction, SyncPlan, SyncReport,
};
use crate::retry::RetryConfig;
use crate::store::{
    BaselineRecord, BaselineSnapshot, BaselineStore, ManifestSnapshot, ManifestStore,
};
use crate::subsystem::{CallPolicy, Subsystem};
use crate::tier::{Legality, ensure_supported};
use crate::types::{Item, ItemId, ItemSet, Operation, SubsystemTier, Target, fingerprints_agree};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker threads per pass
    pub jobs: usize,
    /// Deadline for each backend call
    pub timeout: Duration,
    /// Fail the whole pass when any subsystem fails
    pub all_or_nothing: bool,
    pub retry: RetryConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout: Duration::from_secs(120),
            all_or_nothing: false,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineOptions {
    fn policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.timeout,
            retry: self.retry.clone(),
        }
    }
}

/// Options for `sync`
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Plan only
    pub dry_run: bool,
    /// Also remove untracked items
    pub prune: bool,
}

/// Both stores as read at pass start
struct Snapshots {
    manifest: ManifestSnapshot,
    baseline: BaselineSnapshot,
}

impl Snapshots {
    fn manifest(&self, subsystem: &Subsystem) -> Result<ItemSet> {
        self.manifest
            .items(subsystem.id())
            .map(|items| subsystem.normalize(items))
    }

    fn baseline(&self, subsystem: &Subsystem) -> Result<Option<ItemSet>> {
        self.baseline.items(subsystem.id(), subsystem.tier())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Engine<'a> {
    registry: &'a Registry,
    manifest: &'a dyn ManifestStore,
    baselines: &'a dyn BaselineStore,
    options: EngineOptions,
    cancel: CancelToken,
}

impl<'a> Engine<'a> {
    pub fn new(
        registry: &'a Registry,
        manifest: &'a dyn ManifestStore,
        baselines: &'a dyn BaselineStore,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            manifest,
            baselines,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Handle that stops the current pass from starting more subsystems
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn snapshot(&self) -> Result<Snapshots> {
        Ok(Snapshots {
            manifest: self.manifest.load()?,
            baseline: self.baselines.load()?,
        })
    }

    /// Run `work` for each subsystem on the worker pool.
    ///
    /// Each worker owns its input and inserts into the aggregate once.
    /// Reports come back in the order of `jobs`.
    fn run_pass<I, T, F>(
        &self,
        operation: Operation,
        jobs: Vec<(&Subsystem, I)>,
        progress: &mut dyn ProgressCallback,
        work: F,
    ) -> Result<PassReport<T>>
    where
        I: Send,
        T: Send,
        F: Fn(&Subsystem, I) -> Result<T> + Sync,
    {
        log::info!("Starting {operation} over {} subsystem(s)", jobs.len());
        progress.on_pass_start(operation, jobs.len());

        let count = jobs.len();
        let results: Mutex<Vec<(usize, SubsystemReport<T>)>> = Mutex::new(Vec::with_capacity(count));
        let progress = Mutex::new(progress);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

        pool.install(|| {
            jobs.into_par_iter()
                .enumerate()
                .for_each(|(index, (subsystem, input))| {
                    let outcome = if self.cancel.is_cancelled() {
                        Outcome::Cancelled
                    } else {
                        Outcome::from_result(work(subsystem, input))
                    };
                    match &outcome {
                        Outcome::Failed(e) => log::debug!("{}: {operation} failed: {e}", subsystem.id()),
                        other => log::debug!("{}: {operation} {}", subsystem.id(), other.status()),
                    }
                    lock(&progress).on_subsystem_complete(subsystem.id(), outcome.is_ok());
                    lock(&results).push((
                        index,
                        SubsystemReport {
                            subsystem: subsystem.id().clone(),
                            tier: subsystem.tier(),
                            outcome,
                        },
                    ));
                });
        });

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by_key(|(index, _)| *index);
        progress
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .on_pass_complete();

        let report = PassReport {
            operation,
            reports: results.into_iter().map(|(_, r)| r).collect(),
        };
        log::info!(
            "Finished {operation}: {} ok, {} failed",
            report.succeeded().count(),
            report.failed_count()
        );
        Ok(report)
    }

    fn select(&self, target: &Target, op: Operation) -> Result<Vec<(&'a Subsystem, ())>> {
        Ok(self
            .registry
            .select(target, op)?
            .into_iter()
            .map(|s| (s, ()))
            .collect())
    }

    /// Pending changes: staged vs booted (atomic), three-way (convergent)
    pub fn staged(
        &self,
        target: &Target,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PassReport<DiffReport>> {
        let jobs = self.select(target, Operation::Staged)?;
        let snap = self.snapshot()?;
        let policy = self.options.policy();

        self.run_pass(Operation::Staged, jobs, progress, |s, ()| {
            let manifest = match s.tier() {
                SubsystemTier::Atomic => ItemSet::new(),
                SubsystemTier::Convergent => snap.manifest(s)?,
            };
            let baseline = snap.baseline(s)?;
            s.staged(&manifest, baseline.as_ref(), &policy)
        })
    }

    /// Runtime state vs manifest, annotated by baseline
    pub fn drift(
        &self,
        target: &Target,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PassReport<DiffReport>> {
        let jobs = self.select(target, Operation::Drift)?;
        let snap = self.snapshot()?;
        let policy = self.options.policy();

        self.run_pass(Operation::Drift, jobs, progress, |s, ()| {
            let manifest = snap.manifest(s)?;
            let baseline = snap.baseline(s)?;
            s.drift(&manifest, baseline.as_ref(), &policy)
        })
    }

    /// Write current state into both manifest and baseline
    pub fn capture(
        &self,
        target: &Target,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PassReport<CaptureReport>> {
        let jobs = self.select(target, Operation::Capture)?;
        let snap = self.snapshot()?;
        let policy = self.options.policy();

        self.run_pass(Operation::Capture, jobs, progress, |s, ()| {
            let items = s.capture(&policy)?;
            // A corrupt section is replaced wholesale
            let replaced = snap.manifest(s).map(|m| m.len()).unwrap_or(0);

            self.manifest.write_subsystem(s.id(), &items)?;
            self.baselines.write_subsystem(&BaselineRecord::new(
                s.id().clone(),
                s.tier(),
                items.clone(),
            ))?;
            log::debug!("{}: captured {} item(s)", s.id(), items.len());

            Ok(CaptureReport {
                captured: items.len(),
                replaced,
            })
        })
    }

    /// Re-anchor the baseline on current (or staged) state
    pub fn baseline(
        &self,
        target: &Target,
        force: bool,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PassReport<BaselineReport>> {
        let jobs = self.select(target, Operation::Baseline)?;
        let snap = self.snapshot()?;
        let policy = self.options.policy();

        self.run_pass(Operation::Baseline, jobs, progress, |s, ()| {
            let previous = match snap.baseline(s) {
                Ok(previous) => previous,
                Err(e) if force => {
                    log::warn!("{}: overwriting unreadable baseline: {e}", s.id());
                    None
                }
                Err(e) => return Err(e),
            };
            let manifest = match s.tier() {
                SubsystemTier::Convergent if !force => snap.manifest(s)?,
                _ => ItemSet::new(),
            };

            let (items, from_staged) = s.baseline(&manifest, previous.as_ref(), force, &policy)?;
            let changed = previous
                .as_ref()
                .is_none_or(|p| p.fingerprints() != items.fingerprints());
            if changed {
                self.baselines.write_subsystem(&BaselineRecord::new(
                    s.id().clone(),
                    s.tier(),
                    items.clone(),
                ))?;
            }

            Ok(BaselineReport {
                items: items.len(),
                changed,
                from_staged,
            })
        })
    }

    fn plan_pass(
        &self,
        target: &Target,
        options: SyncOptions,
        snap: &Snapshots,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PassReport<SyncPlan>> {
        let jobs = self.select(target, Operation::Sync)?;
        let policy = self.options.policy();

        self.run_pass(Operation::Sync, jobs, progress, |s, ()| {
            let manifest = snap.manifest(s)?;
            let baseline = snap.baseline(s)?;
            s.plan_sync(&manifest, baseline.as_ref(), options.prune, &policy)
        })
    }

    /// What `sync` would do, without doing it
    pub fn plan_sync(
        &self,
        target: &Target,
        options: SyncOptions,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PassReport<SyncPlan>> {
        let snap = self.snapshot()?;
        self.plan_pass(target, options, &snap, progress)
    }

    /// Converge runtime onto the manifest.
    ///
    /// Plans every selected subsystem, asks once for confirmation, then
    /// applies each plan and re-anchors the baseline of every subsystem
    /// whose actions all succeeded.
    pub fn sync(
        &self,
        target: &Target,
        options: SyncOptions,
        confirm: &mut dyn ConfirmCallback,
        progress: &mut dyn ProgressCallback,
    ) -> Result<PassReport<SyncReport>> {
        let snap = self.snapshot()?;
        let plans = self.plan_pass(target, options, &snap, progress)?;

        if options.dry_run {
            return Ok(plans.map_ok(|plan| Outcome::Ok(SyncReport::unapplied(plan, true))));
        }

        let total: usize = plans.succeeded().map(|(_, p)| p.actions.len()).sum();
        if total == 0 {
            return Ok(plans.map_ok(|plan| Outcome::Ok(SyncReport::unapplied(plan, false))));
        }

        let prompt = format!("Apply {total} change(s)?");
        if !confirm.confirm(&prompt)? {
            log::info!("Sync declined");
            return Ok(plans.map_ok(|plan| {
                if plan.is_empty() {
                    Outcome::Ok(SyncReport::unapplied(plan, false))
                } else {
                    Outcome::Skipped("declined".to_string())
                }
            }));
        }

        // Only subsystems with a plan go to the pool; the rest keep their slot
        let mut pending = Vec::new();
        let mut slots = Vec::with_capacity(plans.reports.len());
        for report in plans.reports {
            let outcome = match report.outcome {
                Outcome::Ok(plan) => {
                    pending.push((self.registry.find(report.subsystem.as_str())?, plan));
                    slots.push(None);
                    continue;
                }
                Outcome::Failed(e) => Outcome::Failed(e),
                Outcome::Skipped(reason) => Outcome::Skipped(reason),
                Outcome::Cancelled => Outcome::Cancelled,
            };
            slots.push(Some(SubsystemReport {
                subsystem: report.subsystem,
                tier: report.tier,
                outcome,
            }));
        }

        let policy = self.options.policy();
        let applied = self.run_pass(Operation::Sync, pending, progress, |s, plan| {
            self.apply_plan(s, plan, &snap, &policy)
        })?;

        let mut applied = applied.reports.into_iter();
        let reports = slots
            .into_iter()
            .filter_map(|slot| slot.or_else(|| applied.next()))
            .collect();
        Ok(PassReport {
            operation: Operation::Sync,
            reports,
        })
    }

    fn apply_plan(
        &self,
        s: &Subsystem,
        plan: SyncPlan,
        snap: &Snapshots,
        policy: &CallPolicy,
    ) -> Result<SyncReport> {
        let mut applied = Vec::new();
        let mut failures = Vec::new();

        for action in &plan.actions {
            match s.apply(action, policy) {
                Ok(()) => applied.push(action.id.clone()),
                Err(e) => {
                    log::warn!("{}: {} {} failed: {e}", s.id(), action.kind.as_str(), action.id);
                    failures.push(ActionFailure {
                        kind: action.kind,
                        id: action.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Applied actions only count once the runtime shows the declared state
        let observed = if applied.is_empty() {
            None
        } else {
            match s.observe(policy) {
                Ok(observed) => Some(observed),
                Err(e) => {
                    log::warn!("{}: could not verify sync: {e}", s.id());
                    None
                }
            }
        };
        if let Some(observed) = &observed {
            applied.retain(|id| match verify(&plan, id, observed) {
                Ok(()) => true,
                Err(failure) => {
                    log::warn!("{}: {} {id}: {}", s.id(), failure.kind.as_str(), failure.error);
                    failures.push(failure);
                    false
                }
            });
        }

        let verified = applied.is_empty() || observed.is_some();
        let rebaselined = if failures.is_empty() && verified {
            match self.reanchor(s, &plan, snap, observed, policy) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("{}: could not re-anchor baseline: {e}", s.id());
                    false
                }
            }
        } else {
            false
        };

        Ok(SyncReport {
            plan,
            dry_run: false,
            applied,
            failures,
            rebaselined,
        })
    }

    /// Baseline after a clean sync: re-observed declared items, with the
    /// previous baseline kept for conflicting ids
    fn reanchor(
        &self,
        s: &Subsystem,
        plan: &SyncPlan,
        snap: &Snapshots,
        observed: Option<ItemSet>,
        policy: &CallPolicy,
    ) -> Result<()> {
        let manifest = snap.manifest(s)?;
        let previous = snap.baseline(s)?;
        let observed = match observed {
            Some(observed) => observed,
            None => s.observe(policy)?,
        };
        let conflicted: BTreeSet<&str> = plan.conflicts.iter().map(|e| e.id.as_str()).collect();

        let mut anchored: ItemSet = observed
            .iter()
            .filter(|i| manifest.contains(i.id.as_str()) && !conflicted.contains(i.id.as_str()))
            .cloned()
            .collect();
        if let Some(previous) = &previous {
            for id in &conflicted {
                if let Some(item) = previous.get(id) {
                    anchored.insert(item.clone());
                }
            }
        }

        let unchanged = previous
            .as_ref()
            .is_some_and(|p| p.fingerprints() == anchored.fingerprints());
        if !unchanged {
            self.baselines.write_subsystem(&BaselineRecord::new(
                s.id().clone(),
                s.tier(),
                anchored,
            ))?;
        }
        Ok(())
    }

    /// Apply `update` to an existing baseline; subsystems never baselined
    /// stay unanchored
    fn update_baseline(&self, s: &Subsystem, update: impl FnOnce(&mut ItemSet)) -> Result<()> {
        let snap = self.baselines.load()?;
        if let Some(mut items) = snap.items(s.id(), s.tier())? {
            update(&mut items);
            self.baselines
                .write_subsystem(&BaselineRecord::new(s.id().clone(), s.tier(), items))?;
        }
        Ok(())
    }

    /// Declare an item. Atomic subsystems only record it; convergent ones
    /// install it first unless `defer` is set.
    pub fn add(&self, subsystem: &str, item: Item, defer: bool) -> Result<EditOutcome> {
        let s = self.registry.find(subsystem)?;
        let legality = ensure_supported(s.id(), s.tier(), Operation::Add)?;
        if item.id.as_str().trim().is_empty() {
            return Err(Error::invalid_item("item id is empty"));
        }

        let mut items = self.manifest.load()?.items(s.id())?;
        let immediate = legality == Legality::Immediate && !defer;

        if immediate {
            s.apply(
                &SyncAction {
                    kind: ActionKind::Install,
                    id: item.id.clone(),
                    item: Some(item.clone()),
                    change: Change::Added,
                },
                &self.options.policy(),
            )?;
        }

        let manifest_changed = items.insert(item.clone()).is_none_or(|old| old != item);
        if manifest_changed {
            self.manifest.write_subsystem(s.id(), &items)?;
        }
        if immediate {
            self.update_baseline(s, |b| {
                b.insert(item.clone());
            })?;
        }

        log::info!("{}: added {}", s.id(), item.id);
        Ok(EditOutcome {
            subsystem: s.id().clone(),
            item: item.id,
            operation: Operation::Add,
            legality: if immediate {
                Legality::Immediate
            } else {
                Legality::Deferred
            },
            manifest_changed,
        })
    }

    /// Undeclare an item. Mirrors [`Engine::add`].
    pub fn remove(&self, subsystem: &str, id: &str, defer: bool) -> Result<EditOutcome> {
        let s = self.registry.find(subsystem)?;
        let legality = ensure_supported(s.id(), s.tier(), Operation::Remove)?;

        let mut items = self.manifest.load()?.items(s.id())?;
        if !items.contains(id) {
            return Err(Error::ItemNotFound {
                subsystem: s.id().clone(),
                item: ItemId::from(id),
            });
        }
        let immediate = legality == Legality::Immediate && !defer;

        if immediate {
            s.apply(
                &SyncAction {
                    kind: ActionKind::Remove,
                    id: ItemId::from(id),
                    item: None,
                    change: Change::PendingRemoval,
                },
                &self.options.policy(),
            )?;
        }

        items.remove(id);
        self.manifest.write_subsystem(s.id(), &items)?;
        if immediate {
            self.update_baseline(s, |b| {
                b.remove(id);
            })?;
        }

        log::info!("{}: removed {id}", s.id());
        Ok(EditOutcome {
            subsystem: s.id().clone(),
            item: ItemId::from(id),
            operation: Operation::Remove,
            legality: if immediate {
                Legality::Immediate
            } else {
                Legality::Deferred
            },
            manifest_changed: true,
        })
    }
}

/// Check one applied action against the re-observed runtime
fn verify(plan: &SyncPlan, id: &ItemId, observed: &ItemSet) -> std::result::Result<(), ActionFailure> {
    let Some(action) = plan.actions.iter().find(|a| &a.id == id) else {
        return Ok(());
    };
    let error = match (action.kind, observed.get(id.as_str())) {
        (ActionKind::Remove, None) => return Ok(()),
        (ActionKind::Remove, Some(_)) => "still present after removal".to_string(),
        (_, None) => "not present after install".to_string(),
        (_, Some(found)) => {
            let declared = action.item.as_ref().and_then(|i| i.fingerprint.as_deref());
            if fingerprints_agree(declared, found.fingerprint.as_deref()) {
                return Ok(());
            }
            format!(
                "did not converge to {} (found {})",
                declared.unwrap_or("(any)"),
                found.fingerprint.as_deref().unwrap_or("(none)")
            )
        }
    };
    Err(ActionFailure {
        kind: action.kind,
        id: id.clone(),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MockBackend};
    use crate::context::{AutoConfirm, AutoDecline, NoProgress};
    use crate::report::EXIT_OK;
    use crate::store::{MemoryBaselineStore, MemoryManifestStore};
    use crate::types::SubsystemId;
    use std::sync::Arc;

    fn set(items: &[(&str, &str)]) -> ItemSet {
        items
            .iter()
            .map(|(id, fp)| Item::new(*id).with_fingerprint(*fp))
            .collect()
    }

    fn options() -> EngineOptions {
        EngineOptions {
            jobs: 4,
            timeout: Duration::from_secs(5),
            all_or_nothing: false,
            retry: RetryConfig::no_retry(),
        }
    }

    fn register(registry: &mut Registry, id: &str, tier: SubsystemTier, mock: &MockBackend) {
        registry
            .register(Subsystem::new(id, tier, id, Arc::new(mock.clone())))
            .unwrap();
    }

    fn ids(list: Vec<&ItemId>) -> Vec<&str> {
        list.into_iter().map(ItemId::as_str).collect()
    }

    #[test]
    fn test_timeout_in_one_subsystem_does_not_abort_siblings() {
        let mut registry = Registry::new();
        for id in ["flatpak", "extensions", "dconf", "toolbox", "shim"] {
            let mut mock = MockBackend::new(id).with_items(set(&[("x", "1")]));
            if id == "extensions" {
                mock = mock.with_delay(Duration::from_secs(2));
            }
            register(&mut registry, id, SubsystemTier::Convergent, &mock);
        }
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(
            &registry,
            &manifest,
            &baselines,
            EngineOptions {
                timeout: Duration::from_millis(100),
                ..options()
            },
        );

        let pass = engine.drift(&Target::All, &mut NoProgress).unwrap();
        assert_eq!(pass.reports.len(), 5);
        assert_eq!(pass.succeeded().count(), 4);
        let failed: Vec<_> = pass.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.as_str(), "extensions");
        assert!(matches!(failed[0].1, Error::AdapterTimeout { .. }));
        assert_ne!(pass.exit_code(), EXIT_OK);

        // Registry order is kept regardless of completion order
        let order: Vec<_> = pass.reports.iter().map(|r| r.subsystem.as_str()).collect();
        assert_eq!(order, vec!["flatpak", "extensions", "dconf", "toolbox", "shim"]);
        assert!(pass.check(false).is_ok());
        assert!(pass.check(true).is_err());
    }

    #[test]
    fn test_capture_then_drift_is_clean() {
        let mock = MockBackend::new("flatpak").with_items(set(&[("a", "1"), ("b", "2")]));
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new().with_section("flatpak", set(&[("old", "1")]));
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let capture = engine.capture(&Target::All, &mut NoProgress).unwrap();
        let report = capture.get("flatpak").unwrap().outcome.value().unwrap();
        assert_eq!(report.captured, 2);
        assert_eq!(report.replaced, 1);

        let drift = engine.drift(&Target::All, &mut NoProgress).unwrap();
        let diff = drift.get("flatpak").unwrap().outcome.value().unwrap();
        assert!(diff.is_clean());
        assert!(diff.drifted().is_empty());
        assert_eq!(drift.exit_code(), EXIT_OK);
    }

    #[test]
    fn test_baseline_is_idempotent() {
        let mock = MockBackend::new("flatpak").with_items(set(&[("a", "1")]));
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new().with_section("flatpak", set(&[("a", "1")]));
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let first = engine.baseline(&Target::All, false, &mut NoProgress).unwrap();
        assert!(first.get("flatpak").unwrap().outcome.value().unwrap().changed);
        let second = engine.baseline(&Target::All, false, &mut NoProgress).unwrap();
        assert!(!second.get("flatpak").unwrap().outcome.value().unwrap().changed);
        assert_eq!(baselines.writes(), 1);

        let staged = engine.staged(&Target::All, &mut NoProgress).unwrap();
        let diff = staged.get("flatpak").unwrap().outcome.value().unwrap();
        assert!(diff.drifted().is_empty());
        assert!(!diff.has_conflicts());
    }

    #[test]
    fn test_baseline_refuses_conflicts_without_force() {
        let mock = MockBackend::new("flatpak").with_items(set(&[("A", "3")]));
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new().with_section("flatpak", set(&[("A", "2")]));
        let baselines = MemoryBaselineStore::new().with_record(BaselineRecord::new(
            "flatpak".into(),
            SubsystemTier::Convergent,
            set(&[("A", "1")]),
        ));
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let pass = engine.baseline(&Target::All, false, &mut NoProgress).unwrap();
        assert!(matches!(
            pass.get("flatpak").unwrap().outcome.error(),
            Some(Error::ConflictsPresent { .. })
        ));
        let forced = engine.baseline(&Target::All, true, &mut NoProgress).unwrap();
        assert!(forced.get("flatpak").unwrap().outcome.is_ok());
    }

    #[test]
    fn test_sync_twice_second_plan_is_empty() {
        let mock = MockBackend::new("flatpak").with_items(set(&[("keep", "1"), ("stale", "1")]));
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new()
            .with_section("flatpak", set(&[("keep", "1"), ("new", "2"), ("stale", "2")]));
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let first = engine
            .sync(&Target::All, SyncOptions::default(), &mut AutoConfirm, &mut NoProgress)
            .unwrap();
        let report = first.get("flatpak").unwrap().outcome.value().unwrap();
        assert_eq!(report.applied.len(), 2);
        assert!(report.rebaselined);
        assert_eq!(first.exit_code(), EXIT_OK);

        let second = engine
            .plan_sync(&Target::All, SyncOptions::default(), &mut NoProgress)
            .unwrap();
        assert!(second.get("flatpak").unwrap().outcome.value().unwrap().is_empty());
        assert_eq!(mock.mutations().len(), 2);
    }

    #[test]
    fn test_sync_leaves_untracked_and_conflicts_alone() {
        let mock = MockBackend::new("flatpak").with_items(set(&[("A", "3"), ("stray", "1")]));
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new().with_section("flatpak", set(&[("A", "2")]));
        let baselines = MemoryBaselineStore::new().with_record(BaselineRecord::new(
            "flatpak".into(),
            SubsystemTier::Convergent,
            set(&[("A", "1")]),
        ));
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let pass = engine
            .sync(&Target::All, SyncOptions::default(), &mut AutoConfirm, &mut NoProgress)
            .unwrap();
        let report = pass.get("flatpak").unwrap().outcome.value().unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.plan.conflicts.len(), 1);
        assert!(mock.mutations().is_empty());
        assert_eq!(pass.exit_code(), crate::report::EXIT_CONFLICTS);

        // Nothing to apply, so the baseline is untouched
        let snap = baselines.load().unwrap();
        let anchored = snap.items(&"flatpak".into(), SubsystemTier::Convergent).unwrap().unwrap();
        assert_eq!(anchored.get("A").unwrap().fingerprint.as_deref(), Some("1"));
        assert!(!anchored.contains("stray"));
    }

    #[test]
    fn test_sync_dry_run_and_decline_change_nothing() {
        let mock = MockBackend::new("flatpak");
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new().with_section("flatpak", set(&[("a", "1")]));
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let dry = engine
            .sync(
                &Target::All,
                SyncOptions {
                    dry_run: true,
                    prune: false,
                },
                &mut AutoConfirm,
                &mut NoProgress,
            )
            .unwrap();
        let report = dry.get("flatpak").unwrap().outcome.value().unwrap();
        assert!(report.dry_run);
        assert_eq!(report.plan.actions.len(), 1);

        let declined = engine
            .sync(&Target::All, SyncOptions::default(), &mut AutoDecline, &mut NoProgress)
            .unwrap();
        assert!(matches!(
            declined.get("flatpak").unwrap().outcome,
            Outcome::Skipped(_)
        ));
        assert!(mock.mutations().is_empty());
        assert_eq!(baselines.writes(), 0);
    }

    #[test]
    fn test_sync_action_failure_blocks_reanchor() {
        let mock = MockBackend::new("flatpak").failing_install("broken");
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new()
            .with_section("flatpak", set(&[("broken", "1"), ("fine", "1")]));
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let pass = engine
            .sync(&Target::All, SyncOptions::default(), &mut AutoConfirm, &mut NoProgress)
            .unwrap();
        let report = pass.get("flatpak").unwrap().outcome.value().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.applied, vec![ItemId::from("fine")]);
        assert!(!report.rebaselined);
        assert_ne!(pass.exit_code(), EXIT_OK);
    }

    #[test]
    fn test_sync_that_misses_declared_version_is_a_failure() {
        let mock = MockBackend::new("flatpak")
            .with_items(set(&[("app", "46")]))
            .ignoring_versions();
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new().with_section("flatpak", set(&[("app", "45")]));
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        for _ in 0..2 {
            let pass = engine
                .sync(&Target::All, SyncOptions::default(), &mut AutoConfirm, &mut NoProgress)
                .unwrap();
            let report = pass.get("flatpak").unwrap().outcome.value().unwrap();
            assert_eq!(report.plan.actions.len(), 1);
            assert!(report.applied.is_empty());
            assert_eq!(report.failures.len(), 1);
            assert!(report.failures[0].error.contains("did not converge to 45"));
            assert!(!report.rebaselined);
            assert_ne!(pass.exit_code(), EXIT_OK);
        }
        assert_eq!(baselines.writes(), 0);
        assert_eq!(mock.items().get("app").unwrap().fingerprint.as_deref(), Some("46"));
    }

    #[derive(Debug)]
    struct CaseInsensitive;

    impl Backend for CaseInsensitive {
        fn name(&self) -> &str {
            "case"
        }

        fn list(&self) -> Result<ItemSet> {
            Ok(set(&[("box", "fedora:40")]))
        }

        fn normalize(&self, mut item: Item) -> Item {
            item.fingerprint = item.fingerprint.map(|f| f.to_lowercase());
            item
        }
    }

    #[test]
    fn test_manifest_is_read_in_backend_spelling() {
        let mut registry = Registry::new();
        registry
            .register(Subsystem::new(
                "toolbox",
                SubsystemTier::Convergent,
                "",
                Arc::new(CaseInsensitive),
            ))
            .unwrap();
        let manifest = MemoryManifestStore::new().with_section("toolbox", set(&[("box", "Fedora:40")]));
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let plan = engine
            .plan_sync(&Target::All, SyncOptions::default(), &mut NoProgress)
            .unwrap();
        assert!(plan.get("toolbox").unwrap().outcome.value().unwrap().is_empty());
    }

    #[test]
    fn test_atomic_sync_and_drift_are_unsupported() {
        let mock = MockBackend::new("rpm-ostree").with_items(set(&[("vim", "9.1")]));
        let mut registry = Registry::new();
        register(&mut registry, "system", SubsystemTier::Atomic, &mock);
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());
        let system = Target::One("system".into());

        let drift = engine.drift(&system, &mut NoProgress).unwrap();
        assert!(matches!(
            drift.get("system").unwrap().outcome.error(),
            Some(Error::UnsupportedForTier { .. })
        ));
        let sync = engine
            .plan_sync(&system, SyncOptions::default(), &mut NoProgress)
            .unwrap();
        assert!(matches!(
            sync.get("system").unwrap().outcome.error(),
            Some(Error::UnsupportedForTier { .. })
        ));

        // Whole-registry passes leave atomic subsystems out
        assert!(engine.drift(&Target::All, &mut NoProgress).unwrap().reports.is_empty());
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_staged_three_way_through_engine() {
        let mock = MockBackend::new("flatpak").with_items(set(&[("A", "v1")]));
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest =
            MemoryManifestStore::new().with_section("flatpak", set(&[("A", "v2"), ("B", "v1")]));
        let baselines = MemoryBaselineStore::new().with_record(BaselineRecord::new(
            "flatpak".into(),
            SubsystemTier::Convergent,
            set(&[("A", "v1")]),
        ));
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let pass = engine.staged(&Target::All, &mut NoProgress).unwrap();
        let diff = pass.get("flatpak").unwrap().outcome.value().unwrap();
        assert_eq!(ids(diff.pending_change()), vec!["A"]);
        assert_eq!(ids(diff.added()), vec!["B"]);
        assert_eq!(pass.exit_code(), EXIT_OK);
    }

    #[test]
    fn test_corrupt_manifest_section_fails_only_its_subsystem() {
        let good = MockBackend::new("flatpak");
        let bad = MockBackend::new("dconf");
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &good);
        register(&mut registry, "dconf", SubsystemTier::Convergent, &bad);
        let manifest = MemoryManifestStore::new().with_corrupt_section("dconf", "invalid type");
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let pass = engine.drift(&Target::All, &mut NoProgress).unwrap();
        assert!(pass.get("flatpak").unwrap().outcome.is_ok());
        assert!(matches!(
            pass.get("dconf").unwrap().outcome.error(),
            Some(Error::ManifestCorrupt { .. })
        ));
    }

    #[test]
    fn test_baseline_tier_mismatch_is_reported() {
        let mock = MockBackend::new("flatpak");
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new().with_record(BaselineRecord::new(
            "flatpak".into(),
            SubsystemTier::Atomic,
            ItemSet::new(),
        ));
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let pass = engine.drift(&Target::All, &mut NoProgress).unwrap();
        assert!(matches!(
            pass.get("flatpak").unwrap().outcome.error(),
            Some(Error::BaselineCorrupt { .. })
        ));
    }

    #[test]
    fn test_cancelled_pass_starts_nothing() {
        let mock = MockBackend::new("flatpak");
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        engine.cancel_token().cancel();
        let pass = engine.capture(&Target::All, &mut NoProgress).unwrap();
        assert!(matches!(
            pass.get("flatpak").unwrap().outcome,
            Outcome::Cancelled
        ));
        assert!(mock.calls().is_empty());
        assert_ne!(pass.exit_code(), EXIT_OK);
    }

    struct CancelAfterFirst(CancelToken);

    impl ProgressCallback for CancelAfterFirst {
        fn on_pass_start(&mut self, _operation: Operation, _count: usize) {}

        fn on_pass_complete(&mut self) {}

        fn on_subsystem_complete(&mut self, _id: &SubsystemId, _ok: bool) {
            self.0.cancel();
        }
    }

    #[test]
    fn test_cancel_mid_pass_keeps_committed_writes() {
        let first = MockBackend::new("flatpak").with_items(set(&[("a", "1")]));
        let second = MockBackend::new("dconf").with_items(set(&[("/k", "v")]));
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &first);
        register(&mut registry, "dconf", SubsystemTier::Convergent, &second);
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(
            &registry,
            &manifest,
            &baselines,
            EngineOptions {
                jobs: 1,
                ..options()
            },
        );

        let mut progress = CancelAfterFirst(engine.cancel_token());
        let pass = engine.capture(&Target::All, &mut progress).unwrap();
        assert!(pass.get("flatpak").unwrap().outcome.is_ok());
        assert!(matches!(
            pass.get("dconf").unwrap().outcome,
            Outcome::Cancelled
        ));

        let flatpak: SubsystemId = "flatpak".into();
        assert!(manifest.load().unwrap().items(&flatpak).unwrap().contains("a"));
        let anchored = baselines
            .load()
            .unwrap()
            .items(&flatpak, SubsystemTier::Convergent)
            .unwrap()
            .unwrap();
        assert!(anchored.contains("a"));
        assert!(!manifest.load().unwrap().contains(&"dconf".into()));
        assert!(second.calls().is_empty());
        assert_ne!(pass.exit_code(), EXIT_OK);
    }

    #[test]
    fn test_add_is_deferred_for_atomic() {
        let mock = MockBackend::new("rpm-ostree");
        let mut registry = Registry::new();
        register(&mut registry, "system", SubsystemTier::Atomic, &mock);
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let outcome = engine.add("system", Item::new("htop"), false).unwrap();
        assert_eq!(outcome.legality, Legality::Deferred);
        assert!(outcome.manifest_changed);
        assert!(mock.mutations().is_empty());
        assert!(manifest.load().unwrap().items(&"system".into()).unwrap().contains("htop"));
    }

    #[test]
    fn test_add_and_remove_convergent() {
        let mock = MockBackend::new("flatpak");
        let mut registry = Registry::new();
        register(&mut registry, "flatpak", SubsystemTier::Convergent, &mock);
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new().with_record(BaselineRecord::new(
            "flatpak".into(),
            SubsystemTier::Convergent,
            ItemSet::new(),
        ));
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        let added = engine
            .add("flatpak", Item::new("org.gnome.Maps").with_fingerprint("46"), false)
            .unwrap();
        assert_eq!(added.legality, Legality::Immediate);
        assert!(mock.items().contains("org.gnome.Maps"));
        let snap = baselines.load().unwrap();
        assert!(snap
            .items(&"flatpak".into(), SubsystemTier::Convergent)
            .unwrap()
            .unwrap()
            .contains("org.gnome.Maps"));

        let deferred = engine.remove("flatpak", "org.gnome.Maps", true).unwrap();
        assert_eq!(deferred.legality, Legality::Deferred);
        assert!(mock.items().contains("org.gnome.Maps"));
        assert!(manifest.load().unwrap().items(&"flatpak".into()).unwrap().is_empty());

        let err = engine.remove("flatpak", "org.gnome.Maps", false).unwrap_err();
        assert!(matches!(err, Error::ItemNotFound { .. }));
    }

    #[test]
    fn test_add_unknown_subsystem() {
        let registry = Registry::new();
        let manifest = MemoryManifestStore::new();
        let baselines = MemoryBaselineStore::new();
        let engine = Engine::new(&registry, &manifest, &baselines, options());

        assert!(matches!(
            engine.add("nope", Item::new("x"), false).unwrap_err(),
            Error::NotFound { .. }
        ));
    }
}
