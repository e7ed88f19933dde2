//! A backend wrapped with tier metadata
//!
//! Every operation consults the legality table first, then talks to the
//! backend through a timeout guard. Mutations are also retried.

use crate::backend::Backend;
use crate::diff::{self, Change, DiffMode, DiffReport};
use crate::error::{Error, Result};
use crate::report::{ActionKind, SyncAction, SyncPlan};
use crate::retry::{LogCallback, RetryConfig, with_retry};
use crate::tier::{Legality, ensure_supported};
use crate::types::{ItemSet, Operation, SubsystemId, SubsystemTier};
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Deadline and retry settings applied to every backend call
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}

/// Run `f` against the backend on its own thread and give up after `timeout`.
///
/// A call that times out keeps running in the background; its result is
/// dropped.
fn call_with_timeout<T, F>(
    backend: &Arc<dyn Backend>,
    call: &'static str,
    timeout: Duration,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Backend) -> Result<T> + Send + 'static,
{
    let name = backend.name().to_string();
    let worker = Arc::clone(backend);
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name(format!("{name}-{call}"))
        .spawn(move || {
            let _ = tx.send(f(worker.as_ref()));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{name}: {call} timed out after {}s", timeout.as_secs_f32());
            Err(Error::AdapterTimeout {
                backend: name,
                call,
                timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::Other(format!("{name}: {call} worker exited without a result")))
        }
    }
}

/// Common ancestor for a three-way comparison.
///
/// A subsystem never baselined is anchored on its runtime state for the
/// declared ids, so manifest edits read as pending changes instead of
/// conflicts and undeclared items stay untracked.
fn anchor(baseline: Option<&ItemSet>, manifest: &ItemSet, observed: &ItemSet) -> ItemSet {
    match baseline {
        Some(baseline) => baseline.clone(),
        None => observed
            .iter()
            .filter(|i| manifest.contains(i.id.as_str()))
            .cloned()
            .collect(),
    }
}

/// One ecosystem as the engine sees it
#[derive(Clone)]
pub struct Subsystem {
    id: SubsystemId,
    tier: SubsystemTier,
    description: String,
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subsystem")
            .field("id", &self.id)
            .field("tier", &self.tier)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Subsystem {
    pub fn new(
        id: impl Into<SubsystemId>,
        tier: SubsystemTier,
        description: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            id: id.into(),
            tier,
            description: description.into(),
            backend,
        }
    }

    pub fn id(&self) -> &SubsystemId {
        &self.id
    }

    /// Fixed at construction
    pub fn tier(&self) -> SubsystemTier {
        self.tier
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Declared items in the backend's own spelling
    pub fn normalize(&self, items: ItemSet) -> ItemSet {
        items
            .into_items()
            .into_iter()
            .map(|item| self.backend.normalize(item))
            .collect()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub fn supports(&self, op: Operation) -> Legality {
        crate::tier::legality(self.tier, op)
    }

    fn ensure(&self, op: Operation) -> Result<Legality> {
        ensure_supported(&self.id, self.tier, op)
    }

    /// Current items as the backend reports them
    pub fn observe(&self, policy: &CallPolicy) -> Result<ItemSet> {
        call_with_timeout(&self.backend, "list", policy.timeout, |b| b.list())
    }

    fn pending(&self, policy: &CallPolicy) -> Result<Option<ItemSet>> {
        call_with_timeout(&self.backend, "staged", policy.timeout, |b| b.staged())
    }

    fn report(&self, mode: DiffMode, entries: Vec<diff::DiffEntry>) -> DiffReport {
        DiffReport {
            subsystem: self.id.clone(),
            tier: self.tier,
            mode,
            staged_pending: None,
            entries,
        }
    }

    /// What the next reboot (atomic) or the next sync (convergent) changes
    pub fn staged(
        &self,
        manifest: &ItemSet,
        baseline: Option<&ItemSet>,
        policy: &CallPolicy,
    ) -> Result<DiffReport> {
        match self.ensure(Operation::Staged)? {
            Legality::TwoWay => {
                let booted = self.observe(policy)?;
                let pending = self.pending(policy)?;
                let staged = pending.as_ref().unwrap_or(&booted);
                let mut report = self.report(
                    DiffMode::StagedTwoWay,
                    diff::two_way(&staged.fingerprints(), &booted.fingerprints()),
                );
                report.staged_pending = Some(pending.is_some());
                Ok(report)
            }
            _ => {
                let observed = self.observe(policy)?;
                let baseline = anchor(baseline, manifest, &observed);
                Ok(self.report(
                    DiffMode::StagedThreeWay,
                    diff::three_way_sets(&baseline, manifest, &observed),
                ))
            }
        }
    }

    /// Runtime state against the manifest, annotated by the baseline
    pub fn drift(
        &self,
        manifest: &ItemSet,
        baseline: Option<&ItemSet>,
        policy: &CallPolicy,
    ) -> Result<DiffReport> {
        self.ensure(Operation::Drift)?;
        let observed = self.observe(policy)?;
        let baseline_view = baseline.map(ItemSet::fingerprints);
        Ok(self.report(
            DiffMode::Drift,
            diff::drift(
                baseline_view.as_ref(),
                &manifest.fingerprints(),
                &observed.fingerprints(),
            ),
        ))
    }

    /// Items to write to both manifest and baseline
    pub fn capture(&self, policy: &CallPolicy) -> Result<ItemSet> {
        self.ensure(Operation::Capture)?;
        self.observe(policy)
    }

    /// Items to record as the new baseline.
    ///
    /// Atomic subsystems anchor on the pending layer when there is one.
    /// Convergent subsystems refuse while conflicts are present unless
    /// `force` is set. Returns the items and whether they came from a
    /// pending layer.
    pub fn baseline(
        &self,
        manifest: &ItemSet,
        baseline: Option<&ItemSet>,
        force: bool,
        policy: &CallPolicy,
    ) -> Result<(ItemSet, bool)> {
        self.ensure(Operation::Baseline)?;
        match self.tier {
            SubsystemTier::Atomic => match self.pending(policy)? {
                Some(staged) => Ok((staged, true)),
                None => Ok((self.observe(policy)?, false)),
            },
            SubsystemTier::Convergent => {
                let observed = self.observe(policy)?;
                if !force {
                    let anchor = anchor(baseline, manifest, &observed);
                    let entries = diff::three_way_sets(&anchor, manifest, &observed);
                    let count = entries
                        .iter()
                        .filter(|e| e.change == Change::Conflict)
                        .count();
                    if count > 0 {
                        return Err(Error::ConflictsPresent {
                            subsystem: self.id.clone(),
                            count,
                        });
                    }
                }
                Ok((observed, false))
            }
        }
    }

    /// Plan the adapter calls that converge runtime onto the manifest.
    ///
    /// Conflicts are listed, never acted on. Untracked items are removed
    /// only with `prune`.
    pub fn plan_sync(
        &self,
        manifest: &ItemSet,
        baseline: Option<&ItemSet>,
        prune: bool,
        policy: &CallPolicy,
    ) -> Result<SyncPlan> {
        self.ensure(Operation::Sync)?;
        let observed = self.observe(policy)?;
        let anchor = anchor(baseline, manifest, &observed);
        let entries = diff::three_way_sets(&anchor, manifest, &observed);

        let mut plan = SyncPlan {
            actions: Vec::new(),
            conflicts: Vec::new(),
            untracked: Vec::new(),
        };

        for entry in entries {
            let declared = manifest.get(entry.id.as_str()).cloned();
            let kind = match entry.change {
                Change::Unchanged => None,
                Change::Conflict => {
                    plan.conflicts.push(entry);
                    continue;
                }
                Change::Untracked if !prune => {
                    plan.untracked.push(entry.id);
                    continue;
                }
                Change::Untracked | Change::PendingRemoval => Some(ActionKind::Remove),
                Change::Added => Some(ActionKind::Install),
                // Declared and gone at runtime; dropped from both sides needs nothing
                Change::Removed => declared.as_ref().map(|_| ActionKind::Install),
                Change::Modified | Change::PendingChange | Change::Drifted => {
                    Some(ActionKind::Reinstall)
                }
            };
            if let Some(kind) = kind {
                plan.actions.push(SyncAction {
                    kind,
                    id: entry.id,
                    item: if kind == ActionKind::Remove { None } else { declared },
                    change: entry.change,
                });
            }
        }

        Ok(plan)
    }

    /// Run one planned action with retry and timeout
    pub fn apply(&self, action: &SyncAction, policy: &CallPolicy) -> Result<()> {
        log::debug!("{}: {} {}", self.id, action.kind.as_str(), action.id);
        with_retry(&policy.retry, Some(&LogCallback), || match action.kind {
            ActionKind::Remove => {
                let id = action.id.clone();
                call_with_timeout(&self.backend, "remove", policy.timeout, move |b| {
                    b.remove(&id)
                })
            }
            ActionKind::Install | ActionKind::Reinstall => {
                let item = action
                    .item
                    .clone()
                    .ok_or_else(|| Error::invalid_item(format!("{}: no declaration", action.id)))?;
                call_with_timeout(&self.backend, "install", policy.timeout, move |b| {
                    b.install(&item)
                })
            }
        })
    }
}
