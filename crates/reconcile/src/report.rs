//! Per-subsystem outcomes and pass aggregation

use crate::diff::{DiffEntry, DiffReport};
use crate::error::{Error, ErrorCategory, Result};
use crate::tier::Legality;
use crate::types::{Item, ItemId, Operation, SubsystemId, SubsystemTier};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Exit code when every invoked subsystem succeeded with nothing to flag
pub const EXIT_OK: i32 = 0;
/// Exit code when a subsystem or an adapter call failed
pub const EXIT_FAILED: i32 = 1;
/// Exit code when the only problem is unresolved conflicts
pub const EXIT_CONFLICTS: i32 = 2;

/// What a pass result has to flag beyond success or failure
pub trait Flagged {
    /// Conflicting items the user has to resolve
    fn conflict_count(&self) -> usize {
        0
    }

    /// Item-level failures inside an otherwise completed subsystem
    fn failure_count(&self) -> usize {
        0
    }
}

/// Result of one subsystem's share of a pass
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Failed(Error),
    /// Not attempted, with the reason
    Skipped(String),
    /// Not started because the pass was cancelled
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(Error::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("status", self.status())?;
        match self {
            Self::Ok(value) => map.serialize_entry("report", value)?,
            Self::Failed(e) => {
                map.serialize_entry("error", &e.to_string())?;
                map.serialize_entry("category", e.category().description())?;
            }
            Self::Skipped(reason) => map.serialize_entry("reason", reason)?,
            Self::Cancelled => {}
        }
        map.end()
    }
}

/// One subsystem's entry in a pass report
#[derive(Debug, Serialize)]
pub struct SubsystemReport<T> {
    pub subsystem: SubsystemId,
    pub tier: SubsystemTier,
    #[serde(flatten)]
    pub outcome: Outcome<T>,
}

/// Aggregate of one pass, in registry order
#[derive(Debug, Serialize)]
pub struct PassReport<T> {
    pub operation: Operation,
    pub reports: Vec<SubsystemReport<T>>,
}

impl<T> PassReport<T> {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            reports: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SubsystemReport<T>> {
        self.reports.iter().find(|r| r.subsystem.as_str() == id)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&SubsystemId, &T)> {
        self.reports
            .iter()
            .filter_map(|r| r.outcome.value().map(|v| (&r.subsystem, v)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&SubsystemId, &Error)> {
        self.reports
            .iter()
            .filter_map(|r| r.outcome.error().map(|e| (&r.subsystem, e)))
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Cancelled))
            .count()
    }

    /// Subsystems that were actually run (not skipped, not cancelled)
    pub fn invoked_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Ok(_) | Outcome::Failed(_)))
            .count()
    }

    /// Failure policy: fail when all-or-nothing was requested and anything
    /// failed, or when every invoked subsystem failed.
    pub fn check(&self, all_or_nothing: bool) -> Result<()> {
        let failed = self.failed_count();
        let invoked = self.invoked_count();
        if failed > 0 && (all_or_nothing || failed == invoked) {
            return Err(Error::PassFailed {
                operation: self.operation,
                failed,
                total: invoked,
            });
        }
        Ok(())
    }

    pub fn into_result(self, all_or_nothing: bool) -> Result<Self> {
        self.check(all_or_nothing)?;
        Ok(self)
    }

    /// Transform successful outcomes, keeping order and every other outcome
    pub fn map_ok<U>(self, mut f: impl FnMut(T) -> Outcome<U>) -> PassReport<U> {
        let reports = self
            .reports
            .into_iter()
            .map(|r| SubsystemReport {
                subsystem: r.subsystem,
                tier: r.tier,
                outcome: match r.outcome {
                    Outcome::Ok(value) => f(value),
                    Outcome::Failed(e) => Outcome::Failed(e),
                    Outcome::Skipped(reason) => Outcome::Skipped(reason),
                    Outcome::Cancelled => Outcome::Cancelled,
                },
            })
            .collect();
        PassReport {
            operation: self.operation,
            reports,
        }
    }
}

impl<T: Flagged> PassReport<T> {
    pub fn total_conflicts(&self) -> usize {
        self.succeeded().map(|(_, v)| v.conflict_count()).sum()
    }

    /// 0 when everything succeeded or had nothing actionable, nonzero when
    /// anything failed or any conflict was reported
    pub fn exit_code(&self) -> i32 {
        let item_failures: usize = self.succeeded().map(|(_, v)| v.failure_count()).sum();
        if self.failed_count() > 0 || self.cancelled_count() > 0 || item_failures > 0 {
            EXIT_FAILED
        } else if self.total_conflicts() > 0 {
            EXIT_CONFLICTS
        } else {
            EXIT_OK
        }
    }

    /// Categories of the subsystem failures, for advice output
    pub fn failure_categories(&self) -> Vec<ErrorCategory> {
        let mut categories: Vec<ErrorCategory> = Vec::new();
        for (_, e) in self.failed() {
            let category = e.category();
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        categories
    }
}

impl Flagged for DiffReport {
    fn conflict_count(&self) -> usize {
        self.conflicts().len()
    }
}

/// What sync does with one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Install,
    Reinstall,
    Remove,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Reinstall => "reinstall",
            Self::Remove => "remove",
        }
    }
}

/// One planned adapter mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAction {
    pub kind: ActionKind,
    pub id: ItemId,
    /// The declared item, for installs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    /// Classification that produced the action
    pub change: crate::diff::Change,
}

/// Converge plan for one subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    /// Never acted on; listed with both fingerprints
    pub conflicts: Vec<DiffEntry>,
    /// Left alone because pruning was not requested
    pub untracked: Vec<ItemId>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Flagged for SyncPlan {
    fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// An action that failed after retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub kind: ActionKind,
    pub id: ItemId,
    pub error: String,
}

/// Result of syncing one subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub plan: SyncPlan,
    pub dry_run: bool,
    pub applied: Vec<ItemId>,
    pub failures: Vec<ActionFailure>,
    /// Baseline re-anchored after every action succeeded
    pub rebaselined: bool,
}

impl SyncReport {
    /// A plan reported without touching the system
    pub fn unapplied(plan: SyncPlan, dry_run: bool) -> Self {
        Self {
            plan,
            dry_run,
            applied: Vec::new(),
            failures: Vec::new(),
            rebaselined: false,
        }
    }
}

impl Flagged for SyncReport {
    fn conflict_count(&self) -> usize {
        self.plan.conflicts.len()
    }

    fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Result of capturing one subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    /// Items now declared and baselined
    pub captured: usize,
    /// Items the manifest section held before
    pub replaced: usize,
}

impl Flagged for CaptureReport {}

/// Result of re-anchoring one subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaselineReport {
    pub items: usize,
    /// Whether the stored baseline differed and was rewritten
    pub changed: bool,
    /// Atomic only: taken from the pending image layer
    pub from_staged: bool,
}

impl Flagged for BaselineReport {}

/// Result of `add` or `remove` on a single item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub subsystem: SubsystemId,
    pub item: ItemId,
    pub operation: Operation,
    /// `Immediate` when the adapter was called, `Deferred` otherwise
    pub legality: Legality,
    /// Whether the manifest section changed
    pub manifest_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<Outcome<CaptureReport>>) -> PassReport<CaptureReport> {
        let mut pass = PassReport::new(Operation::Capture);
        for (i, outcome) in outcomes.into_iter().enumerate() {
            pass.reports.push(SubsystemReport {
                subsystem: SubsystemId::new(format!("s{i}")),
                tier: SubsystemTier::Convergent,
                outcome,
            });
        }
        pass
    }

    fn ok() -> Outcome<CaptureReport> {
        Outcome::Ok(CaptureReport {
            captured: 1,
            replaced: 0,
        })
    }

    fn failed() -> Outcome<CaptureReport> {
        Outcome::Failed(Error::unavailable("mock", "gone"))
    }

    #[test]
    fn test_partial_failure_is_tolerated() {
        let pass = report(vec![ok(), failed(), ok()]);
        assert!(pass.check(false).is_ok());
        assert!(pass.check(true).is_err());
        assert_eq!(pass.exit_code(), EXIT_FAILED);
    }

    #[test]
    fn test_all_invoked_failed() {
        let pass = report(vec![failed(), Outcome::Skipped("declined".into())]);
        let err = pass.check(false).unwrap_err();
        assert!(matches!(
            err,
            Error::PassFailed {
                failed: 1,
                total: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_clean_pass_exits_zero() {
        let pass = report(vec![ok(), ok()]);
        assert_eq!(pass.exit_code(), EXIT_OK);
        assert!(pass.into_result(true).is_ok());
    }

    #[test]
    fn test_cancelled_outcome_from_error() {
        let outcome: Outcome<()> = Outcome::from_result(Err(Error::Cancelled));
        assert!(matches!(outcome, Outcome::Cancelled));
        assert_eq!(outcome.status(), "cancelled");
    }

    #[test]
    fn test_failure_categories_are_deduplicated() {
        let pass = report(vec![failed(), failed(), ok()]);
        assert_eq!(pass.failure_categories(), vec![ErrorCategory::Unavailable]);
    }
}
