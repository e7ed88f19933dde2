//! Diff computation: two-way (staged vs booted), three-way (baseline,
//! manifest, observed), and drift (manifest vs observed, annotated by
//! baseline).
//!
//! Every function here is a pure read over immutable snapshots. Each id in
//! the union of the compared collections gets exactly one [`Change`].

use crate::types::{ItemId, ItemSet, SubsystemId, SubsystemTier, fingerprints_agree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Id → fingerprint view of one side of a comparison
pub type View<'a> = BTreeMap<&'a str, Option<&'a str>>;

/// Classification of one item id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Change {
    /// Declared (or staged) but not present
    Added,
    /// Expected but gone from the compared side
    Removed,
    /// Dropped from the manifest, still running as baselined
    PendingRemoval,
    /// Same id, different fingerprint
    Modified,
    /// Manifest moved away from the baseline, runtime did not
    PendingChange,
    /// Runtime moved away from the baseline, manifest did not
    Drifted,
    /// Present at runtime, never declared, never baselined
    Untracked,
    /// Manifest and runtime both moved, in different directions
    Conflict,
    /// Both sides agree
    Unchanged,
}

/// Coarse grouping of [`Change`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeGroup {
    Added,
    Removed,
    Modified,
    Unchanged,
    Conflict,
}

impl Change {
    pub fn group(&self) -> ChangeGroup {
        match self {
            Self::Added | Self::Untracked => ChangeGroup::Added,
            Self::Removed | Self::PendingRemoval => ChangeGroup::Removed,
            Self::Modified | Self::PendingChange | Self::Drifted => ChangeGroup::Modified,
            Self::Conflict => ChangeGroup::Conflict,
            Self::Unchanged => ChangeGroup::Unchanged,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::PendingRemoval => "pending-removal",
            Self::Modified => "modified",
            Self::PendingChange => "pending-change",
            Self::Drifted => "drifted",
            Self::Untracked => "untracked",
            Self::Conflict => "conflict",
            Self::Unchanged => "unchanged",
        }
    }

    /// Single-character marker for terminal output
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Added => "+",
            Self::Removed | Self::PendingRemoval => "-",
            Self::Modified | Self::PendingChange => "~",
            Self::Drifted => "≈",
            Self::Untracked => "?",
            Self::Conflict => "!",
            Self::Unchanged => "=",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the observed side relates to the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineRelation {
    /// Observed state is what was last baselined
    Matches,
    /// Observed state moved since the baseline
    Diverged,
    /// No baseline recorded for the subsystem
    Unanchored,
}

/// Presence of an item on one side, with its fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Side {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Side {
    fn from_view(view: &View<'_>, id: &str) -> Option<Self> {
        view.get(id).map(|fp| Self {
            fingerprint: fp.map(str::to_string),
        })
    }

    pub fn display(side: Option<&Self>) -> String {
        match side {
            None => "(absent)".to_string(),
            Some(Side { fingerprint: None }) => "(any)".to_string(),
            Some(Side {
                fingerprint: Some(fp),
            }) => fp.clone(),
        }
    }
}

/// One classified id with every fingerprint that took part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub id: ItemId,
    pub change: Change,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<BaselineRelation>,
}

/// Which comparison produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffMode {
    /// Staged image layer vs booted image
    StagedTwoWay,
    /// Manifest vs observed vs baseline
    StagedThreeWay,
    /// Manifest vs observed, annotated by baseline
    Drift,
}

/// Per-subsystem diff result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub subsystem: SubsystemId,
    pub tier: SubsystemTier,
    pub mode: DiffMode,
    /// Atomic subsystems only: whether a pending image layer exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_pending: Option<bool>,
    /// Sorted by id
    pub entries: Vec<DiffEntry>,
}

/// Count of entries per group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub conflicts: usize,
}

impl DiffSummary {
    /// Number of entries that are not unchanged
    pub fn actionable(&self) -> usize {
        self.added + self.removed + self.modified + self.conflicts
    }
}

impl DiffReport {
    pub fn entry(&self, id: &str) -> Option<&DiffEntry> {
        self.entries.iter().find(|e| e.id.as_str() == id)
    }

    /// Ids with exactly this classification
    pub fn ids(&self, change: Change) -> Vec<&ItemId> {
        self.entries
            .iter()
            .filter(|e| e.change == change)
            .map(|e| &e.id)
            .collect()
    }

    /// Ids whose classification falls into `group`
    pub fn group(&self, group: ChangeGroup) -> Vec<&ItemId> {
        self.entries
            .iter()
            .filter(|e| e.change.group() == group)
            .map(|e| &e.id)
            .collect()
    }

    pub fn added(&self) -> Vec<&ItemId> {
        self.ids(Change::Added)
    }

    pub fn removed(&self) -> Vec<&ItemId> {
        self.ids(Change::Removed)
    }

    pub fn modified(&self) -> Vec<&ItemId> {
        self.ids(Change::Modified)
    }

    pub fn unchanged(&self) -> Vec<&ItemId> {
        self.ids(Change::Unchanged)
    }

    pub fn conflicts(&self) -> Vec<&ItemId> {
        self.ids(Change::Conflict)
    }

    pub fn untracked(&self) -> Vec<&ItemId> {
        self.ids(Change::Untracked)
    }

    pub fn pending_change(&self) -> Vec<&ItemId> {
        self.ids(Change::PendingChange)
    }

    pub fn pending_removal(&self) -> Vec<&ItemId> {
        self.ids(Change::PendingRemoval)
    }

    /// Ids whose runtime state moved away from the baseline on its own
    pub fn drifted(&self) -> Vec<&ItemId> {
        self.entries
            .iter()
            .filter(|e| {
                e.change == Change::Drifted
                    || (e.change.is_actionable()
                        && e.change != Change::Conflict
                        && e.relation == Some(BaselineRelation::Diverged))
            })
            .map(|e| &e.id)
            .collect()
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.change == Change::Conflict)
    }

    /// No entry needs attention
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| !e.change.is_actionable())
    }

    pub fn actionable(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(|e| e.change.is_actionable())
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for entry in &self.entries {
            match entry.change.group() {
                ChangeGroup::Added => summary.added += 1,
                ChangeGroup::Removed => summary.removed += 1,
                ChangeGroup::Modified => summary.modified += 1,
                ChangeGroup::Unchanged => summary.unchanged += 1,
                ChangeGroup::Conflict => summary.conflicts += 1,
            }
        }
        summary
    }
}

fn union<'a>(views: &[&View<'a>]) -> BTreeSet<&'a str> {
    views.iter().flat_map(|v| v.keys().copied()).collect()
}

fn empty_entry(id: &str, change: Change) -> DiffEntry {
    DiffEntry {
        id: ItemId::from(id),
        change,
        manifest: None,
        observed: None,
        baseline: None,
        staged: None,
        relation: None,
    }
}

/// Classify an id in a three-way comparison.
///
/// Each argument is `None` when the id is absent from that side, otherwise
/// the side's fingerprint. When an id could fall into two classes it is a
/// conflict.
pub fn classify_three_way(
    baseline: Option<Option<&str>>,
    manifest: Option<Option<&str>>,
    observed: Option<Option<&str>>,
) -> Change {
    match (baseline, manifest, observed) {
        (None, None, None) => Change::Unchanged,
        (None, Some(_), None) => Change::Added,
        (None, None, Some(_)) => Change::Untracked,
        (None, Some(m), Some(o)) => {
            if fingerprints_agree(m, o) {
                Change::Unchanged
            } else {
                Change::Conflict
            }
        }
        (Some(_), None, None) => Change::Removed,
        (Some(b), Some(m), None) => {
            if fingerprints_agree(m, b) {
                Change::Removed
            } else {
                Change::Conflict
            }
        }
        (Some(b), None, Some(o)) => {
            if fingerprints_agree(o, b) {
                Change::PendingRemoval
            } else {
                Change::Conflict
            }
        }
        (Some(b), Some(m), Some(o)) => {
            if fingerprints_agree(m, o) {
                return Change::Unchanged;
            }
            match (fingerprints_agree(m, b), fingerprints_agree(o, b)) {
                (true, false) => Change::Drifted,
                (false, true) => Change::PendingChange,
                _ => Change::Conflict,
            }
        }
    }
}

/// Staged image layer vs booted image
pub fn two_way(staged: &View<'_>, booted: &View<'_>) -> Vec<DiffEntry> {
    union(&[staged, booted])
        .into_iter()
        .map(|id| {
            let s = staged.get(id).copied();
            let o = booted.get(id).copied();
            let change = match (s, o) {
                (Some(_), None) => Change::Added,
                (None, Some(_)) => Change::Removed,
                (Some(s), Some(o)) if fingerprints_agree(s, o) => Change::Unchanged,
                (Some(_), Some(_)) => Change::Modified,
                (None, None) => Change::Unchanged,
            };
            DiffEntry {
                staged: Side::from_view(staged, id),
                observed: Side::from_view(booted, id),
                ..empty_entry(id, change)
            }
        })
        .collect()
}

/// Manifest vs observed vs baseline
pub fn three_way(
    baseline: &View<'_>,
    manifest: &View<'_>,
    observed: &View<'_>,
) -> Vec<DiffEntry> {
    union(&[baseline, manifest, observed])
        .into_iter()
        .map(|id| {
            let change = classify_three_way(
                baseline.get(id).copied(),
                manifest.get(id).copied(),
                observed.get(id).copied(),
            );
            DiffEntry {
                manifest: Side::from_view(manifest, id),
                observed: Side::from_view(observed, id),
                baseline: Side::from_view(baseline, id),
                ..empty_entry(id, change)
            }
        })
        .collect()
}

fn relation_to_baseline(baseline: Option<&View<'_>>, id: &str, observed: &View<'_>) -> BaselineRelation {
    let Some(baseline) = baseline else {
        return BaselineRelation::Unanchored;
    };
    let same = match (baseline.get(id), observed.get(id)) {
        (None, None) => true,
        (Some(b), Some(o)) => fingerprints_agree(*b, *o),
        _ => false,
    };
    if same {
        BaselineRelation::Matches
    } else {
        BaselineRelation::Diverged
    }
}

/// Manifest vs observed, annotated with whether the runtime side left the
/// baseline. `baseline` is `None` when the subsystem was never baselined.
pub fn drift(
    baseline: Option<&View<'_>>,
    manifest: &View<'_>,
    observed: &View<'_>,
) -> Vec<DiffEntry> {
    union(&[manifest, observed])
        .into_iter()
        .map(|id| {
            let relation = relation_to_baseline(baseline, id, observed);
            let b = baseline.and_then(|v| v.get(id).copied());
            let change = match (manifest.get(id).copied(), observed.get(id).copied()) {
                (Some(_), None) => Change::Added,
                (None, Some(_)) => Change::Untracked,
                (Some(m), Some(o)) if fingerprints_agree(m, o) => Change::Unchanged,
                (Some(m), Some(_)) => match (relation, b) {
                    (BaselineRelation::Diverged, Some(b)) if fingerprints_agree(m, b) => {
                        Change::Drifted
                    }
                    (BaselineRelation::Diverged, _) => Change::Conflict,
                    _ => Change::Modified,
                },
                (None, None) => Change::Unchanged,
            };
            DiffEntry {
                manifest: Side::from_view(manifest, id),
                observed: Side::from_view(observed, id),
                baseline: baseline.and_then(|v| Side::from_view(v, id)),
                relation: Some(relation),
                ..empty_entry(id, change)
            }
        })
        .collect()
}

/// Convenience: three-way diff over item sets
pub fn three_way_sets(baseline: &ItemSet, manifest: &ItemSet, observed: &ItemSet) -> Vec<DiffEntry> {
    three_way(
        &baseline.fingerprints(),
        &manifest.fingerprints(),
        &observed.fingerprints(),
    )
}
