//! Tier-gated legality of reconciliation verbs
//!
//! Legality is data, not behavior: one row per tier, one column per verb.
//! Subsystems never override it.

use crate::error::{Error, Result};
use crate::types::{Operation, SubsystemId, SubsystemTier};
use serde::{Deserialize, Serialize};

/// How a verb behaves on a given tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Legality {
    /// Runs now against the live system
    Immediate,
    /// Recorded in the manifest, realized by the next image build
    Deferred,
    /// Staged state compared against booted state
    TwoWay,
    /// Manifest, observed and baseline compared together
    ThreeWay,
    /// Rejected with `UnsupportedForTier`
    Unsupported,
}

impl Legality {
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

const fn column(op: Operation) -> usize {
    match op {
        Operation::Add => 0,
        Operation::Remove => 1,
        Operation::Sync => 2,
        Operation::Capture => 3,
        Operation::Staged => 4,
        Operation::Drift => 5,
        Operation::Baseline => 6,
    }
}

const fn row(tier: SubsystemTier) -> usize {
    match tier {
        SubsystemTier::Atomic => 0,
        SubsystemTier::Convergent => 1,
    }
}

use Legality::{Deferred, Immediate, ThreeWay, TwoWay, Unsupported};

#[rustfmt::skip]
const TABLE: [[Legality; 7]; 2] = [
    //  add        remove     sync         capture    staged    drift        baseline
    [Deferred,  Deferred,  Unsupported, Immediate, TwoWay,   Unsupported, Immediate], // atomic
    [Immediate, Immediate, Immediate,   Immediate, ThreeWay, Immediate,   Immediate], // convergent
];

/// Look up how `op` behaves on `tier`
pub const fn legality(tier: SubsystemTier, op: Operation) -> Legality {
    TABLE[row(tier)][column(op)]
}

/// Fail with `UnsupportedForTier` unless `op` is legal on `tier`
pub fn ensure_supported(
    subsystem: &SubsystemId,
    tier: SubsystemTier,
    op: Operation,
) -> Result<Legality> {
    let legality = legality(tier, op);
    if legality.is_supported() {
        Ok(legality)
    } else {
        Err(Error::UnsupportedForTier {
            subsystem: subsystem.clone(),
            tier,
            operation: op,
        })
    }
}
