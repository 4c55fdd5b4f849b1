//! Skip gates
//!
//! Checked before a unit executes, in order: the group gate, then the unit
//! gate. Both read finalized records only.

use std::fmt;

use super::aggregator::RunResults;
use crate::models::GroupDefinition;

/// Why a unit is recorded `SKIPPED` without running
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// A group listed in `skipIfGroupFailed` recorded a `FAILED` unit
    GroupFailed(String),
    /// A unit listed in `skipIfUnitFailed` recorded `FAILED`
    UnitFailed(String),
    Cancelled,
}

impl SkipReason {
    /// Result message of the skipped unit
    pub fn message(&self) -> String {
        match self {
            SkipReason::GroupFailed(_) => String::new(),
            SkipReason::UnitFailed(id) => format!("skipped: unit {id} failed"),
            SkipReason::Cancelled => "run cancelled".to_string(),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::GroupFailed(group) => write!(f, "group {group} has failed units"),
            SkipReason::UnitFailed(id) => write!(f, "unit {id} failed"),
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Evaluate both gates for a unit of `group`
pub fn evaluate(group: &GroupDefinition, results: &RunResults) -> Option<SkipReason> {
    if let Some(failed) = group
        .skip_if_group_failed
        .iter()
        .find(|name| results.group_failed(name))
    {
        return Some(SkipReason::GroupFailed(failed.clone()));
    }

    group
        .skip_if_unit_failed
        .iter()
        .find(|id| results.unit_failed(id))
        .map(|id| SkipReason::UnitFailed(id.clone()))
}
