//! Schedule records: the materialized partition of one window's capacity.

use serde::{Deserialize, Serialize};

use crate::core::window::CapacityWindow;
use crate::core::SchedulerError;
use crate::util::serde::{ConsumerId, WindowKey};

/// One consumer's slice of a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// Recipient identity.
    pub consumer_id: ConsumerId,
    /// Stake weight the allocation was computed from.
    pub stake: f64,
    /// Eligibility at computation time; ineligible entries carry zero units.
    pub eligible: bool,
    /// Offset of the first unit, relative to the window start.
    pub start_offset: u64,
    /// Number of units assigned.
    pub units: u64,
    /// Set when the minimum guarantee could not be honored for this consumer.
    pub under_allocated: bool,
}

impl AllocationEntry {
    /// Offset one past the last unit.
    pub const fn end_offset(&self) -> u64 {
        self.start_offset + self.units
    }
}

/// Overall allocation status of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "consumers")]
pub enum AllocationStatus {
    /// Every eligible consumer received at least the minimum guarantee.
    Complete,
    /// Capacity ran out before these consumers reached the minimum.
    UnderAllocated(Vec<ConsumerId>),
    /// No eligible consumers; the window's capacity is unused.
    Degenerate,
}

/// Policy name and parameters a schedule was produced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    /// Policy name, e.g. `stake_proportional`.
    pub name: String,
    /// Minimum guarantee in effect.
    pub min_guarantee: u64,
    /// Policy actually applied when the named policy delegated elsewhere.
    pub fallback: Option<String>,
}

/// Ordered allocation entries for exactly one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// The window this schedule partitions.
    pub window: CapacityWindow,
    /// Entries in processing order; contiguous from offset 0.
    pub entries: Vec<AllocationEntry>,
    /// How the entries were produced.
    pub policy: PolicyDescriptor,
    /// Whether minimum guarantees were met.
    pub status: AllocationStatus,
    /// Registry generation the consumers were read from.
    pub registry_generation: u64,
    /// Computation timestamp in milliseconds.
    pub computed_at_ms: u128,
}

impl Schedule {
    /// Key this schedule is stored under.
    pub const fn key(&self) -> WindowKey {
        self.window.start
    }

    /// Sum of allocated units.
    pub fn allocated_units(&self) -> u64 {
        self.entries.iter().map(|e| e.units).sum()
    }

    /// Entry for a consumer, if present.
    pub fn entry_for(&self, id: &ConsumerId) -> Option<&AllocationEntry> {
        self.entries.iter().find(|e| &e.consumer_id == id)
    }

    /// Consumer owning unit `offset` of the window.
    pub fn owner_of(&self, offset: u64) -> Option<&ConsumerId> {
        self.entries
            .iter()
            .find(|e| e.units > 0 && offset >= e.start_offset && offset < e.end_offset())
            .map(|e| &e.consumer_id)
    }

    /// Equal to `other` in everything except the computation timestamp.
    pub fn same_allocation(&self, other: &Self) -> bool {
        self.window == other.window
            && self.entries == other.entries
            && self.policy == other.policy
            && self.status == other.status
    }

    /// Check the partition invariants.
    ///
    /// Entries must be contiguous from offset 0, ineligible entries must be
    /// empty, and units must sum to the window capacity unless the window is
    /// degenerate (in which case they sum to 0).
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let mut cursor = 0u64;
        let mut seen = std::collections::HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(&entry.consumer_id) {
                return Err(SchedulerError::PolicyViolation(format!(
                    "consumer `{}` appears twice in window {}",
                    entry.consumer_id, self.window.start
                )));
            }
            if entry.start_offset != cursor {
                return Err(SchedulerError::PolicyViolation(format!(
                    "entry for `{}` starts at {} but previous entry ended at {cursor}",
                    entry.consumer_id, entry.start_offset
                )));
            }
            if !entry.eligible && entry.units > 0 {
                return Err(SchedulerError::PolicyViolation(format!(
                    "ineligible consumer `{}` was allocated {} units",
                    entry.consumer_id, entry.units
                )));
            }
            cursor = entry
                .start_offset
                .checked_add(entry.units)
                .ok_or_else(|| SchedulerError::PolicyViolation("unit offset overflow".into()))?;
        }

        let expected = match self.status {
            AllocationStatus::Degenerate => 0,
            _ => self.window.capacity,
        };
        if cursor != expected {
            return Err(SchedulerError::PolicyViolation(format!(
                "entries sum to {cursor} units, window {} expects {expected}",
                self.window.start
            )));
        }
        Ok(())
    }
}
