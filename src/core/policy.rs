//! Allocation policies and schedule construction.
//!
//! A policy maps an ordered list of eligible consumers and a unit capacity
//! to one share per consumer. Policies are pure: identical inputs always
//! produce identical shares. [`build_schedule`] turns shares into
//! contiguous entries for a window and checks the partition invariants
//! before anything is handed to a store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::registry::{Consumer, RegistryGeneration};
use crate::core::schedule::{AllocationEntry, AllocationStatus, PolicyDescriptor, Schedule};
use crate::core::window::CapacityWindow;
use crate::core::SchedulerError;
use crate::util::serde::ConsumerId;

/// Tunables passed to every policy invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyParams {
    /// Floor allocation per eligible consumer when capacity allows.
    pub min_guarantee: u64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self { min_guarantee: 40 }
    }
}

/// Units assigned to one eligible consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    /// Recipient.
    pub consumer_id: ConsumerId,
    /// Units assigned.
    pub units: u64,
    /// Capacity ran out before the minimum guarantee was reached.
    pub under_allocated: bool,
}

/// Output of a policy run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allocation {
    /// One share per eligible consumer, in input order.
    pub shares: Vec<Share>,
    /// Name of the policy actually applied, when it differs from the invoked one.
    pub fallback: Option<&'static str>,
}

/// Pluggable allocation strategy.
pub trait AllocationPolicy: Send + Sync {
    /// Stable policy name recorded on schedules.
    fn name(&self) -> &'static str;

    /// Partition `capacity` across `eligible`, which arrives in processing order.
    fn allocate(&self, eligible: &[Consumer], capacity: u64, params: &PolicyParams) -> Allocation;
}

/// Built-in policy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Shares proportional to stake.
    #[default]
    StakeProportional,
    /// Equal shares regardless of stake.
    Equal,
}

impl PolicyKind {
    /// Instantiate the selected policy.
    pub fn build(self) -> Box<dyn AllocationPolicy> {
        match self {
            Self::StakeProportional => Box::new(StakeProportional),
            Self::Equal => Box::new(EqualDistribution),
        }
    }
}

/// Hand out `wants` in order while capacity remains, then give any leftover
/// to the last consumer.
fn settle(eligible: &[Consumer], wants: &[u64], capacity: u64, min_guarantee: u64) -> Vec<Share> {
    let mut remaining = capacity;
    let mut shares: Vec<Share> = eligible
        .iter()
        .zip(wants)
        .map(|(consumer, &want)| {
            let units = want.min(remaining);
            remaining -= units;
            Share {
                consumer_id: consumer.id.clone(),
                units,
                under_allocated: units < min_guarantee,
            }
        })
        .collect();

    if remaining > 0 {
        if let Some(last) = shares.last_mut() {
            last.units += remaining;
            last.under_allocated = last.units < min_guarantee;
        }
    }
    shares
}

/// Stake-proportional allocation with a per-consumer minimum guarantee.
///
/// Each consumer wants `max(floor(C * stake / total), M)`; wants are served
/// in processing order until capacity runs out, and rounding leftovers go
/// to the last (lowest-stake) consumer. When every eligible stake is the
/// same, including all zero, the split is delegated to
/// [`EqualDistribution`] so both policies agree on uniform input.
#[derive(Debug, Clone, Copy, Default)]
pub struct StakeProportional;

impl AllocationPolicy for StakeProportional {
    fn name(&self) -> &'static str {
        "stake_proportional"
    }

    fn allocate(&self, eligible: &[Consumer], capacity: u64, params: &PolicyParams) -> Allocation {
        let Some(first) = eligible.first() else {
            return Allocation::default();
        };

        let total: f64 = eligible.iter().map(|c| c.stake).sum();
        let uniform = eligible
            .iter()
            .all(|c| c.stake.to_bits() == first.stake.to_bits());
        if total <= 0.0 || uniform {
            let mut allocation = EqualDistribution.allocate(eligible, capacity, params);
            allocation.fallback = Some(EqualDistribution.name());
            return allocation;
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let wants: Vec<u64> = eligible
            .iter()
            .map(|c| {
                let raw = ((capacity as f64) * c.stake / total).floor() as u64;
                raw.max(params.min_guarantee)
            })
            .collect();

        Allocation {
            shares: settle(eligible, &wants, capacity, params.min_guarantee),
            fallback: None,
        }
    }
}

/// Equal split: `floor(C / N)` each, remainder one unit apiece to the first
/// consumers, never below the minimum guarantee while capacity lasts.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualDistribution;

impl AllocationPolicy for EqualDistribution {
    fn name(&self) -> &'static str {
        "equal"
    }

    fn allocate(&self, eligible: &[Consumer], capacity: u64, params: &PolicyParams) -> Allocation {
        if eligible.is_empty() {
            return Allocation::default();
        }
        let n = eligible.len() as u64;
        let base = capacity / n;
        let remainder = capacity % n;
        let wants: Vec<u64> = (0..n)
            .map(|i| (base + u64::from(i < remainder)).max(params.min_guarantee))
            .collect();

        Allocation {
            shares: settle(eligible, &wants, capacity, params.min_guarantee),
            fallback: None,
        }
    }
}

/// Run `policy` over a registry generation and materialize the schedule.
///
/// Ineligible consumers are listed with zero units so the schedule stays
/// interpretable for audit. Returns [`SchedulerError::PolicyViolation`] if
/// the policy output does not exactly partition the window.
pub fn build_schedule(
    policy: &dyn AllocationPolicy,
    window: CapacityWindow,
    generation: &RegistryGeneration,
    computed_at_ms: u128,
) -> Result<Schedule, SchedulerError> {
    let eligible: Vec<Consumer> = generation.eligible().cloned().collect();
    let params = PolicyParams {
        min_guarantee: window.min_guarantee,
    };
    let allocation = policy.allocate(&eligible, window.capacity, &params);

    if allocation.shares.len() != eligible.len() {
        return Err(SchedulerError::PolicyViolation(format!(
            "policy `{}` returned {} shares for {} eligible consumers",
            policy.name(),
            allocation.shares.len(),
            eligible.len()
        )));
    }
    let mut by_id: HashMap<&ConsumerId, &Share> = HashMap::with_capacity(allocation.shares.len());
    for (share, consumer) in allocation.shares.iter().zip(&eligible) {
        if share.consumer_id != consumer.id {
            return Err(SchedulerError::PolicyViolation(format!(
                "policy `{}` reordered consumers: expected `{}`, got `{}`",
                policy.name(),
                consumer.id,
                share.consumer_id
            )));
        }
        by_id.insert(&share.consumer_id, share);
    }

    let mut cursor = 0u64;
    let mut short = Vec::new();
    let mut entries = Vec::with_capacity(generation.consumers.len());
    for consumer in &generation.consumers {
        let (units, under_allocated) = by_id
            .get(&consumer.id)
            .map_or((0, false), |s| (s.units, s.under_allocated));
        if under_allocated {
            short.push(consumer.id.clone());
        }
        entries.push(AllocationEntry {
            consumer_id: consumer.id.clone(),
            stake: consumer.stake,
            eligible: consumer.eligible,
            start_offset: cursor,
            units,
            under_allocated,
        });
        cursor += units;
    }

    let status = if eligible.is_empty() {
        AllocationStatus::Degenerate
    } else if short.is_empty() {
        AllocationStatus::Complete
    } else {
        AllocationStatus::UnderAllocated(short)
    };

    let schedule = Schedule {
        window,
        entries,
        policy: PolicyDescriptor {
            name: policy.name().to_string(),
            min_guarantee: window.min_guarantee,
            fallback: allocation.fallback.map(str::to_string),
        },
        status,
        registry_generation: generation.generation,
        computed_at_ms,
    };
    schedule.validate()?;
    Ok(schedule)
}
