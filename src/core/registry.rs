//! Consumer registry: the current generation of known consumers and their stake.
//!
//! A generation is immutable once published. `refresh` builds the next
//! generation off to the side and swaps it in with a single pointer store,
//! so readers see either the old set or the new set, never a mix.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::audit::{build_audit_event, emit, AuditKind, SharedAuditSink};
use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::serde::ConsumerId;

/// An allocation recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    /// Stable identity.
    pub id: ConsumerId,
    /// Stake weight, non-negative.
    pub stake: f64,
    /// Ineligible consumers receive zero units but stay visible.
    pub eligible: bool,
}

impl Consumer {
    /// Create an eligible consumer.
    pub fn new(id: impl Into<ConsumerId>, stake: f64) -> Self {
        Self {
            id: id.into(),
            stake,
            eligible: true,
        }
    }

    /// Create an ineligible consumer.
    pub fn ineligible(id: impl Into<ConsumerId>, stake: f64) -> Self {
        Self {
            id: id.into(),
            stake,
            eligible: false,
        }
    }
}

/// How consumers with identical stake are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lexicographically smaller identity first.
    #[default]
    IdentityAscending,
    /// Lexicographically larger identity first.
    IdentityDescending,
}

/// Sort consumers by descending stake, breaking ties by identity.
pub fn sort_consumers(consumers: &mut [Consumer], tie_break: TieBreak) {
    consumers.sort_by(|a, b| {
        b.stake.total_cmp(&a.stake).then_with(|| match tie_break {
            TieBreak::IdentityAscending => a.id.cmp(&b.id),
            TieBreak::IdentityDescending => b.id.cmp(&a.id),
        })
    });
}

/// Source of stake figures (chain or metagraph collaborator).
#[async_trait]
pub trait StakeSource: Send + Sync {
    /// Fetch the full consumer set. Partial results must be reported as errors.
    async fn fetch_consumers(&self) -> Result<Vec<Consumer>, SchedulerError>;
}

/// One immutable published consumer set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryGeneration {
    /// Monotonic generation number, 0 for the empty initial set.
    pub generation: u64,
    /// All consumers, eligible or not, in processing order.
    pub consumers: Vec<Consumer>,
    /// When this generation was published.
    pub refreshed_at_ms: u128,
}

impl RegistryGeneration {
    fn empty() -> Self {
        Self {
            generation: 0,
            consumers: Vec::new(),
            refreshed_at_ms: 0,
        }
    }

    /// Eligible consumers in processing order.
    pub fn eligible(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.iter().filter(|c| c.eligible)
    }

    /// Eligible set and stakes, used to decide whether a change is material.
    fn eligible_fingerprint(&self) -> Vec<(&ConsumerId, u64)> {
        self.eligible().map(|c| (&c.id, c.stake.to_bits())).collect()
    }
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Generation number now published.
    pub generation: u64,
    /// Whether the eligible set or any eligible stake changed.
    pub material_change: bool,
}

/// Holds the current consumer generation.
pub struct ConsumerRegistry {
    current: ArcSwap<RegistryGeneration>,
    tie_break: TieBreak,
    audit: Option<SharedAuditSink>,
}

impl ConsumerRegistry {
    /// Create an empty registry.
    pub fn new(tie_break: TieBreak) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistryGeneration::empty()),
            tie_break,
            audit: None,
        }
    }

    /// Attach an audit sink that receives superseded generations.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Ordering used for ties.
    pub const fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Immutable view of the current generation.
    pub fn snapshot(&self) -> Arc<RegistryGeneration> {
        self.current.load_full()
    }

    /// Eligible consumers, descending stake, ties by identity.
    pub fn list_eligible_consumers(&self) -> Vec<Consumer> {
        self.current.load().eligible().cloned().collect()
    }

    /// Every known consumer, including ineligible ones kept for audit.
    pub fn list_consumers(&self) -> Vec<Consumer> {
        self.current.load().consumers.clone()
    }

    /// Pull a full consumer set from `source` and publish it.
    ///
    /// On failure the current generation is untouched and nothing is
    /// emitted to the audit feed.
    pub async fn refresh(&self, source: &dyn StakeSource) -> Result<RefreshOutcome, SchedulerError> {
        let fetched = source.fetch_consumers().await?;
        self.replace(fetched)
    }

    /// Validate and publish `incoming` as the next generation.
    ///
    /// Consumers known to the previous generation but absent from
    /// `incoming` are carried forward as ineligible.
    pub fn replace(&self, incoming: Vec<Consumer>) -> Result<RefreshOutcome, SchedulerError> {
        validate_feed(&incoming)?;

        let previous = self.current.load_full();
        let mut merged: BTreeMap<ConsumerId, Consumer> = previous
            .consumers
            .iter()
            .map(|c| {
                (
                    c.id.clone(),
                    Consumer {
                        eligible: false,
                        ..c.clone()
                    },
                )
            })
            .collect();
        for consumer in incoming {
            merged.insert(consumer.id.clone(), consumer);
        }
        let mut consumers: Vec<Consumer> = merged.into_values().collect();
        sort_consumers(&mut consumers, self.tie_break);

        let next = Arc::new(RegistryGeneration {
            generation: previous.generation + 1,
            consumers,
            refreshed_at_ms: now_ms(),
        });
        let material_change = previous.eligible_fingerprint() != next.eligible_fingerprint();
        let generation = next.generation;

        let superseded = self.current.swap(next);
        tracing::debug!(
            generation,
            material_change,
            "consumer registry generation published"
        );
        if superseded.generation > 0 {
            let payload = serde_json::to_string(&superseded.consumers).ok();
            emit(
                self.audit.as_ref(),
                build_audit_event(
                    AuditKind::RegistrySuperseded,
                    None,
                    Some(superseded.generation),
                    payload,
                ),
            );
        }

        Ok(RefreshOutcome {
            generation,
            material_change,
        })
    }
}

fn validate_feed(incoming: &[Consumer]) -> Result<(), SchedulerError> {
    let mut seen = HashSet::with_capacity(incoming.len());
    for consumer in incoming {
        if !consumer.stake.is_finite() || consumer.stake < 0.0 {
            return Err(SchedulerError::RegistryRefresh(format!(
                "consumer `{}` has invalid stake {}",
                consumer.id, consumer.stake
            )));
        }
        if !seen.insert(&consumer.id) {
            return Err(SchedulerError::RegistryRefresh(format!(
                "duplicate consumer `{}` in stake feed",
                consumer.id
            )));
        }
    }
    Ok(())
}
