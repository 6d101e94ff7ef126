//! Assemble an [`AllocationScheduler`] from a [`SchedulerConfig`].

use std::sync::Arc;

use crate::config::{SchedulerConfig, StoreBackendConfig};
use crate::core::{
    AllocationPolicy, AllocationScheduler, BlockSource, ConsumerRegistry, ScheduleStore,
    SchedulerError, SharedAuditSink, StakeSource,
};
use crate::infra::{FileScheduleStore, InMemoryScheduleStore};

/// Build the store backend selected in `cfg`.
pub fn build_store(cfg: &SchedulerConfig) -> Result<Arc<dyn ScheduleStore>, SchedulerError> {
    let store: Arc<dyn ScheduleStore> = match &cfg.store {
        StoreBackendConfig::InMemory => {
            Arc::new(InMemoryScheduleStore::new(cfg.schedule_ttl(), cfg.max_history))
        }
        StoreBackendConfig::File { path } => Arc::new(FileScheduleStore::open(
            path,
            cfg.schedule_ttl(),
            cfg.max_history,
        )?),
    };
    Ok(store)
}

/// Builder wiring config, store, registry, audit, and policy together.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn ScheduleStore>>,
    policy: Option<Box<dyn AllocationPolicy>>,
    audit: Option<SharedAuditSink>,
}

impl SchedulerBuilder {
    /// Start from a configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            store: None,
            policy: None,
            audit: None,
        }
    }

    /// Configuration being built from.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Use an existing store instead of the configured backend.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom policy instead of the configured one.
    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn AllocationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Send audit events to `audit` from both the registry and the loop.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate the configuration and assemble the scheduler.
    pub fn build(
        self,
        stakes: Arc<dyn StakeSource>,
        blocks: Arc<dyn BlockSource>,
    ) -> Result<AllocationScheduler, SchedulerError> {
        self.config.validate().map_err(SchedulerError::Config)?;

        let store = match self.store {
            Some(store) => store,
            None => build_store(&self.config)?,
        };

        let mut registry = ConsumerRegistry::new(self.config.tie_break);
        if let Some(audit) = &self.audit {
            registry = registry.with_audit(Arc::clone(audit));
        }

        let mut scheduler =
            AllocationScheduler::new(self.config, Arc::new(registry), store, stakes, blocks)?;
        if let Some(policy) = self.policy {
            scheduler = scheduler.with_policy(policy);
        }
        if let Some(audit) = self.audit {
            scheduler = scheduler.with_audit(audit);
        }
        Ok(scheduler)
    }
}
