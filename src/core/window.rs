//! Window clock: maps block heights onto fixed-length capacity windows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::serde::WindowKey;

/// Source of the monotonically increasing block height.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Current block height.
    async fn current_block(&self) -> Result<u64, SchedulerError>;
}

/// A bounded span of capacity units over which one schedule is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapacityWindow {
    /// Block height at which the window starts; doubles as its key.
    pub start: WindowKey,
    /// Window length in blocks.
    pub length: u64,
    /// Total units to partition across consumers.
    pub capacity: u64,
    /// Units every eligible consumer should receive when capacity allows.
    pub min_guarantee: u64,
}

impl CapacityWindow {
    /// First block height after the window.
    pub const fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    /// Whether `height` falls inside the window.
    pub const fn contains(&self, height: u64) -> bool {
        height >= self.start && height < self.end()
    }

    /// Key under which the schedule for this window is stored.
    pub const fn key(&self) -> WindowKey {
        self.start
    }
}

/// Outcome of feeding a new height to [`WindowClock::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowTransition {
    /// A later window began. `skipped` counts whole windows never observed.
    Advanced {
        /// The window now in effect.
        window: CapacityWindow,
        /// Windows jumped over without being observed; never backfilled.
        skipped: u64,
    },
    /// Still inside the last observed window.
    Unchanged(CapacityWindow),
    /// The height moved backwards and was ignored.
    Regressed {
        /// Height that was reported.
        height: u64,
        /// Window still in effect.
        current: CapacityWindow,
    },
}

/// Derives window boundaries from block heights and a fixed tempo.
#[derive(Debug, Clone)]
pub struct WindowClock {
    length: u64,
    origin: u64,
    capacity: u64,
    min_guarantee: u64,
    last: Option<CapacityWindow>,
}

impl WindowClock {
    /// Create a clock with windows of `length` blocks aligned to `origin`.
    pub fn new(
        length: u64,
        origin: u64,
        capacity: u64,
        min_guarantee: u64,
    ) -> Result<Self, SchedulerError> {
        if length == 0 {
            return Err(SchedulerError::Config("window length must be greater than 0".into()));
        }
        Ok(Self {
            length,
            origin,
            capacity,
            min_guarantee,
            last: None,
        })
    }

    /// Window length in blocks.
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Zero-based index of the window containing `height`.
    ///
    /// Heights before the origin belong to window 0.
    pub const fn window_index(&self, height: u64) -> u64 {
        height.saturating_sub(self.origin) / self.length
    }

    /// The window containing `height`. Pure; ignores any observed state.
    pub const fn current_window(&self, height: u64) -> CapacityWindow {
        let start = self.origin + self.window_index(height) * self.length;
        CapacityWindow {
            start,
            length: self.length,
            capacity: self.capacity,
            min_guarantee: self.min_guarantee,
        }
    }

    /// First height of the window after the one containing `height`.
    pub const fn next_boundary(&self, height: u64) -> u64 {
        self.current_window(height).end()
    }

    /// Last window handed out by [`advance`](Self::advance).
    pub const fn last_window(&self) -> Option<CapacityWindow> {
        self.last
    }

    /// Observe `height` and report whether a new window began.
    ///
    /// Windows are only ever handed out in increasing order; a jump forward
    /// lands directly in the window containing `height`.
    pub fn advance(&mut self, height: u64) -> WindowTransition {
        let window = self.current_window(height);
        match self.last {
            None => {
                self.last = Some(window);
                WindowTransition::Advanced { window, skipped: 0 }
            }
            Some(last) if window.start > last.start => {
                let skipped = (window.start - last.start) / self.length - 1;
                self.last = Some(window);
                WindowTransition::Advanced { window, skipped }
            }
            Some(last) if window.start == last.start => WindowTransition::Unchanged(last),
            Some(last) => WindowTransition::Regressed {
                height,
                current: last,
            },
        }
    }
}
