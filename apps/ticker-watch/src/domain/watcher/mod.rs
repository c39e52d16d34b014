//! Watcher Lifecycle States
//!
//! Each watcher instance moves linearly through
//! `Starting -> Running -> Stopping -> Absent`. A restart creates a new
//! instance rather than rewinding an old one.

use std::fmt;

use serde::Serialize;

use crate::domain::ticker::TickerSymbol;

/// Lifecycle state of a single watcher instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    /// No watcher exists (or the instance has fully released its resources).
    #[default]
    Absent,
    /// Slot claimed, page being opened and validated.
    Starting,
    /// Page validated, polling loop active.
    Running,
    /// Stop requested; the loop releases resources at its next iteration boundary.
    Stopping,
}

impl WatcherState {
    /// Whether this instance counts as a live watcher (Starting or Running).
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether moving from `self` to `next` follows the linear lifecycle.
    ///
    /// `Starting -> Stopping` is allowed for a stop that arrives before the
    /// page is validated, and `Starting -> Absent` for a rejected start.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Absent, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopping | Self::Absent)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Absent)
        )
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    /// Watched ticker.
    pub ticker: TickerSymbol,
    /// Current lifecycle state.
    pub state: WatcherState,
    /// Instance generation (increases with every start).
    pub generation: u64,
}

/// Counts of watchers per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatcherCounts {
    /// Watchers opening or validating their page.
    pub starting: usize,
    /// Watchers actively polling.
    pub running: usize,
    /// Watchers waiting to release their page.
    pub stopping: usize,
}

impl WatcherCounts {
    /// Tally a set of statuses.
    #[must_use]
    pub fn from_statuses(statuses: &[WatcherStatus]) -> Self {
        statuses
            .iter()
            .fold(Self::default(), |mut counts, status| {
                match status.state {
                    WatcherState::Starting => counts.starting += 1,
                    WatcherState::Running => counts.running += 1,
                    WatcherState::Stopping => counts.stopping += 1,
                    WatcherState::Absent => {}
                }
                counts
            })
    }

    /// Watchers that hold (or are acquiring) a page.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.starting + self.running
    }
}
