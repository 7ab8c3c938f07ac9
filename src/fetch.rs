//! Ordering of overlapping list fetches.
//!
//! Screens re-fetch on every filter change and on every poll tick without
//! cancelling the previous call. Each fetch carries a per-resource sequence
//! number; the newest issued number wins and older ones are answered as stale
//! so the client drops them instead of overwriting newer data.

use std::collections::HashMap;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale { latest: u64 },
}

#[derive(Debug, Default)]
pub struct FetchSequencer {
    latest: HashMap<String, u64>,
}

impl FetchSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming fetch. Equal numbers are a retry of the newest one
    /// and stay fresh.
    pub fn observe(&mut self, resource: &str, seq: u64) -> Freshness {
        match self.latest.get(resource).copied() {
            Some(latest) if seq < latest => Freshness::Stale { latest },
            _ => {
                self.latest.insert(resource.to_string(), seq);
                Freshness::Fresh
            }
        }
    }

    /// Sequence numbers restart when the client switches workspace.
    pub fn reset(&mut self) {
        self.latest.clear();
    }
}
