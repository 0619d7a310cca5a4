use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::TickHistoryEntry;

/// Default number of ticks kept for display
pub const DEFAULT_HISTORY_BOUND: usize = 30;

/// Bounded record of recently observed ticks, newest first.
///
/// Entries are unique by tick and strictly descending regardless of the
/// order observations arrive in.
#[derive(Debug, Clone)]
pub struct TickHistory {
    entries: Vec<TickHistoryEntry>,
    bound: usize,
}

impl TickHistory {
    pub fn new(bound: usize) -> Self {
        Self {
            entries: Vec::with_capacity(bound + 1),
            bound: bound.max(1),
        }
    }

    pub fn entries(&self) -> &[TickHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head(&self) -> Option<u64> {
        self.entries.first().map(|e| e.tick)
    }

    /// Record an observation. Returns whether the history changed.
    pub fn observe(&mut self, tick: u64, observed_at: DateTime<Utc>) -> bool {
        if self.head() == Some(tick) {
            return false;
        }

        let before = self.entries.clone();
        self.entries.push(TickHistoryEntry {
            tick,
            observed_at,
            originator: None,
        });

        // Stable sort keeps the earlier observation ahead of a later duplicate,
        // so dedup retains the first time the tick was seen.
        self.entries.sort_by(|a, b| b.tick.cmp(&a.tick));
        self.entries.dedup_by_key(|e| e.tick);
        self.entries.truncate(self.bound);

        self.entries != before
    }

    pub fn set_originator(&mut self, tick: u64, originator: impl Into<String>) -> bool {
        match self.entries.iter_mut().find(|e| e.tick == tick) {
            Some(entry) => {
                entry.originator = Some(originator.into());
                true
            }
            None => false,
        }
    }

    /// Ticks still waiting for an originator lookup
    pub fn missing_originators(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|e| e.originator.is_none())
            .map(|e| e.tick)
            .collect()
    }

    /// Mean wall-clock time per tick across adjacent entries.
    ///
    /// Each pair contributes `Δtime / Δtick`. Pairs with a non-positive time
    /// delta are skipped. `None` until at least two valid samples exist.
    pub fn average_tick_time(&self) -> Option<Duration> {
        let samples: Vec<f64> = self
            .entries
            .windows(2)
            .filter_map(|pair| {
                let (newer, older) = (&pair[0], &pair[1]);
                let elapsed_ms = (newer.observed_at - older.observed_at).num_milliseconds();
                let ticks = newer.tick.checked_sub(older.tick)?;
                if elapsed_ms <= 0 || ticks == 0 {
                    return None;
                }
                Some(elapsed_ms as f64 / ticks as f64)
            })
            .collect();

        if samples.len() < 2 {
            return None;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Duration::from_secs_f64(mean / 1000.0))
    }
}

impl Default for TickHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_BOUND)
    }
}
