//! Scripted network source for driving the tracker and poller in tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::NetworkSource;
use crate::models::{
    Balance, ContractStats, NetworkSnapshot, TickOriginator, TransactionRecord,
};

#[derive(Default)]
pub struct ScriptedSource {
    pub snapshots: Mutex<VecDeque<NetworkSnapshot>>,
    pub balances: Mutex<HashMap<String, Balance>>,
    pub transfers: Mutex<HashMap<String, Vec<TransactionRecord>>>,
    pub originators: Mutex<BTreeMap<u64, TickOriginator>>,
    pub snapshot_calls: AtomicUsize,
    pub slow_calls: AtomicUsize,
    /// Ticks handed to `recent_transactions`
    pub listed_ticks: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    pub fn with_ticks(ticks: impl IntoIterator<Item = u64>) -> Self {
        let source = Self::default();
        source
            .snapshots
            .lock()
            .extend(ticks.into_iter().map(NetworkSnapshot::placeholder));
        source
    }

    pub fn set_balance(&self, address: &str, balance: Balance) {
        self.balances.lock().insert(address.to_string(), balance);
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkSource for ScriptedSource {
    async fn network_snapshot(&self) -> NetworkSnapshot {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock();
        // the last scripted snapshot repeats once the script runs out
        if snapshots.len() > 1 {
            snapshots.pop_front().unwrap_or_else(|| NetworkSnapshot::placeholder(0))
        } else {
            snapshots
                .front()
                .cloned()
                .unwrap_or_else(|| NetworkSnapshot::placeholder(0))
        }
    }

    async fn current_tick(&self) -> u64 {
        self.snapshots.lock().front().map(|s| s.tick).unwrap_or(0)
    }

    async fn tick_originators(&self, ticks: Vec<u64>) -> BTreeMap<u64, TickOriginator> {
        let originators = self.originators.lock();
        ticks
            .into_iter()
            .filter_map(|t| originators.get(&t).cloned().map(|o| (t, o)))
            .collect()
    }

    async fn recent_transactions(&self, current_tick: u64, _limit: usize) -> Vec<TransactionRecord> {
        self.slow_calls.fetch_add(1, Ordering::SeqCst);
        self.listed_ticks.lock().push(current_tick);
        Vec::new()
    }

    async fn balance(&self, address: &str) -> Balance {
        self.balances
            .lock()
            .get(address)
            .copied()
            .unwrap_or(Balance::Unavailable)
    }

    async fn address_transfers(&self, address: &str, limit: usize) -> Vec<TransactionRecord> {
        let mut txs = self
            .transfers
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_default();
        txs.truncate(limit);
        txs
    }

    async fn contract_stats(&self, _contract_index: u8) -> Option<ContractStats> {
        Some(ContractStats {
            echo_calls: 5,
            burn_calls: 3,
        })
    }
}
