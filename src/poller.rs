use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::NetworkSource;
use crate::state::AppState;
use crate::tracking::TrackingSession;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub fast_interval: Duration,
    pub slow_interval: Duration,
    pub page_size: usize,
    pub contract_index: u8,
}

/// Drives the two refresh cadences.
///
/// The fast loop only refreshes the snapshot; the slow loop does everything
/// a manual refresh does. Both stop as soon as the token is cancelled,
/// dropping whatever request is in flight.
pub struct PollingOrchestrator {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    handles: Vec<JoinHandle<()>>,
}

impl PollingOrchestrator {
    pub fn start(
        source: Arc<dyn NetworkSource>,
        state: Arc<AppState>,
        tracking: Arc<TrackingSession>,
        config: PollerConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());

        let fast = tokio::spawn(fast_loop(
            Arc::clone(&source),
            Arc::clone(&state),
            config.fast_interval,
            cancel.clone(),
        ));
        let slow = tokio::spawn(slow_loop(
            source,
            state,
            tracking,
            config,
            Arc::clone(&refresh),
            cancel.clone(),
        ));

        Self {
            cancel,
            refresh,
            handles: vec![fast, slow],
        }
    }

    /// Run the slow pass now instead of waiting for its next tick
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for PollingOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fast_loop(
    source: Arc<dyn NetworkSource>,
    state: Arc<AppState>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = fast_pass(source.as_ref(), &state) => {}
        }
    }
    tracing::debug!("fast poll loop stopped");
}

async fn slow_loop(
    source: Arc<dyn NetworkSource>,
    state: Arc<AppState>,
    tracking: Arc<TrackingSession>,
    config: PollerConfig,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.slow_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = refresh.notified() => {
                state.log_info("Manual refresh");
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = slow_pass(source.as_ref(), &state, &tracking, &config) => {}
        }
    }
    tracing::debug!("slow poll loop stopped");
}

/// Fetch one snapshot and fold it into state
pub async fn fast_pass(source: &dyn NetworkSource, state: &AppState) {
    let snapshot = source.network_snapshot().await;
    state.reconcile_snapshot(snapshot);
}

/// Everything a manual refresh does
pub async fn slow_pass(
    source: &dyn NetworkSource,
    state: &AppState,
    tracking: &TrackingSession,
    config: &PollerConfig,
) {
    let tick = source.current_tick().await;
    tracing::debug!("slow refresh at tick {}", tick);

    let missing = state.history.read().missing_originators();
    if !missing.is_empty() {
        let found = source.tick_originators(missing).await;
        state.apply_originators(found.into_iter().map(|(t, o)| (t, o.originator)));
    }

    let latest = source.recent_transactions(tick, config.page_size).await;
    state.set_latest_transactions(latest);

    let wallet_address = state.wallet.read().address.clone();
    if let Some(address) = wallet_address {
        let balance = source.balance(&address).await;
        // a failed lookup keeps the last value on screen
        if balance.known().is_some() {
            state.set_wallet_balance(balance);
        }
    }

    tracking.resync();
    tracking.detect_local_changes().await;

    if let Some(stats) = source.contract_stats(config.contract_index).await {
        state.set_contract_stats(stats);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Utc;
    use primitive_types::U256;

    use super::*;
    use crate::models::{Balance, ContractStats, TickOriginator};
    use crate::notify::{ConfiguredPermission, Permission};
    use crate::store::{LocalStore, TrackedAddresses};
    use crate::testing::ScriptedSource;

    fn config() -> PollerConfig {
        PollerConfig {
            fast_interval: Duration::from_secs(1),
            slow_interval: Duration::from_secs(10),
            page_size: 10,
            contract_index: 12,
        }
    }

    fn tracking(
        dir: &tempfile::TempDir,
        state: &Arc<AppState>,
        source: &Arc<ScriptedSource>,
    ) -> Arc<TrackingSession> {
        let store = TrackedAddresses::new(LocalStore::open(dir.path()).unwrap());
        Arc::new(TrackingSession::new(
            store,
            Arc::clone(state),
            source.clone(),
            Arc::new(ConfiguredPermission::new(Permission::Granted)),
            Vec::new(),
            None,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn three_fast_ticks_fill_history_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::with_ticks([100, 101, 102]));
        let state = Arc::new(AppState::new("http://node".into(), 30));
        let session = tracking(&dir, &state, &source);

        let poller = PollingOrchestrator::start(
            source.clone(),
            Arc::clone(&state),
            session,
            config(),
        );
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let ticks: Vec<u64> = state.history_entries().iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![102, 101, 100]);
        assert_eq!(state.current_tick(), Some(102));
        assert!(source.snapshot_calls() >= 3);

        poller.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn no_fetches_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::with_ticks([1, 2, 3]));
        let state = Arc::new(AppState::new("http://node".into(), 30));
        let session = tracking(&dir, &state, &source);

        let poller = PollingOrchestrator::start(
            source.clone(),
            Arc::clone(&state),
            session,
            config(),
        );
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        poller.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!poller.is_running());

        let snapshots = source.snapshot_calls();
        let slow = source.slow_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.snapshot_calls(), snapshots);
        assert_eq!(source.slow_calls.load(Ordering::SeqCst), slow);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cadence_and_manual_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::with_ticks([5]));
        let state = Arc::new(AppState::new("http://node".into(), 30));
        let session = tracking(&dir, &state, &source);

        let poller = PollingOrchestrator::start(
            source.clone(),
            Arc::clone(&state),
            session,
            config(),
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.slow_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.slow_calls.load(Ordering::SeqCst), 2);

        poller.refresh();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.slow_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *state.contract_stats.read(),
            Some(ContractStats {
                echo_calls: 5,
                burn_calls: 3
            })
        );

        poller.shutdown();
    }

    #[tokio::test]
    async fn slow_pass_fills_originators_and_balances() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::with_ticks([42]));
        source.originators.lock().insert(
            42,
            TickOriginator {
                originator: "COMPUTOR".into(),
                timestamp: Utc::now(),
            },
        );
        source.set_balance("WALLET", Balance::Known(U256::from(900u64)));
        source.set_balance("WATCHED", Balance::Known(U256::from(7u64)));

        let state = Arc::new(AppState::new("http://node".into(), 30));
        let session = tracking(&dir, &state, &source);
        session.track("WATCHED").unwrap();
        state.set_wallet_address(Some("WALLET".into()));

        fast_pass(source.as_ref(), &state).await;
        slow_pass(source.as_ref(), &state, &session, &config()).await;

        let entries = state.history_entries();
        assert_eq!(entries[0].originator.as_deref(), Some("COMPUTOR"));
        // the listing reuses the tick read at the start of the pass
        assert_eq!(*source.listed_ticks.lock(), vec![42]);
        assert_eq!(
            state.wallet.read().balance,
            Balance::Known(U256::from(900u64))
        );
        assert_eq!(
            state.known_balance("WATCHED"),
            Some(Balance::Known(U256::from(7u64)))
        );
    }

    #[tokio::test]
    async fn unavailable_wallet_balance_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::with_ticks([1]));
        let state = Arc::new(AppState::new("http://node".into(), 30));
        let session = tracking(&dir, &state, &source);

        state.set_wallet_address(Some("WALLET".into()));
        state.set_wallet_balance(Balance::Known(U256::from(3u64)));
        slow_pass(source.as_ref(), &state, &session, &config()).await;

        assert_eq!(state.wallet.read().balance, Balance::Known(U256::from(3u64)));
    }
}
