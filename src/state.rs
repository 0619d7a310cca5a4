use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::history::TickHistory;
use crate::models::{
    Balance, ContractStats, NetworkSnapshot, TickHistoryEntry, TransactionRecord,
};
use crate::tracking::{PushState, TrackState};

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;
/// Maximum number of toasts on screen
const MAX_TOASTS: usize = 5;
/// How long a toast stays visible
const TOAST_TTL: Duration = Duration::from_secs(6);
/// Number of tabs in the UI
pub const TAB_COUNT: usize = 5;

/// Connection state for the tracker socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disabled => write!(f, "Push off"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting..."),
        }
    }
}

/// Log entry with timestamp and level
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Incoming,
    Outgoing,
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    pub created_at: Instant,
}

/// Cached detail for one address
#[derive(Debug, Clone, Default)]
pub struct AddressDetail {
    pub balance: Balance,
    pub transfers: Vec<TransactionRecord>,
}

/// What the UI shows for one tracked address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedView {
    pub address: String,
    pub state: TrackState,
    pub push: PushState,
}

/// Wallet data safe to render. The identity itself lives in the wallet service.
#[derive(Debug, Clone, Default)]
pub struct WalletView {
    pub address: Option<String>,
    pub balance: Balance,
    pub busy: bool,
}

/// Command line input state
#[derive(Debug, Clone, Default)]
pub struct CommandLine {
    pub active: bool,
    pub buffer: String,
}

/// Shared application state.
///
/// Network data only changes through [`AppState::reconcile_snapshot`]; every
/// change bumps a revision that consumers can watch.
pub struct AppState {
    // Connection info
    pub node_url: String,
    pub connection_state: RwLock<ConnectionState>,
    pub reconnect_count: AtomicU64,

    // Network
    pub snapshot: RwLock<Option<NetworkSnapshot>>,
    pub history: RwLock<TickHistory>,
    pub latest_transactions: RwLock<Vec<TransactionRecord>>,
    pub explored_tick: RwLock<Option<(u64, Vec<TransactionRecord>)>>,
    pub contract_stats: RwLock<Option<ContractStats>>,
    pub poll_count: AtomicU64,

    // Wallet and tracking
    pub wallet: RwLock<WalletView>,
    pub tracked: RwLock<Vec<TrackedView>>,
    pub address_details: RwLock<HashMap<String, AddressDetail>>,
    /// Address opened with the `address` command
    pub browsed_address: RwLock<Option<String>>,

    // Notifications
    pub toasts: RwLock<VecDeque<Toast>>,
    pub logs: RwLock<VecDeque<LogEntry>>,

    // UI state
    pub selected_tab: RwLock<usize>,
    pub scroll_offset: RwLock<usize>,
    pub show_help: RwLock<bool>,
    pub command: RwLock<CommandLine>,

    // Timing
    pub start_time: Instant,

    revision: watch::Sender<u64>,
}

impl AppState {
    pub fn new(node_url: String, history_bound: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            node_url,
            connection_state: RwLock::new(ConnectionState::Disabled),
            reconnect_count: AtomicU64::new(0),
            snapshot: RwLock::new(None),
            history: RwLock::new(TickHistory::new(history_bound)),
            latest_transactions: RwLock::new(Vec::new()),
            explored_tick: RwLock::new(None),
            contract_stats: RwLock::new(None),
            poll_count: AtomicU64::new(0),
            wallet: RwLock::new(WalletView::default()),
            tracked: RwLock::new(Vec::new()),
            address_details: RwLock::new(HashMap::new()),
            browsed_address: RwLock::new(None),
            toasts: RwLock::new(VecDeque::with_capacity(MAX_TOASTS)),
            logs: RwLock::new(VecDeque::with_capacity(MAX_LOG_ENTRIES)),
            selected_tab: RwLock::new(0),
            scroll_offset: RwLock::new(0),
            show_help: RwLock::new(false),
            command: RwLock::new(CommandLine::default()),
            start_time: Instant::now(),
            revision,
        }
    }

    /// Watch for state changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    /// Merge a freshly fetched snapshot.
    ///
    /// The snapshot itself is last-write-wins; the history absorbs ordering
    /// problems through dedupe and resort.
    pub fn reconcile_snapshot(&self, mut snapshot: NetworkSnapshot) {
        let average = {
            let mut history = self.history.write();
            history.observe(snapshot.tick, snapshot.timestamp);
            history.average_tick_time()
        };
        snapshot.average_tick_time = average;
        *self.snapshot.write() = Some(snapshot);
        self.poll_count.fetch_add(1, Ordering::Relaxed);
        self.bump();
    }

    pub fn apply_originators(&self, found: impl IntoIterator<Item = (u64, String)>) {
        let mut changed = false;
        {
            let mut history = self.history.write();
            for (tick, originator) in found {
                changed |= history.set_originator(tick, originator);
            }
        }
        if changed {
            self.bump();
        }
    }

    pub fn current_tick(&self) -> Option<u64> {
        self.snapshot.read().as_ref().map(|s| s.tick)
    }

    pub fn history_entries(&self) -> Vec<TickHistoryEntry> {
        self.history.read().entries().to_vec()
    }

    pub fn set_latest_transactions(&self, txs: Vec<TransactionRecord>) {
        *self.latest_transactions.write() = txs;
        self.bump();
    }

    pub fn set_explored_tick(&self, tick: u64, txs: Vec<TransactionRecord>) {
        *self.explored_tick.write() = Some((tick, txs));
        self.bump();
    }

    pub fn set_contract_stats(&self, stats: ContractStats) {
        *self.contract_stats.write() = Some(stats);
        self.bump();
    }

    pub fn set_wallet_address(&self, address: Option<String>) {
        let mut wallet = self.wallet.write();
        wallet.address = address;
        wallet.balance = Balance::Unavailable;
        drop(wallet);
        self.bump();
    }

    pub fn set_wallet_balance(&self, balance: Balance) {
        self.wallet.write().balance = balance;
        self.bump();
    }

    pub fn set_wallet_busy(&self, busy: bool) {
        self.wallet.write().busy = busy;
        self.bump();
    }

    pub fn set_tracked(&self, tracked: Vec<TrackedView>) {
        *self.tracked.write() = tracked;
        self.bump();
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.tracked
            .read()
            .iter()
            .any(|t| t.address == address && t.state != TrackState::Untracked)
    }

    /// Last known balance of an address, if any
    pub fn known_balance(&self, address: &str) -> Option<Balance> {
        self.address_details.read().get(address).map(|d| d.balance)
    }

    pub fn update_address_detail(
        &self,
        address: &str,
        balance: Balance,
        transfers: Option<Vec<TransactionRecord>>,
    ) {
        {
            let mut details = self.address_details.write();
            let detail = details.entry(address.to_string()).or_default();
            detail.balance = balance;
            if let Some(transfers) = transfers {
                detail.transfers = transfers;
            }
        }
        self.bump();
    }

    pub fn set_browsed_address(&self, address: Option<String>) {
        *self.browsed_address.write() = address;
        self.bump();
    }

    /// Add a log entry
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let mut logs = self.logs.write();
        if logs.len() >= MAX_LOG_ENTRIES {
            logs.pop_front();
        }
        logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Log info message
    pub fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Log warning message
    pub fn log_warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    /// Log error message
    pub fn log_error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn push_toast(&self, kind: ToastKind, title: impl Into<String>, message: impl Into<String>) {
        let mut toasts = self.toasts.write();
        if toasts.len() >= MAX_TOASTS {
            toasts.pop_front();
        }
        toasts.push_back(Toast {
            kind,
            title: title.into(),
            message: message.into(),
            created_at: Instant::now(),
        });
    }

    /// Drop toasts that have been shown long enough
    pub fn expire_toasts(&self) {
        self.toasts
            .write()
            .retain(|t| t.created_at.elapsed() < TOAST_TTL);
    }

    /// Set connection state
    pub fn set_connection_state(&self, state: ConnectionState) {
        let mut conn_state = self.connection_state.write();
        if *conn_state != state {
            self.log_info(format!("Tracker: {}", state));
            *conn_state = state;
        }
    }

    /// Get uptime duration
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Navigate to next tab
    pub fn next_tab(&self) {
        let mut tab = self.selected_tab.write();
        *tab = (*tab + 1) % TAB_COUNT;
        *self.scroll_offset.write() = 0;
    }

    /// Navigate to previous tab
    pub fn prev_tab(&self) {
        let mut tab = self.selected_tab.write();
        *tab = if *tab == 0 { TAB_COUNT - 1 } else { *tab - 1 };
        *self.scroll_offset.write() = 0;
    }

    /// Toggle help display
    pub fn toggle_help(&self) {
        let mut show = self.show_help.write();
        *show = !*show;
    }

    /// Scroll up in current view
    pub fn scroll_up(&self) {
        let mut offset = self.scroll_offset.write();
        *offset = offset.saturating_sub(1);
    }

    /// Scroll down in current view
    pub fn scroll_down(&self) {
        let mut offset = self.scroll_offset.write();
        *offset = offset.saturating_add(1);
    }

    pub fn open_command(&self) {
        let mut command = self.command.write();
        command.active = true;
        command.buffer.clear();
    }

    pub fn close_command(&self) -> String {
        let mut command = self.command.write();
        command.active = false;
        std::mem::take(&mut command.buffer)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn snapshot(tick: u64, ms: i64) -> NetworkSnapshot {
        let mut s = NetworkSnapshot::placeholder(tick);
        s.timestamp = Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap();
        s
    }

    #[test]
    fn reconcile_updates_history_and_average() {
        let state = AppState::new("http://node".into(), 10);
        let mut revisions = state.subscribe();

        state.reconcile_snapshot(snapshot(100, 0));
        state.reconcile_snapshot(snapshot(101, 2_000));
        assert!(state.snapshot.read().as_ref().unwrap().average_tick_time.is_none());

        state.reconcile_snapshot(snapshot(102, 4_000));
        let current = state.snapshot.read().clone().unwrap();
        assert_eq!(current.tick, 102);
        assert_eq!(current.average_tick_time, Some(Duration::from_secs(2)));
        assert!(revisions.has_changed().unwrap());
        assert_eq!(*revisions.borrow_and_update(), 3);
    }

    #[test]
    fn repeated_snapshot_does_not_grow_history() {
        let state = AppState::new("http://node".into(), 10);
        state.reconcile_snapshot(snapshot(7, 0));
        state.reconcile_snapshot(snapshot(7, 500));
        assert_eq!(state.history_entries().len(), 1);
        assert_eq!(state.current_tick(), Some(7));
    }

    #[test]
    fn late_snapshot_wins_for_display_but_history_stays_sorted() {
        let state = AppState::new("http://node".into(), 10);
        state.reconcile_snapshot(snapshot(20, 0));
        state.reconcile_snapshot(snapshot(19, 100));
        assert_eq!(state.current_tick(), Some(19));
        let ticks: Vec<u64> = state.history_entries().iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![20, 19]);
    }

    #[test]
    fn toasts_are_bounded() {
        let state = AppState::new("http://node".into(), 10);
        for i in 0..(MAX_TOASTS + 3) {
            state.push_toast(ToastKind::Success, "t", format!("{}", i));
        }
        let toasts = state.toasts.read();
        assert_eq!(toasts.len(), MAX_TOASTS);
        assert_eq!(toasts.back().unwrap().message, format!("{}", MAX_TOASTS + 2));
    }

    #[test]
    fn tabs_wrap_around() {
        let state = AppState::new("http://node".into(), 10);
        state.prev_tab();
        assert_eq!(*state.selected_tab.read(), TAB_COUNT - 1);
        state.next_tab();
        assert_eq!(*state.selected_tab.read(), 0);
    }
}
