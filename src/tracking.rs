use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::NetworkSource;
use crate::error::TrackingError;
use crate::models::Balance;
use crate::notify::{fan_out, Alert, AlertSink, Permission, PermissionGate};
use crate::state::{AppState, ConnectionState, TrackedView};
use crate::store::TrackedAddresses;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Transfers kept in an address's cached detail
const DETAIL_TRANSFER_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Untracked,
    /// Subscribe sent, waiting for the server
    Pending,
    Tracked,
}

/// Server-side push status for a tracked address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushState {
    /// No tracker configured; detection is local only
    Off,
    Awaiting,
    Confirmed,
    /// The server refused; the address stays tracked locally
    Failed(String),
}

/// Client → server frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "trackAddress")]
    TrackAddress {
        #[serde(rename = "addressId")]
        address_id: String,
    },
    #[serde(rename = "untrackAddress")]
    UntrackAddress {
        #[serde(rename = "addressId")]
        address_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Payload of `transactionDetected`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub address_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub old_balance: String,
    #[serde(deserialize_with = "string_or_number")]
    pub new_balance: String,
    #[serde(deserialize_with = "string_or_number")]
    pub difference: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

/// Server → client frames
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "trackingConfirmed", rename_all = "camelCase")]
    TrackingConfirmed { address_id: String },
    #[serde(rename = "trackingError", rename_all = "camelCase")]
    TrackingError {
        address_id: String,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "untrackingConfirmed", rename_all = "camelCase")]
    UntrackingConfirmed { address_id: String },
    #[serde(rename = "transactionDetected")]
    TransactionDetected(BalanceChange),
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Watches wallet addresses for balance changes.
///
/// Intent is persisted first; the push subscription is best effort. A
/// server-side failure leaves the address tracked and detection falls back
/// to the slow poll.
pub struct TrackingSession {
    store: TrackedAddresses,
    states: DashMap<String, (TrackState, PushState)>,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    state: Arc<AppState>,
    source: Arc<dyn NetworkSource>,
    permission: Arc<dyn PermissionGate>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl TrackingSession {
    /// `outbound` is `None` when no tracker socket is configured.
    pub fn new(
        store: TrackedAddresses,
        state: Arc<AppState>,
        source: Arc<dyn NetworkSource>,
        permission: Arc<dyn PermissionGate>,
        sinks: Vec<Arc<dyn AlertSink>>,
        outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    ) -> Self {
        Self {
            store,
            states: DashMap::new(),
            outbound,
            state,
            source,
            permission,
            sinks,
        }
    }

    fn push_enabled(&self) -> bool {
        self.outbound.is_some()
    }

    fn send(&self, message: ClientMessage) {
        if let Some(tx) = &self.outbound {
            if tx.send(message).is_err() {
                tracing::debug!("tracker socket task is gone");
            }
        }
    }

    fn initial_push(&self) -> PushState {
        if self.push_enabled() {
            PushState::Awaiting
        } else {
            PushState::Off
        }
    }

    fn initial_state(&self) -> TrackState {
        if self.push_enabled() {
            TrackState::Pending
        } else {
            TrackState::Tracked
        }
    }

    pub fn status(&self, address: &str) -> TrackState {
        self.states
            .get(address)
            .map(|entry| entry.0)
            .unwrap_or(TrackState::Untracked)
    }

    pub fn push_state(&self, address: &str) -> Option<PushState> {
        self.states.get(address).map(|entry| entry.1.clone())
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.status(address) != TrackState::Untracked
    }

    /// Addresses currently tracked, in persisted order
    pub fn tracked_addresses(&self) -> Vec<String> {
        let mut persisted = self.store.load();
        persisted.retain(|a| self.states.contains_key(a));
        for entry in self.states.iter() {
            if !persisted.contains(entry.key()) {
                persisted.push(entry.key().clone());
            }
        }
        persisted
    }

    fn publish(&self) {
        let views = self
            .tracked_addresses()
            .into_iter()
            .filter_map(|address| {
                self.states.get(&address).map(|entry| TrackedView {
                    address: address.clone(),
                    state: entry.0,
                    push: entry.1.clone(),
                })
            })
            .collect();
        self.state.set_tracked(views);
    }

    /// Start tracking whatever was persisted by a previous run
    pub fn restore(&self) {
        for address in self.store.load() {
            self.states
                .insert(address.clone(), (self.initial_state(), self.initial_push()));
            self.send(ClientMessage::TrackAddress {
                address_id: address,
            });
        }
        self.publish();
    }

    /// `untracked → pending`, gated on notification permission
    pub fn track(&self, address: &str) -> Result<(), TrackingError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TrackingError::EmptyAddress);
        }

        let permission = match self.permission.current() {
            Permission::Default => self.permission.request(),
            decided => decided,
        };
        if permission == Permission::Denied {
            return Err(TrackingError::PermissionDenied);
        }
        if self.states.contains_key(address) {
            return Ok(());
        }

        self.store.add(address)?;
        self.states
            .insert(address.to_string(), (self.initial_state(), self.initial_push()));
        self.send(ClientMessage::TrackAddress {
            address_id: address.to_string(),
        });
        self.state.log_info(format!("Tracking {}", short(address)));
        self.publish();
        Ok(())
    }

    /// `* → untracked`. The unsubscribe is best effort; the local removal is not.
    pub fn untrack(&self, address: &str) -> Result<(), TrackingError> {
        let address = address.trim();
        // storage first: a concurrent resync must not see it still persisted
        self.store.remove(address)?;
        self.states.remove(address);
        self.send(ClientMessage::UntrackAddress {
            address_id: address.to_string(),
        });
        self.state.log_info(format!("Stopped tracking {}", short(address)));
        self.publish();
        Ok(())
    }

    /// Re-read the persisted set after another writer changed it
    pub fn resync(&self) {
        let persisted = self.store.load();
        let mut changed = false;

        for address in &persisted {
            if !self.states.contains_key(address) {
                self.states
                    .insert(address.clone(), (self.initial_state(), self.initial_push()));
                self.send(ClientMessage::TrackAddress {
                    address_id: address.clone(),
                });
                changed = true;
            }
        }

        let before = self.states.len();
        self.states.retain(|address, _| persisted.contains(address));
        changed |= self.states.len() != before;

        if changed {
            self.publish();
        }
    }

    /// Called after the socket (re)connects: the new connection has no
    /// subscriptions yet.
    pub fn resubscribe_all(&self) {
        for mut entry in self.states.iter_mut() {
            if !matches!(entry.1, PushState::Confirmed) {
                entry.1 = PushState::Awaiting;
            }
            self.send(ClientMessage::TrackAddress {
                address_id: entry.key().clone(),
            });
        }
        self.publish();
    }

    pub async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::TrackingConfirmed { address_id } => {
                if let Some(mut entry) = self.states.get_mut(&address_id) {
                    *entry = (TrackState::Tracked, PushState::Confirmed);
                }
                self.publish();
            }
            ServerEvent::TrackingError {
                address_id,
                message,
            } => {
                let message = message.unwrap_or_else(|| "subscribe failed".to_string());
                self.state.log_warn(format!(
                    "Push tracking failed for {}: {} (local tracking continues)",
                    short(&address_id),
                    message
                ));
                if let Some(mut entry) = self.states.get_mut(&address_id) {
                    *entry = (TrackState::Tracked, PushState::Failed(message));
                }
                self.publish();
            }
            ServerEvent::UntrackingConfirmed { address_id } => {
                tracing::debug!("server confirmed untrack of {}", address_id);
            }
            ServerEvent::TransactionDetected(change) => {
                self.handle_balance_change(change).await;
            }
        }
    }

    /// Refresh the address's cached detail and alert on every channel.
    /// Pushes for addresses no longer tracked are dropped.
    pub async fn handle_balance_change(&self, change: BalanceChange) {
        if !self.states.contains_key(&change.address_id) {
            tracing::debug!("ignoring change for untracked {}", change.address_id);
            return;
        }
        let balance = match self.source.balance(&change.address_id).await {
            Balance::Unavailable => U256::from_dec_str(&change.new_balance)
                .map(Balance::Known)
                .unwrap_or(Balance::Unavailable),
            known => known,
        };
        let transfers = self
            .source
            .address_transfers(&change.address_id, DETAIL_TRANSFER_LIMIT)
            .await;
        self.record_change(&change, balance, transfers);
    }

    fn record_change(
        &self,
        change: &BalanceChange,
        balance: Balance,
        transfers: Vec<crate::models::TransactionRecord>,
    ) {
        let transfers = if transfers.is_empty() {
            None
        } else {
            Some(transfers)
        };
        let previous = self.state.known_balance(&change.address_id);
        self.state
            .update_address_detail(&change.address_id, balance, transfers);

        if self.state.wallet.read().address.as_deref() == Some(change.address_id.as_str()) {
            self.state.set_wallet_balance(balance);
        }

        // the poll and the push can both report one transfer
        if balance.known().is_some() && previous == Some(balance) {
            tracing::debug!("change for {} already applied", change.address_id);
            return;
        }

        let alert = alert_for(change);
        self.state.log_info(format!("{} {}", alert.title, alert.body));
        fan_out(&self.sinks, &alert);
    }

    /// Balance polling for tracked addresses, so alerts still fire when the
    /// push channel is down or refused the subscription. Addresses with a
    /// confirmed push subscription are left to the server.
    pub async fn detect_local_changes(&self) {
        for address in self.tracked_addresses() {
            if self.push_state(&address) == Some(PushState::Confirmed) {
                continue;
            }
            let current = match self.source.balance(&address).await {
                Balance::Known(v) => v,
                Balance::Unavailable => continue,
            };
            let previous = self.state.known_balance(&address).and_then(|b| b.known());

            match previous {
                Some(old) if old != current => {
                    let (direction, difference) = if current > old {
                        (Direction::Incoming, current - old)
                    } else {
                        (Direction::Outgoing, old - current)
                    };
                    let change = BalanceChange {
                        address_id: address.clone(),
                        old_balance: old.to_string(),
                        new_balance: current.to_string(),
                        difference: difference.to_string(),
                        direction,
                        timestamp: None,
                    };
                    let transfers = self
                        .source
                        .address_transfers(&address, DETAIL_TRANSFER_LIMIT)
                        .await;
                    self.record_change(&change, Balance::Known(current), transfers);
                }
                Some(_) => {}
                None => {
                    self.state
                        .update_address_detail(&address, Balance::Known(current), None);
                }
            }
        }
    }
}

fn alert_for(change: &BalanceChange) -> Alert {
    let amount = change.difference.trim_start_matches(['-', '+']);
    match change.direction {
        Direction::Incoming => Alert {
            title: "Incoming transaction".to_string(),
            body: format!("{} received {} QU", short(&change.address_id), amount),
            incoming: true,
        },
        Direction::Outgoing => Alert {
            title: "Outgoing transaction".to_string(),
            body: format!("{} sent {} QU", short(&change.address_id), amount),
            incoming: false,
        },
    }
}

/// First and last characters of a long identity
pub fn short(address: &str) -> String {
    if address.len() <= 14 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 6..])
}

/// Run the tracker socket in a background task
pub fn start_tracker(
    url: String,
    session: Arc<TrackingSession>,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_socket(url, session, outbound, cancel).await;
    })
}

async fn run_socket(
    url: String,
    session: Arc<TrackingSession>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
) {
    let state = Arc::clone(&session.state);
    let mut attempt: u64 = 0;

    while !cancel.is_cancelled() {
        state.set_connection_state(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                attempt = 0;
                state.set_connection_state(ConnectionState::Connected);
                let (mut writer, mut reader) = socket.split();

                // queued messages predate this connection
                while outbound.try_recv().is_ok() {}
                session.resubscribe_all();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = writer.close().await;
                            break;
                        }
                        message = outbound.recv() => {
                            let Some(message) = message else { break };
                            let text = match serde_json::to_string(&message) {
                                Ok(text) => text,
                                Err(e) => {
                                    tracing::error!("failed to encode {:?}: {}", message, e);
                                    continue;
                                }
                            };
                            if let Err(e) = writer.send(Message::Text(text)).await {
                                state.log_error(format!("Tracker send failed: {}", e));
                                break;
                            }
                        }
                        frame = reader.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerEvent>(&text) {
                                        Ok(event) => session.handle_server_event(event).await,
                                        Err(e) => tracing::debug!("ignoring tracker frame: {}", e),
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = writer.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    state.log_info("Tracker closed the connection");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    state.log_error(format!("Tracker connection error: {}", e));
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                state.log_error(format!("Tracker connect failed: {}", e));
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        attempt += 1;
        state
            .reconnect_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        state.set_connection_state(ConnectionState::Reconnecting);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    state.set_connection_state(ConnectionState::Disconnected);
}
