use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::{with_identity, with_tick, Endpoints};
use crate::decode;
use crate::error::{ClientError, DecodeError};
use crate::models::{
    Balance, ContractStats, NetworkSnapshot, TickOriginator, TransactionRecord, TransactionResult,
    TxKind,
};

/// Window in which repeated snapshot requests share one round trip
pub const SNAPSHOT_CACHE_WINDOW: Duration = Duration::from_millis(500);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Contract query input type for the Echo/Burn call counters
const CONTRACT_STATS_INPUT_TYPE: u16 = 1;

struct CachedSnapshot {
    fetched_at: Instant,
    snapshot: NetworkSnapshot,
}

/// Read-only view of the network used by the poller
#[async_trait]
pub trait NetworkSource: Send + Sync {
    async fn network_snapshot(&self) -> NetworkSnapshot;
    async fn current_tick(&self) -> u64;
    async fn tick_originators(&self, ticks: Vec<u64>) -> BTreeMap<u64, TickOriginator>;
    /// Transactions of `current_tick`, as already read by the caller
    async fn recent_transactions(&self, current_tick: u64, limit: usize) -> Vec<TransactionRecord>;
    async fn balance(&self, address: &str) -> Balance;
    async fn address_transfers(&self, address: &str, limit: usize) -> Vec<TransactionRecord>;
    async fn contract_stats(&self, contract_index: u8) -> Option<ContractStats>;
}

/// HTTP client for the node and the transactions service.
///
/// Read methods never fail: they fall back to cached, placeholder or empty
/// values and log the cause. `broadcast` is the only write and reports its
/// outcome.
pub struct LedgerClient {
    http: reqwest::Client,
    node_url: String,
    transactions_url: String,
    endpoints: Endpoints,
    snapshot_cache: Mutex<Option<CachedSnapshot>>,
}

impl LedgerClient {
    pub fn new(node_url: &str, transactions_url: &str, endpoints: Endpoints) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            http,
            node_url: node_url.trim_end_matches('/').to_string(),
            transactions_url: transactions_url.trim_end_matches('/').to_string(),
            endpoints,
            snapshot_cache: Mutex::new(None),
        }
    }

    async fn get_json(&self, url: String) -> Result<Value, ClientError> {
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ClientError::Decode {
                url,
                source: DecodeError::Json(e.to_string()),
            })
    }

    /// GET from the node and run the body through a decoder
    async fn get_node<T>(
        &self,
        path: String,
        decoder: impl FnOnce(&Value) -> Result<T, DecodeError>,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.node_url, path);
        let body = self.get_json(url.clone()).await?;
        decoder(&body).map_err(|source| ClientError::Decode { url, source })
    }

    async fn get_events<T>(
        &self,
        path: String,
        decoder: impl FnOnce(&Value) -> Result<T, DecodeError>,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.transactions_url, path);
        let body = self.get_json(url.clone()).await?;
        decoder(&body).map_err(|source| ClientError::Decode { url, source })
    }

    /// Current tick from latest-stats, then status, then the wall clock.
    pub async fn fetch_current_tick(&self) -> u64 {
        match self
            .get_node(self.endpoints.latest_stats.clone(), decode::current_tick)
            .await
        {
            Ok(tick) => return tick,
            Err(e) => tracing::debug!("latest-stats tick unavailable: {}", e),
        }

        match self
            .get_node(self.endpoints.status.clone(), decode::status_tick)
            .await
        {
            Ok(tick) => tick,
            Err(e) => {
                tracing::warn!("status tick unavailable, using wall clock: {}", e);
                Utc::now().timestamp().max(0) as u64
            }
        }
    }

    /// Aggregate statistics, cached for [`SNAPSHOT_CACHE_WINDOW`].
    ///
    /// The cache lock is held across the request so a burst of callers
    /// waits for the first one instead of issuing its own fetch.
    pub async fn fetch_network_snapshot(&self) -> NetworkSnapshot {
        let mut cache = self.snapshot_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < SNAPSHOT_CACHE_WINDOW {
                return cached.snapshot.clone();
            }
        }

        match self
            .get_node(self.endpoints.latest_stats.clone(), decode::network_snapshot)
            .await
        {
            Ok(snapshot) => {
                *cache = Some(CachedSnapshot {
                    fetched_at: Instant::now(),
                    snapshot: snapshot.clone(),
                });
                snapshot
            }
            Err(e) => {
                tracing::warn!("network stats unavailable: {}", e);
                if let Some(cached) = cache.as_ref() {
                    return cached.snapshot.clone();
                }
                drop(cache);
                NetworkSnapshot::placeholder(self.fetch_current_tick().await)
            }
        }
    }

    /// Balance of `address`, or [`Balance::Unavailable`] if it cannot be read.
    pub async fn fetch_balance(&self, address: &str) -> Balance {
        match self
            .get_node(
                with_identity(&self.endpoints.balance, address),
                decode::balance,
            )
            .await
        {
            Ok(amount) => Balance::Known(amount),
            Err(e) => {
                tracing::warn!("balance of {} unavailable: {}", address, e);
                Balance::Unavailable
            }
        }
    }

    /// First non-empty transaction list among the candidate endpoints.
    /// An empty result means "no data", not failure.
    pub async fn fetch_transactions_for_tick(
        &self,
        tick: u64,
        limit: usize,
    ) -> Vec<TransactionRecord> {
        let dedicated = self
            .get_node(with_tick(&self.endpoints.tick_transactions, tick), |body| {
                decode::transactions(body, tick, None)
            })
            .await;
        if let Some(mut txs) = non_empty(dedicated, "tick transactions") {
            txs.truncate(limit);
            return txs;
        }

        let embedded = self
            .get_node(with_tick(&self.endpoints.tick_info, tick), |body| {
                decode::tick_info_transactions(body, tick)
            })
            .await;
        if let Some(mut txs) = non_empty(embedded, "tick info transactions") {
            txs.truncate(limit);
            return txs;
        }

        Vec::new()
    }

    /// Transfer events recorded in `tick`, falling back to the node's own
    /// transaction listings.
    pub async fn fetch_tick_events(&self, tick: u64, limit: usize) -> Vec<TransactionRecord> {
        let qu = self
            .get_events(with_tick(&self.endpoints.tick_qu_transfers, tick), |body| {
                decode::transactions(body, tick, Some(TxKind::Transfer))
            })
            .await;
        if let Some(mut txs) = non_empty(qu, "qu transfer events") {
            txs.truncate(limit);
            return txs;
        }

        let assets = self
            .get_events(
                with_tick(&self.endpoints.tick_asset_transfers, tick),
                |body| decode::transactions(body, tick, Some(TxKind::ContractCall)),
            )
            .await;
        if let Some(mut txs) = non_empty(assets, "asset transfer events") {
            txs.truncate(limit);
            return txs;
        }

        self.fetch_transactions_for_tick(tick, limit).await
    }

    /// Transactions `page` ticks behind `current_tick`. The caller reads the
    /// current tick once per refresh.
    pub async fn fetch_recent_transactions(
        &self,
        current_tick: u64,
        page: u64,
        limit: usize,
    ) -> Vec<TransactionRecord> {
        let tick = current_tick.saturating_sub(page).max(1);
        self.fetch_tick_events(tick, limit).await
    }

    /// QU transfers touching `identity`
    pub async fn fetch_address_transfers(
        &self,
        identity: &str,
        limit: usize,
    ) -> Vec<TransactionRecord> {
        let result = self
            .get_events(
                with_identity(&self.endpoints.identity_qu_transfers, identity),
                |body| decode::transactions(body, 0, Some(TxKind::Transfer)),
            )
            .await;
        let mut txs = non_empty(result, "identity transfers").unwrap_or_default();
        txs.sort_by(|a, b| b.tick.cmp(&a.tick));
        txs.truncate(limit);
        txs
    }

    pub async fn fetch_tick_originator(&self, tick: u64) -> Option<TickOriginator> {
        match self
            .get_node(
                with_tick(&self.endpoints.tick_info, tick),
                decode::tick_originator,
            )
            .await
        {
            Ok(originator) => Some(originator),
            Err(e) => {
                tracing::debug!("no originator for tick {}: {}", tick, e);
                None
            }
        }
    }

    /// Look up many ticks at once. Failed lookups are simply absent.
    pub async fn fetch_tick_originators(
        &self,
        ticks: impl IntoIterator<Item = u64>,
    ) -> BTreeMap<u64, TickOriginator> {
        let lookups = ticks
            .into_iter()
            .filter(|tick| *tick > 0)
            .map(|tick| async move { (tick, self.fetch_tick_originator(tick).await) });

        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(tick, info)| info.map(|info| (tick, info)))
            .collect()
    }

    pub async fn fetch_contract_stats(&self, contract_index: u8) -> Option<ContractStats> {
        let url = format!("{}{}", self.node_url, self.endpoints.query_contract);
        let body = json!({
            "contractIndex": contract_index,
            "inputType": CONTRACT_STATS_INPUT_TYPE,
            "inputSize": 0,
            "requestData": "",
        });

        let result = async {
            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|source| ClientError::Transport {
                    url: url.clone(),
                    source,
                })?;
            if !response.status().is_success() {
                return Err(ClientError::Status {
                    url: url.clone(),
                    status: response.status().as_u16(),
                });
            }
            let value: Value = response.json().await.map_err(|e| ClientError::Decode {
                url: url.clone(),
                source: DecodeError::Json(e.to_string()),
            })?;
            decode::contract_stats(&value).map_err(|source| ClientError::Decode {
                url: url.clone(),
                source,
            })
        }
        .await;

        match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::debug!("contract stats unavailable: {}", e);
                None
            }
        }
    }

    /// Submit a signed transaction. Only HTTP 200 counts as accepted.
    pub async fn broadcast(&self, signed: &[u8], target_tick: u64) -> TransactionResult {
        let url = format!("{}{}", self.node_url, self.endpoints.broadcast);
        let encoded = base64::engine::general_purpose::STANDARD.encode(signed);

        let response = match self
            .http
            .post(&url)
            .json(&json!({ "data": encoded }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("broadcast to {} failed: {}", url, e);
                return TransactionResult::failed(format!("Broadcast failed: {}", e));
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            TransactionResult::ok(
                format!("Transaction sent for tick {}", target_tick),
                target_tick,
            )
        } else {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!("broadcast rejected with {}: {}", status, detail);
            TransactionResult::failed(format!(
                "Node rejected transaction (HTTP {}): {}",
                status.as_u16(),
                detail.trim()
            ))
        }
    }
}

fn non_empty(
    result: Result<Vec<TransactionRecord>, ClientError>,
    what: &str,
) -> Option<Vec<TransactionRecord>> {
    match result {
        Ok(txs) if !txs.is_empty() => Some(txs),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("{} unavailable: {}", what, e);
            None
        }
    }
}

#[async_trait]
impl NetworkSource for LedgerClient {
    async fn network_snapshot(&self) -> NetworkSnapshot {
        self.fetch_network_snapshot().await
    }

    async fn current_tick(&self) -> u64 {
        self.fetch_current_tick().await
    }

    async fn tick_originators(&self, ticks: Vec<u64>) -> BTreeMap<u64, TickOriginator> {
        self.fetch_tick_originators(ticks).await
    }

    async fn recent_transactions(&self, current_tick: u64, limit: usize) -> Vec<TransactionRecord> {
        self.fetch_recent_transactions(current_tick, 0, limit).await
    }

    async fn balance(&self, address: &str) -> Balance {
        self.fetch_balance(address).await
    }

    async fn address_transfers(&self, address: &str, limit: usize) -> Vec<TransactionRecord> {
        self.fetch_address_transfers(address, limit).await
    }

    async fn contract_stats(&self, contract_index: u8) -> Option<ContractStats> {
        self.fetch_contract_stats(contract_index).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use httpmock::prelude::*;
    use primitive_types::U256;
    use serde_json::json;

    use super::*;

    fn client(server: &MockServer) -> LedgerClient {
        LedgerClient::new(&server.base_url(), &server.base_url(), Endpoints::default())
    }

    #[tokio::test]
    async fn current_tick_from_latest_stats() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/latest-stats");
                then.status(200)
                    .json_body(json!({"data": {"currentTick": 12345, "epoch": 150}}));
            })
            .await;

        assert_eq!(client(&server).fetch_current_tick().await, 12345);
    }

    #[tokio::test]
    async fn current_tick_falls_back_to_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/latest-stats");
                then.status(200).json_body(json!({}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/status");
                then.status(200).json_body(json!({"tick": 67890}));
            })
            .await;

        assert_eq!(client(&server).fetch_current_tick().await, 67890);
    }

    #[tokio::test]
    async fn current_tick_uses_wall_clock_when_all_fail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.any_request();
                then.status(503);
            })
            .await;

        let before = Utc::now().timestamp() as u64;
        let tick = client(&server).fetch_current_tick().await;
        assert!(tick >= before);
    }

    #[tokio::test]
    async fn snapshot_burst_collapses_into_one_request() {
        let server = MockServer::start_async().await;
        let stats = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/latest-stats");
                then.status(200)
                    .json_body(json!({"data": {"currentTick": 500, "epoch": 1}}));
            })
            .await;

        let client = Arc::new(client(&server));
        let calls = (0..5).map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.fetch_network_snapshot().await })
        });
        for handle in calls {
            assert_eq!(handle.await.unwrap().tick, 500);
        }
        stats.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn snapshot_failure_returns_last_cached_value() {
        let server = MockServer::start_async().await;
        let mut ok = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/latest-stats");
                then.status(200)
                    .json_body(json!({"data": {"currentTick": 42, "epoch": 9}}));
            })
            .await;

        let client = client(&server);
        assert_eq!(client.fetch_network_snapshot().await.tick, 42);

        ok.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/latest-stats");
                then.status(500);
            })
            .await;

        tokio::time::sleep(SNAPSHOT_CACHE_WINDOW + Duration::from_millis(50)).await;
        let fallback = client.fetch_network_snapshot().await;
        assert_eq!(fallback.tick, 42);
        assert_eq!(fallback.epoch, 9);
    }

    #[tokio::test]
    async fn snapshot_failure_without_cache_is_placeholder() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/latest-stats");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/status");
                then.status(200).json_body(json!({"tick": 777}));
            })
            .await;

        let snapshot = client(&server).fetch_network_snapshot().await;
        assert_eq!(snapshot.tick, 777);
        assert_eq!(snapshot.epoch, 0);
        assert_eq!(snapshot.circulating_supply, "0");
    }

    #[tokio::test]
    async fn balance_failure_is_sentinel() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/balances/BAD");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/balances/GOOD");
                then.status(200).json_body(json!({"balance": "1500"}));
            })
            .await;

        let client = client(&server);
        assert_eq!(client.fetch_balance("BAD").await, Balance::Unavailable);
        assert_eq!(
            client.fetch_balance("GOOD").await,
            Balance::Known(U256::from(1500u64))
        );
    }

    #[tokio::test]
    async fn balance_network_failure_is_sentinel() {
        // Nothing listens on port 9 locally.
        let client = LedgerClient::new("http://127.0.0.1:9", "http://127.0.0.1:9", Endpoints::default());
        assert_eq!(client.fetch_balance("ANY").await, Balance::Unavailable);
    }

    #[tokio::test]
    async fn tick_transactions_fall_back_to_tick_info() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/tick-transactions/100");
                then.status(200).json_body(json!([]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/tick-info/100");
                then.status(200).json_body(json!({
                    "computorPublicId": "COMP",
                    "transactions": [
                        {"id": "a", "sourceId": "S", "targetId": "T", "amount": 1},
                        {"id": "b", "sourceId": "S", "targetId": "T", "amount": 2},
                        {"id": "c", "sourceId": "S", "targetId": "T", "amount": 3}
                    ]
                }));
            })
            .await;

        let txs = client(&server).fetch_transactions_for_tick(100, 2).await;
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].id, "a");
        assert_eq!(txs[1].tick, 100);
    }

    #[tokio::test]
    async fn tick_transactions_empty_when_nothing_answers() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.any_request();
                then.status(404);
            })
            .await;

        assert!(client(&server).fetch_tick_events(55, 10).await.is_empty());
    }

    #[tokio::test]
    async fn tick_events_prefer_qu_transfers() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/ticks/9/events/qu-transfers");
                then.status(200).json_body(json!([
                    {"transactionId": "q1", "sourcePublicId": "A", "targetPublicId": "B", "amount": "10"}
                ]));
            })
            .await;
        let assets = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/ticks/9/events/asset-transfers");
                then.status(200).json_body(json!([]));
            })
            .await;

        let txs = client(&server).fetch_tick_events(9, 10).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TxKind::Transfer);
        assert_eq!(txs[0].amount, "10");
        assets.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn recent_transactions_use_the_given_tick() {
        let server = MockServer::start_async().await;
        let status = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/status");
                then.status(200).json_body(json!({"lastProcessedTick": {"tickNumber": 99}}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/ticks/40/events/qu-transfers");
                then.status(200).json_body(json!([
                    {"transactionId": "r1", "sourcePublicId": "A", "targetPublicId": "B", "amount": "3"}
                ]));
            })
            .await;

        let client = client(&server);
        let txs = client.fetch_recent_transactions(41, 1, 10).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, "r1");
        status.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn originator_batch_skips_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/tick-info/10");
                then.status(200).json_body(json!({"computorPublicId": "TEN"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/tick-info/11");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/tick-info/12");
                then.status(200).json_body(json!({"computor": "TWELVE"}));
            })
            .await;

        let map = client(&server).fetch_tick_originators(vec![10, 11, 12]).await;
        assert_eq!(map.len(), 2);
        assert_eq!(map[&10].originator, "TEN");
        assert_eq!(map[&12].originator, "TWELVE");
        assert!(!map.contains_key(&11));
    }

    #[tokio::test]
    async fn broadcast_reports_success_and_failure() {
        let server = MockServer::start_async().await;
        let accepted = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/broadcast-transaction")
                    .json_body(json!({"data": "AQID"}));
                then.status(200).json_body(json!({"peersBroadcasted": 3}));
            })
            .await;

        let client = client(&server);
        let result = client.broadcast(&[1, 2, 3], 1002).await;
        assert!(result.success);
        assert_eq!(result.tick, Some(1002));
        accepted.assert_async().await;

        let rejected = client.broadcast(&[9, 9], 1003).await;
        assert!(!rejected.success);
        assert!(rejected.message.contains("404"));
    }
}
