use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Storage key holding the tracked-address list
pub const TRACKED_ADDRESSES_KEY: &str = "tracked-addresses";

/// Path templates for every remote call. `{tick}` and `{identity}` are
/// substituted at request time. Deployments differ, so these can be
/// overridden from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Endpoints {
    pub latest_stats: String,
    pub status: String,
    pub balance: String,
    pub tick_info: String,
    pub tick_transactions: String,
    pub broadcast: String,
    pub query_contract: String,
    pub tick_qu_transfers: String,
    pub tick_asset_transfers: String,
    pub identity_qu_transfers: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            latest_stats: "/v1/latest-stats".to_string(),
            status: "/v1/status".to_string(),
            balance: "/v1/balances/{identity}".to_string(),
            tick_info: "/v1/tick-info/{tick}".to_string(),
            tick_transactions: "/v1/tick-transactions/{tick}".to_string(),
            broadcast: "/v1/broadcast-transaction".to_string(),
            query_contract: "/v1/querySmartContract".to_string(),
            tick_qu_transfers: "/api/v1/ticks/{tick}/events/qu-transfers".to_string(),
            tick_asset_transfers: "/api/v1/ticks/{tick}/events/asset-transfers".to_string(),
            identity_qu_transfers: "/api/v1/identities/{identity}/events/qu-transfers"
                .to_string(),
        }
    }
}

impl Endpoints {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read endpoints file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Invalid endpoints file {}", path.display()))
    }
}

/// Substitute `{tick}` in a path template
pub fn with_tick(template: &str, tick: u64) -> String {
    template.replace("{tick}", &tick.to_string())
}

/// Substitute `{identity}` in a path template
pub fn with_identity(template: &str, identity: &str) -> String {
    template.replace("{identity}", identity)
}

/// Whether the user allows OS-level notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PermissionSetting {
    Ask,
    Granted,
    Denied,
}

/// Runtime settings assembled from CLI flags and environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub node_url: String,
    pub transactions_url: String,
    pub tracker_url: Option<String>,
    pub endpoints: Endpoints,
    pub fast_interval: Duration,
    pub slow_interval: Duration,
    pub history_bound: usize,
    pub page_size: usize,
    pub contract_index: u8,
    pub data_dir: PathBuf,
    pub notifications: PermissionSetting,
}

impl Settings {
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("qubic-dash")
    }
}

/// Default directory for persisted state
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
}
