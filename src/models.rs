use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use primitive_types::U256;

/// Aggregate network statistics as of one fetch
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSnapshot {
    pub tick: u64,
    pub ticks_in_epoch: u64,
    pub empty_ticks_in_epoch: u64,
    /// Percentage of non-empty ticks in the epoch
    pub tick_quality: f64,
    pub circulating_supply: String,
    pub epoch: u32,
    pub timestamp: DateTime<Utc>,
    pub market_cap: String,
    pub price: String,
    pub active_addresses: u64,
    /// Normalized per-tick latency, filled in by the history tracker
    pub average_tick_time: Option<Duration>,
}

impl NetworkSnapshot {
    /// Zero-valued snapshot that still carries the best-effort current tick.
    pub fn placeholder(tick: u64) -> Self {
        Self {
            tick,
            ticks_in_epoch: 0,
            empty_ticks_in_epoch: 0,
            tick_quality: 0.0,
            circulating_supply: "0".to_string(),
            epoch: 0,
            timestamp: Utc::now(),
            market_cap: "0".to_string(),
            price: "0".to_string(),
            active_addresses: 0,
            average_tick_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickHistoryEntry {
    pub tick: u64,
    pub observed_at: DateTime<Utc>,
    pub originator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOriginator {
    pub originator: String,
    pub timestamp: DateTime<Utc>,
}

/// Balance of an identity. `Unavailable` is shown as a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Balance {
    Known(U256),
    #[default]
    Unavailable,
}

impl Balance {
    pub fn known(&self) -> Option<U256> {
        match self {
            Balance::Known(v) => Some(*v),
            Balance::Unavailable => None,
        }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Balance::Known(v) => write!(f, "{} QU", v),
            Balance::Unavailable => write!(f, "—"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Transfer,
    ContractCall,
    Burn,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::Transfer => write!(f, "transfer"),
            TxKind::ContractCall => write!(f, "contract"),
            TxKind::Burn => write!(f, "burn"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Pending,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Confirmed => write!(f, "confirmed"),
            TxStatus::Pending => write!(f, "pending"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInput {
    pub input_type: u16,
    pub input_size: u16,
    pub input_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Decimal string
    pub amount: String,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: TxKind,
    pub status: TxStatus,
    pub input: Option<ContractInput>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContractStats {
    pub echo_calls: u64,
    pub burn_calls: u64,
}

/// Outcome of a write path (broadcast, contract call)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub success: bool,
    pub message: String,
    pub tick: Option<u64>,
}

impl TransactionResult {
    pub fn ok(message: impl Into<String>, tick: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            tick: Some(tick),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            tick: None,
        }
    }
}

/// Lives in memory for the session only and is never serialized.
#[derive(Clone)]
pub struct IdentityPackage {
    pub private_key: Vec<u8>,
    pub public_key: [u8; 32],
    pub address: String,
}

impl fmt::Debug for IdentityPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityPackage")
            .field("private_key", &"<redacted>")
            .field("address", &self.address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_debug_hides_private_key() {
        let identity = IdentityPackage {
            private_key: vec![0xAB; 32],
            public_key: [1; 32],
            address: "ADDR".to_string(),
        };
        let printed = format!("{:?}", identity);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("171"));
    }

    #[test]
    fn unavailable_balance_renders_placeholder() {
        assert_eq!(Balance::Unavailable.to_string(), "—");
        assert_eq!(Balance::Known(U256::from(42u64)).to_string(), "42 QU");
    }
}
