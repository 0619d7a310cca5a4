//! Response normalization.
//!
//! Node deployments disagree on field names and number encodings. Every
//! payload passes through one of these functions and comes out either as a
//! model type or a [`DecodeError`]; nothing past this module touches raw JSON.

use chrono::{DateTime, TimeZone, Utc};
use primitive_types::U256;
use serde_json::Value;

use crate::error::DecodeError;
use crate::models::{
    ContractInput, ContractStats, NetworkSnapshot, TickOriginator, TransactionRecord, TxKind,
    TxStatus,
};

pub const UNKNOWN_ADDRESS: &str = "unknown";
const BURN_PREFIX: &str = "0000000";

/// `GET latest-stats` → `{ data: { currentTick, ... } }`
pub fn network_snapshot(body: &Value) -> Result<NetworkSnapshot, DecodeError> {
    let data = body.get("data").ok_or(DecodeError::MissingField("data"))?;
    let tick = current_tick(body)?;

    Ok(NetworkSnapshot {
        tick,
        ticks_in_epoch: u64_field(data, "ticksInCurrentEpoch").unwrap_or(0),
        empty_ticks_in_epoch: u64_field(data, "emptyTicksInCurrentEpoch").unwrap_or(0),
        tick_quality: data
            .get("epochTickQuality")
            .and_then(as_f64)
            .unwrap_or(0.0),
        circulating_supply: decimal_field(data, "circulatingSupply"),
        epoch: u64_field(data, "epoch")
            .and_then(|e| u32::try_from(e).ok())
            .unwrap_or(0),
        timestamp: Utc::now(),
        market_cap: decimal_field(data, "marketCap"),
        price: decimal_field(data, "price"),
        active_addresses: u64_field(data, "activeAddresses").unwrap_or(0),
        average_tick_time: None,
    })
}

/// `data.currentTick` from the latest-stats payload
pub fn current_tick(body: &Value) -> Result<u64, DecodeError> {
    let data = body.get("data").ok_or(DecodeError::MissingField("data"))?;
    let value = data
        .get("currentTick")
        .ok_or(DecodeError::MissingField("currentTick"))?;
    value.as_u64().ok_or_else(|| DecodeError::InvalidField {
        field: "currentTick",
        value: value.to_string(),
    })
}

/// `GET status` → `{ tick }`, also accepting `{ lastProcessedTick: { tickNumber } }`
pub fn status_tick(body: &Value) -> Result<u64, DecodeError> {
    if let Some(value) = body.get("tick") {
        return value.as_u64().ok_or_else(|| DecodeError::InvalidField {
            field: "tick",
            value: value.to_string(),
        });
    }
    body.pointer("/lastProcessedTick/tickNumber")
        .and_then(Value::as_u64)
        .ok_or(DecodeError::MissingField("tick"))
}

/// `GET balance/{id}` → `{ balance }` where balance is a number, a decimal
/// string, or a nested `{ balance }` object.
pub fn balance(body: &Value) -> Result<U256, DecodeError> {
    let mut value = body.get("balance").ok_or(DecodeError::MissingField("balance"))?;
    if let Some(inner) = value.get("balance") {
        value = inner;
    }
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(DecodeError::InvalidField {
                field: "balance",
                value: other.to_string(),
            })
        }
    };
    U256::from_dec_str(&text).map_err(|_| DecodeError::InvalidField {
        field: "balance",
        value: text,
    })
}

/// Tick-info payloads are either flat or wrapped in `tickInfo`
fn tick_info_body(body: &Value) -> &Value {
    body.get("tickInfo").unwrap_or(body)
}

pub fn tick_originator(body: &Value) -> Result<TickOriginator, DecodeError> {
    let info = tick_info_body(body);
    let originator = first_str(info, &["computorPublicId", "computor"])
        .ok_or(DecodeError::MissingField("computorPublicId"))?;
    Ok(TickOriginator {
        originator,
        timestamp: info.get("timestamp").and_then(timestamp).unwrap_or_else(Utc::now),
    })
}

/// Transactions embedded in a tick-info payload
pub fn tick_info_transactions(body: &Value, tick: u64) -> Result<Vec<TransactionRecord>, DecodeError> {
    let list = tick_info_body(body)
        .get("transactions")
        .ok_or(DecodeError::MissingField("transactions"))?;
    transactions(list, tick, None)
}

/// A JSON array of raw transactions. `kind` forces the kind when the endpoint
/// implies it (event feeds), otherwise it is inferred per record.
pub fn transactions(
    list: &Value,
    tick: u64,
    kind: Option<TxKind>,
) -> Result<Vec<TransactionRecord>, DecodeError> {
    let items = list
        .as_array()
        .or_else(|| list.get("transactions").and_then(Value::as_array))
        .or_else(|| list.get("events").and_then(Value::as_array))
        .ok_or_else(|| DecodeError::InvalidField {
            field: "transactions",
            value: truncate(list.to_string()),
        })?;

    Ok(items
        .iter()
        .enumerate()
        .map(|(index, raw)| transaction(raw, tick, index, kind))
        .collect())
}

fn transaction(raw: &Value, tick: u64, index: usize, kind: Option<TxKind>) -> TransactionRecord {
    let tx = raw.get("transaction").unwrap_or(raw);

    let source = first_str(tx, &["sourcePublicKey", "sourcePublicId", "sourceId"])
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());
    let target = first_str(
        tx,
        &["targetPublicKey", "targetPublicId", "targetId", "destId"],
    )
    .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

    let input_type = u64_field(tx, "inputType")
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or(0);
    let input = if input_type > 0 || tx.get("inputHex").is_some() {
        Some(ContractInput {
            input_type,
            input_size: u64_field(tx, "inputSize")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(0),
            input_hex: first_str(tx, &["inputHex"]).unwrap_or_default(),
        })
    } else {
        None
    };

    let tick = u64_field(tx, "tickNumber")
        .or_else(|| u64_field(raw, "tickNumber"))
        .unwrap_or(tick);

    TransactionRecord {
        id: first_str(tx, &["transactionId", "txId", "id", "hash"])
            .unwrap_or_else(|| format!("{}-{}", tick, index)),
        kind: kind.unwrap_or_else(|| classify(input_type, &target)),
        amount: tx
            .get("amount")
            .and_then(decimal)
            .unwrap_or_else(|| "0".to_string()),
        timestamp: tx
            .get("timestamp")
            .or_else(|| raw.get("timestamp"))
            .and_then(timestamp)
            .unwrap_or_else(Utc::now),
        status: match first_str(tx, &["status"]).as_deref() {
            Some("pending") => TxStatus::Pending,
            _ => TxStatus::Confirmed,
        },
        signature: first_str(tx, &["signatureHex", "signature"]),
        source,
        target,
        tick,
        input,
    }
}

/// Contract call when an input type is set; burn when the target is the
/// zero-prefixed burn identity; transfer otherwise.
pub fn classify(input_type: u16, target: &str) -> TxKind {
    if input_type > 0 {
        TxKind::ContractCall
    } else if target.starts_with(BURN_PREFIX) {
        TxKind::Burn
    } else {
        TxKind::Transfer
    }
}

/// `POST querySmartContract` → `{ responseData: base64 }` holding two LE u64
pub fn contract_stats(body: &Value) -> Result<ContractStats, DecodeError> {
    use base64::Engine;

    let encoded = body
        .get("responseData")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("responseData"))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| DecodeError::InvalidField {
            field: "responseData",
            value: e.to_string(),
        })?;
    if bytes.len() < 16 {
        return Err(DecodeError::InvalidField {
            field: "responseData",
            value: format!("{} bytes", bytes.len()),
        });
    }
    let mut echo = [0u8; 8];
    let mut burn = [0u8; 8];
    echo.copy_from_slice(&bytes[0..8]);
    burn.copy_from_slice(&bytes[8..16]);
    Ok(ContractStats {
        echo_calls: u64::from_le_bytes(echo),
        burn_calls: u64::from_le_bytes(burn),
    })
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
}

/// Unsigned integer carried as a JSON number or a decimal string
fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Keep the number's textual form so large values never pass through a float.
fn decimal(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn decimal_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(decimal)
        .unwrap_or_else(|| "0".to_string())
}

/// Unix seconds, Unix milliseconds, or RFC 3339
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => match s.parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                return DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
        },
        _ => return None,
    };
    // Anything below ~2001 in milliseconds is taken as seconds.
    let millis = if millis < 1_000_000_000_000 {
        millis.checked_mul(1000)?
    } else {
        millis
    };
    Utc.timestamp_millis_opt(millis).single()
}

fn truncate(mut s: String) -> String {
    if s.len() > 120 {
        let mut cut = 120;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_from_latest_stats() {
        let body = json!({
            "data": {
                "currentTick": 12345,
                "ticksInCurrentEpoch": 400,
                "emptyTicksInCurrentEpoch": 12,
                "epochTickQuality": 97.0,
                "circulatingSupply": "119999999999999",
                "epoch": 150,
                "timestamp": "1718000000",
                "marketCap": 240000000,
                "price": 0.000002,
                "activeAddresses": 500000
            }
        });
        let snapshot = network_snapshot(&body).unwrap();
        assert_eq!(snapshot.tick, 12345);
        assert_eq!(snapshot.ticks_in_epoch, 400);
        assert_eq!(snapshot.empty_ticks_in_epoch, 12);
        assert_eq!(snapshot.circulating_supply, "119999999999999");
        assert_eq!(snapshot.market_cap, "240000000");
        assert_eq!(snapshot.epoch, 150);
        assert_eq!(snapshot.active_addresses, 500000);
        assert!(snapshot.average_tick_time.is_none());
    }

    #[test]
    fn empty_body_is_a_decode_failure() {
        assert_eq!(
            network_snapshot(&json!({})),
            Err(DecodeError::MissingField("data"))
        );
        assert!(current_tick(&json!({"data": {"currentTick": "abc"}})).is_err());
        assert!(current_tick(&json!({"data": {"currentTick": -1}})).is_err());
    }

    #[test]
    fn status_tick_shapes() {
        assert_eq!(status_tick(&json!({"tick": 67890})), Ok(67890));
        assert_eq!(
            status_tick(&json!({"lastProcessedTick": {"tickNumber": 5}})),
            Ok(5)
        );
        assert!(status_tick(&json!({"tick": "x"})).is_err());
        assert!(status_tick(&json!({})).is_err());
    }

    #[test]
    fn balance_shapes() {
        assert_eq!(balance(&json!({"balance": 1000})), Ok(U256::from(1000u64)));
        assert_eq!(
            balance(&json!({"balance": "340282366920938463463374607431768211456"})),
            Ok(U256::from_dec_str("340282366920938463463374607431768211456").unwrap())
        );
        assert_eq!(
            balance(&json!({"balance": {"id": "X", "balance": "77"}})),
            Ok(U256::from(77u64))
        );
        assert!(balance(&json!({"balance": "-5"})).is_err());
        assert!(balance(&json!({"amount": 5})).is_err());
    }

    #[test]
    fn transaction_field_aliases() {
        let list = json!([
            {
                "transactionId": "tx-a",
                "sourcePublicKey": "SRC",
                "targetPublicKey": "DST",
                "amount": 150,
                "inputType": 0
            },
            {
                "id": "tx-b",
                "sourceId": "SRC2",
                "destId": "0000000BURN",
                "amount": "20"
            },
            {
                "sourcePublicId": "SRC3",
                "targetId": "CONTRACT",
                "inputType": 1,
                "inputSize": 8,
                "inputHex": "0100000000000000",
                "signatureHex": "ff00"
            }
        ]);
        let txs = transactions(&list, 900, None).unwrap();
        assert_eq!(txs.len(), 3);

        assert_eq!(txs[0].id, "tx-a");
        assert_eq!(txs[0].source, "SRC");
        assert_eq!(txs[0].amount, "150");
        assert_eq!(txs[0].kind, TxKind::Transfer);
        assert!(txs[0].input.is_none());

        assert_eq!(txs[1].target, "0000000BURN");
        assert_eq!(txs[1].kind, TxKind::Burn);

        assert_eq!(txs[2].id, "900-2");
        assert_eq!(txs[2].kind, TxKind::ContractCall);
        assert_eq!(txs[2].amount, "0");
        assert_eq!(txs[2].signature.as_deref(), Some("ff00"));
        let input = txs[2].input.as_ref().unwrap();
        assert_eq!(input.input_type, 1);
        assert_eq!(input.input_size, 8);
    }

    #[test]
    fn missing_addresses_become_unknown() {
        let txs = transactions(&json!([{ "amount": 1 }]), 7, Some(TxKind::Transfer)).unwrap();
        assert_eq!(txs[0].source, UNKNOWN_ADDRESS);
        assert_eq!(txs[0].target, UNKNOWN_ADDRESS);
        assert_eq!(txs[0].tick, 7);
        assert_eq!(txs[0].status, TxStatus::Confirmed);
    }

    #[test]
    fn pending_status_is_kept() {
        let txs = transactions(&json!([{ "status": "pending" }]), 7, None).unwrap();
        assert_eq!(txs[0].status, TxStatus::Pending);
    }

    #[test]
    fn non_array_transactions_rejected() {
        assert!(transactions(&json!({"foo": 1}), 1, None).is_err());
        assert_eq!(
            transactions(&json!({"transactions": []}), 1, None).unwrap(),
            vec![]
        );
    }

    #[test]
    fn originator_from_either_field() {
        let a = tick_originator(&json!({"computorPublicId": "COMP", "timestamp": 1718000000000i64}))
            .unwrap();
        assert_eq!(a.originator, "COMP");
        assert_eq!(a.timestamp.timestamp(), 1_718_000_000);

        let b = tick_originator(&json!({"tickInfo": {"computor": "OTHER"}})).unwrap();
        assert_eq!(b.originator, "OTHER");

        assert!(tick_originator(&json!({"timestamp": 1})).is_err());
    }

    #[test]
    fn contract_stats_counters() {
        use base64::Engine;
        let mut raw = Vec::new();
        raw.extend_from_slice(&5u64.to_le_bytes());
        raw.extend_from_slice(&3u64.to_le_bytes());
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);

        let stats = contract_stats(&json!({ "responseData": encoded })).unwrap();
        assert_eq!(stats, ContractStats { echo_calls: 5, burn_calls: 3 });
        assert!(contract_stats(&json!({ "responseData": "AAAA" })).is_err());
    }
}
