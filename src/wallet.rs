//! Wallet: identity derivation, signing and the write paths that broadcast
//! signed transactions.
//!
//! The signer is a trait so the dev scheme below can be replaced by the
//! network's native one without touching [`WalletService`].

use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::api::LedgerClient;
use crate::error::WalletError;
use crate::models::{Balance, IdentityPackage, TransactionResult};
use crate::state::AppState;

pub const SEED_LENGTH: usize = 55;
/// Ticks ahead of the current one a new transaction targets
pub const TARGET_TICK_OFFSET: u64 = 2;
pub const PROC_ECHO: u16 = 1;
pub const PROC_BURN: u16 = 2;

/// A transfer before signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransfer {
    pub source: [u8; 32],
    pub destination: [u8; 32],
    pub amount: i64,
    pub tick: u32,
    pub input_type: u16,
    pub input: Vec<u8>,
}

impl UnsignedTransfer {
    /// Bytes covered by the signature
    pub fn payload(&self) -> Result<Vec<u8>, WalletError> {
        let input_size = u16::try_from(self.input.len())
            .map_err(|_| WalletError::Signing("contract input too large".to_string()))?;

        let mut out = Vec::with_capacity(80 + self.input.len() + 64);
        out.extend_from_slice(&self.source);
        out.extend_from_slice(&self.destination);
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&self.input_type.to_le_bytes());
        out.extend_from_slice(&input_size.to_le_bytes());
        out.extend_from_slice(&self.input);
        Ok(out)
    }
}

pub trait LedgerSigner: Send + Sync {
    fn create_identity(&self, seed: &str) -> Result<IdentityPackage, WalletError>;
    fn public_key_from_address(&self, address: &str) -> Result<[u8; 32], WalletError>;
    /// Payload followed by the signature, ready to broadcast
    fn sign_transfer(
        &self,
        identity: &IdentityPackage,
        transfer: &UnsignedTransfer,
    ) -> Result<Vec<u8>, WalletError>;
}

/// ed25519 over a SHA-256 of the seed. Addresses are the uppercase hex of
/// the public key.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevSigner;

impl DevSigner {
    fn signing_key(identity: &IdentityPackage) -> Result<SigningKey, WalletError> {
        let bytes: [u8; 32] = identity
            .private_key
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::Signing("private key must be 32 bytes".to_string()))?;
        Ok(SigningKey::from_bytes(&bytes))
    }
}

impl LedgerSigner for DevSigner {
    fn create_identity(&self, seed: &str) -> Result<IdentityPackage, WalletError> {
        if seed.len() != SEED_LENGTH {
            return Err(WalletError::InvalidSeed("must be 55 characters"));
        }
        if !seed.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(WalletError::InvalidSeed("only lowercase a-z allowed"));
        }

        let private: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
        let signing = SigningKey::from_bytes(&private);
        let public_key = signing.verifying_key().to_bytes();

        Ok(IdentityPackage {
            private_key: private.to_vec(),
            public_key,
            address: hex::encode_upper(public_key),
        })
    }

    fn public_key_from_address(&self, address: &str) -> Result<[u8; 32], WalletError> {
        let bytes = hex::decode(address.trim())
            .map_err(|_| WalletError::InvalidAddress(address.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| WalletError::InvalidAddress(address.to_string()))
    }

    fn sign_transfer(
        &self,
        identity: &IdentityPackage,
        transfer: &UnsignedTransfer,
    ) -> Result<Vec<u8>, WalletError> {
        let key = Self::signing_key(identity)?;
        if key.verifying_key().to_bytes() != transfer.source {
            return Err(WalletError::Signing(
                "source does not match the active identity".to_string(),
            ));
        }
        let mut signed = transfer.payload()?;
        let signature = key.sign(&signed);
        signed.extend_from_slice(&signature.to_bytes());
        Ok(signed)
    }
}

/// Whole non-negative number that fits the wire amount
pub fn parse_amount(raw: &str) -> Result<i64, WalletError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WalletError::InvalidAmount(raw.to_string()));
    }
    raw.parse::<i64>()
        .map_err(|_| WalletError::InvalidAmount(raw.to_string()))
}

/// Public key of a contract: zero bytes with the index in the first one
pub fn contract_key(contract_index: u8) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[0] = contract_index;
    key
}

pub struct WalletService {
    client: Arc<LedgerClient>,
    signer: Arc<dyn LedgerSigner>,
    identity: RwLock<Option<IdentityPackage>>,
    state: Arc<AppState>,
    contract_index: u8,
}

impl WalletService {
    pub fn new(
        client: Arc<LedgerClient>,
        signer: Arc<dyn LedgerSigner>,
        state: Arc<AppState>,
        contract_index: u8,
    ) -> Self {
        Self {
            client,
            signer,
            identity: RwLock::new(None),
            state,
            contract_index,
        }
    }

    pub fn address(&self) -> Option<String> {
        self.identity.read().as_ref().map(|i| i.address.clone())
    }

    /// Derive and activate an identity. Returns its address.
    pub fn create_wallet(&self, seed: &str) -> Result<String, WalletError> {
        let identity = self.signer.create_identity(seed.trim())?;
        let address = identity.address.clone();
        *self.identity.write() = Some(identity);
        self.state.set_wallet_address(Some(address.clone()));
        Ok(address)
    }

    pub async fn refresh_balance(&self) -> Result<Balance, WalletError> {
        let address = self.address().ok_or(WalletError::NoIdentity)?;
        let balance = self.client.fetch_balance(&address).await;
        self.state.set_wallet_balance(balance);
        Ok(balance)
    }

    pub async fn transfer(
        &self,
        target: &str,
        amount: &str,
    ) -> Result<TransactionResult, WalletError> {
        let amount = parse_amount(amount)?;
        let destination = self.signer.public_key_from_address(target)?;
        self.submit(destination, amount, 0).await
    }

    pub async fn execute_echo(&self, amount: &str) -> Result<TransactionResult, WalletError> {
        let amount = parse_amount(amount)?;
        self.submit(contract_key(self.contract_index), amount, PROC_ECHO)
            .await
    }

    pub async fn execute_burn(&self, amount: &str) -> Result<TransactionResult, WalletError> {
        let amount = parse_amount(amount)?;
        self.submit(contract_key(self.contract_index), amount, PROC_BURN)
            .await
    }

    async fn submit(
        &self,
        destination: [u8; 32],
        amount: i64,
        input_type: u16,
    ) -> Result<TransactionResult, WalletError> {
        let identity = self.identity.read().clone().ok_or(WalletError::NoIdentity)?;

        self.state.set_wallet_busy(true);
        let result = self
            .sign_and_broadcast(&identity, destination, amount, input_type)
            .await;
        self.state.set_wallet_busy(false);
        result
    }

    async fn sign_and_broadcast(
        &self,
        identity: &IdentityPackage,
        destination: [u8; 32],
        amount: i64,
        input_type: u16,
    ) -> Result<TransactionResult, WalletError> {
        let target_tick = self.client.fetch_current_tick().await + TARGET_TICK_OFFSET;
        let tick = u32::try_from(target_tick)
            .map_err(|_| WalletError::Signing(format!("tick {} out of range", target_tick)))?;

        let transfer = UnsignedTransfer {
            source: identity.public_key,
            destination,
            amount,
            tick,
            input_type,
            input: Vec::new(),
        };
        let signed = self.signer.sign_transfer(identity, &transfer)?;
        Ok(self.client.broadcast(&signed, target_tick).await)
    }
}
