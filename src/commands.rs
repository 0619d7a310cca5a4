use std::fmt;
use std::sync::Arc;

use crate::api::LedgerClient;
use crate::error::{CommandError, TrackingError, WalletError};
use crate::models::TransactionResult;
use crate::state::{AppState, ToastKind};
use crate::tracking::{short, TrackingSession};
use crate::wallet::WalletService;

/// Seed phrase typed on the command line; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct SeedPhrase(String);

impl SeedPhrase {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SeedPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SeedPhrase(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Seed(SeedPhrase),
    Send { target: String, amount: String },
    Echo(String),
    Burn(String),
    /// `None` means the active wallet
    Track(Option<String>),
    Untrack(Option<String>),
    Tick(u64),
    /// Look up any address
    Address(String),
}

pub const HELP: &[(&str, &str)] = &[
    ("seed <phrase>", "load a wallet from a 55-letter seed"),
    ("send <address> <amount>", "transfer QU"),
    ("echo <amount>", "call the contract's Echo procedure"),
    ("burn <amount>", "call the contract's Burn procedure"),
    ("track [address]", "watch an address (default: wallet)"),
    ("untrack [address]", "stop watching an address"),
    ("tick <n>", "load the transactions of one tick"),
    ("address <id>", "show the balance and transfers of an address"),
];

/// Transfers loaded by the `address` command
const ADDRESS_TRANSFER_LIMIT: usize = 20;

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let name = words.next().ok_or(CommandError::Empty)?;
    let args: Vec<&str> = words.collect();

    match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("seed", [seed]) => Ok(Command::Seed(SeedPhrase(seed.to_string()))),
        ("seed", _) => Err(CommandError::Usage("seed <phrase>")),
        ("send", [target, amount]) => Ok(Command::Send {
            target: target.to_string(),
            amount: amount.to_string(),
        }),
        ("send", _) => Err(CommandError::Usage("send <address> <amount>")),
        ("echo", [amount]) => Ok(Command::Echo(amount.to_string())),
        ("echo", _) => Err(CommandError::Usage("echo <amount>")),
        ("burn", [amount]) => Ok(Command::Burn(amount.to_string())),
        ("burn", _) => Err(CommandError::Usage("burn <amount>")),
        ("track", []) => Ok(Command::Track(None)),
        ("track", [address]) => Ok(Command::Track(Some(address.to_string()))),
        ("track", _) => Err(CommandError::Usage("track [address]")),
        ("untrack", []) => Ok(Command::Untrack(None)),
        ("untrack", [address]) => Ok(Command::Untrack(Some(address.to_string()))),
        ("untrack", _) => Err(CommandError::Usage("untrack [address]")),
        ("tick", [n]) => n
            .parse()
            .map(Command::Tick)
            .map_err(|_| CommandError::Usage("tick <n>")),
        ("tick", _) => Err(CommandError::Usage("tick <n>")),
        ("address", [address]) => Ok(Command::Address(address.to_string())),
        ("address", _) => Err(CommandError::Usage("address <id>")),
        _ => Err(CommandError::Unknown(name.to_string())),
    }
}

/// Runs parsed commands against the wallet, the tracker and the client.
/// Every outcome ends up as a toast and a log line.
pub struct Dispatcher {
    pub state: Arc<AppState>,
    pub wallet: Arc<WalletService>,
    pub tracking: Arc<TrackingSession>,
    pub client: Arc<LedgerClient>,
    pub page_size: usize,
}

impl Dispatcher {
    pub async fn execute(&self, command: Command) {
        match command {
            Command::Seed(seed) => match self.wallet.create_wallet(seed.expose()) {
                Ok(address) => {
                    self.succeed("Wallet ready", short(&address));
                    if let Err(e) = self.wallet.refresh_balance().await {
                        self.state.log_warn(format!("Balance refresh failed: {}", e));
                    }
                }
                Err(e) => self.fail("Wallet", e.to_string()),
            },
            Command::Send { target, amount } => {
                let result = self.wallet.transfer(&target, &amount).await;
                self.report("Transfer", result);
            }
            Command::Echo(amount) => {
                let result = self.wallet.execute_echo(&amount).await;
                self.report("Echo", result);
            }
            Command::Burn(amount) => {
                let result = self.wallet.execute_burn(&amount).await;
                self.report("Burn", result);
            }
            Command::Track(address) => match self.resolve(address) {
                Some(address) => match self.tracking.track(&address) {
                    Ok(()) => self.succeed("Tracking", short(&address)),
                    Err(e) => self.fail("Tracking", tracking_message(&e)),
                },
                None => self.fail("Tracking", WalletError::NoIdentity.to_string()),
            },
            Command::Untrack(address) => match self.resolve(address) {
                Some(address) => match self.tracking.untrack(&address) {
                    Ok(()) => self.succeed("Untracked", short(&address)),
                    Err(e) => self.fail("Untracking", tracking_message(&e)),
                },
                None => self.fail("Untracking", WalletError::NoIdentity.to_string()),
            },
            Command::Tick(tick) => {
                let txs = self.client.fetch_tick_events(tick, self.page_size).await;
                self.state
                    .log_info(format!("Tick {}: {} transactions", tick, txs.len()));
                self.state.set_explored_tick(tick, txs);
            }
            Command::Address(address) => {
                let (balance, transfers) = tokio::join!(
                    self.client.fetch_balance(&address),
                    self.client
                        .fetch_address_transfers(&address, ADDRESS_TRANSFER_LIMIT),
                );
                self.state.log_info(format!(
                    "Address {}: {}, {} transfers",
                    short(&address),
                    balance,
                    transfers.len()
                ));
                self.state
                    .update_address_detail(&address, balance, Some(transfers));
                self.state.set_browsed_address(Some(address));
            }
        }
    }

    fn resolve(&self, address: Option<String>) -> Option<String> {
        address.or_else(|| self.wallet.address())
    }

    fn report(&self, what: &str, result: Result<TransactionResult, WalletError>) {
        match result {
            Ok(r) if r.success => self.succeed(what, r.message),
            Ok(r) => self.fail(what, r.message),
            Err(e) => self.fail(what, e.to_string()),
        }
    }

    fn succeed(&self, title: &str, message: impl Into<String>) {
        let message = message.into();
        self.state.log_info(format!("{}: {}", title, message));
        self.state.push_toast(ToastKind::Success, title, message);
    }

    fn fail(&self, title: &str, message: impl Into<String>) {
        let message = message.into();
        self.state.log_error(format!("{}: {}", title, message));
        self.state.push_toast(ToastKind::Failure, title, message);
    }
}

fn tracking_message(error: &TrackingError) -> String {
    match error {
        TrackingError::PermissionDenied => {
            "notifications are denied; start with --notifications granted".to_string()
        }
        other => other.to_string(),
    }
}
