mod api;
mod commands;
mod config;
mod decode;
mod error;
mod events;
mod history;
mod models;
mod notify;
mod poller;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod tracking;
mod ui;
mod wallet;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::api::LedgerClient;
use crate::commands::Dispatcher;
use crate::config::{default_data_dir, Endpoints, PermissionSetting, Settings, TRACKED_ADDRESSES_KEY};
use crate::events::{poll_event, InputEvent};
use crate::notify::{AlertSink, Bell, ConfiguredPermission, Permission, TerminalNotification, ToastSink};
use crate::poller::{PollerConfig, PollingOrchestrator};
use crate::state::{AppState, ConnectionState};
use crate::store::{LocalStore, TrackedAddresses};
use crate::tracking::{start_tracker, TrackingSession};
use crate::wallet::{DevSigner, WalletService};

const REDRAW_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "qubic-dash")]
#[command(author = "Qubic Dash")]
#[command(version = "0.1.0")]
#[command(about = "Terminal dashboard and explorer for the Qubic network", long_about = None)]
struct Args {
    /// Base URL of the Qubic RPC node
    #[arg(short, long, env = "QUBIC_NODE_URL", default_value = "https://rpc.qubic.org")]
    node_url: String,

    /// Base URL of the transactions/events service
    #[arg(long, env = "QUBIC_TX_URL", default_value = "https://api.qubic.org")]
    transactions_url: String,

    /// WebSocket URL of the address tracker. Without it, tracking is local only.
    #[arg(long, env = "QUBIC_TRACKER_URL")]
    tracker_url: Option<String>,

    /// Snapshot refresh interval
    #[arg(long, env = "QUBIC_FAST_INTERVAL", default_value = "1s", value_parser = humantime::parse_duration)]
    fast_interval: Duration,

    /// Full refresh interval
    #[arg(long, env = "QUBIC_SLOW_INTERVAL", default_value = "10s", value_parser = humantime::parse_duration)]
    slow_interval: Duration,

    /// Number of recent ticks kept in history
    #[arg(long, default_value_t = history::DEFAULT_HISTORY_BOUND)]
    history_bound: usize,

    /// Transactions shown per page
    #[arg(long, default_value = "10")]
    page_size: usize,

    /// Index of the contract behind the echo/burn commands
    #[arg(long, env = "QUBIC_CONTRACT_INDEX", default_value = "12")]
    contract_index: u8,

    /// Directory for persisted state
    #[arg(long, env = "QUBIC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Desktop notification permission
    #[arg(long, value_enum, default_value = "ask")]
    notifications: PermissionSetting,

    /// TOML file overriding endpoint paths
    #[arg(long)]
    endpoints: Option<PathBuf>,

    /// Tick rate in milliseconds for UI refresh
    #[arg(short, long, default_value = "100")]
    tick_rate: u64,
}

impl Args {
    fn settings(&self) -> Result<Settings> {
        let endpoints = match &self.endpoints {
            Some(path) => Endpoints::load(path)?,
            None => Endpoints::default(),
        };
        Ok(Settings {
            node_url: self.node_url.clone(),
            transactions_url: self.transactions_url.clone(),
            tracker_url: self.tracker_url.clone().filter(|u| !u.trim().is_empty()),
            endpoints,
            fast_interval: self.fast_interval,
            slow_interval: self.slow_interval,
            history_bound: self.history_bound.max(1),
            page_size: self.page_size.max(1),
            contract_index: self.contract_index,
            data_dir: self.data_dir.clone().unwrap_or_else(default_data_dir),
            notifications: self.notifications,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    let settings = args.settings()?;

    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    // Create application state
    let state = Arc::new(AppState::new(settings.node_url.clone(), settings.history_bound));
    state.log_info("Qubic Dash starting...");
    state.log_info(format!("Node at {}", settings.node_url));

    let store = LocalStore::open(settings.storage_dir()).context("opening local storage")?;
    let client = Arc::new(LedgerClient::new(
        &settings.node_url,
        &settings.transactions_url,
        settings.endpoints.clone(),
    ));

    let permission = Arc::new(ConfiguredPermission::new(Permission::from(settings.notifications)));
    let sinks: Vec<Arc<dyn AlertSink>> = vec![
        Arc::new(ToastSink::new(Arc::clone(&state))),
        Arc::new(TerminalNotification::new(permission.clone())),
        Arc::new(Bell),
    ];

    let cancel = CancellationToken::new();
    let (outbound_tx, outbound_rx) = match settings.tracker_url {
        Some(_) => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };

    let tracking = Arc::new(TrackingSession::new(
        TrackedAddresses::new(store.clone()),
        Arc::clone(&state),
        client.clone(),
        permission,
        sinks,
        outbound_tx,
    ));
    tracking.restore();

    let _tracker_handle = match (&settings.tracker_url, outbound_rx) {
        (Some(url), Some(rx)) => {
            state.log_info(format!("Tracker at {}", url));
            Some(start_tracker(url.clone(), Arc::clone(&tracking), rx, cancel.clone()))
        }
        _ => {
            state.set_connection_state(ConnectionState::Disabled);
            state.log_warn("No tracker URL; balance alerts come from polling");
            None
        }
    };

    // Another writer changed the tracked set: reload it
    let mut changes = BroadcastStream::new(store.subscribe());
    let resync_tracking = Arc::clone(&tracking);
    let resync_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = resync_cancel.cancelled() => break,
                change = changes.next() => match change {
                    Some(Ok(change)) if change.key == TRACKED_ADDRESSES_KEY => resync_tracking.resync(),
                    Some(Ok(_)) => {}
                    // lagged: a reload covers whatever was missed
                    Some(Err(_)) => resync_tracking.resync(),
                    None => break,
                },
            }
        }
    });

    let poller = PollingOrchestrator::start(
        client.clone(),
        Arc::clone(&state),
        Arc::clone(&tracking),
        PollerConfig {
            fast_interval: settings.fast_interval,
            slow_interval: settings.slow_interval,
            page_size: settings.page_size,
            contract_index: settings.contract_index,
        },
    );

    let wallet = Arc::new(WalletService::new(
        client.clone(),
        Arc::new(DevSigner),
        Arc::clone(&state),
        settings.contract_index,
    ));
    let dispatcher = Arc::new(Dispatcher {
        state: Arc::clone(&state),
        wallet,
        tracking,
        client,
        page_size: settings.page_size,
    });

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    // Run the main event loop
    let result = run_app(&mut terminal, state, &poller, dispatcher, &args).await;

    poller.shutdown();
    cancel.cancel();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: Arc<AppState>,
    poller: &PollingOrchestrator,
    dispatcher: Arc<Dispatcher>,
    args: &Args,
) -> Result<()> {
    let tick_duration = Duration::from_millis(args.tick_rate);
    let mut revisions = state.subscribe();
    let mut last_draw: Option<Instant> = None;
    let mut input_seen = true;

    loop {
        // Redraw on state changes, input, or once a second for the clock
        let changed = revisions.has_changed().unwrap_or(true);
        let stale = last_draw.map_or(true, |t| t.elapsed() >= REDRAW_INTERVAL);
        if changed || stale || input_seen {
            revisions.borrow_and_update();
            state.expire_toasts();
            terminal.draw(|f| ui::draw(f, &state))?;
            last_draw = Some(Instant::now());
        }

        let command_mode = state.command.read().active;
        // crossterm polling blocks; keep it off the runtime's workers
        let event = tokio::task::block_in_place(|| poll_event(tick_duration, command_mode));

        input_seen = !matches!(event, None | Some(InputEvent::Tick));
        if let Some(event) = event {
            let show_help = *state.show_help.read();

            if command_mode {
                match event {
                    InputEvent::Quit => break,
                    InputEvent::CloseOverlay => {
                        state.close_command();
                    }
                    InputEvent::Input(c) => state.command.write().buffer.push(c),
                    InputEvent::Backspace => {
                        state.command.write().buffer.pop();
                    }
                    InputEvent::Submit => {
                        let line = state.close_command();
                        match commands::parse(&line) {
                            Ok(command) => {
                                let dispatcher = Arc::clone(&dispatcher);
                                tokio::spawn(async move { dispatcher.execute(command).await });
                            }
                            Err(error::CommandError::Empty) => {}
                            Err(e) => state.log_warn(e.to_string()),
                        }
                    }
                    _ => {}
                }
                continue;
            }

            match event {
                InputEvent::Quit => {
                    state.log_info("Shutting down...");
                    break;
                }
                InputEvent::CloseOverlay if show_help => {
                    state.toggle_help();
                }
                InputEvent::ToggleHelp => {
                    state.toggle_help();
                }
                InputEvent::NextTab if !show_help => {
                    state.next_tab();
                }
                InputEvent::PrevTab if !show_help => {
                    state.prev_tab();
                }
                InputEvent::ScrollUp if !show_help => {
                    state.scroll_up();
                }
                InputEvent::ScrollDown if !show_help => {
                    state.scroll_down();
                }
                InputEvent::Refresh if !show_help => {
                    poller.refresh();
                }
                InputEvent::OpenCommand if !show_help => {
                    state.open_command();
                }
                InputEvent::Tick => {}
                _ => {
                    // Close help on any key if showing
                    if show_help {
                        state.toggle_help();
                    }
                }
            }
        }
    }

    Ok(())
}
