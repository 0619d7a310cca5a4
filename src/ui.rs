use std::sync::Arc;
use std::time::Duration;

use num_format::{Locale, ToFormattedString};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Sparkline, Table, Tabs},
    Frame,
};

use crate::commands::HELP;
use crate::models::{TransactionRecord, TxKind};
use crate::state::{AppState, ConnectionState, LogLevel, ToastKind};
use crate::tracking::{short, PushState, TrackState};

/// Tab titles
const TAB_TITLES: [&str; 5] = ["📊 Overview", "⏱ Ticks", "💸 Transactions", "👛 Wallet", "📜 Logs"];

/// Format a large number with commas
fn format_number(n: u64) -> String {
    n.to_formatted_string(&Locale::en)
}

/// Format duration as human-readable string
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Command line as displayed; the seed argument is masked.
fn masked_command(buffer: &str) -> String {
    let trimmed = buffer.trim_start();
    let lead = buffer.len() - trimmed.len();
    match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("seed ") => {
            let hidden = trimmed[5..].chars().count();
            format!("{}{}", &buffer[..lead + 5], "•".repeat(hidden))
        }
        _ => buffer.to_string(),
    }
}

fn header_style() -> Style {
    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
}

fn panel(title: &str) -> Block<'_> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
}

/// Main UI rendering function
pub fn draw(f: &mut Frame, state: &Arc<AppState>) {
    let size = f.area();

    // Main layout: header, tabs, content, footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(3),  // Tabs
            Constraint::Min(10),    // Content
            Constraint::Length(3),  // Footer / command line
        ])
        .split(size);

    draw_header(f, state, chunks[0]);
    draw_tabs(f, state, chunks[1]);
    draw_content(f, state, chunks[2]);
    draw_footer(f, state, chunks[3]);
    draw_toasts(f, state, chunks[2]);

    if *state.show_help.read() {
        draw_help_overlay(f);
    }
}

/// Draw the header with tracker status and live tick
fn draw_header(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let conn_state = state.connection_state.read().clone();
    let (status_color, status_icon) = match &conn_state {
        ConnectionState::Connected => (Color::Green, "●"),
        ConnectionState::Connecting | ConnectionState::Reconnecting => (Color::Yellow, "◐"),
        ConnectionState::Disconnected => (Color::Red, "○"),
        ConnectionState::Disabled => (Color::Gray, "○"),
    };

    let tick = state.current_tick().unwrap_or_default();
    let epoch = state.snapshot.read().as_ref().map(|s| s.epoch).unwrap_or_default();

    let header_text = vec![
        Span::styled("◆ Qubic Dash ", header_style()),
        Span::styled(status_icon, Style::default().fg(status_color)),
        Span::raw(" "),
        Span::styled(format!("{}", conn_state), Style::default().fg(status_color)),
        Span::raw(" │ "),
        Span::styled("Tick: ", Style::default().fg(Color::Gray)),
        Span::styled(format_number(tick), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::raw(" │ "),
        Span::styled("Epoch: ", Style::default().fg(Color::Gray)),
        Span::styled(epoch.to_string(), Style::default().fg(Color::White)),
        Span::raw(" │ "),
        Span::styled("Uptime: ", Style::default().fg(Color::Gray)),
        Span::styled(format_duration(state.uptime()), Style::default().fg(Color::White)),
    ];

    let header = Paragraph::new(Line::from(header_text)).block(panel(""));
    f.render_widget(header, area);
}

/// Draw the tab bar
fn draw_tabs(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let selected = *state.selected_tab.read();
    let titles: Vec<Line> = TAB_TITLES.iter().map(|t| Line::from(*t)).collect();

    let tabs = Tabs::new(titles)
        .block(panel(""))
        .select(selected)
        .style(Style::default().fg(Color::Gray))
        .highlight_style(header_style())
        .divider(symbols::line::VERTICAL);

    f.render_widget(tabs, area);
}

/// Draw the main content based on selected tab
fn draw_content(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    match *state.selected_tab.read() {
        0 => draw_overview_tab(f, state, area),
        1 => draw_ticks_tab(f, state, area),
        2 => draw_transactions_tab(f, state, area),
        3 => draw_wallet_tab(f, state, area),
        4 => draw_logs_tab(f, state, area),
        _ => {}
    }
}

fn draw_overview_tab(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(12), Constraint::Min(5)])
        .split(chunks[0]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(5)])
        .split(chunks[1]);

    draw_network_stats(f, state, left[0]);
    draw_tick_sparkline(f, state, left[1]);
    draw_contract_stats(f, state, right[0]);
    draw_recent_ticks_preview(f, state, right[1]);
}

fn stat_line<'a>(label: &'a str, value: String, color: Color) -> Line<'a> {
    Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn draw_network_stats(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let snapshot = state.snapshot.read().clone();
    let polls = state.poll_count.load(std::sync::atomic::Ordering::Relaxed);

    let lines = match snapshot {
        Some(s) => vec![
            stat_line("Node: ", state.node_url.clone(), Color::White),
            stat_line("Tick: ", format_number(s.tick), Color::Cyan),
            stat_line("Ticks in epoch: ", format_number(s.ticks_in_epoch), Color::White),
            stat_line("Empty ticks: ", format_number(s.empty_ticks_in_epoch), Color::Yellow),
            stat_line("Tick quality: ", format!("{:.2}%", s.tick_quality), Color::Green),
            stat_line(
                "Avg tick time: ",
                s.average_tick_time
                    .map(|d| format!("{:.2}s", d.as_secs_f64()))
                    .unwrap_or_else(|| "—".to_string()),
                Color::Magenta,
            ),
            stat_line("Supply: ", s.circulating_supply, Color::White),
            stat_line("Price / cap: ", format!("{} / {}", s.price, s.market_cap), Color::White),
            stat_line("Active addresses: ", format_number(s.active_addresses), Color::White),
            stat_line("Polls: ", format_number(polls), Color::DarkGray),
        ],
        None => vec![Line::from(Span::styled(
            "Waiting for the first snapshot...",
            Style::default().fg(Color::DarkGray),
        ))],
    };

    f.render_widget(Paragraph::new(lines).block(panel(" Network ")), area);
}

/// Gap between consecutive observed ticks, oldest first
fn draw_tick_sparkline(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let entries = state.history_entries();
    let data: Vec<u64> = entries
        .windows(2)
        .rev()
        .map(|pair| {
            let ms = (pair[0].observed_at - pair[1].observed_at).num_milliseconds().max(0) as u64;
            let ticks = pair[0].tick.saturating_sub(pair[1].tick).max(1);
            ms / ticks
        })
        .collect();

    let sparkline = Sparkline::default()
        .block(panel(" Tick time (ms) "))
        .data(&data)
        .style(Style::default().fg(Color::Magenta));

    f.render_widget(sparkline, area);
}

fn draw_contract_stats(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let lines = match *state.contract_stats.read() {
        Some(stats) => vec![
            stat_line("Echo calls: ", format_number(stats.echo_calls), Color::Cyan),
            stat_line("Burn calls: ", format_number(stats.burn_calls), Color::Red),
        ],
        None => vec![Line::from(Span::styled("no data", Style::default().fg(Color::DarkGray)))],
    };
    f.render_widget(Paragraph::new(lines).block(panel(" Contract ")), area);
}

fn draw_recent_ticks_preview(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    if state.history.read().is_empty() {
        empty_panel(f, " Recent Ticks ".to_string(), area);
        return;
    }

    let items: Vec<ListItem> = state
        .history_entries()
        .iter()
        .take(10)
        .map(|entry| {
            ListItem::new(Line::from(vec![
                Span::styled(format_number(entry.tick), Style::default().fg(Color::White)),
                Span::raw(" │ "),
                Span::styled(
                    entry.observed_at.format("%H:%M:%S").to_string(),
                    Style::default().fg(Color::Gray),
                ),
            ]))
        })
        .collect();

    f.render_widget(List::new(items).block(panel(" Recent Ticks ")), area);
}

fn draw_ticks_tab(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let offset = *state.scroll_offset.read();
    let header = Row::new(vec![
        Cell::from("Tick").style(header_style()),
        Cell::from("Observed").style(header_style()),
        Cell::from("Originator").style(header_style()),
    ]);

    let rows: Vec<Row> = state
        .history_entries()
        .into_iter()
        .skip(offset)
        .map(|entry| {
            Row::new(vec![
                Cell::from(format_number(entry.tick)).style(Style::default().fg(Color::White)),
                Cell::from(entry.observed_at.format("%H:%M:%S%.3f").to_string())
                    .style(Style::default().fg(Color::Gray)),
                Cell::from(entry.originator.unwrap_or_else(|| "…".to_string()))
                    .style(Style::default().fg(Color::Yellow)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [Constraint::Length(15), Constraint::Length(15), Constraint::Min(20)],
    )
    .header(header)
    .block(panel("").title(format!(" Tick History ({}) ", state.history.read().len())));

    f.render_widget(table, area);
}

fn kind_color(kind: TxKind) -> Color {
    match kind {
        TxKind::Transfer => Color::Cyan,
        TxKind::ContractCall => Color::Magenta,
        TxKind::Burn => Color::Red,
    }
}

fn transaction_table<'a>(txs: &[TransactionRecord], title: String, offset: usize) -> Table<'a> {
    let header = Row::new(vec![
        Cell::from("Tick").style(header_style()),
        Cell::from("From").style(header_style()),
        Cell::from("To").style(header_style()),
        Cell::from("Amount").style(header_style()),
        Cell::from("Kind").style(header_style()),
        Cell::from("Status").style(header_style()),
    ]);

    let rows: Vec<Row> = txs
        .iter()
        .skip(offset)
        .map(|tx| {
            Row::new(vec![
                Cell::from(format_number(tx.tick)).style(Style::default().fg(Color::White)),
                Cell::from(short(&tx.source)).style(Style::default().fg(Color::Gray)),
                Cell::from(short(&tx.target)).style(Style::default().fg(Color::Gray)),
                Cell::from(format!("{} QU", tx.amount)).style(Style::default().fg(Color::Green)),
                Cell::from(tx.kind.to_string()).style(Style::default().fg(kind_color(tx.kind))),
                Cell::from(tx.status.to_string()).style(Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();

    Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(panel("").title(title))
}

fn empty_panel(f: &mut Frame, title: String, area: Rect) {
    let text = Paragraph::new(Span::styled("no data", Style::default().fg(Color::DarkGray)))
        .alignment(Alignment::Center)
        .block(panel("").title(title));
    f.render_widget(text, area);
}

fn draw_transactions_tab(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let offset = *state.scroll_offset.read();
    let explored = state.explored_tick.read().clone();

    let chunks = if explored.is_some() {
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area)
    } else {
        Layout::default()
            .constraints([Constraint::Min(0)])
            .split(area)
    };

    let latest = state.latest_transactions.read().clone();
    if latest.is_empty() {
        empty_panel(f, " Latest Transactions ".to_string(), chunks[0]);
    } else {
        f.render_widget(
            transaction_table(&latest, " Latest Transactions ".to_string(), offset),
            chunks[0],
        );
    }

    if let Some((tick, txs)) = explored {
        let title = format!(" Tick {} ", format_number(tick));
        if txs.is_empty() {
            empty_panel(f, title, chunks[1]);
        } else {
            f.render_widget(transaction_table(&txs, title, 0), chunks[1]);
        }
    }
}

fn draw_wallet_tab(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Length(8), Constraint::Min(5)])
        .split(area);

    let wallet = state.wallet.read().clone();
    let lines = match &wallet.address {
        Some(address) => vec![
            stat_line("Address: ", address.clone(), Color::White),
            stat_line("Balance: ", wallet.balance.to_string(), Color::Green),
            stat_line(
                "Status: ",
                (if wallet.busy { "broadcasting..." } else { "idle" }).to_string(),
                if wallet.busy { Color::Yellow } else { Color::DarkGray },
            ),
        ],
        None => vec![Line::from(Span::styled(
            "No wallet. Type :seed <phrase> to load one.",
            Style::default().fg(Color::DarkGray),
        ))],
    };
    f.render_widget(Paragraph::new(lines).block(panel(" Wallet ")), chunks[0]);

    let tracked = state.tracked.read().clone();
    let details = state.address_details.read().clone();

    let header = Row::new(vec![
        Cell::from("Address").style(header_style()),
        Cell::from("State").style(header_style()),
        Cell::from("Push").style(header_style()),
        Cell::from("Balance").style(header_style()),
    ]);
    let rows: Vec<Row> = tracked
        .iter()
        .map(|view| {
            let state_text = match view.state {
                TrackState::Untracked => "untracked",
                TrackState::Pending => "pending",
                TrackState::Tracked => "tracked",
            };
            let (push_text, push_color) = match &view.push {
                PushState::Off => ("local".to_string(), Color::DarkGray),
                PushState::Awaiting => ("awaiting".to_string(), Color::Yellow),
                PushState::Confirmed => ("live".to_string(), Color::Green),
                PushState::Failed(reason) => (format!("failed: {}", reason), Color::Red),
            };
            let balance = details
                .get(&view.address)
                .map(|d| d.balance.to_string())
                .unwrap_or_else(|| "—".to_string());
            Row::new(vec![
                Cell::from(short(&view.address)).style(Style::default().fg(Color::White)),
                Cell::from(state_text).style(Style::default().fg(Color::Cyan)),
                Cell::from(push_text).style(Style::default().fg(push_color)),
                Cell::from(balance).style(Style::default().fg(Color::Green)),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(16),
            Constraint::Length(10),
            Constraint::Min(12),
            Constraint::Length(24),
        ],
    )
    .header(header)
    .block(panel(" Tracked Addresses "));
    f.render_widget(table, chunks[1]);

    let browsed = state.browsed_address.read().clone();
    let transfers_area = match &browsed {
        Some(address) => {
            let halves = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(chunks[2]);
            let detail = details.get(address).cloned().unwrap_or_default();
            let title = format!(" {} · {} ", short(address), detail.balance);
            if detail.transfers.is_empty() {
                empty_panel(f, title, halves[0]);
            } else {
                f.render_widget(transaction_table(&detail.transfers, title, 0), halves[0]);
            }
            halves[1]
        }
        None => chunks[2],
    };

    let mut transfers: Vec<TransactionRecord> = tracked
        .iter()
        .filter_map(|view| details.get(&view.address))
        .flat_map(|d| d.transfers.iter().cloned())
        .collect();
    transfers.sort_by(|a, b| b.tick.cmp(&a.tick));
    transfers.dedup_by(|a, b| a.id == b.id);
    if transfers.is_empty() {
        empty_panel(f, " Tracked Transfers ".to_string(), transfers_area);
    } else {
        let offset = *state.scroll_offset.read();
        f.render_widget(
            transaction_table(&transfers, " Tracked Transfers ".to_string(), offset),
            transfers_area,
        );
    }
}

/// Draw the logs tab
fn draw_logs_tab(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let logs = state.logs.read();
    let offset = *state.scroll_offset.read();

    let items: Vec<ListItem> = logs
        .iter()
        .rev()
        .skip(offset)
        .map(|log| {
            let level_style = match log.level {
                LogLevel::Info => Style::default().fg(Color::Cyan),
                LogLevel::Warn => Style::default().fg(Color::Yellow),
                LogLevel::Error => Style::default().fg(Color::Red),
            };

            ListItem::new(Line::from(vec![
                Span::styled(
                    log.timestamp.format("%H:%M:%S").to_string(),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::raw(" "),
                Span::styled(format!("[{}]", log.level), level_style),
                Span::raw(" "),
                Span::styled(log.message.clone(), Style::default().fg(Color::White)),
            ]))
        })
        .collect();

    f.render_widget(List::new(items).block(panel(" Logs ")), area);
}

/// Footer: shortcuts, or the command line while it is open
fn draw_footer(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let command = state.command.read().clone();
    if command.active {
        let line = Line::from(vec![
            Span::styled(":", Style::default().fg(Color::Yellow)),
            Span::styled(masked_command(&command.buffer), Style::default().fg(Color::White)),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
        ]);
        f.render_widget(Paragraph::new(line).block(panel(" Command ")), area);
        return;
    }

    let shortcuts = vec![
        Span::styled(" q", Style::default().fg(Color::Yellow)),
        Span::styled(" Quit ", Style::default().fg(Color::Gray)),
        Span::raw("│"),
        Span::styled(" ←/→", Style::default().fg(Color::Yellow)),
        Span::styled(" Switch Tab ", Style::default().fg(Color::Gray)),
        Span::raw("│"),
        Span::styled(" ↑/↓", Style::default().fg(Color::Yellow)),
        Span::styled(" Scroll ", Style::default().fg(Color::Gray)),
        Span::raw("│"),
        Span::styled(" r", Style::default().fg(Color::Yellow)),
        Span::styled(" Refresh ", Style::default().fg(Color::Gray)),
        Span::raw("│"),
        Span::styled(" :", Style::default().fg(Color::Yellow)),
        Span::styled(" Command ", Style::default().fg(Color::Gray)),
        Span::raw("│"),
        Span::styled(" ?", Style::default().fg(Color::Yellow)),
        Span::styled(" Help ", Style::default().fg(Color::Gray)),
    ];

    let footer = Paragraph::new(Line::from(shortcuts))
        .alignment(Alignment::Center)
        .block(panel(""));
    f.render_widget(footer, area);
}

/// Toast stack in the top-right corner of the content area
fn draw_toasts(f: &mut Frame, state: &Arc<AppState>, area: Rect) {
    let toasts = state.toasts.read();
    let width = 48.min(area.width);
    let mut y = area.y;

    for toast in toasts.iter().rev() {
        if y + 4 > area.y + area.height {
            break;
        }
        let color = match toast.kind {
            ToastKind::Incoming | ToastKind::Success => Color::Green,
            ToastKind::Outgoing => Color::Yellow,
            ToastKind::Failure => Color::Red,
        };
        let rect = Rect::new(area.x + area.width - width, y, width, 4);
        f.render_widget(Clear, rect);
        let block = Block::default()
            .title(format!(" {} ", toast.title))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color))
            .style(Style::default().bg(Color::Black));
        f.render_widget(
            Paragraph::new(toast.message.clone())
                .wrap(ratatui::widgets::Wrap { trim: true })
                .block(block),
            rect,
        );
        y += 4;
    }
}

/// Draw help overlay
fn draw_help_overlay(f: &mut Frame) {
    let area = f.area();

    // Create centered popup
    let popup_width = 64;
    let popup_height = (10 + HELP.len()) as u16;
    let popup_area = Rect::new(
        (area.width.saturating_sub(popup_width)) / 2,
        (area.height.saturating_sub(popup_height)) / 2,
        popup_width.min(area.width),
        popup_height.min(area.height),
    );

    f.render_widget(Clear, popup_area);

    let key = |k: &'static str, what: &'static str| {
        Line::from(vec![
            Span::styled(format!("  {:<12}", k), Style::default().fg(Color::Yellow)),
            Span::raw(what),
        ])
    };

    let mut help_text = vec![
        Line::from(Span::styled("Keyboard Shortcuts", header_style())),
        key("q, Ctrl+C", "Quit the application"),
        key("←, →, Tab", "Switch between tabs"),
        key("↑, ↓", "Scroll up/down"),
        key("r", "Refresh now"),
        key(":", "Open the command line"),
        key("?", "Toggle this help"),
        Line::from(""),
        Line::from(Span::styled("Commands", header_style())),
    ];
    help_text.extend(HELP.iter().map(|(usage, what)| {
        Line::from(vec![
            Span::styled(format!("  {:<26}", usage), Style::default().fg(Color::Yellow)),
            Span::raw(*what),
        ])
    }));

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    f.render_widget(Paragraph::new(help_text).block(block), popup_area);
}
