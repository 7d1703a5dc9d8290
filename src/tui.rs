use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Wrap};
use tokio::sync::{broadcast, watch};
use tracing::warn;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::command::{Command, ConnectionState};
use crate::dashboard::{DashboardState, time_of_day};
use crate::fault_log::{FaultKind, FaultLogStore};
use crate::message::{AgentThought, NewsItem, PortfolioSnapshot, TradeAction, TradeRecord};

const POSITIVE: Color = Color::Rgb(0, 255, 157);
const NEGATIVE: Color = Color::Rgb(255, 0, 85);
const NEUTRAL: Color = Color::Rgb(255, 255, 0);
const ACCENT: Color = Color::Rgb(0, 243, 255);
const MUTED: Color = Color::DarkGray;
const LABEL: Color = Color::Gray;
const FOCUS_BORDER: Color = Color::LightMagenta;

const ARTICLE_EXCERPT_CHARS: usize = 80;
const TILE_WIDTH: u16 = 16;
const TILE_HEIGHT: u16 = 4;
const HEADER_HEIGHT: u16 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScrollFocus {
    News,
    Trades,
}

impl ScrollFocus {
    fn label(&self) -> &'static str {
        match self {
            ScrollFocus::News => "News",
            ScrollFocus::Trades => "Trades",
        }
    }

    fn toggled(&self) -> Self {
        match self {
            ScrollFocus::News => ScrollFocus::Trades,
            ScrollFocus::Trades => ScrollFocus::News,
        }
    }
}

pub struct TuiApp {
    state: DashboardState,
    fault_log: Option<FaultLogStore>,
    focus: ScrollFocus,
    news_offset: usize,
    trade_offset: usize,
    news_page: usize,
    trade_page: usize,
    last_draw: Instant,
    min_redraw_gap: Duration,
    needs_redraw: bool,
    status_message: Option<String>,
    status_visible_until: Option<Instant>,
    status_is_error: bool,
    connection_rx: Option<watch::Receiver<ConnectionState>>,
}

impl TuiApp {
    fn is_exit_key(key: &KeyEvent) -> bool {
        matches!(
            key.code,
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc
        ) || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
    }

    pub fn new(state: DashboardState, fault_log: Option<FaultLogStore>) -> TuiApp {
        let min_redraw_gap = Duration::from_millis(100);
        TuiApp {
            state,
            fault_log,
            focus: ScrollFocus::News,
            news_offset: 0,
            trade_offset: 0,
            news_page: 1,
            trade_page: 1,
            last_draw: Instant::now() - min_redraw_gap,
            min_redraw_gap,
            needs_redraw: true,
            status_message: None,
            status_visible_until: None,
            status_is_error: false,
            connection_rx: None,
        }
    }

    pub fn with_connection_watch(mut self, rx: watch::Receiver<ConnectionState>) -> TuiApp {
        self.connection_rx = Some(rx);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn dispose(&self) {
        ratatui::restore();
    }

    pub async fn run(&mut self, rx: &mut broadcast::Receiver<Command>) -> Result<()> {
        color_eyre::install()?;
        let mut terminal = ratatui::init();
        let mut input_tick = tokio::time::interval(self.min_redraw_gap);
        terminal.draw(|frame| self.render(frame))?;
        self.last_draw = Instant::now();
        self.needs_redraw = false;
        loop {
            tokio::select! {
                biased;
                _ = input_tick.tick() => {
                    if self.poll_input()? {
                        return Ok(());
                    }
                    if self.clear_status_if_allowed() {
                        self.needs_redraw = true;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(command) => self.handle_command(command),
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            self.handle_lag(skipped);
                        }
                    }
                }
            }
            if self.needs_redraw && self.last_draw.elapsed() >= self.min_redraw_gap {
                terminal.draw(|frame| self.render(frame))?;
                self.last_draw = Instant::now();
                self.needs_redraw = false;
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connection(state) => {
                self.state.set_connection(state);
                if state.is_open() {
                    self.set_status_message("connected to backend");
                }
            }
            Command::Inbound(message) => {
                self.state.apply(message);
            }
            Command::FrameDiscarded(reason) => {
                self.state.record_discard();
                self.record_fault(FaultKind::Decode, &reason);
                self.set_error_status_message(format!("discarded frame: {reason}"));
            }
            Command::Error(message) => {
                self.record_fault(FaultKind::Connection, &message);
                self.set_error_status_message(message);
            }
        }
        self.needs_redraw = true;
    }

    /// Skipped commands may include a state change, so the indicator is
    /// re-read from the connection watch.
    fn handle_lag(&mut self, skipped: u64) {
        warn!(skipped, "dashboard fell behind the connection task");
        let Some(rx) = &self.connection_rx else {
            return;
        };
        let current = *rx.borrow();
        if current != self.state.connection() {
            self.state.set_connection(current);
            self.needs_redraw = true;
        }
    }

    fn record_fault(&self, kind: FaultKind, message: &str) {
        let Some(store) = &self.fault_log else {
            return;
        };
        if let Err(err) = store.record(kind, message) {
            warn!(error = %err, "failed to append to fault journal");
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(3));
        self.status_is_error = false;
    }

    fn set_error_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(5));
        self.status_is_error = true;
    }

    /// Returns `true` when a message was actually cleared.
    fn clear_status_if_allowed(&mut self) -> bool {
        if self.status_message.is_none() {
            return false;
        }
        if let Some(visible_until) = self.status_visible_until {
            if Instant::now() < visible_until {
                return false;
            }
        }
        self.status_message = None;
        self.status_visible_until = None;
        self.status_is_error = false;
        true
    }

    fn poll_input(&mut self) -> Result<bool> {
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if self.handle_key_event(key) {
                        return Ok(true);
                    }
                }
                Event::Resize(_, _) => self.needs_redraw = true,
                _ => {}
            }
        }
        Ok(false)
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> bool {
        if Self::is_exit_key(&key) {
            return true;
        }
        match key.code {
            KeyCode::Tab | KeyCode::BackTab => self.focus = self.focus.toggled(),
            KeyCode::Up | KeyCode::Char('k') => self.scroll(-1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll(1),
            KeyCode::PageUp => self.scroll(-(self.focused_page() as isize)),
            KeyCode::PageDown => self.scroll(self.focused_page() as isize),
            KeyCode::Home => self.scroll(isize::MIN),
            KeyCode::End => self.scroll(isize::MAX),
            _ => return false,
        }
        self.needs_redraw = true;
        false
    }

    fn focused_page(&self) -> usize {
        let page = match self.focus {
            ScrollFocus::News => self.news_page,
            ScrollFocus::Trades => self.trade_page,
        };
        page.max(1)
    }

    fn scroll(&mut self, delta: isize) {
        let (offset, len) = match self.focus {
            ScrollFocus::News => (&mut self.news_offset, self.state.news_len()),
            ScrollFocus::Trades => (
                &mut self.trade_offset,
                self.state.portfolio().trade_log.len(),
            ),
        };
        let max = len.saturating_sub(1);
        *offset = if delta < 0 {
            offset.saturating_sub(delta.unsigned_abs())
        } else {
            offset.saturating_add(delta as usize).min(max)
        };
    }

    fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(HEADER_HEIGHT),
                Constraint::Min(6),
                Constraint::Length(1),
            ])
            .split(area);
        self.render_header(frame, rows[0]);
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(30),
                Constraint::Percentage(40),
                Constraint::Percentage(30),
            ])
            .split(rows[1]);
        self.render_news_panel(frame, columns[0]);
        let main = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(8), Constraint::Percentage(45)])
            .split(columns[1]);
        self.render_agent_panel(frame, main[0]);
        self.render_allocation_panel(frame, main[1]);
        self.render_trade_panel(frame, columns[2]);
        self.render_status(frame, rows[2]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let title = Line::from(vec![
            Span::styled(" ALGO", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled("MATES", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
            Span::styled(" AI TRADER ", Style::default().add_modifier(Modifier::BOLD)),
        ]);
        let block = Block::bordered().title(title);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let cells = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Min(24),
                Constraint::Length(18),
                Constraint::Length(18),
                Constraint::Length(14),
                Constraint::Length(20),
            ])
            .split(inner);

        let portfolio = self.state.portfolio();
        let summary = Paragraph::new(vec![
            Line::from(Span::styled(
                format!(
                    "Trades: {} | Cash: {}",
                    portfolio.total_trades,
                    format_money(portfolio.cash)
                ),
                Style::default().fg(MUTED),
            )),
            Line::from(Span::styled(
                self.activity_label(),
                Style::default().fg(MUTED),
            )),
        ]);
        frame.render_widget(summary, cells[0]);

        frame.render_widget(
            metric_card("REALIZED P&L", signed_amount(self.state.realized_pnl())),
            cells[1],
        );
        frame.render_widget(
            metric_card("UNREALIZED P&L", signed_amount(self.state.unrealized_pnl())),
            cells[2],
        );
        let roi = self.state.roi();
        frame.render_widget(
            metric_card(
                "ROI",
                Span::styled(
                    format!("{}%", format_signed(roi)),
                    signed_style(roi).add_modifier(Modifier::BOLD),
                ),
            ),
            cells[3],
        );

        let connection = self.state.connection();
        let equity = Paragraph::new(vec![
            Line::from(Span::styled("TOTAL EQUITY", Style::default().fg(LABEL))),
            Line::from(Span::styled(
                format_money(portfolio.portfolio_value),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                connection.indicator_label(),
                Style::default().fg(connection_color(connection)),
            )),
        ])
        .alignment(Alignment::Right);
        frame.render_widget(equity, cells[4]);
    }

    fn activity_label(&self) -> String {
        let last = self
            .state
            .last_message_at()
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        format!(
            "Frames: {} ({} discarded) | Last update: {last}",
            self.state.received_frames(),
            self.state.discarded_frames()
        )
    }

    fn panel_block(&self, title: String, focus: Option<ScrollFocus>) -> Block<'static> {
        let block = Block::bordered().title(title);
        match focus {
            Some(focus) if focus == self.focus => {
                block.border_style(Style::default().fg(FOCUS_BORDER))
            }
            _ => block,
        }
    }

    fn render_news_panel(&mut self, frame: &mut Frame, area: Rect) {
        let count = self.state.news_len();
        let block = self.panel_block(
            format!(
                "Live Market Intelligence {count}/{}",
                self.state.news_capacity()
            ),
            Some(ScrollFocus::News),
        );
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let visible = (inner.height as usize / 2).max(1);
        self.news_page = visible;
        if count == 0 {
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "Waiting for market news...",
                    Style::default().fg(MUTED),
                )),
                inner,
            );
            return;
        }
        let width = inner.width as usize;
        let offset = self.news_offset.min(count.saturating_sub(1));
        let (start, end) = visible_range(count, visible, offset);
        let mut lines = Vec::new();
        for item in self.state.news().skip(start).take(end - start) {
            lines.extend(news_lines(item, width));
        }
        frame.render_widget(Paragraph::new(lines), inner);
    }

    fn render_agent_panel(&self, frame: &mut Frame, area: Rect) {
        let block = self.panel_block("Agent Brain".to_string(), None);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        let Some(thought) = self.state.agent_thought() else {
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "Agent is scanning global feeds...",
                    Style::default().fg(MUTED),
                ))
                .alignment(Alignment::Center),
                inner,
            );
            return;
        };
        frame.render_widget(
            Paragraph::new(agent_lines(thought)).wrap(Wrap { trim: false }),
            inner,
        );
    }

    fn render_allocation_panel(&self, frame: &mut Frame, area: Rect) {
        let portfolio = self.state.portfolio();
        let block = self.panel_block(
            format!("Asset Allocation {}", portfolio.positions.len()),
            None,
        );
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let tiles = allocation_tiles(portfolio);
        if tiles.is_empty() {
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "No active positions.",
                    Style::default().fg(MUTED),
                )),
                inner,
            );
            return;
        }
        let per_row = (inner.width / TILE_WIDTH).max(1);
        let max_rows = (inner.height / TILE_HEIGHT).max(1);
        for (idx, (ticker, quantity)) in tiles.iter().enumerate() {
            let idx = idx as u16;
            let (row, col) = (idx / per_row, idx % per_row);
            if row >= max_rows {
                break;
            }
            let tile = Rect {
                x: inner.x + col * TILE_WIDTH,
                y: inner.y + row * TILE_HEIGHT,
                width: TILE_WIDTH.min(inner.width),
                height: TILE_HEIGHT.min(inner.height),
            }
            .intersection(inner);
            let widget = Paragraph::new(vec![
                Line::from(Span::styled(
                    ticker.clone(),
                    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
                )),
                Line::from(quantity.clone()),
            ])
            .alignment(Alignment::Center)
            .block(Block::bordered().border_style(Style::default().fg(MUTED)));
            frame.render_widget(widget, tile);
        }
    }

    fn render_trade_panel(&mut self, frame: &mut Frame, area: Rect) {
        let trades = &self.state.portfolio().trade_log;
        let block = self.panel_block(
            format!("Execution Log {}", trades.len()),
            Some(ScrollFocus::Trades),
        );
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let visible = (inner.height as usize / 2).max(1);
        self.trade_page = visible;
        let trades = &self.state.portfolio().trade_log;
        if trades.is_empty() {
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "No trades executed yet.",
                    Style::default().fg(MUTED),
                )),
                inner,
            );
            return;
        }
        let width = inner.width as usize;
        let offset = self.trade_offset.min(trades.len().saturating_sub(1));
        let (start, end) = visible_range(trades.len(), visible, offset);
        let mut lines = Vec::new();
        for trade in &trades[start..end] {
            lines.extend(trade_lines(trade, width));
        }
        frame.render_widget(Paragraph::new(lines), inner);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let line = match &self.status_message {
            Some(message) => {
                let color = if self.status_is_error {
                    Color::Red
                } else {
                    Color::Yellow
                };
                Line::from(Span::styled(
                    clip_to_width(message, area.width as usize),
                    Style::default().fg(color),
                ))
            }
            None => Line::from(Span::styled(
                format!(
                    " q quit | Tab focus: {} | ↑↓ PgUp PgDn Home End scroll",
                    self.focus.label()
                ),
                Style::default().fg(MUTED),
            )),
        };
        frame.render_widget(Paragraph::new(line), area);
    }
}

pub fn action_color(action: &TradeAction) -> Color {
    match action {
        TradeAction::Buy => POSITIVE,
        TradeAction::Sell => NEGATIVE,
        _ => NEUTRAL,
    }
}

fn connection_color(state: ConnectionState) -> Color {
    if state.is_open() {
        Color::Green
    } else {
        Color::Red
    }
}

fn signed_style(value: f64) -> Style {
    let color = if value >= 0.0 { POSITIVE } else { NEGATIVE };
    Style::default().fg(color)
}

fn signed_amount(value: f64) -> Span<'static> {
    Span::styled(
        format_signed(value),
        signed_style(value).add_modifier(Modifier::BOLD),
    )
}

fn metric_card(label: &'static str, value: Span<'static>) -> Paragraph<'static> {
    Paragraph::new(vec![
        Line::from(Span::styled(label, Style::default().fg(LABEL))),
        Line::from(value),
    ])
    .alignment(Alignment::Center)
}

/// Two decimals with an explicit `+` for non-negative values.
pub fn format_signed(value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    if value >= 0.0 {
        format!("+{value:.2}")
    } else {
        format!("{value:.2}")
    }
}

fn format_money(value: f64) -> String {
    if value < 0.0 {
        format!("-${:.2}", value.abs())
    } else {
        format!("${value:.2}")
    }
}

fn format_quantity(value: f64) -> String {
    format!("{value}")
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

/// One `(ticker, quantity label)` per held position, tickers in lexicographic order.
fn allocation_tiles(portfolio: &PortfolioSnapshot) -> Vec<(String, String)> {
    portfolio
        .positions
        .iter()
        .map(|(ticker, qty)| (ticker.clone(), format!("{} shares", format_quantity(*qty))))
        .collect()
}

fn news_lines(item: &NewsItem, width: usize) -> [Line<'static>; 2] {
    [
        Line::from(Span::styled(
            clip_to_width(&item.title, width),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            clip_to_width(&format!("{} • {}", item.source, item.published), width),
            Style::default().fg(MUTED),
        )),
    ]
}

fn agent_lines(thought: &AgentThought) -> Vec<Line<'static>> {
    let mut decision = vec![
        Span::styled("Decision: ", Style::default().fg(Color::White)),
        Span::styled(
            thought.action.label().to_string(),
            Style::default()
                .fg(action_color(&thought.action))
                .add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(ticker) = thought.ticker() {
        decision.push(Span::styled(
            format!("  {ticker}"),
            Style::default().fg(ACCENT),
        ));
    }
    if let Some(price) = thought.live_price() {
        decision.push(Span::styled(
            format!("  @ {}", format_money(price)),
            Style::default().fg(LABEL),
        ));
    }
    vec![
        Line::from(Span::styled(
            format!(
                "Analyzed: \"{}\"",
                excerpt(&thought.article, ARTICLE_EXCERPT_CHARS)
            ),
            Style::default().fg(LABEL),
        )),
        Line::from(""),
        Line::from(decision),
        Line::from(""),
        Line::from(Span::styled(
            format!("\"{}\"", thought.thought),
            Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
        )),
        Line::from(""),
        Line::from(Span::styled(
            format!("Confidence: {}%", thought.confidence_percent()),
            Style::default().fg(LABEL),
        )),
    ]
}

fn trade_lines(trade: &TradeRecord, width: usize) -> [Line<'static>; 2] {
    let time = time_of_day(&trade.time);
    let ticker_width = width.saturating_sub(time.width() + 1).max(1);
    let header = Line::from(vec![
        Span::styled(
            pad_to_width(&clip_to_width(&trade.ticker, ticker_width), ticker_width),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(time, Style::default().fg(MUTED)),
    ]);
    let mut detail = vec![
        Span::styled(
            format!("{} {}", trade.action.label(), format_quantity(trade.qty)),
            Style::default()
                .fg(action_color(&trade.action))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" @ {}", format_money(trade.price)),
            Style::default().fg(LABEL),
        ),
    ];
    if let Some(pnl) = trade.pnl {
        detail.push(Span::raw(" "));
        detail.push(Span::styled(
            format_signed(pnl),
            signed_style(pnl).add_modifier(Modifier::BOLD),
        ));
    }
    if let Some(reason) = trade.reason.as_deref().filter(|reason| !reason.is_empty()) {
        let used: usize = detail.iter().map(|span| span.content.width()).sum();
        let room = width.saturating_sub(used + 1);
        if room > 3 {
            detail.push(Span::styled(
                format!(" {}", clip_to_width(reason, room)),
                Style::default().fg(MUTED).add_modifier(Modifier::ITALIC),
            ));
        }
    }
    [header, Line::from(detail)]
}

fn clip_to_width(value: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(value) <= width {
        return value.to_string();
    }
    let mut result = String::new();
    let mut remaining = width.saturating_sub(1);
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if ch_width > remaining {
            break;
        }
        result.push(ch);
        remaining = remaining.saturating_sub(ch_width);
    }
    result.push('…');
    result
}

fn pad_to_width(value: &str, width: usize) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    format!("{value}{}", " ".repeat(width - current))
}

fn visible_range(len: usize, visible: usize, first: usize) -> (usize, usize) {
    if len == 0 || visible == 0 {
        return (0, 0);
    }
    if len <= visible {
        return (0, len);
    }
    let start = first.min(len - visible);
    (start, start + visible)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use ratatui::buffer::Buffer;

    use super::*;
    use crate::dashboard::{DEFAULT_INITIAL_CAPITAL, DEFAULT_NEWS_CAPACITY};
    use crate::message::InboundMessage;

    fn app() -> TuiApp {
        TuiApp::new(
            DashboardState::new(DEFAULT_INITIAL_CAPITAL, DEFAULT_NEWS_CAPACITY),
            None,
        )
    }

    fn draw(app: &mut TuiApp) -> Buffer {
        let mut terminal = Terminal::new(TestBackend::new(160, 40)).unwrap();
        terminal.draw(|frame| app.render(frame)).unwrap();
        terminal.backend().buffer().clone()
    }

    fn rows(buffer: &Buffer) -> Vec<String> {
        (0..buffer.area.height)
            .map(|y| {
                (0..buffer.area.width)
                    .map(|x| buffer[(x, y)].symbol())
                    .collect::<String>()
            })
            .collect()
    }

    fn screen(buffer: &Buffer) -> String {
        rows(buffer).join("\n")
    }

    fn find(buffer: &Buffer, needle: &str) -> Option<(u16, u16)> {
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                let mut matched = true;
                for (offset, ch) in needle.chars().enumerate() {
                    let cx = x + offset as u16;
                    if cx >= buffer.area.width
                        || buffer[(cx, y)].symbol() != ch.to_string().as_str()
                    {
                        matched = false;
                        break;
                    }
                }
                if matched {
                    return Some((x, y));
                }
            }
        }
        None
    }

    fn thought(action: &str) -> InboundMessage {
        InboundMessage::AgentThought(AgentThought {
            article: "Chipmaker beats estimates".to_string(),
            action: TradeAction::from(action.to_string()),
            ticker: Some("NVDA".to_string()),
            live_price: Some(912.4),
            thought: "Earnings momentum".to_string(),
            confidence: 0.826,
        })
    }

    #[test]
    fn lag_resyncs_the_connection_indicator() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let mut app = app().with_connection_watch(state_rx);
        app.handle_command(Command::Connection(ConnectionState::Open));

        state_tx.send_replace(ConnectionState::Disconnected);
        app.handle_lag(12);
        assert_eq!(app.state().connection(), ConnectionState::Disconnected);
        let buffer = draw(&mut app);
        assert!(find(&buffer, "● DISCONNECTED").is_some());
    }

    #[test]
    fn action_colors_follow_the_decision() {
        assert_eq!(action_color(&TradeAction::Buy), POSITIVE);
        assert_eq!(action_color(&TradeAction::Sell), NEGATIVE);
        assert_eq!(action_color(&TradeAction::Hold), NEUTRAL);
        assert_eq!(
            action_color(&TradeAction::Other("WAIT".to_string())),
            NEUTRAL
        );
    }

    #[test]
    fn renders_agent_decision_in_its_color() {
        for (label, color) in [
            ("SELL", NEGATIVE),
            ("BUY", POSITIVE),
            ("HOLD", NEUTRAL),
            ("buy", NEUTRAL),
        ] {
            let mut app = app();
            app.handle_command(Command::Inbound(thought(label)));
            let buffer = draw(&mut app);
            let (x, y) = find(&buffer, &format!("Decision: {label}")).expect("decision line");
            let action_x = x + "Decision: ".len() as u16;
            assert_eq!(buffer[(action_x, y)].fg, color, "color for {label}");
            let text = screen(&buffer);
            assert!(text.contains("Confidence: 83%"));
            assert!(text.contains("NVDA"));
            assert!(text.contains("@ $912.40"));
        }
    }

    #[test]
    fn renders_placeholders_before_any_data() {
        let mut app = app();
        let text = screen(&draw(&mut app));
        assert!(text.contains("Waiting for market news..."));
        assert!(text.contains("Agent is scanning global feeds..."));
        assert!(text.contains("No active positions."));
        assert!(text.contains("No trades executed yet."));
        assert!(text.contains("● DISCONNECTED"));
        assert!(text.contains("$100000.00"));
    }

    #[test]
    fn empty_positions_render_no_tiles() {
        let mut app = app();
        app.handle_command(Command::Inbound(InboundMessage::Portfolio(
            PortfolioSnapshot {
                cash: 100_000.0,
                portfolio_value: 100_000.0,
                ..PortfolioSnapshot::default()
            },
        )));
        assert!(allocation_tiles(app.state().portfolio()).is_empty());
        let text = screen(&draw(&mut app));
        assert!(text.contains("No active positions."));
        assert!(!text.contains("shares"));
    }

    #[test]
    fn positions_render_one_tile_per_ticker_in_order() {
        let snapshot = PortfolioSnapshot {
            positions: BTreeMap::from([
                ("TSLA".to_string(), 3.0),
                ("AAPL".to_string(), 12.0),
                ("MSFT".to_string(), 7.0),
            ]),
            ..PortfolioSnapshot::opening(DEFAULT_INITIAL_CAPITAL)
        };
        let tiles = allocation_tiles(&snapshot);
        let tickers: Vec<&str> = tiles.iter().map(|(ticker, _)| ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT", "TSLA"]);
        assert_eq!(tiles[0].1, "12 shares");

        let mut app = app();
        app.handle_command(Command::Inbound(InboundMessage::Portfolio(snapshot)));
        let text = screen(&draw(&mut app));
        assert_eq!(text.matches(" shares").count(), 3);
        assert!(!text.contains("No active positions."));
    }

    #[test]
    fn header_shows_derived_metrics() {
        let mut app = app();
        app.handle_command(Command::Connection(ConnectionState::Open));
        app.handle_command(Command::Inbound(InboundMessage::Portfolio(
            PortfolioSnapshot {
                cash: 80_000.0,
                portfolio_value: 101_500.0,
                roi: 1.5,
                realized_pnl: 400.0,
                total_trades: 9,
                ..PortfolioSnapshot::default()
            },
        )));
        let text = screen(&draw(&mut app));
        assert!(text.contains("Trades: 9 | Cash: $80000.00"));
        assert!(text.contains("+400.00"));
        assert!(text.contains("+1100.00"));
        assert!(text.contains("+1.50%"));
        assert!(text.contains("$101500.00"));
        assert!(text.contains("● LIVE SYSTEM"));
    }

    #[test]
    fn trade_rows_keep_backend_order() {
        let trades = vec![
            TradeRecord {
                ticker: "TSLA".to_string(),
                action: TradeAction::Sell,
                qty: 5.0,
                price: 180.5,
                time: "2024-05-01T14:03:22.123456".to_string(),
                pnl: Some(-12.75),
                reason: None,
            },
            TradeRecord {
                ticker: "AAPL".to_string(),
                action: TradeAction::Buy,
                qty: 10.0,
                price: 190.0,
                time: "2024-05-01T09:30:00".to_string(),
                pnl: None,
                reason: None,
            },
        ];
        let mut app = app();
        app.handle_command(Command::Inbound(InboundMessage::Portfolio(
            PortfolioSnapshot {
                trade_log: trades,
                ..PortfolioSnapshot::opening(DEFAULT_INITIAL_CAPITAL)
            },
        )));
        let buffer = draw(&mut app);
        let text = screen(&buffer);
        assert!(text.contains("14:03:22"));
        assert!(text.contains("SELL 5 @ $180.50 -12.75"));
        assert!(text.contains("BUY 10 @ $190.00"));
        let (_, tsla_row) = find(&buffer, "TSLA").unwrap();
        let (_, aapl_row) = find(&buffer, "AAPL").unwrap();
        assert!(tsla_row < aapl_row);
        let (x, y) = find(&buffer, "-12.75").unwrap();
        assert_eq!(buffer[(x, y)].fg, NEGATIVE);
    }

    #[test]
    fn discarded_frames_surface_on_the_status_line() {
        let mut app = app();
        app.handle_command(Command::FrameDiscarded(
            "unknown message type `PING`".to_string(),
        ));
        assert_eq!(app.state().discarded_frames(), 1);
        let text = screen(&draw(&mut app));
        assert!(text.contains("discarded frame: unknown message type `PING`"));
    }

    #[test]
    fn scrolling_is_clamped_to_the_focused_list() {
        let mut app = app();
        for idx in 0..5 {
            app.handle_command(Command::Inbound(InboundMessage::News(NewsItem {
                title: format!("headline {idx}"),
                ..NewsItem::default()
            })));
        }
        app.handle_key_event(KeyEvent::from(KeyCode::End));
        assert_eq!(app.news_offset, 4);
        app.handle_key_event(KeyEvent::from(KeyCode::Up));
        assert_eq!(app.news_offset, 3);
        app.handle_key_event(KeyEvent::from(KeyCode::Home));
        assert_eq!(app.news_offset, 0);

        app.handle_key_event(KeyEvent::from(KeyCode::Tab));
        app.handle_key_event(KeyEvent::from(KeyCode::Down));
        assert_eq!(app.trade_offset, 0);
        assert!(app.handle_key_event(KeyEvent::from(KeyCode::Char('q'))));
    }

    #[test]
    fn formats_signed_values() {
        assert_eq!(format_signed(0.0), "+0.00");
        assert_eq!(format_signed(-0.0), "+0.00");
        assert_eq!(format_signed(12.346), "+12.35");
        assert_eq!(format_signed(-3.2), "-3.20");
        assert_eq!(excerpt("abc", 80), "abc...");
        assert_eq!(clip_to_width("ABCDEFGH", 5), "ABCD…");
    }
}
