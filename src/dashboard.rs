use std::collections::VecDeque;

use chrono::{DateTime, Local, NaiveDateTime};

use crate::command::ConnectionState;
use crate::message::{AgentThought, InboundMessage, NewsItem, PortfolioSnapshot};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_NEWS_CAPACITY: usize = 50;

/// Display state accumulated from published messages. Each message type
/// updates its own slice; nothing here ever talks back to the connection.
#[derive(Debug, Clone)]
pub struct DashboardState {
    initial_capital: f64,
    news_capacity: usize,
    portfolio: PortfolioSnapshot,
    news: VecDeque<NewsItem>,
    agent_thought: Option<AgentThought>,
    connection: ConnectionState,
    received_frames: u64,
    discarded_frames: u64,
    last_message_at: Option<DateTime<Local>>,
}

impl DashboardState {
    pub fn new(initial_capital: f64, news_capacity: usize) -> DashboardState {
        let news_capacity = news_capacity.max(1);
        DashboardState {
            initial_capital,
            news_capacity,
            portfolio: PortfolioSnapshot::opening(initial_capital),
            news: VecDeque::with_capacity(news_capacity),
            agent_thought: None,
            connection: ConnectionState::Disconnected,
            received_frames: 0,
            discarded_frames: 0,
            last_message_at: None,
        }
    }

    pub fn apply(&mut self, message: InboundMessage) {
        self.received_frames += 1;
        self.last_message_at = Some(Local::now());
        match message {
            InboundMessage::Portfolio(snapshot) => self.portfolio = snapshot,
            InboundMessage::News(item) => self.push_news(item),
            InboundMessage::AgentThought(thought) => self.agent_thought = Some(thought),
        }
    }

    fn push_news(&mut self, item: NewsItem) {
        self.news.push_front(item);
        self.news.truncate(self.news_capacity);
    }

    pub fn record_discard(&mut self) {
        self.discarded_frames += 1;
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn portfolio(&self) -> &PortfolioSnapshot {
        &self.portfolio
    }

    /// Newest first.
    pub fn news(&self) -> impl ExactSizeIterator<Item = &NewsItem> {
        self.news.iter()
    }

    pub fn news_len(&self) -> usize {
        self.news.len()
    }

    pub fn news_capacity(&self) -> usize {
        self.news_capacity
    }

    pub fn agent_thought(&self) -> Option<&AgentThought> {
        self.agent_thought.as_ref()
    }

    pub fn received_frames(&self) -> u64 {
        self.received_frames
    }

    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    pub fn last_message_at(&self) -> Option<DateTime<Local>> {
        self.last_message_at
    }

    pub fn realized_pnl(&self) -> f64 {
        self.portfolio.realized_pnl
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.portfolio.portfolio_value - self.initial_capital - self.portfolio.realized_pnl
    }

    pub fn roi(&self) -> f64 {
        self.portfolio.roi
    }
}

/// `HH:MM:SS` portion of an ISO-8601 timestamp, or an empty string when the
/// value carries no time part.
pub fn time_of_day(timestamp: &str) -> String {
    let trimmed = timestamp.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return parsed.format("%H:%M:%S").to_string();
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return parsed.format("%H:%M:%S").to_string();
    }
    trimmed
        .split_once('T')
        .map(|(_, time)| time.split('.').next().unwrap_or_default().to_string())
        .unwrap_or_default()
}
