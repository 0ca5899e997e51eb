//! Structured Logging for the sBTC bridge client
//!
//! Thin layer over `tracing`: JSON output for mainnet (log aggregation),
//! pretty output for development, and `LogEvent` records for the deposit
//! lifecycle so one correlation id follows an attempt from the address
//! derivation to the terminal status.

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::config::{BridgeConfig, BridgeNetwork};

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Deposit address derivation and broadcast
    Deposit,
    /// Emily registration
    Registration,
    /// Indexer / Stacks tip comparison
    Sync,
    /// Deposit status transitions
    Status,
    /// Wallet provider interaction
    Wallet,
    /// Startup, shutdown
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (RFC 3339)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Correlation id of the deposit attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details attached to failed events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }

    /// Emit through `tracing` at the event's own level
    pub fn emit(&self) {
        let json = self.to_json();
        let failed = self.error.is_some();
        match self.category {
            EventCategory::Deposit if failed => tracing::error!(target: "sbtc_bridge::deposit", "{}", json),
            EventCategory::Deposit => tracing::info!(target: "sbtc_bridge::deposit", "{}", json),
            EventCategory::Registration if failed => tracing::error!(target: "sbtc_bridge::registration", "{}", json),
            EventCategory::Registration => tracing::info!(target: "sbtc_bridge::registration", "{}", json),
            EventCategory::Sync if failed => tracing::warn!(target: "sbtc_bridge::sync", "{}", json),
            EventCategory::Sync => tracing::debug!(target: "sbtc_bridge::sync", "{}", json),
            EventCategory::Status => tracing::info!(target: "sbtc_bridge::status", "{}", json),
            EventCategory::Wallet if failed => tracing::warn!(target: "sbtc_bridge::wallet", "{}", json),
            EventCategory::Wallet => tracing::info!(target: "sbtc_bridge::wallet", "{}", json),
            EventCategory::System => tracing::info!(target: "sbtc_bridge::system", "{}", json),
        }
    }
}

/// Log a deposit lifecycle event
pub fn log_deposit_event(
    event_type: &str,
    correlation_id: &str,
    txid: Option<&str>,
    amount_sats: u64,
    error: Option<(&str, &str)>,
) {
    let level = if error.is_some() { LogLevel::Error } else { LogLevel::Info };
    let mut event = LogEvent::new(level, EventCategory::Deposit, event_type)
        .with_correlation_id(correlation_id)
        .with_data(serde_json::json!({
            "txid": txid,
            "amount_sats": amount_sats,
        }));

    if let Some((code, message)) = error {
        event = event.with_error(code, message);
    }
    event.emit();
}

/// Log an Emily registration outcome
pub fn log_registration_event(correlation_id: &str, txid: &str, vout: u32, error: Option<(&str, &str)>) {
    let level = if error.is_some() { LogLevel::Error } else { LogLevel::Info };
    let mut event = LogEvent::new(level, EventCategory::Registration, "deposit_registration")
        .with_correlation_id(correlation_id)
        .with_data(serde_json::json!({ "txid": txid, "vout": vout }));

    if let Some((code, message)) = error {
        event = event.with_error(code, message);
    }
    event.emit();
}

/// Log a status transition of a tracked deposit
pub fn log_status_transition(txid: &str, vout: u32, from: &str, to: &str) {
    LogEvent::new(LogLevel::Info, EventCategory::Status, format!("{} -> {}", from, to))
        .with_correlation_id(format!("{}:{}", txid, vout))
        .with_data(serde_json::json!({ "txid": txid, "vout": vout, "from": from, "to": to }))
        .emit();
}

/// Log the outcome of a wallet send request
pub fn log_wallet_event(provider: &str, correlation_id: &str, txid: Option<&str>, error: Option<(&str, &str)>) {
    wallet_event(provider, correlation_id, txid, error).emit();
}

fn wallet_event(provider: &str, correlation_id: &str, txid: Option<&str>, error: Option<(&str, &str)>) -> LogEvent {
    let level = if error.is_some() { LogLevel::Warn } else { LogLevel::Info };
    let message = if error.is_some() { "wallet_send_failed" } else { "wallet_send" };
    let event = LogEvent::new(level, EventCategory::Wallet, message)
        .with_correlation_id(correlation_id)
        .with_data(serde_json::json!({ "provider": provider, "txid": txid }));

    match error {
        Some((code, message)) => event.with_error(code, message),
        None => event,
    }
}

/// Log client startup with the settings that shape every request
pub fn log_startup(config: &BridgeConfig, command: &str) {
    startup_event(config, command).emit();
}

fn startup_event(config: &BridgeConfig, command: &str) -> LogEvent {
    LogEvent::new(LogLevel::Info, EventCategory::System, "startup").with_data(serde_json::json!({
        "command": command,
        "network": config.network.to_string(),
        "emily_url": config.emily_url,
        "stacks_api_url": config.stacks_api_url,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Initialize the logging system
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sbtc_bridge={},warn", level.as_filter())));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from BridgeConfig
pub fn init_from_config(config: &BridgeConfig) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    let json_format = config.network == BridgeNetwork::Mainnet;

    init_logging(level, json_format)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Generate a correlation id for one deposit attempt
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
