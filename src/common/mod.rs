//! Common Infrastructure Module
//!
//! Configuration loading, structured logging and the root error type.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{BridgeConfig, BridgeNetwork, ConfigError};
pub use error::{BridgeError, Result};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_deposit_event,
    log_registration_event, log_startup, log_status_transition, log_wallet_event, EventCategory,
    LogEvent, LogLevel, LoggingError,
};
