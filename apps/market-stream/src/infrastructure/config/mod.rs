//! Configuration Module
//!
//! Configuration loading for the market stream service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_WS_URL, MarketStreamConfig, ServerSettings, StreamSettings,
    parse_subscriptions,
};
