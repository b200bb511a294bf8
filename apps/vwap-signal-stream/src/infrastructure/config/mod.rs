//! Configuration Module
//!
//! Environment-driven configuration for the stream service.

mod settings;

pub use settings::{
    ChannelSettings, ConfigError, Credentials, InstrumentSettings, ServerSettings,
    SessionSettings, SignalSettings, StreamConfig, WebSocketSettings,
};
