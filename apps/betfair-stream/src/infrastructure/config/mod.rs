//! Configuration Module
//!
//! Configuration loading for the stream client and its supervisor.

mod settings;

pub use settings::{
    ConfigError, Credentials, Environment, ServerSettings, SessionSettings, StreamConfig,
    SubscriptionSettings, SupervisorSettings,
};
