//! Configuration management for echolog

pub mod settings;

pub use settings::{
    LoggingSettings, ServerConfig, ServerSettings, ShutdownSettings, StorageSettings,
    TimestampSettings,
};
