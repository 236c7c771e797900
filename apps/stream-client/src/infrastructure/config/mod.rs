//! Configuration Module
//!
//! Client and binary configuration loaded from the environment.

mod settings;

pub use settings::{AppConfig, BackoffSettings, ClientConfig, ConfigError, WorkerMode};
