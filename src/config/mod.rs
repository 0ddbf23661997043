//! Configuration module for Moonlight.
//!
//! This module handles parsing, validation, and access to configuration
//! settings. Configuration is a single JSON document; every field has a
//! default, so an empty object is a valid configuration.
//!
//! # Examples
//!
//! Loading a configuration from a file, writing the defaults on first use:
//!
//! ```no_run
//! use moonlight::config::Config;
//!
//! let config = Config::load_or_init("moonlight/config.json").unwrap();
//! println!("Servers live in {}", config.paths.servers_dir.display());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use moonlight::config::{Config, validate_config};
//!
//! let mut config = Config::default();
//! config.runtime.executable = "/opt/java/bin/java".to_string();
//! config.lifecycle.confirmation_window_ms = 20_000;
//! validate_config(&config).unwrap();
//! ```
mod parser;
pub mod validator;

pub use parser::{
    Config, LifecycleConfig, MonitorConfig, PathsConfig, RuntimeConfig, TerminationPolicy,
};
pub use validator::validate_config;
