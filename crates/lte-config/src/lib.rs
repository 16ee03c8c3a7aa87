//! LTE UE MAC configuration management
//!
//! This crate provides configuration loading and parsing for the MAC:
//! - TOML configuration file parsing
//! - Stack configuration structures, mirroring the RRC-provided MAC, RACH and SR settings
//! - Runtime state that RRC reconfiguration writes into

pub mod stack_config;
pub mod toml_config;

pub use stack_config::*;
pub use toml_config::*;
