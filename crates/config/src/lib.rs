//! Configuration module for Organizerr
//!
//! Handles loading configuration from an optional TOML file and environment variable overrides.

pub mod config;

pub use config::*;
