//! Configuration module for anime2x
//!
//! Handles loading tool locations and pipeline settings from TOML files and
//! environment variable overrides.

pub mod config;

pub use config::*;
