//! Storage infrastructure.
//!
//! hidwire persists nothing; this module only reads the TOML configuration.

pub mod config;
