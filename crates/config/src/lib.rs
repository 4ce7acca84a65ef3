//! Core engine configuration.
//!
//! Everything the engine recognizes, loaded from TOML and validated before
//! any task starts. Config is threaded through constructors as `Arc`s;
//! nothing here is globally mutable.

mod error;
mod types;

pub use error::ConfigError;
pub use types::{ChainConfig, EngineConfig, OrderingMode};
