//! `SatSip` Core Library
//!
//! Shared functionality for `SatSip` components:
//! - Configuration resolution and hierarchy
//! - Tracing initialization
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, RelayConfig, SessionConfig, ZapConfig};
pub use error::{Error, Result};
