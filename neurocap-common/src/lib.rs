//! # NeuroCapture Common Library
//!
//! Shared code for the NeuroCapture study client crates:
//! - Error type used by configuration and shared utilities
//! - Event types (ClientEvent enum) and the NotificationBus
//! - Configuration loading (TOML, environment, compiled defaults)

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
