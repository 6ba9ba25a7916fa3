//! # FoodFest Common
//!
//! Error types and logging configuration shared by the FoodFest offline shell.
//!
//! ## Features
//!
//! - A single error enum covering install, activation, fetch and storage failures
//! - `tracing-subscriber` setup with pretty, compact and JSON output

pub mod error;
pub mod logging;

pub use error::{FoodFestError, Result};
pub use logging::{init_logging, LogConfig, LogFormat};
