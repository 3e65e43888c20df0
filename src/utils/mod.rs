//! Utilities module for logging and error handling
//!
//! This module provides:
//! - Structured logging with tracing
//! - Error handling types

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{Result, XceptionError};
pub use logging::init_logging;

/// Format a parameter count in a human-readable way (e.g. `26.97M`)
pub fn format_param_count(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
