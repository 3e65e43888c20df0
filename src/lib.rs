//! # Aligned Xception
//!
//! A Burn implementation of the Aligned Xception backbone (the DeepLab
//! variant), assembled from a declarative block list.
//!
//! ## Features
//!
//! - **Output-stride control**: the network can stop downsampling at 8, 16 or
//!   32 and continue with dilated convolutions instead
//! - **Feature taps** at every downsampling point for dense-prediction heads
//! - **Replaceable classifier** for transfer learning, with strict and
//!   non-strict weight loading
//!
//! ## Modules
//!
//! - `model`: block configuration, stride planning, layers and the network
//! - `backend`: default backend selection
//! - `utils`: logging and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xception_aligned::model::{BlockSpec, XceptionAlignedConfig};
//!
//! let blocks = vec![
//!     BlockSpec::new(64, 128, 2),
//!     BlockSpec::new(128, 256, 2),
//!     // ...
//! ];
//! let model = XceptionAlignedConfig::new(blocks)
//!     .with_output_stride(16)
//!     .init::<MyBackend>(&device)?;
//! ```

pub mod backend;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use model::config::{BlockSpec, ChannelSpec, XceptionAlignedConfig};
pub use model::features::{FeatureExtractor, FeatureInfo};
pub use model::planner::{plan_blocks, BlockPlan};
pub use model::xception::XceptionAligned;
pub use utils::error::{Result, XceptionError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
