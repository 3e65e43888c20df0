//! Aligned Xception model built with the Burn framework
//!
//! This module provides:
//! - Declarative block configuration ([`config`])
//! - Output-stride planning that trades stride for dilation ([`planner`])
//! - Separable convolution units, Xception blocks and the classifier head
//! - Network assembly, weight save/load, and multi-scale feature extraction
//!
//! ## Architecture
//!
//! ```text
//! input -> stem (3x3 s2, 3x3 s1) -> blocks[0..n] -> head (pool, dropout, fc)
//!                                        |
//!                                        +-> feature maps at recorded taps
//! ```

pub mod block;
pub mod config;
pub mod features;
pub mod head;
pub mod layers;
pub mod planner;
pub mod xception;

// Re-export main types for convenience
pub use block::{ShortcutKind, XceptionBlock};
pub use config::{
    ActivationType, BlockSpec, ChannelSpec, NormConfig, PoolType, XceptionAlignedConfig,
};
pub use features::{FeatureExtractor, FeatureInfo};
pub use head::ClassifierHead;
pub use layers::{ConvNormAct, SeparableConv2d};
pub use planner::{plan, plan_blocks, BlockPlan, PlannedBlock, PlannerState};
pub use xception::XceptionAligned;
