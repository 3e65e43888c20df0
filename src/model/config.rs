//! Model Configuration Module
//!
//! Declarative description of an Aligned Xception network: the per-block
//! specifications, the shared layer settings, and the top-level
//! [`XceptionAlignedConfig`] consumed by the network builder.

use std::path::Path;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::model::planner::{check_total_stride, validate_output_stride, STEM_OUT_CHANNELS};
use crate::utils::error::XceptionError;

use crate::utils::error::Result as XResult;

/// Supported activation functions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationType {
    #[default]
    Relu,
    LeakyRelu,
    Gelu,
    Silu,
}

/// Global pooling applied by the classification head
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    #[default]
    Avg,
    Max,
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolType::Avg => write!(f, "avg"),
            PoolType::Max => write!(f, "max"),
        }
    }
}

/// Batch normalization parameters shared by every norm layer in the network
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NormConfig {
    /// Added to the variance for numerical stability
    pub eps: f64,
    /// Running statistics momentum
    pub momentum: f64,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            momentum: 0.1,
        }
    }
}

/// Output channels of the three separable units inside one block.
///
/// A scalar is broadcast to all three units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChannelList", into = "ChannelList")]
pub enum ChannelSpec {
    Scalar(usize),
    Triple([usize; 3]),
}

impl ChannelSpec {
    /// Normalize to one channel count per separable unit
    pub fn to_triple(&self) -> [usize; 3] {
        match *self {
            ChannelSpec::Scalar(c) => [c; 3],
            ChannelSpec::Triple(t) => t,
        }
    }

    /// Channels leaving the block (the last unit's width)
    pub fn last(&self) -> usize {
        self.to_triple()[2]
    }
}

impl From<usize> for ChannelSpec {
    fn from(c: usize) -> Self {
        ChannelSpec::Scalar(c)
    }
}

impl From<[usize; 3]> for ChannelSpec {
    fn from(t: [usize; 3]) -> Self {
        ChannelSpec::Triple(t)
    }
}

impl TryFrom<Vec<usize>> for ChannelSpec {
    type Error = XceptionError;

    fn try_from(list: Vec<usize>) -> XResult<Self> {
        match list.as_slice() {
            [a, b, c] => Ok(ChannelSpec::Triple([*a, *b, *c])),
            _ => Err(XceptionError::Config(format!(
                "out_chs list must have exactly 3 entries, got {}",
                list.len()
            ))),
        }
    }
}

/// Serialized form of [`ChannelSpec`]: either a bare integer or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelList {
    Scalar(usize),
    List(Vec<usize>),
}

impl TryFrom<ChannelList> for ChannelSpec {
    type Error = XceptionError;

    fn try_from(raw: ChannelList) -> XResult<Self> {
        match raw {
            ChannelList::Scalar(c) => Ok(ChannelSpec::Scalar(c)),
            ChannelList::List(list) => ChannelSpec::try_from(list),
        }
    }
}

impl From<ChannelSpec> for ChannelList {
    fn from(spec: ChannelSpec) -> Self {
        match spec {
            ChannelSpec::Scalar(c) => ChannelList::Scalar(c),
            ChannelSpec::Triple(t) => ChannelList::List(t.to_vec()),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One entry of the block list fed to the builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    /// Channels entering the block
    pub in_chs: usize,

    /// Channels produced by each of the three separable units
    pub out_chs: ChannelSpec,

    /// Requested spatial stride, applied at the third unit
    pub stride: usize,

    /// Put an activation in front of every separable unit instead of inside it
    #[serde(default = "default_true")]
    pub start_with_relu: bool,

    /// Drop the residual connection entirely
    #[serde(default)]
    pub no_skip: bool,
}

impl BlockSpec {
    pub fn new(in_chs: usize, out_chs: impl Into<ChannelSpec>, stride: usize) -> Self {
        Self {
            in_chs,
            out_chs: out_chs.into(),
            stride,
            start_with_relu: true,
            no_skip: false,
        }
    }

    pub fn with_start_with_relu(mut self, start_with_relu: bool) -> Self {
        self.start_with_relu = start_with_relu;
        self
    }

    pub fn with_no_skip(mut self, no_skip: bool) -> Self {
        self.no_skip = no_skip;
        self
    }
}

/// Configuration for the Aligned Xception network
#[derive(Config, Debug)]
pub struct XceptionAlignedConfig {
    /// Block list, processed in order after the stem
    pub block_cfg: Vec<BlockSpec>,

    /// Number of output classes; 0 removes the dense projection
    #[config(default = "1000")]
    pub num_classes: usize,

    /// Number of input image channels
    #[config(default = "3")]
    pub in_chans: usize,

    /// Maximum spatial reduction of the final feature map (8, 16 or 32)
    #[config(default = "32")]
    pub output_stride: usize,

    /// Activation used throughout the stem and blocks
    #[config(default = "ActivationType::Relu")]
    pub activation: ActivationType,

    /// Batch norm settings for every norm layer
    #[config(default = "NormConfig::default()")]
    pub norm: NormConfig,

    /// Dropout before the classifier (training only)
    #[config(default = "0.0")]
    pub drop_rate: f64,

    /// Global pooling kind used by the head
    #[config(default = "PoolType::Avg")]
    pub global_pool: PoolType,
}

impl XceptionAlignedConfig {
    /// Validate the configuration before any layer is allocated
    pub fn validate(&self) -> XResult<()> {
        validate_output_stride(self.output_stride)?;

        if self.in_chans == 0 {
            return Err(XceptionError::Config(
                "in_chans must be greater than 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(XceptionError::Config(
                "drop_rate must be in range [0.0, 1.0)".to_string(),
            ));
        }

        if self.block_cfg.is_empty() {
            return Err(XceptionError::Config(
                "block_cfg must contain at least one block".to_string(),
            ));
        }

        let mut prev_chs = STEM_OUT_CHANNELS;
        for (i, block) in self.block_cfg.iter().enumerate() {
            if block.stride == 0 {
                return Err(XceptionError::Config(format!(
                    "blocks.{}: stride must be at least 1",
                    i
                )));
            }
            if block.out_chs.to_triple().contains(&0) {
                return Err(XceptionError::Config(format!(
                    "blocks.{}: out_chs must be non-zero",
                    i
                )));
            }
            if block.in_chs != prev_chs {
                return Err(XceptionError::ShapeMismatch {
                    block: format!("blocks.{}", i),
                    expected: prev_chs,
                    found: block.in_chs,
                });
            }
            prev_chs = block.out_chs.last();
        }

        check_total_stride(&self.block_cfg)
    }

    /// Read a configuration from a JSON file
    pub fn from_json_file(path: &Path) -> XResult<Self> {
        if !path.exists() {
            return Err(XceptionError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write the configuration as pretty JSON
    pub fn to_json_file(&self, path: &Path) -> XResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
