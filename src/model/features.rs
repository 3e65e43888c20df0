//! Multi-scale feature extraction
//!
//! [`FeatureInfo`] describes every tap point recorded while the network is
//! built. [`FeatureExtractor`] wraps a built network and returns the feature
//! maps at a chosen subset of those taps, for detection or segmentation heads.

use burn::{
    module::{Ignored, Module},
    tensor::{backend::Backend, Tensor},
};
use serde::Serialize;

use crate::model::xception::XceptionAligned;
use crate::utils::error::{Result, XceptionError};

/// One feature-map tap point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureInfo {
    /// Channels of the tapped map
    pub num_chs: usize,
    /// Spatial reduction relative to the input
    pub reduction: usize,
    /// Module path of the tap, `blocks.<index>`
    pub module: String,
    /// Block whose output is tapped
    pub block_index: usize,
}

impl FeatureInfo {
    pub fn block_output(block_index: usize, num_chs: usize, reduction: usize) -> Self {
        Self {
            num_chs,
            reduction,
            module: format!("blocks.{}", block_index),
            block_index,
        }
    }
}

/// Backbone returning intermediate feature maps instead of logits
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    pub model: XceptionAligned<B>,
    out_indices: Ignored<Vec<usize>>,
}

impl<B: Backend> FeatureExtractor<B> {
    /// Wrap `model`, keeping the feature-info entries listed in `out_indices`
    /// (all entries when `None`).
    pub fn new(model: XceptionAligned<B>, out_indices: Option<Vec<usize>>) -> Result<Self> {
        let available = model.feature_info().len();
        let out_indices = out_indices.unwrap_or_else(|| (0..available).collect());

        if let Some(&bad) = out_indices.iter().find(|&&i| i >= available) {
            return Err(XceptionError::Config(format!(
                "out_indices entry {} out of range, network has {} feature taps",
                bad, available
            )));
        }

        Ok(Self {
            model,
            out_indices: Ignored(out_indices),
        })
    }

    pub fn out_indices(&self) -> &[usize] {
        &self.out_indices.0
    }

    /// Feature-info entries of the selected taps, in output order
    pub fn feature_info(&self) -> Vec<FeatureInfo> {
        let info = self.model.feature_info();
        self.out_indices.0.iter().map(|&i| info[i].clone()).collect()
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let maps = self.model.forward_feature_maps(x);
        self.out_indices.0.iter().map(|&i| maps[i].clone()).collect()
    }
}
