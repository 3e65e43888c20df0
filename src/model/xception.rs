//! Aligned Xception network
//!
//! The network is a fixed two-stage stem, the planned block list and a
//! classification head. [`XceptionAlignedConfig::init`] plans every block
//! against the requested output stride, builds the blocks, and records the
//! feature-info table used by [`FeatureExtractor`](crate::model::FeatureExtractor).

use std::path::{Path, PathBuf};

use burn::{
    module::{Ignored, Module},
    nn::Linear,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::model::block::XceptionBlock;
use crate::model::config::{PoolType, XceptionAlignedConfig};
use crate::model::features::FeatureInfo;
use crate::model::head::ClassifierHead;
use crate::model::layers::ConvNormAct;
use crate::model::planner::{plan_blocks, BlockPlan, STEM_OUT_CHANNELS};
use crate::utils::error::{Result, XceptionError};

/// Channels after `stem.0`
pub const STEM_MID_CHANNELS: usize = 32;

/// Modified Aligned Xception
#[derive(Module, Debug)]
pub struct XceptionAligned<B: Backend> {
    pub stem: Vec<ConvNormAct<B>>,
    pub blocks: Vec<XceptionBlock<B>>,
    pub head: ClassifierHead<B>,
    feature_info: Ignored<Vec<FeatureInfo>>,
    num_features: usize,
    num_classes: usize,
    drop_rate: f64,
}

impl XceptionAlignedConfig {
    /// Plan the block list for this configuration without allocating layers
    pub fn plan(&self) -> Result<BlockPlan> {
        self.validate()?;
        plan_blocks(&self.block_cfg, self.output_stride)
    }

    /// Build the network
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<XceptionAligned<B>> {
        let plan = self.plan()?;
        let act = Some(self.activation);

        let stem = vec![
            ConvNormAct::new(self.in_chans, STEM_MID_CHANNELS, 3, 2, act, &self.norm, device),
            ConvNormAct::new(STEM_MID_CHANNELS, STEM_OUT_CHANNELS, 3, 1, act, &self.norm, device),
        ];

        let blocks: Vec<XceptionBlock<B>> = plan
            .blocks
            .iter()
            .map(|planned| XceptionBlock::new(planned, self.activation, &self.norm, device))
            .collect();

        let num_features = plan.num_features();
        let feature_info = plan.feature_info();

        let head = ClassifierHead::new(
            num_features,
            self.num_classes,
            self.global_pool,
            self.drop_rate,
            device,
        );

        tracing::info!(
            "Built Aligned Xception: {} blocks, output stride {} (dilation {}), \
             {} features, {} classes",
            blocks.len(),
            plan.final_state.stride,
            plan.final_state.dilation,
            num_features,
            self.num_classes
        );

        Ok(XceptionAligned {
            stem,
            blocks,
            head,
            feature_info: Ignored(feature_info),
            num_features,
            num_classes: self.num_classes,
            drop_rate: self.drop_rate,
        })
    }
}

impl<B: Backend> XceptionAligned<B> {
    /// Stem followed by every block: `[B, C, H, W]` -> `[B, num_features, H/os, W/os]`
    pub fn forward_features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.forward_stem(x);
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn forward_head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(x)
    }

    /// Logits of shape `[B, num_classes]` (pooled features when `num_classes` is 0)
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.forward_features(x);
        self.forward_head(x)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// One feature map per [`FeatureInfo`] entry, in the same order
    pub fn forward_feature_maps(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let info = &self.feature_info.0;
        let mut maps = Vec::with_capacity(info.len());
        let mut next = 0;

        let mut x = self.forward_stem(x);
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            while next < info.len() && info[next].block_index == i {
                maps.push(x.clone());
                next += 1;
            }
        }

        maps
    }

    fn forward_stem(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.stem.iter().fold(x, |x, stage| stage.forward(x))
    }

    pub fn feature_info(&self) -> &[FeatureInfo] {
        &self.feature_info.0
    }

    /// Channels of the final feature map
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn get_classifier(&self) -> Option<&Linear<B>> {
        self.head.fc.as_ref()
    }

    /// Replace the head with a fresh one; the stem and blocks are untouched
    pub fn reset_classifier(
        &mut self,
        num_classes: usize,
        global_pool: PoolType,
        device: &B::Device,
    ) {
        tracing::info!(
            "Resetting classifier: {} -> {} classes, {} pooling",
            self.num_classes,
            num_classes,
            global_pool
        );
        self.head = ClassifierHead::new(
            self.num_features,
            num_classes,
            global_pool,
            self.drop_rate,
            device,
        );
        self.num_classes = num_classes;
    }

    /// Save all parameters as a named MessagePack record
    pub fn save_weights(&self, path: &Path) -> Result<PathBuf> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let path = path.with_extension("mpk");
        self.clone()
            .save_file(path.clone(), &recorder)
            .map_err(|e| {
                XceptionError::Weights(format!("failed to save {}: {:?}", path.display(), e))
            })?;

        tracing::info!("Saved weights to {}", path.display());
        Ok(path)
    }

    /// Load parameters saved by [`save_weights`](Self::save_weights).
    ///
    /// Every stem and block parameter in the file must have the shape of its
    /// slot in this model, otherwise nothing is loaded. In strict mode the
    /// classifier must match too. Otherwise the current head is kept, which
    /// allows reuse after [`reset_classifier`](Self::reset_classifier).
    pub fn load_weights(self, path: &Path, strict: bool, device: &B::Device) -> Result<Self> {
        let path = path.with_extension("mpk");
        if !path.exists() {
            return Err(XceptionError::PathNotFound(path));
        }

        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let mut record: XceptionAlignedRecord<B> =
            recorder.load(path.clone(), device).map_err(|e| {
                XceptionError::Weights(format!("failed to load {}: {:?}", path.display(), e))
            })?;

        self.check_backbone_record(&record)?;

        if strict {
            self.head.check_record(&record.head)?;
            tracing::info!("Loaded weights from {} (strict)", path.display());
        } else {
            record.head = self.head.clone().into_record();
            tracing::info!("Loaded backbone weights from {}, kept current head", path.display());
        }

        Ok(self.load_record(record))
    }

    /// Compare every stem and block parameter shape against a stored record
    fn check_backbone_record(&self, record: &XceptionAlignedRecord<B>) -> Result<()> {
        check_len("stem", self.stem.len(), record.stem.len())?;
        for (i, (stage, stage_record)) in self.stem.iter().zip(&record.stem).enumerate() {
            stage.check_record(&format!("stem.{}", i), stage_record)?;
        }

        check_len("blocks", self.blocks.len(), record.blocks.len())?;
        for (i, (block, block_record)) in self.blocks.iter().zip(&record.blocks).enumerate() {
            block.check_record(&format!("blocks.{}", i), block_record)?;
        }

        Ok(())
    }
}

fn check_len(name: &str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(XceptionError::ShapeMismatch {
            block: name.to_string(),
            expected,
            found,
        })
    }
}
