//! Output-stride planning
//!
//! Walks the block list once and decides, for every block, the stride it
//! really applies and the dilation its convolutions use. Whenever a
//! downsampling block would push the cumulative reduction past the requested
//! output stride, the stride is dropped and the running dilation is multiplied
//! instead, so the receptive field keeps growing at constant resolution.
//!
//! Planning is a pure fold over [`PlannerState`]; nothing in the input block
//! list is modified.

use serde::Serialize;

use crate::model::config::BlockSpec;
use crate::model::features::FeatureInfo;
use crate::utils::error::{Result, XceptionError};

/// Output strides the network can be built for
pub const VALID_OUTPUT_STRIDES: [usize; 3] = [8, 16, 32];

/// Reduction applied by the stem before the first block
pub const STEM_STRIDE: usize = 2;

/// Channels produced by the stem
pub const STEM_OUT_CHANNELS: usize = 64;

/// Upper bound on the product of the stem stride and every declared block stride
pub const MAX_TOTAL_STRIDE: usize = 1 << 16;

/// Running stride and dilation while walking the block list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannerState {
    /// Cumulative spatial reduction so far
    pub stride: usize,
    /// Dilation handed to the next stride-1 block
    pub dilation: usize,
}

impl PlannerState {
    /// State right after the stem
    pub fn new() -> Self {
        Self {
            stride: STEM_STRIDE,
            dilation: 1,
        }
    }
}

impl Default for PlannerState {
    fn default() -> Self {
        Self::new()
    }
}

/// How a block's input is merged back into its stack output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortcutKind {
    /// `stack(x) + x`
    Identity,
    /// `stack(x) + bn(conv1x1(x))`
    Projection,
    /// `stack(x)`
    None,
}

/// A block specification with its effective stride and dilation resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedBlock {
    pub in_chs: usize,
    pub out_chs: [usize; 3],
    /// Stride requested by the block list
    pub declared_stride: usize,
    /// Stride the block actually applies (1 when absorbed into dilation)
    pub stride: usize,
    /// Dilation of the block's depthwise convolutions
    pub dilation: usize,
    pub start_with_relu: bool,
    pub no_skip: bool,
    /// The block is a downsampling point, physically or through dilation
    pub feature_boundary: bool,
    /// Cumulative reduction after this block
    pub reduction: usize,
}

impl PlannedBlock {
    /// Channels leaving the block
    pub fn out_channels(&self) -> usize {
        self.out_chs[2]
    }

    /// True when the declared stride was converted into dilation
    pub fn is_absorbed(&self) -> bool {
        self.declared_stride > 1 && self.stride == 1
    }

    /// A projection is needed whenever the skip would not line up with the
    /// stack output, in channels or in resolution.
    pub fn shortcut_kind(&self) -> ShortcutKind {
        if self.no_skip {
            ShortcutKind::None
        } else if self.out_channels() != self.in_chs || self.stride != 1 {
            ShortcutKind::Projection
        } else {
            ShortcutKind::Identity
        }
    }
}

/// Fail unless `output_stride` is one of [`VALID_OUTPUT_STRIDES`]
pub fn validate_output_stride(output_stride: usize) -> Result<()> {
    if VALID_OUTPUT_STRIDES.contains(&output_stride) {
        Ok(())
    } else {
        Err(XceptionError::Config(format!(
            "output_stride must be one of {:?}, got {}",
            VALID_OUTPUT_STRIDES, output_stride
        )))
    }
}

/// Fail when the declared strides multiply past [`MAX_TOTAL_STRIDE`]
pub fn check_total_stride(specs: &[BlockSpec]) -> Result<()> {
    let mut total = STEM_STRIDE;
    for (i, spec) in specs.iter().enumerate() {
        total = total
            .checked_mul(spec.stride)
            .filter(|&t| t <= MAX_TOTAL_STRIDE)
            .ok_or_else(|| {
                XceptionError::Config(format!(
                    "blocks.{}: stride {} pushes the total stride past {}",
                    i, spec.stride, MAX_TOTAL_STRIDE
                ))
            })?;
    }
    Ok(())
}

/// Plan a single block against the running state.
///
/// The block's dilation is the one in effect before it; when its stride is
/// absorbed the increased dilation only applies to the blocks that follow.
pub fn plan(
    state: PlannerState,
    spec: &BlockSpec,
    output_stride: usize,
) -> (PlannerState, PlannedBlock) {
    let mut next = state;
    let mut stride = spec.stride;
    let feature_boundary = spec.stride > 1;

    if feature_boundary {
        let candidate = state.stride.saturating_mul(spec.stride);
        if candidate > output_stride {
            next.dilation = state.dilation.saturating_mul(spec.stride);
            stride = 1;
        } else {
            next.stride = candidate;
        }
    }

    let planned = PlannedBlock {
        in_chs: spec.in_chs,
        out_chs: spec.out_chs.to_triple(),
        declared_stride: spec.stride,
        stride,
        dilation: state.dilation,
        start_with_relu: spec.start_with_relu,
        no_skip: spec.no_skip,
        feature_boundary,
        reduction: next.stride,
    };

    (next, planned)
}

/// The planned block list for one network build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockPlan {
    pub output_stride: usize,
    pub blocks: Vec<PlannedBlock>,
    /// State after the last block
    pub final_state: PlannerState,
}

impl BlockPlan {
    /// Channels produced by the last block (the stem's when there are none)
    pub fn num_features(&self) -> usize {
        self.blocks
            .last()
            .map(PlannedBlock::out_channels)
            .unwrap_or(STEM_OUT_CHANNELS)
    }

    /// Product of the declared strides that were turned into dilation
    pub fn absorbed_stride(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.is_absorbed())
            .map(|b| b.declared_stride)
            .product()
    }

    /// One entry per feature boundary, plus a trailing entry for the last block
    pub fn feature_info(&self) -> Vec<FeatureInfo> {
        let mut info: Vec<FeatureInfo> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.feature_boundary)
            .map(|(i, b)| FeatureInfo::block_output(i, b.out_channels(), b.reduction))
            .collect();

        if let Some(last) = self.blocks.len().checked_sub(1) {
            info.push(FeatureInfo::block_output(
                last,
                self.num_features(),
                self.final_state.stride,
            ));
        }

        info
    }
}

/// Plan every block in order
pub fn plan_blocks(specs: &[BlockSpec], output_stride: usize) -> Result<BlockPlan> {
    validate_output_stride(output_stride)?;
    check_total_stride(specs)?;

    let mut state = PlannerState::new();
    let mut blocks = Vec::with_capacity(specs.len());

    for (i, spec) in specs.iter().enumerate() {
        let (next, planned) = plan(state, spec, output_stride);
        tracing::debug!(
            "blocks.{}: {} -> {:?}, stride {} (declared {}), dilation {}, reduction {}",
            i,
            planned.in_chs,
            planned.out_chs,
            planned.stride,
            planned.declared_stride,
            planned.dilation,
            planned.reduction
        );
        blocks.push(planned);
        state = next;
    }

    Ok(BlockPlan {
        output_stride,
        blocks,
        final_state: state,
    })
}
