//! Xception block
//!
//! Three separable convolutions in sequence with a residual connection around
//! them. Only the third unit carries the block stride.

use burn::{
    module::{Ignored, Module},
    tensor::{backend::Backend, Tensor},
};

use crate::model::config::{ActivationType, NormConfig};
use crate::model::layers::{ConvNormAct, SeparableConv2d};
use crate::model::planner::PlannedBlock;
use crate::utils::error::{Result, XceptionError};

pub use crate::model::planner::ShortcutKind;

#[derive(Module, Debug)]
pub struct XceptionBlock<B: Backend> {
    pub stack: Vec<SeparableConv2d<B>>,
    pub shortcut: Option<ConvNormAct<B>>,
    /// Relu in front of each unit when the block starts with relu
    pre_act: Ignored<Option<ActivationType>>,
    in_channels: usize,
    out_channels: usize,
    no_skip: bool,
}

impl<B: Backend> XceptionBlock<B> {
    /// Build a block from its planned stride and dilation.
    ///
    /// With `start_with_relu` each unit is preceded by a plain relu and has
    /// no activation inside; otherwise the units apply `act` after their own
    /// batch norms.
    pub fn new(
        planned: &PlannedBlock,
        act: ActivationType,
        norm: &NormConfig,
        device: &B::Device,
    ) -> Self {
        let out_channels = planned.out_channels();

        let shortcut = if planned.shortcut_kind() == ShortcutKind::Projection {
            Some(ConvNormAct::new(
                planned.in_chs,
                out_channels,
                1,
                planned.stride,
                None,
                norm,
                device,
            ))
        } else {
            None
        };

        let (pre_act, unit_act) = if planned.start_with_relu {
            (Some(ActivationType::Relu), None)
        } else {
            (None, Some(act))
        };

        let mut in_chs = planned.in_chs;
        let mut stack = Vec::with_capacity(3);
        for (i, &out_chs) in planned.out_chs.iter().enumerate() {
            let stride = if i == 2 { planned.stride } else { 1 };
            stack.push(SeparableConv2d::new(
                in_chs,
                out_chs,
                3,
                stride,
                planned.dilation,
                unit_act,
                norm,
                device,
            ));
            in_chs = out_chs;
        }

        Self {
            stack,
            shortcut,
            pre_act: Ignored(pre_act),
            in_channels: planned.in_chs,
            out_channels,
            no_skip: planned.no_skip,
        }
    }

    /// Run the three separable units without the residual connection
    pub fn forward_stack(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.stack.iter().fold(x, |x, unit| {
            let x = match self.pre_act.0 {
                Some(act) => act.apply(x),
                None => x,
            };
            unit.forward(x)
        })
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        // The pre-activation produces a new tensor, so the skip still sees the raw input
        let skip = x.clone();
        let out = self.forward_stack(x);

        if self.no_skip {
            return out;
        }

        match &self.shortcut {
            Some(shortcut) => out + shortcut.forward(skip),
            None => out + skip,
        }
    }

    pub fn shortcut_kind(&self) -> ShortcutKind {
        match (&self.shortcut, self.no_skip) {
            (_, true) => ShortcutKind::None,
            (Some(_), false) => ShortcutKind::Projection,
            (None, false) => ShortcutKind::Identity,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Stride applied by the third unit
    pub fn stride(&self) -> usize {
        self.stack[2].conv_dw.stride[0]
    }

    /// Dilation shared by the depthwise convolutions
    pub fn dilation(&self) -> usize {
        self.stack[0].conv_dw.dilation[0]
    }

    pub fn starts_with_activation(&self) -> bool {
        self.pre_act.0.is_some()
    }

    /// Activation applied in front of each unit, if any
    pub fn pre_activation(&self) -> Option<ActivationType> {
        self.pre_act.0
    }

    /// Check that a stored record fits this block's parameter shapes
    pub fn check_record(&self, name: &str, record: &XceptionBlockRecord<B>) -> Result<()> {
        if record.stack.len() != self.stack.len() {
            return Err(XceptionError::ShapeMismatch {
                block: format!("{}.stack", name),
                expected: self.stack.len(),
                found: record.stack.len(),
            });
        }
        for (i, (unit, unit_record)) in self.stack.iter().zip(&record.stack).enumerate() {
            unit.check_record(&format!("{}.stack.{}", name, i), unit_record)?;
        }

        let shortcut_name = format!("{}.shortcut", name);
        match (&self.shortcut, &record.shortcut) {
            (Some(shortcut), Some(shortcut_record)) => {
                shortcut.check_record(&shortcut_name, shortcut_record)
            }
            (None, None) => Ok(()),
            // present on one side only: report the projected widths, 0 for a missing one
            (Some(_), None) => Err(XceptionError::ShapeMismatch {
                block: shortcut_name,
                expected: self.out_channels,
                found: 0,
            }),
            (None, Some(shortcut_record)) => Err(XceptionError::ShapeMismatch {
                block: shortcut_name,
                expected: 0,
                found: shortcut_record.conv.weight.val().dims()[0],
            }),
        }
    }
}
