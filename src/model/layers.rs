//! Convolution building blocks
//!
//! [`ConvNormAct`] is the plain conv + batch norm + activation stage used by
//! the stem and the projected shortcut. [`SeparableConv2d`] is the depthwise
//! plus pointwise pair that makes up an Xception block.

use burn::{
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig, Conv2dRecord},
        BatchNorm, BatchNormConfig, BatchNormRecord, PaddingConfig2d,
    },
    tensor::{activation, backend::Backend, Tensor},
};

use crate::model::config::{ActivationType, NormConfig};
use crate::utils::error::{Result, XceptionError};

/// Symmetric padding that keeps `ceil(size / stride)` output pixels
pub fn get_padding(kernel_size: usize, stride: usize, dilation: usize) -> usize {
    ((stride - 1) + dilation * (kernel_size - 1)) / 2
}

impl ActivationType {
    /// Apply the activation element-wise
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            ActivationType::Relu => activation::relu(x),
            ActivationType::LeakyRelu => activation::leaky_relu(x, 0.01),
            ActivationType::Gelu => activation::gelu(x),
            ActivationType::Silu => activation::silu(x),
        }
    }
}

impl NormConfig {
    pub fn init<B: Backend>(&self, channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
        BatchNormConfig::new(channels)
            .with_epsilon(self.eps)
            .with_momentum(self.momentum)
            .init(device)
    }
}

#[allow(clippy::too_many_arguments)]
fn conv2d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
    groups: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = get_padding(kernel_size, stride, dilation);
    Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_dilation([dilation, dilation])
        .with_groups(groups)
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

/// Fail on the first axis where a stored parameter shape differs from the model's
pub(crate) fn check_dims<const D: usize>(
    name: &str,
    expected: [usize; D],
    found: [usize; D],
) -> Result<()> {
    match (0..D).find(|&axis| expected[axis] != found[axis]) {
        Some(axis) => Err(XceptionError::ShapeMismatch {
            block: format!("{}[{}]", name, axis),
            expected: expected[axis],
            found: found[axis],
        }),
        None => Ok(()),
    }
}

fn check_conv<B: Backend>(name: &str, conv: &Conv2d<B>, record: &Conv2dRecord<B>) -> Result<()> {
    check_dims(
        &format!("{}.weight", name),
        conv.weight.val().dims(),
        record.weight.val().dims(),
    )
}

fn check_norm<B: Backend>(
    name: &str,
    bn: &BatchNorm<B, 2>,
    record: &BatchNormRecord<B, 2>,
) -> Result<()> {
    check_dims(
        &format!("{}.weight", name),
        bn.gamma.val().dims(),
        record.gamma.val().dims(),
    )
}

/// Convolution, batch norm and an optional activation
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    act: Ignored<Option<ActivationType>>,
}

impl<B: Backend> ConvNormAct<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        act: Option<ActivationType>,
        norm: &NormConfig,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv2d(in_channels, out_channels, kernel_size, stride, 1, 1, device),
            bn: norm.init(out_channels, device),
            act: Ignored(act),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        match self.act.0 {
            Some(act) => act.apply(x),
            None => x,
        }
    }

    /// Check that a stored record fits this stage's parameter shapes
    pub fn check_record(&self, name: &str, record: &ConvNormActRecord<B>) -> Result<()> {
        check_conv(&format!("{}.conv", name), &self.conv, &record.conv)?;
        check_norm(&format!("{}.bn", name), &self.bn, &record.bn)
    }
}

/// Depthwise separable convolution
///
/// A depthwise `k x k` convolution (one filter per input channel) carrying the
/// stride and dilation, then a `1 x 1` pointwise convolution mixing channels.
/// Each is followed by batch norm; the activations are only present when an
/// activation is passed in.
#[derive(Module, Debug)]
pub struct SeparableConv2d<B: Backend> {
    pub conv_dw: Conv2d<B>,
    pub bn_dw: BatchNorm<B, 2>,
    pub conv_pw: Conv2d<B>,
    pub bn_pw: BatchNorm<B, 2>,
    act: Ignored<Option<ActivationType>>,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> SeparableConv2d<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        dilation: usize,
        act: Option<ActivationType>,
        norm: &NormConfig,
        device: &B::Device,
    ) -> Self {
        Self {
            conv_dw: conv2d(
                in_channels,
                in_channels,
                kernel_size,
                stride,
                dilation,
                in_channels,
                device,
            ),
            bn_dw: norm.init(in_channels, device),
            conv_pw: conv2d(in_channels, out_channels, 1, 1, 1, 1, device),
            bn_pw: norm.init(out_channels, device),
            act: Ignored(act),
            in_channels,
            out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn_dw.forward(self.conv_dw.forward(x));
        let x = self.activate(x);
        let x = self.bn_pw.forward(self.conv_pw.forward(x));
        self.activate(x)
    }

    fn activate(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self.act.0 {
            Some(act) => act.apply(x),
            None => x,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Activation applied after each of the two convolutions, if any
    pub fn activation(&self) -> Option<ActivationType> {
        self.act.0
    }

    pub fn check_record(&self, name: &str, record: &SeparableConv2dRecord<B>) -> Result<()> {
        check_conv(&format!("{}.conv_dw", name), &self.conv_dw, &record.conv_dw)?;
        check_norm(&format!("{}.bn_dw", name), &self.bn_dw, &record.bn_dw)?;
        check_conv(&format!("{}.conv_pw", name), &self.conv_pw, &record.conv_pw)?;
        check_norm(&format!("{}.bn_pw", name), &self.bn_pw, &record.bn_pw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, ElementConversion};

    type TestBackend = NdArray;

    #[test]
    fn test_get_padding() {
        assert_eq!(get_padding(3, 1, 1), 1);
        assert_eq!(get_padding(3, 2, 1), 1);
        assert_eq!(get_padding(3, 1, 2), 2);
        assert_eq!(get_padding(3, 1, 4), 4);
        assert_eq!(get_padding(1, 1, 1), 0);
        assert_eq!(get_padding(1, 2, 1), 0);
    }

    #[test]
    fn test_conv_norm_act_shapes() {
        let device = Default::default();
        let norm = NormConfig::default();
        let act = Some(ActivationType::Relu);
        let stem = ConvNormAct::<TestBackend>::new(3, 32, 3, 2, act, &norm, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 33, 32], &device);
        assert_eq!(stem.forward(input).dims(), [2, 32, 17, 16]);
    }

    #[test]
    fn test_conv_norm_act_output_nonnegative_with_relu() {
        let device = Default::default();
        let norm = NormConfig::default();
        let layer =
            ConvNormAct::<TestBackend>::new(4, 8, 3, 1, Some(ActivationType::Relu), &norm, &device);

        let input =
            Tensor::<TestBackend, 4>::random([1, 4, 8, 8], Distribution::Normal(0.0, 1.0), &device);
        let min: f32 = layer.forward(input).min().into_scalar().elem();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_separable_conv_dilation_keeps_resolution() {
        let device = Default::default();
        let norm = NormConfig::default();
        for dilation in [1, 2, 4] {
            let unit =
                SeparableConv2d::<TestBackend>::new(8, 16, 3, 1, dilation, None, &norm, &device);
            let input = Tensor::<TestBackend, 4>::zeros([1, 8, 10, 10], &device);
            assert_eq!(unit.forward(input).dims(), [1, 16, 10, 10]);
        }
    }

    #[test]
    fn test_separable_conv_stride_two() {
        let device = Default::default();
        let norm = NormConfig::default();
        let unit = SeparableConv2d::<TestBackend>::new(
            8,
            16,
            3,
            2,
            1,
            Some(ActivationType::Relu),
            &norm,
            &device,
        );

        let input = Tensor::<TestBackend, 4>::zeros([1, 8, 15, 16], &device);
        assert_eq!(unit.forward(input).dims(), [1, 16, 8, 8]);
        assert_eq!(unit.in_channels(), 8);
        assert_eq!(unit.out_channels(), 16);
        assert_eq!(unit.activation(), Some(ActivationType::Relu));
    }

    #[test]
    fn test_depthwise_weight_shape() {
        let device = Default::default();
        let norm = NormConfig::default();
        let unit = SeparableConv2d::<TestBackend>::new(8, 16, 3, 1, 1, None, &norm, &device);

        // groups = in_channels: one 3x3 filter per channel
        assert_eq!(unit.conv_dw.weight.val().dims(), [8, 1, 3, 3]);
        assert_eq!(unit.conv_pw.weight.val().dims(), [16, 8, 1, 1]);
        assert!(unit.conv_dw.bias.is_none());
    }

    #[test]
    fn test_activation_apply() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-2.0, 0.0, 3.0], &device);

        let relu: Vec<f32> = ActivationType::Relu
            .apply(x.clone())
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(relu, vec![0.0, 0.0, 3.0]);

        let leaky: Vec<f32> = ActivationType::LeakyRelu.apply(x).into_data().to_vec().unwrap();
        assert!((leaky[0] + 0.02).abs() < 1e-6);
        assert_eq!(leaky[2], 3.0);
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims("w", [16, 8, 1, 1], [16, 8, 1, 1]).is_ok());

        let err = check_dims("w", [16, 8, 1, 1], [16, 4, 1, 1]).unwrap_err();
        assert!(matches!(
            err,
            XceptionError::ShapeMismatch { ref block, expected: 8, found: 4 } if block == "w[1]"
        ));
    }

    #[test]
    fn test_check_record_reports_first_mismatch() {
        let device = Default::default();
        let norm = NormConfig::default();
        let unit = SeparableConv2d::<TestBackend>::new(8, 16, 3, 1, 1, None, &norm, &device);

        // stride and dilation are not stored as parameters
        let strided = SeparableConv2d::<TestBackend>::new(8, 16, 3, 2, 2, None, &norm, &device);
        assert!(unit.check_record("unit", &strided.into_record()).is_ok());

        let wider = SeparableConv2d::<TestBackend>::new(8, 24, 3, 1, 1, None, &norm, &device);
        let err = unit.check_record("unit", &wider.into_record()).unwrap_err();
        assert!(matches!(
            err,
            XceptionError::ShapeMismatch { ref block, expected: 16, found: 24 }
                if block == "unit.conv_pw.weight[0]"
        ));

        let stage = ConvNormAct::<TestBackend>::new(8, 16, 1, 1, None, &norm, &device);
        let other = ConvNormAct::<TestBackend>::new(4, 16, 1, 1, None, &norm, &device);
        let err = stage.check_record("shortcut", &other.into_record()).unwrap_err();
        assert!(matches!(
            err,
            XceptionError::ShapeMismatch { ref block, expected: 8, found: 4 }
                if block == "shortcut.conv.weight[1]"
        ));
    }
}
