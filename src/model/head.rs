//! Classification head: global pooling, dropout and a dense projection

use burn::{
    module::{Ignored, Module},
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::model::config::PoolType;
use crate::model::layers::check_dims;
use crate::utils::error::{Result, XceptionError};

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    avg_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    /// `None` when the head has no classes and returns pooled features
    pub fc: Option<Linear<B>>,
    pool_type: Ignored<PoolType>,
    num_features: usize,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(
        num_features: usize,
        num_classes: usize,
        pool_type: PoolType,
        drop_rate: f64,
        device: &B::Device,
    ) -> Self {
        let fc = if num_classes > 0 {
            Some(
                LinearConfig::new(num_features, num_classes)
                    .with_bias(true)
                    .init(device),
            )
        } else {
            None
        };

        Self {
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(drop_rate).init(),
            fc,
            pool_type: Ignored(pool_type),
            num_features,
        }
    }

    /// Reduce `[B, C, H, W]` to `[B, C]`
    pub fn pool(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, height, width] = x.dims();
        match self.pool_type.0 {
            PoolType::Avg => self.avg_pool.forward(x).reshape([batch_size, channels]),
            PoolType::Max => x
                .reshape([batch_size, channels, height * width])
                .max_dim(2)
                .reshape([batch_size, channels]),
        }
    }

    /// Logits of shape `[B, num_classes]`, or pooled features when there are no classes
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool(x);
        let x = self.dropout.forward(x);

        match &self.fc {
            Some(fc) => fc.forward(x),
            None => x,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_classes(&self) -> usize {
        self.fc
            .as_ref()
            .map(|fc| fc.weight.val().dims()[1])
            .unwrap_or(0)
    }

    /// Width of the head output
    pub fn num_outputs(&self) -> usize {
        match self.fc {
            Some(_) => self.num_classes(),
            None => self.num_features,
        }
    }

    pub fn pool_type(&self) -> PoolType {
        self.pool_type.0
    }

    /// Check that a stored head has the same classifier shape as this one
    pub fn check_record(&self, record: &ClassifierHeadRecord<B>) -> Result<()> {
        match (&self.fc, &record.fc) {
            (Some(fc), Some(fc_record)) => check_dims(
                "head.fc.weight",
                fc.weight.val().dims(),
                fc_record.weight.val().dims(),
            ),
            (None, None) => Ok(()),
            (_, fc_record) => Err(XceptionError::ShapeMismatch {
                block: "head.fc".to_string(),
                expected: self.num_classes(),
                found: fc_record
                    .as_ref()
                    .map(|fc| fc.weight.val().dims()[1])
                    .unwrap_or(0),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray;

    #[test]
    fn test_head_output_shape() {
        let device = Default::default();
        let head = ClassifierHead::<TestBackend>::new(64, 10, PoolType::Avg, 0.0, &device);

        let x = Tensor::<TestBackend, 4>::zeros([3, 64, 5, 5], &device);
        assert_eq!(head.forward(x).dims(), [3, 10]);
        assert_eq!(head.num_classes(), 10);
        assert_eq!(head.num_outputs(), 10);
    }

    #[test]
    fn test_zero_classes_returns_pooled_features() {
        let device = Default::default();
        let head = ClassifierHead::<TestBackend>::new(8, 0, PoolType::Avg, 0.5, &device);
        assert!(head.fc.is_none());
        assert_eq!(head.num_outputs(), 8);

        let x = Tensor::<TestBackend, 4>::ones([2, 8, 4, 4], &device) * 3.0;
        let out = head.forward(x);
        assert_eq!(out.dims(), [2, 8]);

        // dropout is inactive without autodiff, so the mean comes through untouched
        let max_err: f32 = (out - 3.0).abs().max().into_scalar().elem();
        assert!(max_err < 1e-6);
    }

    #[test]
    fn test_dropout_active_on_training_backend() {
        let device = Default::default();
        let head = ClassifierHead::<TrainingBackend>::new(64, 0, PoolType::Avg, 0.5, &device);

        let x = Tensor::<TrainingBackend, 4>::ones([4, 64, 2, 2], &device);
        let out: Vec<f32> = head.forward(x).into_data().to_vec().unwrap();
        assert_eq!(out.len(), 4 * 64);

        // kept activations are rescaled by 1 / (1 - p)
        assert!(out.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(out.iter().any(|&v| v == 0.0));
        assert!(out.iter().any(|&v| v > 1.0));
    }

    #[test]
    fn test_check_record() {
        let device = Default::default();
        let head = ClassifierHead::<TestBackend>::new(32, 10, PoolType::Avg, 0.0, &device);
        let same = ClassifierHead::<TestBackend>::new(32, 10, PoolType::Max, 0.2, &device);
        assert!(head.check_record(&same.into_record()).is_ok());

        let narrower = ClassifierHead::<TestBackend>::new(16, 10, PoolType::Avg, 0.0, &device);
        let err = head.check_record(&narrower.into_record()).unwrap_err();
        assert!(matches!(
            err,
            XceptionError::ShapeMismatch { ref block, expected: 32, found: 16 }
                if block == "head.fc.weight[0]"
        ));

        let headless = ClassifierHead::<TestBackend>::new(32, 0, PoolType::Avg, 0.0, &device);
        let err = head.check_record(&headless.into_record()).unwrap_err();
        assert!(matches!(
            err,
            XceptionError::ShapeMismatch { expected: 10, found: 0, .. }
        ));
    }

    #[test]
    fn test_max_pooling() {
        let device = Default::default();
        let head = ClassifierHead::<TestBackend>::new(2, 0, PoolType::Max, 0.0, &device);
        assert_eq!(head.pool_type(), PoolType::Max);

        let x = Tensor::<TestBackend, 1>::from_floats(
            [1.0, 5.0, -2.0, 0.5, -1.0, -3.0, -0.5, -4.0],
            &device,
        )
        .reshape([1, 2, 2, 2]);
        let pooled: Vec<f32> = head.forward(x).into_data().to_vec().unwrap();
        assert_eq!(pooled, vec![5.0, -0.5]);
    }

    #[test]
    fn test_avg_pooling() {
        let device = Default::default();
        let head = ClassifierHead::<TestBackend>::new(2, 0, PoolType::Avg, 0.0, &device);

        let x = Tensor::<TestBackend, 1>::from_floats(
            [1.0, 5.0, -2.0, 0.0, -1.0, -3.0, -0.5, -3.5],
            &device,
        )
        .reshape([1, 2, 2, 2]);
        let pooled: Vec<f32> = head.pool(x).into_data().to_vec().unwrap();
        assert_eq!(pooled, vec![1.0, -2.0]);
    }
}
