//! Backend selection
//!
//! CPU (`NdArray`) by default; the `cuda` feature switches the default
//! backend to CUDA.

use burn::backend::Autodiff;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn::backend::NdArray;

/// Autodiff backend, the only kind on which dropout is active
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device for [`DefaultBackend`]
pub fn default_device() -> <DefaultBackend as burn::tensor::backend::Backend>::Device {
    #[cfg(feature = "cuda")]
    {
        burn_cuda::CudaDevice::default()
    }
    #[cfg(not(feature = "cuda"))]
    {
        burn::backend::ndarray::NdArrayDevice::Cpu
    }
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }
    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}
