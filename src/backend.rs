//! Backend selection
//!
//! `--features cuda` trains and serves on the first CUDA device. Without it
//! everything runs on the CPU through the ndarray backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray<f32>;

/// The autodiff backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Inference never needs gradients
pub type InferenceBackend = DefaultBackend;

/// Get the default device for the selected backend
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    Default::default()
}

/// Human-readable name for the current backend
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
