//! Compute backend selection
//!
//! `cuda` selects the CUDA backend; otherwise the NdArray CPU backend
//! (`ndarray`, the default, or its alias `cpu`) is used. Training wraps the
//! backend in `Autodiff`; evaluation runs on the plain backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("Enable one backend feature: `ndarray`, `cpu` or `cuda`");

/// Backend used by the training controller
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Human-readable backend name for the CLI banner
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_matches_features() {
        let name = backend_name();
        if cfg!(feature = "cuda") {
            assert!(name.contains("CUDA"));
        } else {
            assert!(name.contains("CPU"));
        }
    }
}
