//! Backend selection.
//!
//! Enable the desired Burn backend via feature flags:
//!
//! - `ndarray`: CPU backend (no GPU required)
//! - `wgpu`: WebGPU backend (cross-platform GPU)
//! - `tch`: PyTorch backend via libtorch (CUDA, MPS support)
//! - `cuda`: native CUDA backend (NVIDIA only)

#[cfg(feature = "ndarray")]
pub use burn_ndarray::{NdArray, NdArrayDevice};

#[cfg(feature = "tch")]
pub use burn_tch::{LibTorch, LibTorchDevice};

#[cfg(feature = "wgpu")]
pub use burn_wgpu::{Wgpu, WgpuDevice};

#[cfg(feature = "cuda")]
pub use burn_cuda::{Cuda, CudaDevice};

/// Type alias for the default backend when using the ndarray feature
#[cfg(feature = "ndarray")]
pub type DefaultBackend = NdArray;

/// Type alias for the default backend when using the tch feature
#[cfg(all(feature = "tch", not(feature = "ndarray")))]
pub type DefaultBackend = LibTorch;

/// Type alias for the default backend when using the wgpu feature
#[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch"))))]
pub type DefaultBackend = Wgpu;

/// Type alias for the default backend when using the cuda feature
#[cfg(all(
    feature = "cuda",
    not(any(feature = "ndarray", feature = "tch", feature = "wgpu"))
))]
pub type DefaultBackend = Cuda;

/// Get the default device for the enabled backend
#[cfg(feature = "ndarray")]
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::default()
}

/// Get the default device for the enabled backend
#[cfg(all(feature = "tch", not(feature = "ndarray")))]
pub fn default_device() -> LibTorchDevice {
    if burn_tch::is_cuda_available() {
        LibTorchDevice::Cuda(0)
    } else {
        LibTorchDevice::Cpu
    }
}

/// Get the default device for the enabled backend
#[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch"))))]
pub fn default_device() -> WgpuDevice {
    WgpuDevice::default()
}

/// Get the default device for the enabled backend
#[cfg(all(
    feature = "cuda",
    not(any(feature = "ndarray", feature = "tch", feature = "wgpu"))
))]
pub fn default_device() -> CudaDevice {
    CudaDevice::default()
}
