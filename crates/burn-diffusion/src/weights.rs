//! Model weight access.
//!
//! The engine only needs named tensors; where they come from (file
//! format, quantization) is the store's concern. The bundled
//! implementation memory-maps a `.safetensors` file and decodes
//! f32/f16/bf16 on demand.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use burn::prelude::*;
use half::{bf16, f16};
use memmap2::{Mmap, MmapOptions};
use safetensors::{Dtype, SafeTensors};

use crate::error::EngineError;

/// Named tensor supplier; read-mostly and shareable across runs.
pub trait WeightStore {
    /// Fetch a tensor's raw data by name.
    fn tensor_data(&self, name: &str) -> Result<TensorData, EngineError>;

    fn contains(&self, name: &str) -> bool;

    fn names(&self) -> Vec<String>;
}

/// Load a named tensor onto a device.
pub fn load_tensor<B: Backend, const D: usize>(
    store: &dyn WeightStore,
    name: &str,
    device: &B::Device,
) -> Result<Tensor<B, D>, EngineError> {
    Ok(Tensor::from_data(store.tensor_data(name)?, device))
}

struct TensorInfo {
    dtype: Dtype,
    shape: Vec<usize>,
    start: usize,
    end: usize,
}

/// Memory-mapped safetensors weight store.
pub struct SafeTensorStore {
    mmap: Mmap,
    tensors: HashMap<String, TensorInfo>,
}

impl SafeTensorStore {
    /// Open a `.safetensors` file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let parsed = SafeTensors::deserialize(&mmap)?;
        let base = mmap.as_ptr() as usize;
        let mut tensors = HashMap::new();
        for (name, view) in parsed.tensors() {
            let start = view.data().as_ptr() as usize - base;
            tensors.insert(
                name.to_string(),
                TensorInfo {
                    dtype: view.dtype(),
                    shape: view.shape().to_vec(),
                    start,
                    end: start + view.data().len(),
                },
            );
        }

        Ok(Self { mmap, tensors })
    }
}

impl WeightStore for SafeTensorStore {
    fn tensor_data(&self, name: &str) -> Result<TensorData, EngineError> {
        let info = self
            .tensors
            .get(name)
            .ok_or_else(|| EngineError::MissingTensor(name.to_string()))?;

        let bytes = &self.mmap[info.start..info.end];
        let values = decode_f32(info.dtype, bytes)?;
        Ok(TensorData::new(values, info.shape.clone()))
    }

    fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        self.tensors.keys().cloned().collect()
    }
}

fn decode_f32(dtype: Dtype, bytes: &[u8]) -> Result<Vec<f32>, EngineError> {
    match dtype {
        Dtype::F32 => Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()),
        Dtype::F16 => Ok(bytes
            .chunks_exact(2)
            .map(|chunk| f16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
            .collect()),
        Dtype::BF16 => Ok(bytes
            .chunks_exact(2)
            .map(|chunk| bf16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
            .collect()),
        other => Err(EngineError::UnsupportedDtype(other)),
    }
}
