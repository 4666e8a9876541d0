//! Numeric backend selection.
//!
//! A backend is resolved by name into a [`Tools`] handle exposing the same
//! capability surface for every backend: its default dtype, uniform random
//! host tensors and the generic reduction entry point. Optional runtime
//! dependencies are probed only when their backend is requested.

mod numpy;
mod torch;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use half::f16;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::axis::axis_to_cat;
use crate::dtype::DType;
use crate::error::Result;
use crate::loader::{KernelLoader, LoadedKernel};
use crate::naming::KernelSpec;
use crate::probe::DependencyProbe;
use crate::shape::{checked_element_count, merge_all, IncompatibleShape};

pub use numpy::NumpyTools;
pub use torch::TorchTools;

/// Runtime library the torch backend links against.
pub const TORCH_RUNTIME: &str = "torch";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown backend '{name}' (expected \"numpy\", \"torch\" or \"pytorch\")")]
    Unknown { name: String },
    #[error("backend '{backend}' requires '{dependency}', which is not resolvable")]
    Unavailable {
        backend: BackendKind,
        dependency: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Numpy,
    Torch,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Numpy, BackendKind::Torch];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Numpy => "numpy",
            BackendKind::Torch => "torch",
        }
    }

    /// Runtime library that must be resolvable before the backend can be
    /// constructed.
    pub fn required_dependency(self) -> Option<&'static str> {
        match self {
            BackendKind::Numpy => None,
            BackendKind::Torch => Some(TORCH_RUNTIME),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "numpy" => Ok(BackendKind::Numpy),
            "torch" | "pytorch" => Ok(BackendKind::Torch),
            other => Err(BackendError::Unknown {
                name: other.to_string(),
            }),
        }
    }
}

/// Resolves a backend by name. Unrecognized names fail with
/// [`BackendError::Unknown`].
pub fn resolve_backend(
    name: &str,
    probe: &dyn DependencyProbe,
) -> std::result::Result<Box<dyn Tools>, BackendError> {
    resolve_kind(name.parse()?, probe)
}

pub fn resolve_kind(
    kind: BackendKind,
    probe: &dyn DependencyProbe,
) -> std::result::Result<Box<dyn Tools>, BackendError> {
    match kind {
        BackendKind::Numpy => Ok(Box::new(NumpyTools::new())),
        BackendKind::Torch => Ok(Box::new(TorchTools::load(probe)?)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Dense row-major host tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl HostTensor {
    /// Samples every element uniformly from `[0, 1)`.
    pub fn uniform(shape: &[usize], dtype: DType, rng: &mut dyn RngCore) -> Result<Self> {
        let len = checked_element_count(shape).ok_or_else(|| crate::Error::ElementCountOverflow {
            shape: shape.to_vec(),
        })?;
        let data = match dtype {
            DType::F16 => TensorData::F16(
                (0..len)
                    .map(|_| f16::from_f32(rng.gen::<f32>()))
                    .collect(),
            ),
            DType::F32 => TensorData::F32((0..len).map(|_| rng.gen::<f32>()).collect()),
            DType::F64 => TensorData::F64((0..len).map(|_| rng.gen::<f64>()).collect()),
        };
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        match self.data {
            TensorData::F16(_) => DType::F16,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::F16(values) => values.len(),
            TensorData::F32(values) => values.len(),
            TensorData::F64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }
}

/// A generic reduction: `formula` reduced with `reduction` over `axis`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenredRequest {
    pub formula: String,
    pub aliases: Vec<String>,
    pub reduction: String,
    pub axis: u8,
}

impl GenredRequest {
    pub fn new<I, S>(formula: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            formula: formula.into(),
            aliases: aliases.into_iter().map(Into::into).collect(),
            reduction: "Sum".to_string(),
            axis: 0,
        }
    }

    pub fn reduction(mut self, reduction: impl Into<String>) -> Self {
        self.reduction = reduction.into();
        self
    }

    pub fn axis(mut self, axis: u8) -> Self {
        self.axis = axis;
        self
    }
}

/// A compiled reduction ready for dispatch.
#[derive(Debug, Clone)]
pub struct Routine {
    kernel: LoadedKernel,
    spec: KernelSpec,
    axis: u8,
}

impl Routine {
    pub fn kernel_name(&self) -> &str {
        &self.kernel.name
    }

    pub fn artifact_path(&self) -> &Path {
        &self.kernel.path
    }

    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    pub fn axis(&self) -> u8 {
        self.axis
    }

    /// Broadcast batch shape of the call's inputs; `None` entries carry no
    /// batch dimensions. Must succeed before the kernel is dispatched.
    pub fn batch_shape(
        &self,
        inputs: &[Option<&[usize]>],
    ) -> std::result::Result<Option<Vec<usize>>, IncompatibleShape> {
        merge_all(inputs.iter().copied())
    }

    pub fn open(&self) -> Result<libloading::Library> {
        self.kernel.open()
    }
}

/// Uniform capability surface shared by every backend.
pub trait Tools: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn dtype(&self) -> DType;

    fn rand_from(&self, shape: &[usize], rng: &mut dyn RngCore) -> Result<HostTensor> {
        HostTensor::uniform(shape, self.dtype(), rng)
    }

    fn rand(&self, shape: &[usize]) -> Result<HostTensor> {
        self.rand_from(shape, &mut rand::thread_rng())
    }

    /// Loads, compiling if needed, the kernel for `request` in this
    /// backend's dtype.
    fn genred(&self, loader: &KernelLoader, request: &GenredRequest) -> Result<Routine> {
        let cat = axis_to_cat(request.axis)?;
        let formula = format!(
            "{}_Reduction({},{cat})",
            request.reduction, request.formula
        );
        let spec = KernelSpec::new(
            formula,
            request.aliases.iter().cloned(),
            self.dtype(),
            self.kind(),
        );
        let kernel = loader.load(&spec)?;
        Ok(Routine {
            kernel,
            spec,
            axis: request.axis,
        })
    }
}
