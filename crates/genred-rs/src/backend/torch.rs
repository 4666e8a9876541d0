use std::path::{Path, PathBuf};

use log::debug;

use crate::dtype::DType;
use crate::probe::DependencyProbe;

use super::{BackendError, BackendKind, Tools, TORCH_RUNTIME};

/// Tensor-framework backend. Constructing it requires the `torch` runtime
/// library to be resolvable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorchTools {
    dtype: DType,
    runtime: PathBuf,
}

impl TorchTools {
    pub fn load(probe: &dyn DependencyProbe) -> Result<Self, BackendError> {
        let runtime = probe
            .locate(TORCH_RUNTIME)
            .ok_or(BackendError::Unavailable {
                backend: BackendKind::Torch,
                dependency: TORCH_RUNTIME,
            })?;
        debug!("torch runtime found at {}", runtime.display());
        Ok(Self {
            dtype: DType::F32,
            runtime,
        })
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn runtime(&self) -> &Path {
        &self.runtime
    }
}

impl Tools for TorchTools {
    fn kind(&self) -> BackendKind {
        BackendKind::Torch
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}
