use crate::dtype::DType;

use super::{BackendKind, Tools};

/// Host-array backend. Needs no optional runtime library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumpyTools {
    dtype: DType,
}

impl NumpyTools {
    pub fn new() -> Self {
        Self { dtype: DType::F64 }
    }

    pub fn with_dtype(dtype: DType) -> Self {
        Self { dtype }
    }
}

impl Default for NumpyTools {
    fn default() -> Self {
        Self::new()
    }
}

impl Tools for NumpyTools {
    fn kind(&self) -> BackendKind {
        BackendKind::Numpy
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}
