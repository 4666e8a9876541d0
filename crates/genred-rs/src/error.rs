use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::cache::CacheError;
use crate::compiler::CompileError;
use crate::config::ParseBuildTypeError;
use crate::shape::IncompatibleShape;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Shape(#[from] IncompatibleShape),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Config(#[from] ParseBuildTypeError),
    #[error("axis should be 0 or 1, got {0}")]
    InvalidAxis(u8),
    #[error("category should be Vi (0) or Vj (1), got {0}")]
    InvalidCategory(u8),
    #[error("unknown dtype '{0}'")]
    UnknownDType(String),
    #[error("lang should be the empty string, \"numpy\" or \"torch\", got '{0}'")]
    UnknownLang(String),
    #[error("element count of shape {shape:?} overflows usize")]
    ElementCountOverflow { shape: Vec<usize> },
    #[error("kernel '{name}' is not resolvable after compilation")]
    ArtifactNotFound { name: String },
    #[error("failed to load {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
