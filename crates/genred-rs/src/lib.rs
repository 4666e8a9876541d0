//! Build-side plumbing for generic reduction kernels.
//!
//! Reduction kernels are compiled on demand by an external native compiler and
//! cached on disk. This crate owns the parts around that compiler: the
//! process-safe build cache, batch-dimension broadcasting checks that run
//! before dispatch, and the factory that resolves a numeric backend by name.

pub mod axis;
pub mod backend;
pub mod cache;
pub mod clean;
pub mod compiler;
pub mod config;
pub mod dtype;
mod error;
pub mod hashing;
pub mod loader;
pub mod naming;
pub mod probe;
pub mod shape;

pub use backend::{resolve_backend, BackendError, BackendKind, Tools};
pub use cache::{BuildCache, BuildFolder, CacheError};
pub use compiler::{CommandCompiler, CompileError, CompileRequest, KernelCompiler};
pub use config::{BuildConfig, BuildType};
pub use dtype::DType;
pub use error::{Error, Result};
pub use loader::{KernelLoader, LoadedKernel};
pub use naming::KernelSpec;
pub use probe::{DependencyProbe, SearchPathProbe};
pub use shape::{merge_shapes, IncompatibleShape};
