//! Interface to the external native compiler.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendKind;
use crate::config::{artifact_path, env_value};
use crate::dtype::DType;
use crate::naming::KernelSpec;

pub const DEFAULT_COMPILER: &str = "genred-compile";
pub const REQUEST_MANIFEST: &str = "request.json";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} failed (status={status}): stdout='{stdout}' stderr='{stderr}'")]
    Failed {
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("compiler reported success but {path:?} was not produced")]
    MissingArtifact { path: PathBuf },
    #[error("failed to write compile request: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("i/o error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{0}")]
    Other(String),
}

impl CompileError {
    pub fn other(message: impl Into<String>) -> Self {
        CompileError::Other(message.into())
    }
}

/// Everything the native compiler needs to build one kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub kernel_name: String,
    pub formula: String,
    pub aliases: Vec<String>,
    pub dtype: DType,
    pub c_type: String,
    pub lang: BackendKind,
    pub flags: Vec<String>,
    pub build_folder: PathBuf,
    pub artifact: PathBuf,
}

impl CompileRequest {
    pub fn new(spec: &KernelSpec, build_folder: &Path) -> Self {
        let kernel_name = spec.kernel_name();
        Self {
            artifact: artifact_path(build_folder, &kernel_name),
            kernel_name,
            formula: spec.formula.clone(),
            aliases: spec.aliases.clone(),
            dtype: spec.dtype,
            c_type: spec.dtype.c_type().to_string(),
            lang: spec.lang,
            flags: spec.flags.clone(),
            build_folder: build_folder.to_path_buf(),
        }
    }
}

/// Builds a kernel artifact inside `request.build_folder` and returns its
/// path.
pub trait KernelCompiler: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError>;
}

impl<F> KernelCompiler for F
where
    F: Fn(&CompileRequest) -> Result<PathBuf, CompileError> + Send + Sync,
{
    fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
        self(request)
    }
}

/// Runs an external compiler executable:
///
/// ```text
/// <program> compile --request <build>/request.json --out <artifact>
/// ```
///
/// with the build folder as working directory.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    extra_args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Program from `GENRED_COMPILER`, else [`DEFAULT_COMPILER`].
    pub fn from_env() -> Self {
        Self::new(env_value("GENRED_COMPILER").unwrap_or_else(|| DEFAULT_COMPILER.to_string()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl KernelCompiler for CommandCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
        let manifest = request.build_folder.join(REQUEST_MANIFEST);
        let body = serde_json::to_vec_pretty(request)?;
        fs::write(&manifest, body).map_err(|source| CompileError::Io {
            path: manifest.clone(),
            source,
        })?;

        let output = Command::new(&self.program)
            .current_dir(&request.build_folder)
            .arg("compile")
            .arg("--request")
            .arg(&manifest)
            .arg("--out")
            .arg(&request.artifact)
            .args(&self.extra_args)
            .output()
            .map_err(|source| CompileError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompileError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stdout: stdout.trim().to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        if !request.artifact.is_file() {
            return Err(CompileError::MissingArtifact {
                path: request.artifact.clone(),
            });
        }
        Ok(request.artifact.clone())
    }
}
