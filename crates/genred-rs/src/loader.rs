//! Load-or-compile entry point for reduction kernels.
//!
//! A kernel that is already resolvable is used as is. Otherwise, or always in
//! Debug builds, it is compiled under the build cache lock and installed into
//! the bin folder, where the default probe finds it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use libloading::Library;
use log::{debug, info};

use crate::cache::{BuildCache, BuildFolder, CacheError};
use crate::compiler::{CommandCompiler, CompileRequest, KernelCompiler};
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::naming::KernelSpec;
use crate::probe::{DependencyProbe, SearchPathProbe};

/// A compiled kernel that the probe can resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedKernel {
    pub name: String,
    pub path: PathBuf,
}

impl LoadedKernel {
    /// Opens the kernel's dynamic library.
    pub fn open(&self) -> Result<Library> {
        unsafe { Library::new(&self.path) }.map_err(|source| Error::Load {
            path: self.path.clone(),
            source,
        })
    }
}

pub struct KernelLoader {
    config: BuildConfig,
    cache: BuildCache,
    compiler: Box<dyn KernelCompiler>,
    probe: Arc<dyn DependencyProbe>,
}

impl KernelLoader {
    pub fn new(
        config: BuildConfig,
        compiler: impl KernelCompiler + 'static,
        probe: Arc<dyn DependencyProbe>,
    ) -> Self {
        let cache = BuildCache::new(&config, Arc::clone(&probe));
        Self {
            config,
            cache,
            compiler: Box::new(compiler),
            probe,
        }
    }

    /// Configuration, compiler and search path all taken from the
    /// environment.
    pub fn from_env() -> Result<Self> {
        let config = BuildConfig::from_env()?;
        let probe: Arc<dyn DependencyProbe> = Arc::new(SearchPathProbe::from_env(&config));
        Ok(Self::new(config, CommandCompiler::from_env(), probe))
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn probe(&self) -> &Arc<dyn DependencyProbe> {
        &self.probe
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn load(&self, spec: &KernelSpec) -> Result<LoadedKernel> {
        let name = spec.kernel_name();
        if !self.config.build_type.is_release() || !self.probe.is_resolvable(&name) {
            let folder = BuildFolder::for_kernel(&self.config, &name);
            self.cache
                .compile_guarded(&folder, || self.build(spec, &folder))?;
        }
        let path = self
            .probe
            .locate(&name)
            .ok_or_else(|| Error::ArtifactNotFound { name: name.clone() })?;
        Ok(LoadedKernel { name, path })
    }

    fn build(&self, spec: &KernelSpec, folder: &BuildFolder) -> Result<()> {
        // Waiters that lost the race find the kernel already installed.
        if folder.build_type.is_release() && self.probe.is_resolvable(&folder.dll_name) {
            debug!("kernel {} was built while waiting for the lock", folder.dll_name);
            return Ok(());
        }
        info!(
            "compiling kernel {} ({}, {}) in {}",
            folder.dll_name,
            spec.lang,
            spec.dtype,
            folder.path.display()
        );
        let request = CompileRequest::new(spec, &folder.path);
        let built = self.compiler.compile(&request)?;
        install(&built, &self.config.installed_artifact(&folder.dll_name))?;
        Ok(())
    }
}

/// Copies the artifact next to its final location, then renames it so that
/// readers never observe a partially written library.
fn install(built: &Path, dest: &Path) -> std::result::Result<(), CacheError> {
    if built == dest {
        return Ok(());
    }
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| CacheError::Io { path, source }
    };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let file_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = dest.with_file_name(format!(".{file_name}.{}.tmp", process::id()));
    fs::copy(built, &staging).map_err(io_err(built))?;
    fs::rename(&staging, dest).map_err(io_err(dest))?;
    debug!("installed {}", dest.display());
    Ok(())
}
