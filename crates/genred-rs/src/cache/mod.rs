//! Process-safe build cache for native kernel artifacts.
//!
//! Each kernel configuration compiles inside its own build folder. A lock
//! file in that folder serializes compilations of the same configuration
//! across threads and processes; different folders never contend.
//!
//! ```text
//! <bin_folder>/build-<kernel_name>/
//!     genred_build.lock      advisory lock, content unused
//!     ...                    compiler scratch output
//! ```
//!
//! Release folders are discarded once the compiled kernel is resolvable. The
//! build lock is released first and then taken again without blocking for the
//! removal; a folder another builder has locked meanwhile is kept. Waiters
//! that were blocked on the removed lock file notice it is gone and relock a
//! fresh one, so at most one holder exists per folder. A folder that is
//! already gone counts as success.

mod lock;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::{BuildConfig, BuildType};
use crate::probe::DependencyProbe;

pub use lock::FileLock;

/// Bounded retries for the window where a concurrent cleanup removes the
/// folder between `create_dir_all` and opening the lock file.
const MAX_OPEN_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("i/o error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to lock {path:?}: {source}")]
    Lock { path: PathBuf, source: io::Error },
}

/// A directory holding intermediate and compiled artifacts for one kernel
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFolder {
    pub path: PathBuf,
    pub dll_name: String,
    pub build_type: BuildType,
}

impl BuildFolder {
    pub fn new(path: impl Into<PathBuf>, dll_name: impl Into<String>, build_type: BuildType) -> Self {
        Self {
            path: path.into(),
            dll_name: dll_name.into(),
            build_type,
        }
    }

    pub fn for_kernel(config: &BuildConfig, kernel_name: &str) -> Self {
        Self::new(config.build_folder(kernel_name), kernel_name, config.build_type)
    }
}

pub struct BuildCache {
    lock_file_name: String,
    probe: Arc<dyn DependencyProbe>,
}

impl BuildCache {
    pub fn new(config: &BuildConfig, probe: Arc<dyn DependencyProbe>) -> Self {
        Self {
            lock_file_name: config.lock_file_name.clone(),
            probe,
        }
    }

    pub fn lock_path(&self, folder: &BuildFolder) -> PathBuf {
        folder.path.join(&self.lock_file_name)
    }

    /// Creates the folder if needed and blocks until its lock is held. There
    /// is no timeout: a holder that never releases the OS lock blocks every
    /// other caller.
    ///
    /// A lock won on a file that was removed while waiting is dropped and
    /// acquisition starts over on a fresh file.
    pub fn lock(&self, folder: &BuildFolder) -> Result<FileLock, CacheError> {
        let lock_path = self.lock_path(folder);
        let mut attempt = 1;
        loop {
            self.create_folder(folder)?;
            match FileLock::acquire(&lock_path) {
                Ok(lock) => {
                    if lock.is_current()? {
                        return Ok(lock);
                    }
                    debug!(
                        "build lock {} was removed while waiting, relocking",
                        lock_path.display()
                    );
                }
                Err(CacheError::Io { source, .. })
                    if source.kind() == io::ErrorKind::NotFound && attempt < MAX_OPEN_ATTEMPTS =>
                {
                    debug!(
                        "build folder {} vanished before locking, retrying",
                        folder.path.display()
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Non-blocking variant of [`BuildCache::lock`].
    pub fn try_lock(&self, folder: &BuildFolder) -> Result<Option<FileLock>, CacheError> {
        let lock_path = self.lock_path(folder);
        let mut attempt = 1;
        loop {
            self.create_folder(folder)?;
            match FileLock::try_acquire(&lock_path) {
                Ok(Some(lock)) if !lock.is_current()? => {}
                Err(CacheError::Io { source, .. })
                    if source.kind() == io::ErrorKind::NotFound && attempt < MAX_OPEN_ATTEMPTS =>
                {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn create_folder(&self, folder: &BuildFolder) -> Result<(), CacheError> {
        fs::create_dir_all(&folder.path).map_err(|source| CacheError::Io {
            path: folder.path.clone(),
            source,
        })
    }

    /// Runs `compile` exactly once while holding the folder's lock.
    ///
    /// The lock is released on every exit path, including errors and panics
    /// raised by `compile`. An error from `compile` is returned unchanged and
    /// skips cleanup. On success, a Release folder whose kernel is now
    /// resolvable is deleted.
    pub fn compile_guarded<T, E, F>(&self, folder: &BuildFolder, compile: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<CacheError>,
    {
        let result = {
            let _lock = self.lock(folder)?;
            let started = Instant::now();
            let result = compile();
            match &result {
                Ok(_) => info!(
                    "build of {} finished in {:.2?}",
                    folder.dll_name,
                    started.elapsed()
                ),
                Err(_) => debug!(
                    "build of {} failed after {:.2?}",
                    folder.dll_name,
                    started.elapsed()
                ),
            }
            result
        };
        let value = result?;

        if folder.build_type.is_release() && self.probe.is_resolvable(&folder.dll_name) {
            self.discard_folder(folder);
        }
        Ok(value)
    }

    /// Removes a Release folder while holding its lock, so that no builder
    /// ever works in a folder that is being deleted. A folder that is locked
    /// again by a concurrent build is left for that build to clean up.
    fn discard_folder(&self, folder: &BuildFolder) {
        let path = &folder.path;
        if !path.exists() {
            debug!("build folder {} already removed", path.display());
            return;
        }
        let _lock = match self.try_lock(folder) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!("build folder {} is in use, keeping it", path.display());
                return;
            }
            Err(err) => {
                warn!("failed to lock build folder {} for removal: {err}", path.display());
                return;
            }
        };
        match fs::remove_dir_all(path) {
            Ok(()) => debug!("removed build folder {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("build folder {} already removed", path.display())
            }
            Err(err) => warn!("failed to remove build folder {}: {err}", path.display()),
        }
    }
}
