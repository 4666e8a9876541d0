//! Advisory inter-process file locks.
//!
//! `flock` locks belong to the open file description, so two handles opened
//! separately on the same path contend even inside one process. They also
//! belong to the inode: a waiter blocked on a file that is unlinked meanwhile
//! wakes up holding a lock nobody else can see. [`FileLock::is_current`]
//! detects that case.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use super::CacheError;

/// Exclusive lock on a file, released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the exclusive lock on `path` is held. The file is created
    /// if missing; its content is never read.
    pub fn acquire(path: &Path) -> Result<Self, CacheError> {
        let file = open_lock_file(path)?;
        debug!("waiting for build lock {}", path.display());
        sys::lock(&file, true).map_err(|source| CacheError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("acquired build lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns `None` instead of blocking when another holder has the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, CacheError> {
        let file = open_lock_file(path)?;
        match sys::lock(&file, false) {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(CacheError::Lock {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the locked file is still the one reachable at [`FileLock::path`].
    /// Returns `false` once the file was unlinked or replaced by another one.
    pub fn is_current(&self) -> Result<bool, CacheError> {
        sys::same_file(&self.file, &self.path).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = sys::unlock(&self.file);
        debug!("released build lock {}", self.path.display());
    }
}

pub(super) fn open_lock_file(path: &Path) -> Result<File, CacheError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
mod sys {
    use std::fs::{self, File};
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    pub(super) fn lock(file: &File, blocking: bool) -> io::Result<()> {
        let op = if blocking {
            libc::LOCK_EX
        } else {
            libc::LOCK_EX | libc::LOCK_NB
        };
        flock(file, op)
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_UN)
    }

    pub(super) fn same_file(file: &File, path: &Path) -> io::Result<bool> {
        let held = file.metadata()?;
        match fs::metadata(path) {
            Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn flock(file: &File, op: libc::c_int) -> io::Result<()> {
        let fd = file.as_raw_fd();
        loop {
            let rc = unsafe { libc::flock(fd, op) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;
    use std::path::Path;

    pub(super) fn lock(_file: &File, _blocking: bool) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "advisory file locks are only available on unix targets",
        ))
    }

    pub(super) fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub(super) fn same_file(_file: &File, path: &Path) -> io::Result<bool> {
        Ok(path.exists())
    }
}
