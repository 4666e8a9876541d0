//! Removal of installed kernel artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::backend::BackendKind;
use crate::cache::CacheError;
use crate::config::{lib_ext, BuildConfig};
use crate::error::{Error, Result};
use crate::naming::KERNEL_NAME_PREFIX;

/// Deletes compiled kernels in `dir`, or in the configured bin folder when
/// `dir` is `None`. With `lang` set to `"numpy"` or `"torch"` only that
/// backend's kernels are removed; `""` removes all of them. Build folders and
/// unrelated files are left alone.
pub fn clean_artifacts(
    config: &BuildConfig,
    dir: Option<&Path>,
    lang: &str,
) -> Result<Vec<PathBuf>> {
    let dir = dir.unwrap_or(config.bin_folder.as_path());
    let marker = match lang {
        "" => KERNEL_NAME_PREFIX.to_string(),
        other => {
            let kind: BackendKind = other
                .parse()
                .map_err(|_| Error::UnknownLang(other.to_string()))?;
            if kind.as_str() != other {
                return Err(Error::UnknownLang(other.to_string()));
            }
            format!("{KERNEL_NAME_PREFIX}_{}", kind.as_str())
        }
    };

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| Error::Cache(CacheError::Io { path, source })
    };

    info!("cleaning {}", dir.display());
    let mut removed = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(lib_ext()) && name.contains(&marker) {
            fs::remove_file(&path).map_err(io_err(&path))?;
            info!("{} has been removed", path.display());
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}
