//! "Is this module resolvable?" probes.
//!
//! The cache asks whether a freshly compiled kernel can be found before it
//! discards the build folder, and the backend factory asks whether an optional
//! runtime dependency is installed. Both go through [`DependencyProbe`] so the
//! lookup can be swapped out in tests.

use std::env;
use std::path::PathBuf;

use crate::config::{env_value, lib_ext, BuildConfig};

pub trait DependencyProbe: Send + Sync {
    /// Returns the path of the dynamic library providing `name`, if any.
    fn locate(&self, name: &str) -> Option<PathBuf>;

    fn is_resolvable(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }
}

impl<F> DependencyProbe for F
where
    F: Fn(&str) -> Option<PathBuf> + Send + Sync,
{
    fn locate(&self, name: &str) -> Option<PathBuf> {
        self(name)
    }
}

/// Looks for `<name><ext>` or `lib<name><ext>` in an ordered list of
/// directories. Earlier directories win.
#[derive(Debug, Clone, Default)]
pub struct SearchPathProbe {
    dirs: Vec<PathBuf>,
}

impl SearchPathProbe {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Bin folder first, then every entry of `GENRED_LIBRARY_PATH`.
    pub fn from_env(config: &BuildConfig) -> Self {
        let mut dirs = vec![config.bin_folder.clone()];
        if let Some(value) = env_value("GENRED_LIBRARY_PATH") {
            dirs.extend(env::split_paths(&value).filter(|dir| !dir.as_os_str().is_empty()));
        }
        Self { dirs }
    }

    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl DependencyProbe for SearchPathProbe {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let ext = lib_ext();
        let candidates = [format!("{name}{ext}"), format!("lib{name}{ext}")];
        self.dirs.iter().find_map(|dir| {
            candidates
                .iter()
                .map(|file| dir.join(file))
                .find(|path| path.is_file())
        })
    }
}
