//! Build configuration threaded through the cache and the loader.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BIN_FOLDER: &str = ".cache/genred";
pub const DEFAULT_LOCK_FILE_NAME: &str = "genred_build.lock";

/// Compilation mode. Release build folders are disposable once the artifact
/// is installed; Debug folders are kept and kernels are always rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildType {
    #[default]
    Release,
    Debug,
}

impl BuildType {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildType::Release => "Release",
            BuildType::Debug => "Debug",
        }
    }

    pub fn is_release(self) -> bool {
        matches!(self, BuildType::Release)
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBuildTypeError(String);

impl fmt::Display for ParseBuildTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown build type '{}' (expected Release or Debug)", self.0)
    }
}

impl std::error::Error for ParseBuildTypeError {}

impl FromStr for BuildType {
    type Err = ParseBuildTypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "release" => Ok(BuildType::Release),
            "debug" => Ok(BuildType::Debug),
            _ => Err(ParseBuildTypeError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub bin_folder: PathBuf,
    #[serde(default)]
    pub build_type: BuildType,
    #[serde(default = "default_lock_file_name")]
    pub lock_file_name: String,
}

fn default_lock_file_name() -> String {
    DEFAULT_LOCK_FILE_NAME.to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIN_FOLDER)
    }
}

impl BuildConfig {
    pub fn new(bin_folder: impl Into<PathBuf>) -> Self {
        Self {
            bin_folder: bin_folder.into(),
            build_type: BuildType::Release,
            lock_file_name: default_lock_file_name(),
        }
    }

    pub fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    pub fn with_lock_file_name(mut self, name: impl Into<String>) -> Self {
        self.lock_file_name = name.into();
        self
    }

    /// Reads `GENRED_BIN_FOLDER` and `GENRED_BUILD_TYPE`, falling back to the
    /// defaults for unset or blank values.
    pub fn from_env() -> Result<Self, ParseBuildTypeError> {
        let bin_folder = env_value("GENRED_BIN_FOLDER")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BIN_FOLDER));
        let build_type = match env_value("GENRED_BUILD_TYPE") {
            Some(value) => value.parse()?,
            None => BuildType::Release,
        };
        Ok(Self::new(bin_folder).with_build_type(build_type))
    }

    pub fn build_folder(&self, kernel_name: &str) -> PathBuf {
        self.bin_folder.join(format!("build-{kernel_name}"))
    }

    pub fn installed_artifact(&self, kernel_name: &str) -> PathBuf {
        artifact_path(&self.bin_folder, kernel_name)
    }
}

pub(crate) fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn lib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        ".dylib"
    } else if cfg!(target_os = "windows") {
        ".dll"
    } else {
        ".so"
    }
}

pub fn artifact_path(dir: &Path, kernel_name: &str) -> PathBuf {
    dir.join(format!("{kernel_name}{}", lib_ext()))
}
