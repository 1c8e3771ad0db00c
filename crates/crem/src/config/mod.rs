use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_SANDBOX_PATH, FileExtension, Language, RunConfig,
};
use crate::types::{MountConfig, ResourceLimits};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../crem.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-wide configuration for the execution engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the Isolate binary (uses PATH if not specified).
    #[serde(default)]
    pub isolate_path: Option<PathBuf>,

    /// Use cgroup memory limiting instead of RLIMIT_AS.
    ///
    /// When enabled, isolate uses `--cg` and `--cg-mem` which limit actual memory
    /// usage (RSS) rather than virtual address space. This is required for runtimes
    /// like the JVM and Go that map large amounts of virtual memory.
    #[serde(default)]
    pub cgroup: bool,

    /// Cgroup root path for isolate. Must match isolate's `cg_root` config value.
    ///
    /// When `cgroup = true`, the engine will attempt to create this cgroup directory
    /// and enable the memory controller before invoking isolate. This replaces the
    /// need for `isolate-cg-keeper` / systemd in container environments.
    #[serde(default = "default_cg_root")]
    pub cg_root: PathBuf,

    /// Global directory mounts applied to all sandbox invocations
    /// (both compilation and execution).
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Default resource limits applied to all executions.
    /// This will be overridden if the code execution request specifies different limits
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Language configurations keyed by language ID.
    ///
    /// Populated from static TOML entries and/or merged with runtimes
    /// discovered on disk by [`crate::runtime::RuntimeRegistry`].
    #[serde(default)]
    pub languages: HashMap<String, Language>,

    /// Address the transport adapter should bind to, e.g. `"0.0.0.0:8080"`.
    ///
    /// Unused by this crate directly: binding a listener and routing
    /// connections is left to whatever process embeds the engine.
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Root directory holding installed language packages
    /// (`<data_directory>/packages/<language>/<version>/`).
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,

    /// Maximum number of jobs the concurrency gate admits at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Disable networking for sandboxed processes (maps to omitting `--share-net`).
    #[serde(default)]
    pub disable_networking: bool,

    /// Lower bound of the UID range isolate may assign a box to.
    #[serde(default)]
    pub runner_uid_min: Option<u32>,

    /// Upper bound of the UID range isolate may assign a box to.
    #[serde(default)]
    pub runner_uid_max: Option<u32>,

    /// Lower bound of the GID range isolate may assign a box to.
    #[serde(default)]
    pub runner_gid_min: Option<u32>,

    /// Upper bound of the GID range isolate may assign a box to.
    #[serde(default)]
    pub runner_gid_max: Option<u32>,

    /// Base URL of the package index consumed by [`crate::package::Installer`].
    #[serde(default)]
    pub repo_url: Option<String>,

    /// Process-global resource limit overrides, keyed by language ID.
    ///
    /// Sits between a package's own `limit_overrides` (highest precedence)
    /// and the process defaults (lowest precedence) in the three-tier
    /// resolution policy used by [`crate::runtime::RuntimeRegistry`].
    #[serde(default)]
    pub limit_overrides: HashMap<String, ResourceLimits>,

    /// Maximum accepted size, in bytes, of an inbound execute request body.
    ///
    /// Unused by this crate directly; carried for the transport adapter.
    #[serde(default)]
    pub request_body_limit: Option<u64>,

    /// Combined stdout+stderr budget, in bytes, for a job's output.
    ///
    /// Applies uniformly to both batch and streaming execution: each
    /// individual stream is capped at this many bytes, and so is their
    /// concatenation. A runtime's own `output_max_bytes` (from its package
    /// metadata) takes precedence when set.
    #[serde(default = "default_output_max_bytes")]
    pub output_max_bytes: u64,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            isolate_path: None,
            cgroup: false,
            cg_root: default_cg_root(),
            sandbox_mounts: Vec::new(),
            default_limits: ResourceLimits::default(),
            languages: HashMap::new(),
            bind_address: None,
            data_directory: default_data_directory(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            disable_networking: false,
            runner_uid_min: None,
            runner_uid_max: None,
            runner_gid_min: None,
            runner_gid_max: None,
            repo_url: None,
            limit_overrides: HashMap::new(),
            request_body_limit: None,
            output_max_bytes: default_output_max_bytes(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Get the path to the isolate binary
    pub fn isolate_binary(&self) -> PathBuf {
        self.isolate_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("isolate"))
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_cg_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/isolate")
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("/var/lib/crem")
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_output_max_bytes() -> u64 {
    1024 * 1024
}
