//! Runtime registry
//!
//! Discovers language runtimes installed under `<data_directory>/packages/`
//! rather than requiring every supported language to be compiled into
//! [`crate::config::Config::languages`] ahead of time. Each installed
//! runtime is a directory:
//!
//! ```text
//! <data_directory>/packages/<language>/<version>/
//!   .installed        # sentinel written last by the installer
//!   pkg-info.json      # PackageInfo, including the Language run/compile config
//! ```
//!
//! Resolution supports semver constraints and aliasing, so a request for
//! `"python"` can resolve to whichever installed `python3` satisfies the
//! package's declared `provides` list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::config::Language;
use crate::types::ResourceLimits;

pub(crate) const INSTALLED_SENTINEL: &str = ".installed";
const PACKAGE_INFO_FILE: &str = "pkg-info.json";
const COMPILE_SCRIPT: &str = "compile";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error scanning {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid version in {path}: {source}")]
    InvalidVersion {
        path: PathBuf,
        #[source]
        source: semver::Error,
    },

    #[error("invalid version constraint '{0}': {1}")]
    InvalidConstraint(String, semver::Error),

    #[error("no installed runtime satisfies '{language}' {constraint}")]
    NotFound {
        language: String,
        constraint: String,
    },
}

/// Metadata recorded alongside an installed runtime's files.
///
/// Written by [`crate::package::Installer`] as `pkg-info.json` at the root
/// of each version directory, and read back by the registry on discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Canonical language ID, e.g. `"python3"`.
    pub language: String,

    /// Installed version.
    pub version: Version,

    /// Alternate names this install should also answer to (e.g. `"py"`).
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Abstract capabilities this install satisfies (e.g. a `"python"`
    /// package might declare `provides = ["python3"]`).
    #[serde(default)]
    pub provides: Vec<String>,

    /// Per-stage resource limit overrides bundled with the package,
    /// keyed by `"compile"` or `"run"`. Sits below process-level
    /// [`crate::config::Config::limit_overrides`] and above the process
    /// default limits in precedence.
    #[serde(default)]
    pub limit_overrides: HashMap<String, ResourceLimits>,

    /// Compile/run command configuration for this install.
    pub language_config: Language,

    /// Informational platform tag recorded at install time (e.g.
    /// `"linux-x86_64"`). Not validated against the host.
    #[serde(default)]
    pub build_platform: Option<String>,

    /// Combined stdout+stderr budget, in bytes, for jobs run against this
    /// runtime. Falls back to the process default when absent.
    #[serde(default)]
    pub output_max_bytes: Option<u64>,
}

/// A single installed, discovered language runtime.
#[derive(Debug, Clone)]
pub struct Runtime {
    info: PackageInfo,
    install_dir: PathBuf,
    /// Environment captured from the package's `environment` script at
    /// install time (`<install_dir>/.env`), empty if the package had none.
    env: HashMap<String, String>,
    /// Whether `<install_dir>/compile` exists and is executable, checked on
    /// disk at load time rather than trusted from `pkg-info.json`.
    compile_script_present: bool,
}

impl Runtime {
    pub fn language(&self) -> &str {
        &self.info.language
    }

    pub fn version(&self) -> &Version {
        &self.info.version
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn info(&self) -> &PackageInfo {
        &self.info
    }

    pub fn language_config(&self) -> &Language {
        &self.info.language_config
    }

    /// Whether this runtime has a compile stage. Reflects the on-disk
    /// presence of an executable `compile` script, checked independently of
    /// `pkg-info.json`'s `language_config.compile` field.
    pub fn has_compile_stage(&self) -> bool {
        self.compile_script_present
    }

    /// Environment variables captured from the package's `environment`
    /// script at install time.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Combined stdout+stderr budget for this runtime, falling back to
    /// `process_default` when the package didn't declare one.
    pub fn output_max_bytes(&self, process_default: u64) -> u64 {
        self.info.output_max_bytes.unwrap_or(process_default)
    }

    /// Names this runtime answers to when resolving a request: its
    /// canonical language ID plus every alias and provided capability.
    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.info.language.as_str())
            .chain(self.info.aliases.iter().map(String::as_str))
            .chain(self.info.provides.iter().map(String::as_str))
    }

    /// Resolve the three-tier limit precedence for one stage: package
    /// overrides beat process-level overrides beat the process default.
    pub fn resolve_limits(
        &self,
        stage: &str,
        process_overrides: &HashMap<String, ResourceLimits>,
        process_defaults: &ResourceLimits,
    ) -> ResourceLimits {
        let mut limits = process_defaults.clone();
        if let Some(process_override) = process_overrides.get(&self.info.language) {
            limits = limits.with_overrides(process_override);
        }
        if let Some(package_override) = self.info.limit_overrides.get(stage) {
            limits = limits.with_overrides(package_override);
        }
        limits
    }
}

/// Discovers and resolves installed language runtimes under a data
/// directory.
#[derive(Debug)]
pub struct RuntimeRegistry {
    data_directory: PathBuf,
    runtimes: RwLock<HashMap<String, Vec<Arc<Runtime>>>>,
}

impl RuntimeRegistry {
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    fn packages_dir(&self) -> PathBuf {
        self.data_directory.join("packages")
    }

    /// Scan `<data_directory>/packages/*/*/` for installed runtimes and
    /// (re)populate the in-memory index. Directories missing the
    /// `.installed` sentinel are skipped — they are either mid-install or
    /// abandoned by a failed one.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<(), RegistryError> {
        let packages_dir = self.packages_dir();
        let mut index: HashMap<String, Vec<Arc<Runtime>>> = HashMap::new();

        let mut language_dirs = match tokio::fs::read_dir(&packages_dir).await {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                debug!(?packages_dir, "no packages directory yet");
                *self.runtimes.write().await = index;
                return Ok(());
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: packages_dir,
                    source,
                });
            }
        };

        while let Some(language_dir) = language_dirs.next_entry().await.map_err(|source| {
            RegistryError::Io {
                path: packages_dir.clone(),
                source,
            }
        })? {
            if !language_dir.file_type().await.is_ok_and(|ft| ft.is_dir()) {
                continue;
            }

            let mut version_dirs = tokio::fs::read_dir(language_dir.path())
                .await
                .map_err(|source| RegistryError::Io {
                    path: language_dir.path(),
                    source,
                })?;

            while let Some(version_dir) =
                version_dirs
                    .next_entry()
                    .await
                    .map_err(|source| RegistryError::Io {
                        path: language_dir.path(),
                        source,
                    })?
            {
                if !version_dir.file_type().await.is_ok_and(|ft| ft.is_dir()) {
                    continue;
                }

                match self.load_one(&version_dir.path()).await {
                    Ok(Some(runtime)) => {
                        let runtime = Arc::new(runtime);
                        for name in runtime.names() {
                            index.entry(name.to_owned()).or_default().push(runtime.clone());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(
                        path = %version_dir.path().display(),
                        error = %err,
                        "skipping unreadable runtime install"
                    ),
                }
            }
        }

        let count: usize = index.values().map(Vec::len).sum();
        debug!(count, "loaded installed runtimes");
        *self.runtimes.write().await = index;
        Ok(())
    }

    async fn load_one(&self, install_dir: &Path) -> Result<Option<Runtime>, RegistryError> {
        if !tokio::fs::try_exists(install_dir.join(INSTALLED_SENTINEL))
            .await
            .unwrap_or(false)
        {
            return Ok(None);
        }

        let info_path = install_dir.join(PACKAGE_INFO_FILE);
        let raw = tokio::fs::read(&info_path)
            .await
            .map_err(|source| RegistryError::Io {
                path: info_path.clone(),
                source,
            })?;
        let info: PackageInfo =
            serde_json::from_slice(&raw).map_err(|source| RegistryError::Parse {
                path: info_path,
                source,
            })?;

        let env = load_captured_env(install_dir).await;
        let compile_script_present = compile_script_is_executable(install_dir).await;

        Ok(Some(Runtime {
            info,
            install_dir: install_dir.to_path_buf(),
            env,
            compile_script_present,
        }))
    }

    /// Record a freshly installed runtime without a full rescan. Called by
    /// the installer immediately after it finishes writing a new version.
    pub async fn upsert(&self, install_dir: &Path) -> Result<Arc<Runtime>, RegistryError> {
        let runtime = self
            .load_one(install_dir)
            .await?
            .ok_or_else(|| RegistryError::Io {
                path: install_dir.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "install directory missing .installed sentinel",
                ),
            })?;
        let runtime = Arc::new(runtime);

        let mut index = self.runtimes.write().await;
        for name in runtime.names() {
            let entry = index.entry(name.to_owned()).or_default();
            entry.retain(|existing| {
                !(existing.language() == runtime.language() && existing.version() == runtime.version())
            });
            entry.push(runtime.clone());
        }
        Ok(runtime)
    }

    /// Drop a runtime from the index and delete its install directory.
    pub async fn remove(&self, language: &str, version: &Version) -> Result<(), RegistryError> {
        let mut index = self.runtimes.write().await;
        for entries in index.values_mut() {
            entries.retain(|r| !(r.language() == language && r.version() == version));
        }
        index.retain(|_, entries| !entries.is_empty());

        let install_dir = self.packages_dir().join(language).join(version.to_string());
        if tokio::fs::try_exists(&install_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&install_dir)
                .await
                .map_err(|source| RegistryError::Io {
                    path: install_dir,
                    source,
                })?;
        }
        Ok(())
    }

    /// Resolve a language name (canonical, alias, or provided capability)
    /// and optional semver constraint to the best matching installed
    /// runtime. `None` constraint matches the highest installed version.
    pub async fn resolve(
        &self,
        language: &str,
        constraint: Option<&str>,
    ) -> Result<Arc<Runtime>, RegistryError> {
        let req = match constraint {
            Some(c) => Some(
                VersionReq::parse(c)
                    .map_err(|e| RegistryError::InvalidConstraint(c.to_owned(), e))?,
            ),
            None => None,
        };

        let index = self.runtimes.read().await;
        let candidates = index.get(language).into_iter().flatten();

        let best = candidates
            .filter(|r| req.as_ref().is_none_or(|req| req.matches(r.version())))
            .max_by_key(|r| r.version().clone())
            .cloned();

        best.ok_or_else(|| RegistryError::NotFound {
            language: language.to_owned(),
            constraint: constraint.unwrap_or("*").to_owned(),
        })
    }

    /// All installed runtimes, deduplicated by (language, version).
    pub async fn list(&self) -> Vec<Arc<Runtime>> {
        let index = self.runtimes.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for runtime in index.values().flatten() {
            let key = (runtime.language().to_owned(), runtime.version().clone());
            if seen.insert(key) {
                out.push(runtime.clone());
            }
        }
        out
    }
}

/// Parse `<install_dir>/.env` (written by [`crate::package::Installer`]) into
/// a key/value map. Missing file or malformed lines are silently ignored;
/// this is best-effort context for the sandboxed process, not a contract.
async fn load_captured_env(install_dir: &Path) -> HashMap<String, String> {
    let Ok(contents) = tokio::fs::read_to_string(install_dir.join(".env")).await else {
        return HashMap::new();
    };
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

/// Whether `<install_dir>/compile` exists and has at least one executable
/// bit set.
async fn compile_script_is_executable(install_dir: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match tokio::fs::metadata(install_dir.join(COMPILE_SCRIPT)).await {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
