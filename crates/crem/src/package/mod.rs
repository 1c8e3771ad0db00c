//! Package installer
//!
//! Fetches language runtime packages from a remote index, verifies their
//! checksum, unpacks them into the data directory, and registers them with
//! a [`crate::runtime::RuntimeRegistry`].
//!
//! Packages are plain `.tar.gz` archives that already contain a `pkg-info.json`
//! describing the language they provide (see [`crate::runtime::PackageInfo`]);
//! this module's job stops at getting that archive onto disk intact and handing
//! the install directory to the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use semver::Version;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::runtime::{RegistryError, Runtime, RuntimeRegistry};

/// Name of the installed-package index file served by the repository.
const INDEX_FILE: &str = "index.csv";

/// Name the downloaded archive is written to inside the install directory
/// while it's being verified and unpacked.
const ARCHIVE_FILE: &str = "pkg.tar.gz";

/// Environment variables that are never carried into `.env`: they describe
/// the subshell that ran the `environment` script, not the runtime itself.
const ENV_BLOCKLIST: [&str; 4] = ["PWD", "OLDPWD", "_", "SHLVL"];

/// One row of the package index: the highest version of a language/runtime
/// combination available for download.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PackageIndexEntry {
    pub language: String,
    #[serde(deserialize_with = "deserialize_version")]
    pub version: Version,
    #[serde(rename = "sha256-hex")]
    pub sha256: String,
    #[serde(rename = "download-url")]
    pub download_url: String,
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Version::parse(&raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no package found for language '{language}' matching '{constraint}'")]
    NotFound { language: String, constraint: String },

    #[error("language '{0}' version {1} is already installed")]
    AlreadyInstalled(String, Version),

    #[error("failed to download package: {0}")]
    DownloadError(#[from] reqwest::Error),

    #[error("checksum mismatch for {language} {version}: expected {expected}, got {actual}")]
    ChecksumError {
        language: String,
        version: Version,
        expected: String,
        actual: String,
    },

    #[error("failed to extract package: {0}")]
    ExtractError(String),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("no repository URL configured")]
    NoRepository,

    #[error("failed to parse package index: {0}")]
    IndexParse(String),
}

/// Downloads, verifies, and installs language packages from a remote index.
#[derive(Debug, Clone)]
pub struct Installer {
    data_directory: PathBuf,
    repo_url: Option<String>,
    client: reqwest::Client,
}

impl Installer {
    /// Create an installer rooted at `data_directory`, fetching packages from
    /// `repo_url` (e.g. `"https://pkg.example.com/crem"`).
    pub fn new(data_directory: impl Into<PathBuf>, repo_url: Option<String>) -> Self {
        Self {
            data_directory: data_directory.into(),
            repo_url,
            client: reqwest::Client::new(),
        }
    }

    fn packages_root(&self) -> PathBuf {
        self.data_directory.join("packages")
    }

    fn install_dir(&self, language: &str, version: &Version) -> PathBuf {
        self.packages_root().join(language).join(version.to_string())
    }

    /// Fetch and parse the remote package index.
    #[instrument(skip(self))]
    pub async fn fetch_index(&self) -> Result<Vec<PackageIndexEntry>, InstallError> {
        let repo_url = self.repo_url.as_deref().ok_or(InstallError::NoRepository)?;
        let url = format!("{}/{INDEX_FILE}", repo_url.trim_end_matches('/'));

        let body = self.client.get(&url).send().await?.text().await?;

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut entries = Vec::new();
        for record in reader.deserialize() {
            let entry: PackageIndexEntry =
                record.map_err(|e| InstallError::IndexParse(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Pick the highest version of `language` satisfying `constraint` (or any
    /// version if `constraint` is `None`).
    fn pick_best<'a>(
        entries: &'a [PackageIndexEntry],
        language: &str,
        constraint: Option<&str>,
    ) -> Option<&'a PackageIndexEntry> {
        let req = match constraint {
            Some(c) => semver::VersionReq::parse(c).ok()?,
            None => semver::VersionReq::STAR,
        };

        entries
            .iter()
            .filter(|e| e.language == language && req.matches(&e.version))
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    /// Download, verify, unpack, and register a language package.
    ///
    /// `constraint` is a semver requirement string (e.g. `"^3.11"`); `None`
    /// installs the highest available version.
    #[instrument(skip(self, registry))]
    pub async fn install(
        &self,
        language: &str,
        constraint: Option<&str>,
        registry: &RuntimeRegistry,
    ) -> Result<std::sync::Arc<Runtime>, InstallError> {
        let entries = self.fetch_index().await?;
        let entry = Self::pick_best(&entries, language, constraint).ok_or_else(|| {
            InstallError::NotFound {
                language: language.to_owned(),
                constraint: constraint.unwrap_or("*").to_owned(),
            }
        })?;

        let install_dir = self.install_dir(&entry.language, &entry.version);

        if install_dir.join(crate::runtime::INSTALLED_SENTINEL).exists() {
            return Err(InstallError::AlreadyInstalled(
                entry.language.clone(),
                entry.version.clone(),
            ));
        }

        // Residue from a crashed previous install attempt: installs are not
        // atomic across a crash, so a non-empty, non-sentineled directory
        // from a prior attempt is cleared before we start over.
        if install_dir.exists() {
            warn!(dir = %install_dir.display(), "removing partial install residue");
            tokio::fs::remove_dir_all(&install_dir).await?;
        }
        tokio::fs::create_dir_all(&install_dir).await?;

        if let Err(e) = self.download_and_verify(entry, &install_dir).await {
            let _ = tokio::fs::remove_dir_all(&install_dir).await;
            return Err(e);
        }

        if let Err(e) = self.extract(&install_dir).await {
            let _ = tokio::fs::remove_dir_all(&install_dir).await;
            return Err(e);
        }

        // Remove the archive now that it's unpacked.
        let _ = tokio::fs::remove_file(install_dir.join(ARCHIVE_FILE)).await;

        self.capture_environment(&install_dir).await?;
        self.write_sentinel(&install_dir).await?;

        Ok(registry.upsert(&install_dir).await?)
    }

    /// Download the archive to `<install_dir>/pkg.tar.gz`, hashing it as it
    /// streams to disk, then verify the digest against the index entry.
    async fn download_and_verify(
        &self,
        entry: &PackageIndexEntry,
        install_dir: &Path,
    ) -> Result<(), InstallError> {
        let archive_path = install_dir.join(ARCHIVE_FILE);
        let mut response = self.client.get(&entry.download_url).send().await?;

        let mut file = tokio::fs::File::create(&archive_path).await?;
        let mut hasher = Sha256::new();

        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        let digest = hasher.finalize();
        let actual = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();

        if actual != entry.sha256.to_lowercase() {
            return Err(InstallError::ChecksumError {
                language: entry.language.clone(),
                version: entry.version.clone(),
                expected: entry.sha256.clone(),
                actual,
            });
        }

        debug!(language = entry.language, version = %entry.version, "checksum verified");
        Ok(())
    }

    /// Extract `pkg.tar.gz` into `install_dir`. Runs on a blocking thread
    /// since `flate2`/`tar` are synchronous.
    async fn extract(&self, install_dir: &Path) -> Result<(), InstallError> {
        let archive_path = install_dir.join(ARCHIVE_FILE);
        let dest = install_dir.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), InstallError> {
            let file = std::fs::File::open(&archive_path)
                .map_err(|e| InstallError::ExtractError(e.to_string()))?;
            let gz = flate2::read::GzDecoder::new(file);
            let mut archive = tar::Archive::new(gz);
            archive
                .unpack(&dest)
                .map_err(|e| InstallError::ExtractError(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| InstallError::ExtractError(e.to_string()))??;

        Ok(())
    }

    /// Source the package's `environment` script (if present) in a bash
    /// subshell and capture the resulting environment into `.env`, minus the
    /// handful of variables that describe the subshell rather than the
    /// runtime.
    async fn capture_environment(&self, install_dir: &Path) -> Result<(), InstallError> {
        let script = install_dir.join("environment");
        if !tokio::fs::metadata(&script).await.is_ok() {
            return Ok(());
        }

        let output = tokio::process::Command::new("bash")
            .arg("-c")
            .arg(format!("source \"{}\" && env", script.display()))
            .current_dir(install_dir)
            .output()
            .await?;

        if !output.status.success() {
            return Err(InstallError::ExtractError(format!(
                "environment script exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut captured: HashMap<String, String> = HashMap::new();
        for line in stdout.lines() {
            if let Some((key, value)) = line.split_once('=') {
                if ENV_BLOCKLIST.contains(&key) {
                    continue;
                }
                captured.insert(key.to_owned(), value.to_owned());
            }
        }

        let mut contents = String::new();
        let mut keys: Vec<_> = captured.keys().collect();
        keys.sort();
        for key in keys {
            contents.push_str(key);
            contents.push('=');
            contents.push_str(&captured[key]);
            contents.push('\n');
        }

        tokio::fs::write(install_dir.join(".env"), contents).await?;
        Ok(())
    }

    async fn write_sentinel(&self, install_dir: &Path) -> Result<(), InstallError> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        tokio::fs::write(
            install_dir.join(crate::runtime::INSTALLED_SENTINEL),
            timestamp.to_string(),
        )
        .await?;
        Ok(())
    }

    /// Remove an installed package and unregister it.
    #[instrument(skip(self, registry))]
    pub async fn uninstall(
        &self,
        language: &str,
        version: &Version,
        registry: &RuntimeRegistry,
    ) -> Result<(), InstallError> {
        let install_dir = self.install_dir(language, version);
        if install_dir.exists() {
            tokio::fs::remove_dir_all(&install_dir).await?;
        }
        registry.remove(language, version).await?;
        Ok(())
    }
}
