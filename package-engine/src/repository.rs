//! Local package repository: the persisted per-package install state, the
//! manifest cache, artifact storage, integrity validation and the per-package
//! cross-process lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::installer::Installer;
use crate::package_id::{PackageId, PackageVersion};
use crate::trace::Tracer;

pub mod digest;
pub mod file_repository;
mod lock;

pub use file_repository::{FileRepository, LocalFileRepository};

/// Persisted install state of one package. Terminal states survive agent
/// restarts; a non-terminal state marks a transition that must be resumed or
/// concluded by the next request for the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    #[default]
    None,
    Installing,
    Installed,
    Uninstalling,
    Uninstalled,
    Failed,
    RollbackInstall,
    RollbackUninstall,
    Unknown,
}

/// Integrity data of one locally stored artifact version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_digest: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
}

/// Metadata of the cached resolved manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestCache {
    pub version: PackageVersion,
    pub digest: String,
    pub service_name: String,
}

/// Persisted record of one package. Created on first reference and never
/// deleted; uninstalling clears `installed_version` and keeps the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageRecord {
    pub state: InstallState,
    pub current_version: Option<PackageVersion>,
    pub installed_version: Option<PackageVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestCache>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, ArtifactInfo>,
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("package `{package_id}` is already locked for `{action}`")]
    AlreadyLocked { package_id: String, action: String },

    #[error("integrity validation failed for `{package_id}` {version}: {reason}")]
    IntegrityMismatch {
        package_id: String,
        version: String,
        reason: String,
    },

    #[error("corrupt package record for `{0}`: {1}")]
    CorruptRecord(String, String),

    #[error("version `{0}` is not usable as a repository path component")]
    InvalidVersion(String),

    #[error("artifact download failed: {0}")]
    Download(String),

    #[error("trace buffer error: {0}")]
    Traces(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Read(#[from] fs::file_reader::FileReaderError),

    #[error(transparent)]
    Write(#[from] fs::writer_file::WriteError),

    #[error(transparent)]
    Directory(#[from] fs::directory_manager::DirectoryManagementError),
}

/// Populates `target_dir` with the unpacked artifact content of one package
/// version; built by the engine around the selected package service.
pub type DownloadDelegate<'a> = dyn Fn(&Tracer, &Path) -> Result<(), RepositoryError> + 'a;

/// Contract of the local package repository. All operations are synchronous
/// and may do I/O; persisted updates are crash-atomic.
pub trait PackageRepository {
    /// Takes the exclusive cross-process lock for `id`. Fails when a live
    /// request holds it; locks left behind by a dead process are reclaimed.
    fn lock_package(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        action: &str,
    ) -> Result<(), RepositoryError>;

    /// Releases the lock; idempotent.
    fn unlock_package(&self, tracer: &Tracer, id: &PackageId);

    fn get_installed_version(
        &self,
        tracer: &Tracer,
        id: &PackageId,
    ) -> Result<Option<PackageVersion>, RepositoryError>;

    /// Returns `(state, current_version)`; `(None, ∅)` for an absent record.
    fn get_install_state(
        &self,
        tracer: &Tracer,
        id: &PackageId,
    ) -> Result<(InstallState, Option<PackageVersion>), RepositoryError>;

    /// Atomic persisted update of `(state, current_version)`. `Installed`
    /// also records `installed_version`; `Uninstalled` clears it.
    fn set_install_state(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
        state: InstallState,
    ) -> Result<(), RepositoryError>;

    /// Verifies the on-disk artifact tree and the manifest against the
    /// recorded digests for `(id, version)`.
    fn validate_package(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<(), RepositoryError>;

    /// Replaces the local artifact content for `(id, version)`: clears the
    /// prior artifact, populates a scratch directory through `download` and
    /// atomically swaps it in. On failure the recorded digest is left cleared
    /// so the next [`PackageRepository::validate_package`] fails.
    fn refresh_package(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
        service_name: &str,
        download: &DownloadDelegate<'_>,
    ) -> Result<(), RepositoryError>;

    /// Builds an installer bound to the on-disk artifact tree.
    fn get_installer(
        &self,
        config: &EngineConfig,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Box<dyn Installer>;

    /// Stores the resolved manifest in the per-package cache. Returns `true`
    /// when the content is byte-identical to what is already cached for the
    /// same `(version, service_name)`.
    fn write_manifest(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
        service_name: &str,
        content: &[u8],
    ) -> Result<bool, RepositoryError>;

    /// Deletes the stored artifact tree for `(id, version)` after a final
    /// uninstall. The record itself is kept.
    fn remove_package(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<(), RepositoryError>;

    /// Loads the durable trace buffer persisted by a previous invocation into
    /// the tracer and clears it.
    fn load_traces(&self, tracer: &Tracer, id: &PackageId) -> Result<(), RepositoryError>;

    /// Persists the tracer's records so an in-progress transition keeps its
    /// trace across a reboot.
    fn persist_traces(&self, tracer: &Tracer, id: &PackageId) -> Result<(), RepositoryError>;
}
