use std::fs::File;
use std::path::{Path, PathBuf};

use fs::directory_manager::{DirectoryManager, DirectoryManagerFs};
use fs::file_deleter::FileDeleter;
use fs::file_reader::{FileReader, FileReaderError};
use fs::file_renamer::FileRenamer;
use fs::writer_file::FileWriter;
use fs::LocalFile;
use tracing::{debug, instrument, warn};

use super::lock;
use super::{
    digest, ArtifactInfo, DownloadDelegate, InstallState, ManifestCache, PackageRecord,
    PackageRepository, RepositoryError,
};
use crate::config::EngineConfig;
use crate::installer::script::ScriptInstaller;
use crate::installer::Installer;
use crate::package_id::{PackageId, PackageVersion};
use crate::trace::Tracer;

const STATE_FILE: &str = "state.json";
const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = "lock";
const TRACES_FILE: &str = "traces";
const STAGING_PREFIX: &str = ".staging-";

/// [`PackageRepository`] over a directory tree, one subdirectory per package:
///
/// ```text
/// <root>/<package-id>/state.json   persisted record
/// <root>/<package-id>/manifest.json  resolved manifest cache
/// <root>/<package-id>/lock         exclusive lock marker
/// <root>/<package-id>/traces       durable trace buffer
/// <root>/<package-id>/<version>/   unpacked artifact tree
/// ```
///
/// Record, manifest and trace writes are crash-atomic (temp + rename with the
/// containing directory fsynced); artifact refresh stages into a scratch
/// directory and swaps it in with a rename.
pub struct FileRepository<F, D>
where
    F: FileReader + FileWriter + FileRenamer + FileDeleter,
    D: DirectoryManager,
{
    file_rw: F,
    directory_manager: D,
    root: PathBuf,
}

pub type LocalFileRepository = FileRepository<LocalFile, DirectoryManagerFs>;

impl LocalFileRepository {
    pub fn new(root: PathBuf) -> Self {
        Self {
            file_rw: LocalFile,
            directory_manager: DirectoryManagerFs,
            root,
        }
    }
}

impl<F, D> FileRepository<F, D>
where
    F: FileReader + FileWriter + FileRenamer + FileDeleter,
    D: DirectoryManager,
{
    pub fn with_parts(file_rw: F, directory_manager: D, root: PathBuf) -> Self {
        Self {
            file_rw,
            directory_manager,
            root,
        }
    }

    fn package_dir(&self, id: &PackageId) -> PathBuf {
        self.root.join(id)
    }

    fn state_path(&self, id: &PackageId) -> PathBuf {
        self.package_dir(id).join(STATE_FILE)
    }

    fn manifest_path(&self, id: &PackageId) -> PathBuf {
        self.package_dir(id).join(MANIFEST_FILE)
    }

    fn lock_path(&self, id: &PackageId) -> PathBuf {
        self.package_dir(id).join(LOCK_FILE)
    }

    fn traces_path(&self, id: &PackageId) -> PathBuf {
        self.package_dir(id).join(TRACES_FILE)
    }

    fn artifact_dir(&self, id: &PackageId, version: &PackageVersion) -> Result<PathBuf, RepositoryError> {
        Ok(self.package_dir(id).join(version_component(version)?))
    }

    fn staging_dir(&self, id: &PackageId, version: &PackageVersion) -> Result<PathBuf, RepositoryError> {
        Ok(self
            .package_dir(id)
            .join(format!("{STAGING_PREFIX}{}", version_component(version)?)))
    }

    fn ensure_package_dir(&self, id: &PackageId) -> Result<(), RepositoryError> {
        Ok(self.directory_manager.create(&self.package_dir(id))?)
    }

    fn load_record(&self, id: &PackageId) -> Result<Option<PackageRecord>, RepositoryError> {
        match self.file_rw.read(&self.state_path(id)) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|err| {
                RepositoryError::CorruptRecord(id.to_string(), err.to_string())
            }),
            Err(FileReaderError::FileNotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn store_record(&self, id: &PackageId, record: &PackageRecord) -> Result<(), RepositoryError> {
        self.ensure_package_dir(id)?;
        let content = serde_json::to_vec_pretty(record)
            .map_err(|err| RepositoryError::CorruptRecord(id.to_string(), err.to_string()))?;
        Ok(self.file_rw.write_atomic(&self.state_path(id), &content)?)
    }

    /// Makes a completed directory rename durable.
    fn sync_package_dir(&self, id: &PackageId) -> Result<(), RepositoryError> {
        File::open(self.package_dir(id))?.sync_all()?;
        Ok(())
    }
}

impl<F, D> PackageRepository for FileRepository<F, D>
where
    F: FileReader + FileWriter + FileRenamer + FileDeleter,
    D: DirectoryManager,
{
    fn lock_package(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        action: &str,
    ) -> Result<(), RepositoryError> {
        self.ensure_package_dir(id)?;
        lock::acquire(&self.lock_path(id), action).map_err(|err| {
            tracer.error_current(&err);
            RepositoryError::AlreadyLocked {
                package_id: id.to_string(),
                action: action.to_string(),
            }
        })
    }

    fn unlock_package(&self, tracer: &Tracer, id: &PackageId) {
        if let Err(err) = lock::release(&self.lock_path(id)) {
            tracer.error_current(&format!("failed to release lock for {id}: {err}"));
        }
    }

    fn get_installed_version(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
    ) -> Result<Option<PackageVersion>, RepositoryError> {
        Ok(self.load_record(id)?.and_then(|record| record.installed_version))
    }

    fn get_install_state(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
    ) -> Result<(InstallState, Option<PackageVersion>), RepositoryError> {
        match self.load_record(id)? {
            Some(record) => Ok((record.state, record.current_version)),
            None => Ok((InstallState::None, None)),
        }
    }

    #[instrument(skip_all, fields(package_id = %id, version = %version, state = ?state))]
    fn set_install_state(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
        state: InstallState,
    ) -> Result<(), RepositoryError> {
        let mut record = self.load_record(id)?.unwrap_or_default();
        record.state = state;
        record.current_version = Some(version.clone());
        match state {
            InstallState::Installed => record.installed_version = Some(version.clone()),
            InstallState::Uninstalled => record.installed_version = None,
            _ => {}
        }
        self.store_record(id, &record)
    }

    fn validate_package(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<(), RepositoryError> {
        let mismatch = |reason: &str| RepositoryError::IntegrityMismatch {
            package_id: id.to_string(),
            version: version.to_string(),
            reason: reason.to_string(),
        };

        let record = self.load_record(id)?.ok_or_else(|| mismatch("no record"))?;
        let info = record
            .artifacts
            .get(version.as_str())
            .ok_or_else(|| mismatch("no artifact recorded for this version"))?;

        let expected_tree = info
            .artifact_digest
            .as_deref()
            .ok_or_else(|| mismatch("artifact digest cleared by an interrupted refresh"))?;
        let artifact_dir = self.artifact_dir(id, version)?;
        let actual_tree = digest::tree_digest(&artifact_dir)
            .map_err(|err| mismatch(&format!("artifact tree unreadable: {err}")))?;
        if actual_tree != expected_tree {
            return Err(mismatch("artifact tree digest mismatch"));
        }

        let expected_manifest = info
            .manifest_digest
            .as_deref()
            .ok_or_else(|| mismatch("no manifest digest recorded for this version"))?;
        // The cache file holds the manifest of the most recently resolved
        // version; only then can it be re-hashed against this version.
        if record
            .manifest
            .as_ref()
            .is_some_and(|cache| &cache.version == version)
        {
            let content = self
                .file_rw
                .read_bytes(&self.manifest_path(id))
                .map_err(|err| mismatch(&format!("manifest cache unreadable: {err}")))?;
            if digest::content_digest(&content) != expected_manifest {
                return Err(mismatch("manifest content mismatch"));
            }
        }

        Ok(())
    }

    fn refresh_package(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
        service_name: &str,
        download: &DownloadDelegate<'_>,
    ) -> Result<(), RepositoryError> {
        let section = tracer.begin_section("refresh package content");
        self.ensure_package_dir(id)?;
        let artifact_dir = self.artifact_dir(id, version)?;
        let staging_dir = self.staging_dir(id, version)?;

        // Clear the recorded digest first: a crash anywhere below leaves the
        // record failing validation, which forces another refresh.
        let mut record = self.load_record(id)?.unwrap_or_default();
        let entry = record.artifacts.entry(version.as_str().to_string()).or_default();
        entry.artifact_digest = None;
        entry.service_name = service_name.to_string();
        self.store_record(id, &record)?;

        self.directory_manager.delete(&artifact_dir)?;
        self.directory_manager.delete(&staging_dir)?;
        self.directory_manager.create(&staging_dir)?;

        let downloaded = download(tracer, &staging_dir);
        if let Err(err) = downloaded {
            section.with_error(&err);
            section.end();
            if let Err(cleanup_err) = self.directory_manager.delete(&staging_dir) {
                warn!("failed to remove staging directory: {cleanup_err}");
            }
            return Err(err);
        }

        self.file_rw
            .rename(&staging_dir, &artifact_dir)
            .map_err(RepositoryError::Io)?;
        self.sync_package_dir(id)?;

        let tree = digest::tree_digest(&artifact_dir)?;
        let mut record = self.load_record(id)?.unwrap_or_default();
        let manifest_digest = record
            .manifest
            .as_ref()
            .filter(|cache| &cache.version == version)
            .map(|cache| cache.digest.clone())
            .or_else(|| {
                record
                    .artifacts
                    .get(version.as_str())
                    .and_then(|info| info.manifest_digest.clone())
            });
        record.artifacts.insert(
            version.as_str().to_string(),
            ArtifactInfo {
                artifact_digest: Some(tree),
                manifest_digest,
                service_name: service_name.to_string(),
            },
        );
        self.store_record(id, &record)?;

        debug!(package_id = %id, version = %version, "refreshed package content");
        section.end();
        Ok(())
    }

    fn get_installer(
        &self,
        config: &EngineConfig,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Box<dyn Installer> {
        let artifact_dir = self
            .artifact_dir(id, version)
            .unwrap_or_else(|_| self.package_dir(id).join("invalid-version"));
        Box::new(ScriptInstaller::new(
            id.clone(),
            version.clone(),
            artifact_dir,
            config.hook_timeout(),
        ))
    }

    fn write_manifest(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
        service_name: &str,
        content: &[u8],
    ) -> Result<bool, RepositoryError> {
        let incoming_digest = digest::content_digest(content);
        let mut record = self.load_record(id)?.unwrap_or_default();

        let cached = record.manifest.as_ref().is_some_and(|cache| {
            &cache.version == version
                && cache.digest == incoming_digest
                && cache.service_name == service_name
        });
        if cached {
            // same-as-cache holds only while the cache file itself is intact
            if let Ok(on_disk) = self.file_rw.read_bytes(&self.manifest_path(id)) {
                if digest::content_digest(&on_disk) == incoming_digest {
                    return Ok(true);
                }
            }
        }

        self.ensure_package_dir(id)?;
        self.file_rw.write_atomic(&self.manifest_path(id), content)?;
        record.manifest = Some(ManifestCache {
            version: version.clone(),
            digest: incoming_digest.clone(),
            service_name: service_name.to_string(),
        });
        record
            .artifacts
            .entry(version.as_str().to_string())
            .or_default()
            .manifest_digest = Some(incoming_digest);
        self.store_record(id, &record)?;
        Ok(false)
    }

    #[instrument(skip_all, fields(package_id = %id, version = %version))]
    fn remove_package(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<(), RepositoryError> {
        self.directory_manager.delete(&self.artifact_dir(id, version)?)?;
        if let Some(mut record) = self.load_record(id)? {
            record.artifacts.remove(version.as_str());
            self.store_record(id, &record)?;
        }
        Ok(())
    }

    fn load_traces(&self, tracer: &Tracer, id: &PackageId) -> Result<(), RepositoryError> {
        let path = self.traces_path(id);
        let content = match self.file_rw.read(&path) {
            Ok(content) => content,
            Err(FileReaderError::FileNotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let records = serde_json::from_str(&content)
            .map_err(|err| RepositoryError::Traces(err.to_string()))?;
        tracer.load_prior(records);
        // consumed: the buffer belongs to the transition that persisted it
        self.file_rw.delete(&path)?;
        Ok(())
    }

    fn persist_traces(&self, tracer: &Tracer, id: &PackageId) -> Result<(), RepositoryError> {
        self.ensure_package_dir(id)?;
        let content = serde_json::to_vec(&tracer.records())
            .map_err(|err| RepositoryError::Traces(err.to_string()))?;
        Ok(self.file_rw.write_atomic(&self.traces_path(id), &content)?)
    }
}

/// A version is used as a single path component under the package directory.
fn version_component(version: &PackageVersion) -> Result<&str, RepositoryError> {
    let raw = version.as_str();
    let valid = !raw.is_empty()
        && raw != "."
        && raw != ".."
        && raw != STATE_FILE
        && raw != MANIFEST_FILE
        && raw != LOCK_FILE
        && raw != TRACES_FILE
        && !raw.starts_with(STAGING_PREFIX)
        && !raw.contains(['/', '\\'])
        && !raw.contains("..");
    if valid {
        Ok(raw)
    } else {
        Err(RepositoryError::InvalidVersion(raw.to_string()))
    }
}
