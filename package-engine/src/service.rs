//! Remote package services: manifest resolution, artifact download and
//! result reporting. The engine only depends on the [`PackageService`]
//! contract; concrete clients are selected per request by
//! [`selector::select_service`].

use serde::Serialize;
use thiserror::Error;

use crate::package_id::{PackageId, PackageVersion};
use crate::repository::RepositoryError;
use crate::trace::{TraceRecord, Tracer};

pub mod manifest_service;
pub mod s3;
pub mod selector;

/// A per-process unique scratch path for one downloaded blob; requests may
/// run concurrently for different packages in the same agent.
pub(crate) fn blob_path(
    id: &PackageId,
    version: &PackageVersion,
) -> std::path::PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static DOWNLOAD_SEQ: AtomicU64 = AtomicU64::new(0);
    std::env::temp_dir().join(format!(
        "package-{id}-{version}-{}-{}.tar.gz",
        std::process::id(),
        DOWNLOAD_SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Outcome of resolving a `(name, version hint)` pair against a service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedManifest {
    pub package_id: PackageId,
    pub version: PackageVersion,
    /// The fetched manifest is byte-identical to the locally cached one.
    pub same_as_cache: bool,
}

/// Telemetry record reported back to the service after a request concludes.
#[derive(Debug, Clone, Serialize)]
pub struct PackageResult {
    pub exit_code: i64,
    pub operation: String,
    pub package_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_package_version: Option<PackageVersion>,
    pub timing: u64,
    pub version: PackageVersion,
    pub trace: Vec<TraceRecord>,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("manifest download failed: {0}")]
    Manifest(String),

    #[error("artifact download failed: {0}")]
    Artifact(String),

    #[error("result report failed: {0}")]
    Report(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub trait PackageService {
    /// Resolves a human package name and version hint (including `latest`)
    /// into the canonical id and a concrete version, caching the manifest
    /// locally.
    fn download_manifest(
        &self,
        tracer: &Tracer,
        name: &str,
        version: &PackageVersion,
    ) -> Result<ResolvedManifest, ServiceError>;

    /// Downloads the compressed artifact blob and returns its local path.
    /// The blob is opaque to the engine.
    fn download_artifact(
        &self,
        tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<std::path::PathBuf, ServiceError>;

    /// Stable service identifier; part of the local cache key so switching
    /// services invalidates local content.
    fn package_service_name(&self) -> &'static str;

    /// Best-effort telemetry; a failure is surfaced as a warning on the
    /// request, never as a request failure.
    fn report_result(&self, tracer: &Tracer, result: PackageResult) -> Result<(), ServiceError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mockall::mock;
    use std::path::PathBuf;

    mock! {
        pub(crate) PackageService {}

        impl PackageService for PackageService {
            fn download_manifest(
                &self,
                tracer: &Tracer,
                name: &str,
                version: &PackageVersion,
            ) -> Result<ResolvedManifest, ServiceError>;

            fn download_artifact(
                &self,
                tracer: &Tracer,
                id: &PackageId,
                version: &PackageVersion,
            ) -> Result<PathBuf, ServiceError>;

            fn package_service_name(&self) -> &'static str;

            fn report_result(&self, tracer: &Tracer, result: PackageResult) -> Result<(), ServiceError>;
        }
    }
}
