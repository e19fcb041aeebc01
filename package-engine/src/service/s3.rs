use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::{PackageResult, PackageService, ResolvedManifest, ServiceError};
use crate::package_id::{PackageId, PackageVersion};
use crate::trace::Tracer;

pub const SERVICE_NAME: &str = "s3";

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const LATEST_MARKER: &str = "latest";

/// Probes whether the region-sharded artifact store bucket answers for this
/// host. Any transport or status failure means "not active".
pub fn is_s3_active(tracer: &Tracer, base_url: &str) -> bool {
    let client = match reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            tracer.error_current(&err);
            return false;
        }
    };
    match client.head(base_url).send() {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            debug!("artifact store probe failed: {err}");
            false
        }
    }
}

/// URL-convention client of the region-sharded artifact store. The store
/// serves no manifest documents: names are their own canonical ids, `latest`
/// is resolved from a version marker object, and nothing can be byte-compared
/// against the local manifest cache, so `same_as_cache` is always false.
pub struct S3PackageClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl S3PackageClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::blocking::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn resolve_latest(&self, name: &str) -> Result<PackageVersion, ServiceError> {
        let url = format!("{}/{name}/{LATEST_MARKER}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| ServiceError::Manifest(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ServiceError::Manifest(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let version = response
            .text()
            .map_err(|err| ServiceError::Manifest(err.to_string()))?;
        let version = version.trim();
        if version.is_empty() {
            return Err(ServiceError::Manifest(format!("{url} returned no version")));
        }
        Ok(PackageVersion::new(version))
    }
}

impl PackageService for S3PackageClient {
    fn download_manifest(
        &self,
        _tracer: &Tracer,
        name: &str,
        version: &PackageVersion,
    ) -> Result<ResolvedManifest, ServiceError> {
        let package_id =
            PackageId::try_from(name).map_err(|err| ServiceError::Manifest(err.to_string()))?;
        let version = if version.is_latest() {
            self.resolve_latest(name)?
        } else {
            version.clone()
        };
        Ok(ResolvedManifest {
            package_id,
            version,
            same_as_cache: false,
        })
    }

    fn download_artifact(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<PathBuf, ServiceError> {
        let url = format!("{}/{id}/{version}/{id}.tar.gz", self.base_url);
        debug!(%url, "downloading artifact");

        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| ServiceError::Artifact(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ServiceError::Artifact(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let content = response
            .bytes()
            .map_err(|err| ServiceError::Artifact(err.to_string()))?;

        let path = super::blob_path(id, version);
        std::fs::write(&path, &content).map_err(|err| ServiceError::Artifact(err.to_string()))?;
        Ok(path)
    }

    fn package_service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    /// The artifact store has no reporting endpoint.
    fn report_result(&self, _tracer: &Tracer, result: PackageResult) -> Result<(), ServiceError> {
        debug!(
            package_name = %result.package_name,
            exit_code = result.exit_code,
            "result reporting skipped for the artifact store"
        );
        Ok(())
    }
}
