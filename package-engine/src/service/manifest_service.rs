use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::{blob_path, PackageResult, PackageService, ResolvedManifest, ServiceError};
use crate::package_id::{PackageId, PackageVersion};
use crate::repository::PackageRepository;
use crate::trace::Tracer;

pub const SERVICE_NAME: &str = "manifest-service";

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved manifest document served by the manifest service.
#[derive(Debug, Deserialize)]
struct ManifestDocument {
    package_id: String,
    version: String,
}

/// Client of the manifest service: name resolution through served manifest
/// documents, artifact download, result reporting. Manifests are cached in
/// the local repository to detect unchanged content.
pub struct ManifestServiceClient<'a> {
    endpoint: String,
    http: reqwest::blocking::Client,
    repository: &'a dyn PackageRepository,
}

impl<'a> ManifestServiceClient<'a> {
    pub fn new(endpoint: String, repository: &'a dyn PackageRepository) -> Self {
        Self {
            endpoint,
            http: reqwest::blocking::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            repository,
        }
    }
}

impl PackageService for ManifestServiceClient<'_> {
    fn download_manifest(
        &self,
        tracer: &Tracer,
        name: &str,
        version: &PackageVersion,
    ) -> Result<ResolvedManifest, ServiceError> {
        let url = format!(
            "{}/v1/packages/{name}/manifests/{version}",
            self.endpoint
        );
        debug!(%url, "fetching manifest");

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
        let content = response
            .bytes()
            .map_err(|err| ServiceError::Manifest(err.to_string()))?;

        let document: ManifestDocument = serde_json::from_slice(&content)
            .map_err(|err| ServiceError::Manifest(format!("malformed manifest: {err}")))?;
        let package_id = PackageId::try_from(document.package_id)
            .map_err(|err| ServiceError::Manifest(err.to_string()))?;
        let resolved_version = PackageVersion::new(document.version);

        let same_as_cache = self.repository.write_manifest(
            tracer,
            &package_id,
            &resolved_version,
            SERVICE_NAME,
            &content,
        )?;

        Ok(ResolvedManifest {
            package_id,
            version: resolved_version,
            same_as_cache,
        })
    }

    fn download_artifact(
        &self,
        _tracer: &Tracer,
        id: &PackageId,
        version: &PackageVersion,
    ) -> Result<PathBuf, ServiceError> {
        let url = format!("{}/v1/packages/{id}/artifacts/{version}", self.endpoint);
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

        let path = blob_path(id, version);
        std::fs::write(&path, &content).map_err(|err| ServiceError::Artifact(err.to_string()))?;
        Ok(path)
    }

    fn package_service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn report_result(&self, _tracer: &Tracer, result: PackageResult) -> Result<(), ServiceError> {
        let url = format!("{}/v1/results", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&result)
            .send()
            .map_err(|err| ServiceError::Report(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ServiceError::Report(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::LocalFileRepository;
    use assert_matches::assert_matches;
    use httpmock::prelude::*;
    use tempfile::tempdir;

    fn manifest_body(package_id: &str, version: &str) -> String {
        format!("{{\"package_id\":\"{package_id}\",\"name\":\"web\",\"version\":\"{version}\"}}")
    }

    #[test]
    fn download_manifest_resolves_latest_and_caches() {
        let server = MockServer::start();
        let dir = tempdir().unwrap();
        let repository = LocalFileRepository::new(dir.path().to_path_buf());
        let tracer = Tracer::new();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/v1/packages/web/manifests/latest");
            then.status(200).body(manifest_body("arn-web", "1.4.0"));
        });

        let client = ManifestServiceClient::new(server.base_url(), &repository);
        let resolved = client
            .download_manifest(&tracer, "web", &PackageVersion::latest())
            .unwrap();

        mock.assert();
        assert_eq!(resolved.package_id.as_str(), "arn-web");
        assert_eq!(resolved.version, PackageVersion::new("1.4.0"));
        assert!(!resolved.same_as_cache);

        // second fetch of identical content is a cache hit
        let resolved = client
            .download_manifest(&tracer, "web", &PackageVersion::latest())
            .unwrap();
        assert!(resolved.same_as_cache);
    }

    #[test]
    fn download_manifest_propagates_http_failure() {
        let server = MockServer::start();
        let dir = tempdir().unwrap();
        let repository = LocalFileRepository::new(dir.path().to_path_buf());

        server.mock(|when, then| {
            when.method(GET).path("/v1/packages/web/manifests/9.9");
            then.status(404);
        });

        let client = ManifestServiceClient::new(server.base_url(), &repository);
        let result =
            client.download_manifest(&Tracer::new(), "web", &PackageVersion::new("9.9"));
        assert_matches!(result, Err(ServiceError::Manifest(msg)) => {
            assert!(msg.contains("404"));
        });
    }

    #[test]
    fn download_artifact_writes_blob_to_disk() {
        let server = MockServer::start();
        let dir = tempdir().unwrap();
        let repository = LocalFileRepository::new(dir.path().to_path_buf());

        server.mock(|when, then| {
            when.method(GET).path("/v1/packages/arn-web/artifacts/1.4.0");
            then.status(200).body("compressed-bytes");
        });

        let client = ManifestServiceClient::new(server.base_url(), &repository);
        let path = client
            .download_artifact(
                &Tracer::new(),
                &PackageId::try_from("arn-web").unwrap(),
                &PackageVersion::new("1.4.0"),
            )
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "compressed-bytes");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn report_result_posts_payload() {
        let server = MockServer::start();
        let dir = tempdir().unwrap();
        let repository = LocalFileRepository::new(dir.path().to_path_buf());

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/results")
                .json_body_partial("{\"operation\":\"Install\",\"package_name\":\"web\"}");
            then.status(200);
        });

        let client = ManifestServiceClient::new(server.base_url(), &repository);
        client
            .report_result(
                &Tracer::new(),
                PackageResult {
                    exit_code: 0,
                    operation: "Install".to_string(),
                    package_name: "web".to_string(),
                    previous_package_version: None,
                    timing: 0,
                    version: PackageVersion::new("1.4.0"),
                    trace: Vec::new(),
                },
            )
            .unwrap();
        mock.assert();
    }
}
