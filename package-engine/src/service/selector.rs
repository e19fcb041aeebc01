//! Chooses the [`PackageService`] implementation for one request. The
//! selection is a pure function of the configuration, the detected region and
//! the requested release channel; it holds no state.

use super::manifest_service::ManifestServiceClient;
use super::s3::{is_s3_active, S3PackageClient};
use super::PackageService;
use crate::config::EngineConfig;
use crate::repository::PackageRepository;
use crate::trace::Tracer;

/// Signature of a service selector, injectable for testing.
pub type ServiceSelector = for<'a> fn(
    &Tracer,
    &EngineConfig,
    &str,
    Option<&str>,
    &'a dyn PackageRepository,
) -> Box<dyn PackageService + 'a>;

/// First matching rule wins:
/// 1. `force_remote_manifest` → manifest-service client.
/// 2. Active artifact store for the detected region → s3 client.
/// 3. Otherwise (including an unknown region) → manifest-service client.
pub fn select_service<'a>(
    tracer: &Tracer,
    config: &EngineConfig,
    channel: &str,
    region: Option<&str>,
    repository: &'a dyn PackageRepository,
) -> Box<dyn PackageService + 'a> {
    if config.force_remote_manifest {
        tracer.info_current("remote manifest forced by configuration");
        return Box::new(ManifestServiceClient::new(
            config.manifest_endpoint(channel),
            repository,
        ));
    }

    if let Some(region) = region {
        let base_url = config.artifact_store_url(channel, region);
        if is_s3_active(tracer, &base_url) {
            tracer.info_current("artifact store is marked active");
            return Box::new(S3PackageClient::new(base_url));
        }
        tracer.info_current(&format!(
            "artifact store is not marked active in {region} {channel}"
        ));
    }

    Box::new(ManifestServiceClient::new(
        config.manifest_endpoint(channel),
        repository,
    ))
}
