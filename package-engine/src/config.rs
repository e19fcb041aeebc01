use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_CONFIG_PATH: &str = "/etc/fleet-agent/package-engine.yaml";
const DEFAULT_REPOSITORY_ROOT: &str = "/var/lib/fleet-agent/packages";
const DEFAULT_MANIFEST_SERVICE_ENDPOINT: &str = "https://packages.fleet-manifest.service";
const DEFAULT_ARTIFACT_STORE_ENDPOINT: &str = "https://fleet-packages.artifact.store";
const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 1800;

/// Engine section of the agent configuration document.
///
/// Loading is best-effort: a missing or malformed document yields the
/// defaults so a broken config file cannot take package management down.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Forces the manifest-service path regardless of the artifact-store
    /// availability probe.
    pub force_remote_manifest: bool,
    /// Base URL of the manifest service.
    pub manifest_service_endpoint: String,
    /// Base URL of the region-sharded artifact store.
    pub artifact_store_endpoint: String,
    /// Upper bound for one installer hook invocation, in seconds.
    pub hook_timeout_secs: u64,
    /// Root directory of the local package repository.
    pub repository_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            force_remote_manifest: false,
            manifest_service_endpoint: DEFAULT_MANIFEST_SERVICE_ENDPOINT.to_string(),
            artifact_store_endpoint: DEFAULT_ARTIFACT_STORE_ENDPOINT.to_string(),
            hook_timeout_secs: DEFAULT_HOOK_TIMEOUT_SECS,
            repository_root: PathBuf::from(DEFAULT_REPOSITORY_ROOT),
        }
    }
}

impl EngineConfig {
    /// Loads the default configuration document, falling back to defaults on
    /// any error.
    pub fn load_default() -> Self {
        Self::load(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(config) => config,
                Err(err) => {
                    warn!("invalid engine configuration in {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) => {
                warn!(
                    "engine configuration not readable at {}: {err}",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Manifest-service base URL for a release channel (`""`, `"beta"` or
    /// `"gamma"`); the empty channel is the production endpoint.
    pub fn manifest_endpoint(&self, channel: &str) -> String {
        endpoint_for(&self.manifest_service_endpoint, channel)
    }

    /// Artifact-store base URL for a release channel and region.
    pub fn artifact_store_url(&self, channel: &str, region: &str) -> String {
        format!("{}/{region}", endpoint_for(&self.artifact_store_endpoint, channel))
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }
}

fn endpoint_for(base: &str, channel: &str) -> String {
    if channel.is_empty() {
        base.trim_end_matches('/').to_string()
    } else {
        format!("{}/{channel}", base.trim_end_matches('/'))
    }
}
