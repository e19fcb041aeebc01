//! Host platform probes. All probes are best-effort; a probe failure must
//! never fail a request.

use std::env;
use std::fs;
use std::path::Path;
use tracing::debug;

const REGION_ENV_VAR: &str = "FLEET_REGION";
const REGION_FILE: &str = "/etc/fleet-agent/region";

/// Region the host runs in, if it can be determined. The environment variable
/// takes precedence over the host metadata file.
pub fn region() -> Option<String> {
    region_from(env::var(REGION_ENV_VAR).ok(), Path::new(REGION_FILE))
}

fn region_from(env_value: Option<String>, region_file: &Path) -> Option<String> {
    if let Some(region) = env_value.filter(|value| !value.trim().is_empty()) {
        return Some(region.trim().to_string());
    }
    match fs::read_to_string(region_file) {
        Ok(content) if !content.trim().is_empty() => Some(content.trim().to_string()),
        Ok(_) => None,
        Err(err) => {
            debug!("region file not readable: {err}");
            None
        }
    }
}
