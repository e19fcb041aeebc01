use serde::Deserialize;
use thiserror::Error;

use crate::package_id::PackageVersion;

/// Action verb of an install request.
pub const INSTALL_ACTION: &str = "Install";
/// Action verb of an uninstall request.
pub const UNINSTALL_ACTION: &str = "Uninstall";

const KNOWN_CHANNELS: [&str; 2] = ["beta", "gamma"];

/// Raw JSON shape of one request, as handed over by the runtime.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawInput {
    name: String,
    version: String,
    action: String,
    source: String,
    repository: String,
}

/// Validated engine input. The action verb stays a free-form string here;
/// unsupported verbs are rejected during plan computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureRequest {
    pub name: String,
    pub version: PackageVersion,
    pub action: String,
    pub repository: String,
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("invalid format in request properties: {0}")]
    Malformed(String),

    #[error("empty name field")]
    EmptyName,

    #[error("source parameter is not supported in this version")]
    SourceNotSupported,
}

/// Parses the raw request object and validates it: `name` must be non-empty,
/// `source` must be empty (reserved), and unknown `repository` channels are
/// silently normalized to the default channel.
pub fn parse_and_validate(raw: &serde_json::Value) -> Result<ConfigureRequest, InputError> {
    let input: RawInput =
        serde_json::from_value(raw.clone()).map_err(|err| InputError::Malformed(err.to_string()))?;

    if !input.source.is_empty() {
        return Err(InputError::SourceNotSupported);
    }
    if input.name.is_empty() {
        return Err(InputError::EmptyName);
    }

    let repository = if KNOWN_CHANNELS.contains(&input.repository.as_str()) {
        input.repository
    } else {
        String::new()
    };

    Ok(ConfigureRequest {
        name: input.name,
        version: PackageVersion::new(input.version),
        action: input.action,
        repository,
    })
}
