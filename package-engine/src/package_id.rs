use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

const PACKAGE_ID_MAX_LENGTH: usize = 128;

/// Canonical identifier a remote package service assigns to a package. It is
/// distinct from the user-facing package name and is used as the key of the
/// local repository, so it must be safe to use as a single path component.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Hash, Eq)]
#[serde(try_from = "String")]
#[serde(into = "String")]
pub struct PackageId(String);

impl PackageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PackageId {
    type Error = PackageIdError;
    fn try_from(input: String) -> Result<Self, Self::Error> {
        if package_id_str_validation(&input) {
            Ok(Self(input))
        } else {
            Err(PackageIdError::InvalidFormat(input))
        }
    }
}

impl TryFrom<&str> for PackageId {
    type Error = PackageIdError;
    fn try_from(input: &str) -> Result<Self, Self::Error> {
        Self::try_from(input.to_string())
    }
}

impl From<PackageId> for String {
    fn from(val: PackageId) -> Self {
        val.0
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<Path> for PackageId {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PackageIdError {
    #[error(
        "package id `{0}` must be non-empty, at most 128 characters, contain alphanumeric \
         characters, dashes, underscores or dots only, and not start with a dot"
    )]
    InvalidFormat(String),
}

fn package_id_str_validation(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= PACKAGE_ID_MAX_LENGTH
        && !s.starts_with('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Opaque package version. The `latest` sentinel is recognized on request
/// input only; the remote service resolves it to a concrete version before
/// any local state is inspected.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Clone, Hash, Eq)]
pub struct PackageVersion(String);

/// Version sentinel resolved by the remote service.
pub const LATEST_VERSION: &str = "latest";

impl PackageVersion {
    pub fn new<S: Into<String>>(version: S) -> Self {
        Self(version.into())
    }

    pub fn latest() -> Self {
        Self(LATEST_VERSION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty string and any casing of `latest`.
    pub fn is_latest(&self) -> bool {
        self.0.is_empty() || self.0.eq_ignore_ascii_case(LATEST_VERSION)
    }
}

impl From<&str> for PackageVersion {
    fn from(input: &str) -> Self {
        Self(input.to_string())
    }
}

impl From<String> for PackageVersion {
    fn from(input: String) -> Self {
        Self(input)
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<Path> for PackageVersion {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}
