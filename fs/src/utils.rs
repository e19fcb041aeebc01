use regex::Regex;
use std::fs::Permissions;
#[cfg(target_family = "unix")]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("invalid path: `{0}`")]
    InvalidPath(String),

    #[error("dots disallowed in path `{0}`")]
    DotsDisallowed(String),
}

fn traversal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.\.").unwrap())
}

/// Refuses paths this crate will not touch: anything that is not valid
/// unicode, and anything containing a parent-directory reference. The check
/// is platform-independent.
pub fn validate_path(path: &Path) -> Result<(), FsError> {
    let raw = path.to_str().ok_or_else(|| {
        FsError::InvalidPath(format!("{} is not valid unicode", path.to_string_lossy()))
    })?;
    if traversal_pattern().is_match(raw) {
        return Err(FsError::DotsDisallowed(raw.to_string()));
    }
    Ok(())
}

/// Default mode for files this crate creates: owner read/write only.
pub fn get_file_permissions() -> Permissions {
    #[cfg(target_family = "unix")]
    {
        Permissions::from_mode(0o600)
    }
    #[cfg(target_family = "windows")]
    {
        unimplemented!()
    }
}

/// Default mode for directories this crate creates: owner only.
pub fn get_directory_permissions() -> Permissions {
    #[cfg(target_family = "unix")]
    {
        Permissions::from_mode(0o700)
    }
    #[cfg(target_family = "windows")]
    {
        unimplemented!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn plain_paths_pass() {
        validate_path(Path::new("/var/lib/agent/packages")).unwrap();
        validate_path(Path::new("relative/file.json")).unwrap();
        // a single leading dot is a hidden file, not a traversal
        validate_path(Path::new("/tmp/.staging-1.0")).unwrap();
    }

    #[test]
    fn traversal_segments_are_rejected() {
        let result = validate_path(&PathBuf::from("packages/../../etc"));
        assert_eq!(
            result.unwrap_err().to_string(),
            "dots disallowed in path `packages/../../etc`"
        );
    }
}
