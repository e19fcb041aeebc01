use std::io::Write;
use std::path::Path;
use std::{fs, io};

use thiserror::Error;
use tracing::instrument;

use super::directory_manager::DirectoryManagementError;
use super::utils::{validate_path, FsError};
use super::LocalFile;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("directory error: {0}")]
    DirectoryError(#[from] DirectoryManagementError),

    #[error("error creating file: {0}")]
    ErrorCreatingFile(#[from] io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] FsError),

    #[error("{0}")]
    GenericError(String),
}

pub trait FileWriter {
    fn write(&self, path: &Path, buf: String) -> Result<(), WriteError>;

    /// Crash-atomic write: the content becomes visible under `path` entirely
    /// or not at all, and survives a crash at any point.
    fn write_atomic(&self, path: &Path, buf: &[u8]) -> Result<(), WriteError>;
}

impl FileWriter for LocalFile {
    /// Write a file to disk given a path and content.
    /// On Unix the file permissions are set to 600.
    #[instrument(skip_all, fields(path = %path.display()))]
    fn write(&self, path: &Path, content: String) -> Result<(), WriteError> {
        validate_path(path)?;

        let mut file_options = fs::OpenOptions::new();
        file_options.create(true).write(true).truncate(true);

        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            file_options.mode(crate::utils::get_file_permissions().mode());
        }

        file_options.open(path)?.write_all(content.as_bytes())?;

        Ok(())
    }

    /// Writes to a temporary sibling, fsyncs it, renames it over `path` and
    /// fsyncs the containing directory so the rename itself is durable.
    #[instrument(skip_all, fields(path = %path.display()))]
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), WriteError> {
        validate_path(path)?;

        let parent = path.parent().ok_or_else(|| {
            WriteError::GenericError(format!(
                "cannot determine parent directory of `{}`",
                path.display()
            ))
        })?;
        let file_name = path.file_name().ok_or_else(|| {
            WriteError::GenericError(format!("path `{}` has no file name", path.display()))
        })?;

        // The temporary must live in the same directory as the target so the
        // rename stays within one filesystem.
        let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

        let mut file_options = fs::OpenOptions::new();
        file_options.create(true).write(true).truncate(true);

        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            file_options.mode(crate::utils::get_file_permissions().mode());
        }

        let mut tmp = file_options.open(&tmp_path)?;
        tmp.write_all(content)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, path)?;
        fs::File::open(parent)?.sync_all()?;

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////
// Mock
////////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "mocks")]
pub mod mock {
    use super::*;
    use crate::mock::MockLocalFile;
    use mockall::predicate;
    use std::io::{Error, ErrorKind};
    use std::path::PathBuf;

    impl MockLocalFile {
        pub fn should_write(&mut self, path: &Path, content: String) {
            self.expect_write()
                .with(
                    predicate::eq(PathBuf::from(path)),
                    predicate::eq(content),
                )
                .once()
                .returning(|_, _| Ok(()));
        }

        pub fn should_not_write(&mut self, path: &Path, content: String) {
            self.expect_write()
                .with(
                    predicate::eq(PathBuf::from(path)),
                    predicate::eq(content),
                )
                .once()
                .returning(|_, _| {
                    Err(WriteError::ErrorCreatingFile(Error::from(
                        ErrorKind::PermissionDenied,
                    )))
                });
        }

        pub fn should_write_atomic(&mut self, path: &Path, content: Vec<u8>) {
            let path = PathBuf::from(path);
            self.expect_write_atomic()
                .withf(move |p, buf| p == path.as_path() && buf[..] == content[..])
                .once()
                .returning(|_, _| Ok(()));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////
// TESTS
////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
pub mod test {
    use std::fs;
    #[cfg(target_family = "unix")]
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[cfg(target_family = "unix")]
    #[test]
    fn test_file_writer_content_and_permissions() {
        // tempdir gets automatically removed on drop
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("some_file");

        let writer = LocalFile;
        writer.write(path.as_path(), "some content".to_string()).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "some content");
        assert_eq!(
            fs::metadata(&path).unwrap().permissions().mode() & 0o777,
            0o600
        );
    }

    #[test]
    fn test_file_writer_should_not_return_error_if_file_already_exists() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("some_file");

        let writer = LocalFile;
        writer.write(path.as_path(), "some content".to_string()).unwrap();
        writer.write(path.as_path(), "other content".to_string()).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "other content");
    }

    #[test]
    fn test_path_to_write_cannot_contain_dots() {
        let path = std::path::PathBuf::from("some/path/../../etc/passwd");
        let writer = LocalFile;

        let result = writer.write(&path, "".to_string());

        assert!(result.is_err());
        assert_eq!(
            "invalid path: dots disallowed in path `some/path/../../etc/passwd`".to_string(),
            result.unwrap_err().to_string()
        );
    }

    #[test]
    fn test_write_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("state.json");

        let writer = LocalFile;
        writer.write_atomic(&path, b"{\"v\":1}").unwrap();
        writer.write_atomic(&path, b"{\"v\":2}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{\"v\":2}");
        // no temporary left behind
        assert_eq!(fs::read_dir(tempdir.path()).unwrap().count(), 1);
    }
}
