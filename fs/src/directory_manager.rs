use std::fs::{remove_dir_all, DirBuilder};
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::instrument;

use super::utils::{get_directory_permissions, validate_path, FsError};

#[derive(Error, Debug, Clone)]
pub enum DirectoryManagementError {
    #[error("cannot create directory `{path}`: {reason}")]
    Create { path: String, reason: String },

    #[error("cannot delete directory `{path}`: {reason}")]
    Delete { path: String, reason: String },

    #[error("invalid directory: {0}")]
    InvalidDirectory(#[from] FsError),
}

pub trait DirectoryManager {
    /// Creates the directory and any missing parents. An already existing
    /// directory is not an error.
    fn create(&self, path: &Path) -> Result<(), DirectoryManagementError>;

    /// Deletes the directory and everything below it. A missing directory is
    /// not an error.
    fn delete(&self, path: &Path) -> Result<(), DirectoryManagementError>;
}

pub struct DirectoryManagerFs;

impl DirectoryManager for DirectoryManagerFs {
    fn create(&self, path: &Path) -> Result<(), DirectoryManagementError> {
        validate_path(path)?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
            builder.mode(get_directory_permissions().mode());
        }
        builder
            .create(path)
            .map_err(|err| DirectoryManagementError::Create {
                path: path.display().to_string(),
                reason: err.to_string(),
            })
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn delete(&self, path: &Path) -> Result<(), DirectoryManagementError> {
        validate_path(path)?;

        match remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DirectoryManagementError::Delete {
                path: path.display().to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////
// Mock
////////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "mocks")]
pub mod mock {
    use super::*;
    use mockall::{mock, predicate};
    use std::path::PathBuf;

    mock! {
        pub DirectoryManager {}

        impl DirectoryManager for DirectoryManager {
            fn create(&self, path: &Path) -> Result<(), DirectoryManagementError>;
            fn delete(&self, path: &Path) -> Result<(), DirectoryManagementError>;
        }
    }

    impl MockDirectoryManager {
        pub fn should_create(&mut self, path: &Path) {
            self.expect_create()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(|_| Ok(()));
        }

        pub fn should_not_create(&mut self, path: &Path, err: DirectoryManagementError) {
            self.expect_create()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(move |_| Err(err.clone()));
        }

        pub fn should_delete(&mut self, path: &Path) {
            self.expect_delete()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(|_| Ok(()));
        }

        pub fn should_not_delete(&mut self, path: &Path, err: DirectoryManagementError) {
            self.expect_delete()
                .with(predicate::eq(PathBuf::from(path)))
                .once()
                .returning(move |_| Err(err.clone()));
        }
    }
}
