pub mod directory_manager;
pub mod file_deleter;
pub mod file_reader;
pub mod file_renamer;
pub mod utils;
pub mod writer_file;

/// Filesystem-backed implementation of the file traits in this crate.
#[derive(Debug, Default)]
pub struct LocalFile;

////////////////////////////////////////////////////////////////////////////////////
// Mock
////////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "mocks")]
pub mod mock {
    use std::io;
    use std::path::Path;

    use mockall::mock;

    use crate::file_deleter::FileDeleter;
    use crate::file_reader::{FileReader, FileReaderError};
    use crate::file_renamer::FileRenamer;
    use crate::writer_file::{FileWriter, WriteError};

    mock! {
        pub LocalFile {}

        impl FileReader for LocalFile {
            fn read(&self, file_path: &Path) -> Result<String, FileReaderError>;
            fn read_bytes(&self, file_path: &Path) -> Result<Vec<u8>, FileReaderError>;
            fn read_dir(&self, dir_path: &Path) -> Result<Vec<String>, FileReaderError>;
        }

        impl FileWriter for LocalFile {
            fn write(&self, path: &Path, buf: String) -> Result<(), WriteError>;
            fn write_atomic(&self, path: &Path, buf: &[u8]) -> Result<(), WriteError>;
        }

        impl FileRenamer for LocalFile {
            fn rename(&self, file_path: &Path, rename_path: &Path) -> io::Result<()>;
        }

        impl FileDeleter for LocalFile {
            fn delete(&self, file_path: &Path) -> io::Result<()>;
        }
    }
}
