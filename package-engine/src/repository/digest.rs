//! Content digests over manifests and unpacked artifact trees.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Hex sha256 of a byte buffer.
pub fn content_digest(content: &[u8]) -> String {
    hex_bytes(Sha256::digest(content).as_ref())
}

/// Hex sha256 over an unpacked artifact tree: every entry's repository-relative
/// path and, for files, length and content, in sorted path order. Renaming,
/// adding, removing or editing any entry changes the digest.
pub fn tree_digest(root: &Path) -> io::Result<String> {
    let mut entries = Vec::new();
    collect_entries(root, root, &mut entries)?;
    entries.sort();

    let mut hasher = Sha256::new();
    for relative in entries {
        let path = root.join(&relative);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        if path.is_file() {
            let content = fs::read(&path)?;
            hasher.update((content.len() as u64).to_be_bytes());
            hasher.update(&content);
        }
    }
    Ok(hex_bytes(hasher.finalize().as_ref()))
}

fn collect_entries(root: &Path, dir: &Path, entries: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?
            .to_path_buf();
        entries.push(relative);
        if path.is_dir() {
            collect_entries(root, &path, entries)?;
        }
    }
    Ok(())
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn content_digest_is_stable_hex() {
        assert_eq!(
            content_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn tree_digest_detects_content_change() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/run.sh"), "echo one").unwrap();

        let before = tree_digest(dir.path()).unwrap();
        std::fs::write(dir.path().join("bin/run.sh"), "echo two").unwrap();
        let after = tree_digest(dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn tree_digest_detects_added_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a"), "x").unwrap();

        let before = tree_digest(dir.path()).unwrap();
        std::fs::write(dir.path().join("b"), "").unwrap();
        let after = tree_digest(dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn tree_digest_is_independent_of_creation_order() {
        let first = tempdir().unwrap();
        std::fs::write(first.path().join("a"), "1").unwrap();
        std::fs::write(first.path().join("b"), "2").unwrap();

        let second = tempdir().unwrap();
        std::fs::write(second.path().join("b"), "2").unwrap();
        std::fs::write(second.path().join("a"), "1").unwrap();

        assert_eq!(
            tree_digest(first.path()).unwrap(),
            tree_digest(second.path()).unwrap()
        );
    }

    #[test]
    fn tree_digest_fails_for_missing_root() {
        assert!(tree_digest(Path::new("/nonexistent/tree")).is_err());
    }
}
