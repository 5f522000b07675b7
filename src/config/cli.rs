use crate::core::Storage;
use crate::utils::error::{EtlError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem storage rooted at a base directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        Path::new(&self.base_path).join(path)
    }
}

impl Storage for LocalStorage {
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        fs::read(&full_path).map_err(|source| EtlError::FileError {
            path: full_path,
            source,
        })
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|source| EtlError::FileError {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&full_path, data).map_err(|source| EtlError::FileError {
            path: full_path,
            source,
        })
    }

    fn location(&self, path: &str) -> String {
        self.full_path(path).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_directories() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        storage.write_file("fhir/medications.csv", b"a,b\n").unwrap();

        assert_eq!(storage.read_file("fhir/medications.csv").unwrap(), b"a,b\n");
        assert!(storage
            .location("fhir/medications.csv")
            .ends_with("medications.csv"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        match storage.read_file("absent.json").unwrap_err() {
            EtlError::FileError { path, .. } => assert!(path.ends_with("absent.json")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
