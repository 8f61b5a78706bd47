//! File Catalog
//!
//! Read-only view of the finalized files in the upload directory. The
//! staging directory and anything that is not a regular file stay hidden.

mod range;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;

use crate::upload::{sanitize_filename, UploadError};

pub use range::parse_range;

/// A finalized file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// One page of the listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPage {
    pub files: Vec<CatalogEntry>,

    /// Total number of files, regardless of paging
    pub total: usize,
}

/// Finalized file listing and lookup
#[derive(Debug, Clone)]
pub struct FileCatalog {
    upload_dir: PathBuf,
}

impl FileCatalog {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    /// Every finalized file, ordered by name
    pub async fn list(&self) -> Result<Vec<CatalogEntry>, UploadError> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.upload_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            // Symlinks report their own type here and are skipped
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let metadata = entry.metadata().await?;
            files.push(CatalogEntry {
                name,
                size: metadata.len(),
                modified: DateTime::<Utc>::from(metadata.modified()?),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// A slice of [`list`](Self::list)
    pub async fn page(&self, offset: usize, limit: Option<usize>) -> Result<CatalogPage, UploadError> {
        let all = self.list().await?;
        let total = all.len();
        let files = all
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        Ok(CatalogPage { files, total })
    }

    /// Look up one finalized file by its client-supplied name
    pub async fn lookup(&self, raw_name: &str) -> Result<(CatalogEntry, PathBuf), UploadError> {
        let name = sanitize_filename(raw_name)?;
        let path = self.upload_dir.join(&name);

        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::NotFound(format!("file {}", name)));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(UploadError::NotFound(format!("file {}", name)));
        }

        let entry = CatalogEntry {
            name,
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
        };
        Ok((entry, path))
    }

    /// Open a finalized file for reading
    pub async fn open(&self, raw_name: &str) -> Result<(CatalogEntry, File), UploadError> {
        let (entry, path) = self.lookup(raw_name).await?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            // Removed between lookup and open
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::NotFound(format!("file {}", entry.name)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok((entry, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn catalog_with(files: &[(&str, &str)]) -> (TempDir, FileCatalog) {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::create_dir(temp_dir.path().join(".staging")).await.unwrap();
        for (name, data) in files {
            tokio::fs::write(temp_dir.path().join(name), data).await.unwrap();
        }
        let catalog = FileCatalog::new(temp_dir.path());
        (temp_dir, catalog)
    }

    #[tokio::test]
    async fn test_list_sorted_regular_files_only() {
        let (dir, catalog) = catalog_with(&[("b.txt", "bb"), ("a.txt", "a"), ("c.bin", "ccc")]).await;
        tokio::fs::create_dir(dir.path().join("subdir")).await.unwrap();

        let files = catalog.list().await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.bin"]);
        assert_eq!(files[2].size, 3);
    }

    #[tokio::test]
    async fn test_page() {
        let (_dir, catalog) = catalog_with(&[("1", ""), ("2", ""), ("3", ""), ("4", "")]).await;

        let page = catalog.page(1, Some(2)).await.unwrap();
        assert_eq!(page.total, 4);
        let names: Vec<&str> = page.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["2", "3"]);

        let tail = catalog.page(3, None).await.unwrap();
        assert_eq!(tail.files.len(), 1);
        assert!(catalog.page(10, None).await.unwrap().files.is_empty());
    }

    #[tokio::test]
    async fn test_lookup() {
        let (_dir, catalog) = catalog_with(&[("a.bin", "0123456789")]).await;

        let (entry, path) = catalog.lookup("a.bin").await.unwrap();
        assert_eq!(entry.size, 10);
        assert!(path.ends_with("a.bin"));

        // Traversal is reduced to the last segment
        let (entry, _) = catalog.lookup("../../a.bin").await.unwrap();
        assert_eq!(entry.name, "a.bin");

        assert!(matches!(catalog.lookup("missing").await, Err(UploadError::NotFound(_))));
        assert!(matches!(catalog.lookup(".staging").await, Err(UploadError::NotFound(_))));
        assert!(matches!(catalog.lookup("..").await, Err(UploadError::InvalidFilename(_))));
    }

    #[tokio::test]
    async fn test_open() {
        use tokio::io::AsyncReadExt;

        let (_dir, catalog) = catalog_with(&[("a.bin", "payload")]).await;
        let (entry, mut file) = catalog.open("a.bin").await.unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(entry.size, 7);
        assert_eq!(content, b"payload");
    }
}
