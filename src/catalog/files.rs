use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{JobError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Async file access used by the catalog and the file jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileManager;

fn map_io(op: &str, path: &Path, e: std::io::Error) -> JobError {
    if e.kind() == ErrorKind::NotFound {
        JobError::NotFound(path.display().to_string())
    } else {
        JobError::io(format!("{} {}", op, path.display()), e)
    }
}

impl FileManager {
    pub fn new() -> Self {
        Self
    }

    /// Every regular file below `dir`, recursively, sorted by path.
    pub async fn scan_directory(&self, dir: &Path) -> Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| map_io("scan", &current, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| map_io("scan", &current, e))?
            {
                let path = entry.path();
                if self.is_directory(&path).await? {
                    pending.push(path);
                } else {
                    files.push(FileEntry {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        path,
                    });
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    pub async fn read_file(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| map_io("read", path, e))
    }

    /// Write `content`, creating parent directories as needed.
    pub async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io("create", parent, e))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| map_io("write", path, e))
    }

    pub async fn delete_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| map_io("delete", path, e))
    }

    pub async fn stat(&self, path: &Path) -> Result<Metadata> {
        tokio::fs::metadata(path)
            .await
            .map_err(|e| map_io("stat", path, e))
    }

    pub async fn is_directory(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path).await?.is_dir())
    }

    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}
