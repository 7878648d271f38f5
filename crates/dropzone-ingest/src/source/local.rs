//! Local directory source, for development and end-to-end tests

use async_trait::async_trait;
use std::path::PathBuf;

use super::{RemoteFileSource, RemoteStream};
use crate::error::{IngestError, Result};

/// Treats `root` as the remote filesystem root
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteFileSource for LocalDirectorySource {
    async fn list(&self, directory: &str) -> Result<Vec<String>> {
        let dir = self.resolve(directory);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| IngestError::transport(format!("cannot list {}: {}", dir.display(), e)))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::transport(format!("cannot list {}: {}", dir.display(), e)))?
        {
            let file_type = entry.file_type().await.map_err(IngestError::transport)?;
            if file_type.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(names)
    }

    async fn open(&self, path: &str) -> Result<RemoteStream> {
        let full = self.resolve(path);
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| IngestError::transport(format!("cannot open {}: {}", full.display(), e)))?;

        Ok(Box::new(file))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_lists_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("upload/archive")).unwrap();
        std::fs::write(dir.path().join("upload/a.xml"), "<a/>").unwrap();
        std::fs::write(dir.path().join("upload/b.txt"), "b").unwrap();

        let source = LocalDirectorySource::new(dir.path());
        let mut names = source.list("upload").await.unwrap();
        names.sort();

        assert_eq!(names, vec!["a.xml", "b.txt"]);
    }

    #[tokio::test]
    async fn test_open_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("upload")).unwrap();
        std::fs::write(dir.path().join("upload/a.xml"), "<a/>").unwrap();

        let source = LocalDirectorySource::new(dir.path());
        let mut stream = source.open("upload/a.xml").await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();

        assert_eq!(body, "<a/>");
    }

    #[tokio::test]
    async fn test_missing_paths_are_transport_errors() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalDirectorySource::new(dir.path());

        assert_eq!(source.list("nope").await.unwrap_err().kind(), "TransportError");
        assert!(matches!(source.open("nope.xml").await, Err(IngestError::Transport(_))));
    }
}
