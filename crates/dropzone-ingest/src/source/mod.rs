//! Remote file sources
//!
//! A source lists a directory and opens files as async byte streams. The
//! pipeline owns each opened stream and drops it when the attempt ends.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::error::Result;

mod ftp;
mod local;

pub use ftp::{FtpConfig, FtpEntry, FtpFileSource};
pub use local::LocalDirectorySource;

/// An open remote file
pub type RemoteStream = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait RemoteFileSource: Send + Sync {
    /// Names of the regular files in `directory`, in whatever order the
    /// remote side reports them
    async fn list(&self, directory: &str) -> Result<Vec<String>>;

    /// Open `path` for reading
    async fn open(&self, path: &str) -> Result<RemoteStream>;
}

/// Which transport the service reads from
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Ftp(FtpConfig),
    /// A directory on the local filesystem standing in for the remote root
    Local { root: PathBuf },
}

impl SourceConfig {
    pub fn name(&self) -> &'static str {
        match self {
            SourceConfig::Ftp(_) => "ftp",
            SourceConfig::Local { .. } => "local",
        }
    }
}

/// Build the source described by `config`
///
/// `io_timeout` caps each blocking network operation of the FTP source. The
/// local source ignores it.
pub fn build(config: &SourceConfig, io_timeout: Duration) -> Arc<dyn RemoteFileSource> {
    match config {
        SourceConfig::Ftp(ftp) => Arc::new(FtpFileSource::new(ftp.clone(), io_timeout)),
        SourceConfig::Local { root } => Arc::new(LocalDirectorySource::new(root.clone())),
    }
}
