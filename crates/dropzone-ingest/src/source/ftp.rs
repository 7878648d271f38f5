//! FTP-backed remote file source
//!
//! `suppaftp`'s blocking client runs on tokio's blocking pool. Each operation
//! opens its own control connection, logs in, and quits when done. Downloads
//! are streamed: the blocking task forwards chunks over a bounded channel and
//! the pipeline reads them as they arrive.
//!
//! Every socket of a session is registered with its `SessionSockets` set.
//! When the async side goes away (the stream is dropped, or `open`/`list` is
//! abandoned on timeout) the set shuts all of them down, which unblocks the
//! blocking task even when the server has gone silent. Read and write
//! timeouts on each socket bound the session independently of that.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use suppaftp::{FtpError, FtpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::{RemoteFileSource, RemoteStream};
use crate::error::{IngestError, Result};

/// Chunks buffered between the blocking reader and the parser
const CHUNKS_IN_FLIGHT: usize = 8;
const CHUNK_SIZE: usize = 64 * 1024;

/// Connection settings for the FTP drop zone
#[derive(Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: "anonymous@".to_string(),
        }
    }
}

// The password stays out of logs
impl fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Sockets owned by one FTP session
#[derive(Clone, Default)]
struct SessionSockets {
    inner: Arc<Mutex<SocketSet>>,
}

#[derive(Default)]
struct SocketSet {
    sockets: Vec<TcpStream>,
    closed: bool,
}

impl SessionSockets {
    /// Track `stream` so it can be shut down from the async side. Fails, and
    /// shuts the socket down, if the session was already abandoned.
    fn register(&self, stream: &TcpStream) -> io::Result<()> {
        let handle = stream.try_clone()?;
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if set.closed {
            let _ = handle.shutdown(Shutdown::Both);
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "FTP session abandoned",
            ));
        }
        set.sockets.push(handle);
        Ok(())
    }

    fn shutdown(&self) {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        set.closed = true;
        for socket in set.sockets.drain(..) {
            // NotConnected once the session already quit
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

/// Shuts the session's sockets down when dropped
struct SessionGuard {
    sockets: SessionSockets,
}

impl SessionGuard {
    fn new() -> Self {
        Self {
            sockets: SessionSockets::default(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sockets.shutdown();
    }
}

pub struct FtpFileSource {
    config: FtpConfig,
    io_timeout: Duration,
}

impl FtpFileSource {
    /// `io_timeout` bounds connecting and every blocking read or write on
    /// the control and data connections
    pub fn new(config: FtpConfig, io_timeout: Duration) -> Self {
        Self { config, io_timeout }
    }

    fn connect(
        config: &FtpConfig,
        timeout: Duration,
        sockets: &SessionSockets,
    ) -> anyhow::Result<FtpStream> {
        debug!("Connecting to FTP server: {}:{}", config.host, config.port);

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve FTP host: {}", config.host))?
            .next()
            .ok_or_else(|| anyhow!("FTP host resolved to no address: {}", config.host))?;

        let control = TcpStream::connect_timeout(&addr, timeout)
            .context("Failed to connect to FTP server")?;
        set_io_timeouts(&control, timeout)?;
        sockets.register(&control)?;

        let data_sockets = sockets.clone();
        let mut ftp_stream = FtpStream::connect_with_stream(control)
            .context("FTP server did not send a greeting")?
            .passive_stream_builder(move |addr| {
                let data = TcpStream::connect_timeout(&addr, timeout)
                    .map_err(FtpError::ConnectionError)?;
                set_io_timeouts(&data, timeout).map_err(FtpError::ConnectionError)?;
                data_sockets.register(&data).map_err(FtpError::ConnectionError)?;
                Ok(data)
            });

        // Extended passive mode copes with NAT and containers
        ftp_stream.set_mode(suppaftp::Mode::ExtendedPassive);

        ftp_stream
            .login(&config.username, &config.password)
            .context("FTP login failed")?;

        Ok(ftp_stream)
    }

    fn list_sync(
        config: &FtpConfig,
        directory: &str,
        timeout: Duration,
        sockets: &SessionSockets,
    ) -> anyhow::Result<Vec<String>> {
        let mut ftp_stream = Self::connect(config, timeout, sockets)?;

        let lines = ftp_stream
            .list(Some(directory))
            .with_context(|| format!("Failed to list directory: {}", directory))?;

        let names = lines
            .iter()
            .filter_map(|line| FtpEntry::parse(line))
            .filter(|entry| !entry.is_directory)
            .map(|entry| entry.name)
            .collect();

        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }

        Ok(names)
    }

    /// Runs on the blocking pool. Reports the start of the transfer on
    /// `ready`, then forwards the file body on `chunks` until EOF, an error,
    /// or the receiver going away.
    fn retrieve_sync(
        config: &FtpConfig,
        path: &str,
        timeout: Duration,
        sockets: &SessionSockets,
        ready: oneshot::Sender<anyhow::Result<()>>,
        chunks: mpsc::Sender<io::Result<Bytes>>,
    ) {
        let started = Self::connect(config, timeout, sockets).and_then(|mut ftp_stream| {
            ftp_stream
                .transfer_type(suppaftp::types::FileType::Binary)
                .context("Failed to set binary mode")?;
            let data = ftp_stream
                .retr_as_stream(path)
                .with_context(|| format!("Failed to download file: {}", path))?;
            Ok((ftp_stream, data))
        });

        let (mut ftp_stream, mut data) = match started {
            Ok(started) => started,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            },
        };

        if ready.send(Ok(())).is_err() {
            debug!("Download of {} abandoned before the first byte", path);
            return;
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0usize;
        loop {
            match data.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if chunks.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        debug!("Reader dropped after {} bytes, abandoning {}", total, path);
                        return;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = chunks.blocking_send(Err(e));
                    return;
                },
            }
        }

        if let Err(e) = ftp_stream.finalize_retr_stream(data) {
            let _ = chunks.blocking_send(Err(io::Error::other(format!(
                "Failed to finalize download of {}: {}",
                path, e
            ))));
            return;
        }

        debug!("Downloaded {} bytes from {}", total, path);

        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }
    }
}

fn set_io_timeouts(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}

#[async_trait]
impl RemoteFileSource for FtpFileSource {
    async fn list(&self, directory: &str) -> Result<Vec<String>> {
        let config = self.config.clone();
        let directory = directory.to_string();
        let timeout = self.io_timeout;
        let session = SessionGuard::new();
        let sockets = session.sockets.clone();

        tokio::task::spawn_blocking(move || {
            Self::list_sync(&config, &directory, timeout, &sockets)
        })
        .await
        .map_err(|e| IngestError::transport(format!("FTP LIST task failed: {}", e)))?
        .map_err(|e| IngestError::transport(format!("{:#}", e)))
    }

    async fn open(&self, path: &str) -> Result<RemoteStream> {
        let config = self.config.clone();
        let path = path.to_string();
        let timeout = self.io_timeout;
        let session = SessionGuard::new();
        let sockets = session.sockets.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNKS_IN_FLIGHT);

        tokio::task::spawn_blocking(move || {
            Self::retrieve_sync(&config, &path, timeout, &sockets, ready_tx, chunk_tx)
        });

        ready_rx
            .await
            .map_err(|_| IngestError::transport("FTP RETR task ended before the transfer started"))?
            .map_err(|e| IngestError::transport(format!("{:#}", e)))?;

        // The guard travels with the stream and fires when the reader drops it
        let body = futures::stream::unfold((chunk_rx, session), |(mut rx, session)| async move {
            rx.recv().await.map(|chunk| (chunk, (rx, session)))
        });

        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}

/// Parsed FTP LIST line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub is_directory: bool,
}

impl FtpEntry {
    /// Parse a Unix-style LIST line:
    /// `-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 invoices.xml`
    ///
    /// Names containing spaces are kept whole. Lines too short to carry a
    /// name are skipped.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        let is_directory = parts[0].starts_with('d');
        let name = if parts.len() >= 9 {
            parts[8..].join(" ")
        } else {
            parts.last()?.to_string()
        };

        Some(Self { name, is_directory })
    }
}
