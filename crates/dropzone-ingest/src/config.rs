//! Service configuration, loaded from the environment

use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::listing::FilenamePattern;
use crate::source::{FtpConfig, SourceConfig};

// ============================================================================
// Defaults
// ============================================================================

/// Default transport.
pub const DEFAULT_SOURCE: &str = "ftp";

/// Default FTP host.
pub const DEFAULT_FTP_HOST: &str = "localhost";

/// Default FTP control port.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Default FTP username.
pub const DEFAULT_FTP_USER: &str = "anonymous";

/// Default FTP password.
pub const DEFAULT_FTP_PASSWORD: &str = "anonymous@";

/// Default root for the local directory source.
pub const DEFAULT_LOCAL_ROOT: &str = ".";

/// Default watched directory, relative to the source root.
pub const DEFAULT_REMOTE_DIRECTORY: &str = "upload";

/// Default filename pattern.
pub const DEFAULT_FILENAME_PATTERN: &str = "*.xml";

/// Default delay between poll cycles in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default cap on files claimed per cycle.
pub const DEFAULT_MAX_FETCH_SIZE: usize = 10;

/// Default fetch+parse budget per file in milliseconds (15 minutes).
pub const DEFAULT_PARSE_TIMEOUT_MS: u64 = 900_000;

/// Default number of files processed at once.
pub const DEFAULT_MAX_CONCURRENT_FILES: usize = 4;

/// Default ceiling for the cycle failure backoff in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// Default claim store location.
pub const DEFAULT_CLAIM_STORE_URL: &str = "sqlite://dropzone-claims.db";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub remote_directory: String,
    pub filename_pattern: String,
    pub poll_interval: Duration,
    pub max_fetch_size: usize,
    pub parse_timeout: Duration,
    pub max_concurrent_files: usize,
    pub max_backoff: Duration,
    pub claim_store_url: String,
    /// Where results are written as JSON; results are only logged when unset
    pub output_dir: Option<PathBuf>,
}

impl IngestConfig {
    /// Load configuration from the environment (and `.env`) over the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let source_kind = env_string("DROPZONE_SOURCE", DEFAULT_SOURCE);
        let source = match source_kind.to_lowercase().as_str() {
            "ftp" => SourceConfig::Ftp(FtpConfig {
                host: env_string("DROPZONE_FTP_HOST", DEFAULT_FTP_HOST),
                port: env_parse("DROPZONE_FTP_PORT", DEFAULT_FTP_PORT)?,
                username: env_string("DROPZONE_FTP_USER", DEFAULT_FTP_USER),
                password: env_string("DROPZONE_FTP_PASSWORD", DEFAULT_FTP_PASSWORD),
            }),
            "local" => SourceConfig::Local {
                root: PathBuf::from(env_string("DROPZONE_LOCAL_ROOT", DEFAULT_LOCAL_ROOT)),
            },
            other => anyhow::bail!("Unknown DROPZONE_SOURCE '{}': expected 'ftp' or 'local'", other),
        };

        let config = Self {
            source,
            remote_directory: env_string("DROPZONE_REMOTE_DIRECTORY", DEFAULT_REMOTE_DIRECTORY),
            filename_pattern: env_string("DROPZONE_FILENAME_PATTERN", DEFAULT_FILENAME_PATTERN),
            poll_interval: Duration::from_millis(env_parse(
                "DROPZONE_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            max_fetch_size: env_parse("DROPZONE_MAX_FETCH_SIZE", DEFAULT_MAX_FETCH_SIZE)?,
            parse_timeout: Duration::from_millis(env_parse(
                "DROPZONE_PARSE_TIMEOUT_MS",
                DEFAULT_PARSE_TIMEOUT_MS,
            )?),
            max_concurrent_files: env_parse(
                "DROPZONE_MAX_CONCURRENT_FILES",
                DEFAULT_MAX_CONCURRENT_FILES,
            )?,
            max_backoff: Duration::from_millis(env_parse(
                "DROPZONE_MAX_BACKOFF_MS",
                DEFAULT_MAX_BACKOFF_MS,
            )?),
            claim_store_url: env_string("DROPZONE_CLAIM_STORE_URL", DEFAULT_CLAIM_STORE_URL),
            output_dir: std::env::var("DROPZONE_OUTPUT_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("Poll interval must be greater than 0");
        }

        if self.max_fetch_size == 0 {
            anyhow::bail!("max_fetch_size must be greater than 0");
        }

        if self.parse_timeout.is_zero() {
            anyhow::bail!("Parse timeout must be greater than 0");
        }

        if self.max_concurrent_files == 0 {
            anyhow::bail!("max_concurrent_files must be greater than 0");
        }

        if self.max_backoff < self.poll_interval {
            anyhow::bail!(
                "max_backoff ({}ms) cannot be shorter than the poll interval ({}ms)",
                self.max_backoff.as_millis(),
                self.poll_interval.as_millis()
            );
        }

        if self.claim_store_url.trim().is_empty() {
            anyhow::bail!("Claim store URL cannot be empty");
        }

        if let SourceConfig::Ftp(ftp) = &self.source {
            if ftp.host.trim().is_empty() {
                anyhow::bail!("FTP host cannot be empty");
            }
            if ftp.port == 0 {
                anyhow::bail!("FTP port must be greater than 0");
            }
        }

        FilenamePattern::parse(&self.filename_pattern)?;

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::Ftp(FtpConfig {
                host: DEFAULT_FTP_HOST.to_string(),
                port: DEFAULT_FTP_PORT,
                username: DEFAULT_FTP_USER.to_string(),
                password: DEFAULT_FTP_PASSWORD.to_string(),
            }),
            remote_directory: DEFAULT_REMOTE_DIRECTORY.to_string(),
            filename_pattern: DEFAULT_FILENAME_PATTERN.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_fetch_size: DEFAULT_MAX_FETCH_SIZE,
            parse_timeout: Duration::from_millis(DEFAULT_PARSE_TIMEOUT_MS),
            max_concurrent_files: DEFAULT_MAX_CONCURRENT_FILES,
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            claim_store_url: DEFAULT_CLAIM_STORE_URL.to_string(),
            output_dir: None,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}
