//! Artifact fetching: HTTP(S) download with read timeout, or local copy for
//! `file://` mirrors.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall
//! detection, but presents a sync interface to the revision store.

use std::io;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::progress::{SharedProgress, upgrade_to_bar};
use crate::retry::retry_with_backoff;
use crate::shutdown::is_shutdown_requested;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error types for fetch operations
#[derive(Debug)]
pub enum FetchError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error (local write, read stall, missing `file://` source)
    Io(std::io::Error),
    /// Shutdown was requested while the download was in flight
    Interrupted,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Interrupted => write!(f, "interrupted by shutdown request"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl FetchError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // Client errors will not fix themselves; 408/429 are the exceptions
            Self::Http {
                status: Some(s), ..
            } => !(400..500).contains(s) || *s == 408 || *s == 429,
            Self::Http { status: None, .. } => true,
            Self::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            Self::Interrupted => false,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Downloads one artifact to a destination path, overwriting it.
///
/// The revision store only sees this trait, so tests can substitute an
/// in-memory implementation.
pub trait Fetcher {
    /// Fetch `url` into `dest`. Returns the number of bytes written.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// HTTP settings (config file defaults, CLI overrides)
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    /// No data for this long = stalled download
    pub read_timeout: Duration,
    /// Retry attempts for transient failures
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
});

/// Shared tokio runtime for HTTP and child process operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Production fetcher: `http(s)://` via reqwest, `file://` via local copy.
pub struct HttpFetcher {
    config: HttpConfig,
    progress: SharedProgress,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig, progress: SharedProgress) -> Self {
        Self { config, progress }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let label = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());
        let read_timeout = self.config.read_timeout;

        SHARED_RUNTIME.handle().block_on(async {
            let mut response = SHARED_CLIENT
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| FetchError::from_reqwest(&e))?;

            let pb = self.progress.download_bar(&label);
            if let Some(total) = response.content_length() {
                upgrade_to_bar(&pb, total);
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut written = 0u64;
            loop {
                if is_shutdown_requested() {
                    pb.abandon();
                    return Err(FetchError::Interrupted);
                }
                let chunk = match tokio::time::timeout(read_timeout, response.chunk()).await {
                    Ok(result) => result.map_err(|e| FetchError::from_reqwest(&e))?,
                    Err(_) => {
                        return Err(FetchError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("read timeout ({}s with no data)", read_timeout.as_secs()),
                        )));
                    }
                };
                let Some(chunk) = chunk else {
                    break;
                };
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
                pb.set_position(written);
            }
            file.flush().await?;
            pb.finish_and_clear();
            Ok(written)
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        if let Some(source) = url.strip_prefix("file://") {
            log::debug!("copying {source} -> {}", dest.display());
            return Ok(std::fs::copy(source, dest)?);
        }

        log::info!("downloading {url}");
        retry_with_backoff(url, self.config.max_retries, || self.download(url, dest))
    }
}
