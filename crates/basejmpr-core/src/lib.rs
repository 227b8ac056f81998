//! basejmpr-core - Common infrastructure for base image management
//!
//! Logging, progress reporting, signal-driven shutdown, artifact
//! fetching and bounded external process invocation shared by the
//! revision store and the CLI.

pub mod fetch;
pub mod logging;
pub mod process;
pub mod progress;
pub mod retry;
pub mod shutdown;

// Re-exports for convenience
pub use fetch::{FetchError, Fetcher, HttpConfig, HttpFetcher, SHARED_RUNTIME};
pub use logging::init_logging;
pub use process::{CommandOutput, ProcessError, run_with_timeout};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::retry_with_backoff;
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown};
