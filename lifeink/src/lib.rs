pub mod backend;
pub mod clock;
pub mod context_menu;
pub mod dispatcher;
mod error;
pub mod host;
pub mod prompts;
pub mod rate_limiter;
pub mod relay;
pub mod replace;
pub mod secure_storage;
pub mod settings;
pub mod toolbar;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub use error::AppError;
use relay::BackgroundService;
use settings::{SettingsSource, SettingsStore};

const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global subscriber once. Output goes to stderr: stdout is the
/// native messaging channel.
pub fn init_logging() -> Result<(), AppError> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| AppError::LoggingInit(err.to_string()))
}

pub fn run() -> anyhow::Result<()> {
    init_logging()?;

    let path = SettingsStore::default_path().map_err(AppError::from)?;
    info!(path = %path.display(), "starting lifeink native messaging host");
    let store = match SettingsStore::with_secure_storage(&path) {
        Ok(store) => store,
        Err(err) => {
            warn!("{err}; the API key will be kept in the config file");
            SettingsStore::new(path)
        }
    };
    if let Err(err) = store.load() {
        warn!("settings are unreadable; requests will report the error: {err}");
    }

    let client = reqwest::Client::builder()
        .build()
        .map_err(|err| AppError::Runtime(format!("failed to build HTTP client: {err}")))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let service = BackgroundService::new(Arc::new(store), client);
    runtime
        .block_on(host::serve(service, tokio::io::stdin(), tokio::io::stdout()))
        .map_err(AppError::from)?;

    info!("native messaging host stopped");
    Ok(())
}
