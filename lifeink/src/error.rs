use thiserror::Error;

use crate::relay::codec::FrameError;
use crate::settings::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
    #[error("failed to load settings: {0}")]
    Settings(#[from] ConfigError),
    #[error("native messaging transport failed: {0}")]
    Transport(#[from] FrameError),
    #[error("runtime error: {0}")]
    Runtime(String),
}
