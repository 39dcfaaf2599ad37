use std::sync::Arc;

use keyring::Entry;
use thiserror::Error;

const SERVICE_NAME: &str = "com.lifeink.host";
const API_KEY_ACCOUNT: &str = "anthropic_api_key";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyringError {
    #[error("secure storage is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read API key from secure storage: {0}")]
    Read(String),
    #[error("failed to save API key in secure storage: {0}")]
    Write(String),
    #[error("failed to clear API key in secure storage: {0}")]
    Clear(String),
}

/// The keyring slot holding the cloud provider's API key.
///
/// One entry is opened per store and reused, so every read sees the
/// credential written through the same handle.
#[derive(Debug, Clone)]
pub struct ApiKeyVault {
    entry: Arc<Entry>,
}

impl ApiKeyVault {
    pub fn open() -> Result<Self, KeyringError> {
        let entry = Entry::new(SERVICE_NAME, API_KEY_ACCOUNT)
            .map_err(|err| KeyringError::Unavailable(err.to_string()))?;
        Ok(Self::from_entry(entry))
    }

    pub fn from_entry(entry: Entry) -> Self {
        Self {
            entry: Arc::new(entry),
        }
    }

    /// `Ok(None)` when nothing has been stored yet.
    pub fn read_api_key(&self) -> Result<Option<String>, KeyringError> {
        match self.entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyringError::Read(err.to_string())),
        }
    }

    /// Stores the trimmed key. A blank key clears the slot instead.
    pub fn write_api_key(&self, api_key: &str) -> Result<(), KeyringError> {
        let trimmed = api_key.trim();
        if trimmed.is_empty() {
            return match self.entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(err) => Err(KeyringError::Clear(err.to_string())),
            };
        }

        self.entry
            .set_password(trimmed)
            .map_err(|err| KeyringError::Write(err.to_string()))
    }
}
