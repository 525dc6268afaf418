//! Purpose: Client construction settings and their environment overrides.
//! Exports: `ClientConfig`, `DEFAULT_ADDRESS`, `ADDRESS_ENV`, `AWAIT_TIMEOUT_ENV`.
//! Role: Single place for addresses, timeouts, and read encoding defaults.
//! Invariants: Defaults match the store's stock HTTP module (loopback, port 3000).
//! Invariants: Environment values are validated; bad values are usage errors.
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};
use crate::core::wire::Encoding;

pub const DEFAULT_ADDRESS: &str = "http://localhost:3000";
pub const ADDRESS_ENV: &str = "XTDB_ADDRESS";
pub const AWAIT_TIMEOUT_ENV: &str = "XTDB_AWAIT_TIMEOUT_MS";

const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_SYNC_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub address: String,
    /// Server-side bound passed to `await-tx`.
    pub await_timeout: Duration,
    /// Pause between failed `sync` polls.
    pub sync_backoff: Duration,
    /// Per-request transport timeout; `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
    /// `accept` encoding for entity reads.
    pub read_encoding: Encoding,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
            sync_backoff: DEFAULT_SYNC_BACKOFF,
            request_timeout: None,
            read_encoding: Encoding::Edn,
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = lookup(ADDRESS_ENV)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let mut config = Self::new(address);
        if let Some(raw) = lookup(AWAIT_TIMEOUT_ENV) {
            let millis = raw.trim().parse::<u64>().map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("{AWAIT_TIMEOUT_ENV} must be a number of milliseconds"))
                    .with_source(err)
            })?;
            config.await_timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }

    pub fn with_await_timeout(mut self, timeout: Duration) -> Self {
        self.await_timeout = timeout;
        self
    }

    pub fn with_sync_backoff(mut self, backoff: Duration) -> Self {
        self.sync_backoff = backoff;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_read_encoding(mut self, encoding: Encoding) -> Self {
        self.read_encoding = encoding;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}
