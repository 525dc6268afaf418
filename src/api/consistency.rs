//! Purpose: Bridge the store's write-then-index gap with bounded waits.
//! Exports: `StoreClient::await_tx`, `StoreClient::sync`.
//! Role: Read-your-writes support for submissions and store-wide catch-up.
//! Invariants: `await_tx` is one blocking request bounded by the configured await timeout.
//! Invariants: `sync` polls on its own thread; the caller returns at the deadline or on
//! the first successful poll, whichever comes first.
//! Notes: A poll already in flight when the deadline fires is not aborted; its connection
//! is released when that request finishes on its own. The loop makes no further attempts.
#![allow(clippy::result_large_err)]

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use url::Url;

use super::client::{ApiResult, StoreClient, into_response};
use crate::core::error::{Error, ErrorKind};
use crate::core::wire::Encoding;

// Client-side slack on top of the server-side await timeout.
const AWAIT_GRACE: Duration = Duration::from_secs(1);

impl StoreClient {
    /// Blocks until the node has indexed `tx_id` or the await timeout elapses.
    pub fn await_tx(&self, tx_id: i64) -> ApiResult<()> {
        let timeout = self.config().await_timeout;
        let mut url = self.endpoint(&["await-tx"])?;
        url.query_pairs_mut()
            .append_pair("tx-id", &tx_id.to_string())
            .append_pair("timeout", &timeout.as_millis().to_string());
        tracing::debug!(tx_id, target = %url, "awaiting transaction");

        let response = into_response(
            "await-tx",
            &url,
            self.request("GET", &url, Encoding::Edn)
                .timeout(timeout + AWAIT_GRACE)
                .call(),
        )
        .map_err(|err| {
            err.with_message(format!("failed awaiting transaction {tx_id}"))
                .with_tx_id(tx_id)
        })?;

        let status = response.status();
        if status == 200 {
            return Ok(());
        }
        let body = response.into_string().unwrap_or_default();
        Err(Error::new(ErrorKind::Protocol)
            .with_message(format!("failed awaiting transaction {tx_id}"))
            .with_op("await-tx")
            .with_target(url.as_str())
            .with_tx_id(tx_id)
            .with_status(status)
            .with_body(body))
    }

    /// Polls the store-wide sync endpoint until it succeeds or `timeout` elapses.
    ///
    /// Failed attempts are retried after the configured backoff. On timeout the error
    /// message lists every failed attempt followed by `timeout reached`.
    pub fn sync(&self, timeout: Duration) -> ApiResult<()> {
        let mut url = self.endpoint(&["sync"])?;
        url.query_pairs_mut()
            .append_pair("timeout", &timeout.as_millis().to_string());

        let failures = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let poller = SyncPoller {
            client: self.clone(),
            url: url.clone(),
            backoff: self.config().sync_backoff,
            failures: Arc::clone(&failures),
        };
        thread::Builder::new()
            .name("xtlog-sync".to_string())
            .spawn(move || poller.run(done_tx, stop_rx))
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to start sync poller")
                    .with_source(err)
            })?;

        let outcome = done_rx.recv_timeout(timeout);
        drop(stop_tx);
        match outcome {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                let mut log = failures
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .clone();
                log.push("timeout reached".to_string());
                Err(Error::new(ErrorKind::Timeout)
                    .with_message(log.join("; "))
                    .with_op("sync")
                    .with_target(url.as_str()))
            }
        }
    }

    fn poll_sync(&self, url: &Url) -> Result<(), String> {
        let response = match self.request("GET", url, Encoding::Edn).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => return Err(format!("error={err}")),
        };
        let status = response.status();
        if status == 200 {
            return Ok(());
        }
        let body = response.into_string().unwrap_or_default();
        Err(format!("status={status}, response={body}"))
    }
}

struct SyncPoller {
    client: StoreClient,
    url: Url,
    backoff: Duration,
    failures: Arc<Mutex<Vec<String>>>,
}

impl SyncPoller {
    fn run(self, done: SyncSender<()>, stop: Receiver<()>) {
        for attempt in 1u64.. {
            if matches!(stop.try_recv(), Err(TryRecvError::Disconnected)) {
                return;
            }
            tracing::debug!(attempt, target = %self.url, "trying sync");
            match self.client.poll_sync(&self.url) {
                Ok(()) => {
                    let _ = done.send(());
                    return;
                }
                Err(reason) => {
                    self.failures
                        .lock()
                        .unwrap_or_else(|poison| poison.into_inner())
                        .push(format!("attempt={attempt}, failed sync, {reason}"));
                }
            }
            if !matches!(stop.recv_timeout(self.backoff), Err(RecvTimeoutError::Timeout)) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::api::{ClientConfig, StoreClient};
    use crate::core::error::ErrorKind;

    #[test]
    fn sync_against_dead_address_times_out_with_attempt_log() {
        let config = ClientConfig::new("http://127.0.0.1:9")
            .with_sync_backoff(Duration::from_millis(20))
            .with_request_timeout(Duration::from_millis(200));
        let client = StoreClient::with_config(config).expect("client");
        let started = Instant::now();
        let err = client.sync(Duration::from_millis(300)).expect_err("timeout");
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        let message = err.message().expect("message");
        assert!(message.starts_with("attempt=1, failed sync"));
        assert!(message.ends_with("timeout reached"));
    }

    #[test]
    fn await_tx_transport_failure_names_transaction() {
        let config = ClientConfig::new("http://127.0.0.1:9")
            .with_await_timeout(Duration::from_millis(100));
        let client = StoreClient::with_config(config).expect("client");
        let err = client.await_tx(42).expect_err("refused");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.tx_id(), Some(42));
        assert_eq!(err.message(), Some("failed awaiting transaction 42"));
    }
}
