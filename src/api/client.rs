//! Purpose: HTTP client for the store's submit, entity, and entity-history endpoints.
//! Exports: `StoreClient`, `TxReceipt`, `SortOrder`, `ApiResult`.
//! Role: Encodes mutations, classifies responses, and bridges writes to the consistency wait.
//! Invariants: Each request carries `accept`/`content-type` of exactly one encoding.
//! Invariants: A submission accepted with 202 is reported as success even if the
//! receipt cannot be decoded or the follow-up await fails; those become notices.
//! Invariants: Entity 404s are `Ok(None)`, never errors.
#![allow(clippy::result_large_err)]

use std::io::Read;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use super::config::ClientConfig;
use super::project::{Document, Projectable, project_to_mapping};
use crate::core::edn::{self, ValueExt};
use crate::core::error::{Error, ErrorKind};
use crate::core::wire::{self, Encoding, Mutation};
use crate::notice::{self, EventSink, Notice, TracingSink};

pub type ApiResult<T> = Result<T, Error>;

const API_SEGMENT: &str = "_xtdb";
const TX_ID_KEY: &str = "xtdb.api/tx-id";
const TX_TIME_KEY: &str = "xtdb.api/tx-time";

#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<StoreClientInner>,
}

#[derive(Clone)]
struct StoreClientInner {
    base_url: Url,
    config: ClientConfig,
    agent: ureq::Agent,
    sink: Arc<dyn EventSink>,
}

/// Store acknowledgment of an accepted transaction. `tx_id == 0` means none was returned.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TxReceipt {
    pub tx_id: i64,
    pub tx_time: Option<OffsetDateTime>,
}

#[derive(Deserialize)]
struct JsonReceipt {
    #[serde(rename = "txId", default)]
    tx_id: i64,
    #[serde(rename = "txTime", default)]
    tx_time: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(token: &str) -> ApiResult<Self> {
        match token {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message("wrong sort order input, accept 'asc' or 'desc'")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl StoreClient {
    pub fn new(address: impl Into<String>) -> ApiResult<Self> {
        Self::with_config(ClientConfig::new(address))
    }

    /// Builds a client from `XTDB_ADDRESS`/`XTDB_AWAIT_TIMEOUT_MS`, defaulting to loopback.
    pub fn from_env() -> ApiResult<Self> {
        Self::with_config(ClientConfig::from_env()?)
    }

    pub fn with_config(config: ClientConfig) -> ApiResult<Self> {
        let base_url = normalize_base_url(&config.address)?;
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            inner: Arc::new(StoreClientInner {
                base_url,
                agent: builder.build(),
                config,
                sink: Arc::new(TracingSink),
            }),
        })
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        Arc::make_mut(&mut self.inner).sink = sink;
        self
    }

    pub fn with_read_encoding(mut self, encoding: Encoding) -> Self {
        Arc::make_mut(&mut self.inner).config.read_encoding = encoding;
        self
    }

    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Points this handle at another node. Clones made earlier keep their address.
    pub fn set_address(&mut self, address: impl Into<String>) -> ApiResult<()> {
        let address = address.into();
        let base_url = normalize_base_url(&address)?;
        let inner = Arc::make_mut(&mut self.inner);
        inner.base_url = base_url;
        inner.config.address = address;
        Ok(())
    }

    pub fn submit_put<D: Serialize>(&self, records: &[D]) -> ApiResult<TxReceipt> {
        let body = wire::encode_put(records, Encoding::Edn)?;
        self.submit("submit-put", body, Encoding::Edn)
    }

    pub fn submit_evict<S: AsRef<str>>(&self, identities: &[S]) -> ApiResult<TxReceipt> {
        let body = wire::encode_evict(identities, Encoding::Edn)?;
        self.submit("submit-evict", body, Encoding::Edn)
    }

    /// Submits a mixed batch of puts and evicts as one EDN transaction.
    pub fn submit_tx<D: Serialize>(&self, ops: &[Mutation<D>]) -> ApiResult<TxReceipt> {
        let body = wire::encode_tx_ops(ops, Encoding::Edn)?;
        self.submit("submit-tx", body, Encoding::Edn)
    }

    /// Submits generic documents through the JSON transaction endpoint.
    pub fn persist_entities(&self, documents: &[Document]) -> ApiResult<TxReceipt> {
        let body = wire::encode_put(documents, Encoding::Json)?;
        self.submit("persist-entities", body, Encoding::Json)
    }

    /// Projects annotated records and persists them as JSON documents.
    pub fn persist_records<T: Projectable>(&self, records: &[T]) -> ApiResult<TxReceipt> {
        let documents = records
            .iter()
            .map(project_to_mapping)
            .collect::<ApiResult<Vec<_>>>()?;
        self.persist_entities(&documents)
    }

    pub fn get_entity(&self, eid: &str) -> ApiResult<Option<Vec<u8>>> {
        let mut url = self.endpoint(&["entity"])?;
        url.query_pairs_mut().append_pair("eid", eid);
        self.fetch_optional("get-entity", &url)
    }

    pub fn get_entity_history(
        &self,
        eid: &str,
        sort_order: &str,
        with_docs: bool,
    ) -> ApiResult<Option<Vec<u8>>> {
        let order = SortOrder::parse(sort_order)?;
        let mut url = self.endpoint(&["entity"])?;
        url.query_pairs_mut()
            .append_pair("eid", eid)
            .append_pair("sort-order", order.as_str())
            .append_pair("history", "true")
            .append_pair("with-docs", if with_docs { "true" } else { "false" });
        self.fetch_optional("get-entity-history", &url)
    }

    fn submit(&self, op: &'static str, body: Vec<u8>, encoding: Encoding) -> ApiResult<TxReceipt> {
        let url = self.endpoint(&["submit-tx"])?;
        tracing::debug!(op, target = %url, bytes = body.len(), "submitting transaction");
        let response = into_response(
            op,
            &url,
            self.request("POST", &url, encoding).send_bytes(&body),
        )?;
        if response.status() != 202 {
            return Err(status_error(op, &url, response));
        }

        let receipt = match read_body(op, &url, response)
            .and_then(|body| decode_receipt(&body, encoding))
        {
            Ok(receipt) => receipt,
            Err(err) => {
                self.emit(Notice::new(
                    notice::RECEIPT_DECODE,
                    op,
                    url.as_str(),
                    format!("error decoding transaction response: {err}"),
                ));
                TxReceipt::default()
            }
        };
        tracing::info!(op, tx_id = receipt.tx_id, "transaction accepted");

        if receipt.tx_id > 0 {
            if let Err(err) = self.await_tx(receipt.tx_id) {
                let target = err.target().unwrap_or(url.as_str()).to_string();
                self.emit(
                    Notice::new(notice::AWAIT_FAILED, op, &target, err.to_string())
                        .with_detail("tx_id", receipt.tx_id),
                );
            }
        }
        Ok(receipt)
    }

    fn fetch_optional(&self, op: &'static str, url: &Url) -> ApiResult<Option<Vec<u8>>> {
        let encoding = self.inner.config.read_encoding;
        tracing::debug!(op, target = %url, "fetching entity");
        let response = into_response(op, url, self.request("GET", url, encoding).call())?;
        match response.status() {
            200 => read_body(op, url, response).map(Some),
            404 => Ok(None),
            _ => Err(status_error(op, url, response)),
        }
    }

    pub(super) fn emit(&self, notice: Notice) {
        self.inner.sink.notice(notice);
    }

    pub(super) fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        build_url(&self.inner.base_url, segments)
    }

    pub(super) fn request(&self, method: &str, url: &Url, encoding: Encoding) -> ureq::Request {
        self.inner
            .agent
            .request(method, url.as_str())
            .set("Accept", encoding.content_type())
            .set("Content-Type", encoding.content_type())
    }
}

fn normalize_base_url(raw: &str) -> ApiResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid store address")
            .with_target(raw)
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("store address must use http or https scheme")
            .with_target(raw));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("store address cannot be a base")
        })?;
        path.pop_if_empty();
        path.push(API_SEGMENT);
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Unwraps ureq's status errors so callers classify every status themselves.
pub(super) fn into_response(
    op: &'static str,
    url: &Url,
    result: Result<ureq::Response, ureq::Error>,
) -> ApiResult<ureq::Response> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(_, response)) => Ok(response),
        Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
            .with_message("request failed")
            .with_op(op)
            .with_target(url.as_str())
            .with_source(err)),
    }
}

pub(super) fn read_body(op: &'static str, url: &Url, response: ureq::Response) -> ApiResult<Vec<u8>> {
    let mut out = Vec::new();
    response.into_reader().read_to_end(&mut out).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_op(op)
            .with_target(url.as_str())
            .with_source(err)
    })?;
    Ok(out)
}

pub(super) fn status_error(op: &'static str, url: &Url, response: ureq::Response) -> Error {
    let status = response.status();
    let body = response.into_string().unwrap_or_default();
    tracing::debug!(op, status, body = %body, "unexpected status");
    Error::new(ErrorKind::Protocol)
        .with_message(format!("received unknown status code={status}"))
        .with_op(op)
        .with_target(url.as_str())
        .with_status(status)
        .with_body(body)
}

fn decode_receipt(body: &[u8], encoding: Encoding) -> ApiResult<TxReceipt> {
    match encoding {
        Encoding::Edn => {
            let value = edn::from_slice(body)?;
            if !matches!(value, edn::Value::Map(_)) {
                return Err(Error::new(ErrorKind::Decode).with_message("receipt is not an edn map"));
            }
            Ok(TxReceipt {
                tx_id: value
                    .get_keyword(TX_ID_KEY)
                    .and_then(ValueExt::as_int)
                    .unwrap_or_default(),
                tx_time: value.get_keyword(TX_TIME_KEY).and_then(ValueExt::as_instant),
            })
        }
        Encoding::Json => {
            let receipt: JsonReceipt = serde_json::from_slice(body).map_err(|err| {
                Error::new(ErrorKind::Decode)
                    .with_message("invalid receipt json")
                    .with_source(err)
            })?;
            Ok(TxReceipt {
                tx_id: receipt.tx_id,
                tx_time: receipt
                    .tx_time
                    .and_then(|text| OffsetDateTime::parse(&text, &Rfc3339).ok()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SortOrder, StoreClient, build_url, decode_receipt, normalize_base_url};
    use crate::core::error::ErrorKind;
    use crate::core::wire::Encoding;

    // Nothing listens here; tests using it must fail before any request is made.
    const DEAD_ADDRESS: &str = "http://127.0.0.1:9";

    #[test]
    fn endpoints_live_under_api_segment() {
        let base = normalize_base_url("http://localhost:3000").expect("url");
        let url = build_url(&base, &["submit-tx"]).expect("endpoint");
        assert_eq!(url.as_str(), "http://localhost:3000/_xtdb/submit-tx");
    }

    #[test]
    fn endpoints_keep_address_path_prefix() {
        let base = normalize_base_url("https://proxy.internal/store/?x=1").expect("url");
        let url = build_url(&base, &["entity"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://proxy.internal/store/_xtdb/entity");
    }

    #[test]
    fn rejects_non_http_addresses() {
        let err = normalize_base_url("ftp://localhost").expect_err("scheme");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = StoreClient::new("not a url").err().expect("parse");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn set_address_only_moves_this_handle() {
        let mut client = StoreClient::new("http://localhost:3000").expect("client");
        let earlier = client.clone();
        client.set_address("http://xtdb:4000").expect("set");
        assert_eq!(client.address(), "http://xtdb:4000");
        assert_eq!(earlier.address(), "http://localhost:3000");
    }

    #[test]
    fn sort_order_accepts_two_tokens() {
        assert_eq!(SortOrder::parse("asc").expect("asc"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("desc").expect("desc").as_str(), "desc");
        for bad in ["ASC", "", "descending"] {
            assert_eq!(SortOrder::parse(bad).expect_err(bad).kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn decodes_edn_and_json_receipts() {
        let receipt = decode_receipt(
            br#"{:xtdb.api/tx-id 12, :xtdb.api/tx-time #inst "2024-05-01T10:00:00Z"}"#,
            Encoding::Edn,
        )
        .expect("edn");
        assert_eq!(receipt.tx_id, 12);
        assert_eq!(receipt.tx_time.expect("time").unix_timestamp(), 1_714_557_600);

        let receipt = decode_receipt(br#"{"txId": 3, "txTime": "2024-05-01T10:00:00Z"}"#, Encoding::Json)
            .expect("json");
        assert_eq!(receipt.tx_id, 3);
        assert!(receipt.tx_time.is_some());
    }

    #[test]
    fn receipt_decode_rejects_garbage() {
        assert!(decode_receipt(b"<html>", Encoding::Edn).is_err());
        assert!(decode_receipt(b"[1 2]", Encoding::Edn).is_err());
        assert!(decode_receipt(b"nope", Encoding::Json).is_err());
    }

    #[test]
    fn empty_evict_fails_before_any_request() {
        let client = StoreClient::new(DEAD_ADDRESS).expect("client");
        let err = client.submit_evict::<&str>(&[]).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn bad_sort_order_fails_before_any_request() {
        let client = StoreClient::new(DEAD_ADDRESS).expect("client");
        let err = client
            .get_entity_history("user-1", "newest", true)
            .expect_err("order");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
