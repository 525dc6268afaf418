//! Purpose: Run store queries and flatten tuple rows to their first column.
//! Exports: `StoreClient::query`, `StoreClient::query_raw`, `normalize_rows`.
//! Role: Spares callers from unwrapping single-column projections themselves.
//! Invariants: Output has one element per result row, in row order, in the request encoding.
//! Invariants: A row without columns is a decode error, never silently dropped.
#![allow(clippy::result_large_err)]

use serde_json::Value as JsonValue;

use super::client::{ApiResult, StoreClient, into_response, read_body, status_error};
use crate::core::edn::{self, Value, ValueExt};
use crate::core::error::{Error, ErrorKind};
use crate::core::wire::Encoding;

const OP_QUERY: &str = "query";

impl StoreClient {
    /// Returns the store's query response body unchanged.
    pub fn query_raw(&self, query: &[u8], encoding: Encoding) -> ApiResult<Vec<u8>> {
        let url = self.endpoint(&["query"])?;
        tracing::debug!(target = %url, bytes = query.len(), "running query");
        let response = into_response(
            OP_QUERY,
            &url,
            self.request("POST", &url, encoding).send_bytes(query),
        )?;
        if response.status() != 200 {
            return Err(status_error(OP_QUERY, &url, response));
        }
        read_body(OP_QUERY, &url, response)
    }

    /// Runs `query` and returns the first column of every row, re-encoded in `encoding`.
    pub fn query(&self, query: &[u8], encoding: Encoding) -> ApiResult<Vec<u8>> {
        let raw = self.query_raw(query, encoding)?;
        normalize_rows(&raw, encoding)
    }
}

pub fn normalize_rows(body: &[u8], encoding: Encoding) -> ApiResult<Vec<u8>> {
    match encoding {
        Encoding::Edn => normalize_edn_rows(body),
        Encoding::Json => normalize_json_rows(body),
    }
}

fn normalize_edn_rows(body: &[u8]) -> ApiResult<Vec<u8>> {
    let result = edn::from_slice(body)?;
    let rows = result
        .elements()
        .ok_or_else(|| shape_error("query result is not a sequence of rows"))?;
    let mut firsts = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let columns = row
            .elements()
            .ok_or_else(|| shape_error(&format!("row {idx} is not a sequence of columns")))?;
        let first = columns
            .first()
            .ok_or_else(|| shape_error(&format!("row {idx} has no columns")))?;
        firsts.push((*first).clone());
    }
    Ok(edn::to_vec(&Value::Vector(firsts)))
}

fn normalize_json_rows(body: &[u8]) -> ApiResult<Vec<u8>> {
    let rows: Vec<Vec<JsonValue>> = serde_json::from_slice(body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("query result is not an array of row arrays")
            .with_source(err)
    })?;
    let mut firsts = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let first = row
            .into_iter()
            .next()
            .ok_or_else(|| shape_error(&format!("row {idx} has no columns")))?;
        firsts.push(first);
    }
    serde_json::to_vec(&firsts).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to write normalized rows")
            .with_source(err)
    })
}

fn shape_error(message: &str) -> Error {
    Error::new(ErrorKind::Decode).with_message(message.to_string())
}
