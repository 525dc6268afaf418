//! Purpose: Library crate backing the `xtlog` CLI and embedding applications.
//! Exports: `core` (EDN codec, wire envelopes, errors), `api` (store client), `notice`.
//! Role: Client-side protocol logic for an XTDB-style bitemporal document store.
//! Invariants: The store's HTTP API is the only external interface.
//! Invariants: Clients hold no mutable shared state beyond their configured address.
pub mod api;
pub mod core;
pub mod notice;

#[doc(hidden)]
pub use serde_json as __serde_json;
