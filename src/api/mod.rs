//! Purpose: Define the stable public Rust API boundary for xtlog.
//! Exports: Store client, configuration, projection, and the types they return.
//! Role: Public, additive-only surface used by the CLI and embedding applications.
//! Invariants: Request building and response classification stay private to this module.

mod client;
mod config;
mod consistency;
mod project;
mod query;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::wire::{Encoding, Mutation};
pub use crate::notice::{EventSink, MemorySink, Notice, TracingSink};
pub use client::{ApiResult, SortOrder, StoreClient, TxReceipt};
pub use config::{ADDRESS_ENV, AWAIT_TIMEOUT_ENV, ClientConfig, DEFAULT_ADDRESS};
pub use project::{Document, FieldTag, IGNORE_TAG, Projectable, project_to_mapping};
pub use query::normalize_rows;
