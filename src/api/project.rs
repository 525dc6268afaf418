//! Purpose: Project annotated records into generic documents keyed by their persistence tags.
//! Exports: `Document`, `FieldTag`, `Projectable`, `project_to_mapping`, `projectable!`.
//! Role: Feeds `StoreClient::persist_records` without hand-building JSON maps.
//! Invariants: Only tagged fields appear; the ignore tag `-` and empty tags are skipped.
//! Invariants: Tag tables are fixed at compile time; projection never inspects types at runtime.
#![allow(clippy::result_large_err)]

use serde_json::{Map, Value};

use super::client::ApiResult;
use crate::core::error::{Error, ErrorKind};

/// Generic document shape accepted by the JSON transaction endpoint.
pub type Document = Map<String, Value>;

pub const IGNORE_TAG: &str = "-";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldTag {
    pub field: &'static str,
    pub tag: Option<&'static str>,
}

impl FieldTag {
    pub const fn new(field: &'static str, tag: Option<&'static str>) -> Self {
        Self { field, tag }
    }

    fn persisted_key(&self) -> Option<&'static str> {
        self.tag.filter(|tag| !tag.is_empty() && *tag != IGNORE_TAG)
    }
}

/// A record whose fields carry persistence tags.
///
/// Implement with [`projectable!`](crate::projectable) rather than by hand.
pub trait Projectable {
    const FIELDS: &'static [FieldTag];

    /// Serialized value of `field`, or `None` when the record has no such field.
    fn field_value(&self, field: &str) -> Option<Result<Value, serde_json::Error>>;
}

pub fn project_to_mapping<T: Projectable>(record: &T) -> ApiResult<Document> {
    let mut document = Map::new();
    for field in T::FIELDS {
        let Some(key) = field.persisted_key() else {
            continue;
        };
        let value = record
            .field_value(field.field)
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal)
                    .with_message(format!("no accessor for tagged field {}", field.field))
            })?
            .map_err(|err| {
                Error::new(ErrorKind::Encoding)
                    .with_message(format!("field {} cannot be encoded as json", field.field))
                    .with_source(err)
            })?;
        document.insert(key.to_string(), value);
    }
    Ok(document)
}

/// Implements [`Projectable`] for a struct from a field/tag list.
///
/// ```
/// use serde::Serialize;
/// use xtlog::projectable;
///
/// #[derive(Serialize)]
/// struct Account {
///     id: String,
///     balance: i64,
///     scratch: u8,
/// }
///
/// projectable!(Account { id: "xt/id", balance: "balance", scratch: "-" });
/// ```
#[macro_export]
macro_rules! projectable {
    (@tag) => {
        ::core::option::Option::None
    };
    (@tag $tag:literal) => {
        ::core::option::Option::Some($tag)
    };
    ($ty:ty { $($field:ident $(: $tag:literal)?),* $(,)? }) => {
        impl $crate::api::Projectable for $ty {
            const FIELDS: &'static [$crate::api::FieldTag] = &[
                $($crate::api::FieldTag::new(
                    ::core::stringify!($field),
                    $crate::projectable!(@tag $($tag)?),
                )),*
            ];

            fn field_value(
                &self,
                field: &str,
            ) -> ::core::option::Option<
                ::core::result::Result<$crate::__serde_json::Value, $crate::__serde_json::Error>,
            > {
                $(
                    if field == ::core::stringify!($field) {
                        return ::core::option::Option::Some($crate::__serde_json::to_value(&self.$field));
                    }
                )*
                ::core::option::Option::None
            }
        }
    };
}
