//! Purpose: EDN values for transaction and query payloads, backed by `edn-format`.
//! Exports: `Value`, `Keyword`, `Inst`, `Form`, `ValueExt`, `to_string`, `to_vec`,
//! `from_str`, `from_slice`, `read_all`, `to_value`, `MAX_DEPTH`.
//! Role: Structured-data text boundary between native records and the store's wire format.
//! Invariants: Text is produced by `edn_format::emit_str` and read by `edn_format::parse_str`.
//! Invariants: Non-representable values are rejected by `to_value` before any text exists.
use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};

pub mod parse;
pub mod ser;

pub use edn_format::Value;
pub use parse::{MAX_DEPTH, from_slice, from_str, read_all};
pub use ser::to_value;

// Newtype-struct names recognized by `ser::ValueSerializer`. Any other serializer sees
// the wrapped string.
pub(crate) const KEYWORD_TOKEN: &str = "$xtlog::edn::Keyword";
pub(crate) const INST_TOKEN: &str = "$xtlog::edn::Inst";
pub(crate) const FORM_TOKEN: &str = "$xtlog::edn::Form";

/// A keyword name without its leading `:` (`xt/id` prints as `:xt/id`).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Keyword(String);

impl Keyword {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(Error::new(ErrorKind::Encoding)
                .with_message(format!("`{name}` is not a representable keyword")));
        }
        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        let keyword = match self.0.split_once('/') {
            Some((namespace, name)) => {
                edn_format::Keyword::from_namespace_and_name(namespace, name)
            }
            None => edn_format::Keyword::from_name(&self.0),
        };
        Value::Keyword(keyword)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl Serialize for Keyword {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(KEYWORD_TOKEN, &self.0)
    }
}

/// An instant that prints as `#inst "<rfc3339>"`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Inst(pub OffsetDateTime);

impl Serialize for Inst {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.0.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_newtype_struct(INST_TOKEN, &text)
    }
}

/// Serializes an already-read EDN value unchanged, e.g. documents parsed from CLI input.
#[derive(Clone, Copy, Debug)]
pub struct Form<'a>(pub &'a Value);

impl Serialize for Form<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(FORM_TOKEN, &to_string(self.0))
    }
}

/// Read-side accessors over `Value`.
pub trait ValueExt {
    fn as_text(&self) -> Option<&str>;
    fn as_int(&self) -> Option<i64>;
    /// `ns/name` for a keyword, without the leading `:`.
    fn keyword_name(&self) -> Option<String>;
    /// Elements of a list, vector, or set.
    fn elements(&self) -> Option<Vec<&Value>>;
    fn as_instant(&self) -> Option<OffsetDateTime>;
    fn get_keyword(&self, name: &str) -> Option<&Value>;
}

impl ValueExt for Value {
    fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    fn keyword_name(&self) -> Option<String> {
        match self {
            Value::Keyword(keyword) => Some(match keyword.namespace() {
                Some(namespace) => format!("{namespace}/{}", keyword.name()),
                None => keyword.name().to_string(),
            }),
            _ => None,
        }
    }

    fn elements(&self) -> Option<Vec<&Value>> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items.iter().collect()),
            Value::Set(items) => Some(items.iter().collect()),
            _ => None,
        }
    }

    fn as_instant(&self) -> Option<OffsetDateTime> {
        let text = match self {
            Value::Inst(at) => at.to_rfc3339(),
            Value::TaggedElement(tag, inner)
                if tag.namespace().is_none() && tag.name() == "inst" =>
            {
                inner.as_text()?.to_string()
            }
            _ => return None,
        };
        OffsetDateTime::parse(&text, &Rfc3339).ok()
    }

    fn get_keyword(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => {
                let key = Keyword::new(name).ok()?.to_value();
                entries.get(&key)
            }
            _ => None,
        }
    }
}

pub(crate) fn keyword(name: &str) -> Result<Value, Error> {
    Keyword::new(name).map(|keyword| keyword.to_value())
}

pub(crate) fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Value {
    Value::Map(entries.into_iter().collect::<BTreeMap<_, _>>())
}

pub fn to_string(value: &Value) -> String {
    edn_format::emit_str(value)
}

pub fn to_vec(value: &Value) -> Vec<u8> {
    to_string(value).into_bytes()
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || ".*+!-_?$%&=<>/:'#".contains(c)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with([':', '#'])
        && !name.starts_with('/')
        && !name.ends_with('/')
        && name.chars().all(is_name_char)
}
