//! Purpose: Encode mutation batches into the store's transaction-log envelopes.
//! Exports: `Encoding`, `Mutation`, `encode_put`, `encode_evict`, `encode_tx_ops`,
//! `decode_edn_tx_ops`, `decode_json_tx_ops`.
//! Role: Pure transform between typed mutations and `submit-tx` request bodies.
//! Invariants: Empty batches are usage errors; nothing is emitted for a failing batch.
//! Invariants: Operation order in the envelope matches the caller's order.
use serde::Serialize;
use serde_json::{Value as JsonValue, json};

use crate::core::edn::{self, Value, ValueExt};
use crate::core::error::{Error, ErrorKind};

const EDN_PUT: &str = "xtdb.api/put";
const EDN_EVICT: &str = "xtdb.api/evict";
const JSON_PUT: &str = "put";
const JSON_EVICT: &str = "evict";
const TX_OPS: &str = "tx-ops";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Encoding {
    #[default]
    Edn,
    Json,
}

impl Encoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Edn => "application/edn",
            Encoding::Json => "application/json",
        }
    }

    pub fn parse(token: &str) -> Result<Self, Error> {
        match token {
            "edn" => Ok(Encoding::Edn),
            "json" => Ok(Encoding::Json),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown encoding `{other}`, accept 'edn' or 'json'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation<D> {
    Put(D),
    Evict(String),
}

enum OpRef<'a, D: ?Sized> {
    Put(&'a D),
    Evict(&'a str),
}

pub fn encode_put<D: Serialize>(records: &[D], encoding: Encoding) -> Result<Vec<u8>, Error> {
    encode_ops(records.iter().map(OpRef::Put), encoding)
}

pub fn encode_evict<S: AsRef<str>>(identities: &[S], encoding: Encoding) -> Result<Vec<u8>, Error> {
    if identities.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("need at least one xt/id to evict"));
    }
    encode_ops(
        identities
            .iter()
            .map(|identity| OpRef::<()>::Evict(identity.as_ref())),
        encoding,
    )
}

pub fn encode_tx_ops<D: Serialize>(ops: &[Mutation<D>], encoding: Encoding) -> Result<Vec<u8>, Error> {
    encode_ops(
        ops.iter().map(|op| match op {
            Mutation::Put(doc) => OpRef::Put(doc),
            Mutation::Evict(identity) => OpRef::Evict(identity.as_str()),
        }),
        encoding,
    )
}

fn encode_ops<'a, D, I>(ops: I, encoding: Encoding) -> Result<Vec<u8>, Error>
where
    D: Serialize + ?Sized + 'a,
    I: Iterator<Item = OpRef<'a, D>>,
{
    let bytes = match encoding {
        Encoding::Edn => {
            let put = edn::keyword(EDN_PUT)?;
            let evict = edn::keyword(EDN_EVICT)?;
            let mut encoded = Vec::new();
            for (idx, op) in ops.enumerate() {
                encoded.push(match op {
                    OpRef::Put(doc) => {
                        let doc = edn::to_value(doc).map_err(|err| record_error(idx, err))?;
                        Value::Vector(vec![put.clone(), doc])
                    }
                    OpRef::Evict(identity) => {
                        Value::Vector(vec![evict.clone(), Value::String(identity.to_string())])
                    }
                });
            }
            ensure_non_empty(encoded.len())?;
            let envelope = edn::map([(edn::keyword(TX_OPS)?, Value::Vector(encoded))]);
            edn::to_vec(&envelope)
        }
        Encoding::Json => {
            let mut encoded = Vec::new();
            for (idx, op) in ops.enumerate() {
                encoded.push(match op {
                    OpRef::Put(doc) => {
                        let doc = serde_json::to_value(doc).map_err(|err| {
                            Error::new(ErrorKind::Encoding)
                                .with_message(format!("tx-op {idx} cannot be encoded as json"))
                                .with_source(err)
                        })?;
                        json!([JSON_PUT, doc])
                    }
                    OpRef::Evict(identity) => json!([JSON_EVICT, identity]),
                });
            }
            ensure_non_empty(encoded.len())?;
            serde_json::to_vec(&json!({ TX_OPS: encoded })).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to write json envelope")
                    .with_source(err)
            })?
        }
    };
    Ok(bytes)
}

fn ensure_non_empty(len: usize) -> Result<(), Error> {
    if len == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("transaction batch must contain at least one operation"));
    }
    Ok(())
}

fn record_error(idx: usize, err: Error) -> Error {
    let detail = err.message().unwrap_or("unsupported value").to_string();
    Error::new(ErrorKind::Encoding)
        .with_message(format!("tx-op {idx} cannot be encoded as edn: {detail}"))
        .with_source(err)
}

/// Reads an EDN `submit-tx` body back into mutations.
pub fn decode_edn_tx_ops(bytes: &[u8]) -> Result<Vec<Mutation<Value>>, Error> {
    let envelope = edn::from_slice(bytes)?;
    let ops = envelope
        .get_keyword(TX_OPS)
        .and_then(ValueExt::elements)
        .ok_or_else(|| envelope_error("missing :tx-ops vector"))?;
    ops.into_iter()
        .map(|op| {
            let items = op.elements();
            let kind = items.as_deref().and_then(|items| items.first()?.keyword_name());
            match (kind.as_deref(), items.as_deref()) {
                (Some(EDN_PUT), Some([_, doc])) => Ok(Mutation::Put((*doc).clone())),
                (Some(EDN_EVICT), Some([_, Value::String(identity)])) => {
                    Ok(Mutation::Evict(identity.clone()))
                }
                _ => Err(envelope_error(&format!(
                    "unsupported tx-op {}",
                    edn::to_string(op)
                ))),
            }
        })
        .collect()
}

/// Reads a JSON `submit-tx` body back into mutations.
pub fn decode_json_tx_ops(bytes: &[u8]) -> Result<Vec<Mutation<JsonValue>>, Error> {
    let envelope: JsonValue = serde_json::from_slice(bytes).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid tx-ops json")
            .with_source(err)
    })?;
    let ops = envelope
        .get(TX_OPS)
        .and_then(JsonValue::as_array)
        .ok_or_else(|| envelope_error("missing \"tx-ops\" array"))?;
    ops.iter()
        .map(|op| match op.as_array().map(Vec::as_slice) {
            Some([JsonValue::String(kind), doc]) if kind == JSON_PUT => {
                Ok(Mutation::Put(doc.clone()))
            }
            Some([JsonValue::String(kind), JsonValue::String(identity)]) if kind == JSON_EVICT => {
                Ok(Mutation::Evict(identity.clone()))
            }
            _ => Err(envelope_error(&format!("unsupported tx-op {op}"))),
        })
        .collect()
}

fn envelope_error(message: &str) -> Error {
    Error::new(ErrorKind::Decode).with_message(format!("malformed tx-ops envelope: {message}"))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde::Serialize;
    use serde_json::json;

    use super::{
        Encoding, Mutation, decode_edn_tx_ops, decode_json_tx_ops, encode_evict, encode_put,
        encode_tx_ops,
    };
    use crate::core::edn::{self, Value, ValueExt};
    use crate::core::error::ErrorKind;

    #[derive(Serialize, Clone)]
    struct Review {
        #[serde(rename = "xt/id")]
        id: String,
        #[serde(rename = "review/status")]
        status: String,
        #[serde(rename = "review/approvers")]
        approvers: Vec<String>,
    }

    fn review(id: &str) -> Review {
        Review {
            id: id.to_string(),
            status: "PENDING".to_string(),
            approvers: vec!["ops".to_string(), "sec".to_string()],
        }
    }

    #[test]
    fn edn_put_envelope_matches_store_format() {
        let bytes = encode_put(&[review("r-1")], Encoding::Edn).expect("encode");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.starts_with("{:tx-ops [[:xtdb.api/put {"), "{text}");
        let expected = edn::from_str(
            r#"{:tx-ops [[:xtdb.api/put {:xt/id "r-1" :review/status "PENDING"
                                         :review/approvers ["ops" "sec"]}]]}"#,
        )
        .expect("expected");
        assert_eq!(edn::from_str(&text).expect("read"), expected);
    }

    #[test]
    fn edn_put_round_trips_every_record_in_order() {
        let records = vec![review("r-1"), review("r-2"), review("r-3")];
        let bytes = encode_put(&records, Encoding::Edn).expect("encode");
        let decoded = decode_edn_tx_ops(&bytes).expect("decode");
        let expected: Vec<Mutation<Value>> = records
            .iter()
            .map(|record| Mutation::Put(edn::to_value(record).expect("value")))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn json_put_round_trips_every_record_in_order() {
        let records = vec![review("r-1"), review("r-2")];
        let bytes = encode_put(&records, Encoding::Json).expect("encode");
        let raw: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(raw["tx-ops"][0][0], "put");
        assert_eq!(raw["tx-ops"][1][1]["xt/id"], "r-2");

        let decoded = decode_json_tx_ops(&bytes).expect("decode");
        let expected: Vec<_> = records
            .iter()
            .map(|record| Mutation::Put(serde_json::to_value(record).expect("value")))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn evict_envelopes_in_both_encodings() {
        let edn_bytes = encode_evict(&["a", "b\"q"], Encoding::Edn).expect("edn");
        let envelope = edn::from_slice(&edn_bytes).expect("read");
        assert_eq!(
            envelope,
            edn::from_str(r#"{:tx-ops [[:xtdb.api/evict "a"] [:xtdb.api/evict "b\"q"]]}"#)
                .expect("expected")
        );
        assert_eq!(
            decode_edn_tx_ops(&edn_bytes).expect("decode"),
            vec![
                Mutation::Evict("a".to_string()),
                Mutation::Evict("b\"q".to_string())
            ]
        );

        let json_bytes = encode_evict(&["a"], Encoding::Json).expect("json");
        let raw: serde_json::Value = serde_json::from_slice(&json_bytes).expect("json");
        assert_eq!(raw, json!({"tx-ops": [["evict", "a"]]}));
    }

    #[test]
    fn mixed_batch_preserves_order() {
        let ops = vec![
            Mutation::Put(review("r-9")),
            Mutation::Evict("r-1".to_string()),
        ];
        let decoded = decode_edn_tx_ops(&encode_tx_ops(&ops, Encoding::Edn).expect("encode"))
            .expect("decode");
        assert!(matches!(decoded[0], Mutation::Put(_)));
        assert_eq!(decoded[1], Mutation::Evict("r-1".to_string()));
    }

    #[test]
    fn empty_batches_are_usage_errors() {
        let none: [Review; 0] = [];
        for encoding in [Encoding::Edn, Encoding::Json] {
            let err = encode_put(&none, encoding).expect_err("empty put");
            assert_eq!(err.kind(), ErrorKind::Usage);
            let err = encode_evict::<&str>(&[], encoding).expect_err("empty evict");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn unrepresentable_record_fails_whole_batch() {
        let records = vec![json!({"xt/id": 1}), json!({"xt/id": 2})];
        assert!(encode_put(&records, Encoding::Edn).is_ok());

        let records = vec![1.0_f64, f64::INFINITY];
        let err = encode_put(&records, Encoding::Edn).expect_err("inf");
        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert!(err.message().expect("message").starts_with("tx-op 1"));
    }

    #[test]
    fn encoding_tokens_parse() {
        assert_eq!(Encoding::parse("edn").expect("edn"), Encoding::Edn);
        assert_eq!(Encoding::Json.content_type(), "application/json");
        assert_eq!(Encoding::parse("xml").expect_err("xml").kind(), ErrorKind::Usage);
    }

    #[test]
    fn decode_rejects_unknown_operations() {
        for body in [
            "{:tx-ops [[:xtdb.api/match \"a\" nil]]}",
            "{:tx-ops [[:xtdb.api/evict 1]]}",
            "{:ops []}",
        ] {
            let err = decode_edn_tx_ops(body.as_bytes()).expect_err(body);
            assert_eq!(err.kind(), ErrorKind::Decode);
        }
    }

    #[derive(Serialize, Clone, Debug)]
    enum Tier {
        Free,
        Seats(u16),
        Custom { label: String, limit: Option<i64> },
    }

    #[derive(Serialize, Clone, Debug)]
    struct Account {
        #[serde(rename = "xt/id")]
        id: String,
        #[serde(rename = "account/name")]
        name: String,
        #[serde(rename = "account/balance")]
        balance: f64,
        #[serde(rename = "account/ledger")]
        ledger: u64,
        #[serde(rename = "account/delta")]
        delta: i128,
        #[serde(rename = "account/tier")]
        tier: Tier,
        #[serde(rename = "account/history")]
        history: Vec<Vec<i32>>,
        #[serde(rename = "account/flag")]
        flag: Option<bool>,
    }

    // Quotes, backslashes, control characters, and non-ascii text.
    const TEXT: &str = r#"[a-zA-Z0-9 "\\\t\n\r\x01-\x1f\x{e9}\x{3bb}\x{6f22}]{0,24}"#;

    fn tier_strategy() -> impl Strategy<Value = Tier> {
        prop_oneof![
            Just(Tier::Free),
            any::<u16>().prop_map(Tier::Seats),
            (TEXT, proptest::option::of(any::<i64>()))
                .prop_map(|(label, limit)| Tier::Custom { label, limit }),
        ]
    }

    fn account_strategy() -> impl Strategy<Value = Account> {
        (
            (TEXT, TEXT),
            (-1_000_000_i64..1_000_000, 0_u32..1024),
            (any::<u64>(), any::<i128>()),
            tier_strategy(),
            proptest::collection::vec(proptest::collection::vec(any::<i32>(), 0..4), 0..4),
            proptest::option::of(any::<bool>()),
        )
            .prop_map(
                |((id, name), (whole, frac), (ledger, delta), tier, history, flag)| Account {
                    id,
                    name,
                    balance: whole as f64 + f64::from(frac) / 1024.0,
                    ledger,
                    delta,
                    tier,
                    history,
                    flag,
                },
            )
    }

    proptest! {
        #[test]
        fn generated_batches_round_trip_through_edn(
            accounts in proptest::collection::vec(account_strategy(), 1..6)
        ) {
            let bytes = encode_put(&accounts, Encoding::Edn).expect("encode");
            let decoded = decode_edn_tx_ops(&bytes).expect("decode");
            let expected: Vec<Mutation<Value>> = accounts
                .iter()
                .map(|account| Mutation::Put(edn::to_value(account).expect("value")))
                .collect();
            prop_assert_eq!(&decoded, &expected);
            for (account, op) in accounts.iter().zip(&decoded) {
                let Mutation::Put(doc) = op else {
                    return Err(TestCaseError::fail("expected a put"));
                };
                prop_assert_eq!(
                    doc.get_keyword("xt/id").and_then(ValueExt::as_text),
                    Some(account.id.as_str())
                );
            }
        }
    }
}
