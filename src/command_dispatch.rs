//! Purpose: Hold top-level CLI command dispatch for `xtlog`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command performs at most one logical store operation.
//! Invariants: Input documents are validated locally before anything is submitted.

use super::*;
use xtlog::api::Document;
use xtlog::core::edn::{self, ValueExt};

const ID_KEY: &str = "xt/id";

pub(super) fn dispatch_command(
    command: Command,
    client: &StoreClient,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Put { format, file } => {
            let input = read_input(file.as_ref())?;
            let receipt = match format {
                FormatCli::Edn => {
                    let documents = parse_edn_documents(&input)?;
                    let forms: Vec<edn::Form<'_>> = documents.iter().map(edn::Form).collect();
                    client.submit_put(&forms)?
                }
                FormatCli::Json => client.persist_entities(&parse_json_documents(&input)?)?,
            };
            emit_json(receipt_json(&receipt));
            Ok(RunOutcome::ok())
        }
        Command::Evict { ids } => {
            let receipt = client.submit_evict(&ids)?;
            emit_json(receipt_json(&receipt));
            Ok(RunOutcome::ok())
        }
        Command::Entity {
            id,
            history,
            order,
            with_docs,
            format,
        } => {
            let client = client.clone().with_read_encoding(format.into());
            let body = if history {
                client.get_entity_history(&id, order.as_str(), with_docs)?
            } else {
                client.get_entity(&id)?
            };
            match body {
                Some(body) => emit_body(&body)?,
                None => emit_body(absent_literal(format))?,
            }
            Ok(RunOutcome::ok())
        }
        Command::Query { format, raw, file } => {
            let query = read_input(file.as_ref())?;
            let body = if raw {
                client.query_raw(&query, format.into())?
            } else {
                client.query(&query, format.into())?
            };
            emit_body(&body)?;
            Ok(RunOutcome::ok())
        }
        Command::Sync { timeout_ms } => {
            client.sync(Duration::from_millis(timeout_ms))?;
            emit_json(json!({ "synced": true }));
            Ok(RunOutcome::ok())
        }
        Command::AwaitTx { tx_id } => {
            client.await_tx(tx_id)?;
            emit_json(json!({ "tx_id": tx_id, "indexed": true }));
            Ok(RunOutcome::ok())
        }
    }
}

fn absent_literal(format: FormatCli) -> &'static [u8] {
    match format {
        FormatCli::Edn => b"nil",
        FormatCli::Json => b"null",
    }
}

fn parse_edn_documents(input: &[u8]) -> Result<Vec<edn::Value>, Error> {
    let text = std::str::from_utf8(input).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("edn input is not valid utf-8")
            .with_source(err)
    })?;
    let documents = edn::read_all(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid edn input")
            .with_hint("Provide one or more maps, e.g. {:xt/id \"user-1\" :name \"ada\"}.")
            .with_source(err)
    })?;
    if documents.is_empty() {
        return Err(missing_documents_error());
    }
    for (idx, document) in documents.iter().enumerate() {
        if !matches!(document, edn::Value::Map(_)) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("document {idx} is not a map")));
        }
        if document.get_keyword(ID_KEY).is_none() {
            return Err(missing_id_error(idx));
        }
    }
    Ok(documents)
}

fn parse_json_documents(input: &[u8]) -> Result<Vec<Document>, Error> {
    let mut documents = Vec::new();
    for value in serde_json::Deserializer::from_slice(input).into_iter::<Value>() {
        let value = value.map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid json input")
                .with_hint("Provide an object, an array of objects, or one object per line.")
                .with_source(err)
        })?;
        match value {
            Value::Object(document) => documents.push(document),
            Value::Array(items) => {
                for item in items {
                    let Value::Object(document) = item else {
                        return Err(Error::new(ErrorKind::Usage).with_message(format!(
                            "document {} is not an object",
                            documents.len()
                        )));
                    };
                    documents.push(document);
                }
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "document {} is not an object",
                    documents.len()
                )));
            }
        }
    }
    if documents.is_empty() {
        return Err(missing_documents_error());
    }
    if let Some(idx) = documents
        .iter()
        .position(|document| !document.contains_key(ID_KEY))
    {
        return Err(missing_id_error(idx));
    }
    Ok(documents)
}

fn missing_documents_error() -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("no documents in input")
        .with_hint("Pass a FILE, or pipe documents on stdin.")
}

fn missing_id_error(idx: usize) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("document {idx} has no {ID_KEY}"))
        .with_hint("Every document needs an identity, e.g. \"xt/id\": \"user-1\".")
}

#[cfg(test)]
mod tests {
    use super::{parse_edn_documents, parse_json_documents};
    use xtlog::api::ErrorKind;

    #[test]
    fn edn_input_reads_every_map() {
        let documents =
            parse_edn_documents(br#"{:xt/id "a" :n 1} {:xt/id "b" :n 2}"#).expect("edn");
        assert_eq!(documents.len(), 2);
    }

    #[test]
    fn deeply_nested_edn_input_is_rejected() {
        let input = format!("{{:xt/id \"a\" :v {}}}", "[".repeat(50_000));
        let err = parse_edn_documents(input.as_bytes()).expect_err("too deep");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.message(), Some("invalid edn input"));
    }

    #[test]
    fn edn_input_requires_identity_maps() {
        let err = parse_edn_documents(br#"{:name "ada"}"#).expect_err("no id");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = parse_edn_documents(b"[1 2]").expect_err("not a map");
        assert_eq!(err.message(), Some("document 0 is not a map"));
        let err = parse_edn_documents(b"   ").expect_err("empty");
        assert_eq!(err.message(), Some("no documents in input"));
    }

    #[test]
    fn json_input_accepts_arrays_and_lines() {
        let documents = parse_json_documents(
            br#"[{"xt/id": "a"}, {"xt/id": "b"}]
{"xt/id": "c"}"#,
        )
        .expect("json");
        assert_eq!(documents.len(), 3);
        assert_eq!(documents[2]["xt/id"], "c");
    }

    #[test]
    fn json_input_rejects_scalars_and_missing_ids() {
        let err = parse_json_documents(b"[{\"xt/id\": \"a\"}, 3]").expect_err("scalar");
        assert_eq!(err.message(), Some("document 1 is not an object"));
        let err = parse_json_documents(b"{\"name\": \"ada\"}").expect_err("no id");
        assert_eq!(err.message(), Some("document 0 has no xt/id"));
    }
}
