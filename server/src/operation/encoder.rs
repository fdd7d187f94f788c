use anyhow::bail;
use base64::{Engine, engine::general_purpose::STANDARD};
use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value, json};
use std::str::FromStr;

use super::builder::OperationResult;
use crate::db_mongo::store::UpdateOutcome;

/// JSON dialect used for documents and identifiers in responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Relaxed extended JSON: readable, ids and dates stay typed.
    #[default]
    Relaxed,
    /// Canonical extended JSON: lossless for every BSON type.
    Canonical,
    /// Bare JSON: ids become hex strings, dates RFC 3339 strings.
    Plain,
}

impl FromStr for ResponseFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relaxed" => Ok(ResponseFormat::Relaxed),
            "canonical" => Ok(ResponseFormat::Canonical),
            "plain" | "json" => Ok(ResponseFormat::Plain),
            other => bail!("unknown response format '{}'", other),
        }
    }
}

impl ResponseFormat {
    pub fn encode_value(self, value: Bson) -> Value {
        match self {
            ResponseFormat::Relaxed => value.into_relaxed_extjson(),
            ResponseFormat::Canonical => value.into_canonical_extjson(),
            ResponseFormat::Plain => plain_json(value),
        }
    }

    pub fn encode_document(self, document: Document) -> Value {
        self.encode_value(Bson::Document(document))
    }

    fn encode_id(self, id: Option<Bson>) -> Value {
        id.map(|id| self.encode_value(id)).unwrap_or(Value::Null)
    }
}

/// Shapes a result into its response body.
pub fn encode(result: OperationResult, format: ResponseFormat) -> Value {
    match result {
        OperationResult::Documents(documents) => json!({
            "documents": documents
                .into_iter()
                .map(|document| format.encode_document(document))
                .collect::<Vec<_>>(),
        }),
        OperationResult::Document(document) => json!({
            "document": document
                .map(|document| format.encode_document(document))
                .unwrap_or(Value::Null),
        }),
        OperationResult::Inserted { inserted_id } => json!({
            "insertedId": format.encode_id(inserted_id),
        }),
        OperationResult::Updated(outcome) => update_counts(outcome, format),
        OperationResult::StatusRecorded(outcome) => {
            let mut body = update_counts(outcome, format);
            if let Value::Object(fields) = &mut body {
                fields.insert("ok".to_string(), Value::Bool(true));
            }
            body
        }
    }
}

fn update_counts(outcome: UpdateOutcome, format: ResponseFormat) -> Value {
    json!({
        "matchedCount": outcome.matched_count,
        "modifiedCount": outcome.modified_count,
        "upsertedId": format.encode_id(outcome.upserted_id),
    })
}

fn plain_json(value: Bson) -> Value {
    match value {
        Bson::Document(document) => Value::Object(
            document
                .into_iter()
                .map(|(key, value)| (key, plain_json(value)))
                .collect::<Map<_, _>>(),
        ),
        Bson::Array(values) => Value::Array(values.into_iter().map(plain_json).collect()),
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(at) => match at.try_to_rfc3339_string() {
            Ok(text) => Value::String(text),
            Err(_) => Bson::DateTime(at).into_relaxed_extjson(),
        },
        Bson::Binary(binary) => Value::String(STANDARD.encode(&binary.bytes)),
        Bson::Int32(n) => json!(n),
        Bson::Int64(n) => json!(n),
        Bson::Double(n) => serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(text) => Value::String(text),
        Bson::Boolean(flag) => Value::Bool(flag),
        Bson::Null | Bson::Undefined => Value::Null,
        other => other.into_relaxed_extjson(),
    }
}
