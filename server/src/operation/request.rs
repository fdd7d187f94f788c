use mongodb::bson::{Bson, Document};
use serde_json::Value;

use super::sort::SortSpec;
use crate::error::ApiError;

const DEFAULT_JOB_STATUS: &str = "bot running";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    FindMany,
    FindOne,
    InsertOne,
    UpdateMany,
    StatusUpsert,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::FindMany => "find",
            OperationKind::FindOne => "findOne",
            OperationKind::InsertOne => "insertOne",
            OperationKind::UpdateMany => "updateMany",
            OperationKind::StatusUpsert => "bot-status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

/// Fallback database/collection used when a body leaves them out.
#[derive(Debug, Clone, Default)]
pub struct NamespaceDefaults {
    pub database: Option<String>,
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: SortSpec,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub collation: Option<Document>,
    pub sort_timestamp_as_date: bool,
}

/// Daily job status keyed by `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub timestamp: Bson,
    pub job_status: Bson,
    pub to_create: Bson,
    pub created: Bson,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    FindMany(FindQuery),
    FindOne(FindQuery),
    InsertOne {
        document: Document,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    StatusUpsert(StatusReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub namespace: Namespace,
    pub operation: Operation,
}

impl OperationRequest {
    pub fn kind(&self) -> OperationKind {
        match self.operation {
            Operation::FindMany(_) => OperationKind::FindMany,
            Operation::FindOne(_) => OperationKind::FindOne,
            Operation::InsertOne { .. } => OperationKind::InsertOne,
            Operation::UpdateMany { .. } => OperationKind::UpdateMany,
            Operation::StatusUpsert(_) => OperationKind::StatusUpsert,
        }
    }
}

/// Decodes a raw body into a document, materializing extended JSON markers.
///
/// Accepts an empty body, a JSON object, or a JSON string that itself
/// contains a JSON object.
pub fn decode_body(raw: &[u8]) -> Result<Document, ApiError> {
    let raw = raw.trim_ascii();
    if raw.is_empty() {
        return Ok(Document::new());
    }

    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid JSON body: {}", e)))?;
    let value = match value {
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid JSON body: {}", e)))?,
        other => other,
    };
    if value.is_null() {
        return Ok(Document::new());
    }

    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(_) => Err(ApiError::InvalidRequest("body must be a JSON object".to_string())),
        Err(e) => Err(ApiError::InvalidRequest(format!("invalid extended JSON: {}", e))),
    }
}

/// Decodes and validates a body for the given endpoint.
pub fn normalize(
    kind: OperationKind,
    raw: &[u8],
    defaults: &NamespaceDefaults,
) -> Result<OperationRequest, ApiError> {
    let body = decode_body(raw)?;
    let namespace = Namespace {
        database: required_name(&body, "database", defaults.database.as_deref())?,
        collection: required_name(&body, "collection", defaults.collection.as_deref())?,
    };

    let operation = match kind {
        OperationKind::FindMany => Operation::FindMany(FindQuery {
            filter: optional_document(&body, "filter")?.unwrap_or_default(),
            projection: optional_document(&body, "projection")?,
            sort: sort_spec(&body)?,
            skip: body.get("skip").and_then(non_negative_integer),
            limit: body.get("limit").and_then(non_negative_integer),
            collation: optional_document(&body, "collation")?,
            sort_timestamp_as_date: flag(&body, "sortTimestampAsDate"),
        }),
        OperationKind::FindOne => Operation::FindOne(FindQuery {
            filter: optional_document(&body, "filter")?.unwrap_or_default(),
            projection: optional_document(&body, "projection")?,
            sort: sort_spec(&body)?,
            ..FindQuery::default()
        }),
        OperationKind::InsertOne => Operation::InsertOne {
            document: optional_document(&body, "document")?
                .ok_or_else(|| ApiError::required("document"))?,
        },
        OperationKind::UpdateMany => {
            let update = optional_document(&body, "update")?
                .filter(|update| !update.is_empty())
                .ok_or_else(|| ApiError::required("update"))?;
            Operation::UpdateMany {
                filter: optional_document(&body, "filter")?.unwrap_or_default(),
                update,
                upsert: flag(&body, "upsert"),
            }
        }
        OperationKind::StatusUpsert => {
            let timestamp = match body.get("timestamp") {
                None | Some(Bson::Null) => return Err(ApiError::required("timestamp")),
                Some(value) => value.clone(),
            };
            Operation::StatusUpsert(StatusReport {
                timestamp,
                job_status: body
                    .get("job_status")
                    .cloned()
                    .unwrap_or_else(|| Bson::String(DEFAULT_JOB_STATUS.to_string())),
                to_create: body.get("to_create").cloned().unwrap_or(Bson::Int32(0)),
                created: body.get("created").cloned().unwrap_or(Bson::Int32(0)),
            })
        }
    };

    Ok(OperationRequest {
        namespace,
        operation,
    })
}

fn required_name(body: &Document, field: &str, fallback: Option<&str>) -> Result<String, ApiError> {
    match body.get(field) {
        Some(Bson::String(name)) if !name.is_empty() => Ok(name.clone()),
        None | Some(Bson::Null) | Some(Bson::String(_)) => fallback
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::required(field)),
        Some(_) => Err(ApiError::InvalidRequest(format!("{} must be a string", field))),
    }
}

/// `null` and absent both mean "not given".
fn optional_document(body: &Document, field: &str) -> Result<Option<Document>, ApiError> {
    match body.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Document(document)) => Ok(Some(document.clone())),
        Some(_) => Err(ApiError::InvalidRequest(format!("{} must be an object", field))),
    }
}

fn sort_spec(body: &Document) -> Result<SortSpec, ApiError> {
    Ok(optional_document(body, "sort")?
        .map(|raw| SortSpec::from_document(&raw))
        .unwrap_or_default())
}

fn flag(body: &Document, field: &str) -> bool {
    matches!(body.get(field), Some(Bson::Boolean(true)))
}

/// Well-formed non-negative integers only; anything else reads as absent.
pub fn non_negative_integer(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        Bson::Double(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n < u64::MAX as f64 => {
            Some(*n as u64)
        }
        _ => None,
    }
}
