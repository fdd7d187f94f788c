//! In-memory `DocumentStore` that records every call.
//!
//! It understands the subset of query, update and pipeline operators the
//! proxy's tests exercise: equality and comparison filters, `$set`,
//! `$setOnInsert`, `$unset`, `$inc`, and the stages of the timestamp sort
//! pipeline.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use mongodb::bson::{Bson, DateTime, Document, oid::ObjectId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use super::store::{DocumentStore, FindSpec, InsertOutcome, UpdateOutcome};
use crate::operation::Namespace;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Find {
        namespace: Namespace,
        filter: Document,
        spec: FindSpec,
    },
    Aggregate {
        namespace: Namespace,
        pipeline: Vec<Document>,
        collation: Option<Document>,
    },
    InsertOne {
        namespace: Namespace,
        document: Document,
    },
    UpdateOne {
        namespace: Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        namespace: Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    },
}

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<(String, String), Vec<Document>>>,
    calls: Mutex<Vec<StoreCall>>,
    failure: Option<String>,
    connected: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// A store whose every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, AtomicOrdering::SeqCst);
    }

    pub fn seed(&self, namespace: &Namespace, documents: Vec<Document>) {
        let mut collections = self.collections.lock().unwrap();
        let stored = collections.entry(key(namespace)).or_default();
        for mut document in documents {
            ensure_id(&mut document);
            stored.push(document);
        }
    }

    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(&key(namespace))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: StoreCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match &self.failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }

    fn update(
        &self,
        namespace: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
        many: bool,
    ) -> Result<UpdateOutcome> {
        let mut collections = self.collections.lock().unwrap();
        let stored = collections.entry(key(namespace)).or_default();

        let mut matched_count = 0;
        let mut modified_count = 0;
        for document in stored.iter_mut() {
            if !matches(document, filter)? {
                continue;
            }
            matched_count += 1;
            let before = document.clone();
            apply_update(document, update, false)?;
            if *document != before {
                modified_count += 1;
            }
            if !many {
                break;
            }
        }

        let mut upserted_id = None;
        if matched_count == 0 && upsert {
            let mut document: Document = filter
                .iter()
                .filter(|(field, value)| !field.starts_with('$') && !is_operator_document(value))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();
            apply_update(&mut document, update, true)?;
            upserted_id = Some(ensure_id(&mut document));
            stored.push(document);
        }

        Ok(UpdateOutcome {
            matched_count,
            modified_count,
            upserted_id,
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        spec: FindSpec,
    ) -> Result<Vec<Document>> {
        self.record(StoreCall::Find {
            namespace: namespace.clone(),
            filter: filter.clone(),
            spec: spec.clone(),
        })?;

        let mut documents = Vec::new();
        for document in self.documents(namespace) {
            if matches(&document, &filter)? {
                documents.push(document);
            }
        }
        if let Some(sort) = &spec.sort {
            sort_documents(&mut documents, sort);
        }
        let documents = page(documents, spec.skip, spec.limit);
        Ok(match &spec.projection {
            Some(projection) => documents.iter().map(|d| project(d, projection)).collect(),
            None => documents,
        })
    }

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        collation: Option<Document>,
    ) -> Result<Vec<Document>> {
        self.record(StoreCall::Aggregate {
            namespace: namespace.clone(),
            pipeline: pipeline.clone(),
            collation,
        })?;

        let mut documents = self.documents(namespace);
        for stage in &pipeline {
            let (name, argument) = stage
                .iter()
                .next()
                .ok_or_else(|| anyhow!("empty pipeline stage"))?;
            documents = match (name.as_str(), argument) {
                ("$match", Bson::Document(filter)) => {
                    let mut kept = Vec::new();
                    for document in documents {
                        if matches(&document, filter)? {
                            kept.push(document);
                        }
                    }
                    kept
                }
                ("$addFields", Bson::Document(fields)) => {
                    let mut extended = Vec::new();
                    for mut document in documents {
                        for (field, expression) in fields {
                            let value = evaluate(&document, expression)?;
                            document.insert(field.clone(), value);
                        }
                        extended.push(document);
                    }
                    extended
                }
                ("$sort", Bson::Document(sort)) => {
                    sort_documents(&mut documents, sort);
                    documents
                }
                ("$skip", value) => page(documents, as_count(value), None),
                ("$limit", value) => page(documents, None, as_count(value)),
                ("$unset", Bson::String(field)) => documents
                    .into_iter()
                    .map(|mut document| {
                        document.remove(field);
                        document
                    })
                    .collect(),
                ("$project", Bson::Document(projection)) if projection.is_empty() => {
                    bail!("$project specification must have at least one field")
                }
                ("$project", Bson::Document(projection)) => {
                    documents.iter().map(|d| project(d, projection)).collect()
                }
                (other, _) => bail!("unsupported pipeline stage {}", other),
            };
        }
        Ok(documents)
    }

    async fn insert_one(&self, namespace: &Namespace, document: Document) -> Result<InsertOutcome> {
        self.record(StoreCall::InsertOne {
            namespace: namespace.clone(),
            document: document.clone(),
        })?;

        let mut document = document;
        let inserted_id = ensure_id(&mut document);
        self.collections
            .lock()
            .unwrap()
            .entry(key(namespace))
            .or_default()
            .push(document);
        Ok(InsertOutcome {
            inserted_id: Some(inserted_id),
        })
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        self.record(StoreCall::UpdateOne {
            namespace: namespace.clone(),
            filter: filter.clone(),
            update: update.clone(),
            upsert,
        })?;
        self.update(namespace, &filter, &update, upsert, false)
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        self.record(StoreCall::UpdateMany {
            namespace: namespace.clone(),
            filter: filter.clone(),
            update: update.clone(),
            upsert,
        })?;
        self.update(namespace, &filter, &update, upsert, true)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(AtomicOrdering::SeqCst)
    }
}

fn key(namespace: &Namespace) -> (String, String) {
    (namespace.database.clone(), namespace.collection.clone())
}

fn ensure_id(document: &mut Document) -> Bson {
    if let Some(id) = document.get("_id") {
        return id.clone();
    }
    let id = Bson::ObjectId(ObjectId::new());
    document.insert("_id", id.clone());
    id
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(document) => document.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches(document: &Document, filter: &Document) -> Result<bool> {
    for (field, condition) in filter {
        let value = document.get(field);
        let holds = match condition {
            Bson::Document(operators) if is_operator_document(condition) => {
                let mut all = true;
                for (operator, operand) in operators {
                    all &= match operator.as_str() {
                        "$eq" => value == Some(operand),
                        "$ne" => value != Some(operand),
                        "$gt" => compare_opt(value, operand) == Some(Ordering::Greater),
                        "$gte" => matches!(
                            compare_opt(value, operand),
                            Some(Ordering::Greater | Ordering::Equal)
                        ),
                        "$lt" => compare_opt(value, operand) == Some(Ordering::Less),
                        "$lte" => matches!(
                            compare_opt(value, operand),
                            Some(Ordering::Less | Ordering::Equal)
                        ),
                        "$exists" => value.is_some() == matches!(operand, Bson::Boolean(true)),
                        other => bail!("unknown operator: {}", other),
                    };
                }
                all
            }
            _ => value == Some(condition),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> Result<()> {
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            bail!("{} requires a document", operator);
        };
        match operator.as_str() {
            "$set" => {
                for (field, value) in fields {
                    document.insert(field.clone(), value.clone());
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (field, value) in fields {
                        document.insert(field.clone(), value.clone());
                    }
                }
            }
            "$unset" => {
                for field in fields.keys() {
                    document.remove(field);
                }
            }
            "$inc" => {
                for (field, amount) in fields {
                    let current = document.get(field).cloned().unwrap_or(Bson::Int32(0));
                    document.insert(field.clone(), add(&current, amount)?);
                }
            }
            other if other.starts_with('$') => bail!("unsupported update operator {}", other),
            _ => bail!("update document requires atomic operators"),
        }
    }
    Ok(())
}

fn add(current: &Bson, amount: &Bson) -> Result<Bson> {
    Ok(match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a + b),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a) + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + i64::from(*b)),
        _ => match (as_f64(current), as_f64(amount)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => bail!("cannot apply $inc to a non-numeric value"),
        },
    })
}

/// `{"$toDate": "$field"}` or a literal value.
fn evaluate(document: &Document, expression: &Bson) -> Result<Bson> {
    let Bson::Document(inner) = expression else {
        return Ok(expression.clone());
    };
    let Some(Bson::String(path)) = inner.get("$toDate") else {
        return Ok(expression.clone());
    };
    let source = path
        .strip_prefix('$')
        .and_then(|field| document.get(field))
        .cloned()
        .unwrap_or(Bson::Null);
    to_date(source)
}

fn to_date(value: Bson) -> Result<Bson> {
    Ok(match value {
        Bson::DateTime(at) => Bson::DateTime(at),
        Bson::Int64(millis) => Bson::DateTime(DateTime::from_millis(millis)),
        Bson::Int32(millis) => Bson::DateTime(DateTime::from_millis(i64::from(millis))),
        Bson::Double(millis) => Bson::DateTime(DateTime::from_millis(millis as i64)),
        Bson::String(text) => {
            let parsed = DateTime::parse_rfc3339_str(&text)
                .or_else(|_| DateTime::parse_rfc3339_str(format!("{}T00:00:00Z", text)))
                .map_err(|_| anyhow!("Error parsing date string '{}'", text))?;
            Bson::DateTime(parsed)
        }
        Bson::Null => Bson::Null,
        other => bail!("Unsupported conversion from {:?} to date", other.element_type()),
    })
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn as_count(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => Some(a.bytes().cmp(&b.bytes())),
        _ => as_f64(a)?.partial_cmp(&as_f64(b)?),
    }
}

fn compare_opt(value: Option<&Bson>, operand: &Bson) -> Option<Ordering> {
    compare(value?, operand)
}

fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|a, b| {
        for (field, direction) in sort {
            let ordering = match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = if as_f64(direction) == Some(-1.0) {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn page(documents: Vec<Document>, skip: Option<u64>, limit: Option<u64>) -> Vec<Document> {
    let skip = skip.unwrap_or(0) as usize;
    let iter = documents.into_iter().skip(skip);
    match limit.filter(|limit| *limit > 0) {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    }
}

/// Inclusion or exclusion projection on top-level fields.
fn project(document: &Document, projection: &Document) -> Document {
    let include_id = !matches!(projection.get("_id"), Some(v) if as_f64(v) == Some(0.0) || v == &Bson::Boolean(false));
    let inclusive = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .any(|(_, flag)| as_f64(flag) == Some(1.0) || flag == &Bson::Boolean(true));

    document
        .iter()
        .filter(|(field, _)| {
            if field.as_str() == "_id" {
                return include_id;
            }
            if inclusive {
                projection.contains_key(field.as_str())
            } else {
                !projection.contains_key(field.as_str())
            }
        })
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_filters() {
        let document = doc! { "n": 5, "name": "a" };
        assert!(matches(&document, &doc! {}).unwrap());
        assert!(matches(&document, &doc! { "n": 5 }).unwrap());
        assert!(!matches(&document, &doc! { "n": 6 }).unwrap());
        assert!(matches(&document, &doc! { "n": { "$gte": 5, "$lt": 6 } }).unwrap());
        assert!(matches(&document, &doc! { "missing": { "$exists": false } }).unwrap());
        assert!(matches(&document, &doc! { "n": { "$bogus": 1 } }).is_err());
    }

    #[test]
    fn test_projection() {
        let document = doc! { "_id": 1, "a": 1, "b": 2 };
        assert_eq!(project(&document, &doc! { "a": 1 }), doc! { "_id": 1, "a": 1 });
        assert_eq!(project(&document, &doc! { "_id": 0, "a": 1 }), doc! { "a": 1 });
        assert_eq!(project(&document, &doc! { "b": 0 }), doc! { "_id": 1, "a": 1 });
    }

    #[test]
    fn test_to_date_rejects_garbage() {
        assert!(to_date(Bson::String("yesterday".into())).is_err());
        assert_eq!(
            to_date(Bson::String("2026-02-01".into())).unwrap(),
            Bson::DateTime(DateTime::from_millis(1_769_904_000_000))
        );
    }
}
