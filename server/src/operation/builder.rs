use mongodb::bson::{Bson, DateTime, Document, doc};

use super::request::{FindQuery, Operation, OperationRequest, StatusReport};
use super::sort::{CAST_FIELD, SortPlan, resolve};
use crate::db_mongo::store::{DocumentStore, FindSpec, UpdateOutcome};
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Documents(Vec<Document>),
    Document(Option<Document>),
    Inserted { inserted_id: Option<Bson> },
    Updated(UpdateOutcome),
    /// Same counts as `Updated`, acknowledged with `ok: true`.
    StatusRecorded(UpdateOutcome),
}

/// Runs exactly one store call for the request. Store failures are returned
/// as `OperationFailed` without retrying.
pub async fn execute(
    store: &dyn DocumentStore,
    request: OperationRequest,
) -> Result<OperationResult, ApiError> {
    let kind = request.kind();
    let namespace = request.namespace;
    tracing::info!(
        operation = kind.as_str(),
        database = %namespace.database,
        collection = %namespace.collection,
        "Executing operation"
    );

    let result = match request.operation {
        Operation::FindMany(query) => match resolve(&query.sort, query.sort_timestamp_as_date) {
            SortPlan::Native(_) => {
                let spec = native_find_spec(&query);
                store
                    .find(&namespace, query.filter, spec)
                    .await
                    .map(OperationResult::Documents)
            }
            SortPlan::Coerced { field, .. } => {
                tracing::debug!(field = %field, "Sorting on casted date via aggregation");
                let pipeline = coerced_sort_pipeline(&query, &field);
                store
                    .aggregate(&namespace, pipeline, query.collation)
                    .await
                    .map(OperationResult::Documents)
            }
        },
        Operation::FindOne(query) => {
            let spec = FindSpec {
                limit: Some(1),
                ..native_find_spec(&query)
            };
            store
                .find(&namespace, query.filter, spec)
                .await
                .map(|documents| OperationResult::Document(documents.into_iter().next()))
        }
        Operation::InsertOne { document } => store
            .insert_one(&namespace, document)
            .await
            .map(|outcome| OperationResult::Inserted {
                inserted_id: outcome.inserted_id,
            }),
        Operation::UpdateMany {
            filter,
            update,
            upsert,
        } => store
            .update_many(&namespace, filter, update, upsert)
            .await
            .map(OperationResult::Updated),
        Operation::StatusUpsert(report) => {
            let (filter, update) = status_update(&report, DateTime::now());
            store
                .update_one(&namespace, filter, update, true)
                .await
                .map(OperationResult::StatusRecorded)
        }
    };

    result.map_err(|e| {
        tracing::error!(
            operation = kind.as_str(),
            database = %namespace.database,
            collection = %namespace.collection,
            "Operation failed: {:#}",
            e
        );
        ApiError::operation(e)
    })
}

/// Cursor options for the native path. `limit: 0` is left out since the
/// driver reads it as "no limit" anyway.
pub fn native_find_spec(query: &FindQuery) -> FindSpec {
    FindSpec {
        projection: query.projection.clone(),
        sort: (!query.sort.is_empty()).then(|| query.sort.to_document()),
        skip: query.skip,
        limit: query.limit.filter(|limit| *limit > 0),
        collation: query.collation.clone(),
    }
}

/// `$match -> $addFields -> $sort -> $skip -> $limit -> $unset -> $project`.
pub fn coerced_sort_pipeline(query: &FindQuery, field: &str) -> Vec<Document> {
    let mut pipeline = vec![
        doc! { "$match": query.filter.clone() },
        doc! { "$addFields": { CAST_FIELD: { "$toDate": format!("${}", field) } } },
        doc! { "$sort": query.sort.to_document_renaming(field, CAST_FIELD) },
    ];
    if let Some(skip) = query.skip.filter(|skip| *skip > 0) {
        pipeline.push(doc! { "$skip": to_i64(skip) });
    }
    if let Some(limit) = query.limit.filter(|limit| *limit > 0) {
        pipeline.push(doc! { "$limit": to_i64(limit) });
    }
    pipeline.push(doc! { "$unset": CAST_FIELD });
    // An empty `$project` is a server error, while an empty find projection returns everything.
    if let Some(projection) = query.projection.as_ref().filter(|p| !p.is_empty()) {
        pipeline.push(doc! { "$project": projection.clone() });
    }
    pipeline
}

/// Filter and update for the daily status document. `updated_at` moves on
/// every call, `created_at` is only written when the upsert inserts.
pub fn status_update(report: &StatusReport, now: DateTime) -> (Document, Document) {
    let filter = doc! { "timestamp": report.timestamp.clone() };
    let update = doc! {
        "$set": {
            "job_status": report.job_status.clone(),
            "timestamp": report.timestamp.clone(),
            "to_create": report.to_create.clone(),
            "created": report.created.clone(),
            "updated_at": now,
        },
        "$setOnInsert": {
            "created_at": now,
        },
    };
    (filter, update)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
