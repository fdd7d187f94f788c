use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::{
    Client, Collection, Cursor,
    bson::{Bson, Document},
    options::{AggregateOptions, Collation, FindOptions},
};

use super::MongoConnector;
use super::connection::ConnectionProvider;
use crate::operation::Namespace;

/// Cursor options for a native find. `None` leaves the clause out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub collation: Option<Document>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    pub inserted_id: Option<Bson>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// The calls the operation builder issues against the document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        spec: FindSpec,
    ) -> Result<Vec<Document>>;

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        collation: Option<Document>,
    ) -> Result<Vec<Document>>;

    async fn insert_one(&self, namespace: &Namespace, document: Document) -> Result<InsertOutcome>;

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome>;

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome>;

    /// Whether a connection has been established yet.
    fn is_connected(&self) -> bool;
}

pub struct MongoStore {
    provider: ConnectionProvider<MongoConnector>,
}

impl MongoStore {
    pub fn new(connector: MongoConnector) -> Self {
        Self {
            provider: ConnectionProvider::new(connector),
        }
    }

    async fn collection(&self, namespace: &Namespace) -> Result<Collection<Document>> {
        let client: Client = self.provider.get_connection().await?;
        Ok(client
            .database(&namespace.database)
            .collection::<Document>(&namespace.collection))
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        spec: FindSpec,
    ) -> Result<Vec<Document>> {
        let collection = self.collection(namespace).await?;

        let mut options = FindOptions::default();
        options.projection = spec.projection;
        options.sort = spec.sort;
        options.skip = spec.skip;
        options.limit = spec.limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        options.collation = spec.collation.map(parse_collation).transpose()?;

        let cursor = collection.find(filter).with_options(options).await?;
        drain(cursor).await
    }

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        collation: Option<Document>,
    ) -> Result<Vec<Document>> {
        let collection = self.collection(namespace).await?;

        let mut options = AggregateOptions::default();
        options.collation = collation.map(parse_collation).transpose()?;

        let cursor = collection.aggregate(pipeline).with_options(options).await?;
        drain(cursor).await
    }

    async fn insert_one(&self, namespace: &Namespace, document: Document) -> Result<InsertOutcome> {
        let collection = self.collection(namespace).await?;
        let result = collection.insert_one(document).await?;
        Ok(InsertOutcome {
            inserted_id: Some(result.inserted_id),
        })
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let collection = self.collection(namespace).await?;
        let result = collection.update_one(filter, update).upsert(upsert).await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let collection = self.collection(namespace).await?;
        let result = collection.update_many(filter, update).upsert(upsert).await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    fn is_connected(&self) -> bool {
        self.provider.is_connected()
    }
}

async fn drain(mut cursor: Cursor<Document>) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    while cursor.advance().await? {
        documents.push(cursor.deserialize_current()?);
    }
    Ok(documents)
}

fn parse_collation(raw: Document) -> Result<Collation> {
    mongodb::bson::from_document(raw).context("Invalid collation")
}
