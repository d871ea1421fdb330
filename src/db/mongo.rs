//! MongoDB client and collection wrapper

use bson::{doc, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::{FindOptions, IndexOptions, ReturnDocument, UpdateModifications},
    results::{DeleteResult, UpdateResult},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::db::schemas::Metadata;
use crate::types::CivicError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Add the clause that hides soft-deleted documents
pub fn exclude_deleted(mut filter: Document) -> Document {
    filter.insert("metadata.is_deleted", doc! { "$ne": true });
    filter
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, CivicError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| CivicError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| CivicError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, applying its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, CivicError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, CivicError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;
        debug!(collection = collection_name, "Indexes applied");

        Ok(mongo_collection)
    }

    /// Raw driver collection, for pipelines the wrapper does not cover
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), CivicError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| CivicError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, resetting its metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<T, CivicError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.updated_at = DateTime::now();

        self.inner
            .insert_one(&item)
            .await
            .map_err(|e| CivicError::Database(format!("Insert failed: {}", e)))?;

        Ok(item)
    }

    /// Find one live (non-deleted) document
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, CivicError> {
        let full_filter = exclude_deleted(filter);

        self.find_one_any(full_filter).await
    }

    /// Find one document regardless of its soft-delete flag
    pub async fn find_one_any(&self, filter: Document) -> Result<Option<T>, CivicError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| CivicError::Database(format!("Find failed: {}", e)))
    }

    /// Find live documents with sort/skip/limit
    pub async fn find_many(
        &self,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<Vec<T>, CivicError> {
        let full_filter = exclude_deleted(filter);

        let cursor = self
            .inner
            .find(full_filter)
            .with_options(options)
            .await
            .map_err(|e| CivicError::Database(format!("Find failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| CivicError::Database(format!("Cursor read failed: {}", e)))
    }

    /// Count live documents
    pub async fn count(&self, filter: Document) -> Result<u64, CivicError> {
        let full_filter = exclude_deleted(filter);

        self.inner
            .count_documents(full_filter)
            .await
            .map_err(|e| CivicError::Database(format!("Count failed: {}", e)))
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, CivicError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| CivicError::Database(format!("Update failed: {}", e)))
    }

    /// Conditionally update one document and return it as written
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<Option<T>, CivicError> {
        self.inner
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| CivicError::Database(format!("Update failed: {}", e)))
    }

    /// Physically remove one document
    pub async fn delete_one(&self, filter: Document) -> Result<DeleteResult, CivicError> {
        self.inner
            .delete_one(filter)
            .await
            .map_err(|e| CivicError::Database(format!("Delete failed: {}", e)))
    }

    /// Soft delete one live document, stamping the deleter
    ///
    /// Returns the number of documents that flipped from live to deleted.
    pub async fn soft_delete(
        &self,
        filter: Document,
        deleted_by: bson::oid::ObjectId,
    ) -> Result<u64, CivicError> {
        let full_filter = exclude_deleted(filter);

        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": now,
                "metadata.deleted_by": deleted_by,
                "metadata.updated_at": now,
            }
        };

        Ok(self.update_one(full_filter, update).await?.modified_count)
    }
}
