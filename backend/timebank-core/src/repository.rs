// src/repository.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::{User, USERS};
use crate::store::{Document, DocumentStore, Query, StoreError};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed access to the document store. Every call is bounded by `timeout`.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

fn decode<T: DeserializeOwned>(id: String, mut doc: Document) -> Result<T, StoreError> {
    doc.insert("id".into(), Value::String(id));
    Ok(serde_json::from_value(Value::Object(doc))?)
}

fn encode<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(mut doc) => {
            doc.remove("id");
            Ok(doc)
        }
        other => Err(StoreError::Unavailable(format!(
            "record did not serialize to an object: {}",
            other
        ))),
    }
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    pub async fn fetch<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.bounded(self.store.get(collection, id)).await? {
            Some(doc) => Ok(Some(decode(id.to_string(), doc)?)),
            None => Ok(None),
        }
    }

    /// Runs `query`; documents that no longer fit the record shape are
    /// skipped with a warning.
    pub async fn find<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<T>, StoreError> {
        let docs = self.bounded(self.store.query(collection, query)).await?;
        let mut records = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            match decode::<T>(id.clone(), doc) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed document {}/{}: {}", collection, id, e),
            }
        }
        Ok(records)
    }

    /// Stores a new record and returns its generated id.
    pub async fn create<T: Serialize>(
        &self,
        collection: &str,
        record: &T,
    ) -> Result<String, StoreError> {
        let doc = encode(record)?;
        self.bounded(self.store.insert(collection, doc)).await
    }

    pub async fn patch(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        self.bounded(self.store.update(collection, id, fields)).await
    }

    /// Creates `id` or overwrites only the given fields of it.
    pub async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        self.bounded(self.store.set(collection, id, fields, true)).await
    }

    // --- Users ---

    pub async fn user(&self, id: &str) -> Result<Option<User>, StoreError> {
        if id.is_empty() {
            return Ok(None);
        }
        self.fetch(USERS, id).await
    }

    /// First decodable user whose `email` field matches.
    pub async fn first_user_with_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users: Vec<User> = self.find(USERS, &Query::new().eq("email", email)).await?;
        Ok(users.into_iter().next())
    }

    pub async fn users(&self) -> Result<Vec<User>, StoreError> {
        self.find(USERS, &Query::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Store whose every call outlives any reasonable timeout.
    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        async fn get(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn query(&self, _: &str, _: &Query) -> Result<Vec<(String, Document)>, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
        async fn insert(&self, _: &str, _: Document) -> Result<String, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
        async fn set(&self, _: &str, _: &str, _: Document, _: bool) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn update(&self, _: &str, _: &str, _: Document) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stalled_store_surfaces_as_timeout() {
        let repo = Repository::new(Arc::new(StalledStore), Duration::from_millis(20));
        let err = repo.user("u1").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn fetched_records_carry_their_document_id() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store.clone(), DEFAULT_STORE_TIMEOUT);
        let user = User {
            id: "ignored".into(),
            email: "ana@empresa.com".into(),
            display_name: "Ana".into(),
            role: Default::default(),
            is_active: true,
            uid: None,
            created_at: None,
        };
        let id = repo.create(USERS, &user).await.unwrap();

        let stored = store.get(USERS, &id).await.unwrap().unwrap();
        assert!(stored.get("id").is_none());

        let fetched = repo.user(&id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.display_name, "Ana");
    }

    #[tokio::test]
    async fn malformed_documents_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store.clone(), DEFAULT_STORE_TIMEOUT);
        store
            .insert(USERS, json!({"email": 42}).as_object().unwrap().clone())
            .await
            .unwrap();
        store
            .insert(USERS, json!({"email": "ana@empresa.com"}).as_object().unwrap().clone())
            .await
            .unwrap();

        let users = repo.users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "ana@empresa.com");
    }

    #[tokio::test]
    async fn email_lookup_passes_over_undecodable_match() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store.clone(), DEFAULT_STORE_TIMEOUT);
        let broken = json!({"email": "ana@empresa.com", "role": 42});
        store
            .insert(USERS, broken.as_object().unwrap().clone())
            .await
            .unwrap();
        let valid = json!({"email": "ana@empresa.com", "displayName": "Ana"});
        store
            .set(USERS, "g-ana", valid.as_object().unwrap().clone(), false)
            .await
            .unwrap();

        let found = repo.first_user_with_email("ana@empresa.com").await.unwrap().unwrap();
        assert_eq!(found.id, "g-ana");
        assert_eq!(found.display_name, "Ana");
    }
}
