// src/store.rs
//
// Document store gateway: schemaless JSON documents grouped in collections,
// queried by field filters with optional ordering and limit.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub type Document = Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> StoreError {
    StoreError::Io {
        source,
        context: context.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Applies filters, ordering and limit to documents in storage order.
    pub fn apply<'a, I>(&self, docs: I) -> Vec<(String, Document)>
    where
        I: IntoIterator<Item = (&'a String, &'a Document)>,
    {
        let mut matched: Vec<(String, Document)> = docs
            .into_iter()
            .filter(|(_, doc)| self.filters.iter().all(|f| matches_filter(doc, f)))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();

        if let Some((field, direction)) = &self.order_by {
            // Stable sort; documents missing the field go last.
            matched.sort_by(|(_, a), (_, b)| match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => {
                    let ord = compare_values(x, y).unwrap_or(Ordering::Equal);
                    match direction {
                        Direction::Asc => ord,
                        Direction::Desc => ord.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

/// Orders two field values. Timestamps compare chronologically, numbers
/// numerically, other strings lexically; mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn matches_filter(doc: &Document, filter: &Filter) -> bool {
    let Some(actual) = doc.get(&filter.field) else {
        return false;
    };
    let Some(ord) = compare_values(actual, &filter.value) else {
        return false;
    };
    match filter.op {
        FilterOp::Eq => ord == Ordering::Equal,
        FilterOp::Lt => ord == Ordering::Less,
        FilterOp::Lte => ord != Ordering::Greater,
        FilterOp::Gt => ord == Ordering::Greater,
        FilterOp::Gte => ord != Ordering::Less,
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError>;

    /// Stores a new document under a generated id and returns the id.
    async fn insert(&self, collection: &str, doc: Document) -> Result<String, StoreError>;

    /// Creates or replaces `id`. With `merge`, existing fields not present in
    /// `doc` are kept.
    async fn set(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
        merge: bool,
    ) -> Result<(), StoreError>;

    /// Overwrites the given top-level fields of an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError>;
}

// --- In-memory adapter ---

type Collection = Vec<(String, Document)>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self, collection: &str) -> Collection {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    async fn load(&self, collection: &str, docs: Collection) {
        self.collections
            .write()
            .await
            .insert(collection.to_string(), docs);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|(doc_id, _)| doc_id == id))
            .map(|(_, doc)| doc.clone()))
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(query.apply(docs.iter().map(|(id, doc)| (id, doc))))
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(insert_into(collections.entry(collection.to_string()).or_default(), doc))
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
        merge: bool,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        set_in(collections.entry(collection.to_string()).or_default(), id, doc, merge);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection) {
            Some(docs) => update_in(docs, collection, id, fields),
            None => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }
}

fn insert_into(docs: &mut Collection, doc: Document) -> String {
    let id = Uuid::new_v4().simple().to_string();
    docs.push((id.clone(), doc));
    id
}

fn set_in(docs: &mut Collection, id: &str, doc: Document, merge: bool) {
    match docs.iter_mut().find(|(doc_id, _)| doc_id == id) {
        Some((_, existing)) if merge => existing.extend(doc),
        Some((_, existing)) => *existing = doc,
        None => docs.push((id.to_string(), doc)),
    }
}

fn update_in(
    docs: &mut Collection,
    collection: &str,
    id: &str,
    fields: Document,
) -> Result<(), StoreError> {
    let (_, existing) = docs
        .iter_mut()
        .find(|(doc_id, _)| doc_id == id)
        .ok_or_else(|| StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
    existing.extend(fields);
    Ok(())
}

// --- JSON file adapter ---

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    data: Document,
}

/// Keeps every collection in memory and rewrites `<dir>/<collection>.json`
/// on each write; a write that fails to reach disk leaves memory untouched.
/// Writers are serialized by `write_lock`.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    memory: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_context(e, format!("Failed to create store directory: {:?}", dir)))?;

        let memory = MemoryStore::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_context(e, format!("Failed to list store directory: {:?}", dir)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_context(e, format!("Failed to list store directory: {:?}", dir)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let json_string = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_context(e, format!("Failed to read collection file: {:?}", path)))?;
            let stored: Vec<StoredDocument> = serde_json::from_str(&json_string)?;
            debug!("Loaded {} documents into '{}'", stored.len(), collection);
            memory
                .load(
                    collection,
                    stored.into_iter().map(|d| (d.id, d.data)).collect(),
                )
                .await;
        }

        info!("JSON file store opened at {:?}", dir);
        Ok(Self {
            dir,
            memory,
            write_lock: Mutex::new(()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", collection))
    }

    /// Writes `docs` as the new contents of the collection file. Memory is
    /// only replaced once the file rename has succeeded.
    async fn commit(&self, collection: &str, docs: Collection) -> Result<(), StoreError> {
        let stored: Vec<StoredDocument> = docs
            .iter()
            .map(|(id, data)| StoredDocument {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();
        let json_string = serde_json::to_string_pretty(&stored)?;

        let path = self.collection_path(collection);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json_string)
            .await
            .map_err(|e| {
                io_context(e, format!("Failed to write collection file: {:?}", tmp_path))
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| io_context(e, format!("Failed to replace collection file: {:?}", path)))?;

        self.memory.load(collection, docs).await;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.memory.get(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.memory.query(collection, query).await
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut docs = self.memory.snapshot(collection).await;
        let id = insert_into(&mut docs, doc);
        self.commit(collection, docs).await?;
        Ok(id)
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
        merge: bool,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut docs = self.memory.snapshot(collection).await;
        set_in(&mut docs, id, doc, merge);
        self.commit(collection, docs).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut docs = self.memory.snapshot(collection).await;
        update_in(&mut docs, collection, id, fields)?;
        self.commit(collection, docs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be a JSON object"),
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (user, date, status) in [
            ("u1", "2024-06-12T15:00:00Z", "approved"),
            ("u2", "2024-06-12T08:00:00Z", "approved"),
            ("u1", "2024-06-13T00:00:00Z", "approved"),
            ("u3", "2024-06-12T10:00:00Z", "pending"),
        ] {
            store
                .insert("workEntries", doc(json!({"userId": user, "date": date, "status": status})))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn range_query_on_timestamps_is_half_open() {
        let store = seeded().await;
        let query = Query::new()
            .eq("status", "approved")
            .filter("date", FilterOp::Gte, "2024-06-12T00:00:00Z")
            .filter("date", FilterOp::Lt, "2024-06-13T00:00:00Z");

        let found = store.query("workEntries", &query).await.unwrap();
        let users: Vec<&str> = found.iter().map(|(_, d)| d["userId"].as_str().unwrap()).collect();
        assert_eq!(users, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn order_and_limit_apply_after_filters() {
        let store = seeded().await;
        let query = Query::new()
            .eq("status", "approved")
            .order_by("date", Direction::Asc)
            .limit(2);

        let found = store.query("workEntries", &query).await.unwrap();
        let dates: Vec<&str> = found.iter().map(|(_, d)| d["date"].as_str().unwrap()).collect();
        assert_eq!(dates, vec!["2024-06-12T08:00:00Z", "2024-06-12T15:00:00Z"]);
    }

    #[tokio::test]
    async fn timestamps_with_offsets_compare_chronologically() {
        assert_eq!(
            compare_values(&json!("2024-06-12T01:00:00+02:00"), &json!("2024-06-11T23:30:00Z")),
            Some(Ordering::Less)
        );
    }

    #[tokio::test]
    async fn merge_set_keeps_unlisted_fields() {
        let store = MemoryStore::new();
        store
            .set(
                "users",
                "ana@empresa.com",
                doc(json!({"email": "ana@empresa.com", "uid": "g-1"})),
                false,
            )
            .await
            .unwrap();
        store
            .set(
                "users",
                "ana@empresa.com",
                doc(json!({"displayName": "Ana", "isActive": true})),
                true,
            )
            .await
            .unwrap();

        let stored = store.get("users", "ana@empresa.com").await.unwrap().unwrap();
        assert_eq!(stored["uid"], "g-1");
        assert_eq!(stored["displayName"], "Ana");
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update("absences", "nope", doc(json!({"status": "approved"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            let id = store
                .insert("absences", doc(json!({"userId": "u1", "status": "pending"})))
                .await
                .unwrap();
            store
                .update("absences", &id, doc(json!({"status": "approved"})))
                .await
                .unwrap();
            id
        };

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let stored = reopened.get("absences", &id).await.unwrap().unwrap();
        assert_eq!(stored["status"], "approved");
        assert!(dir.path().join("absences.json").exists());
    }

    #[tokio::test]
    async fn failed_file_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let id = store
            .insert("absences", doc(json!({"userId": "u1", "status": "pending"})))
            .await
            .unwrap();

        // A non-empty directory in place of the file makes the rename fail.
        let path = dir.path().join("absences.json");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), b"x").unwrap();

        let result = store
            .update("absences", &id, doc(json!({"status": "approved"})))
            .await;
        assert!(matches!(result, Err(StoreError::Io { .. })));

        let stored = store.get("absences", &id).await.unwrap().unwrap();
        assert_eq!(stored["status"], "pending");
        let pending = store
            .query("absences", &Query::new().eq("status", "pending"))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
