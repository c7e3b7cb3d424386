//! Storage collaborator seam
//!
//! The pager only needs a sorted range scan with a `(sort value, id)`
//! inequality. [`MemoryCollection`] executes those scans in process the way a
//! document store would and backs the tests and the dev server.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cursor::SortValue;
use crate::model::Session;
use crate::scoring::{GradeOutcome, GradeUpdate, Response};
use crate::sort::{Direction, Document, SortField};
use crate::TutorError;

/// Errors reported by a storage backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage query rejected: {0}")]
    Query(String),
}

/// Document-store style equality filter
///
/// Keys are dotted field paths into the serialized document. A value of the
/// form `{"$ne": v}` matches anything except `v`; no other `$` operator is
/// supported. Missing fields compare as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `path == value`
    pub fn equals(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(path.into(), value.into());
        self
    }

    /// Require `path != value`
    pub fn not_equals(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut operand = Map::new();
        operand.insert("$ne".to_string(), value.into());
        self.0.insert(path.into(), Value::Object(operand));
        self
    }

    /// Build from a caller supplied JSON object
    ///
    /// Operand objects may only use `$ne`, and only on its own.
    pub fn from_json(value: Value) -> crate::Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::default()),
            other => {
                return Err(TutorError::InvalidFilter(format!(
                    "filter must be an object, got {other}"
                )))
            }
        };
        for (path, operand) in &map {
            let Value::Object(op) = operand else {
                continue;
            };
            if let Some(key) = op.keys().find(|k| k.starts_with('$') && k.as_str() != "$ne") {
                return Err(TutorError::InvalidFilter(format!(
                    "unsupported operator '{key}' on '{path}'"
                )));
            }
            if op.contains_key("$ne") && op.len() > 1 {
                return Err(TutorError::InvalidFilter(format!(
                    "'$ne' on '{path}' cannot be combined with other keys"
                )));
            }
        }
        Ok(Self(map))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a condition on `path` is present
    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// Evaluate against a serialized document
    pub fn matches(&self, doc: &Value) -> bool {
        self.0.iter().all(|(path, expected)| {
            let actual = lookup(doc, path).unwrap_or(&Value::Null);
            match expected {
                Value::Object(op) if op.len() == 1 && op.contains_key("$ne") => {
                    op.get("$ne").map_or(true, |v| v != actual)
                }
                _ => expected == actual,
            }
        })
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, segment| node.get(segment))
}

/// Keyset inequality resuming strictly after a cursor position
#[derive(Debug, Clone, PartialEq)]
pub struct RangePredicate {
    /// Sort value at the cursor; `None` when scanning by id alone
    pub value: Option<SortValue>,
    pub id: String,
    pub direction: Direction,
}

impl RangePredicate {
    /// Whether a row at `(value, id)` lies strictly beyond the cursor
    ///
    /// Ascending: `value > v OR (value == v AND id > id0)`; descending flips
    /// both inequalities.
    pub fn matches(&self, value: &SortValue, id: &str) -> bool {
        let ordering = match &self.value {
            None => id.cmp(self.id.as_str()),
            Some(cursor_value) => value
                .cmp(cursor_value)
                .then_with(|| id.cmp(self.id.as_str())),
        };
        match self.direction {
            Direction::Ascending => ordering == Ordering::Greater,
            Direction::Descending => ordering == Ordering::Less,
        }
    }
}

/// One sorted range scan
#[derive(Debug, Clone)]
pub struct ScanQuery<S> {
    pub filter: Filter,
    pub sort: S,
    pub direction: Direction,
    pub range: Option<RangePredicate>,
    pub limit: usize,
}

/// Sorted range scan over documents of type `T`
///
/// Implementations return at most `query.limit` documents matching
/// `filter AND range`, ordered by `(sort value, id)` in `query.direction`.
#[async_trait]
pub trait Scan<T: Document>: Send + Sync {
    async fn scan(&self, query: &ScanQuery<T::Sort>) -> Result<Vec<T>, StorageError>;
}

/// Point reads and upserts by document id
#[async_trait]
pub trait DocumentStore<T: Document>: Scan<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, StorageError>;

    async fn upsert(&self, doc: T) -> Result<(), StorageError>;
}

/// Atomic session edits
///
/// Each call reads, edits and writes one session as a single step, so edits
/// to sibling leaves of the same session never overwrite each other.
/// Soft-deleted sessions are reported as not found and are never rewritten.
#[async_trait]
pub trait SessionStore: DocumentStore<Session> {
    /// Apply `update` to one leaf and persist it with the recomputed grader aggregate
    async fn update_leaf(
        &self,
        session_id: &str,
        response_id: &str,
        expectation_id: &str,
        update: GradeUpdate,
        at: DateTime<Utc>,
    ) -> crate::Result<(Session, GradeOutcome)>;

    /// Add or replace a response, opening the session on first use
    async fn record_response(
        &self,
        session_id: &str,
        lesson_id: &str,
        username: Option<String>,
        response: Response,
        at: DateTime<Utc>,
    ) -> crate::Result<Session>;

    async fn soft_delete(&self, session_id: &str, at: DateTime<Utc>) -> crate::Result<Session>;
}

/// In-process collection keyed by document id
pub struct MemoryCollection<T> {
    docs: Arc<RwLock<HashMap<String, T>>>,
}

impl<T> MemoryCollection<T>
where
    T: Document + Clone + Serialize,
{
    pub fn new() -> Self {
        Self {
            docs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a collection seeded with `docs`
    pub fn with_docs(docs: impl IntoIterator<Item = T>) -> Self {
        let map = docs
            .into_iter()
            .map(|doc| (doc.id().to_string(), doc))
            .collect();
        Self {
            docs: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn insert(&self, doc: T) {
        let mut docs = self.docs.write().await;
        docs.insert(doc.id().to_string(), doc);
    }

    pub async fn remove(&self, id: &str) -> Option<T> {
        let mut docs = self.docs.write().await;
        docs.remove(id)
    }

    /// Read-modify-write one document under the write lock
    ///
    /// `edit` receives the stored document, if any. The document it returns
    /// is written back only when it succeeds.
    pub async fn update<R, E>(
        &self,
        id: &str,
        edit: impl FnOnce(Option<T>) -> Result<(T, R), E>,
    ) -> Result<R, E> {
        let mut docs = self.docs.write().await;
        let (doc, out) = edit(docs.get(id).cloned())?;
        docs.insert(doc.id().to_string(), doc);
        Ok(out)
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

impl<T> Default for MemoryCollection<T>
where
    T: Document + Clone + Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MemoryCollection<T> {
    fn clone(&self) -> Self {
        Self {
            docs: self.docs.clone(),
        }
    }
}

#[async_trait]
impl<T> Scan<T> for MemoryCollection<T>
where
    T: Document + Clone + Serialize,
{
    async fn scan(&self, query: &ScanQuery<T::Sort>) -> Result<Vec<T>, StorageError> {
        let docs = self.docs.read().await;

        let mut rows = Vec::new();
        for doc in docs.values() {
            if !query.filter.is_empty() {
                let value = serde_json::to_value(doc)
                    .map_err(|e| StorageError::Query(e.to_string()))?;
                if !query.filter.matches(&value) {
                    continue;
                }
            }
            let sort_value = query.sort.value_of(doc);
            if let Some(range) = &query.range {
                if !range.matches(&sort_value, doc.id()) {
                    continue;
                }
            }
            rows.push((sort_value, doc));
        }

        rows.sort_by(|(av, a), (bv, b)| {
            let ordering = av.cmp(bv).then_with(|| a.id().cmp(b.id()));
            match query.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });

        Ok(rows
            .into_iter()
            .take(query.limit)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

#[async_trait]
impl<T> DocumentStore<T> for MemoryCollection<T>
where
    T: Document + Clone + Serialize,
{
    async fn get(&self, id: &str) -> Result<Option<T>, StorageError> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn upsert(&self, doc: T) -> Result<(), StorageError> {
        self.insert(doc).await;
        Ok(())
    }
}

fn live_session(session_id: &str, stored: Option<Session>) -> crate::Result<Session> {
    stored.filter(|s| !s.deleted).ok_or_else(|| TutorError::NotFound {
        kind: "session",
        id: session_id.to_string(),
    })
}

#[async_trait]
impl SessionStore for MemoryCollection<Session> {
    async fn update_leaf(
        &self,
        session_id: &str,
        response_id: &str,
        expectation_id: &str,
        update: GradeUpdate,
        at: DateTime<Utc>,
    ) -> crate::Result<(Session, GradeOutcome)> {
        self.update(session_id, |stored| -> crate::Result<_> {
            let mut session = live_session(session_id, stored)?;
            let outcome = session.grade_leaf(response_id, expectation_id, update, at)?;
            Ok((session.clone(), (session, outcome)))
        })
        .await
    }

    async fn record_response(
        &self,
        session_id: &str,
        lesson_id: &str,
        username: Option<String>,
        response: Response,
        at: DateTime<Utc>,
    ) -> crate::Result<Session> {
        self.update(session_id, |stored| -> crate::Result<_> {
            let mut session = match stored {
                None => Session::new(session_id, lesson_id, at),
                stored => live_session(session_id, stored)?,
            };
            if let Some(username) = username {
                session.username = username;
            }
            session.record_response(lesson_id, response, at)?;
            Ok((session.clone(), session))
        })
        .await
    }

    async fn soft_delete(&self, session_id: &str, at: DateTime<Utc>) -> crate::Result<Session> {
        self.update(session_id, |stored| -> crate::Result<_> {
            let mut session = live_session(session_id, stored)?;
            session.deleted = true;
            session.updated_at = at;
            Ok((session.clone(), session))
        })
        .await
    }
}
