//! Lesson progress store.
//!
//! Lesson pages record a completed lesson after a successful run. The
//! execution core never touches this store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ServerError, ServerResult};

/// Progress of one user on one lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub chapter_id: String,
    pub lesson_id: String,
    /// Free-form data supplied by the lesson page.
    pub progress_data: serde_json::Value,
    pub completed: bool,
    /// Milliseconds since the Unix epoch.
    pub last_accessed_ms: u64,
}

/// Body of `POST /api/progress/{user_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub chapter_id: String,
    pub lesson_id: String,
    #[serde(default)]
    pub progress_data: serde_json::Value,
}

/// Storage for lesson progress.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// Insert or replace the record for (user, chapter, lesson), marking the
    /// lesson completed.
    async fn upsert_progress(
        &self,
        user_id: &str,
        update: ProgressUpdate,
    ) -> ServerResult<ProgressRecord>;

    /// All records of a user, most recently accessed first.
    async fn query_progress(&self, user_id: &str) -> ServerResult<Vec<ProgressRecord>>;
}

type ProgressKey = (String, String, String);

/// Process-local progress store.
#[derive(Default)]
pub struct InMemoryProgress {
    records: RwLock<FxHashMap<ProgressKey, (u64, ProgressRecord)>>,
    /// Tie-breaker for records written within the same millisecond.
    sequence: AtomicU64,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressBackend for InMemoryProgress {
    async fn upsert_progress(
        &self,
        user_id: &str,
        update: ProgressUpdate,
    ) -> ServerResult<ProgressRecord> {
        if user_id.trim().is_empty() {
            return Err(ServerError::Progress("user id must not be empty".to_string()));
        }
        if update.chapter_id.trim().is_empty() || update.lesson_id.trim().is_empty() {
            return Err(ServerError::Progress(
                "chapter_id and lesson_id are required".to_string(),
            ));
        }

        let record = ProgressRecord {
            user_id: user_id.to_string(),
            chapter_id: update.chapter_id,
            lesson_id: update.lesson_id,
            progress_data: update.progress_data,
            completed: true,
            last_accessed_ms: now_ms(),
        };
        let key = (
            record.user_id.clone(),
            record.chapter_id.clone(),
            record.lesson_id.clone(),
        );
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);

        self.records.write().await.insert(key, (seq, record.clone()));
        tracing::debug!(
            "Saved progress for {} ({}/{})",
            record.user_id,
            record.chapter_id,
            record.lesson_id
        );
        Ok(record)
    }

    async fn query_progress(&self, user_id: &str) -> ServerResult<Vec<ProgressRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .iter()
            .filter(|((user, _, _), _)| user == user_id)
            .map(|(_, entry)| entry.clone())
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.last_accessed_ms
                .cmp(&a.last_accessed_ms)
                .then(seq_b.cmp(seq_a))
        });
        Ok(matching.into_iter().map(|(_, record)| record).collect())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
