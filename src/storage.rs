//! # Persistence Gateway
//!
//! Durable store for recording sessions, transcript entries and summaries,
//! abstracted behind the [`TranscriptStore`] trait so the session manager
//! never depends on a concrete backend. The shipped implementation is the
//! in-memory [`MemoryStore`]; an external database would implement the same
//! trait.
//!
//! Ordering key: entries carry a creation timestamp plus a process-local
//! monotonic sequence number, so same-millisecond appends still come back in
//! insertion order.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// One transcription run for a room, start to stop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub room_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub participant_count: Option<u32>,
    pub summary: Option<String>,
}

impl SessionRecord {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Append-only transcript line belonging to exactly one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub session_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Monotonic tie-breaker for entries created in the same millisecond.
    #[serde(skip)]
    pub seq: u64,
}

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Create a session row for a room and return its durable id.
    async fn create_session(&self, room_id: &str) -> Result<String>;

    /// Mark a session ended with the participant-count snapshot. Ending an
    /// already-ended or unknown session is an error; the session manager
    /// guarantees it only ends sessions it started.
    async fn end_session(&self, session_id: &str, participant_count: u32) -> Result<()>;

    /// Append a transcript entry. Rejected once the session has ended.
    async fn append_entry(&self, session_id: &str, text: &str) -> Result<()>;

    /// All entries of a session in chronological (ascending) order.
    async fn entries_for_session(&self, session_id: &str) -> Result<Vec<TranscriptEntry>>;

    /// Entries across all of a room's sessions, optionally bounded by a time
    /// range, in chronological order.
    async fn entries_for_room(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<TranscriptEntry>>;

    /// Attach a generated summary. The only mutation allowed after end.
    async fn attach_summary(&self, session_id: &str, summary: &str) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, SessionRecord>,
    /// Entries per session, kept in append order.
    entries: HashMap<String, Vec<TranscriptEntry>>,
    seq: u64,
}

/// In-memory store. Lock sections are short and never span an await, so a
/// std RwLock is sufficient even under the async trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptStore for MemoryStore {
    async fn create_session(&self, room_id: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.write().unwrap();
        inner.sessions.insert(
            id.clone(),
            SessionRecord {
                id: id.clone(),
                room_id: room_id.to_string(),
                started_at: Utc::now(),
                ended_at: None,
                participant_count: None,
                summary: None,
            },
        );
        inner.entries.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn end_session(&self, session_id: &str, participant_count: u32) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session {session_id}"))?;
        if session.is_ended() {
            return Err(anyhow::anyhow!("session {session_id} already ended"));
        }
        session.ended_at = Some(Utc::now());
        session.participant_count = Some(participant_count);
        Ok(())
    }

    async fn append_entry(&self, session_id: &str, text: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let ended = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session {session_id}"))?
            .is_ended();
        if ended {
            return Err(anyhow::anyhow!(
                "session {session_id} is ended; transcript is immutable"
            ));
        }
        inner.seq += 1;
        let seq = inner.seq;
        inner
            .entries
            .get_mut(session_id)
            .expect("entries vec created with session")
            .push(TranscriptEntry {
                session_id: session_id.to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
                seq,
            });
        Ok(())
    }

    async fn entries_for_session(&self, session_id: &str) -> Result<Vec<TranscriptEntry>> {
        let inner = self.inner.read().unwrap();
        // Append order and (created_at, seq) order coincide within a session.
        Ok(inner.entries.get(session_id).cloned().unwrap_or_default())
    }

    async fn entries_for_room(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<TranscriptEntry>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<TranscriptEntry> = inner
            .sessions
            .values()
            .filter(|s| s.room_id == room_id)
            .filter_map(|s| inner.entries.get(&s.id))
            .flatten()
            .filter(|e| since.map_or(true, |t| e.created_at >= t))
            .filter(|e| until.map_or(true, |t| e.created_at <= t))
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.created_at, e.seq));
        Ok(out)
    }

    async fn attach_summary(&self, session_id: &str, summary: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session {session_id}"))?;
        session.summary = Some(summary.to_string());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.sessions.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_come_back_in_append_order() {
        let store = MemoryStore::new();
        let id = store.create_session("demo").await.unwrap();

        // Appends land within the same millisecond; the sequence number must
        // keep them ordered anyway.
        for i in 0..20 {
            store.append_entry(&id, &format!("line {i}")).await.unwrap();
        }

        let entries = store.entries_for_session(&id).await.unwrap();
        assert_eq!(entries.len(), 20);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.text, format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = MemoryStore::new();
        let id = store.create_session("demo").await.unwrap();

        let session = store.get_session(&id).await.unwrap().unwrap();
        assert!(!session.is_ended());

        store.end_session(&id, 3).await.unwrap();
        let session = store.get_session(&id).await.unwrap().unwrap();
        assert!(session.is_ended());
        assert_eq!(session.participant_count, Some(3));

        // Ended sessions are immutable except for the summary.
        assert!(store.append_entry(&id, "late").await.is_err());
        assert!(store.end_session(&id, 5).await.is_err());
        store.attach_summary(&id, "short meeting").await.unwrap();
        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.summary.as_deref(), Some("short meeting"));
    }

    #[tokio::test]
    async fn test_room_query_spans_sessions() {
        let store = MemoryStore::new();
        let first = store.create_session("demo").await.unwrap();
        store.append_entry(&first, "one").await.unwrap();
        store.end_session(&first, 2).await.unwrap();

        let second = store.create_session("demo").await.unwrap();
        store.append_entry(&second, "two").await.unwrap();

        let other = store.create_session("elsewhere").await.unwrap();
        store.append_entry(&other, "noise").await.unwrap();

        let entries = store.entries_for_room("demo", None, None).await.unwrap();
        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);

        let future = Utc::now() + chrono::Duration::hours(1);
        let entries = store
            .entries_for_room("demo", Some(future), None)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let store = MemoryStore::new();
        assert!(store.append_entry("missing", "x").await.is_err());
        assert!(store.end_session("missing", 1).await.is_err());
        assert!(store.get_session("missing").await.unwrap().is_none());
        assert!(store
            .entries_for_session("missing")
            .await
            .unwrap()
            .is_empty());
    }
}
