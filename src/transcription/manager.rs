//! # Transcription Session Manager
//!
//! Owns the start/stop lifecycle of one recording session per room, the
//! per-room speech segmenters, and the glue between finalized utterances,
//! the AI gateway, and the persistence gateway.
//!
//! State machine per room: Inactive -> Active -> Inactive. Re-activation
//! creates a fresh session record; a session row is immutable once ended
//! except for summary attachment.
//!
//! Locking discipline: the room map sits behind a std Mutex that is only
//! held for synchronous segmenter/state mutation and is always released
//! before a gateway await. After every await the room state is re-checked
//! before any further mutation, because other handlers may have run in the
//! meantime.

use crate::audio::segmenter::{SegmenterConfig, SpeechSegmenter};
use crate::config::AudioConfig;
use crate::storage::TranscriptStore;
use crate::transcription::gateway::AiGateway;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Participant count recorded when a session is force-ended because its room
/// emptied; the true departing count is not tracked at disconnect time.
const ROOM_EMPTY_PARTICIPANT_SENTINEL: u32 = 1;

/// Separator used when concatenating transcript entries for summarization.
const TRANSCRIPT_SEPARATOR: &str = "\n";

struct RoomPipeline {
    active: bool,
    session_id: Option<String>,
    segmenter: SpeechSegmenter,
}

/// Result of stopping a session.
#[derive(Debug)]
pub struct StopOutcome {
    pub session_id: String,
    /// Present only when the session had transcript entries and the
    /// summarization gateway succeeded.
    pub summary: Option<String>,
}

pub struct TranscriptionManager {
    rooms: Mutex<HashMap<String, RoomPipeline>>,
    ai: Arc<dyn AiGateway>,
    store: Arc<dyn TranscriptStore>,
    sample_rate: u32,
    channels: u8,
    segmenter_config: SegmenterConfig,
}

impl TranscriptionManager {
    pub fn new(audio: &AudioConfig, ai: Arc<dyn AiGateway>, store: Arc<dyn TranscriptStore>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            ai,
            store,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            segmenter_config: SegmenterConfig {
                speech_threshold_db: audio.speech_threshold_db,
                pause_threshold: Duration::from_millis(audio.pause_threshold_ms),
                min_speech_chunks: audio.min_speech_chunks,
            },
        }
    }

    /// Whether a recording session is currently active for the room.
    pub fn is_active(&self, room_id: &str) -> bool {
        let rooms = self.rooms.lock().unwrap();
        rooms.get(room_id).map_or(false, |p| p.active)
    }

    /// Number of rooms with an active session (health gauge).
    pub fn active_count(&self) -> usize {
        let rooms = self.rooms.lock().unwrap();
        rooms.values().filter(|p| p.active).count()
    }

    /// Start a recording session for a room.
    ///
    /// Returns the new session id, or None when a session is already active
    /// (the "not started" no-op result; a room has at most one active
    /// session). The room's segmenter is reset so audio accumulated before
    /// the session never leaks into it.
    pub async fn start(&self, room_id: &str) -> Option<String> {
        {
            let rooms = self.rooms.lock().unwrap();
            if rooms.get(room_id).map_or(false, |p| p.active) {
                debug!(room = room_id, "Transcription already active, not starting");
                return None;
            }
        }

        let session_id = match self.store.create_session(room_id).await {
            Ok(id) => id,
            Err(err) => {
                warn!(room = room_id, error = %err, "Failed to create recording session");
                return None;
            }
        };

        {
            let mut rooms = self.rooms.lock().unwrap();
            let pipeline = rooms
                .entry(room_id.to_string())
                .or_insert_with(|| RoomPipeline {
                    active: false,
                    session_id: None,
                    segmenter: SpeechSegmenter::new(self.segmenter_config.clone()),
                });
            if pipeline.active {
                // A concurrent start won while we were creating the row.
                drop(rooms);
                warn!(room = room_id, "Start raced a concurrent start, discarding session");
                if let Err(err) = self.store.end_session(&session_id, 0).await {
                    warn!(session = %session_id, error = %err, "Failed to discard raced session");
                }
                return None;
            }
            pipeline.active = true;
            pipeline.session_id = Some(session_id.clone());
            pipeline.segmenter.reset();
        }

        info!(room = room_id, session = %session_id, "Transcription started");
        Some(session_id)
    }

    /// Feed one audio chunk to the room's segmenter.
    ///
    /// This is the synchronous half of audio processing: segmenter state is
    /// mutated before any suspension point, which is what serializes audio
    /// handling per room. Returns a finalized utterance at a boundary.
    /// Chunks for rooms without an active session are dropped.
    pub fn feed_chunk(&self, room_id: &str, chunk: &[u8], now: Instant) -> Option<Vec<u8>> {
        let mut rooms = self.rooms.lock().unwrap();
        let pipeline = rooms.get_mut(room_id)?;
        if !pipeline.active {
            return None;
        }
        pipeline.segmenter.process_chunk(chunk, now)
    }

    /// Transcribe a finalized utterance and persist the resulting entry.
    ///
    /// Empty or whitespace-only transcripts are discarded without
    /// persistence or broadcast. Gateway failures are logged and degrade to
    /// "no output"; they never propagate. Returns the text for broadcast.
    pub async fn on_utterance_finalized(&self, room_id: &str, audio: Vec<u8>) -> Option<String> {
        let session_id = {
            let rooms = self.rooms.lock().unwrap();
            let pipeline = rooms.get(room_id)?;
            if !pipeline.active {
                return None;
            }
            pipeline.session_id.clone()?
        };

        let text = match self
            .ai
            .transcribe(&audio, self.sample_rate, self.channels)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(room = room_id, error = %err, "Transcription request failed");
                return None;
            }
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            debug!(room = room_id, "Utterance transcribed to silence, discarding");
            return None;
        }

        // The session may have been stopped while the gateway call was in
        // flight; re-check before persisting.
        {
            let rooms = self.rooms.lock().unwrap();
            let still_current = rooms
                .get(room_id)
                .map_or(false, |p| p.active && p.session_id.as_deref() == Some(&session_id));
            if !still_current {
                debug!(room = room_id, "Session ended mid-transcription, dropping text");
                return None;
            }
        }

        if let Err(err) = self.store.append_entry(&session_id, &text).await {
            warn!(session = %session_id, error = %err, "Failed to persist transcript entry");
            return None;
        }

        Some(text)
    }

    /// Convenience path used by the audio ingestion endpoint and tests:
    /// feed a chunk and, if it finalizes an utterance, run transcription.
    pub async fn process_audio(
        &self,
        room_id: &str,
        chunk: &[u8],
        now: Instant,
    ) -> Option<String> {
        let utterance = self.feed_chunk(room_id, chunk, now)?;
        self.on_utterance_finalized(room_id, utterance).await
    }

    /// Stop the room's session and generate a summary.
    ///
    /// No-op (None) when no session is active. The room transitions to
    /// Inactive synchronously before any gateway call, so a stop is never
    /// observed half-done. The session row is finalized even if the
    /// summarization that follows fails; zero transcript entries skip
    /// summarization entirely.
    pub async fn stop(&self, room_id: &str, participant_count: u32) -> Option<StopOutcome> {
        let session_id = {
            let mut rooms = self.rooms.lock().unwrap();
            let pipeline = rooms.get_mut(room_id)?;
            if !pipeline.active {
                return None;
            }
            pipeline.active = false;
            pipeline.segmenter.reset();
            pipeline.session_id.take()?
        };

        if let Err(err) = self.store.end_session(&session_id, participant_count).await {
            warn!(session = %session_id, error = %err, "Failed to finalize session row");
        }
        info!(room = room_id, session = %session_id, "Transcription stopped");

        let entries = match self.store.entries_for_session(&session_id).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(session = %session_id, error = %err, "Failed to fetch transcript for summary");
                return Some(StopOutcome {
                    session_id,
                    summary: None,
                });
            }
        };

        if entries.is_empty() {
            return Some(StopOutcome {
                session_id,
                summary: None,
            });
        }

        let transcript = entries
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join(TRANSCRIPT_SEPARATOR);

        let summary = match self.ai.summarize(&transcript).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary),
            Ok(_) => None,
            Err(err) => {
                warn!(session = %session_id, error = %err, "Summarization failed");
                None
            }
        };

        if let Some(ref summary) = summary {
            if let Err(err) = self.store.attach_summary(&session_id, summary).await {
                warn!(session = %session_id, error = %err, "Failed to persist summary");
            }
        }

        Some(StopOutcome {
            session_id,
            summary,
        })
    }

    /// Room-empty handler: force-end any active session so none is ever
    /// abandoned. Uses the fixed participant sentinel since the exact
    /// departing count is not tracked.
    pub async fn on_room_empty(&self, room_id: &str) -> Option<StopOutcome> {
        if !self.is_active(room_id) {
            return None;
        }
        info!(room = room_id, "Room emptied with active session, forcing stop");
        self.stop(room_id, ROOM_EMPTY_PARTICIPANT_SENTINEL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::{MemoryStore, SessionRecord, TranscriptEntry};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// AI gateway mock with switchable failure modes.
    #[derive(Default)]
    struct MockAi {
        transcribe_reply: Mutex<String>,
        fail_transcribe: AtomicBool,
        fail_summarize: AtomicBool,
        summarize_calls: AtomicUsize,
        last_summarize_input: Mutex<Option<String>>,
    }

    impl MockAi {
        fn replying(text: &str) -> Self {
            let mock = Self::default();
            *mock.transcribe_reply.lock().unwrap() = text.to_string();
            mock
        }
    }

    #[async_trait]
    impl AiGateway for MockAi {
        async fn transcribe(&self, _audio: &[u8], _rate: u32, _channels: u8) -> Result<String> {
            if self.fail_transcribe.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("gateway down"));
            }
            Ok(self.transcribe_reply.lock().unwrap().clone())
        }

        async fn summarize(&self, transcript: &str) -> Result<String> {
            self.summarize_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_summarize_input.lock().unwrap() = Some(transcript.to_string());
            if self.fail_summarize.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("gateway down"));
            }
            Ok("the summary".to_string())
        }

        async fn answer_query(&self, _sys: &str, _q: &str, _ctx: &str) -> Result<String> {
            Ok("the answer".to_string())
        }
    }

    /// Store wrapper counting session creations.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        create_calls: AtomicUsize,
    }

    #[async_trait]
    impl TranscriptStore for CountingStore {
        async fn create_session(&self, room_id: &str) -> Result<String> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.create_session(room_id).await
        }
        async fn end_session(&self, session_id: &str, participant_count: u32) -> Result<()> {
            self.inner.end_session(session_id, participant_count).await
        }
        async fn append_entry(&self, session_id: &str, text: &str) -> Result<()> {
            self.inner.append_entry(session_id, text).await
        }
        async fn entries_for_session(&self, session_id: &str) -> Result<Vec<TranscriptEntry>> {
            self.inner.entries_for_session(session_id).await
        }
        async fn entries_for_room(
            &self,
            room_id: &str,
            since: Option<DateTime<Utc>>,
            until: Option<DateTime<Utc>>,
        ) -> Result<Vec<TranscriptEntry>> {
            self.inner.entries_for_room(room_id, since, until).await
        }
        async fn attach_summary(&self, session_id: &str, summary: &str) -> Result<()> {
            self.inner.attach_summary(session_id, summary).await
        }
        async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
            self.inner.get_session(session_id).await
        }
    }

    fn manager_with(ai: Arc<MockAi>, store: Arc<CountingStore>) -> TranscriptionManager {
        TranscriptionManager::new(&AppConfig::default().audio, ai, store)
    }

    fn loud_chunk() -> Vec<u8> {
        let mut out = Vec::new();
        for _ in 0..160 {
            out.extend_from_slice(&10_000i16.to_le_bytes());
        }
        out
    }

    fn quiet_chunk() -> Vec<u8> {
        vec![0u8; 320]
    }

    #[tokio::test]
    async fn test_double_start_creates_one_session() {
        let ai = Arc::new(MockAi::replying("hi"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, Arc::clone(&store));

        let first = manager.start("demo").await;
        assert!(first.is_some());
        assert!(manager.is_active("demo"));

        let second = manager.start("demo").await;
        assert!(second.is_none(), "start while active must be a no-op");
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_utterance_is_transcribed_and_persisted() {
        let ai = Arc::new(MockAi::replying("hello world"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(Arc::clone(&ai), Arc::clone(&store));

        let session_id = manager.start("demo").await.unwrap();
        let text = manager
            .on_utterance_finalized("demo", loud_chunk())
            .await
            .expect("non-empty transcript should be returned");
        assert_eq!(text, "hello world");

        let entries = store.entries_for_session(&session_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "hello world");
    }

    #[tokio::test]
    async fn test_whitespace_transcript_discarded() {
        let ai = Arc::new(MockAi::replying("   \n"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, Arc::clone(&store));

        let session_id = manager.start("demo").await.unwrap();
        assert!(manager
            .on_utterance_finalized("demo", loud_chunk())
            .await
            .is_none());
        assert!(store
            .entries_for_session(&session_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_transcribe_failure_degrades_to_no_output() {
        let ai = Arc::new(MockAi::replying("x"));
        ai.fail_transcribe.store(true, Ordering::SeqCst);
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, Arc::clone(&store));

        manager.start("demo").await.unwrap();
        assert!(manager
            .on_utterance_finalized("demo", loud_chunk())
            .await
            .is_none());
        // The session stays active; one failed request is not fatal.
        assert!(manager.is_active("demo"));
    }

    #[tokio::test]
    async fn test_utterances_ignored_while_inactive() {
        let ai = Arc::new(MockAi::replying("hi"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, store);

        assert!(manager
            .on_utterance_finalized("demo", loud_chunk())
            .await
            .is_none());
        assert!(manager
            .feed_chunk("demo", &loud_chunk(), Instant::now())
            .is_none());
    }

    #[tokio::test]
    async fn test_stop_with_zero_entries_skips_summarization() {
        let ai = Arc::new(MockAi::replying("hi"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(Arc::clone(&ai), Arc::clone(&store));

        manager.start("demo").await.unwrap();
        let outcome = manager.stop("demo", 2).await.unwrap();
        assert!(outcome.summary.is_none());
        assert_eq!(ai.summarize_calls.load(Ordering::SeqCst), 0);

        let session = store.get_session(&outcome.session_id).await.unwrap().unwrap();
        assert!(session.is_ended());
        assert_eq!(session.participant_count, Some(2));
    }

    #[tokio::test]
    async fn test_stop_summarizes_entries_in_order() {
        let ai = Arc::new(MockAi::replying("first line"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(Arc::clone(&ai), Arc::clone(&store));

        let session_id = manager.start("demo").await.unwrap();
        manager.on_utterance_finalized("demo", loud_chunk()).await;
        *ai.transcribe_reply.lock().unwrap() = "second line".to_string();
        manager.on_utterance_finalized("demo", loud_chunk()).await;

        let outcome = manager.stop("demo", 3).await.unwrap();
        assert_eq!(outcome.session_id, session_id);
        assert_eq!(outcome.summary.as_deref(), Some("the summary"));

        let input = ai.last_summarize_input.lock().unwrap().clone().unwrap();
        assert_eq!(input, "first line\nsecond line");

        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.summary.as_deref(), Some("the summary"));
    }

    #[tokio::test]
    async fn test_stop_when_inactive_is_noop() {
        let ai = Arc::new(MockAi::replying("hi"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, store);
        assert!(manager.stop("demo", 1).await.is_none());
    }

    #[tokio::test]
    async fn test_summarize_failure_still_finalizes_session() {
        let ai = Arc::new(MockAi::replying("something"));
        ai.fail_summarize.store(true, Ordering::SeqCst);
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, Arc::clone(&store));

        manager.start("demo").await.unwrap();
        manager.on_utterance_finalized("demo", loud_chunk()).await;

        let outcome = manager.stop("demo", 2).await.unwrap();
        assert!(outcome.summary.is_none());
        let session = store.get_session(&outcome.session_id).await.unwrap().unwrap();
        assert!(session.is_ended());
        assert!(!manager.is_active("demo"));
    }

    #[tokio::test]
    async fn test_room_empty_forces_stop_with_sentinel() {
        let ai = Arc::new(MockAi::replying("hi"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, Arc::clone(&store));

        manager.start("demo").await.unwrap();
        let outcome = manager.on_room_empty("demo").await.unwrap();
        let session = store.get_session(&outcome.session_id).await.unwrap().unwrap();
        assert_eq!(session.participant_count, Some(1));
        assert!(!manager.is_active("demo"));

        // Idempotent when nothing is active.
        assert!(manager.on_room_empty("demo").await.is_none());
    }

    #[tokio::test]
    async fn test_full_audio_pipeline_emits_on_pause() {
        let ai = Arc::new(MockAi::replying("spoken words"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, Arc::clone(&store));

        let session_id = manager.start("demo").await.unwrap();
        let start = Instant::now();

        for i in 0..3 {
            assert!(manager
                .process_audio("demo", &loud_chunk(), start + Duration::from_millis(i * 20))
                .await
                .is_none());
        }
        let text = manager
            .process_audio("demo", &quiet_chunk(), start + Duration::from_millis(700))
            .await
            .expect("pause should finalize and transcribe the utterance");
        assert_eq!(text, "spoken words");

        let entries = store.entries_for_session(&session_id).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_creates_new_session() {
        let ai = Arc::new(MockAi::replying("hi"));
        let store = Arc::new(CountingStore::default());
        let manager = manager_with(ai, Arc::clone(&store));

        let first = manager.start("demo").await.unwrap();
        manager.stop("demo", 1).await.unwrap();
        let second = manager.start("demo").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 2);
    }
}
