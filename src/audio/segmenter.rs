//! # Energy-Based Speech Segmenter
//!
//! Converts a stream of raw PCM chunks into discrete utterance boundaries.
//! Each room's capture stream gets its own segmenter; there is no cross-room
//! state.
//!
//! Per chunk: decode 16-bit little-endian samples, compute RMS energy
//! normalized to [-1, 1], convert to decibels, and classify as speech when
//! the value clears the configured threshold. Speech chunks accumulate; the
//! first non-speech chunk after a qualifying pause cuts the buffer into one
//! utterance, provided enough chunks were collected to rule out click/pop
//! noise.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::time::{Duration, Instant};

/// Segmentation thresholds. Defaults match typical close-mic speech at 16kHz.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Chunks louder than this (dBFS) are classified as speech.
    pub speech_threshold_db: f32,
    /// Silence gap that finalizes an utterance.
    pub pause_threshold: Duration,
    /// Minimum accumulated chunks before an utterance may be emitted.
    pub min_speech_chunks: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold_db: -40.0,
            pause_threshold: Duration::from_millis(500),
            min_speech_chunks: 3,
        }
    }
}

/// Per-room segmentation state.
pub struct SpeechSegmenter {
    config: SegmenterConfig,
    /// Speech-classified chunks accumulated since the utterance began.
    buffer: Vec<Vec<u8>>,
    last_speech: Option<Instant>,
    accumulating: bool,
}

impl SpeechSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            last_speech: None,
            accumulating: false,
        }
    }

    /// Feed one PCM chunk; returns a finalized utterance when a boundary is
    /// reached. The caller passes `now` so tests can drive time explicitly.
    ///
    /// Empty chunks are ignored. Non-speech chunks before any speech has been
    /// detected are no-ops. A short pause or an undersized buffer keeps
    /// accumulating rather than emitting.
    pub fn process_chunk(&mut self, data: &[u8], now: Instant) -> Option<Vec<u8>> {
        if data.is_empty() {
            return None;
        }

        if chunk_db(data) > self.config.speech_threshold_db {
            self.buffer.push(data.to_vec());
            self.last_speech = Some(now);
            self.accumulating = true;
            return None;
        }

        if !self.accumulating {
            return None;
        }

        let elapsed = now.duration_since(self.last_speech?);
        if elapsed >= self.config.pause_threshold
            && self.buffer.len() >= self.config.min_speech_chunks
        {
            let utterance: Vec<u8> = self.buffer.drain(..).flatten().collect();
            self.accumulating = false;
            self.last_speech = None;
            return Some(utterance);
        }

        None
    }

    /// Drop any partial accumulation (called when a transcription session
    /// starts so stale audio from before the session never leaks in).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_speech = None;
        self.accumulating = false;
    }

    /// Number of chunks currently held.
    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }
}

/// RMS energy of a 16-bit LE PCM chunk, in dBFS.
///
/// Samples are normalized to [-1, 1] before the RMS so the decibel scale is
/// absolute. A chunk with no decodable samples (or pure silence) returns
/// negative infinity, which compares below any threshold instead of
/// dividing by zero.
pub fn chunk_db(data: &[u8]) -> f32 {
    let mut cursor = Cursor::new(data);
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        let normalized = sample as f64 / 32768.0;
        sum_squares += normalized * normalized;
        count += 1;
    }

    if count == 0 {
        return f32::NEG_INFINITY;
    }

    let rms = (sum_squares / count as f64).sqrt();
    if rms <= 0.0 {
        return f32::NEG_INFINITY;
    }

    (20.0 * rms.log10()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a chunk of identical 16-bit samples.
    fn chunk_of(sample: i16, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len * 2);
        for _ in 0..len {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    fn loud() -> Vec<u8> {
        // ~ -10 dBFS, comfortably above the -40 dB default.
        chunk_of(10_000, 160)
    }

    fn quiet() -> Vec<u8> {
        chunk_of(0, 160)
    }

    #[test]
    fn test_zero_samples_guard() {
        // All-zero samples must classify as non-speech, not divide by zero.
        assert_eq!(chunk_db(&quiet()), f32::NEG_INFINITY);
        assert_eq!(chunk_db(&[]), f32::NEG_INFINITY);
    }

    #[test]
    fn test_db_scale() {
        // Full-scale square wave sits at 0 dBFS.
        let db = chunk_db(&chunk_of(i16::MIN, 64));
        assert!(db.abs() < 0.1, "full scale should be ~0 dBFS, got {db}");
        assert!(chunk_db(&chunk_of(10, 64)) < -60.0);
    }

    #[test]
    fn test_three_speech_chunks_then_long_pause_emits_once() {
        let mut seg = SpeechSegmenter::new(SegmenterConfig::default());
        let start = Instant::now();

        assert!(seg.process_chunk(&loud(), start).is_none());
        assert!(seg
            .process_chunk(&loud(), start + Duration::from_millis(20))
            .is_none());
        assert!(seg
            .process_chunk(&loud(), start + Duration::from_millis(40))
            .is_none());

        // Pause below threshold holds the buffer.
        assert!(seg
            .process_chunk(&quiet(), start + Duration::from_millis(200))
            .is_none());
        assert_eq!(seg.buffered_chunks(), 3);

        // Qualifying pause cuts exactly one utterance, chunks concatenated
        // in arrival order.
        let utterance = seg
            .process_chunk(&quiet(), start + Duration::from_millis(600))
            .expect("utterance should be emitted");
        let expected: Vec<u8> = [loud(), loud(), loud()].concat();
        assert_eq!(utterance, expected);
        assert_eq!(seg.buffered_chunks(), 0);

        // Further silence is a no-op once the buffer is cleared.
        assert!(seg
            .process_chunk(&quiet(), start + Duration::from_secs(2))
            .is_none());
    }

    #[test]
    fn test_two_speech_chunks_held_below_minimum() {
        let mut seg = SpeechSegmenter::new(SegmenterConfig::default());
        let start = Instant::now();

        seg.process_chunk(&loud(), start);
        seg.process_chunk(&loud(), start + Duration::from_millis(20));

        // Even a long pause must not emit with only two chunks buffered.
        assert!(seg
            .process_chunk(&quiet(), start + Duration::from_secs(1))
            .is_none());
        assert_eq!(seg.buffered_chunks(), 2);

        // More speech keeps growing the same utterance, and the next pause
        // flushes all of it.
        seg.process_chunk(&loud(), start + Duration::from_millis(1100));
        let utterance = seg
            .process_chunk(&quiet(), start + Duration::from_millis(1700))
            .expect("third chunk crossed the minimum");
        assert_eq!(utterance.len(), loud().len() * 3);
    }

    #[test]
    fn test_silence_before_any_speech_is_noop() {
        let mut seg = SpeechSegmenter::new(SegmenterConfig::default());
        let start = Instant::now();
        for i in 0..10 {
            assert!(seg
                .process_chunk(&quiet(), start + Duration::from_millis(i * 100))
                .is_none());
        }
        assert_eq!(seg.buffered_chunks(), 0);
    }

    #[test]
    fn test_empty_chunk_ignored() {
        let mut seg = SpeechSegmenter::new(SegmenterConfig::default());
        let start = Instant::now();
        seg.process_chunk(&loud(), start);
        seg.process_chunk(&loud(), start + Duration::from_millis(20));
        seg.process_chunk(&loud(), start + Duration::from_millis(40));
        // An empty frame must not count as the silence that cuts the buffer.
        assert!(seg
            .process_chunk(&[], start + Duration::from_secs(1))
            .is_none());
        assert_eq!(seg.buffered_chunks(), 3);
    }

    #[test]
    fn test_reset_drops_partial_buffer() {
        let mut seg = SpeechSegmenter::new(SegmenterConfig::default());
        let start = Instant::now();
        seg.process_chunk(&loud(), start);
        seg.reset();
        assert_eq!(seg.buffered_chunks(), 0);
        assert!(seg
            .process_chunk(&quiet(), start + Duration::from_secs(1))
            .is_none());
    }
}
