//! # Audio Processing
//!
//! PCM ingestion over WebSocket and energy-based speech segmentation.

pub mod ingest;
pub mod segmenter;

pub use segmenter::{SegmenterConfig, SpeechSegmenter};
