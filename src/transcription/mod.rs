//! # Transcription Pipeline
//!
//! Turn-taking transcription for rooms: the session manager owns the
//! per-room lifecycle and segmenters, the gateway module owns the HTTP
//! façade over the external speech-to-text / LLM service.

pub mod gateway;
pub mod manager;

pub use gateway::{AiGateway, HttpAiGateway};
pub use manager::TranscriptionManager;
