//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_AI_APITOKEN, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// Configuration is broken into logical groups: the HTTP server itself,
/// audio/segmentation parameters, the two external gateways (SFU and
/// generative AI), and presentation-layer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub sfu: SfuConfig,
    pub ai: AiConfig,
    pub limits: LimitsConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio format and speech-segmentation settings.
///
/// The ingestion endpoint expects raw PCM matching `sample_rate`,
/// `channels` and `bit_depth`. The remaining fields tune the energy-based
/// segmenter: a chunk counts as speech when its RMS energy in decibels
/// exceeds `speech_threshold_db`, and an utterance is cut after
/// `pause_threshold_ms` of silence, provided at least `min_speech_chunks`
/// chunks were accumulated (shorter bursts are treated as click/pop noise).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub speech_threshold_db: f32,
    pub pause_threshold_ms: u64,
    pub min_speech_chunks: usize,
}

/// External SFU (session negotiation) gateway settings.
///
/// All session/track negotiation is delegated to this service over HTTP
/// with bearer-token auth. This backend only proxies the calls so the
/// token never reaches browsers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfuConfig {
    pub base_url: String,
    pub app_id: String,
    pub app_token: String,
}

/// Generative AI gateway settings (speech-to-text, summaries, queries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub base_url: String,
    pub api_token: String,
    /// Model path used for audio transcription requests.
    pub transcribe_model: String,
    /// Model path used for summarization and query answering.
    pub text_model: String,
}

/// Presentation-layer caps. Persisted history is unbounded; only what we
/// hand to the assistant as context is windowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub assistant_context_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: 16_000, // 16kHz mono PCM from browser capture
                channels: 1,
                bit_depth: 16,
                speech_threshold_db: -40.0,
                pause_threshold_ms: 500,
                min_speech_chunks: 3,
            },
            sfu: SfuConfig {
                base_url: "https://rtc.example.com/v1".to_string(),
                app_id: String::new(),
                app_token: String::new(),
            },
            ai: AiConfig {
                base_url: "https://ai.example.com/v1".to_string(),
                api_token: String::new(),
                transcribe_model: "audio/transcriptions".to_string(),
                text_model: "chat/completions".to_string(),
            },
            limits: LimitsConfig {
                assistant_context_entries: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, then config.toml, then APP_-prefixed
    /// environment variables. `HOST` and `PORT` are honored as special cases
    /// for deployment platforms that set them without the prefix.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching bad values here produces a clear startup error instead of a
    /// confusing runtime failure (e.g. a zero sample rate dividing time
    /// calculations, or a segmenter that can never emit).
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate cannot be 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count cannot be 0"));
        }

        if self.audio.min_speech_chunks == 0 {
            return Err(anyhow::anyhow!(
                "min_speech_chunks must be at least 1, or every pause would emit an empty utterance"
            ));
        }

        if self.limits.assistant_context_entries == 0 {
            return Err(anyhow::anyhow!(
                "assistant_context_entries must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON document (runtime config endpoint).
    ///
    /// Only the fields present in the JSON are touched, so a client can send
    /// just `{"audio": {"speech_threshold_db": -35.0}}`. The updated config
    /// is re-validated before being accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(threshold) = audio.get("speech_threshold_db").and_then(|v| v.as_f64()) {
                self.audio.speech_threshold_db = threshold as f32;
            }
            if let Some(pause) = audio.get("pause_threshold_ms").and_then(|v| v.as_u64()) {
                self.audio.pause_threshold_ms = pause;
            }
            if let Some(min) = audio.get("min_speech_chunks").and_then(|v| v.as_u64()) {
                self.audio.min_speech_chunks = min as usize;
            }
        }

        if let Some(ai) = partial.get("ai") {
            if let Some(model) = ai.get("transcribe_model").and_then(|v| v.as_str()) {
                self.ai.transcribe_model = model.to_string();
            }
            if let Some(model) = ai.get("text_model").and_then(|v| v.as_str()) {
                self.ai.text_model = model.to_string();
            }
        }

        if let Some(limits) = partial.get("limits") {
            if let Some(n) = limits
                .get("assistant_context_entries")
                .and_then(|v| v.as_u64())
            {
                self.limits.assistant_context_entries = n as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
