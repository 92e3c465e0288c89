//! # Generative AI Gateway
//!
//! HTTP façade over the external speech-to-text / LLM service. The rest of
//! the crate talks to the [`AiGateway`] trait; this module owns the request
//! shapes, bearer auth, and the defensive response parsing.
//!
//! The upstream response shape is not stable: at least three variants have
//! been observed in the wild (`{"text": ..}`, `{"response": ..}`,
//! `{"result": {"response": ..}}`, plus the chat-completions nesting).
//! [`extract_text`] probes an ordered list of extraction strategies and the
//! first hit wins. This is a compatibility shim, isolated here so the core
//! pipeline never sees raw response variance.

use crate::config::AiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Speech-to-text, summarization and query answering, as one seam.
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Transcribe raw PCM audio. Empty text is a valid result (silence).
    async fn transcribe(&self, audio: &[u8], sample_rate: u32, channels: u8) -> Result<String>;

    /// Summarize a full meeting transcript.
    async fn summarize(&self, transcript: &str) -> Result<String>;

    /// Answer a user query grounded in transcript context.
    async fn answer_query(
        &self,
        system_prompt: &str,
        user_query: &str,
        context: &str,
    ) -> Result<String>;
}

/// Production gateway over reqwest.
pub struct HttpAiGateway {
    client: Client,
    base_url: String,
    api_token: String,
    transcribe_model: String,
    text_model: String,
}

impl HttpAiGateway {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            transcribe_model: config.transcribe_model.clone(),
            text_model: config.text_model.clone(),
        }
    }

    async fn post_for_text(&self, model: &str, body: Value) -> Result<String> {
        let url = format!("{}/{}", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(&body)
            .send()
            .await
            .context("Failed to reach AI gateway")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("AI gateway returned {}: {}", status, detail));
        }

        let value: Value = response
            .json()
            .await
            .context("AI gateway returned non-JSON body")?;
        extract_text(&value)
            .ok_or_else(|| anyhow::anyhow!("No recognizable text field in AI response"))
    }
}

#[async_trait]
impl AiGateway for HttpAiGateway {
    async fn transcribe(&self, audio: &[u8], sample_rate: u32, channels: u8) -> Result<String> {
        let url = format!("{}/{}", self.base_url, self.transcribe_model);
        let wav = wrap_wav(audio, sample_rate, channels as u16);
        debug!(bytes = wav.len(), "Sending utterance to AI gateway");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/octet-stream")
            .body(wav)
            .send()
            .await
            .context("Failed to reach AI gateway")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("AI gateway returned {}: {}", status, detail));
        }

        let value: Value = response
            .json()
            .await
            .context("AI gateway returned non-JSON body")?;
        extract_text(&value)
            .ok_or_else(|| anyhow::anyhow!("No recognizable text field in AI response"))
    }

    async fn summarize(&self, transcript: &str) -> Result<String> {
        let body = json!({
            "messages": [
                {
                    "role": "system",
                    "content": "You summarize meeting transcripts. Produce a concise \
                                summary of the key points and decisions."
                },
                { "role": "user", "content": transcript }
            ]
        });
        self.post_for_text(&self.text_model, body).await
    }

    async fn answer_query(
        &self,
        system_prompt: &str,
        user_query: &str,
        context: &str,
    ) -> Result<String> {
        let body = json!({
            "messages": [
                { "role": "system", "content": system_prompt },
                {
                    "role": "user",
                    "content": format!("Transcript so far:\n{}\n\nQuestion: {}", context, user_query)
                }
            ]
        });
        self.post_for_text(&self.text_model, body).await
    }
}

/// Ordered extraction strategies for the known response shapes. Each returns
/// the text field if its shape matches; the first success wins.
pub fn extract_text(value: &Value) -> Option<String> {
    let strategies: [fn(&Value) -> Option<&str>; 5] = [
        |v| v.get("text")?.as_str(),
        |v| v.get("response")?.as_str(),
        |v| v.get("result")?.get("response")?.as_str(),
        |v| v.get("result")?.get("text")?.as_str(),
        |v| {
            v.get("choices")?
                .get(0)?
                .get("message")?
                .get("content")?
                .as_str()
        },
    ];

    strategies
        .iter()
        .find_map(|extract| extract(value))
        .map(|s| s.to_string())
}

/// Wrap raw PCM in a minimal RIFF/WAVE header so the upstream service can
/// read the sample rate and channel count from the payload itself.
pub fn wrap_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = sample_rate * 2 * channels as u32;
    let mut out = Vec::with_capacity(44 + pcm.len());

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(2 * channels).to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}
