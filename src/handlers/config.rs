use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Current configuration. Gateway tokens are held back; everything else is
/// echoed as-is.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "channels": config.audio.channels,
                "bit_depth": config.audio.bit_depth,
                "speech_threshold_db": config.audio.speech_threshold_db,
                "pause_threshold_ms": config.audio.pause_threshold_ms,
                "min_speech_chunks": config.audio.min_speech_chunks
            },
            "sfu": {
                "base_url": config.sfu.base_url,
                "app_id": config.sfu.app_id
            },
            "ai": {
                "base_url": config.ai.base_url,
                "transcribe_model": config.ai.transcribe_model,
                "text_model": config.ai.text_model
            },
            "limits": {
                "assistant_context_entries": config.limits.assistant_context_entries
            }
        }
    })))
}

/// Apply a partial configuration update. Segmenter thresholds picked up here
/// apply to sessions started afterwards; running pipelines keep the settings
/// they were created with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "audio": {
                "sample_rate": current_config.audio.sample_rate,
                "channels": current_config.audio.channels,
                "bit_depth": current_config.audio.bit_depth,
                "speech_threshold_db": current_config.audio.speech_threshold_db,
                "pause_threshold_ms": current_config.audio.pause_threshold_ms,
                "min_speech_chunks": current_config.audio.min_speech_chunks
            },
            "limits": {
                "assistant_context_entries": current_config.limits.assistant_context_entries
            }
        }
    })))
}
