//! # Upload Handler
//!
//! ## Endpoint: `POST /upload`
//!
//! Multipart form data with one file part named `file`. The part's
//! `Content-Type` is the declared type the pipeline validates.
//!
//! ## Responses:
//! ```json
//! 200 { "message": "File uploaded and converted to MP3 successfully", "filename": "1718000000000-3f2a9c1e.mp3" }
//! 400 { "message": "No file uploaded" }
//! 400 { "message": "Unsupported file type! Supported formats: MP3, WAV, FLAC, AAC, OGG." }
//! 413 { "message": "File exceeds the upload limit of 104857600 bytes" }
//! 500 { "message": "Error during file conversion", "error": "ffmpeg exited with ..." }
//! ```
//! `filename` is always the final stored name, after any transcode.

use crate::error::AppError;
use crate::pipeline::NormalizeOutcome;
use crate::state::{AppState, PipelineEvent};
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

/// Name of the multipart part carrying the audio file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
}

pub async fn upload_file(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let mut upload = None;

    while let Some(item) = payload.next().await {
        let field = item?;

        let is_file_part = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .is_some_and(|name| name == FILE_FIELD);
        if !is_file_part {
            drain(field).await?;
            continue;
        }

        let declared_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_default();
        let original_filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let stored = match state
            .pipeline
            .ingest(&declared_type, original_filename.as_deref(), field)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                if matches!(e, AppError::UnsupportedMediaType(_)) {
                    warn!(declared_type = %declared_type, "Rejected upload");
                    state.record_pipeline_event(PipelineEvent::UploadRejected);
                }
                return Err(e);
            }
        };

        info!(
            file = %stored.name,
            original = original_filename.as_deref().unwrap_or("<none>"),
            declared_type = %declared_type,
            bytes = stored.size,
            "Upload stored"
        );
        state.record_pipeline_event(PipelineEvent::UploadAccepted);
        upload = Some((stored, declared_type));
        // One file per request; whatever follows is ignored.
        break;
    }

    let (stored, declared_type) = upload.ok_or(AppError::MissingUpload)?;

    let outcome = match state.pipeline.normalize(stored, &declared_type).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(e, AppError::Transcode(_)) {
                state.record_pipeline_event(PipelineEvent::TranscodeFailed);
            }
            return Err(e);
        }
    };

    let message = match &outcome {
        NormalizeOutcome::AlreadyCanonical(_) => "File uploaded successfully".to_string(),
        NormalizeOutcome::Transcoded(_) => {
            state.record_pipeline_event(PipelineEvent::TranscodeSucceeded);
            format!(
                "File uploaded and converted to {} successfully",
                state.config.media.canonical_extension.to_ascii_uppercase()
            )
        }
    };
    let response = UploadResponse {
        message,
        filename: outcome.file().name.clone(),
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Read and discard a part we don't care about.
async fn drain(mut field: Field) -> Result<(), AppError> {
    while let Some(chunk) = field.next().await {
        chunk?;
    }
    Ok(())
}
