//! # Upload Pipeline
//!
//! Everything between "a multipart part arrived" and "here is your filename".
//!
//! ## Stages:
//! 1. **Validate** (`validator`): declared MIME type against the allow-list,
//!    before a single byte touches the disk
//! 2. **Store** (`crate::library`): stream the bytes to `<token>.<ext>`
//! 3. **Normalize** (`normalizer`): transcode to the canonical format when the
//!    declared type is not canonical, then clean up the original
//!
//! The external converter sits behind the `transcoder::Transcoder` trait.

pub mod normalizer;
pub mod transcoder;
pub mod validator;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::library::{MusicLibrary, StoredFile};
use actix_web::web::Bytes;
use futures_util::Stream;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

pub use normalizer::{NormalizeOutcome, Normalizer};
pub use transcoder::{FfmpegTranscoder, Transcoder};
pub use validator::IngestValidator;

/// The three stages wired to one music directory and one policy.
#[derive(Clone)]
pub struct UploadPipeline {
    validator: IngestValidator,
    library: MusicLibrary,
    normalizer: Normalizer,
    max_upload_bytes: u64,
}

impl UploadPipeline {
    pub fn new(config: &AppConfig, library: MusicLibrary, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            validator: IngestValidator::new(&config.media),
            normalizer: Normalizer::new(&config.media, library.clone(), transcoder),
            library,
            max_upload_bytes: config.storage.max_upload_bytes,
        }
    }

    /// Stages 1 and 2: reject unsupported types, otherwise store the bytes
    /// under a fresh unique name.
    pub async fn ingest<S, E>(
        &self,
        declared_type: &str,
        original_filename: Option<&str>,
        chunks: S,
    ) -> AppResult<StoredFile>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        self.validator.validate(declared_type)?;
        let name = self.validator.storage_name(original_filename, declared_type);
        self.library.store(&name, chunks, self.max_upload_bytes).await
    }

    /// Stage 3, run as its own task.
    ///
    /// The caller awaits the result, but if the caller goes away (client
    /// disconnect drops the request future) the transcode still runs to
    /// completion or failure.
    pub async fn normalize(&self, stored: StoredFile, declared_type: &str) -> AppResult<NormalizeOutcome> {
        let normalizer = self.normalizer.clone();
        let declared_type = declared_type.to_string();

        let task = async move { normalizer.normalize(stored, &declared_type).await };

        tokio::spawn(task.in_current_span())
            .await
            .map_err(|e| AppError::Internal(format!("normalize task failed: {}", e)))?
    }
}
