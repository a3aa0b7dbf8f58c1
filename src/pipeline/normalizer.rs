//! # Normalizer
//!
//! Brings a freshly stored upload into the canonical format.
//!
//! ## State machine:
//! ```text
//!   stored ──declared == canonical──────────────────────────▶ Done(original)
//!     │
//!     └──otherwise──▶ transcode to <stem>.<ext>.part
//!                        ├─ ok  ─▶ rename into place ─▶ delete original ─▶ Done(canonical)
//!                        └─ err ─▶ drop .part, keep original ─────────────▶ Failed(message)
//! ```
//! Only the two terminal states are ever visible in the music directory:
//! the transcoder writes to a `.part` file that readers never see, and the
//! original is deleted only after the converted file has been renamed into
//! place.

use crate::config::MediaConfig;
use crate::error::{AppError, AppResult};
use crate::library::{MusicLibrary, StoredFile};
use crate::pipeline::transcoder::Transcoder;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How a stored file ended up canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Declared as the canonical type; stored bytes untouched.
    AlreadyCanonical(StoredFile),
    /// Converted; the pre-transcode original is gone.
    Transcoded(StoredFile),
}

impl NormalizeOutcome {
    pub fn file(&self) -> &StoredFile {
        match self {
            NormalizeOutcome::AlreadyCanonical(file) | NormalizeOutcome::Transcoded(file) => file,
        }
    }
}

#[derive(Clone)]
pub struct Normalizer {
    library: MusicLibrary,
    transcoder: Arc<dyn Transcoder>,
    canonical_type: String,
    canonical_extension: String,
    canonical_format: String,
}

impl Normalizer {
    pub fn new(media: &MediaConfig, library: MusicLibrary, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            library,
            transcoder,
            canonical_type: media.canonical_type.to_ascii_lowercase(),
            canonical_extension: media.canonical_extension.clone(),
            canonical_format: media.canonical_format.clone(),
        }
    }

    pub fn canonical_name(&self, stored: &StoredFile) -> String {
        format!("{}.{}", stored.stem(), self.canonical_extension)
    }

    /// Make `stored` canonical, transcoding when `declared_type` says it is not.
    ///
    /// On transcode failure the original stays on disk and the transcoder's
    /// message comes back as [`AppError::Transcode`].
    pub async fn normalize(&self, stored: StoredFile, declared_type: &str) -> AppResult<NormalizeOutcome> {
        let declared = declared_type.split(';').next().unwrap_or_default().trim();
        if declared.eq_ignore_ascii_case(&self.canonical_type) {
            return Ok(NormalizeOutcome::AlreadyCanonical(stored));
        }

        let target = self.canonical_name(&stored);
        let partial = self.library.partial_path(&target)?;

        info!(
            file = %stored.name,
            declared_type = %declared,
            target = %target,
            "Transcoding upload"
        );

        if let Err(e) = self
            .transcoder
            .transcode(&stored.path, &partial, &self.canonical_format)
            .await
        {
            let message = format!("{:#}", e);
            error!(file = %stored.name, error = %message, "Transcode failed, keeping original");
            self.library.discard_partial(&target).await;
            return Err(AppError::Transcode(message));
        }

        let converted = match self.library.publish(&target).await {
            Ok(file) => file,
            Err(e) => {
                self.library.discard_partial(&target).await;
                return Err(e);
            }
        };

        // Same name means the rename already replaced the original.
        if converted.name != stored.name {
            if let Err(e) = self.library.remove(&stored).await {
                error!(file = %stored.name, error = %e, "Failed to delete original after transcode");
                if let Err(rollback) = self.library.remove(&converted).await {
                    warn!(file = %converted.name, error = %rollback, "Failed to roll back converted file");
                }
                return Err(e);
            }
        }

        info!(original = %stored.name, file = %converted.name, bytes = converted.size, "Transcode complete");
        Ok(NormalizeOutcome::Transcoded(converted))
    }
}
