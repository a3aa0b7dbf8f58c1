//! Ingest validation and storage naming.

use crate::config::MediaConfig;
use crate::error::{AppError, AppResult};
use crate::library::{formats, PARTIAL_SUFFIX};
use std::path::Path;
use uuid::Uuid;

/// Longest extension carried over from a client-supplied filename.
const MAX_EXTENSION_LEN: usize = 10;

/// Decides whether an upload may be stored, and under which name.
///
/// ## Policy:
/// - The decision uses only the MIME type the client declared for the part.
///   Content is never sniffed.
/// - Matching is on the MIME essence (`type/subtype`), case-insensitive, so
///   `audio/wav; codecs=1` is treated as `audio/wav`.
#[derive(Debug, Clone)]
pub struct IngestValidator {
    allowed_types: Vec<String>,
    rejection_message: String,
}

impl IngestValidator {
    pub fn new(media: &MediaConfig) -> Self {
        let allowed_types: Vec<String> = media
            .allowed_types
            .iter()
            .map(|t| essence(t))
            .collect();

        let mut labels: Vec<String> = Vec::new();
        for label in allowed_types.iter().map(|t| formats::format_label(t)) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        Self {
            allowed_types,
            rejection_message: format!(
                "Unsupported file type! Supported formats: {}.",
                labels.join(", ")
            ),
        }
    }

    /// Accept or reject a declared MIME type.
    ///
    /// Rejection carries the list of supported formats so the client can fix
    /// the request.
    pub fn validate(&self, declared_type: &str) -> AppResult<()> {
        let declared = essence(declared_type);
        if self.allowed_types.iter().any(|t| *t == declared) {
            Ok(())
        } else {
            Err(AppError::UnsupportedMediaType(self.rejection_message.clone()))
        }
    }

    /// Storage name for an accepted upload: `<token>.<ext>`.
    ///
    /// The extension comes from the client's filename when it looks like a
    /// real extension, otherwise from the declared type. The client's name is
    /// used for nothing else.
    pub fn storage_name(&self, original_filename: Option<&str>, declared_type: &str) -> String {
        let ext = original_filename
            .and_then(client_extension)
            .or_else(|| formats::extension_for_mime(declared_type).map(str::to_string));

        match ext {
            Some(ext) => format!("{}.{}", unique_token(), ext),
            None => unique_token(),
        }
    }
}

/// `<unix-millis>-<8 hex chars>`: sorts by arrival, and two uploads in the
/// same millisecond still differ.
pub fn unique_token() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", millis, &random[..8])
}

fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn client_extension(filename: &str) -> Option<String> {
    // Browsers on Windows may send the full path.
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let ext = Path::new(base).extension()?.to_str()?;

    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        // `.part` names are reserved for files still being written.
        && !ext.eq_ignore_ascii_case(PARTIAL_SUFFIX.trim_start_matches('.'));
    valid.then(|| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::collections::HashSet;

    fn validator() -> IngestValidator {
        IngestValidator::new(&AppConfig::default().media)
    }

    #[test]
    fn test_accepts_allow_listed_types() {
        let v = validator();
        for t in ["audio/mpeg", "audio/wav", "audio/flac", "audio/aac", "audio/ogg"] {
            assert!(v.validate(t).is_ok(), "{} should be accepted", t);
        }
        assert!(v.validate("AUDIO/WAV").is_ok());
        assert!(v.validate("audio/ogg; codecs=opus").is_ok());
    }

    #[test]
    fn test_rejects_with_supported_formats() {
        let v = validator();
        match v.validate("video/mp4") {
            Err(AppError::UnsupportedMediaType(msg)) => assert_eq!(
                msg,
                "Unsupported file type! Supported formats: MP3, WAV, FLAC, AAC, OGG."
            ),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(v.validate("").is_err());
        assert!(v.validate("application/octet-stream").is_err());
    }

    #[test]
    fn test_strict_variant_accepts_only_canonical() {
        let mut media = AppConfig::default().media;
        media.allowed_types = vec!["audio/mpeg".to_string()];
        let v = IngestValidator::new(&media);

        assert!(v.validate("audio/mpeg").is_ok());
        match v.validate("audio/wav") {
            Err(AppError::UnsupportedMediaType(msg)) => {
                assert_eq!(msg, "Unsupported file type! Supported formats: MP3.")
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_storage_name_keeps_extension() {
        let v = validator();
        let name = v.storage_name(Some("song.WAV"), "audio/wav");
        assert!(name.ends_with(".wav"), "{}", name);

        let (token, _) = name.rsplit_once('.').unwrap();
        let (millis, random) = token.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(random.len(), 8);
    }

    #[test]
    fn test_storage_name_falls_back_to_declared_type() {
        let v = validator();
        assert!(v.storage_name(None, "audio/flac").ends_with(".flac"));
        assert!(v.storage_name(Some("noext"), "audio/mpeg").ends_with(".mp3"));
        assert!(v.storage_name(Some("evil.mp3/../x"), "audio/ogg").ends_with(".ogg"));
        assert!(v.storage_name(Some("weird.m p3"), "audio/aac").ends_with(".aac"));
        assert!(v.storage_name(Some("C:\\Music\\track.flac"), "audio/flac").ends_with(".flac"));
    }

    #[test]
    fn test_reserved_partial_extension_is_not_kept() {
        let v = validator();
        assert!(v.storage_name(Some("recording.part"), "audio/wav").ends_with(".wav"));
        assert!(v.storage_name(Some("recording.PART"), "audio/mpeg").ends_with(".mp3"));
    }

    #[test]
    fn test_storage_names_are_unique() {
        let v = validator();
        let names: HashSet<String> = (0..1000)
            .map(|_| v.storage_name(Some("track.mp3"), "audio/mpeg"))
            .collect();
        assert_eq!(names.len(), 1000);
    }
}
