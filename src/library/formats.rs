//! MIME type ↔ extension lookups for the audio formats we know about.

/// Content type to serve for a stored file's extension.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "m4a" => "audio/mp4",
        "weba" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// File extension conventionally used for a declared MIME type.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime.trim().to_ascii_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some("mp3"),
        "audio/wav" | "audio/wave" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/aac" | "audio/x-aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        "audio/webm" => Some("weba"),
        _ => None,
    }
}

/// Short human label for a MIME type, as shown in "Supported formats: ..." messages.
pub fn format_label(mime: &str) -> String {
    match extension_for_mime(mime) {
        Some(ext) => ext.to_ascii_uppercase(),
        None => mime
            .rsplit('/')
            .next()
            .unwrap_or(mime)
            .trim_start_matches("x-")
            .to_ascii_uppercase(),
    }
}
