//! Read-side endpoints: listing, streaming, download, and the front page.
//!
//! ## Available Endpoints:
//! - `GET /music` - List canonical-format tracks with playback URLs
//! - `GET /music/{filename}` - Stream a track
//! - `GET /download/{filename}` - Download a track as an attachment
//! - `GET /` - `index.html` from the public directory
//! - anything else - a file from the public directory, or a JSON 404

use crate::error::AppError;
use crate::library::{formats, StoredFile};
use crate::state::AppState;
use actix_web::body::SizedStream;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct MusicEntry {
    pub filename: String,
    pub url: String,
}

pub async fn list_music(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let names = match state.library.list_canonical().await {
        Ok(names) => names,
        Err(e) => {
            error!(error = %e, "Failed to list music directory");
            return HttpResponse::InternalServerError()
                .json(json!({ "message": "Failed to read music directory" }));
        }
    };

    let conn = req.connection_info();
    let entries: Vec<MusicEntry> = names
        .into_iter()
        .map(|filename| MusicEntry {
            url: format!("{}://{}/music/{}", conn.scheme(), conn.host(), filename),
            filename,
        })
        .collect();

    HttpResponse::Ok().json(entries)
}

pub async fn stream_music(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let filename = path.into_inner();
    let file = state
        .library
        .open(&filename)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File '{}' not found.", filename)))?;

    let mut response = HttpResponse::Ok();
    response.content_type(file.content_type());
    send_file(response, &file).await
}

pub async fn download_music(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let filename = path.into_inner();
    let file = state
        .library
        .open(&filename)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let mut response = HttpResponse::Ok();
    response
        .content_type(file.content_type())
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(file.name.clone())],
        });
    send_file(response, &file).await
}

/// Stream a stored file with an exact Content-Length.
async fn send_file(
    mut response: actix_web::HttpResponseBuilder,
    file: &StoredFile,
) -> Result<HttpResponse, AppError> {
    let handle = tokio::fs::File::open(&file.path).await.map_err(|e| match e.kind() {
        // Deleted between lookup and open (e.g. replaced by a transcode).
        ErrorKind::NotFound => AppError::NotFound(format!("File '{}' not found.", file.name)),
        _ => AppError::from(e),
    })?;

    Ok(response.body(SizedStream::new(file.size, ReaderStream::new(handle))))
}

pub async fn index(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let page = state.config.storage.public_dir.join("index.html");
    match tokio::fs::read(&page).await {
        Ok(html) => Ok(HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(html)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(AppError::NotFound("Route not found".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "message": "Route not found" }))
}

/// Fallback for unrouted requests: serve the matching file from the public
/// directory, otherwise answer with the JSON 404.
pub async fn public_asset(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(not_found().await);
    }
    let Some(path) = public_path(&state.config.storage.public_dir, req.path()) else {
        return Ok(not_found().await);
    };

    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Ok(not_found().await),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(not_found().await),
        Err(e) => return Err(e.into()),
    };
    let handle = tokio::fs::File::open(&path).await?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

    Ok(HttpResponse::Ok()
        .content_type(asset_content_type(ext))
        .body(SizedStream::new(meta.len(), ReaderStream::new(handle))))
}

/// Map a request path onto the public directory. Dot segments (which
/// covers `..`) and backslashes are refused.
fn public_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut segments = 0;
    for segment in request_path.split('/').filter(|s| !s.is_empty()) {
        if segment.starts_with('.') || segment.contains(['\\', '\0']) {
            return None;
        }
        path.push(segment);
        segments += 1;
    }
    (segments > 0).then_some(path)
}

fn asset_content_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        other => formats::content_type_for_extension(other),
    }
}
