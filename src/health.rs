use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let uptime_seconds = state.get_uptime_seconds();
    let storage = get_storage_status(&state).await;
    let healthy = storage["writable"].as_bool().unwrap_or(false);

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "music-vault-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            }
        },
        "storage": storage,
        "media": {
            "allowed_types": config.media.allowed_types,
            "canonical_type": config.media.canonical_type,
            "transcoder": config.transcoder.ffmpeg_path
        }
    });

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "pipeline": {
            "uploads_accepted": metrics.pipeline.uploads_accepted,
            "uploads_rejected": metrics.pipeline.uploads_rejected,
            "transcodes_succeeded": metrics.pipeline.transcodes_succeeded,
            "transcodes_failed": metrics.pipeline.transcodes_failed
        },
        "endpoints": endpoint_stats
    }))
}

/// Probe the music directory: does it exist, can we write to it, how many
/// tracks are listed.
async fn get_storage_status(state: &AppState) -> serde_json::Value {
    let dir = state.library.root();
    let writable = match tokio::fs::metadata(dir).await {
        Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
        Err(_) => false,
    };
    let tracks = state.library.list_canonical().await.map(|names| names.len()).ok();

    json!({
        "music_dir": dir.display().to_string(),
        "writable": writable,
        "tracks": tracks
    })
}
