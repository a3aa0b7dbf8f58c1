use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Records request counts and timings into [`AppState`].
///
/// Endpoints are keyed by route pattern (`GET /music/{filename}`), not by the
/// concrete path, so the table stays one row per route however many tracks
/// are served. Unmatched paths are grouped under `<unmatched>`.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let route = req
            .match_pattern()
            .unwrap_or_else(|| "<unmatched>".to_string());
        let endpoint = format!("{} {}", req.method(), route);
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(app_state) = &app_state {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
                Err(_) => true,
            };

            if let Some(app_state) = app_state {
                app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    app_state.increment_error_count();
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::library::MusicLibrary;
    use crate::pipeline::transcoder::fakes::CopyTranscoder;
    use actix_web::{test, App, HttpResponse};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_metrics_keyed_by_route_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();
        let state = AppState::new(AppConfig::default(), library, Arc::new(CopyTranscoder::default()));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(MetricsMiddleware)
                .route(
                    "/music/{filename}",
                    web::get().to(|| async { HttpResponse::NotFound().finish() }),
                ),
        )
        .await;

        for uri in ["/music/a.mp3", "/music/b.mp3"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            test::call_service(&app, req).await;
        }

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(snapshot.endpoint_metrics.len(), 1);
        assert_eq!(snapshot.endpoint_metrics["GET /music/{filename}"].request_count, 2);
    }
}
