use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::actions;
use crate::dispatcher::AlertDispatcher;
use crate::signature::SIGNATURE_HEADER;

/// Path Motive delivers webhooks to
pub const WEBHOOK_ROUTE: &str = "/webhook/motive";

/// Largest webhook body accepted, in bytes
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// App state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub webhook_secret: Arc<str>,
    pub dispatcher: AlertDispatcher,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(webhook_secret: impl Into<String>, dispatcher: AlertDispatcher) -> Self {
        let webhook_secret: String = webhook_secret.into();
        Self {
            webhook_secret: Arc::from(webhook_secret),
            dispatcher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Response header echoing the correlation id assigned to each request
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id shared between the logging and Sentry middlewares
#[derive(Debug, Clone)]
struct RequestId(String);

// Matched route template, so metric labels stay bounded
fn route_label(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(mut request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let route = route_label(&request);
    let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let signed = request.headers().contains_key(SIGNATURE_HEADER);
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let span = info_span!("http_request", %method, %route, request_id = %request_id);
    let start_time = Instant::now();
    if route == WEBHOOK_ROUTE {
        info!(parent: &span, signed, "Webhook delivery received");
    } else {
        debug!(parent: &span, "Request started");
    }

    let mut response = next.run(request).instrument(span.clone()).await;
    let duration = start_time.elapsed();
    let status = response.status();

    info!(
        parent: &span,
        status = status.as_u16(),
        "Completed in {:.2}ms",
        duration.as_secs_f64() * 1000.0
    );
    metrics::histogram!(
        "http_request_duration_seconds",
        "route" => route,
        "status" => status.as_u16().to_string()
    )
    .record(duration.as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// Middleware to capture HTTP errors to Sentry
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let route = route_label(&request);
    let request_id = request.extensions().get::<RequestId>().cloned();

    let response = next.run(request).await;

    // Client errors (bad signature, malformed body) are not reported
    let status = response.status();
    if status.is_server_error() {
        error!(%method, %route, status = status.as_u16(), "Request failed");

        let message = if status == StatusCode::SERVICE_UNAVAILABLE && route == WEBHOOK_ROUTE {
            "Webhook refused while the alert queue is closed".to_string()
        } else {
            format!("HTTP {} error on {} {}", status.as_u16(), method, route)
        };

        sentry::with_scope(
            |scope| {
                scope.set_tag("service", actions::SERVICE_NAME);
                scope.set_tag("http.method", method.as_str());
                scope.set_tag("http.route", &route);
                scope.set_tag("http.status_code", status.as_u16().to_string());
                if let Some(RequestId(id)) = &request_id {
                    scope.set_tag("request_id", id);
                }
            },
            || sentry::capture_message(&message, sentry::Level::Error),
        );
    }

    response
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let webhook_router: Router<AppState> = Router::new()
        .route(WEBHOOK_ROUTE, post(actions::motive_webhook))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    Router::new()
        .route("/", get(actions::root))
        .route("/health", get(actions::health))
        .route("/metrics", get(render_metrics))
        .merge(webhook_router)
        .with_state(state)
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
}

/// Serve until `shutdown` resolves, then finish in-flight requests
pub async fn start_web_server<F>(
    interface: &str,
    port: u16,
    state: AppState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "web-server");
    });
    info!("Starting web server on {}:{}", interface, port);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Web server stopped");
    Ok(())
}
