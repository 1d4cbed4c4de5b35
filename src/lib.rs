//! Portal is a lightweight account front end: sign-up, sign-in, password
//! reset and profile edition over a pluggable identity and storage backend.

#![forbid(unsafe_code)]
pub mod adapters;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod form;
pub mod guard;
pub mod identity;
pub mod ports;
pub mod profile;
mod router;
pub mod screen;
pub mod session;
pub mod store;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adapters::clock::SystemClock;
use adapters::memory::{MemoryAuth, MemoryDocuments, MemoryFiles};
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use ports::{AuthProvider, DocumentStore, FileStore};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// Environment variable overriding the configuration file path.
pub const CONFIG_ENV: &str = "PORTAL_CONFIG";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    cookie: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    dbg!(&method, path, &body);

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// In-memory state with one registered account (`Jane`).
#[cfg(test)]
pub fn state() -> (AppState, Arc<MemoryAuth>) {
    use screen::tests::{EMAIL, PASSWORD};

    let config = Arc::new(config::Configuration::default());
    let auth = Arc::new(MemoryAuth::fast());
    auth.register(EMAIL, PASSWORD, Some("Jane")).unwrap();
    let backend = memory_backend(&config, auth.clone());

    (
        assemble(config, backend, telemetry::metrics_handle().unwrap()),
        auth,
    )
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub clients: Arc<client::Clients>,
    pub profiles: store::ProfileStore,
    /// Set with the in-memory backend, which also serves the photos.
    pub files: Option<Arc<MemoryFiles>>,
    pub metrics: PrometheusHandle,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE, header::SET_COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::COOKIE]),
        );

    let guarded = Router::new()
        // `GET /` is the profile too.
        .route("/", get(router::profile::show))
        .route(
            "/profile",
            get(router::profile::show).post(router::profile::handler),
        )
        .route(
            "/profile/photo",
            post(router::profile::photo)
                .layer(DefaultBodyLimit::max(router::profile::PHOTO_BODY_LIMIT)),
        )
        .route_layer(AxumMiddleware::from_fn(router::require_auth));

    let screens = Router::new()
        .route(
            "/login",
            get(router::login::show).post(router::login::handler),
        )
        .route("/login/provider", post(router::login::provider))
        .route(
            "/signup",
            get(router::signup::show).post(router::signup::handler),
        )
        .route(
            "/forgot-password",
            get(router::forgot_password::show)
                .post(router::forgot_password::handler),
        )
        .route("/logout", post(router::logout))
        .merge(guarded)
        .layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::attach_client,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(router::metrics))
        .route("/files/{*path}", get(router::file))
        .merge(screens)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

type Backend = (
    Arc<dyn AuthProvider>,
    Arc<dyn DocumentStore>,
    Arc<dyn FileStore>,
    Option<Arc<MemoryFiles>>,
);

fn memory_backend(config: &config::Configuration, auth: Arc<MemoryAuth>) -> Backend {
    let documents: Arc<dyn DocumentStore> = Arc::new(MemoryDocuments::new(auth.clone()));
    let files = Arc::new(MemoryFiles::new(auth.clone(), format!("{}files/", config.url)));
    let store: Arc<dyn FileStore> = files.clone();
    let provider: Arc<dyn AuthProvider> = auth;

    (provider, documents, store, Some(files))
}

fn assemble(
    config: Arc<config::Configuration>,
    (auth, documents, files, memory_files): Backend,
    metrics: PrometheusHandle,
) -> AppState {
    let clients = Arc::new(client::Clients::new(
        auth,
        config.session.refresh_margin(),
        config.session.idle_timeout(),
    ));
    let profiles =
        store::ProfileStore::new(documents, files, Arc::new(SystemClock::new()));

    AppState {
        config,
        clients,
        profiles,
        files: memory_files,
        metrics,
    }
}

/// Initialize the application state.
pub async fn initialize_state(
    metrics: PrometheusHandle,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let mut config = config::Configuration::default();
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        config = config.path(PathBuf::from(path));
    }
    let config = config.read()?;

    let backend: Backend = match config.backend {
        config::Backend::Memory => {
            tracing::warn!("in-memory backend in use, accounts are lost on restart");
            let passwords = crypto::PasswordManager::new(config.argon2.clone())?;
            memory_backend(&config, Arc::new(MemoryAuth::new(passwords)))
        },
        config::Backend::Firebase => {
            let Some(firebase) = &config.firebase else {
                tracing::error!("missing `firebase` entry on `config.yaml` file");
                return Err("`firebase` backend selected without configuration".into());
            };
            let (auth, documents, files) = adapters::firebase::connect(firebase)?;
            tracing::info!(project = %firebase.project_id, "firebase backend configured");

            let auth: Arc<dyn AuthProvider> = Arc::new(auth);
            let documents: Arc<dyn DocumentStore> = Arc::new(documents);
            let files: Arc<dyn FileStore> = Arc::new(files);
            (auth, documents, files, None)
        },
    };

    let state = assemble(config, backend, metrics);
    state.clients.spawn_sweeper();

    Ok(state)
}
