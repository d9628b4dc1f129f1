#[allow(unused_imports)]
use crate::{
    cli::globals::GlobalArgs,
    directory::HttpDirectory,
    gateway::HttpGateway,
    otp::{OtpConfig, OtpService},
    sezamo::handlers::{
        code, code::__path_code, health, health::__path_health, health::__path_live,
        health::__path_ready, verify, verify::__path_verify,
    },
    store::PgStore,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod handlers;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[derive(OpenApi)]
#[openapi(
    paths(code, verify, live, ready, health),
    components(
        schemas(
            code::CodeRequest,
            code::CodeResponse,
            verify::VerifyRequest,
            verify::VerifyResponse,
            health::Health,
            crate::otp::Channel
        )
    ),
    tags(
        (name = "otp", description = "Passwordless one-time code sign-in API"),
        (name = "health", description = "Service health probes"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the dependency graph and serve until SIGINT or SIGTERM.
/// # Errors
/// Returns an error if a client cannot be built or the server fails to start
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs, config: OtpConfig) -> Result<()> {
    let store = PgStore::connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let gateway = HttpGateway::new(&globals.gateway_url, globals.gateway_api_key.clone())
        .context("Failed to build message gateway client")?;

    let directory = Arc::new(
        HttpDirectory::new(&globals.directory_url, globals.directory_api_key.clone())
            .context("Failed to build identity directory client")?,
    );

    let service = Arc::new(OtpService::new(
        store.clone(),
        Arc::new(gateway),
        directory.clone(),
        directory,
        config,
    ));

    let app = router(store, service);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let mut sigterm = signal(SignalKind::terminate())?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn router(store: PgStore, service: Arc<OtpService<PgStore>>) -> Router {
    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    Router::new()
        .route("/code", post(handlers::code))
        .route("/verify", post(handlers::verify))
        .route("/live", get(handlers::live))
        .route("/ready", get(handlers::ready))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(store.clone()))
                .layer(Extension(service)),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(Extension(store))
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
