// Climate Points API v0.1
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod models;
mod routes;
mod services;

use config::AppConfig;
use routes::emissions::AppState;
use services::emissions::EmissionsService;
use services::pipeline::IngestionPipeline;
use services::trace::TraceClient;

/// Climate Points API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Climate Points API",
        version = "0.1.0",
        description = "Geospatial climate indicator points for map rendering. \
            Pages through the Climate TRACE asset inventory, normalizes each \
            emissions source into a map point, caches bulk results for an hour, \
            and can stream results page by page as NDJSON for progressive rendering. \
            Data: https://climatetrace.org/data (CC BY 4.0).",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Emissions", description = "Emissions sources from Climate TRACE"),
    ),
    paths(
        routes::health::health_check,
        routes::emissions::get_emissions,
        routes::emissions::stream_emissions,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::emissions::EmissionsResponse,
            models::NormalizedPoint,
            models::Category,
            models::Intensity,
            models::PointKind,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "climate_points_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    let trace_client = TraceClient::new(&config.trace_api_url, &config.trace_user_agent);
    tracing::info!("Using Climate TRACE API at {}", trace_client.base_url());

    let app_state = AppState {
        service: Arc::new(EmissionsService::new(IngestionPipeline::new(trace_client))),
    };

    // CORS — read-only API, restrict methods to GET
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(&config.allowed_origins))
        .allow_methods([Method::GET])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/emissions", get(routes::emissions::get_emissions))
        .route(
            "/api/v1/emissions/stream",
            get(routes::emissions::stream_emissions),
        )
        .with_state(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}

/// Build the CORS origin policy. `*` anywhere in the list allows any origin.
fn allow_origin(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin '{}': {}", o, e);
                None
            }
        })
        .collect();
    AllowOrigin::list(values)
}
