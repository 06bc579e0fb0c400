//! HTTP surface of the box gateway
//!
//! One axum router carries the whole public face: the box tunnel endpoint,
//! the proxy facade, the auth glue, and the health probe.

pub mod handlers;
pub mod models;
pub mod ws;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{any, get, post},
    Json, Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;

use boxgate_control::Gateway;
use boxgate_identity::IdentityProvider;

/// Application state shared across handlers
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Box Gateway API",
        version = "0.1.0",
        description = "Public gateway exposing registered boxes to inbound HTTP traffic",
        contact(name = "Boxgate Team", email = "team@boxgate.dev")
    ),
    paths(handlers::health_check, handlers::register, handlers::login),
    components(schemas(
        models::HealthResponse,
        models::ErrorResponse,
        models::User,
        models::RegisterRequest,
        models::RegisterResponse,
        models::LoginRequest,
        models::LoginResponse,
    )),
    tags(
        (name = "system", description = "Health and info endpoints"),
        (name = "auth", description = "User registration and login")
    )
)]
struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the server
    pub bind_addr: SocketAddr,
    /// Enable CORS (for development)
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            enable_cors: true,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        gateway: Arc<Gateway>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let state = Arc::new(AppState { gateway, identity });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/", get(handlers::health_check))
            .route("/register", post(handlers::register))
            .route("/login", post(handlers::login))
            .route("/ws/box", get(ws::box_socket))
            .route("/proxy/{box_id}", any(handlers::proxy_box_root))
            .route("/proxy/{box_id}/{*path}", any(handlers::proxy_box))
            .route(
                "/api/openapi.json",
                get(|| async { Json(ApiDoc::openapi()) }),
            )
            .with_state(self.state.clone());

        let cors = if self.config.enable_cors {
            use tower_http::cors::AllowOrigin;

            let cors_layer = CorsLayer::new()
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::PATCH,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                        || origin_str.starts_with("https://localhost:")
                        || origin_str.starts_with("https://127.0.0.1:")
                }));

            Some(cors_layer)
        } else {
            None
        };

        let mut router = router.layer(TraceLayer::new_for_http());

        if let Some(cors) = cors {
            router = router.layer(cors);
        }

        router
    }

    /// Start the API server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting gateway server on {}", self.config.bind_addr);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
