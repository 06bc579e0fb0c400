//! HTTP handlers: health, auth glue, and the proxy facade

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, warn};

use boxgate_control::{DispatchError, ProxyRequest};
use boxgate_identity::{IdentityError, SignUp};

use crate::models::*;
use crate::AppState;

/// Health probe
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Gateway is running", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_string(),
    })
}

/// Register a new user
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Username or email already taken", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .identity
        .sign_up(&request.email, &request.password, &request.username)
        .await
        .map_err(identity_error)?;

    match outcome {
        SignUp::Created(session) => Ok((
            StatusCode::CREATED,
            Json(RegisterResponse {
                user: session.user.into(),
                token: session.access_token,
            }),
        )),
        SignUp::UsernameTaken => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                format!("Username '{}' is already taken", request.username),
                "username_taken",
            )),
        )),
        SignUp::EmailTaken => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "Email is already registered",
                "email_taken",
            )),
        )),
    }
}

/// Log in an existing user
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "User logged in", body = LoginResponse),
        (status = 400, description = "Invalid credentials", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ErrorResponse>)> {
    let session = state
        .identity
        .sign_in(&request.email, &request.password)
        .await
        .map_err(identity_error)?;

    Ok(Json(LoginResponse {
        user: session.user.into(),
        token: session.access_token,
    }))
}

fn identity_error(error: IdentityError) -> (StatusCode, Json<ErrorResponse>) {
    match error {
        IdentityError::InvalidCredentials => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "Invalid email or password",
                "invalid_credentials",
            )),
        ),
        other => {
            warn!(error = %other, "Identity provider failure");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(other.to_string(), "identity_failure")),
            )
        }
    }
}

/// Proxy a call to a box's root path
pub async fn proxy_box_root(
    State(state): State<Arc<AppState>>,
    Path(box_id): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(state, box_id, String::new(), query, method, headers, body).await
}

/// Proxy a call to a path on a box
pub async fn proxy_box(
    State(state): State<Arc<AppState>>,
    Path((box_id, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(state, box_id, path, query, method, headers, body).await
}

async fn proxy(
    state: Arc<AppState>,
    box_id: String,
    path: String,
    query: Option<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = ProxyRequest {
        method: method.to_string(),
        path: format!("/{}", path),
        query: query.unwrap_or_default(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: if body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&body).into_owned())
        },
    };

    debug!(box_id = %box_id, method = %request.method, path = %request.path, "Proxying request");

    match state.gateway.dispatch(&box_id, request).await {
        Ok(payload) => box_response(payload),
        Err(DispatchError::TargetUnavailable(_)) => error_response(
            StatusCode::NOT_FOUND,
            format!("Box '{}' is not connected", box_id),
            "box_not_connected",
        ),
        Err(DispatchError::GatewayTimeout(_)) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            format!("Box '{}' did not respond in time", box_id),
            "gateway_timeout",
        ),
        Err(error) => error_response(StatusCode::BAD_GATEWAY, error.to_string(), "bad_gateway"),
    }
}

/// Copy the box's response verbatim: status, headers (last write wins per
/// key), and body.
fn box_response(payload: boxgate_proto::ResponsePayload) -> Response {
    let status = match StatusCode::from_u16(payload.status) {
        Ok(status) => status,
        Err(_) => {
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("Box returned invalid status {}", payload.status),
                "bad_gateway",
            )
        }
    };

    let mut headers = HeaderMap::new();
    for (name, value) in &payload.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    (status, headers, payload.body.unwrap_or_default()).into_response()
}

fn error_response(status: StatusCode, message: String, code: &str) -> Response {
    (status, Json(ErrorResponse::new(message, code))).into_response()
}
