use crate::errors::{ConfigError, Error};
use crate::model::UpdateResponse;
use crate::state::SharedDevice;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 4096;

#[derive(Clone)]
struct AppState {
    device: SharedDevice,
    grace: Duration,
}

pub fn create_router(device: SharedDevice, grace: Duration) -> Router {
    let state = AppState { device, grace };

    Router::new()
        .route(
            "/config",
            get(get_config).post(post_config).fallback(method_not_allowed),
        )
        .route("/status", get(get_status).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn get_config(State(state): State<AppState>) -> Result<Response, ApiError> {
    let device = state.device.lock()?;
    Ok(Json(device.store.public()).into_response())
}

async fn post_config(State(state): State<AppState>, body: Bytes) -> Result<Json<UpdateResponse>, ApiError> {
    let raw = parse_patch(&body)?;

    let updated_fields = {
        let mut device = state.device.lock()?;
        device.store.update(&raw, Instant::now())?
    };

    info!(
        "Accepted config change ({}), restart in {}s",
        updated_fields.join(", "),
        state.grace.as_secs()
    );

    Ok(Json(UpdateResponse {
        message: format!(
            "Configuration updated successfully. Device will reboot in {} seconds.",
            state.grace.as_secs()
        ),
        updated_fields,
        reboot: true,
    }))
}

async fn get_status(State(state): State<AppState>) -> Result<Response, ApiError> {
    let device = state.device.lock()?;
    Ok(Json(device.snapshot(Instant::now())).into_response())
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError(Error::RouteNotFound(uri.path().to_string()))
}

async fn method_not_allowed(uri: Uri) -> ApiError {
    ApiError(Error::MethodNotAllowed(uri.path().to_string()))
}

/// Splits an incoming body into the raw field map. Both an empty body and an
/// empty object count as an empty patch.
fn parse_patch(body: &[u8]) -> Result<Map<String, Value>, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ConfigError::EmptyPatch.into());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::RequestParse("body must be a JSON object".to_string())),
        Err(e) => Err(Error::RequestParse(e.to_string())),
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Maps runtime errors onto the control surface's JSON error shape. Internal
/// faults are logged and answered with a generic body.
pub struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, reason) = match self.0 {
            Error::Config(ConfigError::EmptyPatch) => {
                (StatusCode::BAD_REQUEST, "EmptyRequestBody".to_string(), None)
            }
            Error::Config(ConfigError::UnknownField { name }) => (
                StatusCode::BAD_REQUEST,
                format!("UnknownField: {}", name),
                Some("not a recognized configuration field".to_string()),
            ),
            Error::Config(ConfigError::InvalidField { name, reason }) => (
                StatusCode::BAD_REQUEST,
                format!("InvalidField: {}", name),
                Some(reason),
            ),
            Error::RequestParse(reason) => (
                StatusCode::BAD_REQUEST,
                "RequestParseFault".to_string(),
                Some(reason),
            ),
            Error::RouteNotFound(path) => {
                debug!("No route for {}", path);
                (StatusCode::NOT_FOUND, "RouteNotFound".to_string(), None)
            }
            Error::MethodNotAllowed(path) => {
                debug!("Method not allowed on {}", path);
                let body = ErrorBody {
                    error: "MethodNotAllowed".to_string(),
                    status_code: StatusCode::METHOD_NOT_ALLOWED.as_u16(),
                    reason: None,
                };
                return (
                    StatusCode::METHOD_NOT_ALLOWED,
                    [(header::ALLOW, allowed_methods(&path))],
                    Json(body),
                )
                    .into_response();
            }
            other => {
                error!("API error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError".to_string(),
                    None,
                )
            }
        };

        let body = ErrorBody {
            error,
            status_code: status.as_u16(),
            reason,
        };
        (status, Json(body)).into_response()
    }
}

fn allowed_methods(path: &str) -> &'static str {
    match path {
        "/config" => "GET, POST",
        _ => "GET",
    }
}

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
