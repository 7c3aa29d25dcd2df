use crate::db::repo::RegistryStore;
use crate::error::{InfraError, RenameError};
use crate::models::OwnerId;
use crate::services::{Profile, RenameOutcome};
use crate::state::registry::Registry;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

type Ctx<S> = State<Arc<Registry<S>>>;

/// Errors as they leave the HTTP boundary.
#[derive(Debug)]
pub enum ApiError {
    Rename(RenameError),
    NotFound,
}

impl From<RenameError> for ApiError {
    fn from(e: RenameError) -> Self {
        ApiError::Rename(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Rename(e) => match e {
                RenameError::Unauthenticated => StatusCode::UNAUTHORIZED,
                RenameError::InvalidFormat => StatusCode::BAD_REQUEST,
                RenameError::CooldownActive { .. } => StatusCode::PRECONDITION_FAILED,
                RenameError::AlreadyTaken => StatusCode::CONFLICT,
                RenameError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn body(&self) -> Value {
        match self {
            ApiError::NotFound => json!({ "error": { "code": "not-found", "message": "not found" } }),
            // store details stay in the logs
            ApiError::Rename(e @ RenameError::Store(_)) => {
                json!({ "error": { "code": e.code(), "message": "internal error" } })
            }
            ApiError::Rename(e @ RenameError::CooldownActive { remaining_days }) => json!({
                "error": { "code": e.code(), "message": e.to_string(), "remainingDays": remaining_days }
            }),
            ApiError::Rename(e) => json!({ "error": { "code": e.code(), "message": e.to_string() } }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub username: String,
    pub owner_id: OwnerId,
    pub claimed_at: DateTime<Utc>,
}

/// The verified identity forwarded by the auth layer, if any.
pub fn caller_identity(headers: &HeaderMap, header: &str) -> Result<OwnerId, RenameError> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(OwnerId::verified)
        .ok_or(RenameError::Unauthenticated)
}

pub fn router<S: RegistryStore>(registry: Arc<Registry<S>>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/username/rename", post(rename::<S>))
        .route("/username/{name}", get(resolve::<S>))
        .route("/me", get(me::<S>))
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

/// Run the HTTP server until ctrl-c
pub async fn serve<S: RegistryStore>(addr: SocketAddr, registry: Arc<Registry<S>>) -> Result<(), InfraError> {
    let app = router(registry);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

pub async fn rename<S: RegistryStore>(
    State(registry): Ctx<S>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RenameOutcome>, ApiError> {
    let caller = caller_identity(&headers, &registry.config.identity_header)?;

    // Unparsable bodies and non-string names are format errors, not transport errors
    let body: Option<Value> = serde_json::from_slice(&body).ok();
    let raw = body
        .as_ref()
        .and_then(|b| b.get("newUsername"))
        .and_then(Value::as_str);

    let outcome = registry.rename.rename(&caller, raw).await?;
    Ok(Json(outcome))
}

pub async fn resolve<S: RegistryStore>(
    State(registry): Ctx<S>,
    Path(name): Path<String>,
) -> Result<Json<ClaimView>, ApiError> {
    let claim = registry.rename.resolve(Some(&name)).await?.ok_or(ApiError::NotFound)?;

    Ok(Json(ClaimView {
        username: claim.display_name,
        owner_id: claim.owner_id,
        claimed_at: claim.claimed_at,
    }))
}

pub async fn me<S: RegistryStore>(State(registry): Ctx<S>, headers: HeaderMap) -> Result<Json<Profile>, ApiError> {
    let caller = caller_identity(&headers, &registry.config.identity_header)?;
    let profile = registry.rename.profile(&caller).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(profile))
}
