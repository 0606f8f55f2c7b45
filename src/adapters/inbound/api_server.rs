//! Control API Server
//!
//! HTTP API for operators and automation: topology reads, membership
//! changes, maintenance, reconciliation, credential rotation and
//! start/stop. The caller is identified by the `x-user` header and every
//! `/api/v1` route is authorized before its handler runs.

use crate::application::rotation::RotationRequest;
use crate::application::ClusterService;
use crate::domain::entities::{ProxySpec, ServerSpec};
use crate::domain::errors::{ClusterError, ErrorKind};
use crate::domain::ports::Action;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Header carrying the caller identity.
pub const USER_HEADER: &str = "x-user";

/// Request to add a database server.
#[derive(Debug, Clone, Deserialize)]
pub struct AddServerRequest {
    /// host:port, the port defaults to 3306
    pub address: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub ignored: bool,
}

impl AddServerRequest {
    fn into_spec(self) -> Result<ServerSpec, ClusterError> {
        let mut spec = ServerSpec::parse(&self.address)?;
        if let Some(id) = self.id {
            spec = spec.with_id(id);
        }
        if let Some(credential) = self.credential {
            spec = spec.with_credential(credential);
        }
        spec.ignored = self.ignored;
        Ok(spec)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

/// Configuration statements to push to one server.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyConfigRequest {
    pub statements: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub servers: usize,
    pub proxies: usize,
    pub topology_version: u64,
    pub failover_in_progress: bool,
}

/// Error body: `{"error": ..., "target": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub target: Option<String>,
}

/// HTTP rendering of a `ClusterError`.
#[derive(Debug)]
pub struct ApiError(pub ClusterError);

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (ClusterError::NotFound { .. }, _) => StatusCode::NOT_FOUND,
            (ClusterError::Invalid { .. }, _) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Validation) | (_, ErrorKind::Precondition) => StatusCode::CONFLICT,
            (_, ErrorKind::Permission) => StatusCode::FORBIDDEN,
            (_, ErrorKind::Adapter) => StatusCode::BAD_GATEWAY,
            (_, ErrorKind::FatalProvisioning) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            target: self.0.target().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}

/// API Server state.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ClusterService>,
}

impl ApiState {
    pub fn new(service: Arc<ClusterService>) -> Self {
        Self { service }
    }
}

pub struct ApiServer {
    listen_addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(listen_addr: String, service: Arc<ClusterService>) -> Self {
        Self {
            listen_addr,
            state: ApiState::new(service),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Run the API server until `shutdown` resolves.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("control API listening on {}", self.listen_addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/topology", get(topology_handler))
        .route("/api/v1/servers", post(add_server_handler))
        .route("/api/v1/servers/:id", delete(remove_server_handler))
        .route("/api/v1/servers/:id/maintenance", post(maintenance_handler))
        .route("/api/v1/servers/:id/actions/start", post(start_server_handler))
        .route("/api/v1/servers/:id/actions/stop", post(stop_server_handler))
        .route(
            "/api/v1/servers/:id/actions/apply-config",
            post(apply_config_handler),
        )
        .route("/api/v1/proxies", post(add_proxy_handler))
        .route("/api/v1/proxies/:id", delete(remove_proxy_handler))
        .route("/api/v1/actions/reconcile", post(reconcile_handler))
        .route(
            "/api/v1/actions/rotate-credentials",
            post(rotate_credentials_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), authorize_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn caller(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Reject the request before any handler runs when the caller lacks the
/// grant for the route.
async fn authorize_request(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let action = Action::from_path(request.method().as_str(), request.uri().path());
    if let Some(action) = action {
        let user = caller(request.headers());
        if let Err(e) = state.service.authorize(&user, action) {
            return ApiError(e).into_response();
        }
    }
    next.run(request).await
}

// Handler functions

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let registry = state.service.registry();
    let topology = registry.snapshot();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        servers: topology.servers.len(),
        proxies: topology.proxies.len(),
        topology_version: topology.version,
        failover_in_progress: registry.failover().is_in_progress(),
    })
}

async fn topology_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.topology(&caller(&headers))?))
}

async fn add_server_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<AddServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = req.into_spec()?;
    let id = state.service.add_server(&caller(&headers), spec).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn remove_server_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.remove_server(&caller(&headers), &id).await?;
    Ok(Json(serde_json::json!({ "id": id, "removed": true })))
}

async fn maintenance_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<MaintenanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .set_maintenance(&caller(&headers), &id, req.enabled)
        .await?;
    Ok(Json(serde_json::json!({ "id": id, "maintenance": req.enabled })))
}

async fn start_server_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let output = state.service.start_server(&caller(&headers), &id).await?;
    Ok(Json(serde_json::json!({ "id": id, "output": output })))
}

async fn stop_server_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let output = state.service.stop_server(&caller(&headers), &id).await?;
    Ok(Json(serde_json::json!({ "id": id, "output": output })))
}

async fn apply_config_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ApplyConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .service
        .apply_config(&caller(&headers), &id, &req.statements)
        .await?;
    Ok(Json(outcome))
}

async fn add_proxy_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(spec): Json<ProxySpec>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.service.add_proxy(&caller(&headers), spec).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn remove_proxy_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.remove_proxy(&caller(&headers), &id).await?;
    Ok(Json(serde_json::json!({ "id": id, "removed": true })))
}

async fn reconcile_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let reports = state.service.reconcile(&caller(&headers)).await?;
    Ok(Json(serde_json::json!({ "reports": reports })))
}

async fn rotate_credentials_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<RotationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .service
        .rotate_credentials(&caller(&headers), &req)
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::errors::AdapterError;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ClusterError::server_not_found("db1"), StatusCode::NOT_FOUND),
            (
                ClusterError::Invalid {
                    field: "port",
                    reason: "x".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ClusterError::DuplicateServer {
                    address: "10.0.0.5:3306".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (ClusterError::FailoverBusy, StatusCode::CONFLICT),
            (
                ClusterError::PermissionDenied {
                    user: "bob".to_string(),
                    action: "server.add".to_string(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                ClusterError::adapter("haproxy-1", AdapterError::Timeout(std::time::Duration::from_secs(1))),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ClusterError::Provisioning {
                    target: "db1".to_string(),
                    reason: "exit 1".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn test_caller_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller(&headers), "anonymous");
        headers.insert(USER_HEADER, "alice".parse().unwrap());
        assert_eq!(caller(&headers), "alice");
    }

    #[test]
    fn test_add_server_request_into_spec() {
        let req: AddServerRequest = serde_json::from_value(serde_json::json!({
            "address": "db1.internal:3307",
            "id": "db1",
            "credential": "db1-credential"
        }))
        .unwrap();
        let spec = req.into_spec().unwrap();
        assert_eq!(spec.address(), "db1.internal:3307");
        assert_eq!(spec.id.as_deref(), Some("db1"));
        assert_eq!(spec.credential, "db1-credential");
        assert!(!spec.ignored);
    }
}
