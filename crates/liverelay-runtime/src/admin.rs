//! Admin HTTP surface: status, simulated events, webhook, deactivation.
//!
//! Every route except `GET /` requires the `x-admin-secret` header. With
//! no admin secret configured those routes answer 401 to everyone.

use std::fmt;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use liverelay_core::EventKind;
use liverelay_daemon::{RelayEngine, RelayError, RelayStatus};
use liverelay_upstream::UpstreamConnector;

pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub type AdminResult<T> = Result<T, AdminError>;

#[derive(Debug)]
pub struct AdminError {
    pub status: StatusCode,
    pub message: String,
}

impl AdminError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AdminError {}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorBody {
            error: self.message,
            status: status.as_u16(),
        });
        (status, body).into_response()
    }
}

impl From<RelayError> for AdminError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::UnknownTenant(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            RelayError::TenantInactive(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            RelayError::Serialize(_) | RelayError::Io(_) => {
                tracing::error!(error = %err, "admin request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

pub struct AdminState<C: UpstreamConnector> {
    engine: Arc<RelayEngine<C>>,
    admin_secret: Option<Arc<str>>,
}

impl<C: UpstreamConnector> Clone for AdminState<C> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            admin_secret: self.admin_secret.clone(),
        }
    }
}

impl<C: UpstreamConnector> AdminState<C> {
    fn authorize(&self, headers: &HeaderMap) -> AdminResult<()> {
        let Some(expected) = self.admin_secret.as_deref() else {
            return Err(AdminError::unauthorized());
        };
        let presented = headers
            .get(ADMIN_SECRET_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if bool::from(presented.ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(AdminError::unauthorized())
        }
    }
}

pub fn router<C: UpstreamConnector>(
    engine: Arc<RelayEngine<C>>,
    admin_secret: Option<String>,
) -> Router {
    let state = AdminState {
        engine,
        admin_secret: admin_secret.map(Arc::from),
    };
    Router::new()
        .route("/", get(root))
        .route("/status", get(status::<C>))
        .route("/simulate/{kind}", post(simulate::<C>))
        .route("/webhook", post(webhook::<C>))
        .route("/tenants/{token}/deactivate", post(deactivate::<C>))
        .with_state(state)
}

/// Serve `router` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "admin server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    tracing::info!("admin server stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn root() -> &'static str {
    "liverelay is running"
}

async fn status<C: UpstreamConnector>(
    State(state): State<AdminState<C>>,
    headers: HeaderMap,
) -> AdminResult<Json<RelayStatus>> {
    state.authorize(&headers)?;
    Ok(Json(state.engine.status().await))
}

#[derive(Debug, Deserialize)]
struct SimulateQuery {
    token: Option<String>,
}

async fn simulate<C: UpstreamConnector>(
    State(state): State<AdminState<C>>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    Query(query): Query<SimulateQuery>,
) -> AdminResult<Json<Value>> {
    state.authorize(&headers)?;
    let kind: EventKind = kind
        .parse()
        .map_err(|e: liverelay_core::CoreError| AdminError::bad_request(e.to_string()))?;
    let token = query.token.as_deref().filter(|t| !t.is_empty());
    let delivered = state.engine.publish_simulated(token, kind).await?;
    Ok(Json(json!({ "kind": kind, "delivered": delivered })))
}

async fn webhook<C: UpstreamConnector>(
    State(state): State<AdminState<C>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AdminResult<Json<Value>> {
    state.authorize(&headers)?;
    let delivered = state.engine.publish_custom(body).await?;
    Ok(Json(json!({ "delivered": delivered })))
}

async fn deactivate<C: UpstreamConnector>(
    State(state): State<AdminState<C>>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> AdminResult<Json<Value>> {
    state.authorize(&headers)?;
    state.engine.deactivate(&token).await?;
    Ok(Json(json!({ "token": token, "active": false })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use liverelay_core::Tenant;
    use liverelay_daemon::RelayConfig;
    use liverelay_daemon::fanout::Frame;
    use liverelay_daemon::ViewerHandle;
    use liverelay_upstream::{ConnectOptions, SignalSink, UpstreamClient, UpstreamError};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    const ADMIN: &str = "admin-secret-0001";

    struct IdleClient;

    impl UpstreamClient for IdleClient {
        async fn connect(&mut self) -> Result<(), UpstreamError> {
            Ok(())
        }
        async fn disconnect(&mut self) {}
    }

    struct IdleConnector;

    impl UpstreamConnector for IdleConnector {
        type Client = IdleClient;

        fn create(&self, _source_id: &str, _options: ConnectOptions, _sink: SignalSink) -> IdleClient {
            IdleClient
        }
    }

    async fn engine() -> Arc<RelayEngine<IdleConnector>> {
        let engine = Arc::new(RelayEngine::new(
            vec![
                Tenant::new("T1", "userA"),
                Tenant::new("T2", "userB"),
                Tenant::new("T3", "userC").inactive(),
            ],
            IdleConnector,
            None,
            RelayConfig::default(),
            CancellationToken::new(),
        ));
        engine.start().await;
        engine
    }

    fn watch(engine: &RelayEngine<IdleConnector>, token: &str) -> mpsc::Receiver<Frame> {
        let fanout = engine.fanout();
        let (tx, rx) = mpsc::channel(8);
        fanout.register(token, ViewerHandle::new(fanout.next_connection_id(), tx));
        rx
    }

    fn request(method: &str, uri: &str, secret: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(ADMIN_SECRET_HEADER, secret);
        }
        builder.body(body).unwrap()
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn root_is_public() {
        let app = router(engine().await, None);
        let resp = app
            .oneshot(request("GET", "/", None, Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_require_the_secret() {
        let engine = engine().await;

        let app = router(Arc::clone(&engine), Some(ADMIN.into()));
        let (status, _) = call(app.clone(), request("GET", "/status", None, Body::empty())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(app, request("GET", "/status", Some("wrong"), Body::empty())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let unset = router(engine, None);
        let (status, _) = call(unset, request("GET", "/status", Some(ADMIN), Body::empty())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "no secret configured locks everyone out");
    }

    #[tokio::test]
    async fn status_reports_tenants_without_secrets() {
        let engine = engine().await;
        let _rx = watch(&engine, "T1");
        let app = router(Arc::clone(&engine), Some(ADMIN.into()));

        let (status, body) = call(app, request("GET", "/status", Some(ADMIN), Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["server"], "ONLINE");
        assert_eq!(body["tenants"], 3);
        assert_eq!(body["activeTenants"], 2);
        assert_eq!(body["viewers"], 1);
        let detail = body["tenantsDetail"].as_array().unwrap();
        assert_eq!(detail[0]["token"], "T1");
        assert_eq!(detail[0]["sourceId"], "userA");
        assert_eq!(detail[0]["viewers"], 1);
        assert_eq!(detail[2]["active"], false);
        assert!(!body.to_string().contains(ADMIN));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn simulate_targets_one_token_or_all_active() {
        let engine = engine().await;
        let mut t1 = watch(&engine, "T1");
        let mut t2 = watch(&engine, "T2");
        let mut t3 = watch(&engine, "T3");
        let app = router(Arc::clone(&engine), Some(ADMIN.into()));

        let (status, body) = call(
            app.clone(),
            request("POST", "/simulate/like?token=T1", Some(ADMIN), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], 1);
        let frame: Value = serde_json::from_str(&t1.try_recv().unwrap()).unwrap();
        assert_eq!(frame["actorName"], "TapTester");
        assert!(t2.try_recv().is_err());

        let (_, body) = call(
            app.clone(),
            request("POST", "/simulate/follow", Some(ADMIN), Body::empty()),
        )
        .await;
        assert_eq!(body["delivered"], 2);
        assert!(t1.try_recv().is_ok());
        assert!(t2.try_recv().is_ok());
        assert!(t3.try_recv().is_err(), "inactive tenant is not targeted");

        let (status, _) = call(app, request("POST", "/simulate/dance", Some(ADMIN), Body::empty())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn webhook_publishes_custom_event() {
        let engine = engine().await;
        let mut t1 = watch(&engine, "T1");
        let app = router(Arc::clone(&engine), Some(ADMIN.into()));

        let body = Body::from(r#"{"message":"hello"}"#);
        let (status, resp) = call(app, request("POST", "/webhook", Some(ADMIN), body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["delivered"], 1);

        let frame: Value = serde_json::from_str(&t1.try_recv().unwrap()).unwrap();
        assert_eq!(frame["kind"], "custom");
        assert_eq!(frame["tenantToken"], "T1");
        assert_eq!(frame["payload"], json!({"message": "hello"}));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn deactivate_maps_engine_errors_to_statuses() {
        let engine = engine().await;
        let app = router(Arc::clone(&engine), Some(ADMIN.into()));

        let (status, body) = call(
            app.clone(),
            request("POST", "/tenants/T1/deactivate", Some(ADMIN), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);
        assert_eq!(engine.active_tokens().await, vec!["T2".to_string()]);

        let (status, _) = call(
            app.clone(),
            request("POST", "/tenants/T1/deactivate", Some(ADMIN), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            app,
            request("POST", "/tenants/nobody/deactivate", Some(ADMIN), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
        engine.shutdown().await;
    }
}
