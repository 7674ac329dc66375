//! `Gateway`: one axum listener serving `/webhook`, `/callback`, and
//! `/health`, plus the optional tunnel in front of it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{any, get};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthFlows, AuthorizationFlow, CallbackHandler};
use crate::config::GatewayConfig;
use crate::errors::{AuthFlowError, GatewayError};
use crate::health::{self, HealthResponse};
use crate::tenant::{TenantRegistry, TenantVerifier};
use crate::tunnel::Tunnel;
use crate::webhook;

/// Where the gateway is reachable.
#[derive(Debug, Default)]
struct Endpoint {
    port: u16,
    tunnel_url: Option<String>,
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<GatewayConfig>,
    pub(crate) tenants: Arc<TenantRegistry>,
    pub(crate) auth: Arc<AuthFlows>,
    endpoint: Arc<RwLock<Endpoint>>,
    start_time: Instant,
}

impl AppState {
    fn public_url(&self) -> String {
        resolve_public_url(&self.config, &self.endpoint.read())
    }
}

/// Tunnel URL, else the configured base URL, else the local address.
fn resolve_public_url(config: &GatewayConfig, endpoint: &Endpoint) -> String {
    if let Some(url) = &endpoint.tunnel_url {
        return url.trim_end_matches('/').to_owned();
    }
    if let Some(base) = config.base_url.as_deref().filter(|b| !b.is_empty()) {
        return base.trim_end_matches('/').to_owned();
    }
    format!("http://{}:{}", config.host, endpoint.port)
}

/// The network-facing gateway.
pub struct Gateway {
    state: AppState,
    tunnel: Option<Arc<dyn Tunnel>>,
}

impl Gateway {
    /// Build a gateway. Nothing listens until [`Gateway::start`].
    pub fn new(config: GatewayConfig) -> Self {
        let auth = AuthFlows::new(config.auth_provider_base_url.clone(), config.auth_flow_timeout);
        let endpoint = Endpoint {
            port: config.port,
            tunnel_url: None,
        };
        Self {
            state: AppState {
                config: Arc::new(config),
                tenants: Arc::new(TenantRegistry::new()),
                auth: Arc::new(auth),
                endpoint: Arc::new(RwLock::new(endpoint)),
                start_time: Instant::now(),
            },
            tunnel: None,
        }
    }

    /// Use `tunnel` to expose the listener publicly.
    #[must_use]
    pub fn with_tunnel(mut self, tunnel: Arc<dyn Tunnel>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    /// Gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }

    /// Add or replace a tenant on the signed-event endpoint.
    pub fn register_tenant(&self, token: impl Into<String>, verifier: Arc<dyn TenantVerifier>) {
        self.state.tenants.register(token, verifier);
    }

    /// Remove a tenant. Returns whether it existed.
    pub fn unregister_tenant(&self, token: &str) -> bool {
        self.state.tenants.unregister(token)
    }

    /// Number of registered tenants.
    pub fn tenant_count(&self) -> usize {
        self.state.tenants.len()
    }

    /// Install the side effect run on every valid authorization callback.
    pub fn set_callback_handler(&self, handler: Arc<dyn CallbackHandler>) {
        self.state.auth.set_handler(handler);
    }

    /// Pending authorization flows.
    pub fn auth_flows(&self) -> &Arc<AuthFlows> {
        &self.state.auth
    }

    /// Start an authorization flow whose callback points at this gateway.
    pub fn start_authorization(&self) -> Result<AuthorizationFlow, AuthFlowError> {
        self.state.auth.start_flow(&self.public_url())
    }

    /// URL the outside world should use to reach this gateway.
    pub fn public_url(&self) -> String {
        self.state.public_url()
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhook", any(webhook::webhook_handler))
            .route("/callback", get(auth::callback_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind, serve, and bring up the tunnel if one is wanted.
    ///
    /// Tunnel failure is logged; the gateway keeps serving locally.
    pub async fn start(&self) -> Result<GatewayHandle, GatewayError> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        self.state.endpoint.write().port = local_addr.port();
        info!(addr = %local_addr, "gateway listening");

        let token = CancellationToken::new();
        let router = self.router();
        let shutdown = token.clone();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "gateway server exited with error");
            }
        });

        let tunnel = self.open_tunnel(local_addr.port()).await;
        info!(public_url = %self.public_url(), "gateway ready");

        Ok(GatewayHandle {
            local_addr,
            token,
            serve,
            tunnel,
            endpoint: Arc::clone(&self.state.endpoint),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    async fn open_tunnel(&self, port: u16) -> Option<Arc<dyn Tunnel>> {
        let config = &self.state.config;
        if !config.wants_tunnel() {
            return None;
        }
        let Some(tunnel) = &self.tunnel else {
            debug!("tunnel credential set but no tunnel provider installed");
            return None;
        };
        let auth_token = config.tunnel_auth_token.as_deref().unwrap_or_default();
        match tunnel.start(port, auth_token).await {
            Ok(url) => {
                info!(url = %url, "tunnel established");
                self.state.endpoint.write().tunnel_url = Some(url);
                Some(Arc::clone(tunnel))
            }
            Err(e) => {
                warn!(error = %e, "tunnel unavailable, serving on local address only");
                None
            }
        }
    }
}

/// A running gateway.
pub struct GatewayHandle {
    local_addr: SocketAddr,
    token: CancellationToken,
    serve: JoinHandle<()>,
    tunnel: Option<Arc<dyn Tunnel>>,
    endpoint: Arc<RwLock<Endpoint>>,
    shutdown_timeout: std::time::Duration,
}

impl GatewayHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Public tunnel URL, if a tunnel is up.
    pub fn tunnel_url(&self) -> Option<String> {
        self.endpoint.read().tunnel_url.clone()
    }

    /// Close the tunnel, then the listener.
    ///
    /// In-flight requests get up to the configured shutdown timeout.
    pub async fn shutdown(self) {
        if let Some(tunnel) = &self.tunnel {
            match tunnel.stop().await {
                Ok(()) => info!("tunnel closed"),
                Err(e) => warn!(error = %e, "tunnel close failed"),
            }
            self.endpoint.write().tunnel_url = None;
        }

        self.token.cancel();
        match tokio::time::timeout(self.shutdown_timeout, self.serve).await {
            Ok(Ok(())) => info!("gateway stopped"),
            Ok(Err(e)) => warn!(error = %e, "gateway task ended abnormally"),
            Err(_) => warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "gateway shutdown timed out"
            ),
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.tenants.len(),
        state.auth.pending_count(),
        state.public_url(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::counting;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_gateway() -> Gateway {
        Gateway::new(GatewayConfig {
            port: 0,
            ..GatewayConfig::default()
        })
    }

    fn post(uri: &str, signature: Option<&str>, body: &'static str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(sig) = signature {
            builder = builder.header("X-Webhook-Signature", sig);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn first_matching_tenant_gets_delivery() {
        let gateway = make_gateway();
        let (a, b, c) = (counting("sig-a"), counting("sig-b"), counting("sig-c"));
        gateway.register_tenant("A", a.clone());
        gateway.register_tenant("B", b.clone());
        gateway.register_tenant("C", c.clone());

        let resp = gateway
            .router()
            .oneshot(post("/webhook", Some("sig-b"), "{}"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn missing_signature_is_400_without_verifying() {
        let gateway = make_gateway();
        let a = counting("sig-a");
        gateway.register_tenant("A", a.clone());

        let resp = gateway
            .router()
            .oneshot(post("/webhook", None, "{}"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "Missing signature");
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn unmatched_signature_is_401() {
        let gateway = make_gateway();
        gateway.register_tenant("A", counting("sig-a"));
        let resp = gateway
            .router()
            .oneshot(post("/webhook", Some("forged"), "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn no_tenants_is_401() {
        let resp = make_gateway()
            .router()
            .oneshot(post("/webhook", Some("x"), "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_post_is_405() {
        let gateway = make_gateway();
        let a = counting("sig-a");
        gateway.register_tenant("A", a.clone());
        for method in ["GET", "PUT", "DELETE"] {
            let req = Request::builder()
                .method(method)
                .uri("/webhook")
                .header("X-Webhook-Signature", "sig-a")
                .body(Body::empty())
                .unwrap();
            let resp = gateway.router().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let gateway = Gateway::new(GatewayConfig {
            port: 0,
            max_body_bytes: 4,
            ..GatewayConfig::default()
        });
        let a = counting("sig-a");
        gateway.register_tenant("A", a.clone());
        let resp = gateway
            .router()
            .oneshot(post("/webhook", Some("sig-a"), "far too long"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn streamed_body_over_limit_is_bad_request() {
        let gateway = Gateway::new(GatewayConfig {
            port: 0,
            max_body_bytes: 4,
            ..GatewayConfig::default()
        });
        let a = counting("sig-a");
        gateway.register_tenant("A", a.clone());
        let chunks = futures::stream::iter([
            Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"far ")),
            Ok(bytes::Bytes::from_static(b"too long")),
        ]);
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Webhook-Signature", "sig-a")
            .body(Body::from_stream(chunks))
            .unwrap();
        let resp = gateway.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn valid_callback_resolves_flow() {
        let gateway = make_gateway();
        let flow = gateway.start_authorization().unwrap();

        let resp = gateway
            .router()
            .oneshot(get_req("/callback?token=tok&workspaceId=ws&workspaceName=Acme"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("Connected to Acme"));
        let creds = flow.pending.wait().await.unwrap();
        assert_eq!(creds.token, "tok");
        assert_eq!(creds.workspace_id, "ws");
    }

    #[tokio::test]
    async fn incomplete_callback_rejects_all_flows() {
        let gateway = make_gateway();
        let f1 = gateway.start_authorization().unwrap();
        let f2 = gateway.start_authorization().unwrap();

        let resp = gateway
            .router()
            .oneshot(get_req("/callback?token=tok&workspaceId=ws"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("Authorization failed"));
        assert_eq!(f1.pending.wait().await, Err(AuthFlowError::InvalidCallback));
        assert_eq!(f2.pending.wait().await, Err(AuthFlowError::InvalidCallback));
        assert_eq!(gateway.auth_flows().pending_count(), 0);
    }

    #[tokio::test]
    async fn callback_handler_runs_even_without_pending_flow() {
        struct Recorder(tokio::sync::mpsc::UnboundedSender<String>);

        #[async_trait::async_trait]
        impl CallbackHandler for Recorder {
            async fn on_callback(&self, cb: &auth::AuthCallback) -> Result<(), AuthFlowError> {
                let _ = self.0.send(cb.workspace_name.clone());
                Err(AuthFlowError::Handler("disk full".into()))
            }
        }

        let gateway = make_gateway();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        gateway.set_callback_handler(Arc::new(Recorder(tx)));

        let resp = gateway
            .router()
            .oneshot(get_req("/callback?token=t&workspaceId=w&workspaceName=Acme"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(seen.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let gateway = make_gateway();
        gateway.register_tenant("A", counting("a"));
        let _flow = gateway.start_authorization().unwrap();

        let resp = gateway.router().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["tenants"], 1);
        assert_eq!(parsed["pendingAuthFlows"], 1);
        assert_eq!(parsed["publicUrl"], "http://127.0.0.1:0");
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = make_gateway().router().oneshot(get_req("/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn public_url_precedence() {
        let mut config = GatewayConfig {
            port: 3456,
            ..GatewayConfig::default()
        };
        let mut endpoint = Endpoint {
            port: 4000,
            tunnel_url: None,
        };
        assert_eq!(resolve_public_url(&config, &endpoint), "http://127.0.0.1:4000");

        config.base_url = Some("https://conductor.example.test/".into());
        assert_eq!(resolve_public_url(&config, &endpoint), "https://conductor.example.test");

        endpoint.tunnel_url = Some("https://abc.tunnel.test".into());
        assert_eq!(resolve_public_url(&config, &endpoint), "https://abc.tunnel.test");
    }

    #[test]
    fn tenant_management() {
        let gateway = make_gateway();
        gateway.register_tenant("A", counting("a"));
        gateway.register_tenant("A", counting("b"));
        assert_eq!(gateway.tenant_count(), 1);
        assert!(gateway.unregister_tenant("A"));
        assert_eq!(gateway.tenant_count(), 0);
    }
}
