//! Authorization redirect flows.
//!
//! A caller starts a flow, sends the user to the returned URL, and awaits the
//! [`PendingAuthorization`]. When the provider redirects back to `/callback`
//! with a token and workspace fields, the **oldest** pending flow is
//! resolved. The callback carries nothing identifying its flow, so with two
//! flows outstanding the first callback always lands on the first flow, even
//! if it belongs to the second. Threading a flow ID through the authorization
//! URL and back would close that gap.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use conductor_core::FlowId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::AuthFlowError;
use crate::pages;
use crate::server::AppState;

/// Credentials delivered by a successful callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCallback {
    /// Access token issued by the provider.
    pub token: String,
    /// Workspace the token is scoped to.
    pub workspace_id: String,
    /// Display name of that workspace.
    pub workspace_name: String,
}

/// Side effect run for every valid callback, e.g. persisting the token.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Handle the credentials. Failure is logged only.
    async fn on_callback(&self, callback: &AuthCallback) -> Result<(), AuthFlowError>;
}

type FlowReply = Result<AuthCallback, AuthFlowError>;

struct PendingFlow {
    id: FlowId,
    reply: oneshot::Sender<FlowReply>,
    timeout: JoinHandle<()>,
}

/// A started flow: where to send the user, and what to await.
#[derive(Debug)]
pub struct AuthorizationFlow {
    /// Flow identifier, for logs.
    pub id: FlowId,
    /// Provider URL carrying our callback address.
    pub url: Url,
    /// Resolves when a callback lands or the flow times out.
    pub pending: PendingAuthorization,
}

/// Awaitable result of one flow.
#[derive(Debug)]
pub struct PendingAuthorization {
    id: FlowId,
    rx: oneshot::Receiver<FlowReply>,
}

impl PendingAuthorization {
    /// The flow this belongs to.
    pub fn id(&self) -> &FlowId {
        &self.id
    }

    /// Wait for the callback.
    pub async fn wait(self) -> Result<AuthCallback, AuthFlowError> {
        self.rx.await.unwrap_or(Err(AuthFlowError::Cancelled))
    }
}

/// Pending flows, oldest first.
pub struct AuthFlows {
    provider_base_url: String,
    timeout: Duration,
    pending: Arc<Mutex<VecDeque<PendingFlow>>>,
    handler: RwLock<Option<Arc<dyn CallbackHandler>>>,
}

impl AuthFlows {
    /// Flows pointing at `provider_base_url`, each timing out after `timeout`.
    pub fn new(provider_base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider_base_url: provider_base_url.into(),
            timeout,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            handler: RwLock::new(None),
        }
    }

    /// Install the callback side effect, replacing any previous one.
    pub fn set_handler(&self, handler: Arc<dyn CallbackHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Number of flows awaiting a callback.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Start a flow whose callback goes to `{public_url}/callback`.
    ///
    /// Must be called from within a tokio runtime; the timeout runs as a
    /// spawned task.
    pub fn start_flow(&self, public_url: &str) -> Result<AuthorizationFlow, AuthFlowError> {
        let url = authorization_url(&self.provider_base_url, public_url)?;
        let id = FlowId::new();
        let (reply, rx) = oneshot::channel();

        let timeout = tokio::spawn(expire_flow(
            Arc::clone(&self.pending),
            id.clone(),
            self.timeout,
        ));
        self.pending.lock().push_back(PendingFlow {
            id: id.clone(),
            reply,
            timeout,
        });
        info!(flow_id = %id, "authorization flow started");

        Ok(AuthorizationFlow {
            id: id.clone(),
            url,
            pending: PendingAuthorization { id, rx },
        })
    }

    /// Resolve the oldest pending flow whose caller is still waiting.
    /// Returns the resolved flow's ID.
    pub fn resolve_oldest(&self, callback: &AuthCallback) -> Option<FlowId> {
        let mut pending = self.pending.lock();
        while let Some(flow) = pending.pop_front() {
            flow.timeout.abort();
            if flow.reply.send(Ok(callback.clone())).is_ok() {
                info!(flow_id = %flow.id, workspace_id = %callback.workspace_id, "authorization flow resolved");
                return Some(flow.id);
            }
            debug!(flow_id = %flow.id, "abandoned authorization flow skipped");
        }
        None
    }

    /// Reject and remove every pending flow. Returns how many there were.
    pub fn reject_all(&self, error: &AuthFlowError) -> usize {
        let drained: Vec<PendingFlow> = self.pending.lock().drain(..).collect();
        for flow in &drained {
            flow.timeout.abort();
        }
        let count = drained.len();
        for flow in drained {
            let _ = flow.reply.send(Err(error.clone()));
        }
        if count > 0 {
            warn!(count, error = %error, "pending authorization flows rejected");
        }
        count
    }

    fn handler(&self) -> Option<Arc<dyn CallbackHandler>> {
        self.handler.read().clone()
    }
}

async fn expire_flow(pending: Arc<Mutex<VecDeque<PendingFlow>>>, id: FlowId, after: Duration) {
    tokio::time::sleep(after).await;
    let expired = {
        let mut pending = pending.lock();
        pending
            .iter()
            .position(|f| f.id == id)
            .and_then(|index| pending.remove(index))
    };
    if let Some(flow) = expired {
        warn!(flow_id = %flow.id, timeout_secs = after.as_secs(), "authorization flow timed out");
        let _ = flow.reply.send(Err(AuthFlowError::Timeout(after)));
    }
}

fn authorization_url(provider_base_url: &str, public_url: &str) -> Result<Url, AuthFlowError> {
    let mut url =
        Url::parse(provider_base_url).map_err(|e| AuthFlowError::InvalidUrl(e.to_string()))?;
    let callback = format!("{}/callback", public_url.trim_end_matches('/'));
    let _ = url.query_pairs_mut().append_pair("callback", &callback);
    Ok(url)
}

// ── Callback endpoint ───────────────────────────────────────────────

/// Raw callback query; every field is optional so a partial callback can be
/// answered with the error page instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CallbackParams {
    token: Option<String>,
    workspace_id: Option<String>,
    workspace_name: Option<String>,
}

impl CallbackParams {
    fn into_callback(self) -> Option<AuthCallback> {
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        Some(AuthCallback {
            token: present(self.token)?,
            workspace_id: present(self.workspace_id)?,
            workspace_name: present(self.workspace_name)?,
        })
    }
}

/// GET /callback
pub(crate) async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    let flows = &state.auth;
    let Some(callback) = params.into_callback() else {
        let _ = flows.reject_all(&AuthFlowError::InvalidCallback);
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::error_page("The authorization response was missing required fields.")),
        );
    };

    if flows.resolve_oldest(&callback).is_none() {
        debug!(workspace_id = %callback.workspace_id, "callback arrived with no pending flow");
    }

    if let Some(handler) = flows.handler() {
        let callback = callback.clone();
        let _ = tokio::spawn(async move {
            if let Err(e) = handler.on_callback(&callback).await {
                warn!(workspace_id = %callback.workspace_id, error = %e, "callback handler failed");
            }
        });
    }

    (
        StatusCode::OK,
        Html(pages::success_page(&callback.workspace_name)),
    )
}
