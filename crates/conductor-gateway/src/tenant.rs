//! Tenants sharing the signed-event endpoint.
//!
//! Each tenant is an opaque token plus a [`TenantVerifier`]. For every
//! request the registry asks verifiers in registration order and stops at
//! the first that accepts. A verifier therefore sees bodies meant for other
//! tenants and must not act on a body before its own signature check passes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use conductor_core::InboundDelivery;
use futures::FutureExt;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Decides whether a signed body belongs to a tenant.
#[async_trait]
pub trait TenantVerifier: Send + Sync {
    /// Return `Ok(true)` to claim the request. Any tenant-specific side
    /// effect happens here, after the signature is confirmed.
    async fn verify(
        &self,
        body: &Bytes,
        signature: &str,
        timestamp: Option<&str>,
    ) -> Result<bool, GatewayError>;
}

#[derive(Clone)]
struct Tenant {
    token: String,
    verifier: Arc<dyn TenantVerifier>,
}

/// Ordered set of tenants.
#[derive(Default)]
pub struct TenantRegistry {
    tenants: RwLock<Vec<Tenant>>,
}

impl TenantRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tenant. Re-registering a token swaps its verifier in place and
    /// keeps its position.
    pub fn register(&self, token: impl Into<String>, verifier: Arc<dyn TenantVerifier>) {
        let token = token.into();
        let mut tenants = self.tenants.write();
        if let Some(existing) = tenants.iter_mut().find(|t| t.token == token) {
            existing.verifier = verifier;
            debug!(tenant = %token, "tenant verifier replaced");
        } else {
            debug!(tenant = %token, "tenant registered");
            tenants.push(Tenant { token, verifier });
        }
    }

    /// Remove a tenant. Returns whether it existed.
    pub fn unregister(&self, token: &str) -> bool {
        let mut tenants = self.tenants.write();
        let before = tenants.len();
        tenants.retain(|t| t.token != token);
        before != tenants.len()
    }

    /// Number of registered tenants.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    /// Whether no tenants are registered.
    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }

    /// Tenant tokens in registration order.
    pub fn tokens(&self) -> Vec<String> {
        self.tenants.read().iter().map(|t| t.token.clone()).collect()
    }

    /// Offer the request to each tenant in order; return the token of the
    /// first that accepts.
    ///
    /// A verifier that errors or panics is logged and skipped.
    pub async fn dispatch(
        &self,
        body: &Bytes,
        signature: &str,
        timestamp: Option<&str>,
    ) -> Option<String> {
        // Snapshot so no lock is held across verifier awaits.
        let tenants = self.tenants.read().clone();
        for tenant in tenants {
            let attempt = AssertUnwindSafe(tenant.verifier.verify(body, signature, timestamp))
                .catch_unwind()
                .await;
            match attempt {
                Ok(Ok(true)) => return Some(tenant.token),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(tenant = %tenant.token, error = %e, "tenant verifier failed"),
                Err(_) => warn!(tenant = %tenant.token, "tenant verifier panicked"),
            }
        }
        None
    }
}

// ── HMAC signatures ─────────────────────────────────────────────────

/// HMAC-SHA256 over the raw body, hex encoded.
///
/// Signatures may carry a `sha256=` prefix. With a tolerance set, a
/// timestamp (unix seconds or milliseconds) must accompany the request and
/// lie within the tolerance of now.
#[derive(Clone)]
pub struct HmacSignature {
    secret: Vec<u8>,
    tolerance: Option<Duration>,
}

impl HmacSignature {
    /// Verifier for `secret` with no timestamp requirement.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance: None,
        }
    }

    /// Require a fresh timestamp.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Hex signature of `body` under this secret.
    pub fn sign(&self, body: &[u8]) -> String {
        self.mac(body)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Check `signature` against `body` in constant time.
    pub fn verify(&self, body: &[u8], signature: &str, timestamp: Option<&str>) -> bool {
        if let Some(tolerance) = self.tolerance {
            if !timestamp.is_some_and(|ts| is_fresh(ts, tolerance)) {
                return false;
            }
        }
        let hex_sig = signature.trim();
        let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
        let Ok(expected) = hex::decode(hex_sig) else {
            return false;
        };
        self.mac(body)
            .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    }

    fn mac(&self, body: &[u8]) -> Option<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret).ok()?;
        mac.update(body);
        Some(mac)
    }
}

fn is_fresh(timestamp: &str, tolerance: Duration) -> bool {
    let Ok(raw) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    // Values this large are milliseconds.
    let millis = if raw > 100_000_000_000 { raw } else { raw.saturating_mul(1000) };
    let skew = Utc::now().timestamp_millis().abs_diff(millis);
    u128::from(skew) <= tolerance.as_millis()
}

/// Tenant that forwards verified bodies into a channel as
/// [`InboundDelivery`] values.
pub struct ForwardingTenant {
    name: String,
    signature: HmacSignature,
    sink: mpsc::Sender<InboundDelivery>,
}

impl ForwardingTenant {
    /// Forward bodies signed with `signature` to `sink`, tagged `name`.
    pub fn new(
        name: impl Into<String>,
        signature: HmacSignature,
        sink: mpsc::Sender<InboundDelivery>,
    ) -> Self {
        Self {
            name: name.into(),
            signature,
            sink,
        }
    }
}

#[async_trait]
impl TenantVerifier for ForwardingTenant {
    async fn verify(
        &self,
        body: &Bytes,
        signature: &str,
        timestamp: Option<&str>,
    ) -> Result<bool, GatewayError> {
        if !self.signature.verify(body, signature, timestamp) {
            return Ok(false);
        }
        self.sink
            .send(InboundDelivery::new(self.name.clone(), body.clone()))
            .await
            .map_err(|_| GatewayError::Internal(format!("delivery sink for {} closed", self.name)))?;
        Ok(true)
    }
}
