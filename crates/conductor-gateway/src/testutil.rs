//! Test doubles shared by the gateway's unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::GatewayError;
use crate::tenant::TenantVerifier;

/// Accepts exactly one signature and counts how often it was asked.
pub(crate) struct CountingVerifier {
    accepts: &'static str,
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantVerifier for CountingVerifier {
    async fn verify(
        &self,
        _body: &Bytes,
        signature: &str,
        _timestamp: Option<&str>,
    ) -> Result<bool, GatewayError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(signature == self.accepts)
    }
}

pub(crate) fn counting(accepts: &'static str) -> Arc<CountingVerifier> {
    Arc::new(CountingVerifier {
        accepts,
        calls: AtomicUsize::new(0),
    })
}
