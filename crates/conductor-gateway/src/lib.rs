//! # conductor-gateway
//!
//! The only network-facing component: one listener serving
//!
//! - `POST /webhook`: signed events, multiplexed over registered tenants
//!   ([`tenant`]); the first tenant whose verifier accepts gets the event
//! - `GET /callback`: authorization redirects, resolving pending
//!   [`auth`] flows
//! - `GET /health`
//!
//! An optional [`Tunnel`] exposes the listener publicly. Its failure never
//! stops the gateway from serving locally.
//!
//! The gateway knows nothing about orchestrations. Tenants built with
//! [`ForwardingTenant`] hand verified bodies to an mpsc channel as
//! `InboundDelivery` values; whoever holds the receiving end routes them.

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod pages;
pub mod server;
pub mod tenant;
pub mod tunnel;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testutil;

pub use auth::{AuthCallback, AuthFlows, AuthorizationFlow, CallbackHandler, PendingAuthorization};
pub use config::GatewayConfig;
pub use errors::{AuthFlowError, GatewayError, TunnelError};
pub use server::{Gateway, GatewayHandle};
pub use tenant::{ForwardingTenant, HmacSignature, TenantRegistry, TenantVerifier};
pub use tunnel::Tunnel;
