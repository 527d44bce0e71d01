//! # proxy-core
//!
//! Engine crate for the broker-proxy: everything between the client-facing
//! gRPC surface and the legacy broker wire protocol except the wire codec
//! and TCP transport themselves, which are consumed behind the
//! [`transport::BrokerTransport`] trait.
//!
//! Modules are layered bottom-up the way `proxy-server` constructs them:
//! transport -> forward pool -> route cache -> selectors -> engines.
//! Nothing here reaches back up into the gRPC layer; canonical
//! request/response types in [`canonical`] are the seam the per-version
//! RPC activities translate against.

#![deny(unsafe_code)]

/// Broker and client address/endpoint parsing and rendering.
pub mod address;

/// Canonical internal request/response types shared by the v1 and v2 RPC
/// surfaces.
pub mod canonical;

/// Runtime configuration loaded from the proxy's JSON config file.
pub mod config;

/// Crate-wide error taxonomy and its mapping to gRPC status codes.
pub mod error;

/// Lazily-created, pooled async broker clients, keyed by role and instance.
pub mod forward;

/// Topic route and queue data types.
pub mod model;

/// The producer-side engine: send, send-back, end-transaction.
pub mod producer;

/// The consumer-side engine: pop/receive, ack, nack, change-invisibility.
pub mod consumer;

/// Receipt-handle encoding/decoding.
pub mod receipt;

/// Broker-initiated back-request relay (transaction check, runtime
/// inspection, direct consume).
pub mod relay;

/// Minimal request/response header shapes for the broker wire codes this
/// proxy issues; the framed codec itself is out of scope.
pub mod remoting;

/// Resilience primitives (retry, circuit breaker, rate limiting) reused
/// across the forward-client pool and the engines.
pub mod resilience;

/// Nack -> invisibility-duration backoff policy.
pub mod retry_policy;

/// Write/read/assignment queue selection.
pub mod select;

/// Graceful shutdown coordination.
pub mod shutdown;

/// Time-bounded, singleflight topic->route cache.
pub mod route_cache;

/// Local-mode / cluster-mode broker transport.
pub mod transport;

/// Per-cluster batched producer-group transaction heartbeat loop.
pub mod tx_heartbeat;

pub use error::{ProxyError, ProxyErrorKind};
