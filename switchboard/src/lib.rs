//! switchboard
//!
//! A multi-provider AI gateway. Clients speak one canonical
//! chat/embed/image/audio surface; the gateway authenticates tenant keys,
//! enforces quotas, routes to an upstream (provider, model, key), caches
//! deterministic responses with stampede protection, drives streaming,
//! breaks circuits, retries within a budget, and accounts every request.
//!
//! - `config`: snapshot-based configuration (file + env + control plane).
//! - `keys`: tenant auth and upstream key selection.
//! - `router`: candidate assembly and strategy scoring.
//! - `pipeline`: the ordered dispatch chain.
//! - `streamhub`: open-stream registry and admin fan-out.
//! - `usage`: append-only accounting and router statistics.
//! - `server`: the two HTTP planes.
#![warn(missing_docs)]

/// Snapshot-based configuration store.
pub mod config;
/// Gateway construction and component wiring.
pub mod core;
/// Async job envelopes for image generation.
pub mod jobs;
/// Tenant authentication and upstream key selection.
pub mod keys;
/// The ordered dispatch pipeline.
pub mod pipeline;
/// Routing decision engine.
pub mod router;
/// HTTP surface (data plane + control plane).
pub mod server;
/// Open-stream registry.
pub mod streamhub;
/// Usage accounting and price telemetry.
pub mod usage;

pub use config::{ConfigSnapshot, ConfigStore, GatewayFile, apply_env, parse_file, snapshot_from_file};
pub use core::{Gateway, GatewayBuilder};
pub use pipeline::{CacheStatus, DispatchOutcome, StreamSession};
pub use router::{Candidate, RoutingDecision};
pub use usage::{Outcome, UsageRecord};
