//! switchboard-core
//!
//! Core types, traits, and utilities shared across the switchboard gateway.
//!
//! - `request` / `response`: the canonical, provider-independent shapes.
//! - `adapter`: the `ProviderAdapter` trait and capability provider traits.
//! - `error`: the canonical error taxonomy surfaced to clients.
//! - `stream`: stream events and the handle contract for live streams.
//! - `fingerprint`: stable hashing of normalized requests for caching.
//! - `analyzer`: request complexity analysis feeding the router.
#![warn(missing_docs)]

/// Adapter capability traits and the primary `ProviderAdapter` interface.
pub mod adapter;
/// Request complexity analysis (token estimate, task kind, volatility).
pub mod analyzer;
/// Per-request context: ids, deadline, cancellation.
pub mod context;
/// Canonical error taxonomy shared by the pipeline and adapters.
pub mod error;
/// Request normalization and fingerprinting.
pub mod fingerprint;
/// Canonical request shapes.
pub mod request;
/// Canonical response shapes.
pub mod response;
/// Stream events and handles for long-lived streaming tasks.
pub mod stream;

pub use adapter::{
    ChatProvider, ChatStreamProvider, EmbedProvider, ImageProvider, ProviderAdapter,
    SpeechToTextProvider, TextToSpeechProvider,
};
pub use analyzer::{AnalyzerConfig, RoutingHint, TaskKind, analyze};
pub use context::{CancelHandle, CancelToken, RequestContext, cancel_pair};
pub use error::GatewayError;
pub use fingerprint::{Fingerprint, fingerprint};
pub use request::{
    CanonicalRequest, ChatMessage, ChatRequest, DecodingParams, EmbedRequest, ImageRequest,
    ModelHint, RequestKind, Role, SttRequest, TtsRequest,
};
pub use response::{
    CanonicalResponse, ChatCompletion, Embedding, FinishReason, ImageJob, JobStatus, SpeechAudio,
    TokenUsage, ToolCall, Transcript,
};
pub use stream::{StreamEvent, StreamHandle, event_channel};

pub use switchboard_types as types;
pub use switchboard_types::Capability;
