use serde::{Deserialize, Serialize};
use switchboard_types::QuotaWindow;
use thiserror::Error;

/// Unified error type for the switchboard workspace.
///
/// Every variant maps to a stable client-visible code and an HTTP status.
/// The pipeline additionally consults [`is_transient`](Self::is_transient)
/// for retry/fallback eligibility and
/// [`counts_for_breaker`](Self::counts_for_breaker) for circuit accounting.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
#[non_exhaustive]
pub enum GatewayError {
    /// No tenant key was presented.
    #[error("missing api key")]
    AuthMissing,

    /// The presented tenant key is unknown or expired.
    #[error("invalid api key")]
    AuthInvalid,

    /// The tenant lacks permission for the requested provider/model.
    #[error("permission denied: {what}")]
    PermissionDenied {
        /// What was requested, e.g. "provider alpha" or "model gpt-x".
        what: String,
    },

    /// A quota window rejected the request.
    #[error("quota exceeded: {scope} {window} limit {limit}, retry in {retry_after_secs}s")]
    QuotaExceeded {
        /// Which track rejected: "tenant" or "upstream-key".
        scope: String,
        /// The rejecting window. When several windows reject at once this is
        /// the one with the earliest reset.
        window: QuotaWindow,
        /// The configured limit that was hit.
        limit: u64,
        /// Whole seconds until the window resets.
        retry_after_secs: u64,
    },

    /// The request body failed validation at the edge.
    #[error("invalid request: {field}: {message}")]
    Validation {
        /// Offending field path.
        field: String,
        /// Human-readable reason.
        message: String,
    },

    /// Routing produced no eligible candidate.
    #[error("no candidate for {capability}")]
    NoCandidate {
        /// Capability label that could not be routed.
        capability: String,
    },

    /// An upstream call exceeded its deadline.
    #[error("upstream timed out: {provider}")]
    UpstreamTimeout {
        /// Provider that timed out.
        provider: String,
    },

    /// The upstream could not be reached (connect/transport failure).
    #[error("upstream unavailable: {provider}: {message}")]
    UpstreamUnavailable {
        /// Provider that was unreachable.
        provider: String,
        /// Transport-level detail.
        message: String,
    },

    /// The upstream returned 429.
    #[error("upstream rate limited: {provider}")]
    UpstreamRateLimited {
        /// Provider that rejected.
        provider: String,
        /// Upstream-provided retry hint, when present.
        retry_after_secs: Option<u64>,
    },

    /// The upstream rejected the request with a 4xx other than 429.
    #[error("upstream client error: {provider} status {status}: {message}")]
    UpstreamClientError {
        /// Provider that rejected.
        provider: String,
        /// Upstream HTTP status.
        status: u16,
        /// Upstream-provided detail.
        message: String,
    },

    /// The upstream failed with a 5xx.
    #[error("upstream server error: {provider} status {status}: {message}")]
    UpstreamServerError {
        /// Provider that failed.
        provider: String,
        /// Upstream HTTP status.
        status: u16,
        /// Upstream-provided detail.
        message: String,
    },

    /// A cache-coalesced waiter inherited the leader's failure.
    #[error("shared upstream call failed")]
    MissThenFailed,

    /// The per-tenant concurrent stream cap was hit.
    #[error("too many concurrent streams (limit {limit})")]
    StreamLimit {
        /// Configured cap.
        limit: u32,
    },

    /// The request was cancelled by the client before completion.
    #[error("request cancelled")]
    Cancelled,

    /// Anything the taxonomy does not cover; logged with full context.
    #[error("internal error: {message}")]
    Internal {
        /// Sanitized description.
        message: String,
    },
}

impl GatewayError {
    /// Helper: build a `Validation` error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Helper: build a `PermissionDenied` error.
    pub fn permission(what: impl Into<String>) -> Self {
        Self::PermissionDenied { what: what.into() }
    }

    /// Helper: build a `NoCandidate` error.
    pub fn no_candidate(capability: impl Into<String>) -> Self {
        Self::NoCandidate {
            capability: capability.into(),
        }
    }

    /// Helper: build an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Helper: build an `UpstreamUnavailable` error.
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Stable client-visible error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthMissing => "auth.missing",
            Self::AuthInvalid => "auth.invalid",
            Self::PermissionDenied { .. } => "permission.denied",
            Self::QuotaExceeded { .. } | Self::StreamLimit { .. } => "quota.exceeded",
            Self::Validation { .. } => "validation.invalid",
            Self::NoCandidate { .. } => "route.no_candidate",
            Self::UpstreamTimeout { .. } => "upstream.timeout",
            Self::UpstreamUnavailable { .. } => "upstream.unavailable",
            Self::UpstreamRateLimited { .. } => "upstream.rate_limited",
            Self::UpstreamClientError { .. } => "upstream.client_error",
            Self::UpstreamServerError { .. } => "upstream.server_error",
            Self::MissThenFailed => "cache.miss_then_failed",
            Self::Cancelled | Self::Internal { .. } => "internal.unexpected",
        }
    }

    /// Matching HTTP status for the client response.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::AuthMissing | Self::AuthInvalid => 401,
            Self::PermissionDenied { .. } => 403,
            Self::QuotaExceeded { .. }
            | Self::StreamLimit { .. }
            | Self::UpstreamRateLimited { .. } => 429,
            Self::Validation { .. } | Self::UpstreamClientError { .. } => 400,
            Self::NoCandidate { .. }
            | Self::UpstreamUnavailable { .. }
            | Self::UpstreamServerError { .. }
            | Self::MissThenFailed => 502,
            Self::UpstreamTimeout { .. } => 504,
            Self::Cancelled | Self::Internal { .. } => 500,
        }
    }

    /// Seconds the client should wait before retrying, when known.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::QuotaExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            Self::UpstreamRateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// True for failures worth retrying or failing over: network trouble,
    /// timeouts, upstream 5xx, and upstream rate limits.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. }
                | Self::UpstreamUnavailable { .. }
                | Self::UpstreamServerError { .. }
                | Self::UpstreamRateLimited { .. }
        )
    }

    /// True for failures that feed the circuit breaker.
    ///
    /// Upstream 4xx (including 429) never open a breaker: they indicate a
    /// problem with the request or our quota, not with the target's health.
    #[must_use]
    pub const fn counts_for_breaker(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. }
                | Self::UpstreamUnavailable { .. }
                | Self::UpstreamServerError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(GatewayError::AuthMissing.code(), "auth.missing");
        assert_eq!(
            GatewayError::no_candidate("chat").code(),
            "route.no_candidate"
        );
        assert_eq!(GatewayError::MissThenFailed.code(), "cache.miss_then_failed");
    }

    #[test]
    fn rate_limits_are_transient_but_do_not_open_breakers() {
        let e = GatewayError::UpstreamRateLimited {
            provider: "alpha".into(),
            retry_after_secs: Some(2),
        };
        assert!(e.is_transient());
        assert!(!e.counts_for_breaker());
    }

    #[test]
    fn client_errors_are_terminal() {
        let e = GatewayError::UpstreamClientError {
            provider: "alpha".into(),
            status: 422,
            message: "bad field".into(),
        };
        assert!(!e.is_transient());
        assert!(!e.counts_for_breaker());
        assert_eq!(e.http_status(), 400);
    }
}
