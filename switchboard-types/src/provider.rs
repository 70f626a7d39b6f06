//! Provider and model configuration records.

use bitflags::bitflags;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::price::PriceEntry;

/// Typed key identifying a configured provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Construct a new provider id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Typed key identifying a model within a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Construct a new model id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Wire-protocol family spoken by a provider.
///
/// The family selects which adapter crate translates canonical requests for
/// this provider; the base URL and auth scheme parameterize the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum WireFamily {
    /// OpenAI-style `/v1/chat/completions` and friends. Covers most hosted
    /// and self-hosted inference servers.
    OpenAiCompatible,
    /// Anthropic `/v1/messages`.
    Anthropic,
    /// Google Gemini `generateContent` / `streamGenerateContent`.
    Gemini,
}

impl WireFamily {
    /// Stable identifier for logs and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "openai-compatible",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for WireFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the upstream key is presented to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    #[default]
    Bearer,
    /// `x-api-key: <key>` header.
    XApiKey,
    /// `?key=<key>` query parameter.
    QueryParam,
}

bitflags! {
    /// Model capability flags consulted during routing.
    ///
    /// Serde impls come from the bitflags `serde` feature and use the
    /// human-readable `"VISION | TOOL_USE"` form.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ModelCaps: u8 {
        /// Accepts image inputs.
        const VISION = 1 << 0;
        /// Supports tool/function calling.
        const TOOL_USE = 1 << 1;
        /// Context window of at least 100K tokens.
        const LONG_CONTEXT = 1 << 2;
    }
}

impl Default for ModelCaps {
    fn default() -> Self {
        Self::empty()
    }
}

/// Per-model metadata carried by a provider's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier as the provider knows it.
    pub id: ModelId,
    /// Maximum context length in tokens.
    pub context_length: u32,
    /// Maximum output tokens per completion.
    pub max_output_tokens: u32,
    /// Capability flags (vision, tool use, long context).
    #[serde(default)]
    pub capabilities: ModelCaps,
    /// Curated quality tier, higher is better. Used by the `quality_first`
    /// routing strategy.
    #[serde(default)]
    pub quality_tier: u8,
    /// Pricing for this model.
    pub pricing: PriceEntry,
}

/// A configured upstream provider.
///
/// Created at config load; mutated only through control-plane writes, which
/// publish a fresh config snapshot. In-flight requests keep the snapshot they
/// captured, so a provider is never destroyed under a live request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable provider identifier used in routing and telemetry.
    pub id: ProviderId,
    /// Wire-protocol family.
    pub family: WireFamily,
    /// Base URL for the provider's API.
    pub base_url: String,
    /// How upstream keys are presented.
    #[serde(default)]
    pub auth: AuthScheme,
    /// Deployment region label, informational.
    #[serde(default)]
    pub region: Option<String>,
    /// Models served by this provider.
    pub models: Vec<ModelConfig>,
}

impl ProviderConfig {
    /// Look up a model by id.
    #[must_use]
    pub fn model(&self, id: &ModelId) -> Option<&ModelConfig> {
        self.models.iter().find(|m| &m.id == id)
    }
}
