//! Request complexity analysis.
//!
//! A pure function of the canonical request. The output is advisory: the
//! router may override any of it.

use serde::{Deserialize, Serialize};
use switchboard_types::ModelCaps;

use crate::request::{CanonicalRequest, ChatRequest, Role};

/// Inferred task category, from prompt shape and declared parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TaskKind {
    /// One short question, one short answer.
    ShortAnswer,
    /// Multi-turn dialogue.
    Conversation,
    /// Large requested output.
    LongGeneration,
    /// Code writing or review.
    Code,
    /// Reasoning over supplied material.
    Analysis,
    /// Open-ended creative writing.
    Creative,
    /// Language translation.
    Translation,
    /// Condensing supplied material.
    Summarization,
}

impl TaskKind {
    /// Stable identifier for telemetry and routing traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortAnswer => "short_answer",
            Self::Conversation => "conversation",
            Self::LongGeneration => "long_generation",
            Self::Code => "code",
            Self::Analysis => "analysis",
            Self::Creative => "creative",
            Self::Translation => "translation",
            Self::Summarization => "summarization",
        }
    }
}

/// Analyzer output consumed by the router and the cache layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingHint {
    /// Heuristic input token estimate (bytes / 4, rounded up).
    pub estimated_input_tokens: u64,
    /// Inferred task category.
    pub task: TaskKind,
    /// Capabilities the serving model must have.
    pub required: ModelCaps,
    /// True when the prompt references volatile context ("today", "now",
    /// ...); such requests bypass the response cache.
    pub volatile: bool,
}

/// Tunables for the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Lowercased substrings that mark a request as volatile.
    pub volatile_markers: Vec<String>,
    /// `max_tokens` at or above which a request counts as long generation.
    pub long_generation_tokens: u32,
    /// Estimated input tokens above which long-context capability is required.
    pub long_context_tokens: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            volatile_markers: ["today", "now", "current", "latest", "this week"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            long_generation_tokens: 1_024,
            long_context_tokens: 100_000,
        }
    }
}

/// Analyze a canonical request.
#[must_use]
pub fn analyze(req: &CanonicalRequest, cfg: &AnalyzerConfig) -> RoutingHint {
    let estimated_input_tokens = estimate_tokens(req);

    let (task, volatile) = match req {
        CanonicalRequest::Chat(c) => (classify_chat(c, cfg), is_volatile(c, cfg)),
        CanonicalRequest::Embed(_) | CanonicalRequest::SpeechToText(_) => {
            (TaskKind::Analysis, false)
        }
        CanonicalRequest::Image(_) | CanonicalRequest::TextToSpeech(_) => {
            (TaskKind::Creative, false)
        }
    };

    let mut required = ModelCaps::empty();
    if estimated_input_tokens >= cfg.long_context_tokens {
        required |= ModelCaps::LONG_CONTEXT;
    }

    RoutingHint {
        estimated_input_tokens,
        task,
        required,
        volatile,
    }
}

/// Byte-count heuristic: roughly four bytes per token for mixed text.
fn estimate_tokens(req: &CanonicalRequest) -> u64 {
    let bytes: usize = match req {
        CanonicalRequest::Chat(c) => c.messages.iter().map(|m| m.content.len()).sum(),
        CanonicalRequest::Embed(e) => e.input.iter().map(String::len).sum(),
        CanonicalRequest::Image(i) => i.prompt.len(),
        CanonicalRequest::SpeechToText(s) => s.audio.len() / 64,
        CanonicalRequest::TextToSpeech(t) => t.text.len(),
    };
    (bytes as u64).div_ceil(4).max(1)
}

fn classify_chat(c: &ChatRequest, cfg: &AnalyzerConfig) -> TaskKind {
    let user_text: String = c
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    if user_text.contains("translate") || user_text.contains("translation") {
        return TaskKind::Translation;
    }
    if user_text.contains("summari") || user_text.contains("tl;dr") {
        return TaskKind::Summarization;
    }
    if user_text.contains("```")
        || user_text.contains("fn ")
        || user_text.contains("def ")
        || user_text.contains("class ")
        || user_text.contains("stack trace")
    {
        return TaskKind::Code;
    }
    if user_text.contains("write a story")
        || user_text.contains("write a poem")
        || user_text.contains("brainstorm")
    {
        return TaskKind::Creative;
    }
    if user_text.contains("analyze")
        || user_text.contains("analyse")
        || user_text.contains("explain why")
        || user_text.contains("compare")
    {
        return TaskKind::Analysis;
    }
    if c.params
        .max_tokens
        .is_some_and(|m| m >= cfg.long_generation_tokens)
    {
        return TaskKind::LongGeneration;
    }
    if c.messages.len() > 4 {
        return TaskKind::Conversation;
    }
    TaskKind::ShortAnswer
}

fn is_volatile(c: &ChatRequest, cfg: &AnalyzerConfig) -> bool {
    c.messages.iter().any(|m| {
        let lower = m.content.to_lowercase();
        cfg.volatile_markers.iter().any(|mark| lower.contains(mark))
    })
}
