//! Request normalization and fingerprinting.
//!
//! A fingerprint is a stable SHA-256 over the normalized request: kind tag,
//! lowercased model hint, whitespace-collapsed message text, and the
//! enumerated decoding parameters. Caller metadata (request id, trace id,
//! timestamps) never reaches the hasher, so identical payloads from
//! different requests collide by construction.

use core::fmt;
use sha2::{Digest, Sha256};

use crate::request::{CanonicalRequest, DecodingParams};

/// A 32-byte request fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hex rendering, used as the cache key and in telemetry.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the fingerprint of a canonical request.
#[must_use]
pub fn fingerprint(req: &CanonicalRequest) -> Fingerprint {
    let mut h = Hasher::new();
    h.field("kind", req.kind().as_str());
    h.field("model", &req.model_hint().as_str().to_lowercase());

    match req {
        CanonicalRequest::Chat(c) => {
            h.field("stream", if c.stream { "1" } else { "0" });
            params(&mut h, &c.params);
            for m in &c.messages {
                h.field(m.role.as_str(), &collapse_ws(&m.content));
            }
        }
        CanonicalRequest::Embed(e) => {
            for input in &e.input {
                h.field("input", &collapse_ws(input));
            }
        }
        CanonicalRequest::Image(i) => {
            h.field("prompt", &collapse_ws(&i.prompt));
            h.field("count", &i.count.to_string());
            if let Some(size) = &i.size {
                h.field("size", size);
            }
        }
        CanonicalRequest::SpeechToText(s) => {
            h.bytes("audio", &s.audio);
            h.field("mime", &s.mime);
            if let Some(lang) = &s.language {
                h.field("language", lang);
            }
        }
        CanonicalRequest::TextToSpeech(t) => {
            h.field("text", &collapse_ws(&t.text));
            if let Some(voice) = &t.voice {
                h.field("voice", voice);
            }
            if let Some(format) = &t.format {
                h.field("format", format);
            }
        }
    }

    Fingerprint(h.finish())
}

fn params(h: &mut Hasher, p: &DecodingParams) {
    if let Some(t) = p.temperature {
        // Fixed precision keeps the hash stable across float formatting.
        h.field("temperature", &format!("{t:.4}"));
    }
    if let Some(tp) = p.top_p {
        h.field("top_p", &format!("{tp:.4}"));
    }
    if let Some(m) = p.max_tokens {
        h.field("max_tokens", &m.to_string());
    }
    for s in &p.stop {
        h.field("stop", s);
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Length-prefixed field hashing; prevents ambiguity between adjacent
/// fields ("ab" + "c" vs "a" + "bc").
struct Hasher(Sha256);

impl Hasher {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn field(&mut self, tag: &str, value: &str) {
        self.bytes(tag, value.as_bytes());
    }

    fn bytes(&mut self, tag: &str, value: &[u8]) {
        self.0.update((tag.len() as u64).to_le_bytes());
        self.0.update(tag.as_bytes());
        self.0.update((value.len() as u64).to_le_bytes());
        self.0.update(value);
    }

    fn finish(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ChatMessage, ChatRequest, ModelHint, Role};

    fn chat(content: &str) -> CanonicalRequest {
        CanonicalRequest::Chat(ChatRequest {
            model: ModelHint::new("auto"),
            messages: vec![ChatMessage::new(Role::User, content)],
            params: DecodingParams::default(),
            stream: false,
        })
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(
            fingerprint(&chat("hello   world")),
            fingerprint(&chat("hello world"))
        );
        assert_eq!(
            fingerprint(&chat("  hello world  ")),
            fingerprint(&chat("hello world"))
        );
    }

    #[test]
    fn model_hint_case_is_ignored() {
        let a = CanonicalRequest::Chat(ChatRequest {
            model: ModelHint::new("AUTO"),
            messages: vec![ChatMessage::new(Role::User, "x")],
            params: DecodingParams::default(),
            stream: false,
        });
        assert_eq!(fingerprint(&a), fingerprint(&chat("x")));
    }

    #[test]
    fn different_content_differs() {
        assert_ne!(fingerprint(&chat("a")), fingerprint(&chat("b")));
    }

    #[test]
    fn stream_flag_separates_fingerprints() {
        let mut streaming = chat("x");
        if let CanonicalRequest::Chat(c) = &mut streaming {
            c.stream = true;
        }
        assert_ne!(fingerprint(&streaming), fingerprint(&chat("x")));
    }
}
