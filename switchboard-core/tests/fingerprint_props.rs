use proptest::prelude::*;

use switchboard_core::request::{
    CanonicalRequest, ChatMessage, ChatRequest, DecodingParams, ModelHint, Role,
};
use switchboard_core::{Fingerprint, fingerprint};

fn chat(model: &str, content: &str, temperature: Option<f32>) -> CanonicalRequest {
    CanonicalRequest::Chat(ChatRequest {
        model: ModelHint::new(model),
        messages: vec![ChatMessage::new(Role::User, content)],
        params: DecodingParams {
            temperature,
            ..DecodingParams::default()
        },
        stream: false,
    })
}

proptest! {
    // Fingerprinting is a pure function: same payload, same hash.
    #[test]
    fn deterministic(content in ".{0,200}") {
        let a = fingerprint(&chat("auto", &content, None));
        let b = fingerprint(&chat("auto", &content, None));
        prop_assert_eq!(a, b);
    }

    // Leading/trailing/internal whitespace runs never change the key.
    #[test]
    fn whitespace_insensitive(words in proptest::collection::vec("[a-z]{1,8}", 1..8)) {
        let tight = words.join(" ");
        let loose = format!("  {}  ", words.join("   "));
        prop_assert_eq!(
            fingerprint(&chat("auto", &tight, None)),
            fingerprint(&chat("auto", &loose, None))
        );
    }

    // Temperature participates in the key: near-misses must not collide.
    #[test]
    fn temperature_distinguishes(t in 0.0f32..1.9f32) {
        let a = fingerprint(&chat("auto", "hello", Some(t)));
        let b = fingerprint(&chat("auto", "hello", Some(t + 0.1)));
        prop_assert_ne!(a, b);
    }

    // Hex rendering is stable and 64 chars.
    #[test]
    fn hex_is_canonical(content in ".{0,50}") {
        let fp: Fingerprint = fingerprint(&chat("auto", &content, None));
        let hex = fp.to_hex();
        prop_assert_eq!(hex.len(), 64);
        prop_assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
