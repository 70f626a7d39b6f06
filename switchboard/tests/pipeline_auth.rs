mod common;

use common::{bed, bed_with, chat, never_cancel, presented, rid};
use switchboard_core::GatewayError;
use switchboard_types::{ModelId, ProviderId, Secret};

#[tokio::test]
async fn missing_key_is_auth_missing() {
    let bed = bed();
    let err = bed
        .gateway
        .handle(rid(), None, chat("hi"), None, never_cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AuthMissing));
    assert_eq!(err.code(), "auth.missing");
    assert_eq!(err.http_status(), 401);
}

#[tokio::test]
async fn unknown_key_is_auth_invalid() {
    let bed = bed();
    let err = bed
        .gateway
        .handle(
            rid(),
            Some(Secret::new("tk-wrong")),
            chat("hi"),
            None,
            never_cancel(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "auth.invalid");
}

#[tokio::test]
async fn empty_messages_fail_validation() {
    let bed = bed();
    let req = switchboard_core::CanonicalRequest::Chat(switchboard_core::request::ChatRequest {
        model: switchboard_core::ModelHint::auto(),
        messages: vec![],
        params: switchboard_core::request::DecodingParams::default(),
        stream: false,
    });
    let err = bed
        .gateway
        .handle(rid(), presented(), req, None, never_cancel())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation.invalid");
    // Validation fails before any upstream contact.
    assert_eq!(
        bed.controllers["alpha"].calls(switchboard_types::Capability::Chat),
        0
    );
}

#[tokio::test]
async fn restricted_tenant_cannot_reach_forbidden_provider() {
    let bed = bed_with(|file| {
        // Tenant may only use bravo's model.
        file.tenant_keys[0].permissions.models =
            Some([ModelId::new("bravo-m1")].into_iter().collect());
    });
    let out = bed
        .gateway
        .handle(rid(), presented(), chat("hi"), None, never_cancel())
        .await
        .unwrap();
    assert_eq!(out.provider, ProviderId::new("bravo"));
    assert_eq!(
        bed.controllers["alpha"].calls(switchboard_types::Capability::Chat),
        0
    );
}

#[tokio::test]
async fn fully_forbidden_tenant_gets_no_candidate() {
    let bed = bed_with(|file| {
        file.tenant_keys[0].prefs.forbidden_providers =
            [ProviderId::new("alpha"), ProviderId::new("bravo")]
                .into_iter()
                .collect();
    });
    let err = bed
        .gateway
        .handle(rid(), presented(), chat("hi"), None, never_cancel())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "route.no_candidate");
}
