use serde_json::json;
use utoipa::OpenApi;

use seo_portal::api::webhooks::{event_parts, metadata_id};
use seo_portal::docs::ApiDoc;
use seo_portal::stripe_client::{
    sign_hmac_sha256_hex, verify_webhook_signature_at, SignatureError,
};

const SECRET: &str = "whsec_test";
const NOW: i64 = 1_760_000_000;

fn signed_header(secret: &str, body: &str, ts: i64) -> String {
    let sig = sign_hmac_sha256_hex(secret, &format!("{ts}.{body}"));
    format!("t={ts},v1={sig}")
}

#[test]
fn valid_signature_passes() {
    let body = r#"{"type":"payment_intent.succeeded"}"#;
    let header = signed_header(SECRET, body, NOW);
    assert_eq!(
        verify_webhook_signature_at(SECRET, body.as_bytes(), &header, NOW),
        Ok(())
    );
}

#[test]
fn tampered_body_is_rejected() {
    let body = r#"{"type":"payment_intent.succeeded"}"#;
    let header = signed_header(SECRET, body, NOW);
    let tampered = r#"{"type":"payment_intent.payment_failed"}"#;
    assert_eq!(
        verify_webhook_signature_at(SECRET, tampered.as_bytes(), &header, NOW),
        Err(SignatureError::Mismatch)
    );
}

#[test]
fn wrong_secret_is_rejected() {
    let body = "{}";
    let header = signed_header("whsec_other", body, NOW);
    assert_eq!(
        verify_webhook_signature_at(SECRET, body.as_bytes(), &header, NOW),
        Err(SignatureError::Mismatch)
    );
}

#[test]
fn missing_timestamp_is_rejected() {
    let sig = sign_hmac_sha256_hex(SECRET, "whatever");
    let header = format!("v1={sig}");
    assert_eq!(
        verify_webhook_signature_at(SECRET, b"{}", &header, NOW),
        Err(SignatureError::MissingTimestamp)
    );
}

#[test]
fn missing_v1_is_rejected() {
    let header = format!("t={NOW}");
    assert_eq!(
        verify_webhook_signature_at(SECRET, b"{}", &header, NOW),
        Err(SignatureError::MissingSignature)
    );
}

#[test]
fn garbage_header_is_rejected() {
    assert_eq!(
        verify_webhook_signature_at(SECRET, b"{}", "not-a-signature", NOW),
        Err(SignatureError::MissingTimestamp)
    );
}

#[test]
fn stale_timestamp_is_rejected() {
    let body = "{}";
    let header = signed_header(SECRET, body, NOW - 301);
    assert_eq!(
        verify_webhook_signature_at(SECRET, body.as_bytes(), &header, NOW),
        Err(SignatureError::Expired)
    );
    // Just inside the tolerance still passes.
    let header = signed_header(SECRET, body, NOW - 300);
    assert_eq!(
        verify_webhook_signature_at(SECRET, body.as_bytes(), &header, NOW),
        Ok(())
    );
}

#[test]
fn second_v1_candidate_is_accepted() {
    let body = "{}";
    let good = sign_hmac_sha256_hex(SECRET, &format!("{NOW}.{body}"));
    let header = format!("t={NOW},v1=deadbeef,v1={good}");
    assert_eq!(
        verify_webhook_signature_at(SECRET, body.as_bytes(), &header, NOW),
        Ok(())
    );
}

#[test]
fn event_parts_splits_type_and_object() {
    let body = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": "pi_123",
                "metadata": {"orderId": "42"}
            }
        }
    })
    .to_string();

    let (event_type, object) = event_parts(body.as_bytes()).expect("parse event");
    assert_eq!(event_type, "payment_intent.succeeded");
    assert_eq!(object["id"], "pi_123");
}

#[test]
fn event_parts_rejects_malformed_bodies() {
    assert!(event_parts(b"not json").is_none());
    assert!(event_parts(br#"{"type":"x"}"#).is_none());
    assert!(event_parts(br#"{"data":{"object":{}}}"#).is_none());
}

#[test]
fn openapi_document_covers_the_public_surface() {
    let doc = serde_json::to_value(ApiDoc::openapi()).expect("openapi json");
    assert!(doc["paths"]["/webhook"]["post"].is_object());
    assert!(doc["paths"]["/auth/register"]["post"].is_object());
    assert!(doc["paths"]["/auth/login"]["post"].is_object());
}

#[test]
fn metadata_id_parses_string_ids() {
    let object = json!({"metadata": {"orderId": "42", "invoiceId": "abc"}});
    assert_eq!(metadata_id(&object, "orderId"), Some(42));
    // Non-numeric and absent keys yield nothing.
    assert_eq!(metadata_id(&object, "invoiceId"), None);
    assert_eq!(metadata_id(&object, "subscriptionId"), None);
    assert_eq!(metadata_id(&json!({}), "orderId"), None);
}
