// src/api/webhooks.rs
//
// Consumer for payment-processor webhook events. Signature is verified
// against the shared webhook secret before anything is parsed; an invalid
// signature is a 400 with no mutation.
//
// There is no event-id dedup: the terminal-status writes are idempotent, so
// replaying an event converges on the same end state. A DB failure inside a
// branch propagates to a 500 and the processor's retry recovers.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::stripe_client::verify_webhook_signature;
use crate::{db, AppState};

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

/// `metadata.<key>` of an event object, parsed as a local row id.
pub fn metadata_id(object: &Value, key: &str) -> Option<i32> {
    object
        .get("metadata")
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Splits a raw event body into its `type` discriminator and `data.object`.
pub fn event_parts(body: &[u8]) -> Option<(String, Value)> {
    let event: Value = serde_json::from_slice(body).ok()?;
    let event_type = event.get("type")?.as_str()?.to_string();
    let object = event.get("data")?.get("object")?.clone();
    Some((event_type, object))
}

#[utoipa::path(
    post,
    path = "/webhook",
    tag = "webhooks",
    request_body = String,
    responses(
        (status = 200, description = "Event processed or ignored", body = WebhookAck),
        (status = 400, description = "Invalid signature or payload"),
        (status = 500, description = "Processing failed, processor should retry")
    )
)]
#[post("/webhook")]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let signature = req
        .headers()
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if let Err(e) = verify_webhook_signature(&state.stripe_webhook_secret, &body, signature) {
        log::warn!("webhook signature rejected: {e}");
        return HttpResponse::BadRequest().json(json!({"error": "invalid signature"}));
    }

    let Some((event_type, object)) = event_parts(&body) else {
        return HttpResponse::BadRequest().json(json!({"error": "invalid payload"}));
    };

    match event_type.as_str() {
        "payment_intent.succeeded" => {
            let payment_intent_id = object.get("id").and_then(|v| v.as_str()).unwrap_or("");

            if let Some(order_id) = metadata_id(&object, "orderId") {
                match db::complete_order(&state.pool, order_id, payment_intent_id).await {
                    Ok(0) => log::warn!("webhook order not found order_id={order_id}"),
                    Ok(_) => log::info!("webhook order completed order_id={order_id}"),
                    Err(e) => {
                        eprintln!("webhook complete_order error: {e}");
                        return HttpResponse::InternalServerError().finish();
                    }
                }
            }

            if let Some(invoice_id) = metadata_id(&object, "invoiceId") {
                match db::mark_invoice_paid(&state.pool, invoice_id).await {
                    Ok(0) => log::warn!("webhook invoice not found invoice_id={invoice_id}"),
                    Ok(_) => log::info!("webhook invoice paid invoice_id={invoice_id}"),
                    Err(e) => {
                        eprintln!("webhook mark_invoice_paid error: {e}");
                        return HttpResponse::InternalServerError().finish();
                    }
                }
            }
        }
        "payment_intent.payment_failed" => {
            if let Some(order_id) = metadata_id(&object, "orderId") {
                match db::fail_order(&state.pool, order_id).await {
                    Ok(0) => log::warn!("webhook order not found order_id={order_id}"),
                    Ok(_) => log::info!("webhook order failed order_id={order_id}"),
                    Err(e) => {
                        eprintln!("webhook fail_order error: {e}");
                        return HttpResponse::InternalServerError().finish();
                    }
                }
            }
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            log::info!(
                "webhook subscription event type={event_type} id={}",
                object.get("id").and_then(|v| v.as_str()).unwrap_or("-")
            );
        }
        "customer.subscription.deleted" => {
            let Some(stripe_id) = object.get("id").and_then(|v| v.as_str()) else {
                return HttpResponse::BadRequest().json(json!({"error": "invalid payload"}));
            };
            match db::cancel_subscription_by_stripe_id(&state.pool, stripe_id).await {
                Ok(0) => log::warn!("webhook unknown subscription stripe_id={stripe_id}"),
                Ok(_) => log::info!("webhook subscription cancelled stripe_id={stripe_id}"),
                Err(e) => {
                    eprintln!("webhook cancel subscription error: {e}");
                    return HttpResponse::InternalServerError().finish();
                }
            }
        }
        "invoice.payment_succeeded" | "invoice.payment_failed" | "charge.succeeded"
        | "charge.failed" => {
            log::info!("webhook event logged type={event_type}");
        }
        other => {
            log::info!("webhook event ignored type={other}");
        }
    }

    HttpResponse::Ok().json(json!({"received": true}))
}
