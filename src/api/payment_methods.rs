// src/api/payment_methods.rs

use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::AuthUser;
use crate::api::subscriptions::ensure_customer;
use crate::models::{InvoiceStatus, User};
use crate::stripe_client::CreatePaymentIntentRequest;
use crate::{db, AppState};

async fn load_user(state: &AppState, user_id: i32) -> Result<User, HttpResponse> {
    match db::get_user(&state.pool, user_id).await {
        Ok(Some(u)) => Ok(u),
        Ok(None) => Err(HttpResponse::NotFound()
            .json(json!({"error": "Utilizatorul nu a fost găsit"}))),
        Err(e) => {
            eprintln!("get_user db error: {e}");
            Err(HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"})))
        }
    }
}

#[get("/payment-methods")]
pub async fn list_payment_methods(
    auth: web::ReqData<AuthUser>,
    state: web::Data<AppState>,
) -> impl Responder {
    let user = match load_user(&state, auth.id).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    // No customer yet means no cards yet.
    let Some(customer_id) = user.stripe_customer_id.as_deref() else {
        return HttpResponse::Ok().json(json!({"payment_methods": [], "default": null}));
    };

    let methods = match state.stripe.list_payment_methods(customer_id).await {
        Ok(list) => list.data,
        Err(e) => {
            log::error!("stripe list payment methods error: {e} user_id={}", auth.id);
            return HttpResponse::InternalServerError()
                .json(json!({"error": "Nu am putut încărca metodele de plată"}));
        }
    };

    let methods: Vec<_> = methods
        .into_iter()
        .map(|pm| {
            let is_default = user.default_payment_method.as_deref() == Some(pm.id.as_str());
            json!({
                "id": pm.id,
                "card": pm.card,
                "is_default": is_default,
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "payment_methods": methods,
        "default": user.default_payment_method,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodBody {
    pub payment_method_id: String,
}

#[post("/payment-methods")]
pub async fn attach_payment_method(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<PaymentMethodBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let user = match load_user(&state, auth.id).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let customer_id = match ensure_customer(&state, &user).await {
        Ok(id) => id,
        Err(e) => {
            log::error!("stripe create customer error: {e} user_id={}", auth.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Cardul nu a putut fi adăugat",
                "details": e.to_string()
            }));
        }
    };

    if let Err(e) = state
        .stripe
        .attach_payment_method(&payload.payment_method_id, &customer_id)
        .await
    {
        log::error!("stripe attach error: {e} user_id={}", auth.id);
        return HttpResponse::BadRequest().json(json!({
            "error": "Cardul nu a putut fi adăugat",
            "details": e.to_string()
        }));
    }

    // The first attached card becomes the default.
    if user.default_payment_method.is_none() {
        if let Err(e) = state
            .stripe
            .set_default_payment_method(&customer_id, &payload.payment_method_id)
            .await
        {
            log::warn!("stripe set default error (ignored): {e} user_id={}", auth.id);
        }
        if let Err(e) = db::set_default_payment_method(
            &state.pool,
            auth.id,
            Some(&payload.payment_method_id),
        )
        .await
        {
            eprintln!("set_default_payment_method db error: {e}");
        }
    }

    HttpResponse::Ok().json(json!({"success": true}))
}

#[delete("/payment-methods")]
pub async fn detach_payment_method(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<PaymentMethodBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let user = match load_user(&state, auth.id).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if let Err(e) = state
        .stripe
        .detach_payment_method(&payload.payment_method_id)
        .await
    {
        log::error!("stripe detach error: {e} user_id={}", auth.id);
        return HttpResponse::BadRequest().json(json!({
            "error": "Cardul nu a putut fi șters",
            "details": e.to_string()
        }));
    }

    if user.default_payment_method.as_deref() == Some(payload.payment_method_id.as_str()) {
        if let Err(e) = db::set_default_payment_method(&state.pool, auth.id, None).await {
            eprintln!("set_default_payment_method db error: {e}");
        }
    }

    HttpResponse::Ok().json(json!({"success": true}))
}

#[patch("/payment-methods")]
pub async fn set_default_payment_method(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<PaymentMethodBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let user = match load_user(&state, auth.id).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Some(customer_id) = user.stripe_customer_id.as_deref() else {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Nu există metode de plată salvate"}));
    };

    if let Err(e) = state
        .stripe
        .set_default_payment_method(customer_id, &payload.payment_method_id)
        .await
    {
        log::error!("stripe set default error: {e} user_id={}", auth.id);
        return HttpResponse::BadRequest().json(json!({
            "error": "Cardul implicit nu a putut fi schimbat",
            "details": e.to_string()
        }));
    }

    if let Err(e) =
        db::set_default_payment_method(&state.pool, auth.id, Some(&payload.payment_method_id))
            .await
    {
        eprintln!("set_default_payment_method db error: {e}");
        return HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}));
    }

    HttpResponse::Ok().json(json!({"success": true}))
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentBody {
    pub invoice_id: i32,
    pub payment_method_id: String,
}

/// Pays a local open invoice with a confirmed payment intent. The intent
/// carries `metadata[invoiceId]` so the webhook can settle the invoice even
/// when this request loses the race with the processor callback.
#[post("/process-payment")]
pub async fn process_payment(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<ProcessPaymentBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let invoice = match db::get_invoice(&state.pool, payload.invoice_id).await {
        Ok(Some(i)) if i.user_id == auth.id => i,
        Ok(_) => {
            return HttpResponse::NotFound().json(json!({"error": "Factura nu a fost găsită"}));
        }
        Err(e) => {
            eprintln!("get_invoice db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    if invoice.status == InvoiceStatus::Paid {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Factura este deja plătită"}));
    }
    if invoice.status != InvoiceStatus::Open && invoice.status != InvoiceStatus::Draft {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Factura nu poate fi plătită"}));
    }
    // Partial payments only owe the balance.
    if invoice.amount_remaining <= 0 {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Factura este deja plătită"}));
    }

    let user = match load_user(&state, auth.id).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let customer_id = match ensure_customer(&state, &user).await {
        Ok(id) => id,
        Err(e) => {
            log::error!("stripe create customer error: {e} user_id={}", auth.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Plata nu a putut fi inițiată",
                "details": e.to_string()
            }));
        }
    };

    let intent = match state
        .stripe
        .create_payment_intent(CreatePaymentIntentRequest {
            amount: invoice.amount_remaining,
            currency: invoice.currency.clone(),
            customer: customer_id,
            payment_method: payload.payment_method_id.clone(),
            metadata: vec![("invoiceId".to_string(), invoice.id.to_string())],
        })
        .await
    {
        Ok(i) => i,
        Err(e) => {
            log::error!("stripe payment intent error: {e} invoice_id={}", invoice.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Plata a fost refuzată",
                "details": e.to_string()
            }));
        }
    };

    if intent.status == "succeeded" {
        if let Err(e) = db::mark_invoice_paid(&state.pool, invoice.id).await {
            eprintln!("mark_invoice_paid db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
        return HttpResponse::Ok().json(json!({
            "success": true,
            "invoice_id": invoice.id,
            "status": "paid",
        }));
    }

    HttpResponse::Ok().json(json!({
        "success": false,
        "invoice_id": invoice.id,
        "payment_intent_status": intent.status,
        "client_secret": intent.client_secret,
        "requires_action": intent.status == "requires_action",
    }))
}
