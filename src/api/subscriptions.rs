// src/api/subscriptions.rs
//
// Subscription lifecycle: create/cancel/pause/update plus the
// pending-payment reconciliation endpoints that synchronize local state with
// the payment processor (the webhook consumer in webhooks.rs is the other
// half of that synchronization).

use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;

use crate::api::auth::AuthUser;
use crate::models::{
    CancellationInfo, PauseInfo, PlanType, SubscriptionMetadata, SubscriptionStatus, User,
};
use crate::stripe_client::{CreateSubscriptionRequest, StripeError};
use crate::{billing, db, AppState};

/// Returns the user's processor customer id, creating the remote customer on
/// first use. If persisting the id fails the customer still exists remotely;
/// the next call will create a duplicate, which is why the failure is logged.
pub(crate) async fn ensure_customer(state: &AppState, user: &User) -> Result<String, StripeError> {
    if let Some(id) = &user.stripe_customer_id {
        return Ok(id.clone());
    }
    let customer = state
        .stripe
        .create_customer(&user.email, user.name.as_deref())
        .await?;
    if let Err(e) = db::set_stripe_customer_id(&state.pool, user.id, &customer.id).await {
        eprintln!("save stripe customer id error: {e}");
    }
    Ok(customer.id)
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionBody {
    pub service_id: i32,
    pub plan_type: String,
    pub quantity: Option<i64>,
    /// Trial length in days; absent or zero means no trial.
    pub trial_period: Option<i64>,
    pub coupon: Option<String>,
    pub payment_method_id: Option<String>,
}

#[post("/subscriptions")]
pub async fn create_subscription(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<CreateSubscriptionBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let payload = payload.into_inner();

    let Some(plan_type) = PlanType::parse(&payload.plan_type) else {
        return HttpResponse::BadRequest().json(json!({"error": "Tip de plan invalid"}));
    };
    let quantity = payload.quantity.unwrap_or(1).max(1);

    match db::has_active_subscription(&state.pool, auth.id, payload.service_id).await {
        Ok(true) => {
            return HttpResponse::BadRequest().json(json!({
                "error": "Ai deja un abonament activ pentru acest serviciu"
            }));
        }
        Ok(false) => {}
        Err(e) => {
            eprintln!("has_active_subscription db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    }

    let service = match db::get_service(&state.pool, payload.service_id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({"error": "Serviciul nu a fost găsit"}));
        }
        Err(e) => {
            eprintln!("get_service db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    let user = match db::get_user(&state.pool, auth.id).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({"error": "Utilizatorul nu a fost găsit"}));
        }
        Err(e) => {
            eprintln!("get_user db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
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

    let price = billing::subscription_price(service.price, plan_type, quantity);
    let trial_days = payload.trial_period.filter(|d| *d > 0);
    let now = Utc::now();
    let trial_end = trial_days.map(|d| billing::trial_end_date(now, d));

    let interval = match plan_type {
        PlanType::Monthly => "month",
        PlanType::Yearly => "year",
    };
    let stripe_sub = match state
        .stripe
        .create_subscription(CreateSubscriptionRequest {
            customer: customer_id,
            product: state.stripe_product_id.clone(),
            currency: service.currency.clone(),
            unit_amount: price,
            interval: interval.to_string(),
            trial_period_days: trial_days,
            coupon: payload.coupon.clone(),
            default_payment_method: payload.payment_method_id.clone(),
        })
        .await
    {
        Ok(s) => s,
        Err(e) => {
            log::error!("stripe create subscription error: {e} user_id={}", auth.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Plata nu a putut fi inițiată",
                "details": e.to_string()
            }));
        }
    };

    let status = if trial_days.is_some() {
        SubscriptionStatus::Trial
    } else {
        SubscriptionStatus::Active
    };
    let metadata = SubscriptionMetadata::new(plan_type, quantity, payload.coupon.clone());
    let renewal = billing::renewal_date(now, plan_type);
    let invoice_status = billing::initial_invoice_status(trial_days.is_some());
    let due_date = billing::invoice_due_date(now, trial_end);
    let order_status = if trial_days.is_some() {
        crate::models::OrderStatus::Pending
    } else {
        crate::models::OrderStatus::Completed
    };

    // Subscription, order and invoice land in one transaction so a failure
    // leaves no partial state behind.
    let mut tx = match state.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            eprintln!("begin tx error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare la crearea abonamentului"}));
        }
    };

    let subscription_id: i32 = match sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id, metadata,
                start_date, trial_end, renewal_date)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           RETURNING id"#,
    )
    .bind(auth.id)
    .bind(service.id)
    .bind(status.as_str())
    .bind(price)
    .bind(&stripe_sub.id)
    .bind(metadata.to_column())
    .bind(now)
    .bind(trial_end)
    .bind(renewal)
    .fetch_one(&mut *tx)
    .await
    {
        Ok(r) => r.get("id"),
        Err(e) => {
            eprintln!("insert subscription error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare la crearea abonamentului"}));
        }
    };

    let order_id: i32 = match sqlx::query(
        r#"INSERT INTO orders (user_id, subscription_id, status, amount, currency)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING id"#,
    )
    .bind(auth.id)
    .bind(subscription_id)
    .bind(order_status.as_str())
    .bind(price)
    .bind(&service.currency)
    .fetch_one(&mut *tx)
    .await
    {
        Ok(r) => r.get("id"),
        Err(e) => {
            eprintln!("insert order error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare la crearea abonamentului"}));
        }
    };

    let stripe_invoice_id = stripe_sub
        .latest_invoice_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("local_{}", uuid::Uuid::new_v4()));
    let paid = invoice_status == crate::models::InvoiceStatus::Paid;

    let invoice_id: i32 = match sqlx::query(
        r#"INSERT INTO invoices
               (user_id, subscription_id, stripe_invoice_id, status, total, amount_paid,
                amount_remaining, currency, due_date, paid_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           RETURNING id"#,
    )
    .bind(auth.id)
    .bind(subscription_id)
    .bind(&stripe_invoice_id)
    .bind(invoice_status.as_str())
    .bind(price)
    .bind(if paid { price } else { 0 })
    .bind(if paid { 0 } else { price })
    .bind(&service.currency)
    .bind(due_date)
    .bind(if paid { Some(now) } else { None })
    .fetch_one(&mut *tx)
    .await
    {
        Ok(r) => r.get("id"),
        Err(e) => {
            eprintln!("insert invoice error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare la crearea abonamentului"}));
        }
    };

    if let Err(e) = tx.commit().await {
        eprintln!("commit error: {e}");
        return HttpResponse::InternalServerError()
            .json(json!({"error": "A apărut o eroare la crearea abonamentului"}));
    }

    let payment_intent = stripe_sub.payment_intent();
    HttpResponse::Ok().json(json!({
        "subscription_id": subscription_id,
        "order_id": order_id,
        "invoice_id": invoice_id,
        "status": status,
        "price": price,
        "trial_end": trial_end,
        "renewal_date": renewal,
        "client_secret": payment_intent.and_then(|pi| pi.client_secret.clone()),
        "requires_action": payment_intent
            .map(|pi| pi.status == "requires_action")
            .unwrap_or(false),
    }))
}

#[get("/subscriptions")]
pub async fn list_subscriptions(
    auth: web::ReqData<AuthUser>,
    state: web::Data<AppState>,
) -> impl Responder {
    match db::list_user_subscriptions(&state.pool, auth.id).await {
        Ok(subs) => HttpResponse::Ok().json(subs),
        Err(e) => {
            eprintln!("list_subscriptions db error: {e}");
            HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}))
        }
    }
}

#[get("/subscriptions/{id}")]
pub async fn get_subscription(
    auth: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    state: web::Data<AppState>,
) -> impl Responder {
    match db::get_subscription_for_user(&state.pool, path.into_inner(), auth.id).await {
        Ok(Some(sub)) => HttpResponse::Ok().json(sub),
        Ok(None) => {
            HttpResponse::NotFound().json(json!({"error": "Abonamentul nu a fost găsit"}))
        }
        Err(e) => {
            eprintln!("get_subscription db error: {e}");
            HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionBody {
    pub plan_type: Option<String>,
    pub quantity: Option<i64>,
}

/// Plan update. A plan-type change recomputes both the price and the renewal
/// date from now.
#[post("/subscriptions/{id}")]
pub async fn update_subscription(
    auth: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<UpdateSubscriptionBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let sub = match db::get_subscription_for_user(&state.pool, path.into_inner(), auth.id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({"error": "Abonamentul nu a fost găsit"}));
        }
        Err(e) => {
            eprintln!("update_subscription db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    let service = match db::get_service(&state.pool, sub.service_id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({"error": "Serviciul nu a fost găsit"}));
        }
        Err(e) => {
            eprintln!("get_service db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    let new_plan = match payload.plan_type.as_deref() {
        Some(raw) => match PlanType::parse(raw) {
            Some(p) => p,
            None => {
                return HttpResponse::BadRequest().json(json!({"error": "Tip de plan invalid"}));
            }
        },
        None => sub.metadata.plan_type,
    };
    let new_quantity = payload.quantity.unwrap_or(sub.metadata.quantity).max(1);

    let mut metadata = sub.metadata.clone();
    let plan_changed = new_plan != metadata.plan_type;
    metadata.plan_type = new_plan;
    metadata.quantity = new_quantity;

    let price = billing::subscription_price(service.price, new_plan, new_quantity);
    let renewal = if plan_changed {
        billing::renewal_date(Utc::now(), new_plan)
    } else {
        sub.renewal_date.unwrap_or_else(Utc::now)
    };

    if let Err(e) = db::update_subscription_plan(&state.pool, sub.id, price, renewal, &metadata).await
    {
        eprintln!("update_subscription_plan db error: {e}");
        return HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}));
    }

    HttpResponse::Ok().json(json!({
        "success": true,
        "subscription_id": sub.id,
        "price": price,
        "renewal_date": renewal,
        "plan_type": new_plan,
        "quantity": new_quantity,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionBody {
    pub subscription_id: i32,
    /// Defaults to cancelling immediately; false cancels at period end.
    pub immediate: Option<bool>,
    pub reason: Option<String>,
}

#[post("/subscriptions/cancel-stripe-subscription")]
pub async fn cancel_subscription(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<CancelSubscriptionBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let sub =
        match db::get_subscription_for_user(&state.pool, payload.subscription_id, auth.id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                return HttpResponse::NotFound()
                    .json(json!({"error": "Abonamentul nu a fost găsit"}));
            }
            Err(e) => {
                eprintln!("cancel_subscription db error: {e}");
                return HttpResponse::InternalServerError()
                    .json(json!({"error": "A apărut o eroare"}));
            }
        };

    let immediate = payload.immediate.unwrap_or(true);
    if let Some(stripe_id) = sub.stripe_subscription_id.as_deref() {
        let remote = if immediate {
            state.stripe.cancel_subscription(stripe_id).await
        } else {
            state.stripe.set_cancel_at_period_end(stripe_id, true).await
        };
        if let Err(e) = remote {
            log::error!("stripe cancel error: {e} subscription_id={}", sub.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Abonamentul nu a putut fi anulat",
                "details": e.to_string()
            }));
        }
    }

    let mut metadata = sub.metadata.clone();
    metadata.cancellation = Some(CancellationInfo {
        reason: payload
            .reason
            .clone()
            .unwrap_or_else(|| "user_requested".to_string()),
        at: Utc::now(),
    });

    if let Err(e) = db::mark_subscription_cancelled(&state.pool, sub.id, &metadata).await {
        eprintln!("mark_subscription_cancelled db error: {e}");
        return HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}));
    }

    HttpResponse::Ok().json(json!({"success": true, "immediate": immediate}))
}

#[derive(Debug, Deserialize)]
pub struct PauseSubscriptionBody {
    pub subscription_id: i32,
    pub reason: Option<String>,
    pub until: Option<chrono::DateTime<Utc>>,
}

/// Pauses a subscription. There is no automatic resume; the pause window is
/// only recorded in metadata.
#[post("/subscriptions/pause")]
pub async fn pause_subscription(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<PauseSubscriptionBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let sub =
        match db::get_subscription_for_user(&state.pool, payload.subscription_id, auth.id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                return HttpResponse::NotFound()
                    .json(json!({"error": "Abonamentul nu a fost găsit"}));
            }
            Err(e) => {
                eprintln!("pause_subscription db error: {e}");
                return HttpResponse::InternalServerError()
                    .json(json!({"error": "A apărut o eroare"}));
            }
        };

    if sub.status != SubscriptionStatus::Active && sub.status != SubscriptionStatus::Trial {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Doar abonamentele active pot fi suspendate"}));
    }

    // Remote pause is best-effort; the local pause still goes through.
    if let Some(stripe_id) = sub.stripe_subscription_id.as_deref() {
        if let Err(e) = state.stripe.pause_subscription(stripe_id).await {
            log::warn!("stripe pause error: {e} subscription_id={}", sub.id);
        }
    }

    let mut metadata = sub.metadata.clone();
    metadata.pause = Some(PauseInfo {
        reason: payload
            .reason
            .clone()
            .unwrap_or_else(|| "user_requested".to_string()),
        from: Utc::now(),
        until: payload.until,
    });

    if let Err(e) = db::update_subscription_metadata(&state.pool, sub.id, &metadata).await {
        eprintln!("update_subscription_metadata db error: {e}");
        return HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}));
    }
    if let Err(e) =
        db::update_subscription_status(&state.pool, sub.id, SubscriptionStatus::Paused).await
    {
        eprintln!("update_subscription_status db error: {e}");
        return HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}));
    }

    HttpResponse::Ok().json(json!({"success": true}))
}

/// Statuses of a remote payment intent that still need the customer.
fn needs_customer_action(status: &str) -> bool {
    matches!(
        status,
        "requires_action" | "requires_payment_method" | "requires_confirmation"
    )
}

/// Polls the processor for every non-terminal local subscription and flags
/// the ones stuck in an incomplete payment as `pending_payment`, returning
/// the client secrets the frontend needs to finish authentication.
#[get("/subscriptions/check-incomplete-payments")]
pub async fn check_incomplete_payments(
    auth: web::ReqData<AuthUser>,
    state: web::Data<AppState>,
) -> impl Responder {
    let subs = match db::list_reconcilable_subscriptions(&state.pool, auth.id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("list_reconcilable_subscriptions db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    let mut incomplete = Vec::new();
    for sub in subs {
        let Some(stripe_id) = sub.stripe_subscription_id.as_deref() else {
            continue;
        };
        let remote = match state.stripe.retrieve_subscription(stripe_id).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("stripe retrieve error: {e} subscription_id={}", sub.id);
                continue;
            }
        };

        if remote.status != "incomplete" && remote.status != "past_due" {
            continue;
        }
        let Some(pi) = remote.payment_intent() else {
            continue;
        };
        if !needs_customer_action(&pi.status) {
            continue;
        }

        if sub.status != SubscriptionStatus::PendingPayment {
            if let Err(e) = db::update_subscription_status(
                &state.pool,
                sub.id,
                SubscriptionStatus::PendingPayment,
            )
            .await
            {
                eprintln!("update_subscription_status db error: {e}");
                continue;
            }
        }

        incomplete.push(json!({
            "subscription_id": sub.id,
            "status": SubscriptionStatus::PendingPayment,
            "payment_intent_status": pi.status,
            "client_secret": pi.client_secret,
        }));
    }

    HttpResponse::Ok().json(json!({"incomplete": incomplete}))
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionIdBody {
    pub subscription_id: i32,
}

/// Client-initiated reconciliation poll: reads the remote payment state and
/// writes it through to the local row. Activation is an UPDATE on the
/// existing row, never an insert.
#[post("/subscriptions/check-payment-status")]
pub async fn check_payment_status(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<SubscriptionIdBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let sub =
        match db::get_subscription_for_user(&state.pool, payload.subscription_id, auth.id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                return HttpResponse::NotFound()
                    .json(json!({"error": "Abonamentul nu a fost găsit"}));
            }
            Err(e) => {
                eprintln!("check_payment_status db error: {e}");
                return HttpResponse::InternalServerError()
                    .json(json!({"error": "A apărut o eroare"}));
            }
        };

    let Some(stripe_id) = sub.stripe_subscription_id.as_deref() else {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Abonamentul nu are o plată asociată"}));
    };

    let remote = match state.stripe.retrieve_subscription(stripe_id).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("stripe retrieve error: {e} subscription_id={}", sub.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Nu am putut verifica starea plății",
                "details": e.to_string()
            }));
        }
    };

    let payment_succeeded = matches!(remote.status.as_str(), "active" | "trialing")
        || remote
            .payment_intent()
            .map(|pi| pi.status == "succeeded")
            .unwrap_or(false);

    if payment_succeeded {
        if sub.status != SubscriptionStatus::Active {
            if let Err(e) =
                db::update_subscription_status(&state.pool, sub.id, SubscriptionStatus::Active)
                    .await
            {
                eprintln!("update_subscription_status db error: {e}");
                return HttpResponse::InternalServerError()
                    .json(json!({"error": "A apărut o eroare"}));
            }
        }
        return HttpResponse::Ok().json(json!({
            "subscription_id": sub.id,
            "status": SubscriptionStatus::Active,
        }));
    }

    if let Some(pi) = remote.payment_intent() {
        if needs_customer_action(&pi.status) {
            if sub.status != SubscriptionStatus::PendingPayment {
                if let Err(e) = db::update_subscription_status(
                    &state.pool,
                    sub.id,
                    SubscriptionStatus::PendingPayment,
                )
                .await
                {
                    eprintln!("update_subscription_status db error: {e}");
                }
            }
            return HttpResponse::Ok().json(json!({
                "subscription_id": sub.id,
                "status": SubscriptionStatus::PendingPayment,
                "payment_intent_status": pi.status,
                "client_secret": pi.client_secret,
            }));
        }
    }

    HttpResponse::Ok().json(json!({
        "subscription_id": sub.id,
        "status": sub.status,
        "remote_status": remote.status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RetryPaymentBody {
    pub subscription_id: i32,
    pub payment_method_id: String,
}

/// Re-attempts confirmation of the stuck payment intent with a supplied
/// payment method and writes through on success.
#[post("/subscriptions/retry-payment")]
pub async fn retry_payment(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<RetryPaymentBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let sub =
        match db::get_subscription_for_user(&state.pool, payload.subscription_id, auth.id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                return HttpResponse::NotFound()
                    .json(json!({"error": "Abonamentul nu a fost găsit"}));
            }
            Err(e) => {
                eprintln!("retry_payment db error: {e}");
                return HttpResponse::InternalServerError()
                    .json(json!({"error": "A apărut o eroare"}));
            }
        };

    if sub.status != SubscriptionStatus::PendingPayment {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Abonamentul nu așteaptă o plată"}));
    }
    let Some(stripe_id) = sub.stripe_subscription_id.as_deref() else {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Abonamentul nu are o plată asociată"}));
    };

    let remote = match state.stripe.retrieve_subscription(stripe_id).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("stripe retrieve error: {e} subscription_id={}", sub.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Nu am putut verifica starea plății",
                "details": e.to_string()
            }));
        }
    };

    let Some(pi) = remote.payment_intent() else {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Plata nu mai poate fi reîncercată"}));
    };

    let confirmed = match state
        .stripe
        .confirm_payment_intent(&pi.id, Some(&payload.payment_method_id))
        .await
    {
        Ok(c) => c,
        Err(e) => {
            log::error!("stripe confirm error: {e} subscription_id={}", sub.id);
            return HttpResponse::BadRequest().json(json!({
                "error": "Plata a fost refuzată",
                "details": e.to_string()
            }));
        }
    };

    if confirmed.status == "succeeded" {
        if let Err(e) =
            db::update_subscription_status(&state.pool, sub.id, SubscriptionStatus::Active).await
        {
            eprintln!("update_subscription_status db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
        return HttpResponse::Ok().json(json!({
            "success": true,
            "subscription_id": sub.id,
            "status": SubscriptionStatus::Active,
        }));
    }

    HttpResponse::Ok().json(json!({
        "success": false,
        "subscription_id": sub.id,
        "payment_intent_status": confirmed.status,
        "client_secret": confirmed.client_secret,
        "requires_action": needs_customer_action(&confirmed.status),
    }))
}

/// Abandons a pending payment: best-effort remote cancel, then the local row
/// is deleted outright.
#[post("/subscriptions/cancel-pending-payment")]
pub async fn cancel_pending_payment(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<SubscriptionIdBody>,
    state: web::Data<AppState>,
) -> impl Responder {
    let sub =
        match db::get_subscription_for_user(&state.pool, payload.subscription_id, auth.id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                return HttpResponse::NotFound()
                    .json(json!({"error": "Abonamentul nu a fost găsit"}));
            }
            Err(e) => {
                eprintln!("cancel_pending_payment db error: {e}");
                return HttpResponse::InternalServerError()
                    .json(json!({"error": "A apărut o eroare"}));
            }
        };

    if sub.status != SubscriptionStatus::PendingPayment {
        return HttpResponse::BadRequest()
            .json(json!({"error": "Abonamentul nu așteaptă o plată"}));
    }

    if let Some(stripe_id) = sub.stripe_subscription_id.as_deref() {
        if let Err(e) = state.stripe.cancel_subscription(stripe_id).await {
            log::warn!("stripe cancel error (ignored): {e} subscription_id={}", sub.id);
        }
    }

    if let Err(e) = db::delete_subscription(&state.pool, sub.id).await {
        eprintln!("delete_subscription db error: {e}");
        return HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}));
    }

    HttpResponse::Ok().json(json!({"success": true}))
}

/// Batch cleanup: removes local `pending_payment` rows whose remote
/// counterpart is missing, canceled, unpaid or expired.
#[post("/subscriptions/cleanup-pending")]
pub async fn cleanup_pending(
    auth: web::ReqData<AuthUser>,
    state: web::Data<AppState>,
) -> impl Responder {
    let subs = match db::list_pending_payment_subscriptions(&state.pool, auth.id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("list_pending_payment_subscriptions db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    let mut removed = 0u32;
    for sub in subs {
        let dead = match sub.stripe_subscription_id.as_deref() {
            None => true,
            Some(stripe_id) => match state.stripe.retrieve_subscription(stripe_id).await {
                Ok(remote) => billing::is_dead_remote_status(&remote.status),
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    log::warn!("stripe retrieve error (skipped): {e} subscription_id={}", sub.id);
                    false
                }
            },
        };

        if dead {
            match db::delete_subscription(&state.pool, sub.id).await {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("delete_subscription db error: {e}"),
            }
        }
    }

    HttpResponse::Ok().json(json!({"success": true, "removed": removed}))
}
