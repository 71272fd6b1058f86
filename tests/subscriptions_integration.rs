use actix_web::dev::Service;
use actix_web::test::TestRequest;
use actix_web::{test, web, App, HttpMessage};
use chrono::{DateTime, Duration, Utc};
use httpmock::Method::{DELETE, GET, POST};
use httpmock::MockServer;
use serde_json::json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use seo_portal::api::auth::AuthUser;
use seo_portal::api::subscriptions::{
    cancel_pending_payment, check_payment_status, cleanup_pending, create_subscription,
    list_subscriptions, retry_payment,
};

mod support;

async fn insert_user(pool: &PgPool, suffix: &str) -> i32 {
    sqlx::query(
        r#"INSERT INTO users (email, password_hash, stripe_customer_id)
           VALUES ($1, $2, $3)
           RETURNING id"#,
    )
    .bind(format!("subs_{suffix}@example.com"))
    .bind("test-hash")
    .bind(format!("cus_{suffix}"))
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

async fn insert_service(pool: &PgPool, suffix: &str, monthly_price: i64) -> i32 {
    sqlx::query(
        r#"INSERT INTO services (name, price, currency)
           VALUES ($1, $2, 'ron')
           RETURNING id"#,
    )
    .bind(format!("SEO Monitoring {suffix}"))
    .bind(monthly_price)
    .fetch_one(pool)
    .await
    .expect("insert service")
    .get("id")
}

macro_rules! app_as {
    ($state:expr, $user_id:expr, $is_admin:expr, $($svc:expr),+) => {{
        let user = AuthUser { id: $user_id, is_admin: $is_admin };
        test::init_service(
            App::new()
                .app_data($state.clone())
                .wrap_fn(move |req, srv| {
                    req.extensions_mut().insert(user);
                    let fut = srv.call(req);
                    async move { fut.await }
                })
                $(.service($svc))+,
        )
        .await
    }};
}

#[actix_web::test]
async fn create_trial_subscription_writes_trial_order_invoice() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/subscriptions")
            .x_www_form_urlencoded_tuple("trial_period_days", "7");
        then.status(200).json_body(json!({
            "id": "sub_trial_1",
            "status": "trialing",
            "cancel_at_period_end": false,
            "latest_invoice": {
                "id": "in_trial_1",
                "payment_intent": {
                    "id": "pi_trial_1",
                    "status": "requires_payment_method",
                    "client_secret": "pi_trial_1_secret"
                }
            }
        }));
    });

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, create_subscription);

    let req = TestRequest::post()
        .uri("/subscriptions")
        .set_json(json!({
            "service_id": service_id,
            "plan_type": "monthly",
            "trial_period": 7
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "trial");
    assert_eq!(body["price"], 100_000);
    assert_eq!(body["client_secret"], "pi_trial_1_secret");

    let sub = sqlx::query(
        "SELECT status, price, trial_end, stripe_subscription_id FROM subscriptions WHERE id = $1",
    )
    .bind(body["subscription_id"].as_i64().expect("sub id") as i32)
    .fetch_one(pool)
    .await
    .expect("select subscription");
    let status: String = sub.get("status");
    let trial_end: Option<DateTime<Utc>> = sub.get("trial_end");
    let stripe_id: Option<String> = sub.get("stripe_subscription_id");
    assert_eq!(status, "trial");
    assert_eq!(stripe_id.as_deref(), Some("sub_trial_1"));
    let trial_end = trial_end.expect("trial end set");

    let order_status: String = sqlx::query("SELECT status FROM orders WHERE id = $1")
        .bind(body["order_id"].as_i64().expect("order id") as i32)
        .fetch_one(pool)
        .await
        .expect("select order")
        .get("status");
    assert_eq!(order_status, "pending");

    let invoice = sqlx::query(
        "SELECT status, due_date, stripe_invoice_id FROM invoices WHERE id = $1",
    )
    .bind(body["invoice_id"].as_i64().expect("invoice id") as i32)
    .fetch_one(pool)
    .await
    .expect("select invoice");
    let invoice_status: String = invoice.get("status");
    let due_date: Option<DateTime<Utc>> = invoice.get("due_date");
    let stripe_invoice_id: String = invoice.get("stripe_invoice_id");
    assert_eq!(invoice_status, "open");
    // Trial invoices come due when the trial ends.
    assert_eq!(due_date, Some(trial_end));
    assert_eq!(stripe_invoice_id, "in_trial_1");
}

#[actix_web::test]
async fn create_yearly_subscription_is_active_and_paid() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/subscriptions")
            .x_www_form_urlencoded_tuple("items[0][price_data][unit_amount]", "1080000")
            .x_www_form_urlencoded_tuple("items[0][price_data][recurring][interval]", "year");
        then.status(200).json_body(json!({
            "id": "sub_year_1",
            "status": "active",
            "cancel_at_period_end": false,
            "latest_invoice": "in_year_1"
        }));
    });

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, create_subscription);

    let before = Utc::now();
    let req = TestRequest::post()
        .uri("/subscriptions")
        .set_json(json!({
            "service_id": service_id,
            "plan_type": "yearly"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "active");
    assert_eq!(body["price"], 1_080_000);
    assert_eq!(body["requires_action"], false);

    let order_status: String = sqlx::query("SELECT status FROM orders WHERE id = $1")
        .bind(body["order_id"].as_i64().expect("order id") as i32)
        .fetch_one(pool)
        .await
        .expect("select order")
        .get("status");
    assert_eq!(order_status, "completed");

    let invoice = sqlx::query(
        "SELECT status, amount_paid, amount_remaining, due_date FROM invoices WHERE id = $1",
    )
    .bind(body["invoice_id"].as_i64().expect("invoice id") as i32)
    .fetch_one(pool)
    .await
    .expect("select invoice");
    let invoice_status: String = invoice.get("status");
    let amount_paid: i64 = invoice.get("amount_paid");
    let amount_remaining: i64 = invoice.get("amount_remaining");
    let due_date: Option<DateTime<Utc>> = invoice.get("due_date");
    assert_eq!(invoice_status, "paid");
    assert_eq!(amount_paid, 1_080_000);
    assert_eq!(amount_remaining, 0);
    // Net-14 due date for non-trial invoices.
    let due_date = due_date.expect("due date set");
    assert!(due_date >= before + Duration::days(14) - Duration::minutes(1));
    assert!(due_date <= Utc::now() + Duration::days(14) + Duration::minutes(1));
}

#[actix_web::test]
async fn duplicate_active_subscription_is_rejected() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    sqlx::query(
        r#"INSERT INTO subscriptions (user_id, service_id, status, price)
           VALUES ($1, $2, 'active', 100000)"#,
    )
    .bind(user_id)
    .bind(service_id)
    .execute(pool)
    .await
    .expect("insert existing subscription");

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, create_subscription);

    let req = TestRequest::post()
        .uri("/subscriptions")
        .set_json(json!({
            "service_id": service_id,
            "plan_type": "monthly"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Ai deja un abonament activ pentru acest serviciu");
}

#[actix_web::test]
async fn check_payment_status_activates_without_new_row() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    let sub_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id)
           VALUES ($1, $2, 'pending_payment', 100000, 'sub_pending_1')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(service_id)
    .fetch_one(pool)
    .await
    .expect("insert subscription")
    .get("id");

    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions/sub_pending_1");
        then.status(200).json_body(json!({
            "id": "sub_pending_1",
            "status": "active",
            "cancel_at_period_end": false,
            "latest_invoice": "in_pending_1"
        }));
    });

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, check_payment_status, list_subscriptions);

    let req = TestRequest::post()
        .uri("/subscriptions/check-payment-status")
        .set_json(json!({"subscription_id": sub_id}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "active");

    // Activation updates the existing row, it never inserts a second one.
    let rows = sqlx::query("SELECT id, status FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .expect("select subscriptions");
    assert_eq!(rows.len(), 1);
    let status: String = rows[0].get("status");
    assert_eq!(status, "active");
}

#[actix_web::test]
async fn check_payment_status_flags_pending_action() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    let sub_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id)
           VALUES ($1, $2, 'trial', 100000, 'sub_3ds_1')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(service_id)
    .fetch_one(pool)
    .await
    .expect("insert subscription")
    .get("id");

    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions/sub_3ds_1");
        then.status(200).json_body(json!({
            "id": "sub_3ds_1",
            "status": "incomplete",
            "cancel_at_period_end": false,
            "latest_invoice": {
                "id": "in_3ds_1",
                "payment_intent": {
                    "id": "pi_3ds_1",
                    "status": "requires_action",
                    "client_secret": "pi_3ds_1_secret"
                }
            }
        }));
    });

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, check_payment_status);

    let req = TestRequest::post()
        .uri("/subscriptions/check-payment-status")
        .set_json(json!({"subscription_id": sub_id}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "pending_payment");
    assert_eq!(body["client_secret"], "pi_3ds_1_secret");

    let status: String = sqlx::query("SELECT status FROM subscriptions WHERE id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("select subscription")
        .get("status");
    assert_eq!(status, "pending_payment");
}

#[actix_web::test]
async fn retry_payment_confirms_intent_and_activates() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    let sub_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id)
           VALUES ($1, $2, 'pending_payment', 100000, 'sub_retry_1')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(service_id)
    .fetch_one(pool)
    .await
    .expect("insert subscription")
    .get("id");

    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions/sub_retry_1");
        then.status(200).json_body(json!({
            "id": "sub_retry_1",
            "status": "incomplete",
            "cancel_at_period_end": false,
            "latest_invoice": {
                "id": "in_retry_1",
                "payment_intent": {
                    "id": "pi_retry_1",
                    "status": "requires_payment_method",
                    "client_secret": "pi_retry_1_secret"
                }
            }
        }));
    });
    let confirm_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/payment_intents/pi_retry_1/confirm")
            .x_www_form_urlencoded_tuple("payment_method", "pm_new_card");
        then.status(200).json_body(json!({
            "id": "pi_retry_1",
            "status": "succeeded",
            "client_secret": "pi_retry_1_secret"
        }));
    });

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, retry_payment);

    let req = TestRequest::post()
        .uri("/subscriptions/retry-payment")
        .set_json(json!({
            "subscription_id": sub_id,
            "payment_method_id": "pm_new_card"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "active");
    confirm_mock.assert();

    let status: String = sqlx::query("SELECT status FROM subscriptions WHERE id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("select subscription")
        .get("status");
    assert_eq!(status, "active");
}

#[actix_web::test]
async fn retry_payment_requires_pending_status() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    let sub_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id)
           VALUES ($1, $2, 'active', 100000, 'sub_active_1')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(service_id)
    .fetch_one(pool)
    .await
    .expect("insert subscription")
    .get("id");

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, retry_payment);

    let req = TestRequest::post()
        .uri("/subscriptions/retry-payment")
        .set_json(json!({
            "subscription_id": sub_id,
            "payment_method_id": "pm_new_card"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Abonamentul nu așteaptă o plată");
}

#[actix_web::test]
async fn cancel_pending_payment_deletes_row_even_if_remote_cancel_fails() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    let sub_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id)
           VALUES ($1, $2, 'pending_payment', 100000, 'sub_abandon_1')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(service_id)
    .fetch_one(pool)
    .await
    .expect("insert subscription")
    .get("id");

    // Remote cancel is best-effort; a processor failure must not block the
    // local delete.
    let cancel_mock = server.mock(|when, then| {
        when.method(DELETE).path("/v1/subscriptions/sub_abandon_1");
        then.status(500).json_body(json!({
            "error": {"message": "Something went wrong"}
        }));
    });

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, cancel_pending_payment);

    let req = TestRequest::post()
        .uri("/subscriptions/cancel-pending-payment")
        .set_json(json!({"subscription_id": sub_id}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    cancel_mock.assert();

    let remaining: i64 = sqlx::query("SELECT COUNT(*) AS n FROM subscriptions WHERE id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("count subscriptions")
        .get("n");
    assert_eq!(remaining, 0);
}

#[actix_web::test]
async fn cleanup_pending_removes_dead_remote_rows() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let server = MockServer::start_async().await;
    let suffix = Uuid::new_v4().to_string();

    let user_id = insert_user(pool, &suffix).await;
    let service_id = insert_service(pool, &suffix, 100_000).await;

    sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id)
           VALUES ($1, $2, 'pending_payment', 100000, 'sub_dead_1')"#,
    )
    .bind(user_id)
    .bind(service_id)
    .execute(pool)
    .await
    .expect("insert dead subscription");

    let alive_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (user_id, service_id, status, price, stripe_subscription_id)
           VALUES ($1, $2, 'pending_payment', 100000, 'sub_alive_1')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(service_id)
    .fetch_one(pool)
    .await
    .expect("insert alive subscription")
    .get("id");

    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions/sub_dead_1");
        then.status(404).json_body(json!({
            "error": {"message": "No such subscription", "code": "resource_missing"}
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/subscriptions/sub_alive_1");
        then.status(200).json_body(json!({
            "id": "sub_alive_1",
            "status": "incomplete",
            "cancel_at_period_end": false
        }));
    });

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app = app_as!(state, user_id, false, cleanup_pending);

    let req = TestRequest::post()
        .uri("/subscriptions/cleanup-pending")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["removed"], 1);

    let remaining: Vec<i32> = sqlx::query("SELECT id FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .expect("select subscriptions")
        .iter()
        .map(|r| r.get("id"))
        .collect();
    assert_eq!(remaining, vec![alive_id]);
}
