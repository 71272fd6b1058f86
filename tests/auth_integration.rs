use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use serde_json::json;
use uuid::Uuid;

use seo_portal::api::auth::{decode_token, login, register};

mod support;

fn ensure_jwt_secret() {
    std::env::set_var("JWT_SECRET", "test-jwt-secret");
}

#[actix_web::test]
async fn register_then_login_round_trip() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    ensure_jwt_secret();
    let email = format!("auth_{}@example.com", Uuid::new_v4());

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "http://localhost"));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(register).service(login))
            .await;

    let req = TestRequest::post()
        .uri("/auth/register")
        .set_json(json!({
            "email": email,
            "password": "parola123",
            "name": "Ana Pop",
            "company": "Pop SRL"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["is_admin"], false);
    let user_id = body["user_id"].as_i64().expect("user id") as i32;

    // The issued token decodes back to the same identity.
    let token = body["token"].as_str().expect("token");
    let identity = decode_token(token).expect("decode token");
    assert_eq!(identity.id, user_id);
    assert!(!identity.is_admin);

    let req = TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({"email": email, "password": "parola123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["user_id"], user_id);
}

#[actix_web::test]
async fn duplicate_email_is_rejected() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    ensure_jwt_secret();
    let email = format!("dup_{}@example.com", Uuid::new_v4());

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "http://localhost"));
    let app = test::init_service(App::new().app_data(state.clone()).service(register)).await;

    let payload = json!({"email": email, "password": "parola123"});
    let req = TestRequest::post()
        .uri("/auth/register")
        .set_json(payload.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = TestRequest::post()
        .uri("/auth/register")
        .set_json(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Există deja un cont cu acest email");
}

#[actix_web::test]
async fn wrong_password_is_unauthorized() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    ensure_jwt_secret();
    let email = format!("badpw_{}@example.com", Uuid::new_v4());

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "http://localhost"));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(register).service(login))
            .await;

    let req = TestRequest::post()
        .uri("/auth/register")
        .set_json(json!({"email": email, "password": "parola123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({"email": email, "password": "gresita"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({"email": "necunoscut@example.com", "password": "parola123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}
