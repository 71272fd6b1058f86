// src/main.rs

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::PgPool;
use std::env;
use utoipa::OpenApi;

use seo_portal::registry::ConnectionRegistry;
use seo_portal::stripe_client::StripeClient;
use seo_portal::{api, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(docs::ApiDoc::openapi())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Read once at startup so a missing secret fails fast.
    let _ = env::var("JWT_SECRET").expect("JWT_SECRET required");
    let stripe_secret_key = env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY required");
    let stripe_webhook_secret =
        env::var("STRIPE_WEBHOOK_SECRET").expect("STRIPE_WEBHOOK_SECRET required");
    let stripe_product_id = env::var("STRIPE_PRODUCT_ID").expect("STRIPE_PRODUCT_ID required");

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let state = web::Data::new(AppState {
        pool,
        stripe: StripeClient::new(stripe_secret_key),
        stripe_webhook_secret,
        stripe_product_id,
        registry: ConnectionRegistry::new(),
    });

    log::info!("listening on {bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .route("/api-docs/openapi.json", web::get().to(openapi_json))
            // Public routes
            .service(api::auth::register)
            .service(api::auth::login)
            .service(api::webhooks::stripe_webhook)
            // SSE authenticates via ?token=, EventSource cannot set headers
            .route("/messages/sse", web::get().to(api::messages::message_stream))
            // Protected routes
            .service(
                web::scope("/api")
                    .wrap(api::auth::JwtMiddleware)
                    .service(api::messages::list_messages)
                    .service(api::messages::send_message)
                    .service(api::messages::mark_read)
                    .service(api::messages::delete_conversation)
                    // Literal subscription paths go before the {id} routes.
                    .service(api::subscriptions::list_subscriptions)
                    .service(api::subscriptions::create_subscription)
                    .service(api::subscriptions::cancel_subscription)
                    .service(api::subscriptions::pause_subscription)
                    .service(api::subscriptions::check_incomplete_payments)
                    .service(api::subscriptions::check_payment_status)
                    .service(api::subscriptions::retry_payment)
                    .service(api::subscriptions::cancel_pending_payment)
                    .service(api::subscriptions::cleanup_pending)
                    .service(api::subscriptions::get_subscription)
                    .service(api::subscriptions::update_subscription)
                    .service(api::invoices::list_invoices)
                    .service(api::invoices::list_all_invoices)
                    .service(api::payment_methods::list_payment_methods)
                    .service(api::payment_methods::attach_payment_method)
                    .service(api::payment_methods::detach_payment_method)
                    .service(api::payment_methods::set_default_payment_method)
                    .service(api::payment_methods::process_payment),
            )
    })
    .bind(bind_addr)?
    .run()
    .await
}
