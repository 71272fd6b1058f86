use chrono::Utc;
use sqlx::PgPool;
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};

use seo_portal::registry::ConnectionRegistry;
use seo_portal::stripe_client::{sign_hmac_sha256_hex, StripeClient};
use seo_portal::AppState;

pub const TEST_STRIPE_SECRET: &str = "sk_test_123";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Recreates the test database and runs migrations. Returns `None` when
/// `TEST_DATABASE_URL` is not set, so DB-backed tests turn into no-ops on
/// machines without Postgres.
pub async fn init_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let test_url = match env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set, skipping");
            return None;
        }
    };
    let (admin_url, db_name) = split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url).await.expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    let create_result = sqlx::query(&create_sql).execute(&admin_pool).await;
    if let Err(e) = create_result {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    Some(TestDb {
        pool,
        _guard: guard,
    })
}

/// State wired against a mock Stripe server.
pub fn build_state(pool: PgPool, stripe_base_url: &str) -> AppState {
    AppState {
        pool,
        stripe: StripeClient::with_base_url(
            TEST_STRIPE_SECRET.to_string(),
            stripe_base_url.to_string(),
        ),
        stripe_webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        stripe_product_id: "prod_test".to_string(),
        registry: ConnectionRegistry::new(),
    }
}

/// Valid `Stripe-Signature` header for `body`, timestamped now.
#[allow(dead_code)]
pub fn stripe_signature(secret: &str, body: &str) -> String {
    let ts = Utc::now().timestamp();
    let sig = sign_hmac_sha256_hex(secret, &format!("{ts}.{body}"));
    format!("t={ts},v1={sig}")
}
