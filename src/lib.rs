pub mod api;
pub mod billing;
pub mod db;
pub mod docs;
pub mod models;
pub mod registry;
pub mod stripe_client;

use sqlx::PgPool;

use crate::registry::ConnectionRegistry;
use crate::stripe_client::StripeClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub stripe: StripeClient,
    pub stripe_webhook_secret: String,
    /// Stripe product the inline subscription prices are attached to.
    pub stripe_product_id: String,
    pub registry: ConnectionRegistry,
}
