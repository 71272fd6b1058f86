pub mod auth;
pub mod invoices;
pub mod messages;
pub mod payment_methods;
pub mod subscriptions;
pub mod webhooks;
