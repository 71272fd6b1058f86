// src/db.rs

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{
    ChatMessage, Invoice, InvoiceStatus, OrderStatus, Service, Subscription, SubscriptionMetadata,
    SubscriptionStatus, User,
};
use crate::stripe_client::StripeInvoice;

// --- users ---

fn map_user_row(r: &PgRow) -> User {
    User {
        id: r.get("id"),
        email: r.get("email"),
        password_hash: r.get("password_hash"),
        name: r.get("name"),
        company: r.get("company"),
        tax_id: r.get("tax_id"),
        address: r.get("address"),
        phone: r.get("phone"),
        stripe_customer_id: r.get("stripe_customer_id"),
        default_payment_method: r.get("default_payment_method"),
        is_admin: r.get("is_admin"),
        created_at: r.get("created_at"),
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, name, company, tax_id, address, phone, \
     stripe_customer_id, default_payment_method, is_admin, created_at";

pub async fn get_user(pool: &PgPool, id: i32) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(map_user_row))
}

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(map_user_row))
}

pub async fn set_stripe_customer_id(
    pool: &PgPool,
    user_id: i32,
    customer_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET stripe_customer_id = $1 WHERE id = $2")
        .bind(customer_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_default_payment_method(
    pool: &PgPool,
    user_id: i32,
    payment_method: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET default_payment_method = $1 WHERE id = $2")
        .bind(payment_method)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

// --- services ---

pub async fn get_service(pool: &PgPool, id: i32) -> Result<Option<Service>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, name, description, price, currency, is_active
           FROM services
           WHERE id = $1 AND is_active = true"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Service {
        id: r.get("id"),
        name: r.get("name"),
        description: r.get("description"),
        price: r.get("price"),
        currency: r.get("currency"),
        is_active: r.get("is_active"),
    }))
}

// --- subscriptions ---

fn map_subscription_row(r: &PgRow) -> Subscription {
    let status: String = r.get("status");
    let metadata: Option<String> = r.get("metadata");
    Subscription {
        id: r.get("id"),
        user_id: r.get("user_id"),
        service_id: r.get("service_id"),
        status: SubscriptionStatus::parse(&status).unwrap_or(SubscriptionStatus::Inactive),
        price: r.get("price"),
        usage_count: r.get("usage_count"),
        stripe_subscription_id: r.get("stripe_subscription_id"),
        metadata: SubscriptionMetadata::from_column(metadata.as_deref()),
        start_date: r.get("start_date"),
        end_date: r.get("end_date"),
        trial_end: r.get("trial_end"),
        renewal_date: r.get("renewal_date"),
        cancelled_at: r.get("cancelled_at"),
        created_at: r.get("created_at"),
    }
}

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, service_id, status, price, usage_count, stripe_subscription_id, metadata, \
     start_date, end_date, trial_end, renewal_date, cancelled_at, created_at";

pub async fn get_subscription_for_user(
    pool: &PgPool,
    id: i32,
    user_id: i32,
) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(map_subscription_row))
}

pub async fn list_user_subscriptions(
    pool: &PgPool,
    user_id: i32,
) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_subscription_row).collect())
}

/// Application-level check behind the "one active subscription per
/// (user, service)" invariant. Not backed by a constraint, so two concurrent
/// creates can still race.
pub async fn has_active_subscription(
    pool: &PgPool,
    user_id: i32,
    service_id: i32,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT 1 AS present FROM subscriptions
           WHERE user_id = $1 AND service_id = $2 AND status = 'active'
           LIMIT 1"#,
    )
    .bind(user_id)
    .bind(service_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Subscriptions worth polling the processor about: anything non-terminal
/// that has a remote counterpart.
pub async fn list_reconcilable_subscriptions(
    pool: &PgPool,
    user_id: i32,
) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE user_id = $1
           AND stripe_subscription_id IS NOT NULL
           AND status IN ('trial', 'active', 'pending_payment')
         ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_subscription_row).collect())
}

pub async fn list_pending_payment_subscriptions(
    pool: &PgPool,
    user_id: i32,
) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE user_id = $1 AND status = 'pending_payment'
         ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_subscription_row).collect())
}

pub async fn update_subscription_status(
    pool: &PgPool,
    id: i32,
    status: SubscriptionStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE subscriptions SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_subscription_metadata(
    pool: &PgPool,
    id: i32,
    metadata: &SubscriptionMetadata,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE subscriptions SET metadata = $1, updated_at = NOW() WHERE id = $2")
        .bind(metadata.to_column())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_subscription_cancelled(
    pool: &PgPool,
    id: i32,
    metadata: &SubscriptionMetadata,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE subscriptions
           SET status = 'cancelled',
               cancelled_at = COALESCE(cancelled_at, NOW()),
               metadata = $1,
               updated_at = NOW()
           WHERE id = $2"#,
    )
    .bind(metadata.to_column())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Webhook-driven cancellation by remote id. `cancelled_at` keeps its first
/// value so replaying the same event yields the same end state.
pub async fn cancel_subscription_by_stripe_id(
    pool: &PgPool,
    stripe_subscription_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE subscriptions
           SET status = 'cancelled',
               cancelled_at = COALESCE(cancelled_at, NOW()),
               updated_at = NOW()
           WHERE stripe_subscription_id = $1"#,
    )
    .bind(stripe_subscription_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_subscription_plan(
    pool: &PgPool,
    id: i32,
    price: i64,
    renewal_date: DateTime<Utc>,
    metadata: &SubscriptionMetadata,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE subscriptions
           SET price = $1, renewal_date = $2, metadata = $3, updated_at = NOW()
           WHERE id = $4"#,
    )
    .bind(price)
    .bind(renewal_date)
    .bind(metadata.to_column())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_subscription(pool: &PgPool, id: i32) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM subscriptions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// --- orders ---

pub async fn complete_order(
    pool: &PgPool,
    order_id: i32,
    payment_intent_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE orders
           SET status = 'completed', stripe_payment_intent_id = $1, updated_at = NOW()
           WHERE id = $2"#,
    )
    .bind(payment_intent_id)
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fail_order(pool: &PgPool, order_id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE orders SET status = 'payment_failed', updated_at = NOW() WHERE id = $1",
    )
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn get_order_status(
    pool: &PgPool,
    order_id: i32,
) -> Result<Option<OrderStatus>, sqlx::Error> {
    let row = sqlx::query("SELECT status FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|r| OrderStatus::parse(&r.get::<String, _>("status"))))
}

// --- invoices ---

fn map_invoice_row(r: &PgRow) -> Invoice {
    let status: String = r.get("status");
    let status = InvoiceStatus::parse(&status).unwrap_or(InvoiceStatus::Open);
    Invoice {
        id: r.get("id"),
        user_id: r.get("user_id"),
        subscription_id: r.get("subscription_id"),
        stripe_invoice_id: r.get("stripe_invoice_id"),
        status,
        display_status: status.display(),
        total: r.get("total"),
        amount_paid: r.get("amount_paid"),
        amount_remaining: r.get("amount_remaining"),
        currency: r.get("currency"),
        due_date: r.get("due_date"),
        paid_at: r.get("paid_at"),
        voided_at: r.get("voided_at"),
        hosted_invoice_url: r.get("hosted_invoice_url"),
        invoice_pdf: r.get("invoice_pdf"),
        created_at: r.get("created_at"),
    }
}

const INVOICE_COLUMNS: &str =
    "id, user_id, subscription_id, stripe_invoice_id, status, total, amount_paid, \
     amount_remaining, currency, due_date, paid_at, voided_at, hosted_invoice_url, invoice_pdf, \
     created_at";

pub async fn get_invoice(pool: &PgPool, id: i32) -> Result<Option<Invoice>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(map_invoice_row))
}

pub async fn list_user_invoices(pool: &PgPool, user_id: i32) -> Result<Vec<Invoice>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_invoice_row).collect())
}

pub async fn list_all_invoices(
    pool: &PgPool,
) -> Result<Vec<(Invoice, String, Option<String>)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT i.id, i.user_id, i.subscription_id, i.stripe_invoice_id, i.status, i.total,
                  i.amount_paid, i.amount_remaining, i.currency, i.due_date, i.paid_at,
                  i.voided_at, i.hosted_invoice_url, i.invoice_pdf, i.created_at,
                  u.email, u.name
           FROM invoices i
           JOIN users u ON u.id = i.user_id
           ORDER BY i.created_at DESC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| (map_invoice_row(r), r.get("email"), r.get("name")))
        .collect())
}

fn from_unix(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
}

/// Upserts the local mirror of a processor invoice, keyed on the unique
/// `stripe_invoice_id`. Re-syncing the same invoice updates the mutable
/// fields and never creates a second row.
pub async fn upsert_invoice_from_processor(
    pool: &PgPool,
    user_id: i32,
    subscription_id: Option<i32>,
    invoice: &StripeInvoice,
) -> Result<i32, sqlx::Error> {
    let status = crate::billing::map_processor_invoice_status(
        invoice.status.as_deref().unwrap_or("open"),
    );
    let transitions = invoice.status_transitions.as_ref();
    let paid_at = from_unix(transitions.and_then(|t| t.paid_at));
    let voided_at = from_unix(transitions.and_then(|t| t.voided_at));

    let row = sqlx::query(
        r#"INSERT INTO invoices
               (user_id, subscription_id, stripe_invoice_id, status, total, amount_paid,
                amount_remaining, currency, due_date, paid_at, voided_at, hosted_invoice_url,
                invoice_pdf)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
           ON CONFLICT (stripe_invoice_id)
           DO UPDATE SET
               status = EXCLUDED.status,
               total = EXCLUDED.total,
               amount_paid = EXCLUDED.amount_paid,
               amount_remaining = EXCLUDED.amount_remaining,
               due_date = EXCLUDED.due_date,
               paid_at = EXCLUDED.paid_at,
               voided_at = EXCLUDED.voided_at,
               hosted_invoice_url = EXCLUDED.hosted_invoice_url,
               invoice_pdf = EXCLUDED.invoice_pdf,
               updated_at = NOW()
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(subscription_id)
    .bind(&invoice.id)
    .bind(status.as_str())
    .bind(invoice.total.unwrap_or(0))
    .bind(invoice.amount_paid.unwrap_or(0))
    .bind(invoice.amount_remaining.unwrap_or(0))
    .bind(invoice.currency.as_deref().unwrap_or("ron"))
    .bind(from_unix(invoice.due_date))
    .bind(paid_at)
    .bind(voided_at)
    .bind(invoice.hosted_invoice_url.as_deref())
    .bind(invoice.invoice_pdf.as_deref())
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

pub async fn mark_invoice_paid(pool: &PgPool, id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE invoices
           SET status = 'paid',
               paid_at = COALESCE(paid_at, NOW()),
               amount_paid = total,
               amount_remaining = 0,
               updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// --- messages ---

fn map_message_row(r: &PgRow) -> ChatMessage {
    ChatMessage {
        id: r.get("id"),
        user_id: r.get("user_id"),
        content: r.get("content"),
        is_from_admin: r.get("is_from_admin"),
        is_read: r.get("is_read"),
        created_at: r.get("created_at"),
    }
}

pub async fn insert_message(
    pool: &PgPool,
    user_id: i32,
    content: &str,
    is_from_admin: bool,
) -> Result<ChatMessage, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO messages (user_id, content, is_from_admin)
           VALUES ($1, $2, $3)
           RETURNING id, user_id, content, is_from_admin, is_read, created_at"#,
    )
    .bind(user_id)
    .bind(content)
    .bind(is_from_admin)
    .fetch_one(pool)
    .await?;
    Ok(map_message_row(&row))
}

pub async fn list_messages(pool: &PgPool, user_id: i32) -> Result<Vec<ChatMessage>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, user_id, content, is_from_admin, is_read, created_at
           FROM messages
           WHERE user_id = $1
           ORDER BY created_at ASC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_message_row).collect())
}

/// Marks the counterpart's unread messages in a conversation as read and
/// returns the affected ids (for the `message_read` push event).
pub async fn mark_messages_read(
    pool: &PgPool,
    user_id: i32,
    from_admin: bool,
) -> Result<Vec<i32>, sqlx::Error> {
    let rows = sqlx::query(
        r#"UPDATE messages
           SET is_read = true
           WHERE user_id = $1 AND is_from_admin = $2 AND is_read = false
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(from_admin)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

pub async fn delete_conversation(pool: &PgPool, user_id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM messages WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
