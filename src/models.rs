// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub default_payment_method: Option<String>,
    pub is_admin: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    /// Monthly price in minor currency units.
    pub price: i64,
    pub currency: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Inactive,
    Cancelled,
    Paused,
    Expired,
    PendingPayment,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::PendingPayment => "pending_payment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trial" => Some(SubscriptionStatus::Trial),
            "active" => Some(SubscriptionStatus::Active),
            "inactive" => Some(SubscriptionStatus::Inactive),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "paused" => Some(SubscriptionStatus::Paused),
            "expired" => Some(SubscriptionStatus::Expired),
            "pending_payment" => Some(SubscriptionStatus::PendingPayment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    PaymentFailed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "completed" => Some(OrderStatus::Completed),
            "payment_failed" => Some(OrderStatus::PaymentFailed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Processor-side invoice status. The user-facing remap lives in
/// [`InvoiceStatus::display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
            InvoiceStatus::Uncollectible => "uncollectible",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "open" => Some(InvoiceStatus::Open),
            "paid" => Some(InvoiceStatus::Paid),
            "void" => Some(InvoiceStatus::Void),
            "uncollectible" => Some(InvoiceStatus::Uncollectible),
            _ => None,
        }
    }

    /// Status as shown to the customer.
    pub fn display(&self) -> &'static str {
        match self {
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Draft | InvoiceStatus::Open => "pending",
            InvoiceStatus::Uncollectible => "cancelled",
            InvoiceStatus::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Yearly,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(PlanType::Monthly),
            "yearly" => Some(PlanType::Yearly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseInfo {
    pub reason: String,
    pub from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

/// Structured subscription metadata, serialized into the `metadata` TEXT column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionMetadata {
    pub plan_type: PlanType,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause: Option<PauseInfo>,
}

impl SubscriptionMetadata {
    pub fn new(plan_type: PlanType, quantity: i64, coupon: Option<String>) -> Self {
        Self {
            plan_type,
            quantity,
            coupon,
            cancellation: None,
            pause: None,
        }
    }

    /// Rows written before the structured format default to a monthly
    /// single-quantity plan.
    pub fn from_column(raw: Option<&str>) -> Self {
        raw.and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| SubscriptionMetadata::new(PlanType::Monthly, 1, None))
    }

    pub fn to_column(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: i32,
    pub user_id: i32,
    pub service_id: i32,
    pub status: SubscriptionStatus,
    pub price: i64,
    pub usage_count: i32,
    pub stripe_subscription_id: Option<String>,
    pub metadata: SubscriptionMetadata,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    pub subscription_id: Option<i32>,
    pub status: OrderStatus,
    pub amount: i64,
    pub currency: String,
    pub stripe_payment_intent_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: i32,
    pub user_id: i32,
    pub subscription_id: Option<i32>,
    pub stripe_invoice_id: String,
    pub status: InvoiceStatus,
    /// User-facing remap of `status` (`paid`/`pending`/`cancelled`/`void`).
    pub display_status: &'static str,
    pub total: i64,
    pub amount_paid: i64,
    pub amount_remaining: i64,
    pub currency: String,
    pub due_date: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i32,
    pub user_id: i32,
    pub content: String,
    pub is_from_admin: bool,
    pub is_read: bool,
    pub created_at: Option<DateTime<Utc>>,
}
