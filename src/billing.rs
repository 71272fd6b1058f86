// src/billing.rs
//
// Pricing and lifecycle date rules shared by the subscription handlers and
// the webhook consumer.

use chrono::{DateTime, Duration, Months, Utc};

use crate::models::{InvoiceStatus, PlanType};

/// Invoices without a trial are due net-14.
pub const NET_DUE_DAYS: i64 = 14;

/// Yearly plans get a flat 10% discount over 12x the monthly price.
const YEARLY_DISCOUNT: f64 = 0.9;

/// Total subscription price in minor units for a service with the given
/// monthly price. The discount applies before quantity multiplication.
pub fn subscription_price(monthly_price: i64, plan_type: PlanType, quantity: i64) -> i64 {
    match plan_type {
        PlanType::Monthly => monthly_price * quantity,
        PlanType::Yearly => {
            let yearly = (monthly_price as f64 * YEARLY_DISCOUNT * 12.0).round() as i64;
            yearly * quantity
        }
    }
}

/// Trial invoices are due when the trial ends, everything else net-14.
pub fn invoice_due_date(now: DateTime<Utc>, trial_end: Option<DateTime<Utc>>) -> DateTime<Utc> {
    trial_end.unwrap_or(now + Duration::days(NET_DUE_DAYS))
}

/// Initial local invoice status for a freshly created subscription: paid when
/// the subscription starts active immediately, pending (open) while trialing.
pub fn initial_invoice_status(has_trial: bool) -> InvoiceStatus {
    if has_trial {
        InvoiceStatus::Open
    } else {
        InvoiceStatus::Paid
    }
}

pub fn trial_end_date(now: DateTime<Utc>, trial_days: i64) -> DateTime<Utc> {
    now + Duration::days(trial_days)
}

/// Next renewal from `from`, recomputed whenever the plan type changes.
pub fn renewal_date(from: DateTime<Utc>, plan_type: PlanType) -> DateTime<Utc> {
    let months = match plan_type {
        PlanType::Monthly => 1,
        PlanType::Yearly => 12,
    };
    from.checked_add_months(Months::new(months)).unwrap_or(from)
}

/// Maps a processor invoice status string onto the local enum. Unknown values
/// fall back to `open` so the row still syncs.
pub fn map_processor_invoice_status(status: &str) -> InvoiceStatus {
    InvoiceStatus::parse(status).unwrap_or(InvoiceStatus::Open)
}

/// Remote subscription statuses that mean the pending_payment row has no
/// recoverable payment and can be cleaned up.
pub fn is_dead_remote_status(status: &str) -> bool {
    matches!(status, "canceled" | "unpaid" | "incomplete_expired")
}
