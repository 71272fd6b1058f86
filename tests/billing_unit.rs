use chrono::{Duration, TimeZone, Utc};

use seo_portal::billing::{
    initial_invoice_status, invoice_due_date, is_dead_remote_status, map_processor_invoice_status,
    renewal_date, subscription_price, trial_end_date,
};
use seo_portal::models::{InvoiceStatus, PlanType, SubscriptionMetadata};

#[test]
fn monthly_price_multiplies_quantity() {
    assert_eq!(subscription_price(100_000, PlanType::Monthly, 1), 100_000);
    assert_eq!(subscription_price(100_000, PlanType::Monthly, 3), 300_000);
}

#[test]
fn yearly_price_applies_ten_percent_discount() {
    // 100000 * 0.9 * 12 = 1_080_000
    assert_eq!(subscription_price(100_000, PlanType::Yearly, 1), 1_080_000);
    assert_eq!(subscription_price(100_000, PlanType::Yearly, 2), 2_160_000);
}

#[test]
fn yearly_price_rounds_before_quantity() {
    // 3333 * 0.9 * 12 = 35996.4 -> 35996 per unit
    assert_eq!(subscription_price(3_333, PlanType::Yearly, 1), 35_996);
    assert_eq!(subscription_price(3_333, PlanType::Yearly, 10), 359_960);
}

#[test]
fn invoice_due_at_trial_end_when_trialing() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let trial_end = trial_end_date(now, 7);
    assert_eq!(trial_end, now + Duration::days(7));
    assert_eq!(invoice_due_date(now, Some(trial_end)), trial_end);
}

#[test]
fn invoice_due_net_14_without_trial() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    assert_eq!(invoice_due_date(now, None), now + Duration::days(14));
}

#[test]
fn initial_invoice_status_depends_on_trial() {
    assert_eq!(initial_invoice_status(true), InvoiceStatus::Open);
    assert_eq!(initial_invoice_status(false), InvoiceStatus::Paid);
}

#[test]
fn renewal_advances_by_plan_interval() {
    let from = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
    // Jan 31 + 1 month clamps to Feb 28.
    assert_eq!(
        renewal_date(from, PlanType::Monthly),
        Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
    );
    assert_eq!(
        renewal_date(from, PlanType::Yearly),
        Utc.with_ymd_and_hms(2027, 1, 31, 0, 0, 0).unwrap()
    );
}

#[test]
fn processor_invoice_status_mapping() {
    assert_eq!(map_processor_invoice_status("paid"), InvoiceStatus::Paid);
    assert_eq!(map_processor_invoice_status("draft"), InvoiceStatus::Draft);
    assert_eq!(map_processor_invoice_status("void"), InvoiceStatus::Void);
    assert_eq!(
        map_processor_invoice_status("uncollectible"),
        InvoiceStatus::Uncollectible
    );
    // Unknown values still sync as open.
    assert_eq!(map_processor_invoice_status("???"), InvoiceStatus::Open);
}

#[test]
fn invoice_display_status_remap() {
    assert_eq!(InvoiceStatus::Paid.display(), "paid");
    assert_eq!(InvoiceStatus::Draft.display(), "pending");
    assert_eq!(InvoiceStatus::Open.display(), "pending");
    assert_eq!(InvoiceStatus::Uncollectible.display(), "cancelled");
    assert_eq!(InvoiceStatus::Void.display(), "void");
}

#[test]
fn dead_remote_statuses() {
    assert!(is_dead_remote_status("canceled"));
    assert!(is_dead_remote_status("unpaid"));
    assert!(is_dead_remote_status("incomplete_expired"));
    assert!(!is_dead_remote_status("incomplete"));
    assert!(!is_dead_remote_status("active"));
    assert!(!is_dead_remote_status("past_due"));
}

#[test]
fn metadata_column_round_trip() {
    let meta = SubscriptionMetadata::new(PlanType::Yearly, 3, Some("WELCOME10".to_string()));
    let raw = meta.to_column();
    let parsed = SubscriptionMetadata::from_column(Some(&raw));
    assert_eq!(parsed.plan_type, PlanType::Yearly);
    assert_eq!(parsed.quantity, 3);
    assert_eq!(parsed.coupon.as_deref(), Some("WELCOME10"));
    assert!(parsed.cancellation.is_none());
    assert!(parsed.pause.is_none());
}

#[test]
fn metadata_defaults_for_legacy_rows() {
    for raw in [None, Some(""), Some("not json"), Some("42")] {
        let parsed = SubscriptionMetadata::from_column(raw);
        assert_eq!(parsed.plan_type, PlanType::Monthly);
        assert_eq!(parsed.quantity, 1);
        assert!(parsed.coupon.is_none());
    }
}
