// src/stripe_client.rs
//
// Minimal client for the Stripe HTTP API (https://api.stripe.com).
// Requests are form-encoded, authorization via bearer secret key.
// The base URL can be overridden with STRIPE_API_BASE_URL for tests.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Webhook signatures older than this are rejected.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug)]
pub enum StripeError {
    Http(reqwest::Error),
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },
    InvalidResponse(String),
}

impl fmt::Display for StripeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StripeError::Http(e) => write!(f, "http error: {e}"),
            StripeError::Api {
                status,
                message,
                code,
            } => write!(
                f,
                "stripe api error status={status} code={} message={message}",
                code.as_deref().unwrap_or("-")
            ),
            StripeError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl From<reqwest::Error> for StripeError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl StripeError {
    /// True for 404-style "no such object" responses, which the cleanup
    /// flows treat as a dead remote counterpart rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StripeError::Api { status: 404, .. })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

/// Stripe returns either a bare id or the expanded object depending on the
/// `expand[]` parameters of the request.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> Expandable<T> {
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(o) => Some(o),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub status: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionInvoice {
    pub id: String,
    pub payment_intent: Option<Expandable<StripePaymentIntent>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    pub cancel_at_period_end: Option<bool>,
    pub latest_invoice: Option<Expandable<StripeSubscriptionInvoice>>,
}

impl StripeSubscription {
    pub fn latest_invoice_id(&self) -> Option<&str> {
        match self.latest_invoice.as_ref()? {
            Expandable::Id(id) => Some(id),
            Expandable::Object(inv) => Some(&inv.id),
        }
    }

    /// Payment intent of the latest invoice, when the request expanded it.
    pub fn payment_intent(&self) -> Option<&StripePaymentIntent> {
        self.latest_invoice
            .as_ref()
            .and_then(|inv| inv.as_object())
            .and_then(|inv| inv.payment_intent.as_ref())
            .and_then(|pi| pi.as_object())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeStatusTransitions {
    pub paid_at: Option<i64>,
    pub voided_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub status: Option<String>,
    pub total: Option<i64>,
    pub amount_paid: Option<i64>,
    pub amount_remaining: Option<i64>,
    pub currency: Option<String>,
    pub due_date: Option<i64>,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf: Option<String>,
    pub status_transitions: Option<StripeStatusTransitions>,
}

// Serialize as well: the card object is echoed back in the payment-method
// listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeCard {
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentMethod {
    pub id: String,
    pub card: Option<StripeCard>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub customer: String,
    /// Stripe product id the inline price is attached to.
    pub product: String,
    pub currency: String,
    /// Full price in minor units (quantity already folded in).
    pub unit_amount: i64,
    /// `month` or `year`.
    pub interval: String,
    pub trial_period_days: Option<i64>,
    pub coupon: Option<String>,
    pub default_payment_method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePaymentIntentRequest {
    pub amount: i64,
    pub currency: String,
    pub customer: String,
    pub payment_method: String,
    /// `metadata[...]` key/value pairs carried back by the webhook.
    pub metadata: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        let base_url =
            std::env::var("STRIPE_API_BASE_URL").unwrap_or_else(|_| STRIPE_API_BASE.to_string());
        Self::with_base_url(secret_key, base_url)
    }

    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            base_url,
        }
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let (message, code) = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(parsed) => (
                    parsed.error.message.unwrap_or_else(|| body.clone()),
                    parsed.error.code,
                ),
                Err(_) => (body.clone(), None),
            };
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
                code,
            });
        }

        serde_json::from_str::<T>(&body)
            .map_err(|e| StripeError::InvalidResponse(format!("{e}; body={body}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, StripeError> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, StripeError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    async fn delete_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, StripeError> {
        let resp = self
            .http
            .delete(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> Result<StripeCustomer, StripeError> {
        let mut params = vec![("email".to_string(), email.to_string())];
        if let Some(name) = name {
            params.push(("name".to_string(), name.to_string()));
        }
        self.post_form("/v1/customers", &params).await
    }

    pub async fn create_subscription(
        &self,
        req: CreateSubscriptionRequest,
    ) -> Result<StripeSubscription, StripeError> {
        let mut params = vec![
            ("customer".to_string(), req.customer),
            ("items[0][price_data][product]".to_string(), req.product),
            ("items[0][price_data][currency]".to_string(), req.currency),
            (
                "items[0][price_data][unit_amount]".to_string(),
                req.unit_amount.to_string(),
            ),
            (
                "items[0][price_data][recurring][interval]".to_string(),
                req.interval,
            ),
            ("items[0][quantity]".to_string(), "1".to_string()),
            (
                "payment_behavior".to_string(),
                "default_incomplete".to_string(),
            ),
            (
                "expand[]".to_string(),
                "latest_invoice.payment_intent".to_string(),
            ),
        ];
        if let Some(days) = req.trial_period_days {
            params.push(("trial_period_days".to_string(), days.to_string()));
        }
        if let Some(coupon) = req.coupon {
            params.push(("coupon".to_string(), coupon));
        }
        if let Some(pm) = req.default_payment_method {
            params.push(("default_payment_method".to_string(), pm));
        }
        self.post_form("/v1/subscriptions", &params).await
    }

    pub async fn retrieve_subscription(&self, id: &str) -> Result<StripeSubscription, StripeError> {
        self.get_json(
            &format!("/v1/subscriptions/{id}"),
            &[("expand[]", "latest_invoice.payment_intent")],
        )
        .await
    }

    pub async fn cancel_subscription(&self, id: &str) -> Result<StripeSubscription, StripeError> {
        self.delete_json(&format!("/v1/subscriptions/{id}")).await
    }

    pub async fn set_cancel_at_period_end(
        &self,
        id: &str,
        cancel: bool,
    ) -> Result<StripeSubscription, StripeError> {
        let params = vec![("cancel_at_period_end".to_string(), cancel.to_string())];
        self.post_form(&format!("/v1/subscriptions/{id}"), &params)
            .await
    }

    pub async fn pause_subscription(&self, id: &str) -> Result<StripeSubscription, StripeError> {
        let params = vec![(
            "pause_collection[behavior]".to_string(),
            "void".to_string(),
        )];
        self.post_form(&format!("/v1/subscriptions/{id}"), &params)
            .await
    }

    pub async fn confirm_payment_intent(
        &self,
        id: &str,
        payment_method: Option<&str>,
    ) -> Result<StripePaymentIntent, StripeError> {
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(pm) = payment_method {
            params.push(("payment_method".to_string(), pm.to_string()));
        }
        self.post_form(&format!("/v1/payment_intents/{id}/confirm"), &params)
            .await
    }

    pub async fn create_payment_intent(
        &self,
        req: CreatePaymentIntentRequest,
    ) -> Result<StripePaymentIntent, StripeError> {
        let mut params = vec![
            ("amount".to_string(), req.amount.to_string()),
            ("currency".to_string(), req.currency),
            ("customer".to_string(), req.customer),
            ("payment_method".to_string(), req.payment_method),
            ("confirm".to_string(), "true".to_string()),
            ("off_session".to_string(), "true".to_string()),
        ];
        for (key, value) in req.metadata {
            params.push((format!("metadata[{key}]"), value));
        }
        self.post_form("/v1/payment_intents", &params).await
    }

    pub async fn list_invoices(
        &self,
        customer: &str,
        limit: u32,
    ) -> Result<StripeList<StripeInvoice>, StripeError> {
        self.get_json(
            "/v1/invoices",
            &[("customer", customer), ("limit", &limit.to_string())],
        )
        .await
    }

    pub async fn attach_payment_method(
        &self,
        payment_method: &str,
        customer: &str,
    ) -> Result<StripePaymentMethod, StripeError> {
        let params = vec![("customer".to_string(), customer.to_string())];
        self.post_form(
            &format!("/v1/payment_methods/{payment_method}/attach"),
            &params,
        )
        .await
    }

    pub async fn detach_payment_method(
        &self,
        payment_method: &str,
    ) -> Result<StripePaymentMethod, StripeError> {
        self.post_form(&format!("/v1/payment_methods/{payment_method}/detach"), &[])
            .await
    }

    pub async fn list_payment_methods(
        &self,
        customer: &str,
    ) -> Result<StripeList<StripePaymentMethod>, StripeError> {
        self.get_json(
            &format!("/v1/customers/{customer}/payment_methods"),
            &[("type", "card")],
        )
        .await
    }

    pub async fn set_default_payment_method(
        &self,
        customer: &str,
        payment_method: &str,
    ) -> Result<StripeCustomer, StripeError> {
        let params = vec![(
            "invoice_settings[default_payment_method]".to_string(),
            payment_method.to_string(),
        )];
        self.post_form(&format!("/v1/customers/{customer}"), &params)
            .await
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    MissingTimestamp,
    MissingSignature,
    Expired,
    Mismatch,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::MissingTimestamp => write!(f, "missing timestamp in signature header"),
            SignatureError::MissingSignature => write!(f, "missing v1 signature"),
            SignatureError::Expired => write!(f, "signature timestamp outside tolerance"),
            SignatureError::Mismatch => write!(f, "signature mismatch"),
        }
    }
}

/// HMAC-SHA256 in hex over `data`, keyed with `secret`. Also used by tests to
/// build valid `Stripe-Signature` headers.
pub fn sign_hmac_sha256_hex(secret: &str, data: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a `Stripe-Signature` header (`t=<ts>,v1=<hex>`) against the raw
/// request body: the expected signature is HMAC-SHA256 over `"{t}.{body}"`.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
) -> Result<(), SignatureError> {
    verify_webhook_signature_at(secret, payload, header, chrono::Utc::now().timestamp())
}

pub fn verify_webhook_signature_at(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let body = String::from_utf8_lossy(payload);
    let expected = sign_hmac_sha256_hex(secret, &format!("{timestamp}.{body}"));

    if signatures.iter().any(|s| *s == expected) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
