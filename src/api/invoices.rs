// src/api/invoices.rs
//
// Invoice listing with opportunistic synchronization: before reading local
// rows, the user endpoint pulls the customer's most recent processor
// invoices and upserts them (keyed on the unique stripe_invoice_id). A
// processor failure is logged and the endpoint still serves local data.

use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use serde_json::json;

use crate::api::auth::AuthUser;
use crate::models::Invoice;
use crate::{db, AppState};

/// How many recent processor invoices the list endpoint syncs.
const SYNC_LIMIT: u32 = 10;

pub(crate) async fn sync_recent_invoices(state: &AppState, user_id: i32, customer_id: &str) {
    let list = match state.stripe.list_invoices(customer_id, SYNC_LIMIT).await {
        Ok(l) => l,
        Err(e) => {
            log::warn!("invoice sync skipped: {e} user_id={user_id}");
            return;
        }
    };

    for invoice in &list.data {
        if let Err(e) = db::upsert_invoice_from_processor(&state.pool, user_id, None, invoice).await
        {
            eprintln!("invoice upsert error: {e} stripe_invoice_id={}", invoice.id);
        }
    }
}

#[get("/invoices")]
pub async fn list_invoices(
    auth: web::ReqData<AuthUser>,
    state: web::Data<AppState>,
) -> impl Responder {
    let user = match db::get_user(&state.pool, auth.id).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({"error": "Utilizatorul nu a fost găsit"}));
        }
        Err(e) => {
            eprintln!("list_invoices db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    if let Some(customer_id) = user.stripe_customer_id.as_deref() {
        sync_recent_invoices(&state, auth.id, customer_id).await;
    }

    match db::list_user_invoices(&state.pool, auth.id).await {
        Ok(invoices) => HttpResponse::Ok().json(invoices),
        Err(e) => {
            eprintln!("list_user_invoices db error: {e}");
            HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminInvoice {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub user_email: String,
    pub user_name: Option<String>,
}

#[get("/admin/invoices")]
pub async fn list_all_invoices(
    auth: web::ReqData<AuthUser>,
    state: web::Data<AppState>,
) -> impl Responder {
    if !auth.is_admin {
        return HttpResponse::Unauthorized().json(json!({"error": "Admin access required"}));
    }

    match db::list_all_invoices(&state.pool).await {
        Ok(rows) => {
            let invoices: Vec<AdminInvoice> = rows
                .into_iter()
                .map(|(invoice, user_email, user_name)| AdminInvoice {
                    invoice,
                    user_email,
                    user_name,
                })
                .collect();
            HttpResponse::Ok().json(invoices)
        }
        Err(e) => {
            eprintln!("list_all_invoices db error: {e}");
            HttpResponse::InternalServerError().json(json!({"error": "Failed to list invoices"}))
        }
    }
}
