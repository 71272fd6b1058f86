// src/api/messages.rs
//
// Support chat: one conversation per user (all messages with that user_id,
// whoever authored them). Live delivery goes through the connection
// registry; clients without a live channel fall back to polling GET /messages.

use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::web::Bytes;
use actix_web::{delete, get, patch, post, web, Error, HttpRequest, HttpResponse, Responder};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::api::auth::{decode_token, AuthUser};
use crate::registry::{sse_frame, ChatEvent, ConnectionRegistry};
use crate::{db, AppState};

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub user_id: Option<i32>,
}

/// Conversation owner targeted by an admin request, or the caller itself.
fn resolve_conversation(auth: &AuthUser, requested: Option<i32>) -> Result<i32, HttpResponse> {
    if auth.is_admin {
        requested.ok_or_else(|| {
            HttpResponse::BadRequest().json(json!({"error": "user_id is required"}))
        })
    } else {
        Ok(auth.id)
    }
}

#[get("/messages")]
pub async fn list_messages(
    auth: web::ReqData<AuthUser>,
    query: web::Query<ConversationQuery>,
    state: web::Data<AppState>,
) -> impl Responder {
    let conversation = match resolve_conversation(&auth, query.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match db::list_messages(&state.pool, conversation).await {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => {
            eprintln!("list_messages db error: {e}");
            HttpResponse::InternalServerError().json(json!({"error": "A apărut o eroare"}))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    /// Conversation target, admin senders only.
    pub user_id: Option<i32>,
}

#[post("/messages")]
pub async fn send_message(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<SendMessageRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    if payload.content.trim().is_empty() {
        return HttpResponse::BadRequest().json(json!({"error": "Mesajul nu poate fi gol"}));
    }

    let conversation = match resolve_conversation(&auth, payload.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let message =
        match db::insert_message(&state.pool, conversation, &payload.content, auth.is_admin).await
        {
            Ok(m) => m,
            Err(e) => {
                eprintln!("send_message db error: {e}");
                return HttpResponse::InternalServerError()
                    .json(json!({"error": "Mesajul nu a putut fi trimis"}));
            }
        };

    let event = ChatEvent::NewMessage {
        message: message.clone(),
    };
    if auth.is_admin {
        state.registry.send_to_user(conversation, &event);
    }
    state.registry.broadcast_to_admins(&event);

    HttpResponse::Ok().json(message)
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: Option<i32>,
}

/// Marks the counterpart's messages in the conversation as read: a user
/// clears admin-authored messages, an admin clears user-authored ones.
#[patch("/messages")]
pub async fn mark_read(
    auth: web::ReqData<AuthUser>,
    payload: web::Json<MarkReadRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let conversation = match resolve_conversation(&auth, payload.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let from_admin = !auth.is_admin;
    let ids = match db::mark_messages_read(&state.pool, conversation, from_admin).await {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("mark_read db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "A apărut o eroare"}));
        }
    };

    if !ids.is_empty() {
        let event = ChatEvent::MessageRead {
            user_id: conversation,
            message_ids: ids.clone(),
        };
        state.registry.send_to_user(conversation, &event);
        state.registry.broadcast_to_admins(&event);
    }

    HttpResponse::Ok().json(json!({"success": true, "marked": ids.len()}))
}

#[delete("/messages")]
pub async fn delete_conversation(
    auth: web::ReqData<AuthUser>,
    query: web::Query<ConversationQuery>,
    state: web::Data<AppState>,
) -> impl Responder {
    if !auth.is_admin {
        return HttpResponse::Unauthorized().json(json!({"error": "Admin access required"}));
    }
    let Some(target) = query.user_id else {
        return HttpResponse::BadRequest().json(json!({"error": "user_id is required"}));
    };

    let deleted = match db::delete_conversation(&state.pool, target).await {
        Ok(n) => n,
        Err(e) => {
            eprintln!("delete_conversation db error: {e}");
            return HttpResponse::InternalServerError()
                .json(json!({"error": "Failed to delete conversation"}));
        }
    };

    // Both the target user (if connected) and every admin get the event,
    // including the admin who issued the delete.
    let event = ChatEvent::ConversationDeleted { user_id: target };
    state.registry.send_to_user(target, &event);
    state.registry.broadcast_to_admins(&event);

    HttpResponse::Ok().json(json!({"success": true, "deleted": deleted}))
}

#[derive(Deserialize)]
struct SseQuery {
    token: String,
}

/// SSE body stream that unregisters its connection when the client drops.
struct ClientStream {
    rx: UnboundedReceiverStream<Bytes>,
    registry: ConnectionRegistry,
    user_id: i32,
    session_id: usize,
}

impl Stream for ClientStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx).map(|item| item.map(Ok))
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.registry.unregister(self.user_id, self.session_id);
    }
}

/// `GET /messages/sse?token=<jwt>` — push channel for chat events.
/// EventSource cannot set headers, so the token travels in the query string.
pub async fn message_stream(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let token = serde_urlencoded::from_str::<SseQuery>(req.query_string())
        .ok()
        .map(|q| q.token)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return Err(actix_web::error::ErrorUnauthorized("Missing token"));
    };

    let user = decode_token(&token)?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Bytes>();
    let session_id = state.registry.register(user.id, tx.clone(), user.is_admin);

    // Initial event so the client knows the channel is live and can tear
    // down its polling fallback.
    let _ = tx.send(sse_frame(&ChatEvent::Connected { user_id: user.id }));

    let stream = ClientStream {
        rx: UnboundedReceiverStream::new(rx),
        registry: state.registry.clone(),
        user_id: user.id,
        session_id,
    };

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream))
}
