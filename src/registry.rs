// src/registry.rs
//
// Process-wide registry of live SSE viewer connections. One channel per user:
// a second connection for the same user evicts the first from the map (the
// evicted stream is not closed here, it ends when its client drops).
//
// Delivery is best-effort and fire-and-forget: no ack, no retry, no queueing.
// A recipient that is not connected simply misses the event and catches up on
// its next full fetch of /messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::web::Bytes;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::ChatMessage;

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(1);

/// Push events delivered over the SSE channel, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Connected { user_id: i32 },
    NewMessage { message: ChatMessage },
    MessageRead { user_id: i32, message_ids: Vec<i32> },
    ConversationDeleted { user_id: i32 },
}

struct ConnectionHandle {
    session_id: usize,
    tx: UnboundedSender<Bytes>,
    is_admin: bool,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<i32, ConnectionHandle>>>,
}

/// One event as a Server-Sent-Events frame.
pub fn sse_frame(event: &ChatEvent) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {json}\n\n"))
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the channel for `user_id`, replacing any prior entry. Returns
    /// the session id the caller must pass back to `unregister`.
    pub fn register(&self, user_id: i32, tx: UnboundedSender<Bytes>, is_admin: bool) -> usize {
        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let mut map = self.inner.lock().unwrap();
        map.insert(
            user_id,
            ConnectionHandle {
                session_id,
                tx,
                is_admin,
            },
        );
        session_id
    }

    /// Removes the mapping, but only if it still belongs to `session_id` so a
    /// stale disconnect cannot evict a newer channel for the same user.
    pub fn unregister(&self, user_id: i32, session_id: usize) {
        let mut map = self.inner.lock().unwrap();
        if map
            .get(&user_id)
            .map(|h| h.session_id == session_id)
            .unwrap_or(false)
        {
            map.remove(&user_id);
        }
    }

    /// Delivers `event` to the user's channel if one is open. A failed write
    /// means the client is gone: the entry is removed. Returns whether the
    /// frame was handed to a live channel.
    pub fn send_to_user(&self, user_id: i32, event: &ChatEvent) -> bool {
        let frame = sse_frame(event);
        let mut map = self.inner.lock().unwrap();
        match map.get(&user_id) {
            Some(handle) => {
                if handle.tx.send(frame).is_err() {
                    map.remove(&user_id);
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// Delivers `event` to every registered admin channel, dropping the dead
    /// ones. A failure on one channel does not block the others.
    pub fn broadcast_to_admins(&self, event: &ChatEvent) {
        let frame = sse_frame(event);
        let mut map = self.inner.lock().unwrap();
        let mut dead: Vec<i32> = Vec::new();
        for (user_id, handle) in map.iter() {
            if handle.is_admin && handle.tx.send(frame.clone()).is_err() {
                dead.push(*user_id);
            }
        }
        for user_id in dead {
            map.remove(&user_id);
        }
    }

    pub fn is_connected(&self, user_id: i32) -> bool {
        self.inner.lock().unwrap().contains_key(&user_id)
    }
}
