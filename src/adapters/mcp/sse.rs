use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages/";

const SESSION_BUFFER: usize = 32;

pub type EventStream = Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>;
type EventSender = mpsc::Sender<Result<Event, Infallible>>;

/// Why a message could not be delivered to an SSE session.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    Unknown,
    Closed,
}

/// Open legacy SSE sessions keyed by session id.
///
/// A client opens `GET /sse`, receives an `endpoint` event naming
/// `/messages/?session_id=<id>`, then posts JSON-RPC messages there. Replies
/// travel back as `message` events on the open stream.
#[derive(Clone, Default)]
pub struct SseSessions {
    senders: Arc<Mutex<HashMap<String, EventSender>>>,
}

impl SseSessions {
    /// Registers a new session and returns its id plus the event stream
    /// whose first event is `endpoint`.
    pub fn open(&self) -> (String, EventStream) {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let endpoint = Event::default()
            .event("endpoint")
            .data(format!("{}?session_id={}", MESSAGES_PATH, session_id));
        // fresh channel, capacity is free
        let _ = tx.try_send(Ok(endpoint));

        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|_, sender| !sender.is_closed());
            senders.insert(session_id.clone(), tx);
        }
        tracing::debug!("SSE session {} opened", session_id);

        let stream = Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default());
        (session_id, stream)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sender(session_id).is_some()
    }

    fn sender(&self, session_id: &str) -> Option<EventSender> {
        self.senders.lock().ok()?.get(session_id).cloned()
    }

    /// Pushes one JSON-RPC reply to the session's stream.
    pub async fn send(&self, session_id: &str, reply: &Value) -> Result<(), SessionError> {
        let sender = self.sender(session_id).ok_or(SessionError::Unknown)?;
        let event = Event::default().event("message").data(reply.to_string());
        if sender.send(Ok(event)).await.is_err() {
            tracing::debug!("SSE session {} closed by the client", session_id);
            if let Ok(mut senders) = self.senders.lock() {
                senders.remove(session_id);
            }
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
