//! Server event registration and the outgoing message relay

use crate::error::{HandlerError, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, warn};

/// Kinds of server-initiated events a plugin can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Notification,
    Request,
}

impl FromStr for EventKind {
    type Err = HandlerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "notification" => Ok(EventKind::Notification),
            "request" => Ok(EventKind::Request),
            other => Err(HandlerError::UnknownEventKind(other.to_string())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Notification => f.write_str("notification"),
            EventKind::Request => f.write_str("request"),
        }
    }
}

/// Outcome of a request sent to the server: `Err` carries the error payload,
/// or `Value::Null` when no session was attached
pub type RequestOutcome = std::result::Result<Value, Value>;

pub type ResponseCallback = Box<dyn FnOnce(RequestOutcome) + Send>;

/// The live connection to a running server, owned by the host editor
pub trait SessionSink: Send + Sync {
    fn send_notification(&self, method: &str, params: Value);

    fn send_request(&self, method: &str, params: Value, on_response: ResponseCallback);

    fn send_response(&self, request_id: Value, result: Value);
}

/// Answers one server request
///
/// Holds the session weakly: a response for a session that has gone away is
/// dropped.
pub struct Responder {
    request_id: Value,
    session: Option<Weak<dyn SessionSink>>,
}

impl Responder {
    pub fn request_id(&self) -> &Value {
        &self.request_id
    }

    pub fn respond(self, result: Value) {
        match self.session.as_ref().and_then(Weak::upgrade) {
            Some(session) => session.send_response(self.request_id, result),
            None => debug!(request_id = %self.request_id, "Session gone, dropping response"),
        }
    }
}

pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;
pub type RequestHandler = Arc<dyn Fn(Value, Responder) + Send + Sync>;

/// A handler of either kind, for [`HandlerRegistry::register`]
#[derive(Clone)]
pub enum EventHandler {
    Notification(NotificationHandler),
    Request(RequestHandler),
}

impl EventHandler {
    fn kind(&self) -> EventKind {
        match self {
            EventHandler::Notification(_) => EventKind::Notification,
            EventHandler::Request(_) => EventKind::Request,
        }
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    notifications: DashMap<String, NotificationHandler>,
    requests: DashMap<String, RequestHandler>,
    session: RwLock<Option<Weak<dyn SessionSink>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` under an event kind name
    /// (`"notification"` or `"request"`)
    pub fn register(&self, kind: &str, method: &str, handler: EventHandler) -> Result<()> {
        let kind: EventKind = kind.parse()?;
        if kind != handler.kind() {
            return Err(HandlerError::HandlerKindMismatch {
                kind: kind.to_string(),
                method: method.to_string(),
            });
        }
        match handler {
            EventHandler::Notification(f) => self.insert_notification(method, f),
            EventHandler::Request(f) => self.insert_request(method, f),
        }
        Ok(())
    }

    pub fn on_notification<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.insert_notification(method, Arc::new(handler));
    }

    pub fn on_request<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value, Responder) + Send + Sync + 'static,
    {
        self.insert_request(method, Arc::new(handler));
    }

    fn insert_notification(&self, method: &str, handler: NotificationHandler) {
        if self.notifications.insert(method.to_string(), handler).is_some() {
            warn!(%method, "Replacing notification handler");
        }
    }

    fn insert_request(&self, method: &str, handler: RequestHandler) {
        if self.requests.insert(method.to_string(), handler).is_some() {
            warn!(%method, "Replacing request handler");
        }
    }

    pub fn is_registered(&self, kind: EventKind, method: &str) -> bool {
        match kind {
            EventKind::Notification => self.notifications.contains_key(method),
            EventKind::Request => self.requests.contains_key(method),
        }
    }

    /// Deliver a server notification; false when nothing is registered for it
    pub fn dispatch_notification(&self, method: &str, params: Value) -> bool {
        // Clone out of the map so handlers may register further handlers
        let handler = self.notifications.get(method).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => {
                handler(params);
                true
            }
            None => false,
        }
    }

    /// Deliver a server request; the handler answers through its [`Responder`]
    pub fn dispatch_request(&self, method: &str, request_id: Value, params: Value) -> bool {
        let handler = self.requests.get(method).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => {
                let responder = Responder {
                    request_id,
                    session: self.session_ref(),
                };
                handler(params, responder);
                true
            }
            None => false,
        }
    }

    /// Send a notification to the server; false when no session is attached
    pub fn send_notification(&self, method: &str, params: Value) -> bool {
        match self.session() {
            Some(session) => {
                session.send_notification(method, params);
                true
            }
            None => {
                debug!(%method, "No session, notification dropped");
                false
            }
        }
    }

    /// Send a request to the server; without a session `on_response` gets `Err(Null)`
    pub fn send_request<F>(&self, method: &str, params: Value, on_response: F)
    where
        F: FnOnce(RequestOutcome) + Send + 'static,
    {
        match self.session() {
            Some(session) => session.send_request(method, params, Box::new(on_response)),
            None => on_response(Err(Value::Null)),
        }
    }

    pub fn attach_session(&self, session: Weak<dyn SessionSink>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn detach_session(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn session_ref(&self) -> Option<Weak<dyn SessionSink>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn session(&self) -> Option<Arc<dyn SessionSink>> {
        self.session_ref().as_ref().and_then(Weak::upgrade)
    }
}
