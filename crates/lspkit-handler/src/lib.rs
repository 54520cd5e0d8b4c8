//! Client handler facade for language server plugins
//!
//! A plugin implements [`ClientHandler`] to describe its server package. The
//! host editor wraps it in a [`HandlerHost`] and calls the lifecycle hooks:
//! `setup` when the plugin loads, `can_start` before launching the server,
//! `command` to build the launch command line, and `attach_session` once the
//! server is running so the plugin can exchange custom messages through the
//! [`HandlerRegistry`].

mod error;
mod handler;
mod host;
mod registry;

pub use error::{HandlerError, Result};
pub use handler::{ClientHandler, StartContext};
pub use host::{HandlerHost, HostServices};
pub use registry::{
    EventHandler, EventKind, HandlerRegistry, NotificationHandler, RequestHandler,
    RequestOutcome, Responder, ResponseCallback, SessionSink,
};
