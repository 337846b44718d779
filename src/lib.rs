//! Glass X11
//!
//! Window contexts for a toolkit's X11 backend. Each toolkit window is backed
//! by a context that owns a native window, reconciles the toolkit's geometry
//! requests with what the window manager reports, routes input through the
//! grab registry and the input method, and survives being destroyed from
//! inside its own event handlers.

pub mod backend;
pub mod config;
pub mod context;
pub mod event;
pub mod keymap;
pub mod shared;
pub mod toolkit;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendEvent, WindowSystem};
pub use config::Config;
pub use context::{
    Bounds, ContextError, ContextId, ContextManager, FrameType, Request, RequestQueue, WindowType,
};
pub use toolkit::{View, ViewPeer, WindowPeer};
