//! X11 Event Source
//!
//! Feeds the context manager from the X connection inside a tokio loop. A
//! blocking task watches the socket with mio and posts a wakeup; the loop then
//! drains the buffered events through the backend's translation.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use x11rb::connection::Connection;

use super::x11::X11Backend;
use super::BackendEvent;
use crate::keymap::KeyTable;

const CONNECTION: mio::Token = mio::Token(0);

/// How often the watcher checks whether the source was dropped
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Translated X11 events for an async loop
pub struct X11EventSource {
    backend: X11Backend,
    /// Closing this stops the watcher
    wakeups: mpsc::Receiver<()>,
}

impl X11EventSource {
    /// Starts watching the backend's connection; must run inside a tokio runtime
    pub fn new(backend: X11Backend) -> Result<Self> {
        let fd = backend.connection().stream().as_raw_fd();
        let poll = mio::Poll::new().context("Failed to create mio Poll")?;
        poll.registry()
            .register(&mut mio::unix::SourceFd(&fd), CONNECTION, mio::Interest::READABLE)
            .context("Failed to register X11 connection with mio")?;

        // one slot: a wakeup already queued covers any later readiness
        let (sender, wakeups) = mpsc::channel(1);
        tokio::task::spawn_blocking(move || watch(poll, sender));
        Ok(Self { backend, wakeups })
    }

    /// Translates every event already buffered on the connection
    ///
    /// Replies to our own requests can pull events into the buffer without
    /// the socket becoming readable again, so call this before waiting.
    pub fn drain(&self, keymap: &KeyTable) -> Result<Vec<BackendEvent>> {
        let conn = self.backend.connection();
        let mut events = Vec::new();
        while let Some(event) = conn.poll_for_event().context("X11 connection lost")? {
            match self.backend.translate_event(&event, keymap) {
                Some(event) => events.push(event),
                None => trace!("Untranslated X11 event {:?}", event),
            }
        }
        Ok(events)
    }

    /// Resolves once the connection has data to read
    pub async fn readable(&mut self) -> Result<()> {
        self.wakeups
            .recv()
            .await
            .context("X11 readiness watcher stopped")
    }

    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }
}

fn watch(mut poll: mio::Poll, wakeups: mpsc::Sender<()>) {
    let mut events = mio::Events::with_capacity(4);
    while !wakeups.is_closed() {
        match poll.poll(&mut events, Some(WATCH_INTERVAL)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("X11 socket poll failed: {}", e);
                continue;
            }
        }
        if events.iter().any(|event| event.token() == CONNECTION) {
            // full means a wakeup is pending already
            let _ = wakeups.try_send(());
        }
    }
    debug!("X11 readiness watcher stopped");
}
