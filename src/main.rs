//! Glass Demo
//!
//! Opens one decorated top-level window through the context layer and logs
//! every notification the toolkit side would receive. Closing the window or
//! sending SIGINT/SIGTERM ends the demo.

use anyhow::{Context, Result};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glass_x11::backend::source::X11EventSource;
use glass_x11::backend::x11::X11Backend;
use glass_x11::context::{DirectInputFactory, WindowType};
use glass_x11::shared::Geometry;
use glass_x11::toolkit::{
    FocusChange, InputMethodEvent, KeyEvent, MouseEvent, ScrollEvent, ViewChange, WindowLevel,
    WindowStateChange,
};
use glass_x11::{
    Bounds, Config, ContextId, ContextManager, FrameType, Request, RequestQueue, View, ViewPeer,
    WindowPeer,
};

/// Window peer that logs and closes on request
struct LoggingWindow {
    id: Cell<Option<ContextId>>,
    requests: RequestQueue,
}

impl WindowPeer for LoggingWindow {
    fn is_enabled(&self) -> Result<bool> {
        Ok(true)
    }

    fn notify_focus(&self, change: FocusChange) -> Result<()> {
        info!("focus {:?}", change);
        Ok(())
    }

    fn notify_focus_disabled(&self) -> Result<()> {
        info!("focus on disabled window");
        Ok(())
    }

    fn notify_focus_ungrab(&self) -> Result<()> {
        info!("focus ungrab");
        Ok(())
    }

    fn notify_resize(&self, width: i32, height: i32) -> Result<()> {
        info!("window resized to {}x{}", width, height);
        Ok(())
    }

    fn notify_move(&self, x: i32, y: i32) -> Result<()> {
        info!("window moved to {},{}", x, y);
        Ok(())
    }

    fn notify_move_to_screen(&self, from: i64, to: i64) -> Result<()> {
        info!("window moved from screen {} to {}", from, to);
        Ok(())
    }

    fn notify_state(&self, change: WindowStateChange) -> Result<()> {
        info!("window state {:?}", change);
        Ok(())
    }

    fn notify_level(&self, level: WindowLevel) -> Result<()> {
        info!("window level {:?}", level);
        Ok(())
    }

    fn notify_close(&self) -> Result<()> {
        info!("close requested");
        let id = self.id.get().context("Close before the window was registered")?;
        self.requests.push(Request::Destroy(id));
        Ok(())
    }

    fn notify_destroy(&self) -> Result<()> {
        info!("window destroyed");
        Ok(())
    }

    fn notify_delegate(&self, delegate: Option<ContextId>) -> Result<()> {
        info!("window delegate {:?}", delegate);
        Ok(())
    }
}

/// View peer that logs input
struct LoggingView;

impl ViewPeer for LoggingView {
    fn notify_resize(&self, width: i32, height: i32) -> Result<()> {
        debug!("view resized to {}x{}", width, height);
        Ok(())
    }

    fn notify_repaint(&self, area: Geometry) -> Result<()> {
        debug!("repaint {:?}", area);
        Ok(())
    }

    fn notify_mouse(&self, event: MouseEvent) -> Result<()> {
        debug!("mouse {:?}", event);
        Ok(())
    }

    fn notify_menu(&self, x: i32, y: i32, x_root: i32, y_root: i32, keyboard: bool) -> Result<()> {
        info!("context menu at {},{} ({},{}) keyboard={}", x, y, x_root, y_root, keyboard);
        Ok(())
    }

    fn notify_scroll(&self, event: ScrollEvent) -> Result<()> {
        debug!("scroll {:?}", event);
        Ok(())
    }

    fn notify_key(&self, event: KeyEvent) -> Result<()> {
        info!("key {:?}", event);
        Ok(())
    }

    fn notify_view(&self, change: ViewChange) -> Result<()> {
        debug!("view {:?}", change);
        Ok(())
    }

    fn notify_input_method(&self, event: InputMethodEvent) -> Result<()> {
        info!("input method {:?}", event);
        Ok(())
    }

    fn candidate_position(&self, _offset: i32) -> Result<[f64; 2]> {
        Ok([0.0, 0.0])
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "glass_x11=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Glass demo");

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });

    let backend = X11Backend::connect()?;
    let mut source = X11EventSource::new(backend.clone())?;
    let mut manager = ContextManager::new(
        Box::new(backend),
        Box::new(DirectInputFactory),
        config,
    )?;

    let peer = Rc::new(LoggingWindow {
        id: Cell::new(None),
        requests: manager.requests(),
    });
    let window = manager.create_top_level(
        Some(peer.clone() as Rc<dyn WindowPeer>),
        None,
        0,
        FrameType::Titled,
        WindowType::Normal,
    )?;
    peer.id.set(Some(window));

    manager.set_view(window, Some(View::new(Box::new(LoggingView))))?;
    manager.set_title(window, "Glass demo")?;
    manager.set_bounds(window, Bounds::content_size(480, 320).at(100, 100))?;
    manager.set_visible(window, true)?;
    manager.enable_ime(window)?;
    source.flush()?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            let _ = shutdown_tx.send(()).await;
        });
    }

    while manager.contains(window) {
        let events = source.drain(manager.keymap()).inspect_err(|e| error!("{:#}", e))?;
        for event in events {
            manager.dispatch(event);
        }
        manager.process_requests();
        source.flush()?;

        if !manager.contains(window) {
            break;
        }

        tokio::select! {
            readable = source.readable() => readable?,
            _ = shutdown_rx.recv() => {
                info!("Shutting down");
                manager.destroy(window)?;
                source.flush()?;
                break;
            }
        }
    }

    info!("Glass demo finished");
    Ok(())
}
