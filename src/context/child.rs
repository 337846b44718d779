//! Child Window Context
//!
//! A view embedded into a plug. It has no top-level of its own; full screen is
//! provided by a surrogate top-level context that borrows the child's window
//! peer and view for as long as the full-screen state lasts.

use anyhow::{Context, Result};
use std::rc::Rc;
use tracing::{debug, info, warn};

use super::{Bounds, ContextBase, ContextError, ContextId, ContextKind, ContextManager, FrameType, WindowType};
use crate::backend::NativeKind;
use crate::toolkit::WindowPeer;

#[derive(Debug)]
pub struct Child {
    /// The hosting plug
    pub(crate) plug: ContextId,
    /// Surrogate top-level while full screen
    pub(crate) fullscreen: Option<ContextId>,
}

impl Child {
    pub fn plug(&self) -> ContextId {
        self.plug
    }

    pub fn fullscreen(&self) -> Option<ContextId> {
        self.fullscreen
    }
}

impl ContextManager {
    /// Creates a child embedded into `plug`
    pub fn create_child(&mut self, peer: Option<Rc<dyn WindowPeer>>, plug: ContextId) -> Result<ContextId> {
        let host = self.context(plug)?;
        if host.as_plug().is_none() {
            return Err(ContextError::NotEmbeddingHost(plug).into());
        }
        let parent = host.base.native;
        let native = self
            .backend
            .create_window(NativeKind::Child { parent })
            .context("Failed to create embedded child window")?;
        let child = Child {
            plug,
            fullscreen: None,
        };
        Ok(self.register(ContextBase::new(native, peer), ContextKind::Child(child)))
    }

    fn child(&self, id: ContextId) -> Result<&Child, ContextError> {
        self.context(id)?
            .as_child()
            .ok_or(ContextError::WrongKind(id, "child"))
    }

    pub(crate) fn child_set_visible(&mut self, id: ContextId, visible: bool) -> Result<()> {
        let plug = self.child(id)?.plug;
        match self.embedding_host_mut(plug) {
            Ok(host) if visible => host.register_embedded(id),
            Ok(host) => host.unregister_embedded(id),
            Err(e) => debug!("Child {:?} has no live host: {}", id, e),
        }
        self.base_set_visible(id, visible)
    }

    pub(crate) fn child_process_configure(&mut self, id: ContextId, width: i32, height: i32) -> Result<()> {
        let native = self.native_window(id)?;
        self.notify_view(id, "resize", |view| view.notify_resize(width, height));
        self.backend.set_size_request(native, width, height)?;
        self.notify_window(id, "resize", |peer| peer.notify_resize(width, height));
        Ok(())
    }

    pub(crate) fn child_set_bounds(&mut self, id: ContextId, bounds: Bounds) -> Result<()> {
        let native = self.native_window(id)?;
        if bounds.x.is_some() || bounds.y.is_some() {
            // the plug decides where the child goes; report where it is
            let (x, y) = self.backend.origin(native)?;
            self.notify_window(id, "move", |peer| peer.notify_move(x, y));
        }
        // no decoration, so window and content sizes are the same thing
        let (width, height) = if (bounds.content_width | bounds.content_height) > 0 {
            (bounds.content_width, bounds.content_height)
        } else {
            (bounds.width, bounds.height)
        };
        if width <= 0 && height <= 0 {
            return Ok(());
        }
        // an axis left alone keeps its current allocation
        let (current_width, current_height) = self.backend.size(native)?;
        let width = if width > 0 { width } else { current_width };
        let height = if height > 0 { height } else { current_height };
        self.backend.set_size_request(native, width, height)?;
        self.notify_view(id, "resize", |view| view.notify_resize(width, height));
        Ok(())
    }

    pub(crate) fn child_restack(&mut self, id: ContextId, to_front: bool) -> Result<()> {
        let plug = self.child(id)?.plug;
        if let Ok(host) = self.embedding_host_mut(plug) {
            host.restack_embedded(id, to_front);
        }
        let native = self.native_window(id)?;
        self.backend.restack(native, to_front)
    }

    pub(crate) fn child_focus_widget(&mut self, id: ContextId) -> Result<()> {
        let native = self.native_window(id)?;
        self.backend.focus_widget(native)
    }

    /// Moves the child's content into a full-screen top-level
    pub(crate) fn child_enter_fullscreen(&mut self, id: ContextId) -> Result<()> {
        if self.child(id)?.fullscreen.is_some() {
            return Ok(());
        }
        let native = self.native_window(id)?;
        let peer = self.window_peer(id);
        let fullscreen = self.create_top_level(peer, None, 0, FrameType::Untitled, WindowType::Normal)?;
        self.child_mut(id)?.fullscreen = Some(fullscreen);
        info!("Child {:?} entering full screen through {:?}", id, fullscreen);

        let (x, y) = self.backend.origin(native)?;
        let (width, height) = self.backend.size(native)?;
        self.top_set_bounds(fullscreen, Bounds::window_size(width, height).at(x, y))?;

        if self.grabs.holds_focus(id) {
            self.ungrab_focus(id)?;
        }
        self.reparent_children(id, fullscreen)?;

        self.set_visible(fullscreen, true)?;
        self.top_enter_fullscreen(fullscreen)?;

        self.notify_window(id, "delegate", |peer| peer.notify_delegate(Some(fullscreen)));

        if let Some(view) = self.view(id) {
            view.set_current_window(Some(fullscreen));
            view.set_embedded_window(Some(id));
            self.set_view(fullscreen, Some(view))?;
            self.set_view(id, None)?;
        }
        Ok(())
    }

    /// Hands the content back to the child and drops the surrogate
    pub(crate) fn child_exit_fullscreen(&mut self, id: ContextId) -> Result<()> {
        let Some(fullscreen) = self.child(id)?.fullscreen else {
            return Ok(());
        };
        if self.grabs.holds_focus(id) {
            self.ungrab_focus(id)?;
        } else if self.grabs.holds_focus(fullscreen) {
            self.ungrab_focus(fullscreen)?;
        }
        self.reparent_children(fullscreen, id)?;

        self.notify_window(id, "delegate", |peer| peer.notify_delegate(None));

        if let Some(view) = self.view(fullscreen) {
            view.set_embedded_window(None);
            self.set_view(id, Some(view))?;
        }

        // the surrogate must not report its own destruction to the shared peer
        self.detach_surrogate(fullscreen)?;
        self.set_visible(fullscreen, false)?;
        self.destroy(fullscreen)?;
        self.child_mut(id)?.fullscreen = None;
        info!("Child {:?} left full screen", id);
        Ok(())
    }

    fn detach_surrogate(&mut self, fullscreen: ContextId) -> Result<()> {
        let context = self.ctx_mut(fullscreen)?;
        context.base.window_peer = None;
        context.base.view = None;
        Ok(())
    }

    pub(crate) fn child_process_destroy(&mut self, id: ContextId) {
        let Ok(child) = self.child_mut(id) else {
            return;
        };
        let plug = child.plug;
        if let Some(fullscreen) = child.fullscreen.take() {
            let result = self
                .detach_surrogate(fullscreen)
                .and_then(|()| self.destroy(fullscreen));
            if let Err(e) = result {
                warn!("Failed to drop full-screen surrogate {:?}: {}", fullscreen, e);
            }
        }
        if let Ok(host) = self.embedding_host_mut(plug) {
            host.unregister_embedded(id);
        }
    }
}
