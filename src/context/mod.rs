//! Window Context Module
//!
//! Every native window the toolkit creates is represented by a window context:
//! a top-level, a plug embedded into a foreign window, or a child embedded into
//! a plug. `ContextManager` owns all of them, routes native events into them
//! and exposes the toolkit-facing operations.

pub mod base;
pub mod child;
pub mod grab;
pub mod ime;
pub mod plug;
pub mod top;

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendEvent, WindowSystem};
use crate::config::Config;
use crate::event::{GlobalEvent, NativeEvent, NativeWindow, PropertyKind};
use crate::keymap::KeyTable;
use crate::toolkit::{checked, View, ViewPeer, WindowPeer};

pub use base::ContextBase;
pub use child::Child;
pub use grab::{GrabHolder, GrabRegistry};
pub use ime::{DirectInput, DirectInputFactory, ImeFilter, ImeSession, InputMethod, InputMethodFactory};
pub use plug::{EmbeddingHost, Plug};
pub use top::{ExtentsCache, FrameType, Resizable, TopLevel, WindowType};

/// Stable handle of a window context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("unknown window context {0:?}")]
    UnknownContext(ContextId),
    #[error("window context {0:?} cannot embed children")]
    NotEmbeddingHost(ContextId),
    #[error("window context {0:?} is not a {1}")]
    WrongKind(ContextId, &'static str),
}

/// Requested bounds; sizes `<= 0` and `None` positions are left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: Option<i32>,
    pub y: Option<i32>,
    /// Outer size
    pub width: i32,
    pub height: i32,
    /// Content size, used when the outer size is not given
    pub content_width: i32,
    pub content_height: i32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            x: None,
            y: None,
            width: -1,
            height: -1,
            content_width: -1,
            content_height: -1,
        }
    }
}

impl Bounds {
    pub fn position(x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn window_size(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn content_size(width: i32, height: i32) -> Self {
        Self {
            content_width: width,
            content_height: height,
            ..Self::default()
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }
}

/// Operations a toolkit peer may ask for while it is being notified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Destroy(ContextId),
    SetVisible(ContextId, bool),
    UngrabFocus(ContextId),
}

/// Handle through which toolkit peers re-enter the manager
///
/// Requests are drained at the end of each dispatched event, still inside the
/// event scope, so destroying the notified window takes the deferred path.
#[derive(Debug, Clone, Default)]
pub struct RequestQueue(Rc<RefCell<VecDeque<Request>>>);

impl RequestQueue {
    pub fn push(&self, request: Request) {
        self.0.borrow_mut().push_back(request);
    }

    fn pop(&self) -> Option<Request> {
        self.0.borrow_mut().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

#[derive(Debug)]
pub enum ContextKind {
    Top(TopLevel),
    Plug(Plug),
    Child(Child),
}

/// One window context: shared base state plus the kind-specific part
pub struct WindowContext {
    pub(crate) base: ContextBase,
    pub(crate) kind: ContextKind,
}

impl WindowContext {
    pub fn base(&self) -> &ContextBase {
        &self.base
    }

    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ContextKind::Top(_) => "top-level",
            ContextKind::Plug(_) => "plug",
            ContextKind::Child(_) => "child",
        }
    }

    pub fn as_top(&self) -> Option<&TopLevel> {
        match &self.kind {
            ContextKind::Top(top) => Some(top),
            _ => None,
        }
    }

    pub fn as_plug(&self) -> Option<&Plug> {
        match &self.kind {
            ContextKind::Plug(plug) => Some(plug),
            _ => None,
        }
    }

    pub fn as_child(&self) -> Option<&Child> {
        match &self.kind {
            ContextKind::Child(child) => Some(child),
            _ => None,
        }
    }

    fn embedding_host_mut(&mut self) -> Option<&mut dyn EmbeddingHost> {
        match &mut self.kind {
            ContextKind::Plug(plug) => Some(plug),
            _ => None,
        }
    }
}

/// Owns every window context and the state they share
pub struct ContextManager {
    backend: Box<dyn WindowSystem>,
    keymap: KeyTable,
    ime_factory: Box<dyn InputMethodFactory>,
    config: Config,
    contexts: HashMap<ContextId, WindowContext>,
    by_native: HashMap<NativeWindow, ContextId>,
    grabs: GrabRegistry,
    /// Torn down, waiting for in-flight events to finish
    doomed: Vec<ContextId>,
    next_id: u64,
    requests: RequestQueue,
    /// Extents per window type, shared by all top-levels
    extents_cache: ExtentsCache,
}

impl ContextManager {
    pub fn new(
        backend: Box<dyn WindowSystem>,
        ime_factory: Box<dyn InputMethodFactory>,
        config: Config,
    ) -> Result<Self> {
        let mapping = backend
            .keyboard_mapping()
            .context("Failed to read keyboard mapping")?;
        let keymap = KeyTable::new(
            mapping.min_keycode,
            mapping.keysyms_per_keycode,
            mapping.keysyms,
        );

        Ok(Self {
            backend,
            keymap,
            ime_factory,
            config,
            contexts: HashMap::new(),
            by_native: HashMap::new(),
            grabs: GrabRegistry::new(),
            doomed: Vec::new(),
            next_id: 1,
            requests: RequestQueue::default(),
            extents_cache: ExtentsCache::default(),
        })
    }

    pub fn backend(&self) -> &dyn WindowSystem {
        self.backend.as_ref()
    }

    pub fn keymap(&self) -> &KeyTable {
        &self.keymap
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grabs(&self) -> &GrabRegistry {
        &self.grabs
    }

    /// Input methods for contexts enabled from now on
    pub fn set_input_method_factory(&mut self, factory: Box<dyn InputMethodFactory>) {
        self.ime_factory = factory;
    }

    /// Queue handle to give to toolkit peers
    pub fn requests(&self) -> RequestQueue {
        self.requests.clone()
    }

    pub fn context(&self, id: ContextId) -> Result<&WindowContext, ContextError> {
        self.contexts.get(&id).ok_or(ContextError::UnknownContext(id))
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Context owning a native window
    pub fn lookup(&self, native: NativeWindow) -> Option<ContextId> {
        self.by_native.get(&native).copied()
    }

    pub fn native_window(&self, id: ContextId) -> Result<NativeWindow, ContextError> {
        Ok(self.context(id)?.base.native)
    }

    fn ctx_mut(&mut self, id: ContextId) -> Result<&mut WindowContext, ContextError> {
        self.contexts
            .get_mut(&id)
            .ok_or(ContextError::UnknownContext(id))
    }

    fn top(&self, id: ContextId) -> Result<&TopLevel, ContextError> {
        self.context(id)?
            .as_top()
            .ok_or(ContextError::WrongKind(id, "top-level"))
    }

    fn top_mut(&mut self, id: ContextId) -> Result<&mut TopLevel, ContextError> {
        match &mut self.ctx_mut(id)?.kind {
            ContextKind::Top(top) => Ok(top),
            _ => Err(ContextError::WrongKind(id, "top-level")),
        }
    }

    fn child_mut(&mut self, id: ContextId) -> Result<&mut Child, ContextError> {
        match &mut self.ctx_mut(id)?.kind {
            ContextKind::Child(child) => Ok(child),
            _ => Err(ContextError::WrongKind(id, "child")),
        }
    }

    fn embedding_host_mut(&mut self, id: ContextId) -> Result<&mut dyn EmbeddingHost, ContextError> {
        self.ctx_mut(id)?
            .embedding_host_mut()
            .ok_or(ContextError::NotEmbeddingHost(id))
    }

    fn register(&mut self, base: ContextBase, kind: ContextKind) -> ContextId {
        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.by_native.insert(base.native, id);
        let context = WindowContext { base, kind };
        info!(
            "Created {} context {:?} on native window {:#x}",
            context.kind_name(),
            id,
            context.base.native.0
        );
        self.contexts.insert(id, context);
        id
    }

    fn window_peer(&self, id: ContextId) -> Option<Rc<dyn WindowPeer>> {
        self.contexts.get(&id)?.base.window_peer.clone()
    }

    pub fn view(&self, id: ContextId) -> Option<Rc<View>> {
        self.contexts.get(&id)?.base.view.clone()
    }

    /// Calls the window peer, logging and clearing any failure
    fn notify_window(&self, id: ContextId, what: &str, f: impl FnOnce(&dyn WindowPeer) -> Result<()>) {
        if let Some(peer) = self.window_peer(id) {
            checked(what, f(peer.as_ref()));
        }
    }

    /// Calls the view peer, logging and clearing any failure
    fn notify_view(&self, id: ContextId, what: &str, f: impl FnOnce(&dyn ViewPeer) -> Result<()>) {
        if let Some(view) = self.view(id) {
            checked(what, f(view.peer()));
        }
    }

    /// Whether the toolkit reports the window enabled; failures count as enabled
    fn is_enabled(&self, id: ContextId) -> bool {
        match self.window_peer(id) {
            Some(peer) => peer.is_enabled().unwrap_or_else(|e| {
                warn!("Toolkit callback is_enabled failed: {:#}", e);
                true
            }),
            None => false,
        }
    }

    /// Marks an event in flight against `id` until the guard drops
    pub fn event_scope(&mut self, id: ContextId) -> EventScope<'_> {
        if let Some(context) = self.contexts.get_mut(&id) {
            context.base.events_in_flight += 1;
        }
        EventScope { manager: self, id }
    }

    /// Two-phase destroy: tear down now, deallocate once no event is in flight
    pub fn destroy(&mut self, id: ContextId) -> Result<()> {
        self.context(id)?;
        self.process_destroy(id);
        self.collect_doomed();
        Ok(())
    }

    /// Kind-specific teardown followed by the shared one
    fn process_destroy(&mut self, id: ContextId) {
        let Some(context) = self.contexts.get(&id) else {
            return;
        };
        if context.base.can_be_deleted {
            return;
        }
        match &context.kind {
            ContextKind::Top(_) => self.top_process_destroy(id),
            ContextKind::Child(_) => self.child_process_destroy(id),
            ContextKind::Plug(_) => {}
        }
        self.base_process_destroy(id);
        if !self.doomed.contains(&id) {
            self.doomed.push(id);
        }
    }

    fn collect_doomed(&mut self) {
        let ready: Vec<ContextId> = self
            .doomed
            .iter()
            .copied()
            .filter(|id| {
                self.contexts
                    .get(id)
                    .map_or(true, |context| context.base.events_in_flight == 0)
            })
            .collect();
        if ready.is_empty() {
            return;
        }
        self.doomed.retain(|id| !ready.contains(id));
        for id in ready {
            self.deallocate(id);
        }
    }

    fn deallocate(&mut self, id: ContextId) {
        let Some(mut context) = self.contexts.remove(&id) else {
            return;
        };
        let native = context.base.native;
        self.by_native.remove(&native);
        context.base.ime.disable();

        if let ContextKind::Top(top) = &mut context.kind {
            if let Some(mask) = top.shape_mask.take() {
                if let Err(e) = self.backend.free_mask(mask.pixmap) {
                    warn!("Failed to free shape mask of {:?}: {}", id, e);
                }
            }
        }
        if !context.base.native_destroyed {
            if let Err(e) = self.backend.destroy_window(native) {
                warn!("Failed to destroy native window {:#x}: {}", native.0, e);
            }
        }
        info!("Window context {:?} deallocated", id);
    }

    /// Routes one translated native event
    pub fn dispatch(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Global(GlobalEvent::KeyboardLayoutChanged) => self.reload_keymap(),
            BackendEvent::Window(native, event) => {
                let Some(id) = self.lookup(native) else {
                    debug!("Event for unknown native window {:#x}", native.0);
                    return;
                };
                let mut scope = self.event_scope(id);
                scope.process_event(id, event);
                scope.process_requests();
            }
        }
    }

    fn reload_keymap(&mut self) {
        match self.backend.keyboard_mapping() {
            Ok(mapping) => self.keymap.reload(
                mapping.min_keycode,
                mapping.keysyms_per_keycode,
                mapping.keysyms,
            ),
            Err(e) => warn!("Failed to reload keyboard mapping: {}", e),
        }
    }

    /// Runs the requests toolkit peers queued
    pub fn process_requests(&mut self) {
        while let Some(request) = self.requests.pop() {
            debug!("Processing toolkit request {:?}", request);
            let result = match request {
                Request::Destroy(id) => self.destroy(id),
                Request::SetVisible(id, visible) => self.set_visible(id, visible),
                Request::UngrabFocus(id) => self.ungrab_focus(id),
            };
            if let Err(e) = result {
                warn!("Toolkit request {:?} failed: {:#}", request, e);
            }
        }
    }

    fn process_event(&mut self, id: ContextId, event: NativeEvent) {
        let Some(context) = self.contexts.get(&id) else {
            return;
        };
        if context.base.can_be_deleted {
            debug!("Dropping event for destroyed context {:?}", id);
            return;
        }
        let is_top = context.as_top().is_some();
        let is_child = context.as_child().is_some();
        let is_plug = context.as_plug().is_some();

        let result = match event {
            NativeEvent::Focus { focus_in } => self.process_focus(id, focus_in),
            NativeEvent::Expose { area } => {
                self.notify_view(id, "repaint", |view| view.notify_repaint(area));
                Ok(())
            }
            NativeEvent::Button {
                press,
                button,
                position,
                state,
            } => {
                let result = self.process_mouse_button(id, press, button, position, state);
                if is_child && press {
                    result.and_then(|()| self.child_focus_widget(id))
                } else {
                    result
                }
            }
            NativeEvent::Motion { position, state } => {
                self.process_mouse_motion(id, position, state);
                Ok(())
            }
            NativeEvent::Scroll {
                direction,
                position,
                state,
            } => {
                self.process_mouse_scroll(id, direction, position, state);
                Ok(())
            }
            NativeEvent::Crossing {
                enter,
                position,
                state,
            } => {
                self.process_mouse_cross(id, enter, position, state);
                Ok(())
            }
            NativeEvent::Key(key) => self.process_key_input(id, key),
            NativeEvent::Configure {
                x,
                y,
                width,
                height,
            } => {
                if is_top {
                    self.top_process_configure(id, x, y, width, height)
                } else if is_child {
                    self.child_process_configure(id, width, height)
                } else {
                    Ok(())
                }
            }
            NativeEvent::WidgetConfigure { width, height } => {
                if is_plug {
                    self.plug_process_configure(id, width, height)
                } else {
                    Ok(())
                }
            }
            NativeEvent::Property {
                kind: PropertyKind::FrameExtents,
            } if is_top => self.top_process_frame_extents(id),
            NativeEvent::Property { .. } => Ok(()),
            NativeEvent::Map if is_top => self.top_process_map(id),
            NativeEvent::Map => Ok(()),
            NativeEvent::State { changed, new_state } if is_top => {
                self.top_process_state(id, changed, new_state)
            }
            NativeEvent::State { .. } => Ok(()),
            NativeEvent::Delete => {
                self.process_delete(id);
                Ok(())
            }
            NativeEvent::Destroy => {
                if let Ok(context) = self.ctx_mut(id) {
                    context.base.native_destroyed = true;
                }
                self.process_destroy(id);
                Ok(())
            }
            NativeEvent::InputMethod(signal) => {
                self.process_ime_signal(id, signal);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Event handling failed for {:?}: {:#}", id, e);
        }
    }
}

/// Scope guard counting one in-flight event against a context
///
/// Dereferences to the manager. Dropping it releases the count and deallocates
/// contexts that were destroyed while events were in flight.
pub struct EventScope<'a> {
    manager: &'a mut ContextManager,
    id: ContextId,
}

impl Deref for EventScope<'_> {
    type Target = ContextManager;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl DerefMut for EventScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl Drop for EventScope<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.manager.contexts.get_mut(&self.id) {
            context.base.events_in_flight = context.base.events_in_flight.saturating_sub(1);
        }
        self.manager.collect_doomed();
    }
}
