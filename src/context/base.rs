//! Window Context Base
//!
//! State and behavior shared by every context kind: native event translation
//! into toolkit notifications, owned top-level children, visibility, grabs and
//! the input-method session.

use anyhow::Result;
use std::rc::Rc;
use tracing::{debug, warn};

use super::{Bounds, ContextId, ContextKind, ContextManager, GrabHolder, ImeSession};
use crate::backend::Cursor;
use crate::event::{ImeSignal, KeyInput, NativeState, NativeWindow, PointerPosition, ScrollDirection};
use crate::keymap::{fixup_typed_key, keysym_to_unicode};
use crate::toolkit::{
    FocusChange, InputMethodEvent, KeyAction, KeyEvent, Modifiers, MouseAction, MouseButton,
    MouseEvent, ScrollEvent, View, WindowPeer,
};

/// State every context kind carries
pub struct ContextBase {
    pub(crate) native: NativeWindow,
    pub(crate) window_peer: Option<Rc<dyn WindowPeer>>,
    pub(crate) view: Option<Rc<View>>,
    /// Owned top-level contexts (dialogs, popups)
    pub(crate) children: Vec<ContextId>,
    pub(crate) events_in_flight: u32,
    /// Teardown was sent to the toolkit
    pub(crate) can_be_deleted: bool,
    pub(crate) is_mouse_entered: bool,
    /// The native window is already gone
    pub(crate) native_destroyed: bool,
    pub(crate) ime: ImeSession,
}

impl ContextBase {
    pub(crate) fn new(native: NativeWindow, window_peer: Option<Rc<dyn WindowPeer>>) -> Self {
        Self {
            native,
            window_peer,
            view: None,
            children: Vec::new(),
            events_in_flight: 0,
            can_be_deleted: false,
            is_mouse_entered: false,
            native_destroyed: false,
            ime: ImeSession::default(),
        }
    }

    pub fn native(&self) -> NativeWindow {
        self.native
    }

    pub fn view(&self) -> Option<&Rc<View>> {
        self.view.as_ref()
    }

    pub fn has_window_peer(&self) -> bool {
        self.window_peer.is_some()
    }

    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    pub fn events_in_flight(&self) -> u32 {
        self.events_in_flight
    }

    pub fn can_be_deleted(&self) -> bool {
        self.can_be_deleted
    }

    pub fn is_mouse_entered(&self) -> bool {
        self.is_mouse_entered
    }

    pub fn ime(&self) -> &ImeSession {
        &self.ime
    }
}

impl std::fmt::Debug for ContextBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBase")
            .field("native", &self.native)
            .field("has_window_peer", &self.window_peer.is_some())
            .field("view", &self.view)
            .field("children", &self.children)
            .field("events_in_flight", &self.events_in_flight)
            .field("can_be_deleted", &self.can_be_deleted)
            .finish()
    }
}

fn exit_event() -> MouseEvent {
    MouseEvent {
        action: MouseAction::Exit,
        button: MouseButton::None,
        x: 0,
        y: 0,
        x_root: 0,
        y_root: 0,
        modifiers: Modifiers::empty(),
        popup_trigger: false,
        synthesized: false,
    }
}

// Native event handling
impl ContextManager {
    pub(crate) fn process_focus(&mut self, id: ContextId, focus_in: bool) -> Result<()> {
        if !focus_in && self.grabs.holds_drag(id) {
            self.ungrab_mouse_drag_focus()?;
        }
        if !focus_in && self.grabs.holds_focus(id) {
            self.ungrab_focus(id)?;
        }
        if let Ok(context) = self.ctx_mut(id) {
            if let Err(e) = context.base.ime.focus(focus_in) {
                warn!("Input method focus change failed for {:?}: {}", id, e);
            }
        }

        if focus_in && !self.is_enabled(id) {
            self.notify_window(id, "focus_disabled", |peer| peer.notify_focus_disabled());
        } else {
            let change = if focus_in {
                FocusChange::Gained
            } else {
                FocusChange::Lost
            };
            self.notify_window(id, "focus", |peer| peer.notify_focus(change));
        }
        Ok(())
    }

    pub(crate) fn process_mouse_button(
        &mut self,
        id: ContextId,
        press: bool,
        button: u8,
        position: PointerPosition,
        native_state: NativeState,
    ) -> Result<()> {
        // The native state predates the event; the toolkit wants it after
        let mask = NativeState::for_button(button);
        let state = if press {
            native_state | mask
        } else {
            native_state & !mask
        };

        if press
            && self.backend.pointer_grabbed()
            && self.backend.window_at_pointer()?.is_none()
        {
            // click outside every window of ours while grabbed
            return self.ungrab_focus(id);
        }

        // Deliver everything to the window a drag started in
        if press {
            self.grab_mouse_drag_focus(id)?;
        } else if (native_state.intersects(NativeState::BUTTONS) && !state.intersects(NativeState::BUTTONS))
            || button == 8
            || button == 9
        {
            self.ungrab_mouse_drag_focus()?;
        }

        let toolkit_button = MouseButton::from_native(button);
        if toolkit_button == MouseButton::None {
            return Ok(());
        }
        let popup_trigger = press && button == 3;
        let event = MouseEvent {
            action: if press {
                MouseAction::Down
            } else {
                MouseAction::Up
            },
            button: toolkit_button,
            x: position.x as i32,
            y: position.y as i32,
            x_root: position.x_root as i32,
            y_root: position.y_root as i32,
            modifiers: Modifiers::from_native(state),
            popup_trigger,
            synthesized: false,
        };
        self.notify_view(id, "mouse", |view| view.notify_mouse(event));
        if popup_trigger {
            self.notify_view(id, "menu", |view| {
                view.notify_menu(event.x, event.y, event.x_root, event.y_root, false)
            });
        }
        Ok(())
    }

    pub(crate) fn process_mouse_motion(&mut self, id: ContextId, position: PointerPosition, state: NativeState) {
        let modifiers = Modifiers::from_native(state);
        let button = if modifiers.contains(Modifiers::BUTTON_PRIMARY) {
            MouseButton::Left
        } else if modifiers.contains(Modifiers::BUTTON_MIDDLE) {
            MouseButton::Other
        } else if modifiers.contains(Modifiers::BUTTON_SECONDARY) {
            MouseButton::Right
        } else {
            MouseButton::None
        };
        let action = if modifiers.intersects(Modifiers::BUTTONS) {
            MouseAction::Drag
        } else {
            MouseAction::Move
        };
        let event = MouseEvent {
            action,
            button,
            x: position.x as i32,
            y: position.y as i32,
            x_root: position.x_root as i32,
            y_root: position.y_root as i32,
            modifiers,
            popup_trigger: false,
            synthesized: false,
        };
        self.notify_view(id, "mouse", |view| view.notify_mouse(event));
    }

    pub(crate) fn process_mouse_scroll(
        &mut self,
        id: ContextId,
        direction: ScrollDirection,
        position: PointerPosition,
        state: NativeState,
    ) {
        let (dx, dy) = match direction {
            ScrollDirection::Up => (0.0, 1.0),
            ScrollDirection::Down => (0.0, -1.0),
            ScrollDirection::Left => (1.0, 0.0),
            ScrollDirection::Right => (-1.0, 0.0),
            ScrollDirection::Smooth => return,
        };
        // Shift turns the wheel sideways
        let (dx, dy) = if state.contains(NativeState::SHIFT) {
            (dy, dx)
        } else {
            (dx, dy)
        };
        let event = ScrollEvent {
            x: position.x as i32,
            y: position.y as i32,
            x_root: position.x_root as i32,
            y_root: position.y_root as i32,
            dx,
            dy,
            modifiers: Modifiers::from_native(state),
            multiplier_x: self.config.scroll.multiplier_x,
            multiplier_y: self.config.scroll.multiplier_y,
        };
        self.notify_view(id, "scroll", |view| view.notify_scroll(event));
    }

    pub(crate) fn process_mouse_cross(
        &mut self,
        id: ContextId,
        enter: bool,
        position: PointerPosition,
        state: NativeState,
    ) {
        if self.view(id).is_none() {
            return;
        }
        let Ok(context) = self.ctx_mut(id) else {
            return;
        };
        if context.base.is_mouse_entered == enter {
            return;
        }
        context.base.is_mouse_entered = enter;

        // stale button bits leak into enter events
        let state = if enter {
            state & !NativeState::BUTTONS
        } else {
            state
        };
        let event = MouseEvent {
            action: if enter {
                MouseAction::Enter
            } else {
                MouseAction::Exit
            },
            button: MouseButton::None,
            x: position.x as i32,
            y: position.y as i32,
            x_root: position.x_root as i32,
            y_root: position.y_root as i32,
            modifiers: Modifiers::from_native(state),
            popup_trigger: false,
            synthesized: false,
        };
        self.notify_view(id, "mouse", |view| view.notify_mouse(event));
    }

    /// Offers a key to the input method, then processes whatever is let through
    pub(crate) fn process_key_input(&mut self, id: ContextId, key: KeyInput) -> Result<()> {
        let outcome = {
            let context = self.ctx_mut(id)?;
            if !context.base.ime.is_active() {
                return self.process_key(id, key);
            }
            context.base.ime.filter_key(&key)?
        };
        for event in outcome.events {
            self.forward_input_method(id, event);
        }
        if outcome.deliver_key {
            self.process_key(id, key)?;
        }
        Ok(())
    }

    pub(crate) fn process_key(&mut self, id: ContextId, key: KeyInput) -> Result<()> {
        let code = self.keymap.key_for(key.keycode, key.state, key.group);
        let mut modifiers = Modifiers::from_native(key.state);
        if key.press {
            modifiers |= code.modifier();
        } else {
            modifiers &= !code.modifier();
        }

        let character = match keysym_to_unicode(key.keyval) {
            Some(c @ 'a'..='z') if key.state.contains(NativeState::CONTROL) => {
                char::from_u32(c as u32 - 'a' as u32 + 1)
            }
            other => fixup_typed_key(other, key.keyval),
        };

        if self.view(id).is_none() {
            return Ok(());
        }
        let event = |action| KeyEvent {
            action,
            code,
            character,
            modifiers,
        };
        if key.press {
            self.notify_view(id, "key", |view| view.notify_key(event(KeyAction::Press)));
            if let Some(c) = character {
                self.keymap.observe(c, code);
                self.notify_view(id, "key", |view| view.notify_key(event(KeyAction::Typed)));
            }
        } else {
            self.notify_view(id, "key", |view| view.notify_key(event(KeyAction::Release)));
        }
        Ok(())
    }

    /// Close request from the window manager
    pub(crate) fn process_delete(&mut self, id: ContextId) {
        if self.is_enabled(id) {
            self.notify_window(id, "close", |peer| peer.notify_close());
        } else {
            debug!("Close request ignored for disabled {:?}", id);
        }
    }

    /// Input-method signal delivered outside key filtering
    pub(crate) fn process_ime_signal(&mut self, id: ContextId, signal: ImeSignal) {
        let event = match self.ctx_mut(id) {
            Ok(context) => context.base.ime.handle_signal(signal),
            Err(_) => return,
        };
        if let Some(event) = event {
            self.forward_input_method(id, event);
        }
    }

    fn forward_input_method(&mut self, id: ContextId, event: InputMethodEvent) {
        let is_update = matches!(event, InputMethodEvent::Update { .. });
        self.notify_view(id, "input_method", |view| view.notify_input_method(event));
        if is_update {
            self.update_ime_cursor(id);
        }
    }

    /// Moves the candidate window to where the view draws the caret
    fn update_ime_cursor(&mut self, id: ContextId) {
        let Some(view) = self.view(id) else {
            return;
        };
        let position = match view.peer().candidate_position(0) {
            Ok(position) => position,
            Err(e) => {
                warn!("Toolkit callback candidate_position failed: {:#}", e);
                return;
            }
        };
        let Ok(native) = self.native_window(id) else {
            return;
        };
        let (origin_x, origin_y) = self.backend.origin(native).unwrap_or((0, 0));
        let x = position[0] as i32 - origin_x;
        let y = position[1] as i32 - origin_y;
        if let Ok(context) = self.ctx_mut(id) {
            if let Err(e) = context.base.ime.set_cursor_location(x, y) {
                warn!("Failed to place input method candidates for {:?}: {}", id, e);
            }
        }
    }

    /// Shared teardown; kind-specific steps ran before
    pub(crate) fn base_process_destroy(&mut self, id: ContextId) {
        if self.grabs.holds_drag(id) {
            if let Err(e) = self.ungrab_mouse_drag_focus() {
                warn!("Failed to release drag grab of {:?}: {}", id, e);
            }
        }
        if self.grabs.holds_focus(id) {
            if let Err(e) = self.ungrab_focus(id) {
                warn!("Failed to release focus grab of {:?}: {}", id, e);
            }
        }

        let children = match self.ctx_mut(id) {
            Ok(context) => std::mem::take(&mut context.base.children),
            Err(_) => return,
        };
        for child in children {
            if let Ok(top) = self.top_mut(child) {
                top.owner = None;
            }
            if let Err(e) = self.destroy(child) {
                debug!("Owned child {:?} already gone: {}", child, e);
            }
        }

        self.notify_window(id, "destroy", |peer| peer.notify_destroy());
        if let Ok(context) = self.ctx_mut(id) {
            context.base.window_peer = None;
            context.base.view = None;
            context.base.can_be_deleted = true;
        }
        debug!("Window context {:?} torn down", id);
    }
}

// Grabs
impl ContextManager {
    fn grab_holder(&self, id: ContextId) -> Result<GrabHolder> {
        Ok(GrabHolder {
            context: id,
            native: self.native_window(id)?,
        })
    }

    pub fn grab_mouse_drag_focus(&mut self, id: ContextId) -> Result<bool> {
        let holder = self.grab_holder(id)?;
        self.grabs.acquire_drag(self.backend.as_ref(), holder)
    }

    pub fn ungrab_mouse_drag_focus(&mut self) -> Result<()> {
        self.grabs.release_drag(self.backend.as_ref())
    }

    pub fn grab_focus(&mut self, id: ContextId) -> Result<bool> {
        let holder = self.grab_holder(id)?;
        self.grabs.acquire_focus(self.backend.as_ref(), holder)
    }

    /// Releases the focus grab and tells the toolkit
    pub fn ungrab_focus(&mut self, id: ContextId) -> Result<()> {
        self.grabs.release_focus(self.backend.as_ref())?;
        self.notify_window(id, "focus_ungrab", |peer| peer.notify_focus_ungrab());
        Ok(())
    }

    pub fn set_cursor(&mut self, id: ContextId, cursor: Cursor) -> Result<()> {
        let native = self.native_window(id)?;
        self.grabs.set_cursor(self.backend.as_ref(), native, cursor)
    }
}

// Owned children
impl ContextManager {
    /// Native window that owned dialogs are made transient for
    fn transient_parent(&self, id: ContextId) -> Result<NativeWindow> {
        let context = self.context(id)?;
        match context.kind {
            ContextKind::Child(_) => self.backend.toplevel_of(context.base.native),
            _ => Ok(context.base.native),
        }
    }

    pub(crate) fn add_child(&mut self, parent: ContextId, child: ContextId) -> Result<()> {
        let children = &mut self.ctx_mut(parent)?.base.children;
        if !children.contains(&child) {
            children.push(child);
        }
        let parent_native = self.transient_parent(parent)?;
        let child_native = self.native_window(child)?;
        self.backend.set_transient_for(child_native, Some(parent_native))
    }

    pub(crate) fn remove_child(&mut self, parent: ContextId, child: ContextId) -> Result<()> {
        self.ctx_mut(parent)?.base.children.retain(|&c| c != child);
        let child_native = self.native_window(child)?;
        self.backend.set_transient_for(child_native, None)
    }

    /// Moves every owned child of `from` under `to`
    pub(crate) fn reparent_children(&mut self, from: ContextId, to: ContextId) -> Result<()> {
        let children = std::mem::take(&mut self.ctx_mut(from)?.base.children);
        for child in children {
            if let Ok(top) = self.top_mut(child) {
                top.owner = Some(to);
            }
            self.add_child(to, child)?;
        }
        Ok(())
    }

    /// Minimizes or restores the owned children, recursively
    pub fn show_or_hide_children(&mut self, id: ContextId, show: bool) -> Result<()> {
        let children = self.context(id)?.base.children.clone();
        for child in children {
            self.set_minimized(child, !show)?;
            self.show_or_hide_children(child, show)?;
        }
        Ok(())
    }
}

// Toolkit operations shared by all kinds
impl ContextManager {
    /// Attaches or detaches the view
    pub fn set_view(&mut self, id: ContextId, view: Option<Rc<View>>) -> Result<()> {
        let context = self.ctx_mut(id)?;
        let is_top = matches!(context.kind, ContextKind::Top(_));
        let native = context.base.native;
        let old = std::mem::replace(&mut context.base.view, view.clone());

        if let Some(old) = old.filter(|_| is_top) {
            crate::toolkit::checked("mouse", old.peer().notify_mouse(exit_event()));
        }
        if let Some(view) = view {
            view.set_current_window(Some(id));
            let (width, height) = self.backend.size(native).unwrap_or_else(|e| {
                debug!("Size of {:#x} unavailable: {}", native.0, e);
                (0, 0)
            });
            crate::toolkit::checked("resize", view.peer().notify_resize(width, height));
        }
        Ok(())
    }

    pub fn set_visible(&mut self, id: ContextId, visible: bool) -> Result<()> {
        match self.context(id)?.kind {
            ContextKind::Top(_) => self.top_set_visible(id, visible),
            ContextKind::Plug(_) => self.base_set_visible(id, visible),
            ContextKind::Child(_) => self.child_set_visible(id, visible),
        }
    }

    pub(crate) fn base_set_visible(&mut self, id: ContextId, visible: bool) -> Result<()> {
        let native = self.native_window(id)?;
        if visible {
            return self.backend.show(native);
        }

        self.backend.hide(native)?;
        // no exit event will arrive once the window is hidden
        let has_view = self.view(id).is_some();
        let context = self.ctx_mut(id)?;
        if has_view && context.base.is_mouse_entered {
            context.base.is_mouse_entered = false;
            self.notify_view(id, "mouse", |view| view.notify_mouse(exit_event()));
        }
        Ok(())
    }

    pub fn set_bounds(&mut self, id: ContextId, bounds: Bounds) -> Result<()> {
        match self.context(id)?.kind {
            ContextKind::Top(_) => self.top_set_bounds(id, bounds),
            ContextKind::Plug(_) => self.plug_set_bounds(id, bounds),
            ContextKind::Child(_) => self.child_set_bounds(id, bounds),
        }
    }

    pub fn restack(&mut self, id: ContextId, to_front: bool) -> Result<()> {
        match self.context(id)?.kind {
            ContextKind::Child(_) => self.child_restack(id, to_front),
            _ => {
                let native = self.native_window(id)?;
                self.backend.restack(native, to_front)
            }
        }
    }

    pub fn request_focus(&mut self, id: ContextId) -> Result<()> {
        let native = self.native_window(id)?;
        match self.context(id)?.kind {
            ContextKind::Top(_) => {
                // showing the window takes care of the first activation
                if self.backend.is_visible(native) {
                    self.backend.present(native)?;
                }
                Ok(())
            }
            _ => self.backend.focus_widget(native),
        }
    }

    pub fn enter_fullscreen(&mut self, id: ContextId) -> Result<()> {
        match self.context(id)?.kind {
            ContextKind::Top(_) => self.top_enter_fullscreen(id),
            ContextKind::Child(_) => self.child_enter_fullscreen(id),
            ContextKind::Plug(_) => {
                debug!("Full screen not supported for plug {:?}", id);
                Ok(())
            }
        }
    }

    pub fn exit_fullscreen(&mut self, id: ContextId) -> Result<()> {
        match self.context(id)?.kind {
            ContextKind::Top(_) => {
                let native = self.native_window(id)?;
                self.backend.set_fullscreen(native, false)
            }
            ContextKind::Child(_) => self.child_exit_fullscreen(id),
            ContextKind::Plug(_) => Ok(()),
        }
    }

    pub fn set_background(&mut self, id: ContextId, rgb: [f32; 3]) -> Result<()> {
        let native = self.native_window(id)?;
        self.backend.set_background(native, rgb)
    }

    /// Uploads a premultiplied ARGB frame
    pub fn paint(&mut self, id: ContextId, data: &[u8], width: u32, height: u32) -> Result<()> {
        let native = self.native_window(id)?;
        if !self.backend.is_visible(native) {
            return Ok(());
        }
        let transparent = self
            .top(id)
            .is_ok_and(|top| top.frame == super::FrameType::Transparent);
        if transparent {
            self.top_apply_shape_mask(id, data, width, height)?;
        }
        self.backend.draw_image(native, data, width, height)
    }

    pub fn enable_ime(&mut self, id: ContextId) -> Result<()> {
        let native = self.native_window(id)?;
        let im = self.ime_factory.create(native)?;
        self.ctx_mut(id)?.base.ime.enable(im);
        debug!("Input method enabled for {:?}", id);
        Ok(())
    }

    pub fn disable_ime(&mut self, id: ContextId) -> Result<()> {
        self.ctx_mut(id)?.base.ime.disable();
        Ok(())
    }

    /// Drops the current composition
    pub fn reset_ime(&mut self, id: ContextId) -> Result<()> {
        self.ctx_mut(id)?.base.ime.reset()
    }
}
