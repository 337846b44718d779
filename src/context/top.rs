//! Top-Level Window Context
//!
//! A window managed by the window manager. Owns the geometry model and keeps
//! it reconciled with what the window manager grants: frame extents arrive
//! asynchronously, configure requests echo back as configure notifications,
//! and size hints must follow the resizable policy.

use anyhow::{Context, Result};
use std::rc::Rc;
use tracing::{debug, info, warn};

use super::{Bounds, ContextBase, ContextId, ContextKind, ContextManager};
use crate::backend::{Icon, NativeKind, ShapeKind, SizeHints, WindowChanges};
use crate::event::{NativeWindow, WindowStateFlags};
use crate::shared::{BoundsValue, FrameExtents, Geometry, WindowGeometry};
use crate::toolkit::{FocusChange, ViewChange, WindowLevel, WindowPeer, WindowStateChange};

/// Outer size of a window shown before the toolkit sized it
const DEFAULT_WIDTH: i32 = 320;
const DEFAULT_HEIGHT: i32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Decorated by the window manager
    Titled,
    Untitled,
    /// Undecorated, per-pixel alpha, shaped by the painted alpha channel
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Normal,
    Utility,
    Popup,
}

/// Resizable policy and the user size limits, in outer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resizable {
    pub value: bool,
    /// Value to restore when the window is enabled again
    pub prev: bool,
    /// Change requested before the first map
    pub request: Option<bool>,
    pub minw: i32,
    pub minh: i32,
    pub maxw: i32,
    pub maxh: i32,
}

impl Default for Resizable {
    fn default() -> Self {
        Self {
            value: true,
            prev: false,
            request: None,
            minw: -1,
            minh: -1,
            maxw: -1,
            maxh: -1,
        }
    }
}

/// Last extents the window manager gave each window type
///
/// New titled windows borrow these until their own extents arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentsCache {
    normal: FrameExtents,
    utility: FrameExtents,
}

impl Default for ExtentsCache {
    fn default() -> Self {
        let seed = FrameExtents::new(28, 1, 1, 1);
        Self {
            normal: seed,
            utility: seed,
        }
    }
}

impl ExtentsCache {
    pub fn get(&self, window_type: WindowType) -> FrameExtents {
        match window_type {
            WindowType::Normal => self.normal,
            _ => self.utility,
        }
    }

    pub fn store(&mut self, window_type: WindowType, extents: FrameExtents) {
        match window_type {
            WindowType::Normal => self.normal = extents,
            _ => self.utility = extents,
        }
    }
}

/// Cached 1-bit pixmap used to shape transparent windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShapeMask {
    pub(crate) pixmap: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

#[derive(Debug)]
pub struct TopLevel {
    pub(crate) geometry: WindowGeometry,
    pub(crate) frame: FrameType,
    pub(crate) window_type: WindowType,
    /// Not owning; the owner lists this context among its children
    pub(crate) owner: Option<ContextId>,
    pub(crate) resizable: Resizable,
    /// Configure notifications expected to echo our own requests
    pub(crate) stale_config_notifications: u32,
    pub(crate) map_received: bool,
    pub(crate) frame_extents_initialized: bool,
    /// Set once the toolkit gave a size or a position
    pub(crate) size_assigned: bool,
    pub(crate) location_assigned: bool,
    pub(crate) screen: i64,
    pub(crate) on_top: bool,
    pub(crate) state: WindowStateFlags,
    pub(crate) shape_mask: Option<ShapeMask>,
}

impl TopLevel {
    fn new(frame: FrameType, window_type: WindowType, owner: Option<ContextId>, screen: i64) -> Self {
        Self {
            geometry: WindowGeometry::new(),
            frame,
            window_type,
            owner,
            resizable: Resizable::default(),
            stale_config_notifications: 0,
            map_received: false,
            frame_extents_initialized: false,
            size_assigned: false,
            location_assigned: false,
            screen,
            on_top: false,
            state: WindowStateFlags::empty(),
            shape_mask: None,
        }
    }

    pub fn geometry(&self) -> &WindowGeometry {
        &self.geometry
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub fn owner(&self) -> Option<ContextId> {
        self.owner
    }

    pub fn resizable(&self) -> &Resizable {
        &self.resizable
    }

    pub fn stale_config_notifications(&self) -> u32 {
        self.stale_config_notifications
    }

    pub fn map_received(&self) -> bool {
        self.map_received
    }

    pub fn screen(&self) -> i64 {
        self.screen
    }

    pub fn is_on_top(&self) -> bool {
        self.on_top
    }

    pub fn state(&self) -> WindowStateFlags {
        self.state
    }
}

// Construction and teardown
impl ContextManager {
    /// Creates a top-level window context
    pub fn create_top_level(
        &mut self,
        peer: Option<Rc<dyn WindowPeer>>,
        owner: Option<ContextId>,
        screen: i64,
        frame: FrameType,
        window_type: WindowType,
    ) -> Result<ContextId> {
        if let Some(owner) = owner {
            self.context(owner)?;
        }
        let native = self
            .backend
            .create_window(NativeKind::TopLevel {
                decorated: frame == FrameType::Titled,
                popup: window_type == WindowType::Popup,
                utility: window_type == WindowType::Utility,
                transparent: frame == FrameType::Transparent,
            })
            .context("Failed to create top-level window")?;

        if frame == FrameType::Titled && self.config.frame_extents.request {
            // answered later through a property notification, if ever
            if let Err(e) = self.backend.request_frame_extents(native) {
                warn!("Failed to request frame extents for {:#x}: {}", native.0, e);
            }
        }

        let top = TopLevel::new(frame, window_type, owner, screen);
        let id = self.register(ContextBase::new(native, peer), ContextKind::Top(top));

        if let Some(owner) = owner {
            self.add_child(owner, id)?;
            if self.effective_on_top(owner) {
                self.backend.set_keep_above(native, true)?;
            }
        }
        Ok(id)
    }

    pub(crate) fn top_process_destroy(&mut self, id: ContextId) {
        let Ok(top) = self.top_mut(id) else {
            return;
        };
        if let Some(owner) = top.owner.take() {
            if let Err(e) = self.remove_child(owner, id) {
                debug!("Failed to detach {:?} from owner {:?}: {}", id, owner, e);
            }
        }
    }
}

// Geometry reconciliation
impl ContextManager {
    /// Window manager published new decoration insets
    pub(crate) fn top_process_frame_extents(&mut self, id: ContextId) -> Result<()> {
        let native = self.native_window(id)?;
        if self.top(id)?.frame != FrameType::Titled {
            return Ok(());
        }
        let Some(extents) = self.backend.frame_extents(native)? else {
            return Ok(());
        };

        let window_type = self.top(id)?.window_type;
        if !extents.is_empty() {
            self.extents_cache.store(window_type, extents);
        }

        let top = self.top_mut(id)?;
        let old_x = top.geometry.window_x();
        let old_y = top.geometry.window_y();
        let old_width = top.geometry.content_width();
        let old_height = top.geometry.content_height();

        let changed = top.geometry.extents != extents;
        top.geometry.extents = extents;
        top.frame_extents_initialized = true;
        if changed {
            info!(
                "Frame extents of {:?}: top {} left {} bottom {} right {}",
                id, extents.top, extents.left, extents.bottom, extents.right
            );
            self.update_window_constraints(id)?;
        }

        let geometry = &self.top(id)?.geometry;
        let new_x = geometry.window_x();
        let new_y = geometry.window_y();
        let new_width = geometry.content_width();
        let new_height = geometry.content_height();
        let changes = WindowChanges {
            x: (old_x != new_x).then_some(new_x),
            y: (old_y != new_y).then_some(new_y),
            width: (old_width != new_width).then_some(new_width),
            height: (old_height != new_height).then_some(new_height),
        };
        self.window_configure(id, &changes)?;

        self.notify_view(id, "view", |view| view.notify_view(ViewChange::Move));
        Ok(())
    }

    /// Best-effort synchronous read so early bounds see some extents
    ///
    /// Falls back to the extents last seen for the same window type.
    fn initialize_frame_extents(&mut self, id: ContextId) -> Result<()> {
        let native = self.native_window(id)?;
        let extents = if self.config.frame_extents.sync_initialize {
            self.backend.frame_extents(native).unwrap_or_else(|e| {
                debug!("Frame extents of {:#x} not readable yet: {}", native.0, e);
                None
            })
        } else {
            None
        };
        let window_type = self.top(id)?.window_type;
        let cached = self.extents_cache.get(window_type);

        match extents.filter(|extents| !extents.is_empty()) {
            Some(extents) => {
                self.extents_cache.store(window_type, extents);
                let top = self.top_mut(id)?;
                top.geometry.extents = extents;
                top.frame_extents_initialized = true;
            }
            None => {
                let top = self.top_mut(id)?;
                if top.geometry.extents.is_empty() && !cached.is_empty() {
                    top.geometry.extents = cached;
                }
            }
        }
        Ok(())
    }

    /// Window system reported the actual position and size
    pub(crate) fn top_process_configure(
        &mut self,
        id: ContextId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<()> {
        let native = self.native_window(id)?;
        let top = self.top(id)?;
        if top.size_assigned
            && width <= 1
            && height <= 1
            && (top.geometry.final_width.value() > 1 || top.geometry.final_height.value() > 1)
        {
            debug!("Skipping {}x{} configure artifact for {:?}", width, height, id);
            return Ok(());
        }
        let decorated = top.frame == FrameType::Titled;
        // undecorated windows get inconsistent client-relative positions otherwise
        let (x, y) = if decorated {
            self.backend.decorated_position(native).unwrap_or_else(|e| {
                debug!("Decorated position of {:#x} unavailable: {}", native.0, e);
                (x, y)
            })
        } else {
            (x, y)
        };

        let top = self.top_mut(id)?;
        let extents = top.geometry.extents;
        top.geometry.current_width = width + extents.horizontal();
        top.geometry.current_height = height + extents.vertical();

        if top.stale_config_notifications == 0 {
            // the window manager overrode us; stop fighting it
            if top.geometry.content_width() != width || top.geometry.content_height() != height {
                top.geometry.final_width = BoundsValue::Content(width);
                top.geometry.final_height = BoundsValue::Content(height);
            }
            top.geometry.set_window_x(x);
            top.geometry.set_window_y(y);
        } else {
            top.stale_config_notifications -= 1;
            debug!(
                "Stale configure for {:?} consumed, {} pending",
                id, top.stale_config_notifications
            );
        }
        let (current_width, current_height) = (top.geometry.current_width, top.geometry.current_height);
        let old_screen = top.screen;

        self.notify_view(id, "resize", |view| view.notify_resize(width, height));
        self.notify_view(id, "view", |view| view.notify_view(ViewChange::Move));
        self.notify_window(id, "resize", |peer| peer.notify_resize(current_width, current_height));
        self.notify_window(id, "move", |peer| peer.notify_move(x, y));

        match self.backend.monitor_at(x, y) {
            Ok(Some(screen)) if screen != old_screen => {
                self.notify_window(id, "move_to_screen", |peer| {
                    peer.notify_move_to_screen(old_screen, screen)
                });
                self.top_mut(id)?.screen = screen;
            }
            Ok(_) => {}
            Err(e) => debug!("Monitor lookup at {},{} failed: {}", x, y, e),
        }
        Ok(())
    }

    /// Issues a configure request, tracking the notification it will echo
    pub(crate) fn window_configure(&mut self, id: ContextId, changes: &WindowChanges) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let native = self.native_window(id)?;

        if !self.backend.is_visible(native) {
            // configure events of an unmapped window carry no feedback
            self.backend.move_resize(native, changes)?;
            self.top_mut(id)?.stale_config_notifications = 1;
            return Ok(());
        }

        let top = self.top_mut(id)?;
        top.stale_config_notifications += 1;
        if !top.resizable.value && changes.has_size() {
            let width = changes.width.unwrap_or(top.geometry.content_width());
            let height = changes.height.unwrap_or(top.geometry.content_height());
            // some window managers reject resizes that conflict with the old pinned size
            self.backend.set_size_hints(
                native,
                &SizeHints {
                    min_width: 1,
                    min_height: 1,
                    max_width: i32::MAX,
                    max_height: i32::MAX,
                },
            )?;
            self.backend.configure(native, changes)?;
            return self.backend.set_size_hints(native, &SizeHints::fixed(width, height));
        }
        self.backend.configure(native, changes)
    }

    /// Recomputes min/max hints in content coordinates
    fn update_window_constraints(&mut self, id: ContextId) -> Result<()> {
        let native = self.native_window(id)?;
        let top = self.top(id)?;
        if !top.resizable.value {
            return Ok(());
        }
        let extents = top.geometry.extents;
        let limits = &self.config.size_hints;
        let resizable = &top.resizable;
        let hints = SizeHints {
            min_width: if resizable.minw == -1 {
                1
            } else {
                resizable.minw - extents.horizontal()
            },
            min_height: if resizable.minh == -1 {
                1
            } else {
                resizable.minh - extents.vertical()
            },
            max_width: if resizable.maxw == -1 {
                limits.max_width
            } else {
                resizable.maxw - extents.horizontal()
            },
            max_height: if resizable.maxh == -1 {
                limits.max_height
            } else {
                resizable.maxh - extents.vertical()
            },
        };
        self.backend.set_size_hints(native, &hints)
    }

    fn set_window_resizable(&mut self, id: ContextId, resizable: bool) -> Result<()> {
        let native = self.native_window(id)?;
        if resizable {
            let top = self.top_mut(id)?;
            top.resizable.prev = top.resizable.value;
            top.resizable.value = true;
            return self.update_window_constraints(id);
        }

        let geometry = &self.top(id)?.geometry;
        let (width, height) = if geometry.final_width == BoundsValue::Unset
            && geometry.final_height == BoundsValue::Unset
        {
            self.backend.size(native)?
        } else {
            (geometry.content_width(), geometry.content_height())
        };
        self.backend.set_size_hints(native, &SizeHints::fixed(width, height))?;
        let top = self.top_mut(id)?;
        top.resizable.prev = top.resizable.value;
        top.resizable.value = false;
        Ok(())
    }

    /// Size hints set before the first map are unreliable, so defer them
    pub fn set_resizable(&mut self, id: ContextId, resizable: bool) -> Result<()> {
        let Ok(top) = self.top_mut(id) else {
            return Ok(());
        };
        top.resizable.prev = false;
        if top.map_received {
            self.set_window_resizable(id, resizable)
        } else {
            top.resizable.request = Some(resizable);
            Ok(())
        }
    }

    pub(crate) fn top_process_map(&mut self, id: ContextId) -> Result<()> {
        let top = self.top_mut(id)?;
        top.map_received = true;
        let request = top.resizable.request.take();
        match request {
            Some(resizable) => self.set_window_resizable(id, resizable),
            None => Ok(()),
        }
    }

    /// Disabled windows are pinned; enabling restores the previous policy
    pub fn set_enabled(&mut self, id: ContextId, enabled: bool) -> Result<()> {
        let Ok(top) = self.top_mut(id) else {
            return Ok(());
        };
        let resizable = top.resizable;
        if enabled {
            if resizable.prev {
                self.set_window_resizable(id, true)?;
            }
        } else if resizable.value {
            self.set_window_resizable(id, false)?;
            self.top_mut(id)?.resizable.prev = true;
        } else if resizable.prev {
            self.top_mut(id)?.resizable.prev = false;
        }
        Ok(())
    }

    pub fn set_minimum_size(&mut self, id: ContextId, width: i32, height: i32) -> Result<()> {
        let Ok(top) = self.top_mut(id) else {
            return Ok(());
        };
        top.resizable.minw = width;
        top.resizable.minh = height;
        self.update_window_constraints(id)
    }

    pub fn set_maximum_size(&mut self, id: ContextId, width: i32, height: i32) -> Result<()> {
        let Ok(top) = self.top_mut(id) else {
            return Ok(());
        };
        top.resizable.maxw = width;
        top.resizable.maxh = height;
        self.update_window_constraints(id)
    }

    pub fn set_gravity(&mut self, id: ContextId, gravity_x: f64, gravity_y: f64) -> Result<()> {
        if let Ok(top) = self.top_mut(id) {
            top.geometry.set_gravity(gravity_x, gravity_y);
        }
        Ok(())
    }

    /// Current decoration insets
    pub fn frame_extents(&self, id: ContextId) -> Result<FrameExtents> {
        Ok(self.top(id)?.geometry.extents)
    }

    pub(crate) fn top_set_bounds(&mut self, id: ContextId, bounds: Bounds) -> Result<()> {
        let top = self.top(id)?;
        if top.frame == FrameType::Titled && !top.frame_extents_initialized {
            self.initialize_frame_extents(id)?;
        }

        let top = self.top_mut(id)?;
        let geometry = &mut top.geometry;
        let mut changes = WindowChanges::default();

        if bounds.width > 0 {
            geometry.final_width = BoundsValue::Window(bounds.width);
        } else if bounds.content_width > 0 {
            geometry.final_width = BoundsValue::Content(bounds.content_width);
        }
        if bounds.width > 0 || bounds.content_width > 0 {
            geometry.current_width = geometry.window_width();
            changes.width = Some(geometry.content_width());
        }
        if bounds.height > 0 {
            geometry.final_height = BoundsValue::Window(bounds.height);
        } else if bounds.content_height > 0 {
            geometry.final_height = BoundsValue::Content(bounds.content_height);
        }
        if bounds.height > 0 || bounds.content_height > 0 {
            geometry.current_height = geometry.window_height();
            changes.height = Some(geometry.content_height());
        }

        if bounds.x.is_some() || bounds.y.is_some() {
            // the anchor keeps its place across a combined move and resize
            if let Some(x) = bounds.x {
                geometry.refx = f64::from(x) + f64::from(geometry.current_width) * geometry.gravity_x;
            }
            changes.x = Some(geometry.window_x());
            if let Some(y) = bounds.y {
                geometry.refy = f64::from(y) + f64::from(geometry.current_height) * geometry.gravity_y;
            }
            changes.y = Some(geometry.window_y());
            top.location_assigned = true;
        }
        if changes.has_size() {
            top.size_assigned = true;
        }

        self.window_configure(id, &changes)
    }

    /// Shows a top-level, giving it a size and a place if it never got one
    pub(crate) fn top_set_visible(&mut self, id: ContextId, visible: bool) -> Result<()> {
        if visible {
            let top = self.top(id)?;
            let (size_assigned, location_assigned) = (top.size_assigned, top.location_assigned);
            if !size_assigned {
                self.top_set_bounds(id, Bounds::window_size(DEFAULT_WIDTH, DEFAULT_HEIGHT))?;
            }
            if !location_assigned {
                self.top_set_bounds(id, Bounds::position(0, 0))?;
            }
        }
        self.base_set_visible(id, visible)?;
        // focus notifications may arrive out of order, announce it up front
        if visible && self.is_enabled(id) {
            self.notify_window(id, "focus", |peer| peer.notify_focus(FocusChange::Gained));
        }
        Ok(())
    }
}

// Window manager state
impl ContextManager {
    pub(crate) fn top_process_state(
        &mut self,
        id: ContextId,
        changed: WindowStateFlags,
        new_state: WindowStateFlags,
    ) -> Result<()> {
        let native = self.native_window(id)?;
        if changed.intersects(WindowStateFlags::ICONIFIED | WindowStateFlags::MAXIMIZED) {
            let change = if new_state.contains(WindowStateFlags::ICONIFIED) {
                WindowStateChange::Minimize
            } else if new_state.contains(WindowStateFlags::MAXIMIZED) {
                WindowStateChange::Maximize
            } else {
                WindowStateChange::Restore
            };
            if change == WindowStateChange::Restore {
                // backing content may be lost across maximize and restore
                let (width, height) = self.backend.size(native).unwrap_or((0, 0));
                self.notify_view(id, "repaint", |view| {
                    view.notify_repaint(Geometry::new(0, 0, width, height))
                });
            }
            self.notify_window(id, "state", |peer| peer.notify_state(change));
        }
        if changed.contains(WindowStateFlags::ABOVE) {
            self.notify_on_top(id, new_state.contains(WindowStateFlags::ABOVE))?;
        }
        self.top_mut(id)?.state = new_state;
        Ok(())
    }

    /// Whether some owner up the chain keeps its windows above
    fn on_top_inherited(&self, id: ContextId) -> bool {
        let mut owner = self.top(id).ok().and_then(|top| top.owner);
        while let Some(current) = owner {
            match self.top(current) {
                Ok(top) if top.on_top => return true,
                Ok(top) => owner = top.owner,
                Err(_) => return false,
            }
        }
        false
    }

    fn effective_on_top(&self, id: ContextId) -> bool {
        self.top(id).is_ok_and(|top| top.on_top) || self.on_top_inherited(id)
    }

    /// Propagates keep-above down the owned children
    fn update_ontop_tree(&mut self, id: ContextId, on_top: bool) -> Result<()> {
        let children = self.context(id)?.base.children.clone();
        for child in children {
            let Ok(top) = self.top(child) else {
                continue;
            };
            let effective = on_top || top.on_top;
            let native = self.native_window(child)?;
            self.backend.set_keep_above(native, effective)?;
            self.update_ontop_tree(child, effective)?;
        }
        Ok(())
    }

    /// Keep-above toggled from outside, e.g. by the window manager menu
    fn notify_on_top(&mut self, id: ContextId, above: bool) -> Result<()> {
        if above == self.effective_on_top(id) {
            return Ok(());
        }
        if self.on_top_inherited(id) && !above {
            // inherited keep-above cannot be dropped by the user
            let native = self.native_window(id)?;
            return self.backend.set_keep_above(native, true);
        }
        self.top_mut(id)?.on_top = above;
        self.update_ontop_tree(id, above)?;
        let level = if above {
            WindowLevel::Floating
        } else {
            WindowLevel::Normal
        };
        self.notify_window(id, "level", |peer| peer.notify_level(level));
        Ok(())
    }

    pub fn set_level(&mut self, id: ContextId, level: WindowLevel) -> Result<()> {
        let Ok(top) = self.top_mut(id) else {
            return Ok(());
        };
        top.on_top = level != WindowLevel::Normal;
        let on_top = top.on_top;
        if !self.on_top_inherited(id) {
            let native = self.native_window(id)?;
            self.backend.set_keep_above(native, on_top)?;
            self.update_ontop_tree(id, on_top)?;
        }
        Ok(())
    }
}

// Plain window-manager requests, no-ops on embedded contexts
impl ContextManager {
    fn top_only(&self, id: ContextId, what: &str) -> Result<Option<NativeWindow>> {
        let context = self.context(id)?;
        if context.as_top().is_some() {
            Ok(Some(context.base.native))
        } else {
            debug!("{} ignored for {} context {:?}", what, context.kind_name(), id);
            Ok(None)
        }
    }

    pub fn set_minimized(&mut self, id: ContextId, minimized: bool) -> Result<()> {
        if let Some(native) = self.top_only(id, "set_minimized")? {
            self.backend.set_iconified(native, minimized)?;
        }
        Ok(())
    }

    pub fn set_maximized(&mut self, id: ContextId, maximized: bool) -> Result<()> {
        if let Some(native) = self.top_only(id, "set_maximized")? {
            self.backend.set_maximized(native, maximized)?;
        }
        Ok(())
    }

    pub(crate) fn top_enter_fullscreen(&mut self, id: ContextId) -> Result<()> {
        let native = self.native_window(id)?;
        self.backend.set_fullscreen(native, true)
    }

    pub fn set_focusable(&mut self, id: ContextId, focusable: bool) -> Result<()> {
        if let Some(native) = self.top_only(id, "set_focusable")? {
            self.backend.set_accept_focus(native, focusable)?;
        }
        Ok(())
    }

    pub fn set_title(&mut self, id: ContextId, title: &str) -> Result<()> {
        if let Some(native) = self.top_only(id, "set_title")? {
            self.backend.set_title(native, title)?;
        }
        Ok(())
    }

    pub fn set_alpha(&mut self, id: ContextId, alpha: f64) -> Result<()> {
        if let Some(native) = self.top_only(id, "set_alpha")? {
            self.backend.set_opacity(native, alpha.clamp(0.0, 1.0))?;
        }
        Ok(())
    }

    pub fn set_icon(&mut self, id: ContextId, icon: Option<&Icon>) -> Result<()> {
        if let Some(native) = self.top_only(id, "set_icon")? {
            self.backend.set_icon(native, icon)?;
        }
        Ok(())
    }

    /// A modal window is made transient for `parent` first
    pub fn set_modal(&mut self, id: ContextId, modal: bool, parent: Option<ContextId>) -> Result<()> {
        let Some(native) = self.top_only(id, "set_modal")? else {
            return Ok(());
        };
        if modal {
            if let Some(parent) = parent {
                let parent_native = self.native_window(parent)?;
                self.backend.set_transient_for(native, Some(parent_native))?;
            }
        }
        self.backend.set_modal(native, modal)
    }

    /// Moves the context under another owner
    pub fn set_owner(&mut self, id: ContextId, owner: Option<ContextId>) -> Result<()> {
        let Ok(top) = self.top_mut(id) else {
            return Ok(());
        };
        let old = std::mem::replace(&mut top.owner, owner);
        if old == owner {
            return Ok(());
        }
        if let Some(old) = old {
            if self.contains(old) {
                self.remove_child(old, id)?;
            }
        }
        if let Some(owner) = owner {
            self.add_child(owner, id)?;
        }
        Ok(())
    }

    /// Shapes a transparent window after its painted alpha
    pub(crate) fn top_apply_shape_mask(&mut self, id: ContextId, data: &[u8], width: u32, height: u32) -> Result<()> {
        let native = self.native_window(id)?;
        let cached = self.top(id)?.shape_mask;
        let mask = match cached {
            Some(mask) if mask.width == width && mask.height == height => mask,
            _ => {
                if let Some(old) = cached {
                    self.backend.free_mask(old.pixmap)?;
                }
                let pixmap = self
                    .backend
                    .create_mask(native, width, height)
                    .context("Failed to allocate shape mask")?;
                let mask = ShapeMask {
                    pixmap,
                    width,
                    height,
                };
                self.top_mut(id)?.shape_mask = Some(mask);
                mask
            }
        };

        let composited = self.backend.is_composited().unwrap_or_else(|e| {
            debug!("Compositing query failed: {}", e);
            false
        });
        let kind = if composited {
            ShapeKind::Input
        } else {
            ShapeKind::Bounding
        };
        self.backend
            .apply_shape_mask(native, mask.pixmap, data, width, height, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NativeEvent;
    use crate::event::PropertyKind;
    use crate::testing::{harness, Call, PeerEvent, ViewEvent};

    fn top_of(h: &crate::testing::Harness, id: ContextId) -> &TopLevel {
        h.manager.context(id).unwrap().as_top().unwrap()
    }

    fn configure(width: i32, height: i32) -> NativeEvent {
        NativeEvent::Configure {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    #[test]
    fn test_echoed_configures_do_not_override_target() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.manager.set_visible(id, true).unwrap();
        let native = h.native(id);
        // echo of the default size given on show
        h.send(native, configure(320, 200));
        assert_eq!(top_of(&h, id).stale_config_notifications(), 0);

        for (w, ht) in [(200, 100), (300, 150), (400, 200)] {
            h.manager.set_bounds(id, Bounds::content_size(w, ht)).unwrap();
        }
        assert_eq!(top_of(&h, id).stale_config_notifications(), 3);

        for (w, ht) in [(200, 100), (300, 150), (400, 200)] {
            h.send(native, configure(w, ht));
        }
        let top = top_of(&h, id);
        assert_eq!(top.stale_config_notifications(), 0);
        assert_eq!(top.geometry().final_width, BoundsValue::Content(400));
        assert_eq!(top.geometry().final_height, BoundsValue::Content(200));

        h.send(native, configure(500, 250));
        let top = top_of(&h, id);
        assert_eq!(top.geometry().final_width, BoundsValue::Content(500));
        assert_eq!(top.geometry().final_height, BoundsValue::Content(250));
    }

    #[test]
    fn test_configure_before_show_goes_through_move_resize() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        let native = h.native(id);
        h.manager
            .set_bounds(id, Bounds::content_size(320, 200).at(5, 6))
            .unwrap();

        let expected = WindowChanges {
            x: Some(5),
            y: Some(6),
            width: Some(320),
            height: Some(200),
        };
        assert!(h.system.calls().contains(&Call::MoveResize(native, expected)));
        assert_eq!(top_of(&h, id).stale_config_notifications(), 1);
    }

    #[test]
    fn test_configure_notifies_window_and_view() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.attach_view(id);
        h.view_log.clear();
        h.send(h.native(id), NativeEvent::Configure {
            x: 30,
            y: 40,
            width: 640,
            height: 480,
        });

        assert_eq!(
            h.view_log.events(),
            vec![ViewEvent::Resize(640, 480), ViewEvent::View(ViewChange::Move)]
        );
        assert_eq!(
            h.peer_log.events(),
            vec![PeerEvent::Resize(640, 480), PeerEvent::Move(30, 40)]
        );
        assert_eq!(top_of(&h, id).geometry().window_x(), 30);
    }

    #[test]
    fn test_one_pixel_configure_after_sizing_is_ignored() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.attach_view(id);
        h.manager.set_bounds(id, Bounds::window_size(400, 300)).unwrap();
        h.view_log.clear();
        h.peer_log.clear();

        h.send(h.native(id), configure(1, 1));
        assert!(h.view_log.events().is_empty());
        assert!(h.peer_log.events().is_empty());
        let geometry = top_of(&h, id).geometry();
        assert_eq!(geometry.final_width, BoundsValue::Window(400));
        assert_eq!(geometry.current_width, 400);
    }

    #[test]
    fn test_centered_gravity_move_resize_lands_on_requested_origin() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        let native = h.native(id);
        h.manager.set_gravity(id, 0.5, 0.5).unwrap();

        h.manager
            .set_bounds(id, Bounds::window_size(400, 300).at(100, 100))
            .unwrap();
        let expected = WindowChanges {
            x: Some(100),
            y: Some(100),
            width: Some(400),
            height: Some(300),
        };
        assert!(h.system.calls().contains(&Call::MoveResize(native, expected)));
        let geometry = top_of(&h, id).geometry();
        assert_eq!((geometry.current_width, geometry.current_height), (400, 300));
        assert_eq!((geometry.refx, geometry.refy), (300.0, 250.0));
    }

    #[test]
    fn test_show_without_bounds_uses_default_size_and_origin() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        let native = h.native(id);
        h.manager.set_visible(id, true).unwrap();

        let calls = h.system.calls();
        assert!(calls.contains(&Call::MoveResize(
            native,
            WindowChanges {
                width: Some(320),
                height: Some(200),
                ..WindowChanges::default()
            }
        )));
        assert!(calls.contains(&Call::MoveResize(
            native,
            WindowChanges {
                x: Some(0),
                y: Some(0),
                ..WindowChanges::default()
            }
        )));
        let top = top_of(&h, id);
        assert!(top.size_assigned && top.location_assigned);
        assert_eq!(top.geometry().window_width(), 320);

        // a window the toolkit already placed keeps its bounds
        let placed = h.top(FrameType::Untitled);
        h.manager
            .set_bounds(placed, Bounds::content_size(100, 50).at(5, 5))
            .unwrap();
        h.system.clear_calls();
        h.manager.set_visible(placed, true).unwrap();
        assert!(!h.system.calls().iter().any(|c| matches!(c, Call::MoveResize(..))));
    }

    #[test]
    fn test_show_announces_focus_only_when_enabled() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.manager.set_visible(id, true).unwrap();
        assert_eq!(h.peer_log.events(), vec![PeerEvent::Focus(FocusChange::Gained)]);

        h.peer_log.clear();
        h.peer_log.set_enabled(false);
        let disabled = h.top(FrameType::Untitled);
        h.manager.set_visible(disabled, true).unwrap();
        h.manager.set_visible(disabled, false).unwrap();
        assert!(h.peer_log.events().is_empty());
    }

    #[test]
    fn test_monitor_change_is_reported_once() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.system.set_monitor(Some(1));
        h.send(h.native(id), configure(10, 10));
        h.send(h.native(id), configure(20, 20));

        let moves: Vec<PeerEvent> = h
            .peer_log
            .events()
            .into_iter()
            .filter(|e| matches!(e, PeerEvent::MoveToScreen(..)))
            .collect();
        assert_eq!(moves, vec![PeerEvent::MoveToScreen(0, 1)]);
        assert_eq!(top_of(&h, id).screen(), 1);
    }

    #[test]
    fn test_titled_window_requests_extents() {
        let mut h = harness();
        let id = h.top(FrameType::Titled);
        assert!(h.system.calls().contains(&Call::RequestFrameExtents(h.native(id))));

        let untitled = h.top(FrameType::Untitled);
        assert!(!h
            .system
            .calls()
            .contains(&Call::RequestFrameExtents(h.native(untitled))));
    }

    #[test]
    fn test_extents_update_reconfigures_changed_fields() {
        let mut h = harness();
        let id = h.top(FrameType::Titled);
        let native = h.native(id);
        h.manager.set_visible(id, true).unwrap();
        h.manager.set_bounds(id, Bounds::window_size(404, 322)).unwrap();
        h.system.clear_calls();

        h.system
            .set_frame_extents(native, Some(FrameExtents::new(20, 2, 2, 2)));
        h.send(native, NativeEvent::Property {
            kind: PropertyKind::FrameExtents,
        });

        let calls = h.system.calls();
        assert!(calls.contains(&Call::SetSizeHints(
            native,
            SizeHints {
                min_width: 1,
                min_height: 1,
                max_width: 100000,
                max_height: 100000,
            }
        )));
        let expected = WindowChanges {
            width: Some(400),
            height: Some(300),
            ..WindowChanges::default()
        };
        assert!(calls.contains(&Call::Configure(native, expected)));
        assert_eq!(top_of(&h, id).geometry().extents, FrameExtents::new(20, 2, 2, 2));
    }

    #[test]
    fn test_unanswered_extents_fall_back_to_type_cache() {
        let mut h = harness();
        let id = h.top(FrameType::Titled);
        h.manager.set_bounds(id, Bounds::content_size(100, 100)).unwrap();
        let top = top_of(&h, id);
        assert_eq!(top.geometry().extents, FrameExtents::new(28, 1, 1, 1));
        assert_eq!(top.geometry().window_width(), 102);
        // the window's own extents are still expected
        assert!(!top.frame_extents_initialized);

        let untitled = h.top(FrameType::Untitled);
        h.manager.set_bounds(untitled, Bounds::content_size(100, 100)).unwrap();
        assert_eq!(top_of(&h, untitled).geometry().extents, FrameExtents::default());
    }

    #[test]
    fn test_reported_extents_seed_windows_of_same_type() {
        let mut h = harness();
        let first = h.top(FrameType::Titled);
        let native = h.native(first);
        h.system
            .set_frame_extents(native, Some(FrameExtents::new(20, 2, 2, 2)));
        h.send(native, NativeEvent::Property {
            kind: PropertyKind::FrameExtents,
        });

        let second = h.top(FrameType::Titled);
        h.manager.set_bounds(second, Bounds::content_size(100, 100)).unwrap();
        assert_eq!(top_of(&h, second).geometry().extents, FrameExtents::new(20, 2, 2, 2));

        let utility = h
            .manager
            .create_top_level(Some(h.peer()), None, 0, FrameType::Titled, WindowType::Utility)
            .unwrap();
        h.manager.set_bounds(utility, Bounds::content_size(100, 100)).unwrap();
        assert_eq!(top_of(&h, utility).geometry().extents, FrameExtents::new(28, 1, 1, 1));
    }

    #[test]
    fn test_resizable_request_waits_for_map() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        let native = h.native(id);
        h.system.set_size(native, 250, 150);

        h.manager.set_resizable(id, false).unwrap();
        assert_eq!(top_of(&h, id).resizable().request, Some(false));
        assert!(!h.system.calls().iter().any(|c| matches!(c, Call::SetSizeHints(..))));

        h.send(native, NativeEvent::Map);
        assert!(h
            .system
            .calls()
            .contains(&Call::SetSizeHints(native, SizeHints::fixed(250, 150))));
        let resizable = top_of(&h, id).resizable();
        assert!(!resizable.value);
        assert_eq!(resizable.request, None);
    }

    #[test]
    fn test_fixed_size_resize_widens_hints_first() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        let native = h.native(id);
        h.manager.set_bounds(id, Bounds::content_size(200, 100)).unwrap();
        h.send(native, NativeEvent::Map);
        h.manager.set_resizable(id, false).unwrap();
        h.manager.set_visible(id, true).unwrap();
        h.system.clear_calls();

        h.manager.set_bounds(id, Bounds::content_size(300, 200)).unwrap();
        let calls: Vec<Call> = h
            .system
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SetSizeHints(..) | Call::Configure(..)))
            .collect();
        assert_eq!(
            calls,
            vec![
                Call::SetSizeHints(
                    native,
                    SizeHints {
                        min_width: 1,
                        min_height: 1,
                        max_width: i32::MAX,
                        max_height: i32::MAX,
                    }
                ),
                Call::Configure(
                    native,
                    WindowChanges {
                        width: Some(300),
                        height: Some(200),
                        ..WindowChanges::default()
                    }
                ),
                Call::SetSizeHints(native, SizeHints::fixed(300, 200)),
            ]
        );
    }

    #[test]
    fn test_disable_then_enable_restores_resizable() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.manager.set_bounds(id, Bounds::content_size(200, 100)).unwrap();
        h.send(h.native(id), NativeEvent::Map);

        h.manager.set_enabled(id, false).unwrap();
        let resizable = *top_of(&h, id).resizable();
        assert!(!resizable.value);
        assert!(resizable.prev);

        h.manager.set_enabled(id, true).unwrap();
        assert!(top_of(&h, id).resizable().value);
    }

    #[test]
    fn test_min_size_hints_subtract_extents() {
        let mut h = harness();
        let id = h.top(FrameType::Titled);
        let native = h.native(id);
        h.system
            .set_frame_extents(native, Some(FrameExtents::new(20, 2, 2, 2)));
        h.send(native, NativeEvent::Property {
            kind: PropertyKind::FrameExtents,
        });
        h.system.clear_calls();

        h.manager.set_minimum_size(id, 104, 122).unwrap();
        assert_eq!(
            h.system.calls(),
            vec![Call::SetSizeHints(
                native,
                SizeHints {
                    min_width: 100,
                    min_height: 100,
                    max_width: 100000,
                    max_height: 100000,
                }
            )]
        );
    }

    #[test]
    fn test_state_changes_map_to_toolkit_states() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.attach_view(id);
        h.view_log.clear();
        let native = h.native(id);
        h.system.set_size(native, 80, 60);

        h.send(native, NativeEvent::State {
            changed: WindowStateFlags::MAXIMIZED,
            new_state: WindowStateFlags::MAXIMIZED,
        });
        h.send(native, NativeEvent::State {
            changed: WindowStateFlags::MAXIMIZED,
            new_state: WindowStateFlags::empty(),
        });

        assert_eq!(
            h.peer_log.events(),
            vec![
                PeerEvent::State(WindowStateChange::Maximize),
                PeerEvent::State(WindowStateChange::Restore)
            ]
        );
        assert_eq!(
            h.view_log.events(),
            vec![ViewEvent::Repaint(Geometry::new(0, 0, 80, 60))]
        );
    }

    #[test]
    fn test_keep_above_toggle_notifies_level() {
        let mut h = harness();
        let id = h.top(FrameType::Untitled);
        h.send(h.native(id), NativeEvent::State {
            changed: WindowStateFlags::ABOVE,
            new_state: WindowStateFlags::ABOVE,
        });
        assert_eq!(h.peer_log.events(), vec![PeerEvent::Level(WindowLevel::Floating)]);
        assert!(top_of(&h, id).is_on_top());
    }

    #[test]
    fn test_owned_window_inherits_keep_above() {
        let mut h = harness();
        let owner = h.top(FrameType::Titled);
        h.manager.set_level(owner, WindowLevel::Floating).unwrap();
        let dialog = h
            .manager
            .create_top_level(Some(h.peer()), Some(owner), 0, FrameType::Titled, WindowType::Utility)
            .unwrap();
        let dialog_native = h.native(dialog);
        assert!(h.system.calls().contains(&Call::SetKeepAbove(dialog_native, true)));
        assert!(h
            .system
            .calls()
            .contains(&Call::SetTransientFor(dialog_native, Some(h.native(owner)))));

        // the user cannot drop an inherited keep-above
        h.system.clear_calls();
        h.send(dialog_native, NativeEvent::State {
            changed: WindowStateFlags::ABOVE,
            new_state: WindowStateFlags::empty(),
        });
        assert_eq!(h.system.calls(), vec![Call::SetKeepAbove(dialog_native, true)]);
    }

    #[test]
    fn test_set_owner_relinks_children() {
        let mut h = harness();
        let first = h.top(FrameType::Titled);
        let second = h.top(FrameType::Titled);
        let dialog = h
            .manager
            .create_top_level(Some(h.peer()), Some(first), 0, FrameType::Titled, WindowType::Normal)
            .unwrap();

        h.manager.set_owner(dialog, Some(second)).unwrap();
        assert!(h.manager.context(first).unwrap().base().children().is_empty());
        assert_eq!(h.manager.context(second).unwrap().base().children(), &[dialog]);
        assert_eq!(top_of(&h, dialog).owner(), Some(second));
    }

    #[test]
    fn test_shape_mask_reallocated_only_on_resize() {
        let mut h = harness();
        let id = h.top(FrameType::Transparent);
        let native = h.native(id);
        h.manager.set_visible(id, true).unwrap();

        h.manager.paint(id, &[0xff; 16], 2, 2).unwrap();
        h.manager.paint(id, &[0xff; 16], 2, 2).unwrap();
        h.manager.paint(id, &[0xff; 36], 3, 3).unwrap();

        let calls = h.system.calls();
        let created = calls.iter().filter(|c| matches!(c, Call::CreateMask(..))).count();
        let freed = calls.iter().filter(|c| matches!(c, Call::FreeMask(_))).count();
        assert_eq!(created, 2);
        assert_eq!(freed, 1);
        assert!(calls.contains(&Call::ApplyShapeMask(native, ShapeKind::Bounding)));

        h.system.set_composited(true);
        h.manager.paint(id, &[0xff; 36], 3, 3).unwrap();
        assert!(h.system.calls().contains(&Call::ApplyShapeMask(native, ShapeKind::Input)));
    }

    #[test]
    fn test_window_only_requests_ignored_on_plug() {
        let mut h = harness();
        let plug = h.plug();
        h.system.clear_calls();
        h.manager.set_title(plug, "ignored").unwrap();
        h.manager.set_minimized(plug, true).unwrap();
        assert!(h.system.calls().is_empty());
    }
}
