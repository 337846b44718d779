//! X11 Window System
//!
//! `WindowSystem` on top of x11rb, plus translation of raw protocol events into
//! the crate's native event model.

use anyhow::{Context, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::properties::{WmHints, WmSizeHints, WmSizeHintsSpecification};
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::shape::{self, ConnectionExt as _};
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::{
    pack_alpha_mask, BackendEvent, Cursor, Icon, KeyboardMapping, NativeKind, ShapeKind, SizeHints,
    WindowChanges, WindowSystem,
};
use crate::event::{
    GlobalEvent, KeyInput, NativeEvent, NativeState, NativeWindow, PointerPosition, PropertyKind,
    ScrollDirection, WindowStateFlags,
};
use crate::keymap::KeyTable;
use crate::shared::{FrameExtents, Geometry};

/// Event mask selected on every window we create
fn window_events() -> EventMask {
    EventMask::EXPOSURE
        | EventMask::KEY_PRESS
        | EventMask::KEY_RELEASE
        | EventMask::BUTTON_PRESS
        | EventMask::BUTTON_RELEASE
        | EventMask::POINTER_MOTION
        | EventMask::ENTER_WINDOW
        | EventMask::LEAVE_WINDOW
        | EventMask::STRUCTURE_NOTIFY
        | EventMask::PROPERTY_CHANGE
        | EventMask::FOCUS_CHANGE
}

const WM_ICONIC_STATE: u32 = 3;
const NET_WM_STATE_REMOVE: u32 = 0;
const NET_WM_STATE_ADD: u32 = 1;

/// Interned atoms used by the backend
#[derive(Debug)]
pub struct Atoms {
    pub wm_protocols: Atom,
    pub wm_delete_window: Atom,
    pub wm_state: Atom,
    pub wm_change_state: Atom,
    pub wm_transient_for: Atom,
    pub utf8_string: Atom,
    pub net_wm_name: Atom,
    pub net_wm_icon: Atom,
    pub net_wm_window_opacity: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_type_normal: Atom,
    pub net_wm_window_type_utility: Atom,
    pub net_wm_window_type_popup_menu: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_hidden: Atom,
    pub net_wm_state_maximized_vert: Atom,
    pub net_wm_state_maximized_horz: Atom,
    pub net_wm_state_fullscreen: Atom,
    pub net_wm_state_above: Atom,
    pub net_wm_state_modal: Atom,
    pub net_active_window: Atom,
    pub net_frame_extents: Atom,
    pub net_request_frame_extents: Atom,
    pub motif_wm_hints: Atom,
    pub xembed_info: Atom,
}

impl Atoms {
    /// Intern all required atoms
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        let intern = |name: &str| -> Result<Atom> {
            Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
        };

        Ok(Self {
            wm_protocols: intern("WM_PROTOCOLS")?,
            wm_delete_window: intern("WM_DELETE_WINDOW")?,
            wm_state: intern("WM_STATE")?,
            wm_change_state: intern("WM_CHANGE_STATE")?,
            wm_transient_for: intern("WM_TRANSIENT_FOR")?,
            utf8_string: intern("UTF8_STRING")?,
            net_wm_name: intern("_NET_WM_NAME")?,
            net_wm_icon: intern("_NET_WM_ICON")?,
            net_wm_window_opacity: intern("_NET_WM_WINDOW_OPACITY")?,
            net_wm_window_type: intern("_NET_WM_WINDOW_TYPE")?,
            net_wm_window_type_normal: intern("_NET_WM_WINDOW_TYPE_NORMAL")?,
            net_wm_window_type_utility: intern("_NET_WM_WINDOW_TYPE_UTILITY")?,
            net_wm_window_type_popup_menu: intern("_NET_WM_WINDOW_TYPE_POPUP_MENU")?,
            net_wm_state: intern("_NET_WM_STATE")?,
            net_wm_state_hidden: intern("_NET_WM_STATE_HIDDEN")?,
            net_wm_state_maximized_vert: intern("_NET_WM_STATE_MAXIMIZED_VERT")?,
            net_wm_state_maximized_horz: intern("_NET_WM_STATE_MAXIMIZED_HORZ")?,
            net_wm_state_fullscreen: intern("_NET_WM_STATE_FULLSCREEN")?,
            net_wm_state_above: intern("_NET_WM_STATE_ABOVE")?,
            net_wm_state_modal: intern("_NET_WM_STATE_MODAL")?,
            net_active_window: intern("_NET_ACTIVE_WINDOW")?,
            net_frame_extents: intern("_NET_FRAME_EXTENTS")?,
            net_request_frame_extents: intern("_NET_REQUEST_FRAME_EXTENTS")?,
            motif_wm_hints: intern("_MOTIF_WM_HINTS")?,
            xembed_info: intern("_XEMBED_INFO")?,
        })
    }
}

/// Per-window bookkeeping
struct WindowRecord {
    kind: NativeKind,
    gc: Gcontext,
    depth: u8,
    visible: bool,
    cursor: Cursor,
    /// Last state reported through `NativeEvent::State`
    state: WindowStateFlags,
    /// Normal hints as last written
    hints: WmSizeHints,
    colormap: Option<Colormap>,
}

/// x11rb-backed window system
///
/// Clones share the connection and the window table, so the event loop can
/// keep a handle for translation while the manager owns another.
#[derive(Clone)]
pub struct X11Backend {
    conn: Arc<RustConnection>,
    screen_num: usize,
    root: Window,
    root_depth: u8,
    atoms: Rc<Atoms>,
    windows: Rc<RefCell<HashMap<Window, WindowRecord>>>,
    grabbed: Rc<Cell<bool>>,
}

impl X11Backend {
    /// Connect to the display named by `$DISPLAY`
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X server")?;
        Self::new(Arc::new(conn), screen_num)
    }

    pub fn new(conn: Arc<RustConnection>, screen_num: usize) -> Result<Self> {
        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .context("Screen number out of range")?;
        let root = screen.root;
        let root_depth = screen.root_depth;
        let atoms = Atoms::new(conn.as_ref()).context("Failed to intern atoms")?;

        if conn
            .extension_information(shape::X11_EXTENSION_NAME)?
            .is_none()
        {
            warn!("SHAPE extension missing, transparent windows stay rectangular");
        }

        info!("Connected to X server, screen {} root {:#x}", screen_num, root);
        Ok(Self {
            conn,
            screen_num,
            root,
            root_depth,
            atoms: Rc::new(atoms),
            windows: Rc::new(RefCell::new(HashMap::new())),
            grabbed: Rc::new(Cell::new(false)),
        })
    }

    /// Shared connection for the event stream
    pub fn connection(&self) -> Arc<RustConnection> {
        self.conn.clone()
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }

    fn is_known(&self, window: Window) -> bool {
        self.windows.borrow().contains_key(&window)
    }

    fn with_record<T>(&self, window: NativeWindow, f: impl FnOnce(&mut WindowRecord) -> T) -> Result<T> {
        let mut windows = self.windows.borrow_mut();
        let record = windows
            .get_mut(&window.0)
            .with_context(|| format!("Unknown native window {:#x}", window.0))?;
        Ok(f(record))
    }

    fn argb_visual(&self) -> Option<Visualid> {
        let screen = self.conn.setup().roots.get(self.screen_num)?;
        screen
            .allowed_depths
            .iter()
            .filter(|depth| depth.depth == 32)
            .flat_map(|depth| depth.visuals.iter())
            .find(|visual| visual.class == VisualClass::TRUE_COLOR)
            .map(|visual| visual.visual_id)
    }

    /// Sends a `_NET_WM_STATE` change, or edits the property directly before the
    /// window is mapped
    fn change_wm_state(&self, window: NativeWindow, enable: bool, first: Atom, second: Atom) -> Result<()> {
        if self.is_visible(window) {
            let action = if enable { NET_WM_STATE_ADD } else { NET_WM_STATE_REMOVE };
            let event = ClientMessageEvent::new(
                32,
                window.0,
                self.atoms.net_wm_state,
                [action, first, second, 1, 0],
            );
            self.conn.send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )?;
            return Ok(());
        }

        let mut states: Vec<Atom> = self
            .conn
            .get_property(false, window.0, self.atoms.net_wm_state, AtomEnum::ATOM, 0, 1024)?
            .reply()?
            .value32()
            .map(Iterator::collect)
            .unwrap_or_default();
        for atom in [first, second].into_iter().filter(|&a| a != 0) {
            states.retain(|&s| s != atom);
            if enable {
                states.push(atom);
            }
        }
        self.conn.change_property32(
            PropMode::REPLACE,
            window.0,
            self.atoms.net_wm_state,
            AtomEnum::ATOM,
            &states,
        )?;
        Ok(())
    }

    /// Current window-manager state of a window
    fn read_wm_state(&self, window: Window) -> Result<WindowStateFlags> {
        let mut flags = WindowStateFlags::empty();
        let net_state = self
            .conn
            .get_property(false, window, self.atoms.net_wm_state, AtomEnum::ATOM, 0, 1024)?
            .reply()?;
        let atoms: Vec<Atom> = net_state.value32().map(Iterator::collect).unwrap_or_default();
        let has = |atom: Atom| atoms.contains(&atom);
        if has(self.atoms.net_wm_state_hidden) {
            flags |= WindowStateFlags::ICONIFIED;
        }
        if has(self.atoms.net_wm_state_maximized_vert) && has(self.atoms.net_wm_state_maximized_horz) {
            flags |= WindowStateFlags::MAXIMIZED;
        }
        if has(self.atoms.net_wm_state_fullscreen) {
            flags |= WindowStateFlags::FULLSCREEN;
        }
        if has(self.atoms.net_wm_state_above) {
            flags |= WindowStateFlags::ABOVE;
        }

        let wm_state = self
            .conn
            .get_property(false, window, self.atoms.wm_state, self.atoms.wm_state, 0, 2)?
            .reply()?;
        if wm_state.value32().and_then(|mut v| v.next()) == Some(WM_ICONIC_STATE) {
            flags |= WindowStateFlags::ICONIFIED;
        }
        Ok(flags)
    }

    fn write_normal_hints(&self, window: NativeWindow, update: impl FnOnce(&mut WmSizeHints)) -> Result<()> {
        let hints = self.with_record(window, |record| {
            update(&mut record.hints);
            record.hints
        })?;
        hints.set_normal_hints(self.conn.as_ref(), window.0)?;
        Ok(())
    }

    fn configure_aux(changes: &WindowChanges) -> ConfigureWindowAux {
        let mut aux = ConfigureWindowAux::new();
        if let Some(x) = changes.x {
            aux = aux.x(x);
        }
        if let Some(y) = changes.y {
            aux = aux.y(y);
        }
        if let Some(width) = changes.width {
            aux = aux.width(width.max(1) as u32);
        }
        if let Some(height) = changes.height {
            aux = aux.height(height.max(1) as u32);
        }
        aux
    }

    fn position_of(x: i16, y: i16, root_x: i16, root_y: i16) -> PointerPosition {
        PointerPosition::new(f64::from(x), f64::from(y), f64::from(root_x), f64::from(root_y))
    }

    /// Translates a protocol event addressed to one of our windows
    pub fn translate_event(&self, event: &Event, keymap: &KeyTable) -> Option<BackendEvent> {
        if let Event::MappingNotify(_) = event {
            return Some(BackendEvent::Global(GlobalEvent::KeyboardLayoutChanged));
        }

        let (window, native) = match event {
            Event::Expose(e) => (
                e.window,
                NativeEvent::Expose {
                    area: Geometry::new(
                        i32::from(e.x),
                        i32::from(e.y),
                        i32::from(e.width),
                        i32::from(e.height),
                    ),
                },
            ),
            Event::ButtonPress(e) | Event::ButtonRelease(e) => {
                let press = matches!(event, Event::ButtonPress(_));
                let position = Self::position_of(e.event_x, e.event_y, e.root_x, e.root_y);
                let state = NativeState::from_x11(u16::from(e.state));
                let direction = match e.detail {
                    4 => Some(ScrollDirection::Up),
                    5 => Some(ScrollDirection::Down),
                    6 => Some(ScrollDirection::Left),
                    7 => Some(ScrollDirection::Right),
                    _ => None,
                };
                match direction {
                    // wheel buttons come in press/release pairs, one step each
                    Some(_) if !press => return None,
                    Some(direction) => (
                        e.event,
                        NativeEvent::Scroll {
                            direction,
                            position,
                            state,
                        },
                    ),
                    None => (
                        e.event,
                        NativeEvent::Button {
                            press,
                            button: e.detail,
                            position,
                            state,
                        },
                    ),
                }
            }
            Event::MotionNotify(e) => (
                e.event,
                NativeEvent::Motion {
                    position: Self::position_of(e.event_x, e.event_y, e.root_x, e.root_y),
                    state: NativeState::from_x11(u16::from(e.state)),
                },
            ),
            Event::EnterNotify(e) | Event::LeaveNotify(e) => (
                e.event,
                NativeEvent::Crossing {
                    enter: matches!(event, Event::EnterNotify(_)),
                    position: Self::position_of(e.event_x, e.event_y, e.root_x, e.root_y),
                    state: NativeState::from_x11(u16::from(e.state)),
                },
            ),
            Event::KeyPress(e) | Event::KeyRelease(e) => {
                let raw = u16::from(e.state);
                let state = NativeState::from_x11(raw);
                let group = ((raw >> 13) & 0x3) as u8;
                (
                    e.event,
                    NativeEvent::Key(KeyInput {
                        press: matches!(event, Event::KeyPress(_)),
                        keycode: e.detail,
                        keyval: keymap.keyval_for(e.detail, state, group),
                        state,
                        group,
                        time: e.time,
                    }),
                )
            }
            Event::FocusIn(e) | Event::FocusOut(e) => {
                if e.detail == NotifyDetail::POINTER {
                    return None;
                }
                (
                    e.event,
                    NativeEvent::Focus {
                        focus_in: matches!(event, Event::FocusIn(_)),
                    },
                )
            }
            Event::ConfigureNotify(e) => {
                let plug = self
                    .windows
                    .borrow()
                    .get(&e.window)
                    .is_some_and(|record| matches!(record.kind, NativeKind::Plug { .. }));
                let native = if plug {
                    NativeEvent::WidgetConfigure {
                        width: i32::from(e.width),
                        height: i32::from(e.height),
                    }
                } else {
                    NativeEvent::Configure {
                        x: i32::from(e.x),
                        y: i32::from(e.y),
                        width: i32::from(e.width),
                        height: i32::from(e.height),
                    }
                };
                (e.window, native)
            }
            Event::MapNotify(e) => (e.window, NativeEvent::Map),
            Event::DestroyNotify(e) => (e.window, NativeEvent::Destroy),
            Event::PropertyNotify(e) => {
                if e.atom == self.atoms.net_frame_extents {
                    (
                        e.window,
                        NativeEvent::Property {
                            kind: PropertyKind::FrameExtents,
                        },
                    )
                } else if e.atom == self.atoms.net_wm_state || e.atom == self.atoms.wm_state {
                    if !self.is_known(e.window) {
                        return None;
                    }
                    let new_state = match self.read_wm_state(e.window) {
                        Ok(state) => state,
                        Err(err) => {
                            debug!("Failed to read state of {:#x}: {}", e.window, err);
                            return None;
                        }
                    };
                    let old_state = self
                        .with_record(NativeWindow(e.window), |record| {
                            std::mem::replace(&mut record.state, new_state)
                        })
                        .ok()?;
                    let changed = old_state ^ new_state;
                    if changed.is_empty() {
                        return None;
                    }
                    (e.window, NativeEvent::State { changed, new_state })
                } else {
                    (
                        e.window,
                        NativeEvent::Property {
                            kind: PropertyKind::Other(e.atom),
                        },
                    )
                }
            }
            Event::ClientMessage(e) => {
                let data = e.data.as_data32();
                if e.type_ != self.atoms.wm_protocols || data[0] != self.atoms.wm_delete_window {
                    return None;
                }
                (e.window, NativeEvent::Delete)
            }
            _ => return None,
        };

        if !self.is_known(window) {
            return None;
        }
        Some(BackendEvent::Window(NativeWindow(window), native))
    }
}

impl WindowSystem for X11Backend {
    fn create_window(&self, kind: NativeKind) -> Result<NativeWindow> {
        let window = self.conn.generate_id()?;
        let mut aux = CreateWindowAux::new()
            .event_mask(window_events())
            .background_pixel(0)
            .border_pixel(0);
        let mut depth = x11rb::COPY_DEPTH_FROM_PARENT;
        let mut visual = x11rb::COPY_FROM_PARENT;
        let mut colormap = None;

        let parent = match kind {
            NativeKind::TopLevel {
                popup, transparent, ..
            } => {
                aux = aux.override_redirect(u32::from(popup));
                if transparent {
                    if let Some(argb) = self.argb_visual() {
                        let cmap = self.conn.generate_id()?;
                        self.conn
                            .create_colormap(ColormapAlloc::NONE, cmap, self.root, argb)?;
                        aux = aux.colormap(cmap);
                        depth = 32;
                        visual = argb;
                        colormap = Some(cmap);
                    } else {
                        warn!("No 32-bit visual, transparent window falls back to root depth");
                    }
                }
                self.root
            }
            NativeKind::Plug { embedder } => embedder,
            NativeKind::Child { parent } => parent.0,
        };

        self.conn.create_window(
            depth,
            window,
            parent,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &aux,
        )?;

        if let NativeKind::TopLevel {
            decorated,
            popup,
            utility,
            ..
        } = kind
        {
            self.conn.change_property32(
                PropMode::REPLACE,
                window,
                self.atoms.wm_protocols,
                AtomEnum::ATOM,
                &[self.atoms.wm_delete_window],
            )?;
            let window_type = if popup {
                self.atoms.net_wm_window_type_popup_menu
            } else if utility {
                self.atoms.net_wm_window_type_utility
            } else {
                self.atoms.net_wm_window_type_normal
            };
            self.conn.change_property32(
                PropMode::REPLACE,
                window,
                self.atoms.net_wm_window_type,
                AtomEnum::ATOM,
                &[window_type],
            )?;
            if !decorated {
                // flags = MWM_HINTS_DECORATIONS, decorations = none
                self.conn.change_property32(
                    PropMode::REPLACE,
                    window,
                    self.atoms.motif_wm_hints,
                    self.atoms.motif_wm_hints,
                    &[2, 0, 0, 0, 0],
                )?;
            }
        }
        if let NativeKind::Plug { .. } = kind {
            // XEmbed protocol version 0, not yet mapped
            self.conn.change_property32(
                PropMode::REPLACE,
                window,
                self.atoms.xembed_info,
                self.atoms.xembed_info,
                &[0, 0],
            )?;
        }

        let gc = self.conn.generate_id()?;
        self.conn.create_gc(gc, window, &CreateGCAux::new())?;
        let depth = if depth == x11rb::COPY_DEPTH_FROM_PARENT {
            self.conn.get_geometry(window)?.reply()?.depth
        } else {
            depth
        };

        self.windows.borrow_mut().insert(
            window,
            WindowRecord {
                kind,
                gc,
                depth,
                visible: false,
                cursor: Cursor::NONE,
                state: WindowStateFlags::empty(),
                hints: WmSizeHints::new(),
                colormap,
            },
        );
        debug!("Created native window {:#x} ({:?})", window, kind);
        Ok(NativeWindow(window))
    }

    fn destroy_window(&self, window: NativeWindow) -> Result<()> {
        let record = self.windows.borrow_mut().remove(&window.0);
        if let Some(record) = record {
            self.conn.free_gc(record.gc)?;
            if let Some(cmap) = record.colormap {
                self.conn.free_colormap(cmap)?;
            }
        }
        self.conn.destroy_window(window.0)?;
        debug!("Destroyed native window {:#x}", window.0);
        Ok(())
    }

    fn show(&self, window: NativeWindow) -> Result<()> {
        self.with_record(window, |record| record.visible = true)?;
        self.conn.map_window(window.0)?;
        Ok(())
    }

    fn hide(&self, window: NativeWindow) -> Result<()> {
        self.with_record(window, |record| record.visible = false)?;
        self.conn.unmap_window(window.0)?;
        Ok(())
    }

    fn is_visible(&self, window: NativeWindow) -> bool {
        self.windows
            .borrow()
            .get(&window.0)
            .is_some_and(|record| record.visible)
    }

    fn size(&self, window: NativeWindow) -> Result<(i32, i32)> {
        let geometry = self.conn.get_geometry(window.0)?.reply()?;
        Ok((i32::from(geometry.width), i32::from(geometry.height)))
    }

    fn decorated_position(&self, window: NativeWindow) -> Result<(i32, i32)> {
        let (x, y) = self.origin(window)?;
        let extents = self.frame_extents(window)?.unwrap_or_default();
        Ok((x - extents.left, y - extents.top))
    }

    fn origin(&self, window: NativeWindow) -> Result<(i32, i32)> {
        let reply = self
            .conn
            .translate_coordinates(window.0, self.root, 0, 0)?
            .reply()?;
        Ok((i32::from(reply.dst_x), i32::from(reply.dst_y)))
    }

    fn move_resize(&self, window: NativeWindow, changes: &WindowChanges) -> Result<()> {
        self.conn.configure_window(window.0, &Self::configure_aux(changes))?;
        // Unmapped windows: make the window manager honour the placement on map
        self.write_normal_hints(window, |hints| {
            if let (Some(x), Some(y)) = (changes.x, changes.y) {
                hints.position = Some((WmSizeHintsSpecification::UserSpecified, x, y));
            }
            if let (Some(width), Some(height)) = (changes.width, changes.height) {
                hints.size = Some((WmSizeHintsSpecification::UserSpecified, width, height));
            }
        })
    }

    fn configure(&self, window: NativeWindow, changes: &WindowChanges) -> Result<()> {
        self.conn.configure_window(window.0, &Self::configure_aux(changes))?;
        Ok(())
    }

    fn set_size_hints(&self, window: NativeWindow, hints: &SizeHints) -> Result<()> {
        self.write_normal_hints(window, |normal| {
            normal.min_size = Some((hints.min_width, hints.min_height));
            normal.max_size = Some((hints.max_width, hints.max_height));
        })
    }

    fn set_size_request(&self, window: NativeWindow, width: i32, height: i32) -> Result<()> {
        self.configure(
            window,
            &WindowChanges {
                width: Some(width),
                height: Some(height),
                ..WindowChanges::default()
            },
        )
    }

    fn set_transient_for(&self, window: NativeWindow, parent: Option<NativeWindow>) -> Result<()> {
        match parent {
            Some(parent) => {
                self.conn.change_property32(
                    PropMode::REPLACE,
                    window.0,
                    self.atoms.wm_transient_for,
                    AtomEnum::WINDOW,
                    &[parent.0],
                )?;
            }
            None => {
                self.conn.delete_property(window.0, self.atoms.wm_transient_for)?;
            }
        }
        Ok(())
    }

    fn set_modal(&self, window: NativeWindow, modal: bool) -> Result<()> {
        self.change_wm_state(window, modal, self.atoms.net_wm_state_modal, 0)
    }

    fn set_title(&self, window: NativeWindow, title: &str) -> Result<()> {
        self.conn.change_property8(
            PropMode::REPLACE,
            window.0,
            self.atoms.net_wm_name,
            self.atoms.utf8_string,
            title.as_bytes(),
        )?;
        self.conn.change_property8(
            PropMode::REPLACE,
            window.0,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            title.as_bytes(),
        )?;
        Ok(())
    }

    fn set_opacity(&self, window: NativeWindow, alpha: f64) -> Result<()> {
        let value = (alpha.clamp(0.0, 1.0) * f64::from(u32::MAX)) as u32;
        self.conn.change_property32(
            PropMode::REPLACE,
            window.0,
            self.atoms.net_wm_window_opacity,
            AtomEnum::CARDINAL,
            &[value],
        )?;
        Ok(())
    }

    fn set_icon(&self, window: NativeWindow, icon: Option<&Icon>) -> Result<()> {
        match icon {
            Some(icon) => {
                let mut data = Vec::with_capacity(icon.argb.len() + 2);
                data.push(icon.width);
                data.push(icon.height);
                data.extend_from_slice(&icon.argb);
                self.conn.change_property32(
                    PropMode::REPLACE,
                    window.0,
                    self.atoms.net_wm_icon,
                    AtomEnum::CARDINAL,
                    &data,
                )?;
            }
            None => {
                self.conn.delete_property(window.0, self.atoms.net_wm_icon)?;
            }
        }
        Ok(())
    }

    fn set_background(&self, window: NativeWindow, rgb: [f32; 3]) -> Result<()> {
        let [r, g, b] = rgb.map(|c| (c.clamp(0.0, 1.0) * 255.0) as u32);
        let pixel = 0xff00_0000 | (r << 16) | (g << 8) | b;
        self.conn.change_window_attributes(
            window.0,
            &ChangeWindowAttributesAux::new().background_pixel(pixel),
        )?;
        self.conn.clear_area(true, window.0, 0, 0, 0, 0)?;
        Ok(())
    }

    fn set_keep_above(&self, window: NativeWindow, above: bool) -> Result<()> {
        self.change_wm_state(window, above, self.atoms.net_wm_state_above, 0)
    }

    fn set_iconified(&self, window: NativeWindow, iconified: bool) -> Result<()> {
        if iconified {
            let event = ClientMessageEvent::new(
                32,
                window.0,
                self.atoms.wm_change_state,
                [WM_ICONIC_STATE, 0, 0, 0, 0],
            );
            self.conn.send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )?;
            Ok(())
        } else {
            self.present(window)
        }
    }

    fn set_maximized(&self, window: NativeWindow, maximized: bool) -> Result<()> {
        self.change_wm_state(
            window,
            maximized,
            self.atoms.net_wm_state_maximized_vert,
            self.atoms.net_wm_state_maximized_horz,
        )
    }

    fn set_fullscreen(&self, window: NativeWindow, fullscreen: bool) -> Result<()> {
        self.change_wm_state(window, fullscreen, self.atoms.net_wm_state_fullscreen, 0)
    }

    fn set_accept_focus(&self, window: NativeWindow, accept: bool) -> Result<()> {
        let mut hints = WmHints::new();
        hints.input = Some(accept);
        hints.set(self.conn.as_ref(), window.0)?;
        Ok(())
    }

    fn present(&self, window: NativeWindow) -> Result<()> {
        self.with_record(window, |record| record.visible = true)?;
        self.conn.map_window(window.0)?;
        self.conn.configure_window(
            window.0,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        let event = ClientMessageEvent::new(
            32,
            window.0,
            self.atoms.net_active_window,
            [1, x11rb::CURRENT_TIME, 0, 0, 0],
        );
        self.conn.send_event(
            false,
            self.root,
            EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
            event,
        )?;
        Ok(())
    }

    fn restack(&self, window: NativeWindow, to_front: bool) -> Result<()> {
        let mode = if to_front { StackMode::ABOVE } else { StackMode::BELOW };
        self.conn
            .configure_window(window.0, &ConfigureWindowAux::new().stack_mode(mode))?;
        Ok(())
    }

    fn focus_widget(&self, window: NativeWindow) -> Result<()> {
        self.conn
            .set_input_focus(InputFocus::PARENT, window.0, x11rb::CURRENT_TIME)?;
        Ok(())
    }

    fn toplevel_of(&self, window: NativeWindow) -> Result<NativeWindow> {
        let mut current = window.0;
        loop {
            let tree = self.conn.query_tree(current)?.reply()?;
            if tree.parent == tree.root || tree.parent == x11rb::NONE || !self.is_known(tree.parent) {
                return Ok(NativeWindow(current));
            }
            current = tree.parent;
        }
    }

    fn grab_pointer(&self, window: NativeWindow, cursor: Cursor, owner_events: bool) -> Result<bool> {
        let reply = self
            .conn
            .grab_pointer(
                owner_events,
                window.0,
                EventMask::BUTTON_PRESS
                    | EventMask::BUTTON_RELEASE
                    | EventMask::POINTER_MOTION
                    | EventMask::ENTER_WINDOW
                    | EventMask::LEAVE_WINDOW,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                cursor.0,
                x11rb::CURRENT_TIME,
            )?
            .reply()?;
        let success = reply.status == GrabStatus::SUCCESS;
        if success {
            self.grabbed.set(true);
        } else {
            debug!("Pointer grab on {:#x} refused: {:?}", window.0, reply.status);
        }
        Ok(success)
    }

    fn ungrab_pointer(&self) -> Result<()> {
        self.conn.ungrab_pointer(x11rb::CURRENT_TIME)?;
        self.grabbed.set(false);
        Ok(())
    }

    fn pointer_grabbed(&self) -> bool {
        self.grabbed.get()
    }

    fn window_at_pointer(&self) -> Result<Option<NativeWindow>> {
        let mut current = self.root;
        let mut found = None;
        loop {
            let reply = self.conn.query_pointer(current)?.reply()?;
            if reply.child == x11rb::NONE {
                return Ok(found);
            }
            current = reply.child;
            if self.is_known(current) {
                found = Some(NativeWindow(current));
            }
        }
    }

    fn cursor(&self, window: NativeWindow) -> Cursor {
        self.windows
            .borrow()
            .get(&window.0)
            .map(|record| record.cursor)
            .unwrap_or_default()
    }

    fn set_cursor(&self, window: NativeWindow, cursor: Cursor) -> Result<()> {
        self.with_record(window, |record| record.cursor = cursor)?;
        self.conn.change_window_attributes(
            window.0,
            &ChangeWindowAttributesAux::new().cursor(cursor.0),
        )?;
        Ok(())
    }

    fn request_frame_extents(&self, window: NativeWindow) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            window.0,
            self.atoms.net_request_frame_extents,
            [0, 0, 0, 0, 0],
        );
        self.conn.send_event(
            false,
            self.root,
            EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
            event,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn frame_extents(&self, window: NativeWindow) -> Result<Option<FrameExtents>> {
        let reply = self
            .conn
            .get_property(
                false,
                window.0,
                self.atoms.net_frame_extents,
                AtomEnum::CARDINAL,
                0,
                4,
            )?
            .reply()?;
        let values: Vec<u32> = reply.value32().map(Iterator::collect).unwrap_or_default();
        // left, right, top, bottom
        Ok(match values[..] {
            [left, right, top, bottom] => Some(FrameExtents::new(
                top as i32,
                left as i32,
                bottom as i32,
                right as i32,
            )),
            _ => None,
        })
    }

    fn monitor_at(&self, x: i32, y: i32) -> Result<Option<i64>> {
        let monitors = self.conn.randr_get_monitors(self.root, true)?.reply()?.monitors;
        Ok(monitors
            .iter()
            .position(|m| {
                Geometry::new(
                    i32::from(m.x),
                    i32::from(m.y),
                    i32::from(m.width),
                    i32::from(m.height),
                )
                .contains(x, y)
            })
            .map(|index| index as i64))
    }

    fn is_composited(&self) -> Result<bool> {
        let name = format!("_NET_WM_CM_S{}", self.screen_num);
        let atom = self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom;
        let owner = self.conn.get_selection_owner(atom)?.reply()?.owner;
        Ok(owner != x11rb::NONE)
    }

    fn draw_image(&self, window: NativeWindow, data: &[u8], width: u32, height: u32) -> Result<()> {
        let (gc, depth) = self.with_record(window, |record| (record.gc, record.depth))?;
        let depth = if depth == 0 { self.root_depth } else { depth };
        let stride = width as usize * 4;
        if stride == 0 || data.len() < stride * height as usize {
            anyhow::bail!("Image buffer too small for {}x{}", width, height);
        }
        // Split into bands that fit in one request
        let max_bytes = self.conn.maximum_request_bytes().saturating_sub(64);
        let rows_per_band = (max_bytes / stride).max(1);
        for (band, rows) in data[..stride * height as usize]
            .chunks(stride * rows_per_band)
            .enumerate()
        {
            let band_height = rows.len() / stride;
            self.conn.put_image(
                ImageFormat::Z_PIXMAP,
                window.0,
                gc,
                width as u16,
                band_height as u16,
                0,
                (band * rows_per_band) as i16,
                0,
                depth,
                rows,
            )?;
        }
        Ok(())
    }

    fn create_mask(&self, window: NativeWindow, width: u32, height: u32) -> Result<u32> {
        let pixmap = self.conn.generate_id()?;
        self.conn
            .create_pixmap(1, pixmap, window.0, width.max(1) as u16, height.max(1) as u16)?;
        Ok(pixmap)
    }

    fn free_mask(&self, mask: u32) -> Result<()> {
        self.conn.free_pixmap(mask)?;
        Ok(())
    }

    fn apply_shape_mask(
        &self,
        window: NativeWindow,
        mask: u32,
        data: &[u8],
        width: u32,
        height: u32,
        kind: ShapeKind,
    ) -> Result<()> {
        let mut bits = pack_alpha_mask(data, width, height);
        if self.conn.setup().bitmap_format_bit_order == ImageOrder::MSB_FIRST {
            bits.iter_mut().for_each(|b| *b = b.reverse_bits());
        }

        let gc = self.conn.generate_id()?;
        self.conn.create_gc(gc, mask, &CreateGCAux::new())?;
        self.conn.put_image(
            ImageFormat::Z_PIXMAP,
            mask,
            gc,
            width as u16,
            height as u16,
            0,
            0,
            0,
            1,
            &bits,
        )?;
        self.conn.free_gc(gc)?;

        let kind = match kind {
            ShapeKind::Input => shape::SK::INPUT,
            ShapeKind::Bounding => shape::SK::BOUNDING,
        };
        self.conn
            .shape_mask(shape::SO::SET, kind, window.0, 0, 0, mask)?;
        Ok(())
    }

    fn keyboard_mapping(&self) -> Result<KeyboardMapping> {
        let setup = self.conn.setup();
        let min = setup.min_keycode;
        let count = setup.max_keycode - min + 1;
        let reply = self.conn.get_keyboard_mapping(min, count)?.reply()?;
        Ok(KeyboardMapping {
            min_keycode: min,
            keysyms_per_keycode: usize::from(reply.keysyms_per_keycode),
            keysyms: reply.keysyms,
        })
    }
}
