//! Window System Module
//!
//! The primitives window contexts need from the native window system. The
//! contexts only ever talk to this trait; `x11` provides the real
//! implementation on top of x11rb and `source` feeds its events to an async
//! loop.

pub mod source;
pub mod x11;

use anyhow::Result;

use crate::event::{GlobalEvent, NativeEvent, NativeWindow};
use crate::shared::FrameExtents;

/// What kind of native window to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    /// A top-level window managed by the window manager
    TopLevel {
        decorated: bool,
        /// Override-redirect popup
        popup: bool,
        utility: bool,
        /// Needs an ARGB visual
        transparent: bool,
    },
    /// Window embedded into a foreign window (XEmbed plug)
    Plug { embedder: u32 },
    /// Sub-window of another native window
    Child { parent: NativeWindow },
}

/// Partial configure request; `None` leaves the field unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowChanges {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl WindowChanges {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.width.is_none() && self.height.is_none()
    }

    pub fn has_position(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    pub fn has_size(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }
}

/// Min/max size hints in content coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHints {
    pub min_width: i32,
    pub min_height: i32,
    pub max_width: i32,
    pub max_height: i32,
}

impl SizeHints {
    /// Pins both limits to one size
    pub fn fixed(width: i32, height: i32) -> Self {
        Self {
            min_width: width,
            min_height: height,
            max_width: width,
            max_height: height,
        }
    }
}

/// Which shape of a window a mask applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    /// Only input follows the mask
    Input,
    /// Both rendering and input follow the mask
    Bounding,
}

/// Native cursor handle, `Cursor::NONE` is the parent's cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cursor(pub u32);

impl Cursor {
    pub const NONE: Cursor = Cursor(0);
}

/// Window icon as premultiplied ARGB pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub width: u32,
    pub height: u32,
    pub argb: Vec<u32>,
}

/// Snapshot of the server keyboard mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardMapping {
    pub min_keycode: u8,
    pub keysyms_per_keycode: usize,
    pub keysyms: Vec<u32>,
}

/// A translated native event
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Window(NativeWindow, NativeEvent),
    Global(GlobalEvent),
}

/// Native window-system primitives
///
/// All methods take `&self`; implementations keep their own interior state.
pub trait WindowSystem {
    fn create_window(&self, kind: NativeKind) -> Result<NativeWindow>;
    fn destroy_window(&self, window: NativeWindow) -> Result<()>;
    fn show(&self, window: NativeWindow) -> Result<()>;
    fn hide(&self, window: NativeWindow) -> Result<()>;
    /// Whether the window was shown, regardless of the map state
    fn is_visible(&self, window: NativeWindow) -> bool;

    /// Content size
    fn size(&self, window: NativeWindow) -> Result<(i32, i32)>;
    /// Outer top-left as placed by the window manager
    fn decorated_position(&self, window: NativeWindow) -> Result<(i32, i32)>;
    /// Content top-left in root coordinates
    fn origin(&self, window: NativeWindow) -> Result<(i32, i32)>;

    /// Move/resize through the toolkit-level path, used before the window is mapped
    fn move_resize(&self, window: NativeWindow, changes: &WindowChanges) -> Result<()>;
    /// Raw configure request
    fn configure(&self, window: NativeWindow, changes: &WindowChanges) -> Result<()>;
    fn set_size_hints(&self, window: NativeWindow, hints: &SizeHints) -> Result<()>;
    fn set_size_request(&self, window: NativeWindow, width: i32, height: i32) -> Result<()>;

    fn set_transient_for(&self, window: NativeWindow, parent: Option<NativeWindow>) -> Result<()>;
    fn set_modal(&self, window: NativeWindow, modal: bool) -> Result<()>;
    fn set_title(&self, window: NativeWindow, title: &str) -> Result<()>;
    fn set_opacity(&self, window: NativeWindow, alpha: f64) -> Result<()>;
    fn set_icon(&self, window: NativeWindow, icon: Option<&Icon>) -> Result<()>;
    fn set_background(&self, window: NativeWindow, rgb: [f32; 3]) -> Result<()>;
    fn set_keep_above(&self, window: NativeWindow, above: bool) -> Result<()>;
    fn set_iconified(&self, window: NativeWindow, iconified: bool) -> Result<()>;
    fn set_maximized(&self, window: NativeWindow, maximized: bool) -> Result<()>;
    fn set_fullscreen(&self, window: NativeWindow, fullscreen: bool) -> Result<()>;
    fn set_accept_focus(&self, window: NativeWindow, accept: bool) -> Result<()>;
    /// Raises and activates the window
    fn present(&self, window: NativeWindow) -> Result<()>;
    fn restack(&self, window: NativeWindow, to_front: bool) -> Result<()>;
    /// Gives keyboard focus to an embedded widget
    fn focus_widget(&self, window: NativeWindow) -> Result<()>;
    /// Nearest top-level ancestor
    fn toplevel_of(&self, window: NativeWindow) -> Result<NativeWindow>;

    /// Active pointer grab; `false` when the server refused it
    fn grab_pointer(&self, window: NativeWindow, cursor: Cursor, owner_events: bool) -> Result<bool>;
    fn ungrab_pointer(&self) -> Result<()>;
    /// Whether this client currently holds a pointer grab
    fn pointer_grabbed(&self) -> bool;
    /// One of our windows under the pointer, if any
    fn window_at_pointer(&self) -> Result<Option<NativeWindow>>;
    fn cursor(&self, window: NativeWindow) -> Cursor;
    fn set_cursor(&self, window: NativeWindow, cursor: Cursor) -> Result<()>;

    /// Asks the window manager to publish `_NET_FRAME_EXTENTS`
    fn request_frame_extents(&self, window: NativeWindow) -> Result<()>;
    /// Reads `_NET_FRAME_EXTENTS`, `None` when the property is absent
    fn frame_extents(&self, window: NativeWindow) -> Result<Option<FrameExtents>>;
    fn monitor_at(&self, x: i32, y: i32) -> Result<Option<i64>>;
    fn is_composited(&self) -> Result<bool>;

    /// Uploads a premultiplied ARGB buffer to the window
    fn draw_image(&self, window: NativeWindow, data: &[u8], width: u32, height: u32) -> Result<()>;
    /// 1-bit pixmap used as a shape mask
    fn create_mask(&self, window: NativeWindow, width: u32, height: u32) -> Result<u32>;
    fn free_mask(&self, mask: u32) -> Result<()>;
    /// Fills the mask from the alpha channel of `data` and applies it
    fn apply_shape_mask(
        &self,
        window: NativeWindow,
        mask: u32,
        data: &[u8],
        width: u32,
        height: u32,
        kind: ShapeKind,
    ) -> Result<()>;

    fn keyboard_mapping(&self) -> Result<KeyboardMapping>;
}

/// Packs the alpha channel of an ARGB buffer into an XY bitmap
///
/// Rows are padded to 32 bits, bits are LSB first, a pixel is opaque when its
/// alpha is non-zero.
pub fn pack_alpha_mask(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let width = width as usize;
    let height = height as usize;
    let stride = width.div_ceil(32) * 4;
    let mut bits = vec![0u8; stride * height];
    let pixels: &[[u8; 4]] = bytemuck::cast_slice(&data[..data.len() - data.len() % 4]);
    for (row, line) in pixels.chunks(width).take(height).enumerate() {
        for (col, pixel) in line.iter().enumerate() {
            // little-endian ARGB32 stores alpha last
            if pixel[3] != 0 {
                bits[row * stride + col / 8] |= 1 << (col % 8);
            }
        }
    }
    bits
}
