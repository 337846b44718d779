//! Native Events
//!
//! Window-system events after translation from the wire protocol, addressed to
//! one native window. The modifier field mirrors the X11 key/button mask and
//! describes the state just *before* the event.

use bitflags::bitflags;

use crate::shared::Geometry;

/// Native window handle (an X11 window id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeWindow(pub u32);

bitflags! {
    /// Native key/button state (matches the X11 KeyButMask layout)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NativeState: u32 {
        const SHIFT    = 1 << 0;
        const LOCK     = 1 << 1;
        const CONTROL  = 1 << 2;
        const MOD1     = 1 << 3;
        const MOD2     = 1 << 4;
        const MOD3     = 1 << 5;
        const MOD4     = 1 << 6;
        const MOD5     = 1 << 7;
        const BUTTON1  = 1 << 8;
        const BUTTON2  = 1 << 9;
        const BUTTON3  = 1 << 10;
        const BUTTON4  = 1 << 11;
        const BUTTON5  = 1 << 12;
    }
}

impl NativeState {
    /// All pointer button bits
    pub const BUTTONS: NativeState = NativeState::BUTTON1
        .union(NativeState::BUTTON2)
        .union(NativeState::BUTTON3)
        .union(NativeState::BUTTON4)
        .union(NativeState::BUTTON5);

    /// Mask bit for a native button number, empty for buttons without one
    pub fn for_button(button: u8) -> NativeState {
        match button {
            1 => NativeState::BUTTON1,
            2 => NativeState::BUTTON2,
            3 => NativeState::BUTTON3,
            _ => NativeState::empty(),
        }
    }

    pub fn from_x11(mask: u16) -> NativeState {
        NativeState::from_bits_truncate(u32::from(mask))
    }
}

/// Pointer position carried by every pointer event
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
    pub x_root: f64,
    pub y_root: f64,
}

impl PointerPosition {
    pub fn new(x: f64, y: f64, x_root: f64, y_root: f64) -> Self {
        Self { x, y, x_root, y_root }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
    /// Smooth scrolling carries no discrete unit and is not reported
    Smooth,
}

bitflags! {
    /// Window-manager controlled state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowStateFlags: u32 {
        const ICONIFIED  = 1 << 0;
        const MAXIMIZED  = 1 << 1;
        const FULLSCREEN = 1 << 2;
        const ABOVE      = 1 << 3;
    }
}

/// Which atom a property notification concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    FrameExtents,
    Other(u32),
}

/// Input-method signals, delivered either while a key is being filtered or on
/// their own
#[derive(Debug, Clone, PartialEq)]
pub enum ImeSignal {
    PreeditStart,
    PreeditChanged {
        text: String,
        attributes: Vec<TextAttribute>,
        cursor: i32,
    },
    PreeditEnd,
    Commit(String),
}

/// Presentation hint attached to a run of preedit text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextAttribute {
    pub start: usize,
    pub end: usize,
    pub background: bool,
    pub underline: Underline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Underline {
    #[default]
    None,
    Single,
    Double,
}

/// A key as delivered by the window system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub press: bool,
    /// Hardware keycode
    pub keycode: u8,
    /// Keysym with the full modifier state applied
    pub keyval: u32,
    pub state: NativeState,
    pub group: u8,
    pub time: u32,
}

/// A native event targeted at one window
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    Focus {
        focus_in: bool,
    },
    Expose {
        area: Geometry,
    },
    Button {
        press: bool,
        button: u8,
        position: PointerPosition,
        state: NativeState,
    },
    Motion {
        position: PointerPosition,
        state: NativeState,
    },
    Scroll {
        direction: ScrollDirection,
        position: PointerPosition,
        state: NativeState,
    },
    Crossing {
        enter: bool,
        position: PointerPosition,
        state: NativeState,
    },
    Key(KeyInput),
    /// Window-system level configure (position in parent coordinates)
    Configure {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    /// Widget level configure, reported for embedded plugs
    WidgetConfigure {
        width: i32,
        height: i32,
    },
    Property {
        kind: PropertyKind,
    },
    Map,
    State {
        changed: WindowStateFlags,
        new_state: WindowStateFlags,
    },
    /// The user asked the window manager to close the window
    Delete,
    /// The native window went away underneath us
    Destroy,
    InputMethod(ImeSignal),
}

/// Events that are not addressed to a single window
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalEvent {
    KeyboardLayoutChanged,
}
