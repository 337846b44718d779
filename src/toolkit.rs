//! Toolkit Peers
//!
//! The notification surface of the toolkit objects a window context represents.
//! A context holds a window peer (the toolkit "window") and optionally a view
//! (the toolkit "view" the scene is drawn into). Every callback may fail; the
//! caller logs the failure and carries on with the native event flow.

use anyhow::Result;
use bitflags::bitflags;
use std::cell::Cell;
use std::rc::Rc;
use tracing::warn;

use crate::context::ContextId;
use crate::event::NativeState;
use crate::keymap::KeyCode;
use crate::shared::Geometry;

bitflags! {
    /// Toolkit modifier mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u32 {
        const SHIFT            = 1 << 0;
        const FUNCTION         = 1 << 1;
        const CONTROL          = 1 << 2;
        const ALT              = 1 << 3;
        const WINDOWS          = 1 << 4;
        const BUTTON_PRIMARY   = 1 << 5;
        const BUTTON_SECONDARY = 1 << 6;
        const BUTTON_MIDDLE    = 1 << 7;
        const BUTTON_BACK      = 1 << 8;
        const BUTTON_FORWARD   = 1 << 9;
    }
}

impl Modifiers {
    pub const BUTTONS: Modifiers = Modifiers::BUTTON_PRIMARY
        .union(Modifiers::BUTTON_SECONDARY)
        .union(Modifiers::BUTTON_MIDDLE)
        .union(Modifiers::BUTTON_BACK)
        .union(Modifiers::BUTTON_FORWARD);

    /// Converts a native key/button state
    pub fn from_native(state: NativeState) -> Modifiers {
        let mut modifiers = Modifiers::empty();
        let table = [
            (NativeState::SHIFT, Modifiers::SHIFT),
            (NativeState::CONTROL, Modifiers::CONTROL),
            (NativeState::MOD1, Modifiers::ALT),
            (NativeState::MOD4, Modifiers::WINDOWS),
            (NativeState::BUTTON1, Modifiers::BUTTON_PRIMARY),
            (NativeState::BUTTON2, Modifiers::BUTTON_MIDDLE),
            (NativeState::BUTTON3, Modifiers::BUTTON_SECONDARY),
            (NativeState::BUTTON4, Modifiers::BUTTON_BACK),
            (NativeState::BUTTON5, Modifiers::BUTTON_FORWARD),
        ];
        for (native, toolkit) in table {
            if state.contains(native) {
                modifiers |= toolkit;
            }
        }
        modifiers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    None,
    Left,
    Right,
    Other,
}

impl MouseButton {
    /// Maps a native button number; only the three main buttons are reported
    pub fn from_native(button: u8) -> MouseButton {
        match button {
            1 => MouseButton::Left,
            2 => MouseButton::Other,
            3 => MouseButton::Right,
            _ => MouseButton::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Down,
    Up,
    Drag,
    Move,
    Enter,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseEvent {
    pub action: MouseAction,
    pub button: MouseButton,
    pub x: i32,
    pub y: i32,
    pub x_root: i32,
    pub y_root: i32,
    pub modifiers: Modifiers,
    pub popup_trigger: bool,
    pub synthesized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollEvent {
    pub x: i32,
    pub y: i32,
    pub x_root: i32,
    pub y_root: i32,
    pub dx: f64,
    pub dy: f64,
    pub modifiers: Modifiers,
    pub multiplier_x: f64,
    pub multiplier_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
    Typed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub action: KeyAction,
    pub code: KeyCode,
    pub character: Option<char>,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gained,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStateChange {
    Minimize,
    Maximize,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowLevel {
    Normal,
    Floating,
    Topmost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Move,
}

/// Classification of a run of composition text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImeAttribute {
    /// Plain input, not yet converted
    Input,
    /// Clause that is the conversion target
    TargetNotConverted,
    /// Converted clause
    Converted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImeRun {
    pub start: usize,
    pub end: usize,
    pub attribute: ImeAttribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMethodEvent {
    /// Composition text changed
    Update {
        text: String,
        runs: Vec<ImeRun>,
        caret: i32,
    },
    /// Text to insert as if typed
    Insert { text: String },
}

/// Callbacks on the toolkit window object
pub trait WindowPeer {
    fn is_enabled(&self) -> Result<bool>;
    fn notify_focus(&self, change: FocusChange) -> Result<()>;
    fn notify_focus_disabled(&self) -> Result<()>;
    fn notify_focus_ungrab(&self) -> Result<()>;
    fn notify_resize(&self, width: i32, height: i32) -> Result<()>;
    fn notify_move(&self, x: i32, y: i32) -> Result<()>;
    fn notify_move_to_screen(&self, from: i64, to: i64) -> Result<()>;
    fn notify_state(&self, change: WindowStateChange) -> Result<()>;
    fn notify_level(&self, level: WindowLevel) -> Result<()>;
    fn notify_close(&self) -> Result<()>;
    fn notify_destroy(&self) -> Result<()>;
    /// Tells the toolkit which context currently backs it, `None` for itself
    fn notify_delegate(&self, delegate: Option<ContextId>) -> Result<()>;
}

/// Callbacks on the toolkit view object
pub trait ViewPeer {
    fn notify_resize(&self, width: i32, height: i32) -> Result<()>;
    fn notify_repaint(&self, area: Geometry) -> Result<()>;
    fn notify_mouse(&self, event: MouseEvent) -> Result<()>;
    fn notify_menu(&self, x: i32, y: i32, x_root: i32, y_root: i32, keyboard: bool) -> Result<()>;
    fn notify_scroll(&self, event: ScrollEvent) -> Result<()>;
    fn notify_key(&self, event: KeyEvent) -> Result<()>;
    fn notify_view(&self, change: ViewChange) -> Result<()>;
    fn notify_input_method(&self, event: InputMethodEvent) -> Result<()>;
    /// Screen position for the candidate window at `offset` in the composition
    fn candidate_position(&self, offset: i32) -> Result<[f64; 2]>;
}

/// A view attached to a window context
///
/// Besides the peer it carries the two back-references that keep the view
/// consistent while an embedded child hands its content to a full-screen
/// surrogate and back.
pub struct View {
    peer: Box<dyn ViewPeer>,
    current_window: Cell<Option<ContextId>>,
    embedded_window: Cell<Option<ContextId>>,
}

impl View {
    pub fn new(peer: Box<dyn ViewPeer>) -> Rc<Self> {
        Rc::new(Self {
            peer,
            current_window: Cell::new(None),
            embedded_window: Cell::new(None),
        })
    }

    pub fn peer(&self) -> &dyn ViewPeer {
        self.peer.as_ref()
    }

    /// The context currently presenting this view
    pub fn current_window(&self) -> Option<ContextId> {
        self.current_window.get()
    }

    /// The embedded context this view belongs to while shown full screen
    pub fn embedded_window(&self) -> Option<ContextId> {
        self.embedded_window.get()
    }

    pub(crate) fn set_current_window(&self, id: Option<ContextId>) {
        self.current_window.set(id);
    }

    pub(crate) fn set_embedded_window(&self, id: Option<ContextId>) {
        self.embedded_window.set(id);
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("current_window", &self.current_window.get())
            .field("embedded_window", &self.embedded_window.get())
            .finish()
    }
}

/// Logs and clears a failed toolkit callback
pub(crate) fn checked(what: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Toolkit callback {} failed: {:#}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_translation() {
        let state = NativeState::SHIFT | NativeState::MOD1 | NativeState::BUTTON2 | NativeState::LOCK;
        assert_eq!(
            Modifiers::from_native(state),
            Modifiers::SHIFT | Modifiers::ALT | Modifiers::BUTTON_MIDDLE
        );
        assert_eq!(
            Modifiers::from_native(NativeState::BUTTON3 | NativeState::MOD4),
            Modifiers::BUTTON_SECONDARY | Modifiers::WINDOWS
        );
    }

    #[test]
    fn test_only_main_buttons_are_reported() {
        assert_eq!(MouseButton::from_native(1), MouseButton::Left);
        assert_eq!(MouseButton::from_native(2), MouseButton::Other);
        assert_eq!(MouseButton::from_native(3), MouseButton::Right);
        assert_eq!(MouseButton::from_native(8), MouseButton::None);
    }
}
