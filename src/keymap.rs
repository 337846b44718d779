//! Keymap Module
//!
//! Translation between X keysyms, hardware keycodes and toolkit key codes.
//! The keysym table is static; the keycode matrix is a snapshot of the server's
//! keyboard mapping and is replaced whenever the layout changes.

use std::collections::HashMap;
use tracing::debug;

use crate::event::NativeState;
use crate::toolkit::Modifiers;

/// Toolkit virtual key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub i32);

impl KeyCode {
    pub const UNDEFINED: KeyCode = KeyCode(0);
    pub const BACKSPACE: KeyCode = KeyCode(0x08);
    pub const TAB: KeyCode = KeyCode(0x09);
    pub const ENTER: KeyCode = KeyCode(0x0A);
    pub const CLEAR: KeyCode = KeyCode(0x0C);
    pub const SHIFT: KeyCode = KeyCode(0x10);
    pub const CONTROL: KeyCode = KeyCode(0x11);
    pub const ALT: KeyCode = KeyCode(0x12);
    pub const PAUSE: KeyCode = KeyCode(0x13);
    pub const CAPS_LOCK: KeyCode = KeyCode(0x14);
    pub const ESCAPE: KeyCode = KeyCode(0x1B);
    pub const SPACE: KeyCode = KeyCode(0x20);
    pub const PAGE_UP: KeyCode = KeyCode(0x21);
    pub const PAGE_DOWN: KeyCode = KeyCode(0x22);
    pub const END: KeyCode = KeyCode(0x23);
    pub const HOME: KeyCode = KeyCode(0x24);
    pub const LEFT: KeyCode = KeyCode(0x25);
    pub const UP: KeyCode = KeyCode(0x26);
    pub const RIGHT: KeyCode = KeyCode(0x27);
    pub const DOWN: KeyCode = KeyCode(0x28);
    pub const COMMA: KeyCode = KeyCode(0x2C);
    pub const MINUS: KeyCode = KeyCode(0x2D);
    pub const PERIOD: KeyCode = KeyCode(0x2E);
    pub const SLASH: KeyCode = KeyCode(0x2F);
    pub const DIGIT0: KeyCode = KeyCode(0x30);
    pub const SEMICOLON: KeyCode = KeyCode(0x3B);
    pub const EQUALS: KeyCode = KeyCode(0x3D);
    pub const A: KeyCode = KeyCode(0x41);
    pub const OPEN_BRACKET: KeyCode = KeyCode(0x5B);
    pub const BACK_SLASH: KeyCode = KeyCode(0x5C);
    pub const CLOSE_BRACKET: KeyCode = KeyCode(0x5D);
    pub const NUMPAD0: KeyCode = KeyCode(0x60);
    pub const MULTIPLY: KeyCode = KeyCode(0x6A);
    pub const ADD: KeyCode = KeyCode(0x6B);
    pub const SUBTRACT: KeyCode = KeyCode(0x6D);
    pub const DECIMAL: KeyCode = KeyCode(0x6E);
    pub const DIVIDE: KeyCode = KeyCode(0x6F);
    pub const F1: KeyCode = KeyCode(0x70);
    pub const DELETE: KeyCode = KeyCode(0x7F);
    pub const NUM_LOCK: KeyCode = KeyCode(0x90);
    pub const SCROLL_LOCK: KeyCode = KeyCode(0x91);
    pub const PRINTSCREEN: KeyCode = KeyCode(0x9A);
    pub const INSERT: KeyCode = KeyCode(0x9B);
    pub const BACK_QUOTE: KeyCode = KeyCode(0xC0);
    pub const QUOTE: KeyCode = KeyCode(0xDE);
    pub const WINDOWS: KeyCode = KeyCode(0x020C);
    pub const CONTEXT_MENU: KeyCode = KeyCode(0x020D);

    /// Modifier bit a key contributes while it is held down
    pub fn modifier(self) -> Modifiers {
        match self {
            KeyCode::SHIFT => Modifiers::SHIFT,
            KeyCode::CONTROL => Modifiers::CONTROL,
            KeyCode::ALT => Modifiers::ALT,
            KeyCode::WINDOWS => Modifiers::WINDOWS,
            _ => Modifiers::empty(),
        }
    }
}

/// X keysyms used by the table
pub mod keysym {
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const LINEFEED: u32 = 0xff0a;
    pub const CLEAR: u32 = 0xff0b;
    pub const RETURN: u32 = 0xff0d;
    pub const PAUSE: u32 = 0xff13;
    pub const SCROLL_LOCK: u32 = 0xff14;
    pub const ESCAPE: u32 = 0xff1b;
    pub const HOME: u32 = 0xff50;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const END: u32 = 0xff57;
    pub const PRINT: u32 = 0xff61;
    pub const INSERT: u32 = 0xff63;
    pub const MENU: u32 = 0xff67;
    pub const NUM_LOCK: u32 = 0xff7f;
    pub const KP_ENTER: u32 = 0xff8d;
    pub const KP_MULTIPLY: u32 = 0xffaa;
    pub const KP_ADD: u32 = 0xffab;
    pub const KP_SUBTRACT: u32 = 0xffad;
    pub const KP_DECIMAL: u32 = 0xffae;
    pub const KP_DIVIDE: u32 = 0xffaf;
    pub const KP_0: u32 = 0xffb0;
    pub const KP_9: u32 = 0xffb9;
    pub const F1: u32 = 0xffbe;
    pub const F12: u32 = 0xffc9;
    pub const SHIFT_L: u32 = 0xffe1;
    pub const SHIFT_R: u32 = 0xffe2;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const CONTROL_R: u32 = 0xffe4;
    pub const CAPS_LOCK: u32 = 0xffe5;
    pub const META_L: u32 = 0xffe7;
    pub const META_R: u32 = 0xffe8;
    pub const ALT_L: u32 = 0xffe9;
    pub const ALT_R: u32 = 0xffea;
    pub const SUPER_L: u32 = 0xffeb;
    pub const SUPER_R: u32 = 0xffec;
    pub const ISO_ENTER: u32 = 0xfe34;
    pub const DELETE: u32 = 0xffff;
    pub const SPACE: u32 = 0x0020;
    pub const UNICODE_BASE: u32 = 0x0100_0000;
}

/// Maps a keysym to a toolkit key code
pub fn keysym_to_key(sym: u32) -> KeyCode {
    use keysym::*;
    match sym {
        0x61..=0x7a => KeyCode(KeyCode::A.0 + (sym - 0x61) as i32),
        0x41..=0x5a => KeyCode(KeyCode::A.0 + (sym - 0x41) as i32),
        0x30..=0x39 => KeyCode(KeyCode::DIGIT0.0 + (sym - 0x30) as i32),
        KP_0..=KP_9 => KeyCode(KeyCode::NUMPAD0.0 + (sym - KP_0) as i32),
        F1..=F12 => KeyCode(KeyCode::F1.0 + (sym - F1) as i32),
        SPACE => KeyCode::SPACE,
        0x2c => KeyCode::COMMA,
        0x2d => KeyCode::MINUS,
        0x2e => KeyCode::PERIOD,
        0x2f => KeyCode::SLASH,
        0x3b => KeyCode::SEMICOLON,
        0x3d => KeyCode::EQUALS,
        0x5b => KeyCode::OPEN_BRACKET,
        0x5c => KeyCode::BACK_SLASH,
        0x5d => KeyCode::CLOSE_BRACKET,
        0x60 => KeyCode::BACK_QUOTE,
        0x27 => KeyCode::QUOTE,
        BACKSPACE => KeyCode::BACKSPACE,
        TAB => KeyCode::TAB,
        RETURN | KP_ENTER | ISO_ENTER => KeyCode::ENTER,
        CLEAR => KeyCode::CLEAR,
        PAUSE => KeyCode::PAUSE,
        SCROLL_LOCK => KeyCode::SCROLL_LOCK,
        ESCAPE => KeyCode::ESCAPE,
        HOME => KeyCode::HOME,
        LEFT => KeyCode::LEFT,
        UP => KeyCode::UP,
        RIGHT => KeyCode::RIGHT,
        DOWN => KeyCode::DOWN,
        PAGE_UP => KeyCode::PAGE_UP,
        PAGE_DOWN => KeyCode::PAGE_DOWN,
        END => KeyCode::END,
        PRINT => KeyCode::PRINTSCREEN,
        INSERT => KeyCode::INSERT,
        MENU => KeyCode::CONTEXT_MENU,
        NUM_LOCK => KeyCode::NUM_LOCK,
        KP_MULTIPLY => KeyCode::MULTIPLY,
        KP_ADD => KeyCode::ADD,
        KP_SUBTRACT => KeyCode::SUBTRACT,
        KP_DECIMAL => KeyCode::DECIMAL,
        KP_DIVIDE => KeyCode::DIVIDE,
        SHIFT_L | SHIFT_R => KeyCode::SHIFT,
        CONTROL_L | CONTROL_R => KeyCode::CONTROL,
        ALT_L | ALT_R | META_L | META_R => KeyCode::ALT,
        SUPER_L | SUPER_R => KeyCode::WINDOWS,
        CAPS_LOCK => KeyCode::CAPS_LOCK,
        DELETE => KeyCode::DELETE,
        _ => KeyCode::UNDEFINED,
    }
}

/// Maps a toolkit key code back to the keysym that produces it
pub fn key_to_keysym(key: KeyCode) -> Option<u32> {
    use keysym::*;
    let code = key.0;
    let sym = match key {
        _ if (KeyCode::A.0..KeyCode::A.0 + 26).contains(&code) => 0x61 + (code - KeyCode::A.0) as u32,
        _ if (KeyCode::DIGIT0.0..KeyCode::DIGIT0.0 + 10).contains(&code) => {
            0x30 + (code - KeyCode::DIGIT0.0) as u32
        }
        _ if (KeyCode::NUMPAD0.0..KeyCode::NUMPAD0.0 + 10).contains(&code) => {
            KP_0 + (code - KeyCode::NUMPAD0.0) as u32
        }
        _ if (KeyCode::F1.0..KeyCode::F1.0 + 12).contains(&code) => F1 + (code - KeyCode::F1.0) as u32,
        KeyCode::ENTER => RETURN,
        KeyCode::SHIFT => SHIFT_L,
        KeyCode::CONTROL => CONTROL_L,
        KeyCode::ALT => ALT_L,
        KeyCode::WINDOWS => SUPER_L,
        KeyCode::UNDEFINED => return None,
        other => {
            // Everything else in the table is a one-to-one mapping
            return STATIC_REVERSE
                .iter()
                .find(|(_, k)| *k == other)
                .map(|(sym, _)| *sym);
        }
    };
    Some(sym)
}

const STATIC_REVERSE: &[(u32, KeyCode)] = &[
    (keysym::SPACE, KeyCode::SPACE),
    (0x2c, KeyCode::COMMA),
    (0x2d, KeyCode::MINUS),
    (0x2e, KeyCode::PERIOD),
    (0x2f, KeyCode::SLASH),
    (0x3b, KeyCode::SEMICOLON),
    (0x3d, KeyCode::EQUALS),
    (0x5b, KeyCode::OPEN_BRACKET),
    (0x5c, KeyCode::BACK_SLASH),
    (0x5d, KeyCode::CLOSE_BRACKET),
    (0x60, KeyCode::BACK_QUOTE),
    (0x27, KeyCode::QUOTE),
    (keysym::BACKSPACE, KeyCode::BACKSPACE),
    (keysym::TAB, KeyCode::TAB),
    (keysym::CLEAR, KeyCode::CLEAR),
    (keysym::PAUSE, KeyCode::PAUSE),
    (keysym::SCROLL_LOCK, KeyCode::SCROLL_LOCK),
    (keysym::ESCAPE, KeyCode::ESCAPE),
    (keysym::HOME, KeyCode::HOME),
    (keysym::LEFT, KeyCode::LEFT),
    (keysym::UP, KeyCode::UP),
    (keysym::RIGHT, KeyCode::RIGHT),
    (keysym::DOWN, KeyCode::DOWN),
    (keysym::PAGE_UP, KeyCode::PAGE_UP),
    (keysym::PAGE_DOWN, KeyCode::PAGE_DOWN),
    (keysym::END, KeyCode::END),
    (keysym::PRINT, KeyCode::PRINTSCREEN),
    (keysym::INSERT, KeyCode::INSERT),
    (keysym::MENU, KeyCode::CONTEXT_MENU),
    (keysym::NUM_LOCK, KeyCode::NUM_LOCK),
    (keysym::KP_MULTIPLY, KeyCode::MULTIPLY),
    (keysym::KP_ADD, KeyCode::ADD),
    (keysym::KP_SUBTRACT, KeyCode::SUBTRACT),
    (keysym::KP_DECIMAL, KeyCode::DECIMAL),
    (keysym::KP_DIVIDE, KeyCode::DIVIDE),
    (keysym::CAPS_LOCK, KeyCode::CAPS_LOCK),
    (keysym::DELETE, KeyCode::DELETE),
];

/// Unicode character produced by a keysym, if any
pub fn keysym_to_unicode(sym: u32) -> Option<char> {
    match sym {
        0x20..=0x7e | 0xa0..=0xff => char::from_u32(sym),
        _ if sym & 0xff00_0000 == keysym::UNICODE_BASE => char::from_u32(sym & 0x00ff_ffff),
        keysym::KP_0..=keysym::KP_9 => char::from_u32('0' as u32 + (sym - keysym::KP_0)),
        keysym::KP_MULTIPLY => Some('*'),
        keysym::KP_ADD => Some('+'),
        keysym::KP_SUBTRACT => Some('-'),
        keysym::KP_DECIMAL => Some('.'),
        keysym::KP_DIVIDE => Some('/'),
        _ => None,
    }
}

/// Character reported for keys the Unicode table leaves empty
pub fn fixup_typed_key(character: Option<char>, sym: u32) -> Option<char> {
    if character.is_some() {
        return character;
    }
    match sym {
        keysym::BACKSPACE => Some('\u{8}'),
        keysym::TAB => Some('\t'),
        keysym::RETURN | keysym::KP_ENTER | keysym::ISO_ENTER => Some('\n'),
        keysym::LINEFEED => Some('\r'),
        keysym::ESCAPE => Some('\u{1b}'),
        keysym::DELETE => Some('\u{7f}'),
        _ => None,
    }
}

/// Keyboard mapping snapshot plus the observed character cache
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    min_keycode: u8,
    keysyms_per_keycode: usize,
    /// Row-major `keysyms_per_keycode` entries per keycode
    keysyms: Vec<u32>,
    /// Characters seen from the current layout
    char_to_key: HashMap<char, KeyCode>,
}

impl KeyTable {
    pub fn new(min_keycode: u8, keysyms_per_keycode: usize, keysyms: Vec<u32>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode,
            keysyms,
            char_to_key: HashMap::new(),
        }
    }

    /// Replaces the mapping after a layout change and forgets observed characters
    pub fn reload(&mut self, min_keycode: u8, keysyms_per_keycode: usize, keysyms: Vec<u32>) {
        debug!(
            "Keyboard mapping reloaded: {} keysyms, {} per keycode",
            keysyms.len(),
            keysyms_per_keycode
        );
        self.min_keycode = min_keycode;
        self.keysyms_per_keycode = keysyms_per_keycode;
        self.keysyms = keysyms;
        self.char_to_key.clear();
    }

    fn row(&self, keycode: u8) -> Option<&[u32]> {
        if self.keysyms_per_keycode == 0 || keycode < self.min_keycode {
            return None;
        }
        let start = usize::from(keycode - self.min_keycode) * self.keysyms_per_keycode;
        self.keysyms.get(start..start + self.keysyms_per_keycode)
    }

    /// Resolves a hardware keycode with only NumLock and the group applied
    ///
    /// Shift and the other modifiers are ignored on purpose so that `Shift+a`
    /// still reports the `A` key.
    pub fn keysym_for(&self, keycode: u8, state: NativeState, group: u8) -> u32 {
        let Some(row) = self.row(keycode) else {
            return 0;
        };
        let base = usize::from(group.min(1)) * 2;
        let pick = |index: usize| row.get(index).copied().filter(|&s| s != 0);
        let lower = pick(base).or_else(|| pick(0)).unwrap_or(0);
        if state.contains(NativeState::MOD2) && is_keypad(pick(base + 1).unwrap_or(0)) {
            return pick(base + 1).unwrap_or(lower);
        }
        lower
    }

    /// Keysym with the full modifier state applied, as delivered to the view
    pub fn keyval_for(&self, keycode: u8, state: NativeState, group: u8) -> u32 {
        let Some(row) = self.row(keycode) else {
            return 0;
        };
        let base = usize::from(group.min(1)) * 2;
        let pick = |index: usize| row.get(index).copied().filter(|&s| s != 0);
        let lower = pick(base).or_else(|| pick(0)).unwrap_or(0);
        let upper = pick(base + 1);
        if state.contains(NativeState::MOD2) && upper.is_some_and(is_keypad) {
            return upper.unwrap_or(lower);
        }
        let shifted = state.contains(NativeState::SHIFT)
            ^ (state.contains(NativeState::LOCK) && is_lowercase_letter(lower));
        match upper {
            Some(sym) if shifted => sym,
            _ => lower,
        }
    }

    /// Hardware keycode that produces `sym` in the current layout
    pub fn keycode_for(&self, sym: u32) -> Option<u8> {
        if self.keysyms_per_keycode == 0 {
            return None;
        }
        self.keysyms
            .iter()
            .position(|&s| s == sym)
            .map(|index| self.min_keycode + (index / self.keysyms_per_keycode) as u8)
    }

    /// Toolkit key for a hardware keycode
    pub fn key_for(&self, keycode: u8, state: NativeState, group: u8) -> KeyCode {
        keysym_to_key(self.keysym_for(keycode, state, group))
    }

    /// Records which key produced a typed character
    pub fn observe(&mut self, character: char, key: KeyCode) {
        if key != KeyCode::UNDEFINED {
            self.char_to_key.entry(character).or_insert(key);
        }
    }

    /// Key that types `character` on the current layout, if one was observed
    pub fn key_for_char(&self, character: char) -> Option<KeyCode> {
        self.char_to_key.get(&character).copied().or_else(|| {
            let sym = character as u32;
            let sym = if sym < 0x100 { sym } else { keysym::UNICODE_BASE | sym };
            self.keycode_for(sym).map(|_| keysym_to_key(sym))
        })
    }
}

fn is_keypad(sym: u32) -> bool {
    (0xff80..=0xffbd).contains(&sym)
}

fn is_lowercase_letter(sym: u32) -> bool {
    keysym_to_unicode(sym).is_some_and(char::is_lowercase)
}
