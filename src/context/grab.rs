//! Grab Registry
//!
//! Tracks which context holds the focus grab and which holds the implicit drag
//! grab taken on button press. One registry is owned by the context manager and
//! handed to every grab operation; nothing here is global.
//!
//! The drag grab wins over the focus grab: releasing a drag hands the pointer
//! back to the focus holder, and cursor changes go to the drag holder first.

use anyhow::Result;
use tracing::debug;

use super::ContextId;
use crate::backend::{Cursor, WindowSystem};
use crate::event::NativeWindow;

/// A context holding a grab, together with the native window grabbed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabHolder {
    pub context: ContextId,
    pub native: NativeWindow,
}

#[derive(Debug, Default)]
pub struct GrabRegistry {
    focus: Option<GrabHolder>,
    drag: Option<GrabHolder>,
}

impl GrabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer grab for a drag, using the window's own cursor
    pub fn acquire_drag(&mut self, system: &dyn WindowSystem, holder: GrabHolder) -> Result<bool> {
        let cursor = system.cursor(holder.native);
        if system.grab_pointer(holder.native, cursor, false)? {
            self.drag = Some(holder);
            Ok(true)
        } else {
            debug!("Drag grab refused for {:?}", holder.context);
            Ok(false)
        }
    }

    /// Ends the drag and re-grabs for the focus holder, if any
    pub fn release_drag(&mut self, system: &dyn WindowSystem) -> Result<()> {
        self.drag = None;
        system.ungrab_pointer()?;
        if let Some(focus) = self.focus {
            let cursor = system.cursor(focus.native);
            if !system.grab_pointer(focus.native, cursor, true)? {
                debug!("Focus grab for {:?} not restored after drag", focus.context);
            }
        }
        Ok(())
    }

    /// Focus grab; always succeeds while a drag is in progress
    pub fn acquire_focus(&mut self, system: &dyn WindowSystem, holder: GrabHolder) -> Result<bool> {
        let granted = self.drag.is_some() || {
            let cursor = system.cursor(holder.native);
            system.grab_pointer(holder.native, cursor, true)?
        };
        if granted {
            self.focus = Some(holder);
        } else {
            debug!("Focus grab refused for {:?}", holder.context);
        }
        Ok(granted)
    }

    /// Drops the focus grab; the pointer stays grabbed while a drag is active
    pub fn release_focus(&mut self, system: &dyn WindowSystem) -> Result<Option<GrabHolder>> {
        if self.drag.is_none() {
            system.ungrab_pointer()?;
        }
        Ok(self.focus.take())
    }

    /// Routes a cursor change through the current grab holder
    pub fn set_cursor(&self, system: &dyn WindowSystem, window: NativeWindow, cursor: Cursor) -> Result<()> {
        if let Some(drag) = self.drag {
            system.grab_pointer(drag.native, cursor, false)?;
        } else if let Some(focus) = self.focus {
            system.grab_pointer(focus.native, cursor, true)?;
        }
        system.set_cursor(window, cursor)
    }

    pub fn focus_holder(&self) -> Option<GrabHolder> {
        self.focus
    }

    pub fn drag_holder(&self) -> Option<GrabHolder> {
        self.drag
    }

    /// The holder pointer feedback is routed through, drag first
    pub fn current_holder(&self) -> Option<GrabHolder> {
        self.drag.or(self.focus)
    }

    pub fn holds_focus(&self, context: ContextId) -> bool {
        self.focus.is_some_and(|holder| holder.context == context)
    }

    pub fn holds_drag(&self, context: ContextId) -> bool {
        self.drag.is_some_and(|holder| holder.context == context)
    }
}
