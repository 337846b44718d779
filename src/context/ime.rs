//! Input Method Session
//!
//! Per-context composition state. The platform input method is reached through
//! `InputMethod`; its signals are folded into toolkit input-method events here.
//! A commit that arrives while a plain key is being filtered (no preedit
//! running) is not forwarded as text; instead the key itself is let through so
//! the character is not reported twice.

use anyhow::Result;
use tracing::debug;

use crate::event::{ImeSignal, KeyInput, NativeWindow, TextAttribute, Underline};
use crate::toolkit::{ImeAttribute, ImeRun, InputMethodEvent};

/// Result of offering a key to the input method
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImeFilter {
    /// The input method swallowed the key
    pub consumed: bool,
    /// Signals emitted synchronously while filtering
    pub signals: Vec<ImeSignal>,
}

/// A composition context bound to one native window
pub trait InputMethod {
    fn focus_in(&mut self) -> Result<()>;
    fn focus_out(&mut self) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
    /// Candidate window placement, window-relative
    fn set_cursor_location(&mut self, x: i32, y: i32) -> Result<()>;
    fn filter_key(&mut self, key: &KeyInput) -> Result<ImeFilter>;
}

pub trait InputMethodFactory {
    fn create(&self, window: NativeWindow) -> Result<Box<dyn InputMethod>>;
}

/// Input method that never composes; every key goes straight through
#[derive(Debug, Default)]
pub struct DirectInput;

impl InputMethod for DirectInput {
    fn focus_in(&mut self) -> Result<()> {
        Ok(())
    }

    fn focus_out(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_cursor_location(&mut self, _x: i32, _y: i32) -> Result<()> {
        Ok(())
    }

    fn filter_key(&mut self, _key: &KeyInput) -> Result<ImeFilter> {
        Ok(ImeFilter::default())
    }
}

#[derive(Debug, Default)]
pub struct DirectInputFactory;

impl InputMethodFactory for DirectInputFactory {
    fn create(&self, _window: NativeWindow) -> Result<Box<dyn InputMethod>> {
        Ok(Box::new(DirectInput))
    }
}

/// What the context should do with a filtered key
#[derive(Debug, Default, PartialEq)]
pub struct KeyOutcome {
    /// Events to forward to the view, in order
    pub events: Vec<InputMethodEvent>,
    /// Whether the key must still be processed as an ordinary key event
    pub deliver_key: bool,
}

#[derive(Default)]
pub struct ImeSession {
    im: Option<Box<dyn InputMethod>>,
    pub enabled: bool,
    pub on_preedit: bool,
    pub on_key_event: bool,
    pub send_keypress: bool,
}

impl ImeSession {
    pub fn enable(&mut self, im: Box<dyn InputMethod>) {
        self.im = Some(im);
        self.enabled = true;
    }

    /// Releases the input method
    pub fn disable(&mut self) {
        if self.im.take().is_some() {
            debug!("Input method released");
        }
        self.enabled = false;
        self.on_preedit = false;
        self.on_key_event = false;
        self.send_keypress = false;
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.im.is_some()
    }

    pub fn focus(&mut self, focus_in: bool) -> Result<()> {
        match self.im.as_mut() {
            Some(im) if self.enabled => {
                if focus_in {
                    im.focus_in()
                } else {
                    im.focus_out()
                }
            }
            _ => Ok(()),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        self.on_preedit = false;
        match self.im.as_mut() {
            Some(im) => im.reset(),
            None => Ok(()),
        }
    }

    pub fn set_cursor_location(&mut self, x: i32, y: i32) -> Result<()> {
        match self.im.as_mut() {
            Some(im) if self.enabled => im.set_cursor_location(x, y),
            _ => Ok(()),
        }
    }

    /// Folds one input-method signal into the session
    pub fn handle_signal(&mut self, signal: ImeSignal) -> Option<InputMethodEvent> {
        match signal {
            ImeSignal::PreeditStart => {
                self.on_preedit = true;
                None
            }
            ImeSignal::PreeditChanged {
                text,
                attributes,
                cursor,
            } => Some(InputMethodEvent::Update {
                runs: classify_runs(&attributes),
                text,
                caret: cursor,
            }),
            ImeSignal::PreeditEnd => {
                self.on_preedit = false;
                None
            }
            ImeSignal::Commit(text) => {
                if self.on_preedit || !self.on_key_event {
                    Some(InputMethodEvent::Insert { text })
                } else {
                    self.send_keypress = true;
                    None
                }
            }
        }
    }

    /// Offers a key to the input method
    pub fn filter_key(&mut self, key: &KeyInput) -> Result<KeyOutcome> {
        let passthrough = KeyOutcome {
            events: Vec::new(),
            deliver_key: true,
        };
        if !self.enabled {
            return Ok(passthrough);
        }
        let Some(im) = self.im.as_mut() else {
            return Ok(passthrough);
        };

        self.on_key_event = true;
        let filtered = im.filter_key(key);
        let filter = match filtered {
            Ok(filter) => filter,
            Err(e) => {
                self.on_key_event = false;
                return Err(e);
            }
        };
        let events = filter
            .signals
            .into_iter()
            .filter_map(|signal| self.handle_signal(signal))
            .collect();
        self.on_key_event = false;

        let deliver_key = !filter.consumed || self.send_keypress;
        self.send_keypress = false;
        Ok(KeyOutcome {
            events,
            deliver_key,
        })
    }
}

/// Highlight wins over underline; anything else is raw input
fn classify(attribute: &TextAttribute) -> ImeAttribute {
    if attribute.background {
        ImeAttribute::TargetNotConverted
    } else if attribute.underline == Underline::Single {
        ImeAttribute::Converted
    } else {
        ImeAttribute::Input
    }
}

fn classify_runs(attributes: &[TextAttribute]) -> Vec<ImeRun> {
    attributes
        .iter()
        .map(|attribute| ImeRun {
            start: attribute.start,
            end: attribute.end,
            attribute: classify(attribute),
        })
        .collect()
}
