//! Plug Window Context
//!
//! A window embedded into a foreign native window. It has no decoration and no
//! geometry model; bounds are literal pixel values. A plug hosts embedded child
//! contexts and keeps them ordered bottom to top.

use anyhow::{Context, Result};
use std::rc::Rc;
use tracing::debug;

use super::{Bounds, ContextBase, ContextId, ContextKind, ContextManager};
use crate::backend::{NativeKind, WindowChanges};
use crate::toolkit::WindowPeer;

/// What an embedded child may ask of the context hosting it
pub trait EmbeddingHost {
    /// Adds the child on top, moving it there if already present
    fn register_embedded(&mut self, child: ContextId);
    fn unregister_embedded(&mut self, child: ContextId);
    fn restack_embedded(&mut self, child: ContextId, to_front: bool);
    fn topmost_embedded(&self) -> Option<ContextId>;
}

#[derive(Debug)]
pub struct Plug {
    /// Foreign window the plug lives in
    pub(crate) embedder: u32,
    /// Bottom to top
    pub(crate) embedded_children: Vec<ContextId>,
}

impl Plug {
    pub fn embedder(&self) -> u32 {
        self.embedder
    }

    pub fn embedded_children(&self) -> &[ContextId] {
        &self.embedded_children
    }
}

impl EmbeddingHost for Plug {
    fn register_embedded(&mut self, child: ContextId) {
        self.embedded_children.retain(|&c| c != child);
        self.embedded_children.push(child);
    }

    fn unregister_embedded(&mut self, child: ContextId) {
        self.embedded_children.retain(|&c| c != child);
    }

    fn restack_embedded(&mut self, child: ContextId, to_front: bool) {
        let Some(index) = self.embedded_children.iter().position(|&c| c == child) else {
            return;
        };
        self.embedded_children.remove(index);
        if to_front {
            self.embedded_children.push(child);
        } else {
            self.embedded_children.insert(0, child);
        }
    }

    fn topmost_embedded(&self) -> Option<ContextId> {
        self.embedded_children.last().copied()
    }
}

impl ContextManager {
    /// Creates a plug inside the foreign window `embedder`
    pub fn create_plug(&mut self, peer: Option<Rc<dyn WindowPeer>>, embedder: u32) -> Result<ContextId> {
        let native = self
            .backend
            .create_window(NativeKind::Plug { embedder })
            .with_context(|| format!("Failed to create plug in {:#x}", embedder))?;
        let plug = Plug {
            embedder,
            embedded_children: Vec::new(),
        };
        Ok(self.register(ContextBase::new(native, peer), ContextKind::Plug(plug)))
    }

    /// Widget-level resize; the topmost embedded child fills the plug
    pub(crate) fn plug_process_configure(&mut self, id: ContextId, width: i32, height: i32) -> Result<()> {
        self.notify_view(id, "resize", |view| view.notify_resize(width, height));
        self.notify_window(id, "resize", |peer| peer.notify_resize(width, height));

        let topmost = self.embedding_host_mut(id)?.topmost_embedded();
        if let Some(child) = topmost {
            debug!("Plug {:?} resize forwarded to {:?}", id, child);
            self.child_process_configure(child, width, height)?;
        }
        Ok(())
    }

    fn plug_window_configure(&mut self, id: ContextId, changes: &WindowChanges) -> Result<()> {
        let native = self.native_window(id)?;
        if changes.has_position() {
            let position = WindowChanges {
                x: changes.x,
                y: changes.y,
                ..WindowChanges::default()
            };
            self.backend.configure(native, &position)?;
        }
        if changes.has_size() {
            let (width, height) = self.backend.size(native)?;
            self.backend.set_size_request(
                native,
                changes.width.unwrap_or(width),
                changes.height.unwrap_or(height),
            )?;
        }
        Ok(())
    }

    pub(crate) fn plug_set_bounds(&mut self, id: ContextId, bounds: Bounds) -> Result<()> {
        let pick = |window: i32, content: i32| {
            if window > 0 {
                Some(window)
            } else if content > 0 {
                Some(content)
            } else {
                None
            }
        };
        let changes = WindowChanges {
            x: bounds.x,
            y: bounds.y,
            width: pick(bounds.width, bounds.content_width),
            height: pick(bounds.height, bounds.content_height),
        };
        self.plug_window_configure(id, &changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NativeEvent;
    use crate::testing::{harness, Call, PeerEvent, ViewEvent};

    fn plug_of(h: &crate::testing::Harness, id: ContextId) -> Vec<ContextId> {
        h.manager
            .context(id)
            .unwrap()
            .as_plug()
            .unwrap()
            .embedded_children()
            .to_vec()
    }

    #[test]
    fn test_embedded_order() {
        let mut plug = Plug {
            embedder: 0x400001,
            embedded_children: Vec::new(),
        };
        let (a, b, c) = (ContextId(1), ContextId(2), ContextId(3));
        plug.register_embedded(a);
        plug.register_embedded(b);
        plug.register_embedded(c);
        assert_eq!(plug.topmost_embedded(), Some(c));

        plug.restack_embedded(c, false);
        assert_eq!(plug.embedded_children(), &[c, a, b]);
        plug.restack_embedded(a, true);
        assert_eq!(plug.embedded_children(), &[c, b, a]);

        plug.unregister_embedded(b);
        plug.register_embedded(c);
        assert_eq!(plug.embedded_children(), &[a, c]);
    }

    #[test]
    fn test_configure_forwards_to_topmost_child() {
        let mut h = harness();
        let plug = h.plug();
        let bottom = h.child(plug);
        let top = h.child(plug);
        h.manager.set_visible(bottom, true).unwrap();
        h.manager.set_visible(top, true).unwrap();
        h.attach_view(top);
        h.view_log.clear();

        h.send(h.native(plug), NativeEvent::WidgetConfigure {
            width: 300,
            height: 200,
        });

        assert_eq!(h.view_log.events(), vec![ViewEvent::Resize(300, 200)]);
        let resizes = h
            .peer_log
            .events()
            .into_iter()
            .filter(|e| *e == PeerEvent::Resize(300, 200))
            .count();
        // once for the plug, once for the child
        assert_eq!(resizes, 2);
        assert!(h.system.calls().contains(&Call::SetSizeRequest(h.native(top), 300, 200)));
        assert!(!h
            .system
            .calls()
            .contains(&Call::SetSizeRequest(h.native(bottom), 300, 200)));
    }

    #[test]
    fn test_bounds_are_literal() {
        let mut h = harness();
        let plug = h.plug();
        let native = h.native(plug);
        h.system.set_size(native, 50, 60);
        h.system.clear_calls();

        h.manager
            .set_bounds(plug, Bounds {
                x: Some(7),
                y: None,
                width: -1,
                height: -1,
                content_width: 120,
                content_height: -1,
            })
            .unwrap();

        assert_eq!(
            h.system.calls(),
            vec![
                Call::Configure(
                    native,
                    WindowChanges {
                        x: Some(7),
                        ..WindowChanges::default()
                    }
                ),
                Call::SetSizeRequest(native, 120, 60),
            ]
        );
    }

    #[test]
    fn test_visibility_drives_membership() {
        let mut h = harness();
        let plug = h.plug();
        let a = h.child(plug);
        let b = h.child(plug);
        h.manager.set_visible(a, true).unwrap();
        h.manager.set_visible(b, true).unwrap();
        assert_eq!(plug_of(&h, plug), vec![a, b]);

        h.manager.set_visible(a, false).unwrap();
        assert_eq!(plug_of(&h, plug), vec![b]);

        h.manager.set_visible(a, true).unwrap();
        h.manager.restack(a, false).unwrap();
        assert_eq!(plug_of(&h, plug), vec![a, b]);
        assert!(h.system.calls().contains(&Call::Restack(h.native(a), false)));
    }
}
