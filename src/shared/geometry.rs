//! Window geometry shared by the context kinds
//!
//! A top-level window is described twice: by its outer bounds (including the
//! decoration the window manager draws around it) and by its content bounds.
//! `WindowGeometry` keeps the last requested size in whichever box model it was
//! expressed in and converts between the two using the frame extents.

/// Plain rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && py >= self.y && px < self.x + self.width && py < self.y + self.height
    }
}

/// Decoration insets reported through `_NET_FRAME_EXTENTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameExtents {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl FrameExtents {
    pub fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Self { top, left, bottom, right }
    }

    pub fn horizontal(&self) -> i32 {
        self.left + self.right
    }

    pub fn vertical(&self) -> i32 {
        self.top + self.bottom
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.left == 0 && self.bottom == 0 && self.right == 0
    }
}

/// A requested size along one axis, tagged with the box model it was given in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsValue {
    #[default]
    Unset,
    /// Outer size, decoration included
    Window(i32),
    /// Client-area size
    Content(i32),
}

impl BoundsValue {
    /// Raw requested size, zero when unset
    pub fn value(self) -> i32 {
        match self {
            BoundsValue::Unset => 0,
            BoundsValue::Window(value) | BoundsValue::Content(value) => value,
        }
    }

    fn window_size(self, inset: i32) -> i32 {
        match self {
            BoundsValue::Unset => inset,
            BoundsValue::Window(value) => value,
            BoundsValue::Content(value) => value + inset,
        }
    }

    fn content_size(self, inset: i32) -> i32 {
        match self {
            BoundsValue::Unset => 0,
            BoundsValue::Window(value) => value - inset,
            BoundsValue::Content(value) => value,
        }
    }
}

/// Geometry state owned by a top-level context
#[derive(Debug, Clone, Default)]
pub struct WindowGeometry {
    /// Decoration insets, zero until the window manager answers
    pub extents: FrameExtents,

    /// Last requested width
    pub final_width: BoundsValue,

    /// Last requested height
    pub final_height: BoundsValue,

    /// Last known outer size after window-manager reconciliation
    pub current_width: i32,
    pub current_height: i32,

    /// Anchor point in screen coordinates
    pub refx: f64,
    pub refy: f64,

    /// Normalized anchor inside the outer bounds, 0 = top-left
    pub gravity_x: f64,
    pub gravity_y: f64,
}

impl WindowGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_width(&self) -> i32 {
        self.final_width.window_size(self.extents.horizontal())
    }

    pub fn window_height(&self) -> i32 {
        self.final_height.window_size(self.extents.vertical())
    }

    pub fn content_width(&self) -> i32 {
        self.final_width.content_size(self.extents.horizontal())
    }

    pub fn content_height(&self) -> i32 {
        self.final_height.content_size(self.extents.vertical())
    }

    /// Outer left edge derived from the anchor
    pub fn window_x(&self) -> i32 {
        let mut value = self.refx;
        if self.gravity_x != 0.0 {
            value -= f64::from(self.window_width()) * self.gravity_x;
        }
        value as i32
    }

    /// Outer top edge derived from the anchor
    pub fn window_y(&self) -> i32 {
        let mut value = self.refy;
        if self.gravity_y != 0.0 {
            value -= f64::from(self.window_height()) * self.gravity_y;
        }
        value as i32
    }

    pub fn set_window_x(&mut self, x: i32) {
        let mut value = f64::from(x);
        if self.gravity_x != 0.0 {
            value += f64::from(self.window_width()) * self.gravity_x;
        }
        self.refx = value;
    }

    pub fn set_window_y(&mut self, y: i32) {
        let mut value = f64::from(y);
        if self.gravity_y != 0.0 {
            value += f64::from(self.window_height()) * self.gravity_y;
        }
        self.refy = value;
    }

    /// Changes the anchor while keeping the outer top-left where it is
    pub fn set_gravity(&mut self, gravity_x: f64, gravity_y: f64) {
        let x = self.window_x();
        let y = self.window_y();
        self.gravity_x = gravity_x;
        self.gravity_y = gravity_y;
        self.set_window_x(x);
        self.set_window_y(y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry_with_extents() -> WindowGeometry {
        WindowGeometry {
            extents: FrameExtents::new(28, 3, 5, 7),
            ..WindowGeometry::default()
        }
    }

    #[test]
    fn test_content_size_survives_window_round_trip() {
        let mut geometry = geometry_with_extents();
        for content in [1, 120, 640, 1919] {
            geometry.final_width = BoundsValue::Content(content);
            geometry.final_height = BoundsValue::Content(content);
            let outer_w = geometry.window_width();
            let outer_h = geometry.window_height();
            assert_eq!(outer_w, content + 10);
            assert_eq!(outer_h, content + 33);

            geometry.final_width = BoundsValue::Window(outer_w);
            geometry.final_height = BoundsValue::Window(outer_h);
            assert_eq!(geometry.content_width(), content);
            assert_eq!(geometry.content_height(), content);
        }
    }

    #[test]
    fn test_unset_bounds_follow_invariant() {
        let geometry = geometry_with_extents();
        assert_eq!(geometry.content_width(), 0);
        assert_eq!(geometry.window_width(), 10);
        assert_eq!(geometry.window_height(), 33);
    }

    #[test]
    fn test_anchor_is_fixed_under_resize() {
        for gravity in [0.0, 0.5, 1.0] {
            let mut geometry = WindowGeometry {
                gravity_x: gravity,
                gravity_y: gravity,
                ..WindowGeometry::default()
            };
            geometry.final_width = BoundsValue::Window(400);
            geometry.final_height = BoundsValue::Window(300);
            geometry.set_window_x(100);
            geometry.set_window_y(50);
            let x1 = geometry.window_x();
            let y1 = geometry.window_y();

            geometry.final_width = BoundsValue::Window(200);
            geometry.final_height = BoundsValue::Window(100);
            let x2 = geometry.window_x();
            let y2 = geometry.window_y();

            assert_eq!(f64::from(x2 - x1), gravity * f64::from(400 - 200));
            assert_eq!(f64::from(y2 - y1), gravity * f64::from(300 - 100));
            assert_eq!(
                f64::from(x1) + gravity * 400.0,
                f64::from(x2) + gravity * 200.0
            );
        }
    }

    #[test]
    fn test_set_gravity_keeps_top_left() {
        let mut geometry = geometry_with_extents();
        geometry.final_width = BoundsValue::Content(300);
        geometry.final_height = BoundsValue::Content(200);
        geometry.set_window_x(40);
        geometry.set_window_y(60);

        geometry.set_gravity(0.5, 1.0);
        assert_eq!(geometry.window_x(), 40);
        assert_eq!(geometry.window_y(), 60);
        assert_eq!(geometry.refx, 40.0 + 155.0);
        assert_eq!(geometry.refy, 60.0 + 233.0);
    }
}
