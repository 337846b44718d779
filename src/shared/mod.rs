//! Types shared between the context kinds and the window-system backend

pub mod geometry;

pub use geometry::{BoundsValue, FrameExtents, Geometry, WindowGeometry};
