//! Data model shared by the detector, the renderer and the announcer.
pub mod detection;
pub mod labels;

pub use detection::{BoundingBox, Detection};
