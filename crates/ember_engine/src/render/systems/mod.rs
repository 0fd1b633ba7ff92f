//! Render systems
//!
//! Each system records its draws into the command buffer handed over in
//! [`FrameInfo`](crate::render::FrameInfo) and never touches the frame
//! lifecycle itself.

pub mod mesh;
pub mod point_light;

pub use mesh::{MeshPushConstants, MeshSystem};
pub use point_light::{back_to_front, sort_back_to_front, PointLightPushConstants, PointLightSystem};
