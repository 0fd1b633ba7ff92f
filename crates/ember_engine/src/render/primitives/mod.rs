//! Camera and mesh primitives

pub mod camera;
pub mod model;

pub use camera::Camera;
pub use model::{MeshData, Model, Vertex};
