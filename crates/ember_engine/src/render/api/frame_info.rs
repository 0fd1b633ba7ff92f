//! Per-frame context handed to render systems

use ash::vk;

use super::device::RenderDevice;
use crate::render::game_object::Scene;
use crate::render::pipeline::PipelineManager;
use crate::render::primitives::Camera;
use crate::render::RenderResult;

/// Everything a render system may read while recording one frame
pub struct FrameInfo<'a, D: RenderDevice> {
    /// Slot index of the frame being recorded
    pub frame_index: usize,
    /// Seconds since the previous frame
    pub frame_time: f32,
    /// Command buffer of the current slot, inside the main render pass
    pub command_buffer: vk::CommandBuffer,
    /// Active camera
    pub camera: &'a Camera,
    /// Global descriptor set (set 0) of the current slot
    pub global_descriptor_set: vk::DescriptorSet,
    /// All game objects
    pub scene: &'a Scene,
    /// Pipelines registered with the renderer
    pub pipelines: &'a PipelineManager<D>,
}

/// Records draws for one kind of content
///
/// Implementations bind and draw into `frame.command_buffer` only. They never
/// begin or end frames or render passes.
pub trait RenderSystem<D: RenderDevice> {
    /// Record this system's draws for the frame
    fn render(&mut self, frame: &FrameInfo<'_, D>) -> RenderResult<()>;
}
