//! Mesh render system
//!
//! Draws every object with a model. Set 0 is the global frame set, set 1 the
//! object's component set; model and normal matrices go through push constants.

use std::mem::size_of;
use std::rc::Rc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::core::ShaderConfig;
use crate::foundation::math::{mat3_to_mat4, Transform};
use crate::render::api::{FrameInfo, PipelineDescriptor, RenderDevice, RenderSystem};
use crate::render::descriptors::DescriptorPool;
use crate::render::game_object::{SampledImage, Scene};
use crate::render::object_resources::ObjectResources;
use crate::render::pipeline::{PipelineConfig, PipelineId, PipelineLayout, PipelineManager};
use crate::render::vulkan::VulkanDevice;
use crate::render::RenderResult;

/// Per-object push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPushConstants {
    /// Object to world
    pub model_matrix: [[f32; 4]; 4],
    /// Normal transform, upper 3x3 used
    pub normal_matrix: [[f32; 4]; 4],
}

unsafe impl Zeroable for MeshPushConstants {}
unsafe impl Pod for MeshPushConstants {}

impl MeshPushConstants {
    /// Push constants of an object placed by `transform`
    pub fn from_transform(transform: &Transform) -> Self {
        Self {
            model_matrix: transform.matrix().into(),
            normal_matrix: mat3_to_mat4(&transform.normal_matrix()).into(),
        }
    }
}

/// Draws models with per-object textures
pub struct MeshSystem {
    device: Rc<VulkanDevice>,
    pipeline: PipelineId,
    layout: PipelineLayout<VulkanDevice>,
    objects: ObjectResources<VulkanDevice>,
}

impl MeshSystem {
    /// Vertex shader file
    pub const VERTEX_SHADER: &'static str = "simple_shader.vert.spv";
    /// Fragment shader file
    pub const FRAGMENT_SHADER: &'static str = "simple_shader.frag.spv";

    /// Create the pipeline and the object set layout
    ///
    /// Object sets are allocated from `pool`; objects without a material
    /// sample `fallback`.
    pub fn new(
        device: Rc<VulkanDevice>,
        pipelines: &mut PipelineManager<VulkanDevice>,
        global_set_layout: vk::DescriptorSetLayout,
        pool: Rc<DescriptorPool<VulkanDevice>>,
        fallback: Rc<dyn SampledImage>,
        shaders: &ShaderConfig,
    ) -> RenderResult<Self> {
        let objects = ObjectResources::new(device.clone(), pool, fallback)?;

        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: size_of::<MeshPushConstants>() as u32,
        };
        let layout = PipelineLayout::new(
            device.clone(),
            &[global_set_layout, objects.layout().handle()],
            &[push_constant_range],
        )?;

        let pipeline = pipelines.register(PipelineDescriptor {
            vertex_shader: shaders.path(Self::VERTEX_SHADER),
            fragment_shader: shaders.path(Self::FRAGMENT_SHADER),
            config: PipelineConfig::default(),
            layout: layout.handle(),
        })?;

        Ok(Self {
            device,
            pipeline,
            layout,
            objects,
        })
    }

    /// Update object sets before recording a frame
    pub fn prepare(&mut self, scene: &Scene, frames_in_flight: usize) -> RenderResult<()> {
        self.objects
            .sync(scene.iter().filter(|object| object.model.is_some()), frames_in_flight)?;
        Ok(())
    }
}

impl RenderSystem<VulkanDevice> for MeshSystem {
    fn render(&mut self, frame: &FrameInfo<'_, VulkanDevice>) -> RenderResult<()> {
        let pipeline = frame.pipelines.require(self.pipeline)?;

        let command_buffer = frame.command_buffer;
        self.device.cmd_bind_pipeline(command_buffer, pipeline);
        self.device
            .cmd_bind_descriptor_sets(command_buffer, self.layout.handle(), 0, &[frame.global_descriptor_set]);

        for object in frame.scene.iter() {
            let Some(model) = &object.model else { continue };
            let Some(object_set) = self.objects.descriptor_set(object.id()) else {
                log::warn!("Object {} has no descriptor set, skipped", object.id());
                continue;
            };

            self.device
                .cmd_bind_descriptor_sets(command_buffer, self.layout.handle(), 1, &[object_set]);

            let push = MeshPushConstants::from_transform(&object.transform);
            self.device.cmd_push_constants(
                command_buffer,
                self.layout.handle(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                bytemuck::bytes_of(&push),
            );

            model.bind(self.device.raw(), command_buffer);
            model.draw(self.device.raw(), command_buffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn test_push_constant_layout() {
        assert_eq!(size_of::<MeshPushConstants>(), 128);
    }

    #[test]
    fn test_push_constants_are_column_major() {
        let mut transform = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0));
        transform.scale = Vec3::new(2.0, 2.0, 2.0);
        let push = MeshPushConstants::from_transform(&transform);

        assert_eq!(push.model_matrix[3], [1.0, 2.0, 3.0, 1.0]);
        assert_relative_eq!(push.model_matrix[0][0], 2.0);
        assert_relative_eq!(push.normal_matrix[0][0], 0.5);
        assert_relative_eq!(push.normal_matrix[3][3], 1.0);
        assert_relative_eq!(push.normal_matrix[3][0], 0.0);
    }
}
