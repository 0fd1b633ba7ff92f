//! Point light billboards
//!
//! Lights are gathered from the scene into the global uniform block every
//! frame, then drawn as camera-facing discs. The discs are alpha blended, so
//! they are drawn farthest first.

use std::mem::size_of;
use std::rc::Rc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::core::ShaderConfig;
use crate::foundation::math::Vec3;
use crate::render::api::{FrameInfo, PipelineDescriptor, RenderDevice, RenderSystem};
use crate::render::frame_uniforms::{GlobalUbo, PointLightData, MAX_LIGHTS};
use crate::render::game_object::{GameObjectId, Scene};
use crate::render::pipeline::{PipelineConfig, PipelineId, PipelineLayout, PipelineManager};
use crate::render::RenderResult;

/// Vertices of one billboard (two triangles generated in the shader)
const BILLBOARD_VERTICES: u32 = 6;

/// Per-light push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointLightPushConstants {
    /// World position, w unused
    pub position: [f32; 4],
    /// Color in rgb, intensity in w
    pub color: [f32; 4],
    /// Billboard radius
    pub radius: f32,
    _padding: [f32; 3],
}

unsafe impl Zeroable for PointLightPushConstants {}
unsafe impl Pod for PointLightPushConstants {}

impl PointLightPushConstants {
    /// Push constants of one light
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position: [position.x, position.y, position.z, 1.0],
            color: [color.x, color.y, color.z, intensity],
            radius,
            _padding: [0.0; 3],
        }
    }
}

/// Stable sort by descending distance, so equal distances keep their order
pub fn sort_back_to_front<T>(items: &mut [(f32, T)]) {
    items.sort_by(|a, b| b.0.total_cmp(&a.0));
}

/// Lights of `scene` with their squared distance to `camera_position`, farthest first
pub fn back_to_front(scene: &Scene, camera_position: Vec3) -> Vec<(f32, GameObjectId)> {
    let mut lights: Vec<(f32, GameObjectId)> = scene
        .point_lights()
        .map(|(object, _)| {
            let offset = camera_position - object.transform.translation;
            (offset.dot(&offset), object.id())
        })
        .collect();
    sort_back_to_front(&mut lights);
    lights
}

/// Uploads and draws point lights
pub struct PointLightSystem<D: RenderDevice> {
    device: Rc<D>,
    pipeline: PipelineId,
    layout: PipelineLayout<D>,
    truncation_warned: bool,
}

impl<D: RenderDevice> PointLightSystem<D> {
    /// Vertex shader file
    pub const VERTEX_SHADER: &'static str = "point_light.vert.spv";
    /// Fragment shader file
    pub const FRAGMENT_SHADER: &'static str = "point_light.frag.spv";

    /// Create the pipeline; `global_set_layout` is set 0
    pub fn new(
        device: Rc<D>,
        pipelines: &mut PipelineManager<D>,
        global_set_layout: vk::DescriptorSetLayout,
        shaders: &ShaderConfig,
    ) -> RenderResult<Self> {
        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: size_of::<PointLightPushConstants>() as u32,
        };
        let layout = PipelineLayout::new(device.clone(), &[global_set_layout], &[push_constant_range])?;

        let pipeline = pipelines.register(PipelineDescriptor {
            vertex_shader: shaders.path(Self::VERTEX_SHADER),
            fragment_shader: shaders.path(Self::FRAGMENT_SHADER),
            config: PipelineConfig::default().without_vertex_input().enable_alpha_blending(),
            layout: layout.handle(),
        })?;

        Ok(Self {
            device,
            pipeline,
            layout,
            truncation_warned: false,
        })
    }

    /// Copy the scene's lights into the uniform block, in id order
    ///
    /// Only the first [`MAX_LIGHTS`] lights are used.
    pub fn update(&mut self, scene: &Scene, ubo: &mut GlobalUbo) {
        let mut count = 0;
        for (object, light) in scene.point_lights() {
            if count == MAX_LIGHTS {
                if !self.truncation_warned {
                    log::warn!("Scene has more than {} point lights, the rest are ignored", MAX_LIGHTS);
                    self.truncation_warned = true;
                }
                break;
            }
            let position = object.transform.translation;
            ubo.point_lights[count] = PointLightData {
                position: [position.x, position.y, position.z, 1.0],
                color: [object.color.x, object.color.y, object.color.z, light.light_intensity],
            };
            count += 1;
        }
        ubo.num_lights = count as i32;
    }
}

impl<D: RenderDevice> RenderSystem<D> for PointLightSystem<D> {
    fn render(&mut self, frame: &FrameInfo<'_, D>) -> RenderResult<()> {
        let pipeline = frame.pipelines.require(self.pipeline)?;

        let order = back_to_front(frame.scene, frame.camera.position());
        if order.is_empty() {
            return Ok(());
        }

        let command_buffer = frame.command_buffer;
        self.device.cmd_bind_pipeline(command_buffer, pipeline);
        self.device
            .cmd_bind_descriptor_sets(command_buffer, self.layout.handle(), 0, &[frame.global_descriptor_set]);

        for (_, id) in order {
            let Some(object) = frame.scene.get(id) else { continue };
            let Some(light) = object.point_light else { continue };

            let push = PointLightPushConstants::new(
                object.transform.translation,
                object.color,
                light.light_intensity,
                object.light_radius(),
            );
            self.device.cmd_push_constants(
                command_buffer,
                self.layout.handle(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                bytemuck::bytes_of(&push),
            );
            self.device.cmd_draw(command_buffer, BILLBOARD_VERTICES, 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::primitives::Camera;
    use crate::render::testing::{Call, MockDevice};
    use crate::render::vulkan::VulkanError;
    use crate::render::RenderError;
    use approx::assert_relative_eq;
    use ash::vk::Handle;

    #[test]
    fn test_push_constant_layout() {
        assert_eq!(size_of::<PointLightPushConstants>(), 48);
    }

    #[test]
    fn test_sort_back_to_front() {
        let mut lights = vec![(9.0, 'a'), (1.0, 'b'), (4.0, 'c')];
        sort_back_to_front(&mut lights);
        let distances: Vec<f32> = lights.iter().map(|(d, _)| *d).collect();
        assert_eq!(distances, vec![9.0, 4.0, 1.0]);
    }

    #[test]
    fn test_sort_keeps_ties() {
        let mut lights = vec![(4.0, 0), (4.0, 1), (9.0, 2)];
        sort_back_to_front(&mut lights);
        assert_eq!(lights, vec![(9.0, 2), (4.0, 0), (4.0, 1)]);
    }

    #[test]
    fn test_update_fills_ubo_in_id_order() {
        let device = Rc::new(MockDevice::new());
        let mut pipelines = PipelineManager::new(device.clone(), vk::RenderPass::from_raw(1));
        let mut system = PointLightSystem::new(
            device,
            &mut pipelines,
            vk::DescriptorSetLayout::null(),
            &ShaderConfig::new("shaders"),
        )
        .unwrap();

        let mut scene = Scene::new();
        scene.make_point_light(0.2, 0.1, Vec3::new(1.0, 0.0, 0.0)).transform.translation = Vec3::new(1.0, 2.0, 3.0);
        scene.create_object();
        scene.make_point_light(0.7, 0.1, Vec3::new(0.0, 0.0, 1.0));

        let mut ubo = GlobalUbo::default();
        system.update(&scene, &mut ubo);

        assert_eq!(ubo.num_lights, 2);
        assert_eq!(ubo.point_lights[0].position, [1.0, 2.0, 3.0, 1.0]);
        assert_relative_eq!(ubo.point_lights[0].color[3], 0.2);
        assert_relative_eq!(ubo.point_lights[1].color[2], 1.0);
        assert_relative_eq!(ubo.point_lights[1].color[3], 0.7);
    }

    #[test]
    fn test_update_truncates_at_max_lights() {
        let device = Rc::new(MockDevice::new());
        let mut pipelines = PipelineManager::new(device.clone(), vk::RenderPass::from_raw(1));
        let mut system =
            PointLightSystem::new(device, &mut pipelines, vk::DescriptorSetLayout::null(), &ShaderConfig::new("s")).unwrap();

        let mut scene = Scene::new();
        for _ in 0..MAX_LIGHTS + 5 {
            scene.make_point_light(1.0, 0.1, Vec3::new(1.0, 1.0, 1.0));
        }
        let mut ubo = GlobalUbo::default();
        system.update(&scene, &mut ubo);

        assert_eq!(ubo.num_lights as usize, MAX_LIGHTS);
        assert!(system.truncation_warned);
    }

    #[test]
    fn test_render_draws_farthest_first() {
        let device = Rc::new(MockDevice::new());
        let mut pipelines = PipelineManager::new(device.clone(), vk::RenderPass::from_raw(1));
        let mut system = PointLightSystem::new(
            device.clone(),
            &mut pipelines,
            vk::DescriptorSetLayout::null(),
            &ShaderConfig::new("shaders"),
        )
        .unwrap();

        let mut scene = Scene::new();
        for z in [3.0, 1.0, 2.0] {
            scene.make_point_light(1.0, 0.1, Vec3::new(1.0, 1.0, 1.0)).transform.translation = Vec3::new(0.0, 0.0, z);
        }
        let camera = Camera::new();
        device.clear_calls();

        let frame = FrameInfo {
            frame_index: 0,
            frame_time: 0.016,
            command_buffer: vk::CommandBuffer::from_raw(7),
            camera: &camera,
            global_descriptor_set: vk::DescriptorSet::from_raw(9),
            scene: &scene,
            pipelines: &pipelines,
        };
        system.render(&frame).unwrap();

        let pushed_z: Vec<f32> = device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::PushConstants(bytes) => {
                    let push: PointLightPushConstants = bytemuck::pod_read_unaligned(&bytes);
                    Some(push.position[2])
                }
                _ => None,
            })
            .collect();
        assert_eq!(pushed_z, vec![3.0, 2.0, 1.0]);
        assert_eq!(device.count(|c| *c == Call::Draw { vertex_count: 6, instance_count: 1 }), 3);
        assert!(device.calls().contains(&Call::BindDescriptorSets {
            first_set: 0,
            sets: vec![vk::DescriptorSet::from_raw(9)]
        }));
    }

    #[test]
    fn test_render_without_pipeline_is_an_error() {
        let device = Rc::new(MockDevice::new());
        let mut pipelines = PipelineManager::new(device.clone(), vk::RenderPass::from_raw(1));
        let mut system =
            PointLightSystem::new(device.clone(), &mut pipelines, vk::DescriptorSetLayout::null(), &ShaderConfig::new("s"))
                .unwrap();
        pipelines.remove(system.pipeline);

        let mut scene = Scene::new();
        scene.make_point_light(1.0, 0.1, Vec3::new(1.0, 1.0, 1.0));
        let camera = Camera::new();
        device.clear_calls();
        let frame = FrameInfo {
            frame_index: 0,
            frame_time: 0.016,
            command_buffer: vk::CommandBuffer::from_raw(7),
            camera: &camera,
            global_descriptor_set: vk::DescriptorSet::from_raw(9),
            scene: &scene,
            pipelines: &pipelines,
        };

        assert!(matches!(
            system.render(&frame),
            Err(RenderError::Vulkan(VulkanError::InvalidOperation { .. }))
        ));
        assert_eq!(device.count(|c| matches!(c, Call::Draw { .. })), 0);
    }
}
