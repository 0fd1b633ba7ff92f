//! Global uniform block and its per-slot buffers
//!
//! Every frame slot owns one persistently mapped uniform buffer and one
//! descriptor set (set 0 of every pipeline) pointing at it. Writing slot `i`
//! never touches memory the GPU may still be reading for another slot.

use std::mem::size_of;
use std::rc::Rc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::render::api::{MappedBuffer, RenderDevice};
use crate::render::descriptors::{DescriptorError, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use crate::render::primitives::Camera;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Maximum number of point lights in the global uniform block
pub const MAX_LIGHTS: usize = 64;

/// One point light as seen by the shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointLightData {
    /// World position, w unused
    pub position: [f32; 4],
    /// Color in rgb, intensity in w
    pub color: [f32; 4],
}

unsafe impl Zeroable for PointLightData {}
unsafe impl Pod for PointLightData {}

/// Uniform block shared by every pipeline (std140)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GlobalUbo {
    /// Camera projection
    pub projection: [[f32; 4]; 4],
    /// Camera view
    pub view: [[f32; 4]; 4],
    /// Inverse of the view matrix, its last column is the camera position
    pub inverse_view: [[f32; 4]; 4],
    /// Ambient light color in rgb, intensity in w
    pub ambient_light_color: [f32; 4],
    /// Active lights, only the first `num_lights` are meaningful
    pub point_lights: [PointLightData; MAX_LIGHTS],
    /// Number of active lights
    pub num_lights: i32,
    _padding: [i32; 3],
}

unsafe impl Zeroable for GlobalUbo {}
unsafe impl Pod for GlobalUbo {}

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection: IDENTITY,
            view: IDENTITY,
            inverse_view: IDENTITY,
            ambient_light_color: [1.0, 1.0, 1.0, 0.02],
            point_lights: [PointLightData::default(); MAX_LIGHTS],
            num_lights: 0,
            _padding: [0; 3],
        }
    }
}

impl GlobalUbo {
    /// Copy the camera matrices
    pub fn set_camera(&mut self, camera: &Camera) {
        self.projection = (*camera.projection()).into();
        self.view = (*camera.view()).into();
        self.inverse_view = (*camera.inverse_view()).into();
    }

    /// Lights currently in use
    pub fn active_lights(&self) -> &[PointLightData] {
        let count = (self.num_lights.max(0) as usize).min(MAX_LIGHTS);
        &self.point_lights[..count]
    }
}

struct UniformSlot<D: RenderDevice> {
    buffer: D::Buffer,
    descriptor_set: vk::DescriptorSet,
}

/// Per-slot global uniform buffers and descriptor sets
pub struct FrameUniforms<D: RenderDevice> {
    device: Rc<D>,
    layout: Rc<DescriptorSetLayout<D>>,
    pool: Rc<DescriptorPool<D>>,
    slots: Vec<UniformSlot<D>>,
    spare_sets: Vec<vk::DescriptorSet>,
}

impl<D: RenderDevice> FrameUniforms<D> {
    /// Layout of the global set: binding 0, uniform buffer, all graphics stages
    pub fn create_layout(device: Rc<D>) -> Result<DescriptorSetLayout<D>, DescriptorError> {
        DescriptorSetLayout::builder(device)
            .add_uniform_buffer(0, vk::ShaderStageFlags::ALL_GRAPHICS)
            .build()
    }

    /// Create buffers and sets for `slot_count` slots
    pub fn new(
        device: Rc<D>,
        layout: Rc<DescriptorSetLayout<D>>,
        pool: Rc<DescriptorPool<D>>,
        slot_count: usize,
    ) -> Result<Self, DescriptorError> {
        let mut uniforms = Self {
            device,
            layout,
            pool,
            slots: Vec::new(),
            spare_sets: Vec::new(),
        };
        uniforms.ensure_slot_count(slot_count)?;
        Ok(uniforms)
    }

    fn create_buffer(&self) -> VulkanResult<D::Buffer> {
        self.device.create_mapped_buffer(
            size_of::<GlobalUbo>() as vk::DeviceSize,
            1,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            self.device.min_uniform_buffer_offset_alignment(),
        )
    }

    /// Resize to `slot_count` slots
    ///
    /// Every slot gets a fresh buffer. Descriptor sets already allocated are
    /// re-pointed at the new buffers, missing ones are allocated and surplus
    /// ones are kept for a later grow. Must only be called while the GPU is
    /// not using any slot, which holds right after a swap chain rebuild.
    pub fn ensure_slot_count(&mut self, slot_count: usize) -> Result<(), DescriptorError> {
        if slot_count == self.slots.len() {
            return Ok(());
        }
        let previous = self.slots.len();

        // Popped from the back: current slots in order, then spares
        let mut reusable = std::mem::take(&mut self.spare_sets);
        reusable.extend(self.slots.drain(..).rev().map(|slot| slot.descriptor_set));

        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let buffer = self.create_buffer()?;
            let writer = DescriptorWriter::new(&self.layout, &self.pool).write_buffer(0, buffer.descriptor_info());
            let descriptor_set = match reusable.pop() {
                Some(set) => {
                    writer.overwrite(set);
                    set
                }
                None => writer.build()?,
            };
            slots.push(UniformSlot { buffer, descriptor_set });
        }

        self.slots = slots;
        self.spare_sets = reusable;
        log::debug!(
            "Frame uniforms resized from {} to {} slot(s), {} spare set(s)",
            previous,
            slot_count,
            self.spare_sets.len()
        );
        Ok(())
    }

    /// Upload the uniform block of one slot
    ///
    /// Fails when `frame_index` has no slot, which happens when the renderer
    /// gained swap chain images and [`ensure_slot_count`](Self::ensure_slot_count)
    /// was not called since.
    pub fn write(&mut self, frame_index: usize, ubo: &GlobalUbo) -> VulkanResult<()> {
        let slot_count = self.slots.len();
        let slot = self.slots.get_mut(frame_index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame slot {} out of range ({} slots)", frame_index, slot_count),
        })?;
        slot.buffer.write_bytes(bytemuck::bytes_of(ubo), 0);
        if !slot.buffer.is_coherent() {
            slot.buffer.flush()?;
        }
        Ok(())
    }

    /// Global descriptor set of one slot
    ///
    /// # Panics
    ///
    /// Panics when `frame_index` is not below [`slot_count`](Self::slot_count).
    pub fn descriptor_set(&self, frame_index: usize) -> vk::DescriptorSet {
        self.slots[frame_index].descriptor_set
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Layout of the global set
    pub fn layout(&self) -> &DescriptorSetLayout<D> {
        &self.layout
    }
}
