//! Device abstraction used by the frame orchestrator
//!
//! The renderer core never talks to `ash` directly. Everything it needs from the
//! GPU goes through [`RenderDevice`], which the Vulkan backend implements for
//! real and the unit tests implement with a recording double. Handles are plain
//! `vk` handle types so both sides speak the same vocabulary.

use ash::vk;

use super::swapchain::PresentChain;
use crate::render::pipeline::PipelineConfig;
use crate::render::vulkan::VulkanResult;

/// Host-visible buffer that can be written through a persistent mapping
pub trait MappedBuffer {
    /// Copy bytes into the mapping at `offset`
    ///
    /// The buffer must be mapped and the write must fit inside it.
    fn write_bytes(&mut self, bytes: &[u8], offset: vk::DeviceSize);

    /// Make host writes visible to the device
    ///
    /// Only required when the memory is not host-coherent.
    fn flush(&self) -> VulkanResult<()>;

    /// Whether writes are visible to the device without an explicit flush
    fn is_coherent(&self) -> bool;

    /// Descriptor info covering the whole buffer
    fn descriptor_info(&self) -> vk::DescriptorBufferInfo;
}

/// Resource bound to a single descriptor binding
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    /// Buffer region (uniform or storage)
    Buffer(vk::DescriptorBufferInfo),
    /// Image view + sampler
    Image(vk::DescriptorImageInfo),
}

/// One binding update within a descriptor set
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    /// Binding index in the set layout
    pub binding: u32,
    /// Descriptor type declared by the layout
    pub descriptor_type: vk::DescriptorType,
    /// Resource to bind
    pub resource: DescriptorResource,
}

/// Everything a graphics pipeline needs apart from the render pass
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// Path of the compiled vertex shader
    pub vertex_shader: std::path::PathBuf,
    /// Path of the compiled fragment shader
    pub fragment_shader: std::path::PathBuf,
    /// Fixed-function state
    pub config: PipelineConfig,
    /// Layout the pipeline is created against
    pub layout: vk::PipelineLayout,
}

/// GPU device operations consumed by the renderer core
///
/// Implementations are shared behind `Rc` and used from the single
/// orchestration thread only.
pub trait RenderDevice {
    /// Swap chain type produced by this device
    type Swapchain: PresentChain;
    /// Host-visible buffer type
    type Buffer: MappedBuffer;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Build a swap chain for `extent`, optionally reusing a predecessor
    fn create_swapchain(
        &self,
        extent: vk::Extent2D,
        previous: Option<&Self::Swapchain>,
    ) -> VulkanResult<Self::Swapchain>;

    // Command buffers

    /// Allocate primary command buffers from the shared pool
    fn allocate_command_buffers(&self, count: usize) -> VulkanResult<Vec<vk::CommandBuffer>>;

    /// Return command buffers to the shared pool
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);

    /// Start recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    // Recording

    /// Begin a render pass on `framebuffer`
    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );

    /// Set dynamic viewport and scissor to cover `extent`
    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);

    /// End the current render pass
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);

    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    );

    /// Upload push constants
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        bytes: &[u8],
    );

    /// Non-indexed draw
    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32);

    // Pipelines

    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    /// Create a graphics pipeline bound to `render_pass`
    fn create_graphics_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<vk::Pipeline>;

    /// Destroy a graphics pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Buffers

    /// Create a host-visible, persistently mapped buffer of `instance_count` aligned instances
    fn create_mapped_buffer(
        &self,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        min_offset_alignment: vk::DeviceSize,
    ) -> VulkanResult<Self::Buffer>;

    /// Alignment required between uniform buffer bindings in one buffer
    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize;

    // Descriptors

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Create a descriptor pool
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocate one descriptor set
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet>;

    /// Return descriptor sets to a pool created with `FREE_DESCRIPTOR_SET`
    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> VulkanResult<()>;

    /// Return every set of the pool at once
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()>;

    /// Point bindings of `set` at new resources
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);
}
