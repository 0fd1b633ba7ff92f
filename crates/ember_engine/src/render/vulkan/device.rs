//! Vulkan device
//!
//! [`VulkanDevice`] owns the instance, surface, physical and logical device
//! and the shared command pool, and implements [`RenderDevice`] on top of
//! them. Everything that is recreated with the window size lives in
//! [`Swapchain`] instead.

use std::time::Duration;

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};

use crate::core::{PresentModePreference, RendererConfig};
use crate::render::api::{DescriptorResource, DescriptorWrite, PipelineDescriptor, RenderDevice};
use crate::render::vulkan::{
    Buffer, CommandPool, LogicalDevice, PhysicalDeviceInfo, ShaderModule, Swapchain, SwapchainSupport,
    VulkanError, VulkanInstance, VulkanResult, Window,
};

/// Main Vulkan device that owns all long-lived Vulkan objects
pub struct VulkanDevice {
    command_pool: CommandPool,
    logical: LogicalDevice,
    physical: PhysicalDeviceInfo,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    instance: VulkanInstance,
    present_mode: PresentModePreference,
    requested_image_count: u32,
    fence_warning_timeout: Duration,
}

impl VulkanDevice {
    /// Create the device for `window`
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Instance extensions: {}", e)))?;

        let instance = VulkanInstance::new(&config.application_name, &extensions, config.validation_enabled())?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {}", e)))?;

        let physical = match PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader) {
            Ok(physical) => physical,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let logical = LogicalDevice::new(&instance.instance, &physical)?;
        let command_pool = CommandPool::new(logical.device.clone(), physical.graphics_family)?;

        Ok(Self {
            command_pool,
            logical,
            physical,
            surface,
            surface_loader,
            instance,
            present_mode: config.present_mode,
            requested_image_count: config.frames_in_flight,
            fence_warning_timeout: config.fence_warning_timeout(),
        })
    }

    /// Get the raw Device handle
    pub fn raw(&self) -> &Device {
        &self.logical.device
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the physical device info
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Get the surface handle
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.logical.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.logical.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.logical.present_queue
    }

    /// Preferred presentation mode
    pub fn present_mode_preference(&self) -> PresentModePreference {
        self.present_mode
    }

    /// Number of swap chain images asked for
    pub fn requested_image_count(&self) -> u32 {
        self.requested_image_count
    }

    /// Interval between stalled-fence warnings
    pub fn fence_warning_timeout(&self) -> Duration {
        self.fence_warning_timeout
    }

    /// Current surface capabilities
    pub fn query_swapchain_support(&self) -> VulkanResult<SwapchainSupport> {
        SwapchainSupport::query(self.physical.device, self.surface, &self.surface_loader)
    }

    /// Best available depth format
    pub fn find_depth_format(&self) -> VulkanResult<vk::Format> {
        self.physical.find_supported_format(
            self.instance(),
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Create an unmapped buffer
    pub fn create_buffer(
        &self,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Buffer> {
        Buffer::new(self.raw().clone(), &self.physical, instance_size, instance_count, usage, properties, 1)
    }

    /// Record and run one-shot commands on the graphics queue
    pub fn single_time_commands<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        self.command_pool.submit_single_time(self.graphics_queue(), record)
    }

    /// Copy `bytes` into a new device-local buffer through a staging buffer
    pub fn create_device_local_buffer(
        &self,
        bytes: &[u8],
        instance_size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Buffer> {
        if instance_size == 0 || bytes.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create an empty device-local buffer".to_string(),
            });
        }
        let instance_count = (bytes.len() as vk::DeviceSize / instance_size) as u32;

        let mut staging = self.create_buffer(
            instance_size,
            instance_count,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.map()?;
        staging.write_to_buffer(bytes, 0);
        staging.unmap();

        let buffer = self.create_buffer(
            instance_size,
            instance_count,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size(),
        };
        self.single_time_commands(|device, command_buffer| unsafe {
            device.cmd_copy_buffer(command_buffer, staging.handle(), buffer.handle(), &[region]);
        })?;

        Ok(buffer)
    }
}

fn blend_attachment(alpha_blending: bool) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
    if alpha_blending {
        builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    } else {
        builder.blend_enable(false).build()
    }
}

impl RenderDevice for VulkanDevice {
    type Swapchain = Swapchain;
    type Buffer = Buffer;

    fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.raw().device_wait_idle().map_err(VulkanError::Api) }
    }

    fn create_swapchain(&self, extent: vk::Extent2D, previous: Option<&Swapchain>) -> VulkanResult<Swapchain> {
        Swapchain::new(self, extent, previous)
    }

    fn allocate_command_buffers(&self, count: usize) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let count = u32::try_from(count).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("Cannot allocate {} command buffers", count),
        })?;
        self.command_pool.allocate_command_buffers(count)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        self.command_pool.free_command_buffers(command_buffers);
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.raw()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.raw().end_command_buffer(command_buffer).map_err(VulkanError::Api) }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);

        unsafe {
            self.raw()
                .cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.raw().cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.raw().cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.raw().cmd_end_render_pass(command_buffer) }
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.raw()
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.raw().cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        bytes: &[u8],
    ) {
        unsafe { self.raw().cmd_push_constants(command_buffer, layout, stages, 0, bytes) }
    }

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        unsafe { self.raw().cmd_draw(command_buffer, vertex_count, instance_count, 0, 0) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe {
            self.raw()
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.raw().destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<vk::Pipeline> {
        let config = &descriptor.config;
        let vertex_shader = ShaderModule::from_file(self.raw().clone(), &descriptor.vertex_shader)?;
        let fragment_shader = ShaderModule::from_file(self.raw().clone(), &descriptor.fragment_shader)?;

        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&config.binding_descriptions)
            .vertex_attribute_descriptions(&config.attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic so pipelines survive resizes
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .line_width(1.0)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(config.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [blend_attachment(config.alpha_blending)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(descriptor.layout)
            .render_pass(render_pass)
            .subpass(config.subpass);

        let pipelines = unsafe {
            self.raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };

        pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Pipeline creation returned no pipeline".to_string(),
        })
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.raw().destroy_pipeline(pipeline, None) }
    }

    fn create_mapped_buffer(
        &self,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        min_offset_alignment: vk::DeviceSize,
    ) -> VulkanResult<Buffer> {
        let mut buffer = Buffer::new(
            self.raw().clone(),
            &self.physical,
            instance_size,
            instance_count,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            min_offset_alignment,
        )?;
        buffer.map()?;
        Ok(buffer)
    }

    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.physical.properties.limits.min_uniform_buffer_offset_alignment
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe {
            self.raw()
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.raw().destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .flags(flags)
            .pool_sizes(pool_sizes);
        unsafe {
            self.raw()
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.raw().destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe {
            self.raw()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };
        sets.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Descriptor allocation returned no set".to_string(),
        })
    }

    fn free_descriptor_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        unsafe { self.raw().free_descriptor_sets(pool, sets).map_err(VulkanError::Api) }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        unsafe {
            self.raw()
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        // Info structs must outlive the write array that points at them
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Buffer(info) => [info],
                DescriptorResource::Image(_) => [vk::DescriptorBufferInfo::default()],
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Image(info) => [info],
                DescriptorResource::Buffer(_) => [vk::DescriptorImageInfo::default()],
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.descriptor_type);
                match write.resource {
                    DescriptorResource::Buffer(_) => builder.buffer_info(&buffer_infos[i]).build(),
                    DescriptorResource::Image(_) => builder.image_info(&image_infos[i]).build(),
                }
            })
            .collect();

        unsafe { self.raw().update_descriptor_sets(&vk_writes, &[]) }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device.device_wait_idle();
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
