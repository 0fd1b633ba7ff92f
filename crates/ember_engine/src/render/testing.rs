//! Recording test doubles for the device, swap chain and surface seams
//!
//! Every call that matters to the orchestration logic is appended to a shared
//! log so tests can assert on ordering. Handles are fabricated from a counter.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ash::vk::{self, Handle};

use crate::render::api::{
    AcquireOutcome, DescriptorWrite, MappedBuffer, PipelineDescriptor, PresentChain, PresentOutcome,
    PresentationSurface, RenderDevice, SwapchainFormats,
};
use crate::render::game_object::SampledImage;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Observable side effect of a test double
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WaitIdle,
    CreateSwapchain { extent: vk::Extent2D, has_previous: bool },
    AllocateCommandBuffers(usize),
    FreeCommandBuffers(Vec<vk::CommandBuffer>),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass { command_buffer: vk::CommandBuffer, framebuffer: vk::Framebuffer, extent: vk::Extent2D },
    SetViewport { extent: vk::Extent2D },
    EndRenderPass(vk::CommandBuffer),
    BindPipeline(vk::Pipeline),
    BindDescriptorSets { first_set: u32, sets: Vec<vk::DescriptorSet> },
    PushConstants(Vec<u8>),
    Draw { vertex_count: u32, instance_count: u32 },
    CreatePipeline { render_pass: vk::RenderPass },
    DestroyPipeline(vk::Pipeline),
    CreateBuffer { instance_size: vk::DeviceSize },
    AllocateDescriptorSet(vk::DescriptorSet),
    FreeDescriptorSets(Vec<vk::DescriptorSet>),
    ResetDescriptorPool,
    UpdateDescriptorSet { set: vk::DescriptorSet, bindings: Vec<u32> },
    Acquire { slot: usize },
    SubmitPresent { command_buffer: vk::CommandBuffer, image_index: u32, slot: usize },
    WaitForInFlight,
    WaitEvents,
}

/// State shared by every double created from one [`MockDevice`]
pub struct MockState {
    pub calls: Vec<Call>,
    next_handle: u64,
    pub image_count: usize,
    pub formats: SwapchainFormats,
    pub acquire_script: VecDeque<Result<AcquireOutcome, vk::Result>>,
    pub present_script: VecDeque<Result<PresentOutcome, vk::Result>>,
    pub coherent_buffers: bool,
    pub flushes: usize,
    pub descriptor_allocation_failure: Option<vk::Result>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

pub type SharedState = Rc<RefCell<MockState>>;

fn record(state: &SharedState, call: Call) {
    state.borrow_mut().calls.push(call);
}

/// Device double
pub struct MockDevice {
    state: SharedState,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                calls: Vec::new(),
                next_handle: 1000,
                image_count: 3,
                formats: SwapchainFormats {
                    color: vk::Format::B8G8R8A8_SRGB,
                    depth: vk::Format::D32_SFLOAT,
                },
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                coherent_buffers: true,
                flushes: 0,
                descriptor_allocation_failure: None,
            })),
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Image count of swap chains created from now on
    pub fn set_image_count(&self, count: usize) {
        self.state.borrow_mut().image_count = count;
    }

    /// Formats of swap chains created from now on
    pub fn set_formats(&self, formats: SwapchainFormats) {
        self.state.borrow_mut().formats = formats;
    }

    pub fn push_acquire(&self, outcome: Result<AcquireOutcome, vk::Result>) {
        self.state.borrow_mut().acquire_script.push_back(outcome);
    }

    pub fn push_present(&self, outcome: Result<PresentOutcome, vk::Result>) {
        self.state.borrow_mut().present_script.push_back(outcome);
    }

    pub fn set_coherent_buffers(&self, coherent: bool) {
        self.state.borrow_mut().coherent_buffers = coherent;
    }

    pub fn flush_count(&self) -> usize {
        self.state.borrow().flushes
    }

    pub fn fail_next_descriptor_allocation(&self, result: vk::Result) {
        self.state.borrow_mut().descriptor_allocation_failure = Some(result);
    }

    /// Number of logged calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| predicate(c)).count()
    }

    fn handle(&self) -> u64 {
        self.state.borrow_mut().handle()
    }
}

impl RenderDevice for MockDevice {
    type Swapchain = MockSwapchain;
    type Buffer = MockBuffer;

    fn wait_idle(&self) -> VulkanResult<()> {
        record(&self.state, Call::WaitIdle);
        Ok(())
    }

    fn create_swapchain(&self, extent: vk::Extent2D, previous: Option<&MockSwapchain>) -> VulkanResult<MockSwapchain> {
        record(&self.state, Call::CreateSwapchain { extent, has_previous: previous.is_some() });
        let (image_count, formats) = {
            let state = self.state.borrow();
            (state.image_count, state.formats)
        };
        let render_pass = vk::RenderPass::from_raw(self.handle());
        let framebuffers = (0..image_count).map(|_| vk::Framebuffer::from_raw(self.handle())).collect();
        Ok(MockSwapchain {
            state: self.state.clone(),
            extent,
            formats,
            render_pass,
            framebuffers,
            next_image: 0,
        })
    }

    fn allocate_command_buffers(&self, count: usize) -> VulkanResult<Vec<vk::CommandBuffer>> {
        record(&self.state, Call::AllocateCommandBuffers(count));
        Ok((0..count).map(|_| vk::CommandBuffer::from_raw(self.handle())).collect())
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        record(&self.state, Call::FreeCommandBuffers(command_buffers.to_vec()));
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        record(&self.state, Call::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        record(&self.state, Call::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
        record(&self.state, Call::BeginRenderPass { command_buffer, framebuffer, extent });
    }

    fn cmd_set_viewport_and_scissor(&self, _command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        record(&self.state, Call::SetViewport { extent });
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        record(&self.state, Call::EndRenderPass(command_buffer));
    }

    fn cmd_bind_pipeline(&self, _command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        record(&self.state, Call::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        record(&self.state, Call::BindDescriptorSets { first_set, sets: descriptor_sets.to_vec() });
    }

    fn cmd_push_constants(
        &self,
        _command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        bytes: &[u8],
    ) {
        record(&self.state, Call::PushConstants(bytes.to_vec()));
    }

    fn cmd_draw(&self, _command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        record(&self.state, Call::Draw { vertex_count, instance_count });
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(self.handle()))
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {}

    fn create_graphics_pipeline(
        &self,
        _descriptor: &PipelineDescriptor,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<vk::Pipeline> {
        record(&self.state, Call::CreatePipeline { render_pass });
        Ok(vk::Pipeline::from_raw(self.handle()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        record(&self.state, Call::DestroyPipeline(pipeline));
    }

    fn create_mapped_buffer(
        &self,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        _usage: vk::BufferUsageFlags,
        _min_offset_alignment: vk::DeviceSize,
    ) -> VulkanResult<MockBuffer> {
        record(&self.state, Call::CreateBuffer { instance_size });
        let coherent = self.state.borrow().coherent_buffers;
        Ok(MockBuffer {
            state: self.state.clone(),
            handle: vk::Buffer::from_raw(self.handle()),
            data: vec![0; (instance_size * vk::DeviceSize::from(instance_count)) as usize],
            coherent,
        })
    }

    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        256
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(self.handle()))
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {}

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _flags: vk::DescriptorPoolCreateFlags,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool> {
        Ok(vk::DescriptorPool::from_raw(self.handle()))
    }

    fn destroy_descriptor_pool(&self, _pool: vk::DescriptorPool) {}

    fn allocate_descriptor_set(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        if let Some(failure) = self.state.borrow_mut().descriptor_allocation_failure.take() {
            return Err(VulkanError::Api(failure));
        }
        let set = vk::DescriptorSet::from_raw(self.handle());
        record(&self.state, Call::AllocateDescriptorSet(set));
        Ok(set)
    }

    fn free_descriptor_sets(&self, _pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        record(&self.state, Call::FreeDescriptorSets(sets.to_vec()));
        Ok(())
    }

    fn reset_descriptor_pool(&self, _pool: vk::DescriptorPool) -> VulkanResult<()> {
        record(&self.state, Call::ResetDescriptorPool);
        Ok(())
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let bindings = writes.iter().map(|w| w.binding).collect();
        record(&self.state, Call::UpdateDescriptorSet { set, bindings });
    }
}

/// Swap chain double
///
/// Hands out images round-robin unless an outcome was scripted.
pub struct MockSwapchain {
    state: SharedState,
    extent: vk::Extent2D,
    formats: SwapchainFormats,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    next_image: u32,
}

impl PresentChain for MockSwapchain {
    fn image_count(&self) -> usize {
        self.framebuffers.len()
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn formats(&self) -> SwapchainFormats {
        self.formats
    }

    fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    fn acquire_next_image(&mut self, frame_slot: usize) -> VulkanResult<AcquireOutcome> {
        record(&self.state, Call::Acquire { slot: frame_slot });
        let scripted = self.state.borrow_mut().acquire_script.pop_front();
        match scripted {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(e)) => Err(VulkanError::Api(e)),
            None => {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.framebuffers.len() as u32;
                Ok(AcquireOutcome::Acquired { image_index, suboptimal: false })
            }
        }
    }

    fn submit_and_present(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        frame_slot: usize,
    ) -> VulkanResult<PresentOutcome> {
        record(&self.state, Call::SubmitPresent { command_buffer, image_index, slot: frame_slot });
        let scripted = self.state.borrow_mut().present_script.pop_front();
        match scripted {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(e)) => Err(VulkanError::Api(e)),
            None => Ok(PresentOutcome::Presented),
        }
    }

    fn wait_for_in_flight(&self) -> VulkanResult<()> {
        record(&self.state, Call::WaitForInFlight);
        Ok(())
    }
}

/// Host buffer double backed by a byte vector
pub struct MockBuffer {
    state: SharedState,
    handle: vk::Buffer,
    pub data: Vec<u8>,
    coherent: bool,
}

impl MappedBuffer for MockBuffer {
    fn write_bytes(&mut self, bytes: &[u8], offset: vk::DeviceSize) {
        let offset = offset as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn flush(&self) -> VulkanResult<()> {
        self.state.borrow_mut().flushes += 1;
        Ok(())
    }

    fn is_coherent(&self) -> bool {
        self.coherent
    }

    fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.handle,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }
}

/// Surface double with a scripted sequence of extents
///
/// `wait_events` logs into the device's call log and advances to the next
/// queued extent.
pub struct MockSurface {
    state: SharedState,
    extent: vk::Extent2D,
    pending_extents: VecDeque<vk::Extent2D>,
    resized: bool,
}

impl MockSurface {
    pub fn new(device: &MockDevice, width: u32, height: u32) -> Self {
        Self {
            state: device.state(),
            extent: vk::Extent2D { width, height },
            pending_extents: VecDeque::new(),
            resized: false,
        }
    }

    /// Extent reported after the next `wait_events`
    pub fn queue_extent(&mut self, width: u32, height: u32) {
        self.pending_extents.push_back(vk::Extent2D { width, height });
    }

    /// Change the extent and raise the resize flag
    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
        self.resized = true;
    }
}

impl PresentationSurface for MockSurface {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn should_close(&self) -> bool {
        false
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn reset_resized_flag(&mut self) {
        self.resized = false;
    }

    fn wait_events(&mut self) {
        record(&self.state, Call::WaitEvents);
        if let Some(extent) = self.pending_extents.pop_front() {
            self.extent = extent;
        }
    }
}

/// Image double for material slots
pub struct StubImage(pub u64);

impl SampledImage for StubImage {
    fn descriptor_image_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: vk::Sampler::from_raw(self.0),
            image_view: vk::ImageView::from_raw(self.0),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}
