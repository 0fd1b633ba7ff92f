//! Frame orchestrator
//!
//! Drives one frame at a time through acquire, record, submit and present,
//! cycling through as many frame slots as the swap chain has images. Out-of-date
//! and suboptimal swap chains, as well as window resizes, are handled here by
//! rebuilding the swap chain and everything bound to its render pass.
//!
//! ```text
//! begin_frame ─> begin_render_pass ─> (systems record) ─> end_render_pass ─> end_frame
//!      │                                                                        │
//!      └── out of date: rebuild, skip frame          suboptimal / resized: rebuild
//! ```

use std::rc::Rc;

use ash::vk;
use bitflags::bitflags;

use crate::core::RendererConfig;
use crate::render::api::{AcquireOutcome, PresentChain, PresentOutcome, PresentationSurface, RenderDevice};
use crate::render::pipeline::PipelineManager;
use crate::render::{RenderError, RenderResult};

bitflags! {
    /// Why a swap chain rebuild was triggered
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecreateReason: u8 {
        /// Acquire or present reported the swap chain out of date
        const OUT_OF_DATE = 1 << 0;
        /// Present reported the swap chain suboptimal
        const SUBOPTIMAL = 1 << 1;
        /// The surface reported a resize
        const RESIZED = 1 << 2;
    }
}

/// Frame lifecycle and swap chain owner
pub struct Renderer<D: RenderDevice> {
    // Declared before the swap chain so pipelines are destroyed first
    pipelines: PipelineManager<D>,
    swapchain: D::Swapchain,
    command_buffers: Vec<vk::CommandBuffer>,
    device: Rc<D>,
    clear_color: [f32; 4],
    current_image_index: u32,
    current_frame_index: usize,
    frame_started: bool,
    generation: u64,
}

impl<D: RenderDevice> Renderer<D> {
    /// Create the swap chain and one command buffer per image
    ///
    /// Blocks while the surface has a zero extent.
    pub fn new(device: Rc<D>, surface: &mut impl PresentationSurface, config: &RendererConfig) -> RenderResult<Self> {
        let extent = Self::wait_for_nonzero_extent(surface);
        let swapchain = device.create_swapchain(extent, None)?;
        let command_buffers = device.allocate_command_buffers(swapchain.image_count())?;
        let pipelines = PipelineManager::new(device.clone(), swapchain.render_pass());

        log::info!(
            "Renderer created: {}x{}, {} frame slot(s)",
            extent.width,
            extent.height,
            swapchain.image_count()
        );

        Ok(Self {
            pipelines,
            swapchain,
            command_buffers,
            device,
            clear_color: config.clear_color,
            current_image_index: 0,
            current_frame_index: 0,
            frame_started: false,
            generation: 0,
        })
    }

    fn wait_for_nonzero_extent(surface: &mut impl PresentationSurface) -> vk::Extent2D {
        let mut extent = surface.extent();
        while extent.width == 0 || extent.height == 0 {
            log::trace!("Surface extent is zero, waiting for events");
            surface.wait_events();
            extent = surface.extent();
        }
        extent
    }

    /// Acquire an image and start recording
    ///
    /// Returns `None` when the swap chain was out of date and had to be
    /// rebuilt; nothing should be recorded for this tick.
    pub fn begin_frame(&mut self, surface: &mut impl PresentationSurface) -> RenderResult<Option<vk::CommandBuffer>> {
        assert!(!self.frame_started, "Can't call begin_frame while already in progress");

        match self.swapchain.acquire_next_image(self.current_frame_index)? {
            AcquireOutcome::OutOfDate => {
                log::debug!("Swap chain out of date on acquire");
                self.recreate(surface, RecreateReason::OUT_OF_DATE)?;
                Ok(None)
            }
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    // Still presentable; rebuilt after present
                    log::trace!("Swap chain suboptimal on acquire");
                }
                self.current_image_index = image_index;

                let command_buffer = self.current_command_buffer();
                self.device.begin_command_buffer(command_buffer)?;
                self.frame_started = true;
                Ok(Some(command_buffer))
            }
        }
    }

    /// Finish recording, submit and present
    pub fn end_frame(&mut self, surface: &mut impl PresentationSurface) -> RenderResult<()> {
        assert!(self.frame_started, "Can't call end_frame while frame is not in progress");

        let command_buffer = self.current_command_buffer();
        self.device.end_command_buffer(command_buffer)?;

        let outcome =
            self.swapchain
                .submit_and_present(command_buffer, self.current_image_index, self.current_frame_index)?;

        self.frame_started = false;
        self.current_frame_index = (self.current_frame_index + 1) % self.command_buffers.len();

        let mut reason = RecreateReason::empty();
        match outcome {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => reason |= RecreateReason::SUBOPTIMAL,
            PresentOutcome::OutOfDate => reason |= RecreateReason::OUT_OF_DATE,
        }
        if surface.was_resized() {
            surface.reset_resized_flag();
            reason |= RecreateReason::RESIZED;
        }

        if !reason.is_empty() {
            log::debug!("Rebuilding swap chain after present: {:?}", reason);
            self.recreate(surface, reason)?;
        }
        Ok(())
    }

    /// Begin the main render pass on the acquired image
    pub fn begin_render_pass(&self, command_buffer: vk::CommandBuffer) {
        assert!(self.frame_started, "Can't call begin_render_pass if frame is not in progress");
        assert_eq!(
            command_buffer,
            self.current_command_buffer(),
            "Can't begin render pass on command buffer from a different frame"
        );

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear_color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let extent = self.swapchain.extent();
        self.device.cmd_begin_render_pass(
            command_buffer,
            self.swapchain.render_pass(),
            self.swapchain.framebuffer(self.current_image_index),
            extent,
            &clear_values,
        );
        self.device.cmd_set_viewport_and_scissor(command_buffer, extent);
    }

    /// End the main render pass
    pub fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        assert!(self.frame_started, "Can't call end_render_pass if frame is not in progress");
        assert_eq!(
            command_buffer,
            self.current_command_buffer(),
            "Can't end render pass on command buffer from a different frame"
        );
        self.device.cmd_end_render_pass(command_buffer);
    }

    /// Rebuild the swap chain and everything bound to it
    fn recreate(&mut self, surface: &mut impl PresentationSurface, reason: RecreateReason) -> RenderResult<()> {
        let extent = Self::wait_for_nonzero_extent(surface);

        self.swapchain.wait_for_in_flight()?;
        self.device.wait_idle()?;

        let swapchain = self.device.create_swapchain(extent, Some(&self.swapchain))?;
        if !self.swapchain.compare_formats(&swapchain) {
            return Err(RenderError::SwapchainFormatChanged {
                previous: self.swapchain.formats(),
                current: swapchain.formats(),
            });
        }
        let old = std::mem::replace(&mut self.swapchain, swapchain);
        drop(old);

        let image_count = self.swapchain.image_count();
        if image_count != self.command_buffers.len() {
            log::debug!(
                "Image count changed from {} to {}, reallocating command buffers",
                self.command_buffers.len(),
                image_count
            );
            self.device.free_command_buffers(&self.command_buffers);
            self.command_buffers = self.device.allocate_command_buffers(image_count)?;
            self.current_frame_index = 0;
        }
        debug_assert_eq!(self.command_buffers.len(), self.swapchain.image_count());

        self.pipelines.rebuild_all(self.swapchain.render_pass())?;
        self.generation += 1;

        log::debug!(
            "Swap chain rebuilt ({:?}): {}x{}, {} image(s), generation {}",
            reason,
            extent.width,
            extent.height,
            image_count,
            self.generation
        );
        Ok(())
    }

    /// Slot of the frame being recorded
    pub fn frame_index(&self) -> usize {
        assert!(self.frame_started, "Cannot get frame index when frame not in progress");
        self.current_frame_index
    }

    /// Command buffer of the current slot
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffers[self.current_frame_index]
    }

    /// Whether `begin_frame` succeeded and `end_frame` was not called yet
    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_started
    }

    /// Width over height of the swap chain images
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent_aspect_ratio()
    }

    /// Extent of the swap chain images
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Number of swap chain images, which is also the number of frame slots
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Render pass of the current swap chain
    pub fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    /// Incremented on every swap chain rebuild
    pub fn swapchain_generation(&self) -> u64 {
        self.generation
    }

    /// Pipelines bound to the current render pass
    pub fn pipelines(&self) -> &PipelineManager<D> {
        &self.pipelines
    }

    /// Pipelines bound to the current render pass, for registration
    pub fn pipelines_mut(&mut self) -> &mut PipelineManager<D> {
        &mut self.pipelines
    }
}

impl<D: RenderDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle during renderer teardown: {}", e);
        }
        self.device.free_command_buffers(&self.command_buffers);
        self.command_buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::SwapchainFormats;
    use crate::render::testing::{Call, MockDevice, MockSurface};

    fn renderer(device: &Rc<MockDevice>, surface: &mut MockSurface) -> Renderer<MockDevice> {
        Renderer::new(device.clone(), surface, &RendererConfig::default()).unwrap()
    }

    fn run_frame(renderer: &mut Renderer<MockDevice>, surface: &mut MockSurface) -> Option<usize> {
        let command_buffer = renderer.begin_frame(surface).unwrap()?;
        let index = renderer.frame_index();
        renderer.begin_render_pass(command_buffer);
        renderer.end_render_pass(command_buffer);
        renderer.end_frame(surface).unwrap();
        Some(index)
    }

    fn submitted_slots(device: &MockDevice) -> Vec<usize> {
        device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SubmitPresent { slot, .. } => Some(slot),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_slots_cycle_round_robin() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);

        let indices: Vec<usize> = (0..7).filter_map(|_| run_frame(&mut renderer, &mut surface)).collect();

        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(submitted_slots(&device), vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(renderer.swapchain_generation(), 0);
        assert_eq!(device.count(|c| matches!(c, Call::CreateSwapchain { .. })), 1);
    }

    #[test]
    fn test_command_buffer_matches_slot() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);

        let first = renderer.begin_frame(&mut surface).unwrap().unwrap();
        renderer.end_frame(&mut surface).unwrap();
        let second = renderer.begin_frame(&mut surface).unwrap().unwrap();
        renderer.end_frame(&mut surface).unwrap();

        assert_ne!(first, second);
        assert!(device.calls().contains(&Call::SubmitPresent { command_buffer: second, image_index: 1, slot: 1 }));
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame_and_rebuilds() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        device.push_acquire(Ok(AcquireOutcome::OutOfDate));

        assert!(renderer.begin_frame(&mut surface).unwrap().is_none());
        assert!(!renderer.is_frame_in_progress());
        assert_eq!(renderer.swapchain_generation(), 1);
        assert_eq!(device.count(|c| matches!(c, Call::BeginCommandBuffer(_))), 0);

        // Next tick renders normally
        assert_eq!(run_frame(&mut renderer, &mut surface), Some(0));
    }

    #[test]
    fn test_recreation_drains_in_flight_work_first() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        device.clear_calls();
        device.push_present(Ok(PresentOutcome::Suboptimal));

        run_frame(&mut renderer, &mut surface);

        let calls = device.calls();
        let position = |call: &Call| calls.iter().position(|c| c == call).unwrap();
        let drain = position(&Call::WaitForInFlight);
        let idle = position(&Call::WaitIdle);
        let create = calls
            .iter()
            .position(|c| matches!(c, Call::CreateSwapchain { has_previous: true, .. }))
            .unwrap();
        assert!(drain < idle && idle < create);
    }

    #[test]
    fn test_zero_extent_blocks_until_nonzero() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        device.clear_calls();

        surface.resize(0, 0);
        surface.queue_extent(0, 0);
        surface.queue_extent(1024, 768);
        run_frame(&mut renderer, &mut surface);

        let calls = device.calls();
        let waits: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Call::WaitEvents)
            .map(|(i, _)| i)
            .collect();
        let creates: Vec<&Call> = calls.iter().filter(|c| matches!(c, Call::CreateSwapchain { .. })).collect();

        assert_eq!(waits.len(), 2);
        assert_eq!(
            creates,
            vec![&Call::CreateSwapchain {
                extent: vk::Extent2D { width: 1024, height: 768 },
                has_previous: true
            }]
        );
        let create = calls.iter().position(|c| matches!(c, Call::CreateSwapchain { .. })).unwrap();
        assert!(waits.iter().all(|&w| w < create));
        assert_eq!(renderer.extent(), vk::Extent2D { width: 1024, height: 768 });
    }

    #[test]
    fn test_construction_waits_for_nonzero_extent() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 0, 0);
        surface.queue_extent(640, 480);

        let renderer = renderer(&device, &mut surface);

        assert_eq!(device.calls()[0], Call::WaitEvents);
        assert_eq!(renderer.extent(), vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn test_resize_flag_triggers_rebuild_and_is_reset() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);

        surface.resize(1280, 720);
        run_frame(&mut renderer, &mut surface);

        assert!(!surface.was_resized());
        assert_eq!(renderer.swapchain_generation(), 1);
        assert_eq!(renderer.extent(), vk::Extent2D { width: 1280, height: 720 });

        run_frame(&mut renderer, &mut surface);
        assert_eq!(renderer.swapchain_generation(), 1);
    }

    #[test]
    fn test_viewport_follows_new_extent() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        surface.resize(1280, 720);
        run_frame(&mut renderer, &mut surface);
        device.clear_calls();

        run_frame(&mut renderer, &mut surface);

        assert!(device
            .calls()
            .contains(&Call::SetViewport { extent: vk::Extent2D { width: 1280, height: 720 } }));
    }

    #[test]
    fn test_unchanged_formats_rebuild_cleanly() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        device.push_present(Ok(PresentOutcome::OutOfDate));

        let command_buffer = renderer.begin_frame(&mut surface).unwrap().unwrap();
        renderer.begin_render_pass(command_buffer);
        renderer.end_render_pass(command_buffer);
        assert!(renderer.end_frame(&mut surface).is_ok());
        assert_eq!(renderer.swapchain_generation(), 1);
    }

    #[test]
    fn test_changed_format_is_fatal() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        device.set_formats(SwapchainFormats {
            color: vk::Format::R8G8B8A8_UNORM,
            depth: vk::Format::D32_SFLOAT,
        });
        device.push_acquire(Ok(AcquireOutcome::OutOfDate));

        match renderer.begin_frame(&mut surface) {
            Err(RenderError::SwapchainFormatChanged { previous, current }) => {
                assert_eq!(previous.color, vk::Format::B8G8R8A8_SRGB);
                assert_eq!(current.color, vk::Format::R8G8B8A8_UNORM);
            }
            other => panic!("expected SwapchainFormatChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_command_buffers_follow_image_count() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        assert_eq!(renderer.command_buffers.len(), renderer.image_count());

        run_frame(&mut renderer, &mut surface);
        device.set_image_count(2);
        surface.resize(1024, 768);
        run_frame(&mut renderer, &mut surface);

        assert_eq!(renderer.image_count(), 2);
        assert_eq!(renderer.command_buffers.len(), 2);
        assert!(device.calls().contains(&Call::AllocateCommandBuffers(2)));
        assert_eq!(device.count(|c| matches!(c, Call::FreeCommandBuffers(_))), 1);

        // Slot index restarts and wraps at the new count
        let indices: Vec<usize> = (0..4).filter_map(|_| run_frame(&mut renderer, &mut surface)).collect();
        assert_eq!(indices, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_same_image_count_keeps_command_buffers() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        let before = renderer.command_buffers.clone();

        surface.resize(1024, 768);
        run_frame(&mut renderer, &mut surface);

        assert_eq!(renderer.command_buffers, before);
        assert_eq!(device.count(|c| matches!(c, Call::FreeCommandBuffers(_))), 0);
    }

    #[test]
    fn test_pipelines_rebuilt_against_new_render_pass() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        let id = renderer
            .pipelines_mut()
            .register(crate::render::api::PipelineDescriptor {
                vertex_shader: "mesh.vert.spv".into(),
                fragment_shader: "mesh.frag.spv".into(),
                config: crate::render::pipeline::PipelineConfig::default(),
                layout: vk::PipelineLayout::null(),
            })
            .unwrap();
        let before = renderer.pipelines().get(id).unwrap();

        surface.resize(1024, 768);
        run_frame(&mut renderer, &mut surface);

        assert_ne!(renderer.pipelines().get(id).unwrap(), before);
        assert_eq!(renderer.pipelines().render_pass(), renderer.render_pass());
        assert!(device.calls().contains(&Call::CreatePipeline { render_pass: renderer.render_pass() }));
    }

    #[test]
    fn test_fatal_acquire_error_propagates() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        device.push_acquire(Err(vk::Result::ERROR_DEVICE_LOST));

        assert!(matches!(renderer.begin_frame(&mut surface), Err(RenderError::Vulkan(_))));
        assert!(!renderer.is_frame_in_progress());
    }

    #[test]
    fn test_aspect_ratio() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 400);
        let renderer = renderer(&device, &mut surface);
        approx::assert_relative_eq!(renderer.aspect_ratio(), 2.0);
    }

    #[test]
    #[should_panic(expected = "frame is not in progress")]
    fn test_end_frame_without_begin_panics() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        let _ = renderer.end_frame(&mut surface);
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn test_begin_frame_twice_panics() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        let _ = renderer.begin_frame(&mut surface);
        let _ = renderer.begin_frame(&mut surface);
    }

    #[test]
    #[should_panic(expected = "different frame")]
    fn test_render_pass_on_foreign_command_buffer_panics() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let mut renderer = renderer(&device, &mut surface);
        renderer.begin_frame(&mut surface).unwrap();
        renderer.begin_render_pass(vk::CommandBuffer::null());
    }

    #[test]
    #[should_panic(expected = "not in progress")]
    fn test_frame_index_outside_frame_panics() {
        let device = Rc::new(MockDevice::new());
        let mut surface = MockSurface::new(&device, 800, 600);
        let renderer = renderer(&device, &mut surface);
        renderer.frame_index();
    }
}
