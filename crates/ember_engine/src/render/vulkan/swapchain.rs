//! Vulkan swapchain management
//!
//! A [`Swapchain`] owns the presentable images together with everything that
//! is sized by them: color views, depth buffers, the render pass and one
//! framebuffer per image. It also owns the per-slot synchronization objects.
//! Rebuilding means constructing a new `Swapchain` from the old one, never
//! mutating it.

use std::time::Duration;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::core::PresentModePreference;
use crate::render::api::{AcquireOutcome, PresentChain, PresentOutcome, SwapchainFormats};
use crate::render::vulkan::sync::wait_for_fence;
use crate::render::vulkan::{
    DepthBuffer, FrameSync, Framebuffer, ImageView, RenderPass, Semaphore, VulkanDevice, VulkanError,
    VulkanResult,
};

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    extent: vk::Extent2D,
    formats: SwapchainFormats,
    render_pass: RenderPass,
    image_views: Vec<ImageView>,
    depth_buffers: Vec<DepthBuffer>,
    framebuffers: Vec<Framebuffer>,
    slots: Vec<FrameSync>,
    // Indexed by image, signalled when rendering into that image finished
    render_finished: Vec<Semaphore>,
    // Slot fence of the submission currently using each image
    images_in_flight: Vec<vk::Fence>,
    fence_warning_timeout: Duration,
}

impl Swapchain {
    /// Build a swap chain for `window_extent`
    ///
    /// When `previous` is given its handle is passed as `old_swapchain` so the
    /// driver can recycle resources. The caller keeps `previous` alive until
    /// the new chain exists and drops it afterwards.
    pub fn new(
        device: &VulkanDevice,
        window_extent: vk::Extent2D,
        previous: Option<&Swapchain>,
    ) -> VulkanResult<Self> {
        let raw = device.raw().clone();
        let support = device.query_swapchain_support()?;

        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, device.present_mode_preference());
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = choose_image_count(&support.capabilities, device.requested_image_count());
        let depth_format = device.find_depth_format()?;

        let formats = SwapchainFormats {
            color: surface_format.format,
            depth: depth_format,
        };

        let render_pass = RenderPass::new_forward_pass(raw.clone(), formats.color, formats.depth)?;

        let physical = device.physical();
        let queue_families = [physical.graphics_family, physical.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        create_info = if physical.graphics_family != physical.present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = device.swapchain_loader().clone();
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut result = Self {
            device: raw.clone(),
            loader,
            swapchain,
            graphics_queue: device.graphics_queue(),
            present_queue: device.present_queue(),
            extent,
            formats,
            render_pass,
            image_views: Vec::new(),
            depth_buffers: Vec::new(),
            framebuffers: Vec::new(),
            slots: Vec::new(),
            render_finished: Vec::new(),
            images_in_flight: Vec::new(),
            fence_warning_timeout: device.fence_warning_timeout(),
        };

        let images = unsafe {
            result
                .loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        for &image in &images {
            let view = ImageView::new(raw.clone(), image, formats.color, vk::ImageAspectFlags::COLOR)?;
            let depth = DepthBuffer::new(raw.clone(), physical, formats.depth, extent)?;
            let framebuffer = Framebuffer::new(
                raw.clone(),
                result.render_pass.handle(),
                &[view.handle(), depth.image_view()],
                extent,
            )?;
            result.image_views.push(view);
            result.depth_buffers.push(depth);
            result.framebuffers.push(framebuffer);
            result.slots.push(FrameSync::new(raw.clone())?);
            result.render_finished.push(Semaphore::new(raw.clone())?);
        }
        result.images_in_flight = vec![vk::Fence::null(); images.len()];

        log::info!(
            "Swap chain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            formats.color,
            present_mode
        );

        Ok(result)
    }

    fn slot(&self, frame_slot: usize) -> VulkanResult<&FrameSync> {
        self.slots.get(frame_slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame slot {} out of range ({} slots)", frame_slot, self.slots.len()),
        })
    }

    /// Get the swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl PresentChain for Swapchain {
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
        self.render_pass.handle()
    }

    fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize].handle()
    }

    fn acquire_next_image(&mut self, frame_slot: usize) -> VulkanResult<AcquireOutcome> {
        let sync = self.slot(frame_slot)?;
        sync.in_flight.wait(self.fence_warning_timeout)?;

        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                sync.image_available.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn submit_and_present(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        frame_slot: usize,
    ) -> VulkanResult<PresentOutcome> {
        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Image index {} out of range", image_index),
            });
        }

        // Another slot may still be rendering into this image
        let previous_fence = self.images_in_flight[image];
        if previous_fence != vk::Fence::null() {
            wait_for_fence(&self.device, previous_fence, self.fence_warning_timeout)?;
        }

        let sync = self.slot(frame_slot)?;
        let in_flight = sync.in_flight.handle();
        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished[image].handle()];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        sync.in_flight.reset()?;
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info.build()], in_flight)
                .map_err(VulkanError::Api)?;
        }
        self.images_in_flight[image] = in_flight;

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(self.present_queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn wait_for_in_flight(&self) -> VulkanResult<()> {
        for sync in &self.slots {
            sync.in_flight.wait(self.fence_warning_timeout)?;
        }
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Framebuffers reference the views and the render pass
        self.framebuffers.clear();
        self.depth_buffers.clear();
        self.image_views.clear();
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Prefer 8-bit sRGB BGRA, otherwise take what the surface lists first
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| available.first().copied())
        .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))
}

/// Use the preferred mode when supported, FIFO otherwise
pub fn choose_present_mode(available: &[vk::PresentModeKHR], preference: PresentModePreference) -> vk::PresentModeKHR {
    let wanted = match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    if available.contains(&wanted) {
        wanted
    } else {
        log::debug!("Present mode {:?} unavailable, falling back to FIFO", wanted);
        vk::PresentModeKHR::FIFO
    }
}

/// Surface extent, or the window extent clamped to the surface limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Requested image count raised to the surface minimum and capped at its maximum
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        }
    }

    #[test]
    fn test_surface_format_prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR { format: vk::Format::R8G8B8A8_UNORM, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
            vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_SRGB, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [vk::SurfaceFormatKHR { format: vk::Format::R8G8B8A8_UNORM, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR }];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&available, PresentModePreference::Mailbox), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&available, PresentModePreference::Immediate), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_extent_is_clamped_when_surface_leaves_it_open() {
        let caps = capabilities(2, 3);
        let extent = choose_extent(&caps, vk::Extent2D { width: 5000, height: 0 });
        assert_eq!(extent, vk::Extent2D { width: 4096, height: 1 });
    }

    #[test]
    fn test_extent_uses_surface_current_extent() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D { width: 640, height: 480 };
        assert_eq!(choose_extent(&caps, vk::Extent2D { width: 800, height: 600 }), caps.current_extent);
    }

    #[test]
    fn test_image_count_respects_surface_limits() {
        assert_eq!(choose_image_count(&capabilities(2, 3), 1), 2);
        assert_eq!(choose_image_count(&capabilities(2, 3), 8), 3);
        assert_eq!(choose_image_count(&capabilities(2, 0), 8), 8);
    }
}
