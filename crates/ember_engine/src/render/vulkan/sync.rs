//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences plus the per-slot bundle the swap
//! chain uses to keep the CPU at most one slot ahead of the GPU per frame slot.
//!
//! Fence waits never give up. [`wait_for_fence`] waits in intervals and logs a
//! warning each time an interval passes without the fence signalling, so a hung
//! device shows up in the logs instead of as a silent freeze.

use std::time::{Duration, Instant};

use ash::{vk, Device};
use crate::render::vulkan::{VulkanResult, VulkanError};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait until signaled, warning every `warn_after`
    pub fn wait(&self, warn_after: Duration) -> VulkanResult<()> {
        wait_for_fence(&self.device, self.fence, warn_after)
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Block until `fence` signals
///
/// The wait is split into `warn_after` intervals. A timed-out interval is
/// logged and the wait resumes; only real device errors end it early.
pub fn wait_for_fence(device: &Device, fence: vk::Fence, warn_after: Duration) -> VulkanResult<()> {
    let interval_ns = u64::try_from(warn_after.as_nanos()).unwrap_or(u64::MAX).max(1);
    let started = Instant::now();
    loop {
        match unsafe { device.wait_for_fences(&[fence], true, interval_ns) } {
            Ok(()) => return Ok(()),
            Err(vk::Result::TIMEOUT) => {
                log::warn!(
                    "Fence {:?} still unsignaled after {:.1}s, GPU may be stalled",
                    fence,
                    started.elapsed().as_secs_f32()
                );
            }
            Err(e) => return Err(VulkanError::Api(e)),
        }
    }
}

/// Synchronization objects owned by one frame slot
pub struct FrameSync {
    /// Signaled when the acquired image may be rendered to
    pub image_available: Semaphore,
    /// Signaled when the slot's last submission finished
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects, fence starts signaled
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            in_flight,
        })
    }
}
