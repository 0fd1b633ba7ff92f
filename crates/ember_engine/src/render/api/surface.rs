//! Presentation surface contract
//!
//! Implemented by the window backend. The renderer only needs to read the
//! drawable size, observe resize notifications and park the thread while the
//! window is minimized.

use ash::vk;

/// Output surface the renderer presents to
pub trait PresentationSurface {
    /// Current drawable size in pixels, zero while minimized
    fn extent(&self) -> vk::Extent2D;

    /// Whether the user asked to close the window
    fn should_close(&self) -> bool;

    /// Whether the drawable size changed since the flag was last reset
    fn was_resized(&self) -> bool;

    /// Clear the resize flag
    fn reset_resized_flag(&mut self);

    /// Block until at least one window event arrived and process it
    fn wait_events(&mut self);
}
