// Synchronization primitives
//
// Semaphores order acquire -> render -> present on the GPU; the fence lets
// the CPU know when a frame slot can be reused.

use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        // Drop destroys whatever was created if a later call fails
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            device,
        };

        super::check("Sync object creation", sync.create_handles())
            .map_err(|e| e.context("Failed to create semaphores!"))?;
        Ok(sync)
    }

    fn create_handles(&mut self) -> VkResult<()> {
        let device = self.device.raw();
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first wait on this slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            self.image_available = device.create_semaphore(&semaphore_info, None)?;
            self.render_finished = device.create_semaphore(&semaphore_info, None)?;
            self.in_flight_fence = device.create_fence(&fence_info, None)?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    // Null handles are ignored by the destroy calls
    fn drop(&mut self) {
        let device = self.device.raw();
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sync_releases_its_handles_on_drop() {
        // A partially built Vec<FrameSync> must clean up when collection
        // stops at the first error
        assert!(std::mem::needs_drop::<FrameSync>());
        assert!(std::mem::needs_drop::<Vec<FrameSync>>());
    }
}
