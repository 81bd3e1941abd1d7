// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Each wrapper owns its handle and destroys
// it on drop; owners hold an `Arc` of whatever must outlive them.

pub mod buffer;
pub mod command;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::{Buffer, Vertex};
pub use device::VulkanDevice;
pub use instance::Instance;
pub use pipeline::GraphicsPipeline;
pub use render_pass::RenderPass;
pub use shader::ShaderModule;
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::FrameSync;

use ash::prelude::VkResult;

/// Log the outcome of a native call and turn a failure into an error.
pub fn check<T>(action: &str, result: VkResult<T>) -> anyhow::Result<T> {
    match result {
        Ok(value) => {
            log::debug!("{} succeeded.", action);
            Ok(value)
        }
        Err(code) => {
            log::error!("{} failed with error code: {:?}", action, code);
            Err(anyhow::Error::new(code).context(format!("{} failed", action)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn check_passes_values_through() {
        assert_eq!(check("Answer", Ok(42)).unwrap(), 42);
    }

    #[test]
    fn check_reports_action_and_code() {
        let err = check::<()>("Swapchain creation", Err(vk::Result::ERROR_SURFACE_LOST_KHR))
            .unwrap_err();
        assert_eq!(err.to_string(), "Swapchain creation failed");
        assert_eq!(
            err.downcast_ref::<vk::Result>(),
            Some(&vk::Result::ERROR_SURFACE_LOST_KHR)
        );
    }
}
