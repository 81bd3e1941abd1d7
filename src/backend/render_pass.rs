// Render pass - a single color attachment cleared and handed to presentation
//
// Also owns the creation of framebuffers, which must match its attachments.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
    device: Arc<VulkanDevice>,
}

impl RenderPass {
    pub fn new(device: Arc<VulkanDevice>, format: vk::Format) -> Result<Self> {
        log::info!("Creating RenderPass for swapchain image format: {:?}", format);

        // Color attachment (the swapchain image)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .build();

        // The layout transition must wait for the acquire semaphore, which
        // is waited on at COLOR_ATTACHMENT_OUTPUT
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let render_pass = super::check("RenderPass creation", unsafe {
            device.raw().create_render_pass(&render_pass_info, None)
        })
        .context("Failed to create RenderPass.")?;

        log::info!("RenderPass created successfully.");
        Ok(Self {
            render_pass,
            format,
            device,
        })
    }

    /// One framebuffer per swapchain image view.
    ///
    /// On failure the framebuffers created so far are destroyed.
    pub fn create_framebuffers(
        &self,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Vec<vk::Framebuffer>> {
        let mut framebuffers = Vec::with_capacity(image_views.len());

        for &image_view in image_views {
            let attachments = &[image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let result = super::check("Framebuffer creation", unsafe {
                self.device.raw().create_framebuffer(&framebuffer_info, None)
            });

            match result {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    self.destroy_framebuffers(&mut framebuffers);
                    return Err(e.context("Failed to create framebuffer!"));
                }
            }
        }

        log::info!("Created {} framebuffers", framebuffers.len());
        Ok(framebuffers)
    }

    pub fn destroy_framebuffers(&self, framebuffers: &mut Vec<vk::Framebuffer>) {
        for framebuffer in framebuffers.drain(..) {
            unsafe { self.device.raw().destroy_framebuffer(framebuffer, None) };
        }
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        if self.render_pass == vk::RenderPass::null() {
            log::info!("RenderPass destruction skipped (already null).");
            return;
        }
        unsafe {
            self.device.raw().destroy_render_pass(self.render_pass, None);
        }
        self.render_pass = vk::RenderPass::null();
        log::info!("RenderPass destroyed successfully.");
    }
}
