// Command buffers
//
// Allocated from the device's graphics command pool, one per swapchain
// image, and pre-recorded: the frame content only changes when the
// swapchain or pipeline is rebuilt.

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

/// Everything a draw recording references
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
}

pub fn allocate(device: &VulkanDevice, count: u32) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(device.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    super::check("Command buffer allocation", unsafe {
        device.raw().allocate_command_buffers(&alloc_info)
    })
    .context("Failed to allocate command buffers!")
}

pub fn free(device: &VulkanDevice, command_buffers: &mut Vec<vk::CommandBuffer>) {
    if command_buffers.is_empty() {
        return;
    }
    unsafe {
        device.raw().free_command_buffers(device.command_pool, command_buffers);
    }
    command_buffers.clear();
}

/// Full-extent viewport with the standard 0..1 depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Record: clear, bind pipeline, set dynamic state, draw the vertex buffer
pub fn record_draw(device: &VulkanDevice, cmd: vk::CommandBuffer, target: &DrawTarget) -> Result<()> {
    let raw = device.raw();

    let begin_info = vk::CommandBufferBeginInfo::builder();
    super::check("Command buffer begin", unsafe { raw.begin_command_buffer(cmd, &begin_info) })
        .context("Failed to begin recording command buffer!")?;

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: target.clear_color,
        },
    }];

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(target.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(full_scissor(target.extent))
        .clear_values(&clear_values);

    unsafe {
        raw.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
        raw.cmd_set_viewport(cmd, 0, &[full_viewport(target.extent)]);
        raw.cmd_set_scissor(cmd, 0, &[full_scissor(target.extent)]);
        raw.cmd_bind_vertex_buffers(cmd, 0, &[target.vertex_buffer], &[0]);
        raw.cmd_draw(cmd, target.vertex_count, 1, 0, 0);
        raw.cmd_end_render_pass(cmd);
    }

    super::check("Command buffer end", unsafe { raw.end_command_buffer(cmd) })
        .context("Failed to record command buffer!")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_and_scissor_cover_the_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };

        let viewport = full_viewport(extent);
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (1280.0, 720.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));

        let scissor = full_scissor(extent);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
        assert_eq!((scissor.extent.width, scissor.extent.height), (1280, 720));
    }
}
