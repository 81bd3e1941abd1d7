// Renderer - owns every Vulkan object and drives frame submission
//
// Creation order: instance -> surface -> device -> swapchain -> render pass
// -> pipeline -> framebuffers / command buffers -> sync objects.
// Field order below is the reverse, so implicit drops run correctly after
// the explicit teardown in `Drop`.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer::TRIANGLE;
use crate::backend::command::{self, DrawTarget};
use crate::backend::{
    Buffer, FrameSync, GraphicsPipeline, Instance, RenderPass, ShaderModule, Surface, Swapchain,
    VulkanDevice,
};
use crate::config::{Config, GraphicsConfig, ShaderConfig};

pub struct Renderer {
    // Per-frame state
    frame_sync: Vec<FrameSync>,
    /// Fence of the frame currently using each swapchain image (null if none)
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,

    // One pre-recorded command buffer and framebuffer per swapchain image
    command_buffers: Vec<vk::CommandBuffer>,
    framebuffers: Vec<vk::Framebuffer>,

    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    vertex_buffer: Buffer,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
    surface: Surface,

    graphics: GraphicsConfig,
    shaders: ShaderConfig,

    /// Last known window size in pixels
    window_size: (u32, u32),
    needs_recreate: bool,
}

impl Renderer {
    pub fn new(config: &Config, window: &Window) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let display_handle = window.raw_display_handle();
        let instance = Instance::new(
            &config.window.title,
            config.validation_enabled(),
            display_handle,
        )?;
        log::info!(
            "Validation messenger: {}",
            if instance.validation_enabled() { "active" } else { "off" }
        );

        let surface = Surface::new(instance.clone(), display_handle, window.raw_window_handle())?;
        let device = VulkanDevice::new(instance, &surface)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            size.width,
            size.height,
            config.graphics.present_mode(),
            None,
        )?;

        let render_pass = RenderPass::new(device.clone(), swapchain.format)?;
        let pipeline = build_pipeline(&device, &render_pass, &config.shaders)?;

        let vertex_buffer = Buffer::with_data(
            device.clone(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &TRIANGLE,
            "triangle vertices",
        )?;
        log::info!("Vertex buffer created ({} bytes)", vertex_buffer.size);

        let frame_sync = (0..config.graphics.frames_in_flight())
            .map(|_| FrameSync::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;

        let mut renderer = Self {
            frame_sync,
            images_in_flight: Vec::new(),
            current_frame: 0,
            command_buffers: Vec::new(),
            framebuffers: Vec::new(),
            pipeline,
            render_pass,
            vertex_buffer,
            swapchain,
            device,
            surface,
            graphics: config.graphics.clone(),
            shaders: config.shaders.clone(),
            window_size: (size.width, size.height),
            needs_recreate: false,
        };
        renderer.create_frame_resources()?;

        let gpu = unsafe { CStr::from_ptr(renderer.device.properties.device_name.as_ptr()) };
        log::info!("Vulkan initialized successfully on {}!", gpu.to_string_lossy());
        Ok(renderer)
    }

    /// Framebuffers, command buffers and image tracking for the current swapchain
    fn create_frame_resources(&mut self) -> Result<()> {
        self.framebuffers = self
            .render_pass
            .create_framebuffers(&self.swapchain.image_views, self.swapchain.extent)?;

        self.command_buffers =
            command::allocate(&self.device, self.swapchain.image_views.len() as u32)?;
        self.record_command_buffers()?;

        self.images_in_flight = vec![vk::Fence::null(); self.swapchain.images.len()];
        Ok(())
    }

    fn destroy_frame_resources(&mut self) {
        command::free(&self.device, &mut self.command_buffers);
        self.render_pass.destroy_framebuffers(&mut self.framebuffers);
        self.images_in_flight.clear();
    }

    fn record_command_buffers(&self) -> Result<()> {
        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&self.framebuffers) {
            let target = DrawTarget {
                render_pass: self.render_pass.render_pass,
                framebuffer,
                extent: self.swapchain.extent,
                clear_color: self.graphics.clear_color,
                pipeline: self.pipeline.pipeline,
                vertex_buffer: self.vertex_buffer.buffer,
                vertex_count: TRIANGLE.len() as u32,
            };
            command::record_draw(&self.device, cmd, &target)?;
        }
        log::info!("Recorded {} command buffers", self.command_buffers.len());
        Ok(())
    }

    /// Window size changed; a zero area means minimized
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
        self.needs_recreate = true;
    }

    pub fn is_minimized(&self) -> bool {
        self.window_size.0 == 0 || self.window_size.1 == 0
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let (width, height) = self.window_size;
        log::info!("Recreating swapchain: {}x{}", width, height);

        self.device.wait_idle()?;
        self.destroy_frame_resources();

        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            width,
            height,
            self.graphics.present_mode(),
            Some(&self.swapchain),
        )?;
        // The old swapchain is retired and dropped here
        self.swapchain = swapchain;
        log::info!(
            "Swapchain recreated: {}x{}, {:?}",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            self.swapchain.present_mode
        );

        if self.swapchain.format != self.render_pass.format {
            log::info!(
                "Swapchain format changed to {:?}, rebuilding render pass",
                self.swapchain.format
            );
            let render_pass = RenderPass::new(self.device.clone(), self.swapchain.format)?;
            self.pipeline = build_pipeline(&self.device, &render_pass, &self.shaders)?;
            self.render_pass = render_pass;
        }

        self.create_frame_resources()?;
        self.needs_recreate = false;
        Ok(())
    }

    /// Reload both shaders and rebuild the pipeline.
    ///
    /// Failures leave the current pipeline in place.
    pub fn reload_shaders(&mut self) {
        log::info!("Reloading shaders...");
        let pipeline = match build_pipeline(&self.device, &self.render_pass, &self.shaders) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::warn!("Shader reload failed, keeping current pipeline: {:#}", e);
                return;
            }
        };

        if let Err(e) = self.swap_pipeline(pipeline) {
            log::error!("Failed to re-record after shader reload: {:#}", e);
            // Rebuild the per-image resources next frame
            self.needs_recreate = true;
            return;
        }
        log::info!("Shaders reloaded.");
    }

    fn swap_pipeline(&mut self, pipeline: GraphicsPipeline) -> Result<()> {
        self.device.wait_idle()?;
        // The old pipeline is destroyed here, after the GPU is idle
        self.pipeline = pipeline;
        // The pool allows per-buffer reset, so begin resets implicitly
        self.record_command_buffers()
    }

    /// Render and present one frame.
    ///
    /// Returns `Ok(false)` when nothing was presented (minimized window or
    /// swapchain rebuilt instead).
    pub fn draw_frame(&mut self) -> Result<bool> {
        if self.is_minimized() {
            return Ok(false);
        }

        if self.needs_recreate {
            self.recreate_swapchain()?;
        }

        let device = self.device.raw();
        let sync = &self.frame_sync[self.current_frame];

        // STEP 1: Wait until the GPU is done with this frame slot
        unsafe { device.wait_for_fences(&[sync.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for frame fence")?;

        // STEP 2: Acquire next swapchain image
        let image_index = match self.swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
            Some((index, suboptimal)) => {
                // Still usable; rebuild after this frame
                if suboptimal {
                    self.needs_recreate = true;
                }
                index
            }
            None => {
                self.recreate_swapchain()?;
                return Ok(false);
            }
        };
        let image = image_index as usize;

        // STEP 3: An earlier frame slot may still be rendering to this image
        let image_fence = self.images_in_flight[image];
        if image_fence != vk::Fence::null() && image_fence != sync.in_flight_fence {
            unsafe { device.wait_for_fences(&[image_fence], true, u64::MAX) }
                .context("Failed to wait for swapchain image fence")?;
        }
        self.images_in_flight[image] = sync.in_flight_fence;

        // STEP 4: Submit the pre-recorded command buffer
        unsafe { device.reset_fences(&[sync.in_flight_fence]) }
            .context("Failed to reset frame fence")?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[image]];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        crate::backend::check("Draw command buffer submission", unsafe {
            device.queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight_fence)
        })
        .context("Failed to submit draw command buffer.")?;

        // STEP 5: Present once rendering has finished
        let stale = self
            .swapchain
            .present(self.device.present_queue, image_index, &signal_semaphores)?;
        if stale {
            self.needs_recreate = true;
        }

        // STEP 6: Advance to next frame slot
        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        Ok(true)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        let _ = self.device.wait_idle();

        self.destroy_frame_resources();

        // Sync objects, pipeline, render pass, buffer, swapchain, device and
        // surface are dropped in field order; the instance goes with the last Arc.
        log::info!("Cleanup complete");
    }
}

/// Load the configured shaders and build a pipeline for `render_pass`
fn build_pipeline(
    device: &Arc<VulkanDevice>,
    render_pass: &RenderPass,
    shaders: &ShaderConfig,
) -> Result<GraphicsPipeline> {
    let modules = [
        ShaderModule::from_file(device.clone(), &shaders.vertex, vk::ShaderStageFlags::VERTEX)?,
        ShaderModule::from_file(device.clone(), &shaders.fragment, vk::ShaderStageFlags::FRAGMENT)?,
    ];
    // Modules are destroyed on return; the pipeline keeps its own copy
    GraphicsPipeline::new(device.clone(), render_pass, &modules)
}
