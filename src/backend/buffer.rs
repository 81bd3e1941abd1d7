// GPU buffers and the vertex format
//
// Memory comes from the device's gpu-allocator instance; a Buffer frees its
// allocation when dropped.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec3};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::mem::{offset_of, size_of};
use std::sync::Arc;
use super::VulkanDevice;

/// Interleaved position + color, matching `shaders/triangle.vert`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: [f32; 2], color: [f32; 3]) -> Self {
        Self {
            position: Vec2::new(position[0], position[1]),
            color: Vec3::new(color[0], color[1], color[2]),
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position (location 0)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Self, position) as u32)
                .build(),
            // Color (location 1)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Self, color) as u32)
                .build(),
        ]
    }
}

/// Clockwise in Vulkan's y-down clip space, so it survives back-face culling
pub const TRIANGLE: [Vertex; 3] = [
    Vertex::new([0.0, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 1.0, 0.0]),
    Vertex::new([-0.5, 0.5], [0.0, 0.0, 1.0]),
];

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = super::check("Buffer creation", unsafe {
            device.raw().create_buffer(&buffer_info, None)
        })
        .context("Failed to create buffer")?;

        // Drop destroys the buffer if allocation or binding fails
        let mut this = Self {
            buffer,
            size,
            allocation: None,
            device,
        };

        let requirements = unsafe { this.device.raw().get_buffer_memory_requirements(buffer) };

        let allocation = this
            .device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for buffer '{}'", name))?;

        let bound = unsafe {
            this.device
                .raw()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        this.allocation = Some(allocation);
        super::check("Buffer memory binding", bound).context("Failed to bind buffer memory")?;

        Ok(this)
    }

    /// Host-visible buffer filled with `data`
    pub fn with_data<T: Copy>(
        device: Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data);
        let mut buffer = Self::new(
            device,
            size as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
            name,
        )?;

        let mapped = buffer
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        // Safety: T is Copy (plain data) and the slice covers exactly `size` bytes
        let bytes = unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, size) };
        mapped[..size].copy_from_slice(bytes);

        Ok(buffer)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe {
            self.device.raw().destroy_buffer(self.buffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 20);
        assert_eq!(Vertex::binding_description().stride, 20);

        let [position, color] = Vertex::attribute_descriptions();
        assert_eq!((position.location, position.offset), (0, 0));
        assert_eq!(position.format, vk::Format::R32G32_SFLOAT);
        assert_eq!((color.location, color.offset), (1, 8));
        assert_eq!(color.format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn triangle_winds_clockwise_in_framebuffer_space() {
        let [a, b, c] = TRIANGLE.map(|v| v.position);
        // y points down in framebuffer space, so a positive perp dot is clockwise
        let cross = (b - a).perp_dot(c - a);
        assert!(cross > 0.0);
    }
}
