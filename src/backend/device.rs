// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (first suitable GPU for the surface)
// - Logical device + graphics/present queue creation
// - Command pool for the graphics family
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use super::surface::Surface;
use super::Instance;

/// Extensions a device must offer to be selected
pub fn required_device_extensions() -> [&'static CStr; 2] {
    [vk::KhrSwapchainFn::name(), vk::KhrMaintenance1Fn::name()]
}

/// Enabled when present, ignored otherwise
pub fn optional_device_extensions() -> [&'static CStr; 1] {
    [vk::ExtMemoryBudgetFn::name()]
}

/// Queue families used for rendering and presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Pick queue families. A family that can do both is preferred, so the
    /// swapchain images can stay in exclusive sharing mode.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            let graphics = family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = supports_present(index)?;

            if graphics && present {
                log::debug!("Graphics and present queue family found at index: {}", index);
                return Ok(Self {
                    graphics: Some(index),
                    present: Some(index),
                });
            }
            if graphics && indices.graphics.is_none() {
                log::debug!("Graphics queue family found at index: {}", index);
                indices.graphics = Some(index);
            }
            if present && indices.present.is_none() {
                log::debug!("Present queue family found at index: {}", index);
                indices.present = Some(index);
            }
        }

        Ok(indices)
    }

    /// Distinct families, one queue is created for each
    pub fn unique(&self) -> BTreeSet<u32> {
        self.graphics.into_iter().chain(self.present).collect()
    }
}

/// Required extensions missing from `available`
pub fn missing_extensions<'a>(
    required: &[&'a CStr],
    available: &[vk::ExtensionProperties],
) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|&name| {
            !available
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
        })
        .collect()
}

/// Sum of device-local heap sizes, in bytes
pub fn device_local_memory(memory: &vk::PhysicalDeviceMemoryProperties) -> vk::DeviceSize {
    memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub command_pool: vk::CommandPool,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,

    pub properties: vk::PhysicalDeviceProperties,
    instance: Arc<Instance>,
}

impl VulkanDevice {
    pub fn new(instance: Arc<Instance>, surface: &Surface) -> Result<Arc<Self>> {
        log::info!("Initializing Vulkan Device...");

        let (physical_device, queue_families, extensions) =
            Self::pick_physical_device(&instance, surface)?;

        let properties = unsafe { instance.raw().get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.raw().get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {} ({:?})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            properties.device_type
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "VRAM: {:.2} GB",
            device_local_memory(&memory_properties) as f64 / (1024.0 * 1024.0 * 1024.0)
        );

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families, &extensions)?;

        let command_pool = match Self::create_command_pool(&device, queue_families) {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let allocator = match Self::create_allocator(&instance, physical_device, &device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_command_pool(command_pool, None);
                    device.destroy_device(None);
                }
                return Err(e);
            }
        };

        log::info!("Vulkan Device initialized successfully.");

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            command_pool,
            device,
            physical_device,
            graphics_queue,
            present_queue,
            queue_families,
            properties,
            instance,
        }))
    }

    /// First suitable device in enumeration order
    fn pick_physical_device(
        instance: &Instance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices, Vec<&'static CStr>)> {
        log::info!("Picking physical device...");
        let devices = unsafe { instance.raw().enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            log::error!("Failed to find GPUs with Vulkan support!");
            anyhow::bail!("Failed to find GPUs with Vulkan support!");
        }

        for device in devices {
            if let Some((indices, extensions)) = Self::check_suitability(instance, surface, device)? {
                log::info!("Physical device selected.");
                return Ok((device, indices, extensions));
            }
        }

        log::error!("Failed to find a suitable GPU!");
        anyhow::bail!("Failed to find a suitable GPU!")
    }

    /// Queue families and extensions to enable, or `None` if unsuitable
    fn check_suitability(
        instance: &Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Option<(QueueFamilyIndices, Vec<&'static CStr>)>> {
        let props = unsafe { instance.raw().get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
        log::info!("Checking if device is suitable: {}", name);

        let families =
            unsafe { instance.raw().get_physical_device_queue_family_properties(device) };
        let indices =
            QueueFamilyIndices::find(&families, |index| surface.supports_present(device, index))?;

        let available = unsafe { instance.raw().enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let missing = missing_extensions(&required_device_extensions(), &available);
        for ext in &missing {
            log::warn!("Missing required device extension: {}", ext.to_string_lossy());
        }

        let swapchain_adequate =
            missing.is_empty() && surface.query_support(device)?.is_adequate();

        let suitable = indices.is_complete() && missing.is_empty() && swapchain_adequate;
        log::info!(
            "Device suitability: {}",
            if suitable { "Suitable" } else { "Not Suitable" }
        );

        if !suitable {
            return Ok(None);
        }

        let mut extensions = required_device_extensions().to_vec();
        let optional = optional_device_extensions();
        let unavailable = missing_extensions(&optional, &available);
        extensions.extend(optional.into_iter().filter(|ext| !unavailable.contains(ext)));

        Ok(Some((indices, extensions)))
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
        extensions: &[&CStr],
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        log::info!("Creating logical device...");
        let graphics_family = queue_families.graphics.context("No graphics queue family")?;
        let present_family = queue_families.present.context("No present queue family")?;

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        log::info!("Device extensions:");
        for ext in extensions {
            log::info!("  {}", ext.to_string_lossy());
        }
        let extension_names: Vec<_> = extensions.iter().map(|ext| ext.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = super::check("Logical device creation", unsafe {
            instance.raw().create_device(physical_device, &create_info, None)
        })
        .context("Failed to create logical device!")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        log::info!("Logical device created successfully.");
        Ok((device, graphics_queue, present_queue))
    }

    fn create_command_pool(
        device: &ash::Device,
        queue_families: QueueFamilyIndices,
    ) -> Result<vk::CommandPool> {
        log::info!("Creating command pool...");
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_families.graphics.context("No graphics queue family")?)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = super::check("Command pool creation", unsafe {
            device.create_command_pool(&pool_info, None)
        })
        .context("Failed to create command pool!")?;

        log::info!("Command pool created successfully.");
        Ok(pool)
    }

    fn create_allocator(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw().clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(allocator)
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan Device...");

        let _ = self.wait_idle();

        unsafe {
            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_command_pool(self.command_pool, None);
            log::info!("Command pool destroyed successfully.");

            self.device.destroy_device(None);
            log::info!("Logical device destroyed successfully.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i != 0)).unwrap();

        assert_eq!(indices.graphics, Some(2));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique().len(), 1);
    }

    #[test]
    fn splits_graphics_and_present_when_no_family_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 1)).unwrap();

        assert!(indices.is_complete());
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn incomplete_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert!(!indices.is_complete());
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let indices = QueueFamilyIndices::find(&[empty], |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, None);
        assert_eq!(indices.present, Some(0));
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| anyhow::bail!("surface lost"));
        assert!(result.is_err());
    }

    #[test]
    fn reports_missing_extensions() {
        let available = [extension(vk::KhrSwapchainFn::name())];
        let missing = missing_extensions(&required_device_extensions(), &available);
        assert_eq!(missing, vec![vk::KhrMaintenance1Fn::name()]);

        let available = [
            extension(vk::KhrMaintenance1Fn::name()),
            extension(vk::KhrSwapchainFn::name()),
        ];
        assert!(missing_extensions(&required_device_extensions(), &available).is_empty());
    }

    #[test]
    fn sums_only_device_local_heaps() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 3,
            ..Default::default()
        };
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        memory.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        memory.memory_heaps[2] = vk::MemoryHeap {
            size: 256 << 20,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        // Beyond memory_heap_count, must be ignored
        memory.memory_heaps[3] = vk::MemoryHeap {
            size: 1 << 40,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        assert_eq!(device_local_memory(&memory), (8 << 30) + (256 << 20));
    }
}
