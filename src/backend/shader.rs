// Shader module loading and management
//
// Vulkan consumes SPIR-V bytecode. Modules are loaded from compiled .spv
// files (see build.rs) and destroyed when dropped; the pipeline only needs
// them while it is being created.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use super::VulkanDevice;

/// Entry point every stage is compiled with
pub const ENTRY_POINT: &CStr = c"main";

/// Decode SPIR-V bytes into words, checking alignment and the magic number
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V bytecode")
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn from_file(
        device: Arc<VulkanDevice>,
        path: impl AsRef<Path>,
        stage: vk::ShaderStageFlags,
    ) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading {:?} shader from {:?}", stage, path);

        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader file: {:?}", path))?;

        Self::from_spirv(device, &bytes, stage)
            .with_context(|| format!("Failed to load shader: {:?}", path))
    }

    pub fn from_spirv(
        device: Arc<VulkanDevice>,
        bytes: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> Result<Self> {
        let code = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = super::check("Shader module creation", unsafe {
            device.raw().create_shader_module(&create_info, None)
        })
        .context("Failed to create shader module!")?;

        Ok(Self {
            module,
            stage,
            device,
        })
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn header_bytes(magic: u32) -> Vec<u8> {
        [magic, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    #[test]
    fn decodes_words() {
        let words = parse_spirv(&header_bytes(SPIRV_MAGIC)).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
    }

    #[test]
    fn rejects_truncated_bytecode() {
        let mut bytes = header_bytes(SPIRV_MAGIC);
        bytes.pop();
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(parse_spirv(&header_bytes(0xDEAD_BEEF)).is_err());
    }

    #[test]
    fn entry_point_is_main() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
