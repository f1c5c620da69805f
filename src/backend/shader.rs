// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Blobs are read from disk at startup;
// a missing or malformed blob is a fatal setup error.

use super::VulkanDevice;
use crate::error::{RenderError, RenderResult};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V blob into words, checking size and magic number.
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> RenderResult<Vec<u32>> {
    let invalid = |reason: String| RenderError::Shader {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(invalid(format!(
            "size {} is not a non-zero multiple of 4",
            bytes.len()
        )));
    }

    // read_spv copies into an aligned buffer and fixes endianness
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(invalid(format!("bad magic number {:#010x}", other))),
        None => Err(invalid("empty module".to_string())),
    }
}

/// Owned shader module, destroyed once the pipeline has been built.
pub struct ShaderModule {
    device: Arc<VulkanDevice>,
    module: vk::ShaderModule,
}

pub fn read_spirv_file(path: &Path) -> RenderResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| RenderError::Shader {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_spirv(path, &bytes)
}

impl ShaderModule {
    pub fn load(device: Arc<VulkanDevice>, path: &Path) -> RenderResult<Self> {
        let code = read_spirv_file(path)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }?;

        log::debug!("Loaded shader {:?} ({} words)", path, code.len());

        Ok(Self { device, module })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn valid_header_parses() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(Path::new("mesh.vert.spv"), &bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn unaligned_blob_is_rejected() {
        let err = parse_spirv(Path::new("mesh.frag.spv"), &[0x03, 0x02, 0x23]).unwrap_err();
        assert!(matches!(err, RenderError::Shader { .. }));
        assert!(err.to_string().contains("mesh.frag.spv"));
    }

    #[test]
    fn empty_blob_is_rejected() {
        assert!(parse_spirv(Path::new("empty.spv"), &[]).is_err());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = words_to_bytes(&[0xdead_beef, 0, 0, 0]);
        let err = parse_spirv(Path::new("bogus.spv"), &bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_spirv_file(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(err.to_string().contains("shader.spv"));
    }
}
