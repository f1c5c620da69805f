// Image decoding for textures
//
// Files are decoded with the `image` crate and converted to tightly packed
// RGBA8, the only texel layout the transfer engine uploads.

use crate::error::{RenderError, RenderResult};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn decode_file(path: &Path) -> RenderResult<Self> {
        let image = image::open(path).map_err(|e| RenderError::asset(path, e))?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        log::debug!("Decoded {:?}: {}x{}", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Single opaque texel, used as the "no texture" slot.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Reject images the device can't hold in a single 2D image.
    pub fn check_extent(&self, path: &Path, max_dimension: u32) -> RenderResult<()> {
        if self.width > max_dimension || self.height > max_dimension {
            return Err(RenderError::asset(
                path,
                format!(
                    "{}x{} exceeds device limit {}",
                    self.width, self.height, max_dimension
                ),
            ));
        }
        Ok(())
    }
}

/// Materials often carry authoring-machine paths; only the file name is kept.
pub fn texture_file_name(material_path: &str) -> &str {
    material_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(material_path)
}
