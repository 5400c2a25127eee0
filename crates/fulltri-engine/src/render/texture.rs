//! CPU-side texture data and image file loading.

use std::path::Path;

use anyhow::{Context, Result};
use half::f16;

/// Channel layout of pixel data.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PixelFormat {
    R,
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn channels(self) -> u32 {
        match self {
            PixelFormat::R => 1,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// Component type of pixel data.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PixelType {
    Ubyte,
    Float,
}

/// GPU format used for a pixel format and component type.
///
/// There is no three-channel texture format, so RGB data is stored as RGBA
/// with alpha 1. Float data is stored as half floats.
pub fn texture_format(format: PixelFormat, ty: PixelType) -> wgpu::TextureFormat {
    match (format, ty) {
        (PixelFormat::R, PixelType::Ubyte) => wgpu::TextureFormat::R8Unorm,
        (_, PixelType::Ubyte) => wgpu::TextureFormat::Rgba8Unorm,
        (PixelFormat::R, PixelType::Float) => wgpu::TextureFormat::R16Float,
        (_, PixelType::Float) => wgpu::TextureFormat::Rgba16Float,
    }
}

/// Tightly packed pixels ready for upload, rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub bytes: Vec<u8>,
}

impl TextureData {
    /// Loads an image file.
    ///
    /// The file must have exactly as many channels as `internal` asks for;
    /// `input` names the layout the caller expects to hand over and must
    /// match `internal`.
    pub fn load(
        path: impl AsRef<Path>,
        internal: PixelFormat,
        input: PixelFormat,
        ty: PixelType,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        Self::decode(&bytes, internal, input, ty)
            .with_context(|| format!("failed to load image {}", path.display()))
    }

    /// Decodes an in-memory image file. See [`TextureData::load`].
    pub fn decode(
        bytes: &[u8],
        internal: PixelFormat,
        input: PixelFormat,
        ty: PixelType,
    ) -> Result<Self> {
        anyhow::ensure!(
            internal == input,
            "internal format {internal:?} differs from input format {input:?}"
        );

        let img = image::load_from_memory(bytes).context("failed to decode image")?;
        let channels = u32::from(img.color().channel_count());
        anyhow::ensure!(
            channels == internal.channels(),
            "image has {channels} channels, expected {}",
            internal.channels()
        );

        let (width, height) = (img.width(), img.height());
        match (internal, ty) {
            (PixelFormat::R, PixelType::Ubyte) => {
                Self::from_u8(width, height, internal, &img.to_luma8().into_raw())
            }
            (PixelFormat::Rgb, PixelType::Ubyte) => {
                Self::from_u8(width, height, internal, &img.to_rgb8().into_raw())
            }
            (PixelFormat::Rgba, PixelType::Ubyte) => {
                Self::from_u8(width, height, internal, &img.to_rgba8().into_raw())
            }
            (PixelFormat::R, PixelType::Float) => {
                let red: Vec<f32> = img.to_rgba32f().pixels().map(|p| p.0[0]).collect();
                Self::from_f32(width, height, internal, &red)
            }
            (PixelFormat::Rgb, PixelType::Float) => {
                Self::from_f32(width, height, internal, &img.to_rgb32f().into_raw())
            }
            (PixelFormat::Rgba, PixelType::Float) => {
                Self::from_f32(width, height, internal, &img.to_rgba32f().into_raw())
            }
        }
    }

    /// Wraps 8-bit components laid out as `format`.
    pub fn from_u8(width: u32, height: u32, format: PixelFormat, pixels: &[u8]) -> Result<Self> {
        check_len(width, height, format, pixels.len())?;
        let bytes = match format {
            PixelFormat::Rgb => expand_rgb(pixels, u8::MAX),
            PixelFormat::R | PixelFormat::Rgba => pixels.to_vec(),
        };
        Ok(Self {
            width,
            height,
            format: texture_format(format, PixelType::Ubyte),
            bytes,
        })
    }

    /// Wraps float components laid out as `format`, converting them to half floats.
    pub fn from_f32(width: u32, height: u32, format: PixelFormat, pixels: &[f32]) -> Result<Self> {
        check_len(width, height, format, pixels.len())?;
        let halves: Vec<f16> = pixels.iter().copied().map(f16::from_f32).collect();
        let halves = match format {
            PixelFormat::Rgb => expand_rgb(&halves, f16::ONE),
            PixelFormat::R | PixelFormat::Rgba => halves,
        };
        Ok(Self {
            width,
            height,
            format: texture_format(format, PixelType::Float),
            bytes: bytemuck::cast_slice(&halves).to_vec(),
        })
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.format.block_copy_size(None).unwrap_or(4)
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.bytes_per_pixel()
    }
}

fn check_len(width: u32, height: u32, format: PixelFormat, len: usize) -> Result<()> {
    anyhow::ensure!(width > 0 && height > 0, "texture size {width}x{height} is empty");
    let expected = width as usize * height as usize * format.channels() as usize;
    anyhow::ensure!(
        len == expected,
        "{width}x{height} {format:?} needs {expected} components, got {len}"
    );
    Ok(())
}

fn expand_rgb<T: Copy>(rgb: &[T], alpha: T) -> Vec<T> {
    let mut out = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(px);
        out.push(alpha);
    }
    out
}
