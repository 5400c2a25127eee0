//! Copying rendered pixels back to the CPU and saving them.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc;

use anyhow::{Context, Result};
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{ExtendedColorType, ImageEncoder, RgbImage};

/// Row pitch for a texture-to-buffer copy, rounded up to
/// `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Drops the per-row padding of a mapped readback buffer.
pub fn strip_padding(data: &[u8], width: u32, height: u32, bytes_per_pixel: u32, padded_row: u32) -> Vec<u8> {
    let row = (width * bytes_per_pixel) as usize;
    let mut out = Vec::with_capacity(row * height as usize);
    for chunk in data.chunks(padded_row as usize).take(height as usize) {
        out.extend_from_slice(&chunk[..row]);
    }
    out
}

/// Converts 4-byte pixels in `format` to tightly packed RGB8.
pub fn to_rgb8(pixels: &[u8], format: wgpu::TextureFormat) -> Result<Vec<u8>> {
    use wgpu::TextureFormat as F;
    let swap = match format {
        F::Rgba8Unorm | F::Rgba8UnormSrgb => false,
        F::Bgra8Unorm | F::Bgra8UnormSrgb => true,
        other => anyhow::bail!("cannot convert {other:?} pixels to RGB8"),
    };
    Ok(pixels
        .chunks_exact(4)
        .flat_map(|p| if swap { [p[2], p[1], p[0]] } else { [p[0], p[1], p[2]] })
        .collect())
}

/// Reads a whole 2D texture back as an RGB image, first row at the top.
///
/// The texture needs `COPY_SRC` usage. Blocks until the GPU is done.
pub fn capture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<RgbImage> {
    let (width, height) = (texture.width(), texture.height());
    let format = texture.format();
    let bpp = format
        .block_copy_size(None)
        .with_context(|| format!("cannot read back {format:?}"))?;
    let padded_row = padded_bytes_per_row(width, bpp);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("fulltri readback buffer"),
        size: u64::from(padded_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("fulltri readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
        .context("device poll failed during readback")?;
    rx.recv()
        .context("readback callback dropped")?
        .context("failed to map readback buffer")?;

    let pixels = {
        let mapped = slice.get_mapped_range();
        strip_padding(&mapped, width, height, bpp, padded_row)
    };
    buffer.unmap();

    let rgb = to_rgb8(&pixels, format)?;
    RgbImage::from_raw(width, height, rgb).context("readback size mismatch")
}

/// Saves an image. `.ppm` files are written as binary P6; other extensions
/// go through `image`'s format detection.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    let is_ppm = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ppm"));

    if is_ppm {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        PnmEncoder::new(BufWriter::new(file))
            .with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary))
            .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
            .with_context(|| format!("failed to write {}", path.display()))?;
    } else {
        img.save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_256_bytes() {
        assert_eq!(padded_bytes_per_row(512, 4), 2048);
        assert_eq!(padded_bytes_per_row(3, 4), 256);
        assert_eq!(padded_bytes_per_row(65, 4), 512);
    }

    #[test]
    fn strip_padding_keeps_pixel_bytes() {
        let padded = 256u32;
        let mut data = vec![0xAAu8; (padded * 2) as usize];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let out = strip_padding(&data, 2, 2, 4, padded);
        assert_eq!(out, (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn bgra_is_swizzled() {
        let px = [10, 20, 30, 255, 1, 2, 3, 0];
        assert_eq!(to_rgb8(&px, wgpu::TextureFormat::Bgra8Unorm).unwrap(), vec![30, 20, 10, 3, 2, 1]);
        assert_eq!(to_rgb8(&px, wgpu::TextureFormat::Rgba8UnormSrgb).unwrap(), vec![10, 20, 30, 1, 2, 3]);
        assert!(to_rgb8(&px, wgpu::TextureFormat::Rgba16Float).is_err());
    }

    #[test]
    fn ppm_is_binary_p6() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.ppm");
        let img = RgbImage::from_raw(2, 1, vec![255, 0, 0, 0, 0, 255]).unwrap();
        save_image(&img, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P6"));
        assert!(bytes.ends_with(&[255, 0, 0, 0, 0, 255]));
    }
}
