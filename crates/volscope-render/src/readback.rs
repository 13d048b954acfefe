//! Copying GPU results back to the host.

use crate::error::{RenderError, RenderResult};

/// Returns `width * 4` rounded up to [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`].
pub fn aligned_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Removes the per-row padding of a texture copy.
pub fn strip_row_padding(data: &[u8], row_bytes: usize, padded_row_bytes: usize, rows: usize) -> Vec<u8> {
    let mut result = Vec::with_capacity(row_bytes * rows);
    for row in data.chunks(padded_row_bytes.max(1)).take(rows) {
        result.extend_from_slice(&row[..row_bytes.min(row.len())]);
    }
    result
}

/// Maps a `MAP_READ` buffer, copies its contents and unmaps it.
///
/// All work writing the buffer must have been submitted.
pub fn map_read(device: &wgpu::Device, buffer: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
    let buffer_slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| RenderError::Gpu(e.to_string()))?;
    rx.recv()
        .map_err(|_| RenderError::BufferMapFailed)?
        .map_err(|_| RenderError::BufferMapFailed)?;

    let data = buffer_slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}

fn staging_buffer(device: &wgpu::Device, size: u64, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    })
}

/// Reads a 2-D RGBA8 texture as tightly packed rows, top row first.
pub fn read_texture_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> RenderResult<Vec<u8>> {
    let size = texture.size();
    let (width, height) = (size.width, size.height);
    let bytes_per_row = aligned_bytes_per_row(width);
    let buffer = staging_buffer(
        device,
        u64::from(bytes_per_row) * u64::from(height),
        "frame readback",
    );

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("frame readback encoder"),
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
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let data = map_read(device, &buffer)?;
    Ok(strip_row_padding(
        &data,
        (width * 4) as usize,
        bytes_per_row as usize,
        height as usize,
    ))
}

/// Reads the first `size` bytes of a `COPY_SRC` buffer.
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    size: u64,
) -> RenderResult<Vec<u8>> {
    let buffer = staging_buffer(device, size, "buffer readback");
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("buffer readback encoder"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &buffer, 0, size);
    queue.submit(std::iter::once(encoder.finish()));
    map_read(device, &buffer)
}

/// Decodes little-endian `u32` words.
pub fn words_u32(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_alignment() {
        assert_eq!(aligned_bytes_per_row(1), 256);
        assert_eq!(aligned_bytes_per_row(64), 256);
        assert_eq!(aligned_bytes_per_row(65), 512);
    }

    #[test]
    fn test_strip_row_padding() {
        let padded = [1, 2, 0, 0, 3, 4, 0, 0];
        assert_eq!(strip_row_padding(&padded, 2, 4, 2), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_words_decode() {
        let bytes = [1, 0, 0, 0, 0, 1, 0, 0];
        assert_eq!(words_u32(&bytes), vec![1, 256]);
    }
}
