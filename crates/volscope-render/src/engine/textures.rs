use volscope_core::VolumeDataset;

use super::{scoped, VolumeInfo, VolumeRenderEngine};
use crate::binding::{BindingValue, ResourceSlot};
use crate::error::{RenderError, RenderResult};
use crate::resource::{GpuBuffer, GpuTexture};

/// Creates a `width x 1` RGBA8 lookup texture from baked bytes.
pub(crate) fn create_lut_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    rgba8: &[u8],
    label: &str,
) -> RenderResult<GpuTexture> {
    let width = (rgba8.len() / 4) as u32;
    if width == 0 || rgba8.len() % 4 != 0 {
        return Err(RenderError::TextureCreationFailed(format!(
            "{label}: {} bytes is not a whole number of texels",
            rgba8.len()
        )));
    }
    let size = wgpu::Extent3d {
        width,
        height: 1,
        depth_or_array_layers: 1,
    };
    let texture = scoped(device, RenderError::TextureCreationFailed, || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    })?;
    write_2d(queue, &texture, rgba8, width * 4, size);
    Ok(GpuTexture::new(texture))
}

/// Creates a single-channel overlay mask.
pub(crate) fn create_mask_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    mask: &[u8],
    label: &str,
) -> RenderResult<GpuTexture> {
    if width == 0 || height == 0 || mask.len() != (width * height) as usize {
        return Err(RenderError::TextureCreationFailed(format!(
            "{label}: expected {width}x{height} bytes, got {}",
            mask.len()
        )));
    }
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = scoped(device, RenderError::TextureCreationFailed, || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    })?;
    write_2d(queue, &texture, mask, width, size);
    Ok(GpuTexture::new(texture))
}

fn write_2d(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    data: &[u8],
    bytes_per_row: u32,
    size: wgpu::Extent3d,
) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row),
            rows_per_image: Some(size.height),
        },
        size,
    );
}

/// Creates the storage texture the kernels write into.
pub(crate) fn create_output_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> RenderResult<GpuTexture> {
    let max = device.limits().max_texture_dimension_2d;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(RenderError::TextureCreationFailed(format!(
            "output size {width}x{height} outside 1..={max}"
        )));
    }
    let texture = scoped(device, RenderError::TextureCreationFailed, || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("volume output"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: crate::OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    })?;
    log::debug!("created {width}x{height} output texture");
    Ok(GpuTexture::new(texture))
}

/// Creates a read-write storage buffer that can be cleared and read back.
pub(crate) fn create_storage_buffer(
    device: &wgpu::Device,
    size: u64,
    label: &str,
) -> RenderResult<GpuBuffer> {
    let buffer = scoped(device, RenderError::BufferCreationFailed, || {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    })?;
    Ok(GpuBuffer::new(buffer))
}

impl VolumeRenderEngine {
    /// Uploads a volume as a read-only signed 16-bit 3-D texture and binds it.
    ///
    /// On failure the previously uploaded volume stays bound.
    pub fn upload_volume(&mut self, volume: &VolumeDataset) -> RenderResult<()> {
        let dims = volume.dimensions();
        let max = self.device.limits().max_texture_dimension_3d;
        if dims.max_element() > max {
            return Err(RenderError::TextureCreationFailed(format!(
                "volume {}x{}x{} exceeds 3-D texture limit {max}",
                dims.x, dims.y, dims.z
            )));
        }
        let size = wgpu::Extent3d {
            width: dims.x,
            height: dims.y,
            depth_or_array_layers: dims.z,
        };
        let device = &self.device;
        let texture = scoped(device, RenderError::TextureCreationFailed, || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("volume"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D3,
                format: wgpu::TextureFormat::R16Sint,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(volume.voxels()),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(dims.x * 2),
                rows_per_image: Some(dims.y),
            },
            size,
        );

        self.bind(ResourceSlot::Volume, BindingValue::Handle(GpuTexture::new(texture).into()))?;
        self.volume = Some(VolumeInfo {
            dimensions: dims,
            intensity_range: volume.intensity_range(),
        });
        log::info!("uploaded {}x{}x{} volume", dims.x, dims.y, dims.z);
        Ok(())
    }

    /// Replaces a channel's transfer-function lookup texture with baked RGBA8 texels.
    pub fn upload_transfer_lut(&mut self, channel: usize, rgba8: &[u8]) -> RenderResult<()> {
        let slot =
            ResourceSlot::transfer_lut(channel).ok_or(RenderError::ChannelOutOfRange(channel))?;
        let texture = create_lut_texture(&self.device, &self.queue, rgba8, "transfer lut")?;
        self.bind(slot, BindingValue::Handle(texture.into()))?;
        Ok(())
    }

    /// Writes a channel's tone-curve samples. Unchanged samples are not re-uploaded.
    pub fn upload_tone_lut(&mut self, channel: usize, samples: &[f32]) -> RenderResult<bool> {
        let slot = ResourceSlot::tone_lut(channel).ok_or(RenderError::ChannelOutOfRange(channel))?;
        self.bind(slot, BindingValue::from_slice(samples))
    }

    /// Sets the MPR overlay mask, or clears it with `None`.
    pub fn set_overlay_mask(&mut self, mask: Option<(u32, u32, &[u8])>) -> RenderResult<()> {
        let texture = match mask {
            Some((width, height, data)) => create_mask_texture(
                &self.device,
                &self.queue,
                width,
                height,
                data,
                "overlay mask",
            )?,
            None => self.placeholder_mask.clone(),
        };
        self.bind(ResourceSlot::OverlayMask, BindingValue::Handle(texture.into()))?;
        Ok(())
    }

    /// Makes sure the output texture has the requested size and is bound.
    pub(crate) fn ensure_output(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let device = &self.device;
        let (texture, fresh) = self
            .output
            .ensure((width, height), |(w, h)| create_output_texture(device, w, h))?;
        let texture = texture.clone();
        if fresh {
            self.table.mark_dirty(ResourceSlot::Output);
        }
        self.bind(ResourceSlot::Output, BindingValue::Handle(texture.into()))?;
        Ok(())
    }

    /// Size of the current output texture.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.output.get().map(|(_, size)| size)
    }
}
