//! Backend-neutral GPU resource handles.
//!
//! The binding cache only needs to know whether two handles refer to the same
//! resource, so every handle carries a process-unique [`HandleId`] assigned at
//! creation. Dropping the last clone of a handle destroys the resource.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for logging.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Minimal interface the binding cache needs from a GPU resource.
pub trait ResourceHandle: Clone {
    /// Identity used for change detection.
    fn id(&self) -> HandleId;

    /// Returns whether both handles refer to the same resource.
    fn same_resource(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

/// A wgpu texture with its default view.
#[derive(Debug, Clone)]
pub struct GpuTexture {
    id: HandleId,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    /// Wraps a texture, creating its default view.
    pub fn new(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            id: HandleId::next(),
            texture,
            view,
        }
    }

    /// Texture extent.
    pub fn size(&self) -> wgpu::Extent3d {
        self.texture.size()
    }
}

/// A wgpu buffer.
#[derive(Debug, Clone)]
pub struct GpuBuffer {
    id: HandleId,
    pub buffer: wgpu::Buffer,
}

impl GpuBuffer {
    /// Wraps a buffer.
    pub fn new(buffer: wgpu::Buffer) -> Self {
        Self {
            id: HandleId::next(),
            buffer,
        }
    }

    /// Buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.buffer.size()
    }
}

/// A wgpu sampler.
#[derive(Debug, Clone)]
pub struct GpuSampler {
    id: HandleId,
    pub sampler: wgpu::Sampler,
}

impl GpuSampler {
    /// Wraps a sampler.
    pub fn new(sampler: wgpu::Sampler) -> Self {
        Self {
            id: HandleId::next(),
            sampler,
        }
    }
}

/// Any resource that can occupy a handle-typed slot.
#[derive(Debug, Clone)]
pub enum GpuResource {
    Texture(GpuTexture),
    Buffer(GpuBuffer),
    Sampler(GpuSampler),
}

impl ResourceHandle for GpuResource {
    fn id(&self) -> HandleId {
        match self {
            Self::Texture(t) => t.id,
            Self::Buffer(b) => b.id,
            Self::Sampler(s) => s.id,
        }
    }
}

impl From<GpuTexture> for GpuResource {
    fn from(value: GpuTexture) -> Self {
        Self::Texture(value)
    }
}

impl From<GpuBuffer> for GpuResource {
    fn from(value: GpuBuffer) -> Self {
        Self::Buffer(value)
    }
}

impl From<GpuSampler> for GpuResource {
    fn from(value: GpuSampler) -> Self {
        Self::Sampler(value)
    }
}
