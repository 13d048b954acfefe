use std::collections::HashMap;

use crate::binding::{BindingBackend, BindingValue, ResourceSlot, SlotKind, SLOT_COUNT};
use crate::error::{RenderError, RenderResult};
use crate::pipelines::PipelineId;
use crate::resource::GpuResource;

/// wgpu side of the binding table.
///
/// Byte-valued slots live in backend-owned buffers that are rewritten in
/// place. Handle-valued slots are assembled into one bind group per kernel,
/// rebuilt only after a slot the kernel uses changed.
pub struct WgpuBindings {
    device: wgpu::Device,
    queue: wgpu::Queue,
    byte_buffers: [Option<wgpu::Buffer>; SLOT_COUNT],
    handles: [Option<GpuResource>; SLOT_COUNT],
    bind_groups: HashMap<PipelineId, wgpu::BindGroup>,
    uploads: u64,
}

impl WgpuBindings {
    /// Allocates the buffers behind every byte-valued slot.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let byte_buffers = std::array::from_fn(|i| {
            let slot = ResourceSlot::ALL[i];
            let (size, usage) = match slot.kind() {
                SlotKind::Uniform(size) => (size, wgpu::BufferUsages::UNIFORM),
                SlotKind::StorageBytes(size) => (size, wgpu::BufferUsages::STORAGE),
                _ => return None,
            };
            Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{slot:?} bytes")),
                size,
                usage: usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }))
        });
        Self {
            device: device.clone(),
            queue: queue.clone(),
            byte_buffers,
            handles: std::array::from_fn(|_| None),
            bind_groups: HashMap::new(),
            uploads: 0,
        }
    }

    /// Number of `set_resource` calls that reached the GPU.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Resource currently at a handle slot.
    pub fn handle(&self, slot: ResourceSlot) -> Option<&GpuResource> {
        self.handles[slot.index()].as_ref()
    }

    /// Bind group of `id`, rebuilt if a slot it uses changed since the last call.
    pub fn bind_group(
        &mut self,
        id: PipelineId,
        layout: &wgpu::BindGroupLayout,
    ) -> RenderResult<wgpu::BindGroup> {
        if let Some(group) = self.bind_groups.get(&id) {
            return Ok(group.clone());
        }
        let group = {
            let entries = id
                .slots()
                .iter()
                .map(|&slot| {
                    Ok(wgpu::BindGroupEntry {
                        binding: slot.binding(),
                        resource: self.resource(slot)?,
                    })
                })
                .collect::<RenderResult<Vec<_>>>()?;
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(id.label()),
                layout,
                entries: &entries,
            })
        };
        log::debug!("rebuilt {} bind group", id.label());
        self.bind_groups.insert(id, group.clone());
        Ok(group)
    }

    fn resource(&self, slot: ResourceSlot) -> RenderResult<wgpu::BindingResource<'_>> {
        if let Some(buffer) = &self.byte_buffers[slot.index()] {
            return Ok(buffer.as_entire_binding());
        }
        match &self.handles[slot.index()] {
            Some(GpuResource::Texture(t)) => Ok(wgpu::BindingResource::TextureView(&t.view)),
            Some(GpuResource::Buffer(b)) => Ok(b.buffer.as_entire_binding()),
            Some(GpuResource::Sampler(s)) => Ok(wgpu::BindingResource::Sampler(&s.sampler)),
            None => Err(RenderError::SlotUnbound(slot)),
        }
    }
}

impl BindingBackend<GpuResource> for WgpuBindings {
    fn set_resource(
        &mut self,
        slot: ResourceSlot,
        value: &BindingValue<GpuResource>,
    ) -> RenderResult<()> {
        match value {
            BindingValue::Bytes(bytes) => {
                let buffer = self.byte_buffers[slot.index()]
                    .as_ref()
                    .ok_or(RenderError::SlotKindMismatch(slot))?;
                if bytes.len() as u64 != buffer.size() {
                    return Err(RenderError::SlotKindMismatch(slot));
                }
                self.queue.write_buffer(buffer, 0, bytes);
            }
            BindingValue::Handle(resource) => {
                let fits = matches!(
                    (slot.kind(), resource),
                    (SlotKind::Texture | SlotKind::StorageTexture, GpuResource::Texture(_))
                        | (SlotKind::Buffer, GpuResource::Buffer(_))
                        | (SlotKind::Sampler, GpuResource::Sampler(_))
                );
                if !fits {
                    return Err(RenderError::SlotKindMismatch(slot));
                }
                self.handles[slot.index()] = Some(resource.clone());
                self.bind_groups.retain(|id, _| !id.uses(slot));
            }
        }
        self.uploads += 1;
        Ok(())
    }
}
