//! Resource binding cache.
//!
//! Kernels see a fixed table of resource slots. [`BindingTable`] remembers the
//! last value bound to every slot and forwards a bind to the backend only when
//! the value changed: byte-valued slots compare by content, handle-valued
//! slots by resource identity. A slot can be forced to re-upload with
//! [`BindingTable::mark_dirty`].

use crate::error::{RenderError, RenderResult};
use crate::resource::ResourceHandle;

/// Every resource a kernel can reference. The discriminant is the WGSL binding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceSlot {
    Parameters = 0,
    Camera = 1,
    Volume = 2,
    Sampler = 3,
    TransferLut0 = 4,
    TransferLut1 = 5,
    TransferLut2 = 6,
    TransferLut3 = 7,
    ToneLut0 = 8,
    ToneLut1 = 9,
    ToneLut2 = 10,
    ToneLut3 = 11,
    Output = 12,
    OverlayMask = 13,
    MprParameters = 14,
    HistogramParameters = 15,
    HistogramBins = 16,
}

/// Number of slots in the table.
pub const SLOT_COUNT: usize = 17;

/// What a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Bytes written into a backend-owned uniform buffer of the given size.
    Uniform(u64),
    /// Bytes written into a backend-owned read-only storage buffer of the given size.
    StorageBytes(u64),
    /// A sampled texture handle.
    Texture,
    /// A write-only storage texture handle.
    StorageTexture,
    /// A read-write storage buffer handle.
    Buffer,
    /// A sampler handle.
    Sampler,
}

impl ResourceSlot {
    /// All slots in binding order.
    pub const ALL: [Self; SLOT_COUNT] = [
        Self::Parameters,
        Self::Camera,
        Self::Volume,
        Self::Sampler,
        Self::TransferLut0,
        Self::TransferLut1,
        Self::TransferLut2,
        Self::TransferLut3,
        Self::ToneLut0,
        Self::ToneLut1,
        Self::ToneLut2,
        Self::ToneLut3,
        Self::Output,
        Self::OverlayMask,
        Self::MprParameters,
        Self::HistogramParameters,
        Self::HistogramBins,
    ];

    /// Table index and WGSL binding number.
    pub fn index(self) -> usize {
        self as usize
    }

    /// WGSL binding number.
    pub fn binding(self) -> u32 {
        self as u32
    }

    /// Transfer function slot for a channel.
    pub fn transfer_lut(channel: usize) -> Option<Self> {
        [
            Self::TransferLut0,
            Self::TransferLut1,
            Self::TransferLut2,
            Self::TransferLut3,
        ]
        .get(channel)
        .copied()
    }

    /// Tone lookup slot for a channel.
    pub fn tone_lut(channel: usize) -> Option<Self> {
        [Self::ToneLut0, Self::ToneLut1, Self::ToneLut2, Self::ToneLut3]
            .get(channel)
            .copied()
    }

    /// What the slot holds.
    pub fn kind(self) -> SlotKind {
        match self {
            Self::Parameters => SlotKind::Uniform(
                std::mem::size_of::<volscope_core::RenderParameters>() as u64,
            ),
            Self::Camera => {
                SlotKind::Uniform(std::mem::size_of::<volscope_core::CameraUniforms>() as u64)
            }
            Self::MprParameters => {
                SlotKind::Uniform(std::mem::size_of::<volscope_core::MprUniforms>() as u64)
            }
            Self::HistogramParameters => SlotKind::Uniform(
                std::mem::size_of::<crate::engine::HistogramUniforms>() as u64,
            ),
            Self::ToneLut0 | Self::ToneLut1 | Self::ToneLut2 | Self::ToneLut3 => {
                SlotKind::StorageBytes((volscope_core::tone_curve::TONE_SAMPLES * 4) as u64)
            }
            Self::Volume
            | Self::TransferLut0
            | Self::TransferLut1
            | Self::TransferLut2
            | Self::TransferLut3
            | Self::OverlayMask => SlotKind::Texture,
            Self::Output => SlotKind::StorageTexture,
            Self::HistogramBins => SlotKind::Buffer,
            Self::Sampler => SlotKind::Sampler,
        }
    }

    /// Whether the slot is byte-valued.
    pub fn holds_bytes(self) -> bool {
        matches!(self.kind(), SlotKind::Uniform(_) | SlotKind::StorageBytes(_))
    }
}

/// A value bound to a slot.
#[derive(Debug, Clone)]
pub enum BindingValue<H> {
    /// Plain bytes, compared by content.
    Bytes(Vec<u8>),
    /// A GPU resource, compared by identity.
    Handle(H),
}

impl<H: ResourceHandle> BindingValue<H> {
    /// Byte value from a POD struct.
    pub fn from_pod<T: bytemuck::Pod>(value: &T) -> Self {
        Self::Bytes(bytemuck::bytes_of(value).to_vec())
    }

    /// Byte value from a POD slice.
    pub fn from_slice<T: bytemuck::Pod>(values: &[T]) -> Self {
        Self::Bytes(bytemuck::cast_slice(values).to_vec())
    }

    /// Returns whether binding `other` would be redundant.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Handle(a), Self::Handle(b)) => a.same_resource(b),
            _ => false,
        }
    }

    /// The handle, if handle-valued.
    pub fn handle(&self) -> Option<&H> {
        match self {
            Self::Handle(h) => Some(h),
            Self::Bytes(_) => None,
        }
    }
}

/// The GPU-side "set resource at index" operation.
pub trait BindingBackend<H> {
    /// Makes `value` visible to kernels at `slot`.
    fn set_resource(&mut self, slot: ResourceSlot, value: &BindingValue<H>) -> RenderResult<()>;
}

#[derive(Debug, Clone)]
struct SlotEntry<H> {
    value: Option<BindingValue<H>>,
    dirty: bool,
}

impl<H> Default for SlotEntry<H> {
    fn default() -> Self {
        Self {
            value: None,
            dirty: true,
        }
    }
}

/// Fixed-size table of slots indexed by [`ResourceSlot`].
#[derive(Debug, Clone)]
pub struct BindingTable<H> {
    entries: [SlotEntry<H>; SLOT_COUNT],
}

impl<H> Default for BindingTable<H> {
    fn default() -> Self {
        Self {
            entries: std::array::from_fn(|_| SlotEntry::default()),
        }
    }
}

impl<H: ResourceHandle> BindingTable<H> {
    /// Creates an empty table; every slot starts dirty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` to `slot`, calling the backend only if it differs from the
    /// last bound value or the slot is dirty.
    ///
    /// Returns whether the backend was called. A backend failure leaves the
    /// slot's value and dirty flag untouched so the next frame retries.
    pub fn bind<B: BindingBackend<H>>(
        &mut self,
        backend: &mut B,
        slot: ResourceSlot,
        value: BindingValue<H>,
    ) -> RenderResult<bool> {
        let kind_ok = matches!(value, BindingValue::Bytes(_)) == slot.holds_bytes();
        if !kind_ok {
            return Err(RenderError::SlotKindMismatch(slot));
        }
        let entry = &mut self.entries[slot.index()];
        let unchanged = entry.value.as_ref().is_some_and(|v| v.same_as(&value));
        if unchanged && !entry.dirty {
            return Ok(false);
        }
        backend.set_resource(slot, &value)?;
        log::trace!("rebound {slot:?}");
        entry.value = Some(value);
        entry.dirty = false;
        Ok(true)
    }

    /// Forces the next [`Self::bind`] of `slot` to reach the backend.
    pub fn mark_dirty(&mut self, slot: ResourceSlot) {
        self.entries[slot.index()].dirty = true;
    }

    /// Marks every slot dirty, e.g. after the backend lost its state.
    pub fn mark_all_dirty(&mut self) {
        for entry in &mut self.entries {
            entry.dirty = true;
        }
    }

    /// Whether `slot` will upload on its next bind.
    pub fn is_dirty(&self, slot: ResourceSlot) -> bool {
        self.entries[slot.index()].dirty
    }

    /// Currently bound value.
    pub fn get(&self, slot: ResourceSlot) -> Option<&BindingValue<H>> {
        self.entries[slot.index()].value.as_ref()
    }

    /// Currently bound handle, if the slot is handle-valued and bound.
    pub fn handle(&self, slot: ResourceSlot) -> Option<&H> {
        self.get(slot).and_then(BindingValue::handle)
    }
}

/// A resource recreated whenever the requested size changes.
#[derive(Debug)]
pub struct SizedResource<T, S> {
    current: Option<(S, T)>,
}

impl<T, S> Default for SizedResource<T, S> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<T, S: PartialEq + Copy> SizedResource<T, S> {
    /// Creates an empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resource for `size`, creating it if absent or sized differently.
    ///
    /// The flag is `true` when a new resource was created. On creation failure
    /// the previous resource is kept.
    pub fn ensure(
        &mut self,
        size: S,
        create: impl FnOnce(S) -> RenderResult<T>,
    ) -> RenderResult<(&T, bool)> {
        let recreate = !matches!(&self.current, Some((s, _)) if *s == size);
        if recreate {
            let resource = create(size)?;
            self.current = Some((size, resource));
        }
        match &self.current {
            Some((_, resource)) => Ok((resource, recreate)),
            None => Err(RenderError::OutOfMemory),
        }
    }

    /// Current resource and its size.
    pub fn get(&self) -> Option<(&T, S)> {
        self.current.as_ref().map(|(s, t)| (t, *s))
    }

    /// Drops the resource.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::HandleId;

    #[derive(Debug, Clone)]
    struct FakeHandle(HandleId);

    impl ResourceHandle for FakeHandle {
        fn id(&self) -> HandleId {
            self.0
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        calls: [u32; SLOT_COUNT],
        fail: bool,
    }

    impl BindingBackend<FakeHandle> for CountingBackend {
        fn set_resource(
            &mut self,
            slot: ResourceSlot,
            _value: &BindingValue<FakeHandle>,
        ) -> RenderResult<()> {
            if self.fail {
                return Err(RenderError::TextureCreationFailed("injected".into()));
            }
            self.calls[slot.index()] += 1;
            Ok(())
        }
    }

    #[test]
    fn test_slot_indices_match_order() {
        for (i, slot) in ResourceSlot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), i);
        }
        assert_eq!(ResourceSlot::transfer_lut(2), Some(ResourceSlot::TransferLut2));
        assert_eq!(ResourceSlot::tone_lut(4), None);
    }

    #[test]
    fn test_same_bytes_bind_once() {
        let mut table = BindingTable::<FakeHandle>::new();
        let mut backend = CountingBackend::default();
        let slot = ResourceSlot::Parameters;

        assert!(table.bind(&mut backend, slot, BindingValue::Bytes(vec![1, 2, 3])).unwrap());
        assert!(!table.bind(&mut backend, slot, BindingValue::Bytes(vec![1, 2, 3])).unwrap());
        assert_eq!(backend.calls[slot.index()], 1);

        assert!(table.bind(&mut backend, slot, BindingValue::Bytes(vec![1, 2, 4])).unwrap());
        assert_eq!(backend.calls[slot.index()], 2);
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let mut table = BindingTable::new();
        let mut backend = CountingBackend::default();
        let slot = ResourceSlot::Volume;
        let handle = FakeHandle(HandleId::next());

        table.bind(&mut backend, slot, BindingValue::Handle(handle.clone())).unwrap();
        table.bind(&mut backend, slot, BindingValue::Handle(handle.clone())).unwrap();
        assert_eq!(backend.calls[slot.index()], 1);

        table.bind(&mut backend, slot, BindingValue::Handle(FakeHandle(HandleId::next()))).unwrap();
        assert_eq!(backend.calls[slot.index()], 2);
        assert!(table.handle(slot).is_some());
    }

    #[test]
    fn test_mark_dirty_forces_upload() {
        let mut table = BindingTable::<FakeHandle>::new();
        let mut backend = CountingBackend::default();
        let slot = ResourceSlot::Camera;
        table.bind(&mut backend, slot, BindingValue::Bytes(vec![9])).unwrap();
        table.mark_dirty(slot);
        assert!(table.is_dirty(slot));
        table.bind(&mut backend, slot, BindingValue::Bytes(vec![9])).unwrap();
        assert_eq!(backend.calls[slot.index()], 2);
        assert!(!table.is_dirty(slot));
    }

    #[test]
    fn test_failure_keeps_slot_state() {
        let mut table = BindingTable::<FakeHandle>::new();
        let mut backend = CountingBackend::default();
        let slot = ResourceSlot::ToneLut1;
        table.bind(&mut backend, slot, BindingValue::Bytes(vec![1])).unwrap();

        backend.fail = true;
        assert!(table.bind(&mut backend, slot, BindingValue::Bytes(vec![2])).is_err());
        assert!(matches!(table.get(slot), Some(BindingValue::Bytes(b)) if b == &vec![1]));
        assert!(!table.is_dirty(slot));

        backend.fail = false;
        assert!(table.bind(&mut backend, slot, BindingValue::Bytes(vec![2])).unwrap());
        assert_eq!(backend.calls[slot.index()], 2);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut table = BindingTable::<FakeHandle>::new();
        let mut backend = CountingBackend::default();
        let err = table
            .bind(&mut backend, ResourceSlot::Volume, BindingValue::Bytes(vec![0]))
            .unwrap_err();
        assert!(matches!(err, RenderError::SlotKindMismatch(ResourceSlot::Volume)));
    }

    #[test]
    fn test_sized_resource_recreates_on_resize() {
        let mut holder = SizedResource::<u32, (u32, u32)>::new();
        let mut created = 0;
        let (_, fresh) = holder
            .ensure((4, 4), |_| {
                created += 1;
                Ok(created)
            })
            .unwrap();
        assert!(fresh);
        let (_, fresh) = holder.ensure((4, 4), |_| Ok(99)).unwrap();
        assert!(!fresh);
        let (value, fresh) = holder.ensure((8, 4), |_| Ok(7)).unwrap();
        assert!(fresh);
        assert_eq!(*value, 7);

        let failed = holder.ensure((16, 16), |_| Err(RenderError::OutOfMemory));
        assert!(failed.is_err());
        assert_eq!(holder.get().map(|(v, s)| (*v, s)), Some((7, (8, 4))));
    }
}
