//! Host-memory graphics device
//!
//! Implements [`GraphicsDevice`] without a GPU. Allocations live in a
//! generational arena, so a handle used after destruction is reported as
//! [`VulkanError::UnknownHandle`] instead of touching freed memory. Used for
//! headless runs and throughout the test suite.

use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};
use slotmap::{new_key_type, Key, KeyData, SlotMap};

use super::descriptor::{DescriptorBinding, DescriptorWrite};
use super::device::{find_memory_type, DeviceLimits, GraphicsDevice, RawBuffer};
use super::{VulkanError, VulkanResult};

new_key_type! {
    struct AllocationKey;
    struct LayoutKey;
    struct SetKey;
}

struct Allocation {
    data: Box<[u8]>,
    properties: vk::MemoryPropertyFlags,
    mapped: bool,
}

struct HeadlessSet {
    bindings: Vec<DescriptorBinding>,
    writes: BTreeMap<u32, DescriptorWrite>,
}

#[derive(Default)]
struct State {
    allocations: SlotMap<AllocationKey, Allocation>,
    layouts: SlotMap<LayoutKey, Vec<DescriptorBinding>>,
    sets: SlotMap<SetKey, HeadlessSet>,
    allocated_bytes: vk::DeviceSize,
    descriptor_updates: usize,
}

fn to_raw<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

fn from_raw<K: Key>(raw: u64) -> K {
    KeyData::from_ffi(raw).into()
}

fn zeroed(size: vk::DeviceSize) -> Option<Box<[u8]>> {
    let len = usize::try_from(size).ok()?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).ok()?;
    data.resize(len, 0u8);
    Some(data.into_boxed_slice())
}

/// Graphics device backed by host memory
pub struct HeadlessDevice {
    limits: DeviceLimits,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    memory_budget: Option<vk::DeviceSize>,
    state: Mutex<State>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Device with default limits and a typical desktop set of memory types
    pub fn new() -> Self {
        Self {
            limits: DeviceLimits::default(),
            memory_properties: Self::build_memory_properties(&[
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::DEVICE_LOCAL
                    | vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT
                    | vk::MemoryPropertyFlags::HOST_CACHED,
            ]),
            memory_budget: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Override the reported device limits
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the exposed memory types
    pub fn with_memory_types(mut self, types: &[vk::MemoryPropertyFlags]) -> Self {
        self.memory_properties = Self::build_memory_properties(types);
        self
    }

    /// Cap the total number of bytes that may be allocated at once
    pub fn with_memory_budget(mut self, bytes: vk::DeviceSize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Number of buffers currently alive
    pub fn live_buffers(&self) -> usize {
        self.lock().allocations.len()
    }

    /// Number of descriptor sets currently allocated
    pub fn live_descriptor_sets(&self) -> usize {
        self.lock().sets.len()
    }

    /// Number of descriptor set layouts currently alive
    pub fn live_descriptor_set_layouts(&self) -> usize {
        self.lock().layouts.len()
    }

    /// Bytes currently allocated
    pub fn allocated_bytes(&self) -> vk::DeviceSize {
        self.lock().allocated_bytes
    }

    /// Total number of descriptor writes applied so far
    pub fn descriptor_updates(&self) -> usize {
        self.lock().descriptor_updates
    }

    /// Latest write applied to each binding of `set`, ordered by binding
    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Vec<DescriptorWrite> {
        self.lock()
            .sets
            .get(from_raw::<SetKey>(set.as_raw()))
            .map(|set| set.writes.values().copied().collect())
            .unwrap_or_default()
    }

    /// Copy of the current contents of a buffer's memory
    pub fn read_memory(&self, memory: vk::DeviceMemory) -> VulkanResult<Vec<u8>> {
        self.lock()
            .allocations
            .get(from_raw::<AllocationKey>(memory.as_raw()))
            .map(|allocation| allocation.data.to_vec())
            .ok_or(VulkanError::UnknownHandle(memory.as_raw()))
    }

    fn build_memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        let count = types.len().min(props.memory_types.len());
        for (slot, flags) in props.memory_types.iter_mut().zip(&types[..count]) {
            slot.property_flags = *flags;
            slot.heap_index = 0;
        }
        props.memory_type_count = count as u32;
        props.memory_heap_count = 1;
        props
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<RawBuffer> {
        if size == 0 {
            return Err(VulkanError::ZeroSizedBuffer);
        }
        let type_index = find_memory_type(u32::MAX, properties, &self.memory_properties)?;
        let chosen = self.memory_properties.memory_types[type_index as usize].property_flags;

        let mut state = self.lock();
        if let Some(budget) = self.memory_budget {
            if state.allocated_bytes.checked_add(size).map_or(true, |total| total > budget) {
                return Err(VulkanError::OutOfDeviceMemory { requested: size });
            }
        }
        let data = zeroed(size).ok_or(VulkanError::OutOfDeviceMemory { requested: size })?;

        let key = state.allocations.insert(Allocation {
            data,
            properties: chosen,
            mapped: false,
        });
        state.allocated_bytes = state.allocated_bytes.saturating_add(size);

        let raw = to_raw(key);
        Ok(RawBuffer {
            buffer: vk::Buffer::from_raw(raw),
            memory: vk::DeviceMemory::from_raw(raw),
            size,
            allocation_size: size,
            properties: chosen,
        })
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        let mut state = self.lock();
        match state.allocations.remove(from_raw::<AllocationKey>(buffer.memory.as_raw())) {
            Some(allocation) => state.allocated_bytes -= allocation.data.len() as vk::DeviceSize,
            None => log::warn!("Destroying unknown buffer {:#x}", buffer.buffer.as_raw()),
        }
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VulkanResult<NonNull<u8>> {
        let mut state = self.lock();
        let allocation = state
            .allocations
            .get_mut(from_raw::<AllocationKey>(memory.as_raw()))
            .ok_or(VulkanError::UnknownHandle(memory.as_raw()))?;

        if !allocation.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::NotHostVisible);
        }
        if allocation.mapped {
            return Err(VulkanError::AlreadyMapped);
        }
        let len = allocation.data.len() as vk::DeviceSize;
        if offset.checked_add(size).map_or(true, |end| end > len) {
            return Err(VulkanError::OutOfBounds { offset, len: size, size: len });
        }

        allocation.mapped = true;
        // Boxed slices never move, so the pointer outlives the lock
        NonNull::new(allocation.data[offset as usize..].as_mut_ptr())
            .ok_or(VulkanError::UnknownHandle(memory.as_raw()))
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        if let Some(allocation) = self
            .lock()
            .allocations
            .get_mut(from_raw::<AllocationKey>(memory.as_raw()))
        {
            allocation.mapped = false;
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let key = self.lock().layouts.insert(bindings.to_vec());
        Ok(vk::DescriptorSetLayout::from_raw(to_raw(key)))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        if self.lock().layouts.remove(from_raw::<LayoutKey>(layout.as_raw())).is_none() {
            log::warn!("Destroying unknown descriptor set layout {:#x}", layout.as_raw());
        }
    }

    fn allocate_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let mut state = self.lock();
        let bindings = state
            .layouts
            .get(from_raw::<LayoutKey>(layout.as_raw()))
            .cloned()
            .ok_or(VulkanError::UnknownHandle(layout.as_raw()))?;
        let key = state.sets.insert(HeadlessSet {
            bindings,
            writes: BTreeMap::new(),
        });
        Ok(vk::DescriptorSet::from_raw(to_raw(key)))
    }

    fn free_descriptor_set(&self, set: vk::DescriptorSet) {
        if self.lock().sets.remove(from_raw::<SetKey>(set.as_raw())).is_none() {
            log::warn!("Freeing unknown descriptor set {:#x}", set.as_raw());
        }
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) -> VulkanResult<()> {
        let mut state = self.lock();
        let State { sets, descriptor_updates, .. } = &mut *state;

        for write in writes {
            let raw = write.dst_set.as_raw();
            let set = sets
                .get_mut(from_raw::<SetKey>(raw))
                .ok_or(VulkanError::UnknownHandle(raw))?;
            match set.bindings.iter().find(|binding| binding.binding == write.binding) {
                Some(binding) if binding.descriptor_type == write.descriptor_type => {}
                Some(binding) => {
                    return Err(VulkanError::DescriptorMismatch {
                        reason: format!(
                            "binding {} expects {:?}, got {:?}",
                            write.binding, binding.descriptor_type, write.descriptor_type
                        ),
                    })
                }
                None => {
                    return Err(VulkanError::DescriptorMismatch {
                        reason: format!("binding {} is not part of the layout", write.binding),
                    })
                }
            }

            set.writes.insert(write.binding, *write);
            *descriptor_updates += 1;
        }
        Ok(())
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_is_rejected() {
        let device = HeadlessDevice::new();
        let raw = device
            .create_buffer(16, vk::BufferUsageFlags::UNIFORM_BUFFER, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap();
        device.destroy_buffer(raw);

        // The slot gets reused with a new generation
        let fresh = device
            .create_buffer(16, vk::BufferUsageFlags::UNIFORM_BUFFER, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap();
        assert_ne!(fresh.memory, raw.memory);
        assert_eq!(
            device.map_memory(raw.memory, 0, 16),
            Err(VulkanError::UnknownHandle(raw.memory.as_raw()))
        );
    }

    #[test]
    fn test_memory_budget() {
        let device = HeadlessDevice::new().with_memory_budget(100);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let first = device.create_buffer(60, vk::BufferUsageFlags::STORAGE_BUFFER, host).unwrap();
        assert_eq!(
            device.create_buffer(60, vk::BufferUsageFlags::STORAGE_BUFFER, host),
            Err(VulkanError::OutOfDeviceMemory { requested: 60 })
        );

        device.destroy_buffer(first);
        assert_eq!(device.allocated_bytes(), 0);
        assert!(device.create_buffer(60, vk::BufferUsageFlags::STORAGE_BUFFER, host).is_ok());
    }

    #[test]
    fn test_device_local_memory_cannot_be_mapped() {
        let device = HeadlessDevice::new();
        let raw = device
            .create_buffer(16, vk::BufferUsageFlags::VERTEX_BUFFER, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .unwrap();

        assert_eq!(device.map_memory(raw.memory, 0, 16), Err(VulkanError::NotHostVisible));
    }

    #[test]
    fn test_double_map_is_rejected() {
        let device = HeadlessDevice::new();
        let raw = device
            .create_buffer(16, vk::BufferUsageFlags::UNIFORM_BUFFER, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap();

        assert!(device.map_memory(raw.memory, 0, 16).is_ok());
        assert_eq!(device.map_memory(raw.memory, 0, 16), Err(VulkanError::AlreadyMapped));
        device.unmap_memory(raw.memory);
        assert!(device.map_memory(raw.memory, 0, 16).is_ok());
    }

    #[test]
    fn test_oversized_allocation_fails() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let budgeted = HeadlessDevice::new().with_memory_budget(100);
        budgeted.create_buffer(8, vk::BufferUsageFlags::STORAGE_BUFFER, host).unwrap();
        assert_eq!(
            budgeted.create_buffer(u64::MAX - 4, vk::BufferUsageFlags::STORAGE_BUFFER, host),
            Err(VulkanError::OutOfDeviceMemory { requested: u64::MAX - 4 })
        );
        assert_eq!(budgeted.allocated_bytes(), 8);

        let unbounded = HeadlessDevice::new();
        assert_eq!(
            unbounded.create_buffer(u64::MAX, vk::BufferUsageFlags::STORAGE_BUFFER, host),
            Err(VulkanError::OutOfDeviceMemory { requested: u64::MAX })
        );
        assert_eq!(unbounded.live_buffers(), 0);
    }
}
