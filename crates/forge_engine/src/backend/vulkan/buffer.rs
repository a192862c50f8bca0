//! GPU buffer with explicit, frame-fenced release
//!
//! A [`Buffer`] owns one native buffer and the memory bound to it. Its size
//! is fixed at construction; growing a buffer means creating a new one and
//! re-pointing any descriptors at it.
//!
//! Dropping a buffer does not free GPU memory on the spot. The allocation is
//! retired to the [`GpuContext`] and destroyed once the frame it was retired
//! in has completed, so commands still in flight never see freed memory.
//!
//! Buffer instances are not internally synchronized. Rewriting a buffer that
//! a submitted command still reads is the caller's responsibility; allocate
//! one buffer per frame in flight when that matters.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use ash::vk;

use super::context::GpuContext;
use super::device::RawBuffer;
use super::{VulkanError, VulkanResult};

/// GPU buffer wrapper with context-managed memory
pub struct Buffer {
    context: Arc<GpuContext>,
    raw: RawBuffer,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
}

impl Buffer {
    /// Create a new buffer, optionally filled with `data`
    ///
    /// Fails with [`VulkanError::ZeroSizedBuffer`] for `size == 0`, with
    /// [`VulkanError::OutOfBounds`] if `data` does not fit and with
    /// [`VulkanError::NotHostCoherent`] if `properties` asks for host visible
    /// memory without `HOST_COHERENT`. Mapped ranges are never flushed.
    pub fn new(
        context: &Arc<GpuContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        data: Option<&[u8]>,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::ZeroSizedBuffer);
        }
        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
            && !properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Err(VulkanError::NotHostCoherent);
        }
        if let Some(data) = data {
            check_bounds(0, data.len() as vk::DeviceSize, size)?;
        }

        let raw = context.device().create_buffer(size, usage, properties)?;
        log::trace!(
            "Created buffer {:?}: {} bytes ({} allocated), usage {:?}",
            raw.buffer,
            size,
            raw.allocation_size,
            usage
        );

        let mut buffer = Self {
            context: Arc::clone(context),
            raw,
            usage,
            properties,
        };

        if let Some(data) = data {
            buffer.write(0, data)?;
        }

        Ok(buffer)
    }

    /// Map the whole buffer for host access
    ///
    /// The memory stays mapped until the returned guard is dropped. The
    /// memory type the device picked must be host visible and coherent.
    pub fn map_memory(&mut self) -> VulkanResult<MappedMemory<'_>> {
        if !self.raw.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::NotHostVisible);
        }
        if !self.raw.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            return Err(VulkanError::NotHostCoherent);
        }
        let ptr = self.context.device().map_memory(self.raw.memory, 0, self.raw.size)?;
        // SAFETY: the device guarantees `size` valid bytes at `ptr` until
        // unmap, and `&mut self` keeps the mapping unaliased for the guard's
        // lifetime.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.raw.size as usize) };
        Ok(MappedMemory { buffer: self, bytes })
    }

    /// Copy `data` into the buffer at `offset`
    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        check_bounds(offset, data.len() as vk::DeviceSize, self.raw.size)?;
        let mut mapped = self.map_memory()?;
        let start = offset as usize;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes out of the buffer starting at `offset`
    pub fn read(&mut self, offset: vk::DeviceSize, len: vk::DeviceSize) -> VulkanResult<Vec<u8>> {
        check_bounds(offset, len, self.raw.size)?;
        let mapped = self.map_memory()?;
        let start = offset as usize;
        Ok(mapped[start..start + len as usize].to_vec())
    }

    /// Retire the buffer now instead of at scope exit
    pub fn release(self) {
        drop(self);
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    /// Get the bound device memory
    pub fn memory(&self) -> vk::DeviceMemory {
        self.raw.memory
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.raw.size
    }

    /// Size of the backing allocation
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.raw.allocation_size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Requested memory property flags
    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Context the buffer was created from
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.context.retire_buffer(self.raw);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.raw.buffer)
            .field("size", &self.raw.size)
            .field("usage", &self.usage)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Host view of a mapped buffer; unmaps on drop
pub struct MappedMemory<'a> {
    buffer: &'a Buffer,
    bytes: &'a mut [u8],
}

impl Deref for MappedMemory<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

impl DerefMut for MappedMemory<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        self.buffer.context.device().unmap_memory(self.buffer.raw.memory);
    }
}

fn check_bounds(offset: vk::DeviceSize, len: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(VulkanError::OutOfBounds { offset, len, size }),
    }
}
