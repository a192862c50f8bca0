//! Shared GPU context with frame-fenced resource release
//!
//! Resources never destroy their native handles directly. They retire them
//! here, tagged with the frame that was current at retirement; the handles
//! are destroyed only after the caller reports that frame as completed
//! (typically after waiting on that frame's fence).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;

use super::device::{GraphicsDevice, RawBuffer};
use super::VulkanResult;

/// Native handle awaiting destruction
#[derive(Debug, Clone, Copy)]
enum Retired {
    Buffer(RawBuffer),
    DescriptorSet(vk::DescriptorSet),
    DescriptorSetLayout(vk::DescriptorSetLayout),
}

/// Device handle plus the deferred release queue
pub struct GpuContext {
    device: Arc<dyn GraphicsDevice>,
    frame: AtomicU64,
    retired: Mutex<VecDeque<(u64, Retired)>>,
}

impl GpuContext {
    /// Wrap a device in a new shared context
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Arc<Self> {
        log::info!("Creating GPU context on device '{}'", device.name());
        Arc::new(Self {
            device,
            frame: AtomicU64::new(0),
            retired: Mutex::new(VecDeque::new()),
        })
    }

    /// The underlying device
    pub fn device(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    /// Frame index resources are currently retired into
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Start a new frame and return its index
    pub fn begin_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Report that every command of `frame` (and all earlier frames) has
    /// finished executing; destroys everything retired up to that frame
    ///
    /// Returns the number of destroyed handles.
    pub fn frame_completed(&self, frame: u64) -> usize {
        let ready: Vec<Retired> = {
            let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
            let mut ready = Vec::new();
            while retired.front().is_some_and(|(retired_in, _)| *retired_in <= frame) {
                if let Some((_, resource)) = retired.pop_front() {
                    ready.push(resource);
                }
            }
            ready
        };

        let count = ready.len();
        for resource in ready {
            self.destroy(resource);
        }
        if count > 0 {
            log::trace!("Released {} GPU resources up to frame {}", count, frame);
        }
        count
    }

    /// Wait for the device to go idle and destroy every retired handle
    pub fn flush(&self) -> VulkanResult<usize> {
        self.device.wait_idle()?;
        Ok(self.frame_completed(u64::MAX))
    }

    /// Number of retired handles not yet destroyed
    pub fn pending_releases(&self) -> usize {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn retire_buffer(&self, buffer: RawBuffer) {
        self.retire(Retired::Buffer(buffer));
    }

    pub(crate) fn retire_descriptor_set(&self, set: vk::DescriptorSet) {
        self.retire(Retired::DescriptorSet(set));
    }

    pub(crate) fn retire_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.retire(Retired::DescriptorSetLayout(layout));
    }

    fn retire(&self, resource: Retired) {
        let frame = self.current_frame();
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((frame, resource));
    }

    fn destroy(&self, resource: Retired) {
        match resource {
            Retired::Buffer(buffer) => self.device.destroy_buffer(buffer),
            Retired::DescriptorSet(set) => self.device.free_descriptor_set(set),
            Retired::DescriptorSetLayout(layout) => self.device.destroy_descriptor_set_layout(layout),
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during GPU context teardown: {}", e);
        }
        let released = self.frame_completed(u64::MAX);
        log::debug!("GPU context dropped, released {} pending resources", released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::{Buffer, HeadlessDevice};

    fn host_visible() -> vk::MemoryPropertyFlags {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    }

    #[test]
    fn test_release_waits_for_frame_completion() {
        let device = Arc::new(HeadlessDevice::new());
        let context = GpuContext::new(device.clone());

        let frame = context.begin_frame();
        let buffer = Buffer::new(&context, 64, vk::BufferUsageFlags::VERTEX_BUFFER, host_visible(), None).unwrap();
        drop(buffer);

        assert_eq!(device.live_buffers(), 1);
        assert_eq!(context.pending_releases(), 1);

        assert_eq!(context.frame_completed(frame - 1), 0);
        assert_eq!(device.live_buffers(), 1);

        assert_eq!(context.frame_completed(frame), 1);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(context.pending_releases(), 0);
    }

    #[test]
    fn test_release_order_follows_frames() {
        let device = Arc::new(HeadlessDevice::new());
        let context = GpuContext::new(device.clone());

        let first = context.begin_frame();
        drop(Buffer::new(&context, 16, vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible(), None).unwrap());
        let second = context.begin_frame();
        drop(Buffer::new(&context, 16, vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible(), None).unwrap());

        assert_eq!(context.frame_completed(first), 1);
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(context.frame_completed(second), 1);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_flush_and_drop_release_everything() {
        let device = Arc::new(HeadlessDevice::new());
        let context = GpuContext::new(device.clone());

        context.begin_frame();
        drop(Buffer::new(&context, 32, vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible(), None).unwrap());
        assert_eq!(context.flush(), Ok(1));

        let kept = Buffer::new(&context, 32, vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible(), None).unwrap();
        drop(kept);
        drop(context);
        assert_eq!(device.live_buffers(), 0);
    }
}
