//! Per-frame camera uniform buffers and their descriptor sets

use std::sync::Arc;

use ash::vk;
use forge_engine::prelude::*;

use crate::camera::{CameraUniformData, OrbitCamera};

struct FrameResources {
    uniform: UniformBuffer,
    set: DescriptorSet,
    writer: DescriptorSetWriter,
}

/// Uploads the camera every render tick into the buffer of the current frame
///
/// One uniform buffer and descriptor set per frame in flight, so a frame
/// never overwrites data the GPU may still be reading.
pub struct FrameUniforms {
    context: Arc<GpuContext>,
    frames: Vec<FrameResources>,
    current: usize,
    #[allow(dead_code)] // Declared last so the sets are retired before their layout
    layout: DescriptorSetLayout,
}

impl FrameUniforms {
    /// Binding of the camera uniform in the frame set
    pub const CAMERA_BINDING: u32 = 0;

    /// Create resources for `frames_in_flight` frames
    pub fn new(context: &Arc<GpuContext>, frames_in_flight: u32) -> VulkanResult<Self> {
        let frames_in_flight = frames_in_flight.max(1);
        log::debug!("Creating frame uniforms for {} frames in flight", frames_in_flight);

        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(
                Self::CAMERA_BINDING,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
            .build(context)?;

        let mut frames = Vec::with_capacity(frames_in_flight as usize);
        for _ in 0..frames_in_flight {
            let uniform = UniformBuffer::from_pod(context, &CameraUniformData::default())?;
            let set = DescriptorSet::allocate(&layout)?;
            let mut writer = DescriptorSetWriter::new(&set);
            writer.push(Self::CAMERA_BINDING, &uniform);
            writer.flush(&set)?;
            frames.push(FrameResources { uniform, set, writer });
        }

        Ok(Self {
            context: Arc::clone(context),
            frames,
            current: 0,
            layout,
        })
    }

    /// Begin the next frame and upload `data` into its uniform buffer
    ///
    /// Returns the frame index.
    pub fn upload(&mut self, data: &CameraUniformData) -> VulkanResult<u64> {
        let frame = self.context.begin_frame();
        let in_flight = self.frames.len() as u64;
        self.current = (frame % in_flight) as usize;

        let resources = &mut self.frames[self.current];
        resources.uniform.update_pod(data)?;
        resources.writer.push(Self::CAMERA_BINDING, &resources.uniform);
        resources.writer.flush(&resources.set)?;

        // Reusing this slot means the frame that last used it has finished
        if frame > in_flight {
            self.context.frame_completed(frame - in_flight);
        }
        Ok(frame)
    }

    /// Descriptor set of the frame uploaded last
    pub fn current_set(&self) -> vk::DescriptorSet {
        self.frames[self.current].set.handle()
    }
}

impl Module for FrameUniforms {
    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> EngineResult<()> {
        let data = match ctx.module::<OrbitCamera>() {
            Some(camera) => camera.uniform_data(),
            None => return Ok(()),
        };
        let frame = self.upload(&data)?;
        log::trace!("Uploaded camera for frame {} into set {:?}", frame, self.current_set());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(frames: u32) -> (Arc<HeadlessDevice>, Arc<GpuContext>, FrameUniforms) {
        let device = Arc::new(HeadlessDevice::new());
        let context = GpuContext::new(device.clone());
        let uniforms = FrameUniforms::new(&context, frames).unwrap();
        (device, context, uniforms)
    }

    #[test]
    fn test_one_buffer_and_set_per_frame() {
        let (device, _context, uniforms) = setup(3);

        assert_eq!(uniforms.frames.len(), 3);
        assert_eq!(device.live_buffers(), 3);
        assert_eq!(device.live_descriptor_sets(), 3);
        assert_eq!(device.live_descriptor_set_layouts(), 1);
        assert_eq!(device.descriptor_updates(), 3);
    }

    #[test]
    fn test_upload_rotates_frames_and_writes_data() {
        let (device, _context, mut uniforms) = setup(2);
        let camera = OrbitCamera::new(4.0, 1.0, 0.5, 1.5);
        let data = camera.uniform_data();

        let first = uniforms.upload(&data).unwrap();
        let first_set = uniforms.current_set();
        let second = uniforms.upload(&data).unwrap();

        assert_eq!(second, first + 1);
        assert_ne!(uniforms.current_set(), first_set);

        let memory = uniforms.frames[uniforms.current].uniform.buffer().memory();
        let bytes = device.read_memory(memory).unwrap();
        assert_eq!(&bytes[..std::mem::size_of::<CameraUniformData>()], bytemuck::bytes_of(&data));

        // Handles did not change, so the descriptors were not rewritten
        assert_eq!(device.descriptor_updates(), 2);
        let writes = device.descriptor_writes(uniforms.current_set());
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].binding, FrameUniforms::CAMERA_BINDING);
    }

    #[test]
    fn test_drop_releases_after_flush() {
        let (device, context, uniforms) = setup(2);
        drop(uniforms);

        // Still referenced by frames that may be in flight
        assert_eq!(device.live_buffers(), 2);
        context.flush().unwrap();
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_descriptor_sets(), 0);
        assert_eq!(device.live_descriptor_set_layouts(), 0);
    }
}
