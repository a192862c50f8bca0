//! Descriptor set layouts, sets and incremental writes

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use super::context::GpuContext;
use super::descriptor::{Descriptor, DescriptorBinding, DescriptorWrite};
use super::{VulkanError, VulkanResult};

/// Builder for descriptor set layouts
#[derive(Debug, Default, Clone)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary binding declaration
    pub fn add(mut self, binding: DescriptorBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Add the declaration a descriptor kind produces for `binding`
    pub fn add_descriptor<D: Descriptor>(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(D::create_descriptor(binding, stage_flags))
    }

    /// Add uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(DescriptorBinding::new(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags))
    }

    /// Add storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(DescriptorBinding::new(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags))
    }

    /// Add combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(DescriptorBinding::new(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stage_flags,
        ))
    }

    /// Build the layout; fails if two entries share a slot
    pub fn build(self, context: &Arc<GpuContext>) -> VulkanResult<DescriptorSetLayout> {
        let mut bindings = self.bindings;
        bindings.sort_by_key(|binding| binding.binding);
        if let Some(pair) = bindings.windows(2).find(|pair| pair[0].binding == pair[1].binding) {
            return Err(VulkanError::DuplicateBinding(pair[0].binding));
        }

        let handle = context.device().create_descriptor_set_layout(&bindings)?;
        log::debug!("Created descriptor set layout {:?} with {} bindings", handle, bindings.len());
        Ok(DescriptorSetLayout {
            context: Arc::clone(context),
            handle,
            bindings,
        })
    }
}

/// Descriptor set layout with its binding declarations
pub struct DescriptorSetLayout {
    context: Arc<GpuContext>,
    handle: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    /// Get layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Declarations sorted by slot
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Declaration for `binding`, if present
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.context.retire_descriptor_set_layout(self.handle);
    }
}

/// Descriptor set allocated from a layout
pub struct DescriptorSet {
    context: Arc<GpuContext>,
    handle: vk::DescriptorSet,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSet {
    /// Allocate a set with `layout`
    pub fn allocate(layout: &DescriptorSetLayout) -> VulkanResult<Self> {
        let handle = layout.context.device().allocate_descriptor_set(layout.handle)?;
        Ok(Self {
            context: Arc::clone(&layout.context),
            handle,
            bindings: layout.bindings.clone(),
        })
    }

    /// Get descriptor set handle
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// Apply writes after checking them against this set's layout
    pub fn update(&self, writes: &[DescriptorWrite]) -> VulkanResult<()> {
        for write in writes {
            self.validate(write)?;
        }
        self.context.device().update_descriptor_sets(writes)
    }

    fn validate(&self, write: &DescriptorWrite) -> VulkanResult<()> {
        if write.dst_set != self.handle {
            return Err(VulkanError::DescriptorMismatch {
                reason: format!("write targets {:?}, not {:?}", write.dst_set, self.handle),
            });
        }
        match self.bindings.iter().find(|b| b.binding == write.binding) {
            Some(binding) if binding.descriptor_type == write.descriptor_type => Ok(()),
            Some(binding) => Err(VulkanError::DescriptorMismatch {
                reason: format!(
                    "binding {} expects {:?}, got {:?}",
                    write.binding, binding.descriptor_type, write.descriptor_type
                ),
            }),
            None => Err(VulkanError::DescriptorMismatch {
                reason: format!("binding {} is not part of the layout", write.binding),
            }),
        }
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.context.retire_descriptor_set(self.handle);
    }
}

/// Collects writes for one set and only re-applies bindings that changed
///
/// Descriptors are pushed every frame; a binding is written to the device
/// only when its write record differs from the last one applied, e.g. after
/// a uniform buffer was recreated with a new handle.
#[derive(Debug)]
pub struct DescriptorSetWriter {
    set: vk::DescriptorSet,
    pending: BTreeMap<u32, DescriptorWrite>,
    applied: BTreeMap<u32, DescriptorWrite>,
}

impl DescriptorSetWriter {
    /// Writer targeting `set`
    pub fn new(set: &DescriptorSet) -> Self {
        Self {
            set: set.handle(),
            pending: BTreeMap::new(),
            applied: BTreeMap::new(),
        }
    }

    /// Stage `descriptor` for `binding`
    pub fn push(&mut self, binding: u32, descriptor: &dyn Descriptor) -> &mut Self {
        self.pending.insert(binding, descriptor.write_descriptor(binding, self.set));
        self
    }

    /// Apply staged writes that differ from what the set already holds
    ///
    /// Returns the number of bindings written.
    pub fn flush(&mut self, set: &DescriptorSet) -> VulkanResult<usize> {
        if set.handle() != self.set {
            return Err(VulkanError::DescriptorMismatch {
                reason: format!("writer targets {:?}, not {:?}", self.set, set.handle()),
            });
        }

        let changed: Vec<DescriptorWrite> = std::mem::take(&mut self.pending)
            .into_values()
            .filter(|write| self.applied.get(&write.binding) != Some(write))
            .collect();
        if changed.is_empty() {
            return Ok(0);
        }

        set.update(&changed)?;
        for write in &changed {
            self.applied.insert(write.binding, *write);
        }
        Ok(changed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::{
        DescriptorResource, HeadlessDevice, SampledImage, StorageBuffer, UniformBuffer,
    };
    use ash::vk::Handle;

    fn setup() -> (Arc<HeadlessDevice>, Arc<GpuContext>) {
        let device = Arc::new(HeadlessDevice::new());
        let context = GpuContext::new(device.clone());
        (device, context)
    }

    fn frame_layout(context: &Arc<GpuContext>) -> DescriptorSetLayout {
        DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .add_descriptor::<StorageBuffer>(1, vk::ShaderStageFlags::COMPUTE)
            .add_combined_image_sampler(2, vk::ShaderStageFlags::FRAGMENT)
            .build(context)
            .unwrap()
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let (device, context) = setup();
        let result = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_storage_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(&context);

        assert!(matches!(result, Err(VulkanError::DuplicateBinding(0))));
        assert_eq!(device.live_descriptor_set_layouts(), 0);
    }

    #[test]
    fn test_update_writes_reach_device() {
        let (device, context) = setup();
        let layout = frame_layout(&context);
        let set = DescriptorSet::allocate(&layout).unwrap();
        let uniform = UniformBuffer::new(&context, 64).unwrap();
        let storage = StorageBuffer::new(&context, 128, None).unwrap();
        let image = SampledImage::new(vk::ImageView::from_raw(5), vk::Sampler::from_raw(6));

        set.update(&[
            uniform.write_descriptor(0, set.handle()),
            storage.write_descriptor(1, set.handle()),
            image.write_descriptor(2, set.handle()),
        ])
        .unwrap();

        let writes = device.descriptor_writes(set.handle());
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].resource, DescriptorResource::Buffer(uniform.buffer_info()));
        assert_eq!(writes[2].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }

    #[test]
    fn test_update_rejects_mismatched_writes() {
        let (_device, context) = setup();
        let layout = frame_layout(&context);
        let set = DescriptorSet::allocate(&layout).unwrap();
        let other = DescriptorSet::allocate(&layout).unwrap();
        let uniform = UniformBuffer::new(&context, 64).unwrap();

        // Wrong type for slot 1
        assert!(matches!(
            set.update(&[uniform.write_descriptor(1, set.handle())]),
            Err(VulkanError::DescriptorMismatch { .. })
        ));
        // Slot not in layout
        assert!(matches!(
            set.update(&[uniform.write_descriptor(7, set.handle())]),
            Err(VulkanError::DescriptorMismatch { .. })
        ));
        // Write aimed at another set
        assert!(matches!(
            set.update(&[uniform.write_descriptor(0, other.handle())]),
            Err(VulkanError::DescriptorMismatch { .. })
        ));
    }

    #[test]
    fn test_writer_only_flushes_changes() {
        let (device, context) = setup();
        let layout = frame_layout(&context);
        let set = DescriptorSet::allocate(&layout).unwrap();
        let mut uniform = UniformBuffer::new(&context, 64).unwrap();
        let storage = StorageBuffer::new(&context, 128, None).unwrap();
        let mut writer = DescriptorSetWriter::new(&set);

        writer.push(0, &uniform).push(1, &storage);
        assert_eq!(writer.flush(&set), Ok(2));

        writer.push(0, &uniform).push(1, &storage);
        assert_eq!(writer.flush(&set), Ok(0));

        uniform.recreate(96).unwrap();
        writer.push(0, &uniform).push(1, &storage);
        assert_eq!(writer.flush(&set), Ok(1));

        assert_eq!(device.descriptor_updates(), 3);
        assert_eq!(
            device.descriptor_writes(set.handle())[0].resource,
            DescriptorResource::Buffer(uniform.buffer_info())
        );
    }

    #[test]
    fn test_sets_and_layouts_are_released_through_context() {
        let (device, context) = setup();
        let layout = frame_layout(&context);
        let set = DescriptorSet::allocate(&layout).unwrap();
        drop(set);
        drop(layout);

        assert_eq!(device.live_descriptor_sets(), 1);
        assert_eq!(context.flush(), Ok(2));
        assert_eq!(device.live_descriptor_sets(), 0);
        assert_eq!(device.live_descriptor_set_layouts(), 0);
    }
}
