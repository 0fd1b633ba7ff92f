//! Descriptor set layouts, pools and writers
//!
//! Pools have a fixed capacity per descriptor type and a maximum set count.
//! [`DescriptorPool`] keeps its own budget of what it has handed out so that a
//! request that cannot fit is refused with a [`DescriptorError`] before the
//! device is asked. Pools never grow.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use ash::vk;
use thiserror::Error;

use crate::render::api::{DescriptorResource, DescriptorWrite, RenderDevice};
use crate::render::vulkan::VulkanError;

/// Descriptor management errors
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// Two bindings of one layout share an index
    #[error("Binding {0} is already in use")]
    DuplicateBinding(u32),

    /// Not enough descriptors of one type left in the pool
    #[error("Descriptor pool exhausted for {descriptor_type:?}: requested {requested}, available {available} of {capacity}")]
    PoolExhausted {
        /// Type that ran out
        descriptor_type: vk::DescriptorType,
        /// Descriptors of that type the set needs
        requested: u32,
        /// Descriptors of that type still free
        available: u32,
        /// Total capacity for that type
        capacity: u32,
    },

    /// The pool already handed out its maximum number of sets
    #[error("Descriptor pool set limit of {max_sets} reached")]
    SetLimitReached {
        /// Maximum number of sets of the pool
        max_sets: u32,
    },

    /// The device reported the pool out of memory or fragmented
    #[error("Descriptor pool exhausted on the device: {0:?}")]
    DeviceExhausted(vk::Result),

    /// Freeing individual sets needs `FREE_DESCRIPTOR_SET`
    #[error("Descriptor pool was not created with FREE_DESCRIPTOR_SET")]
    FreeNotSupported,

    /// The set was not allocated from this pool or was already freed
    #[error("Descriptor set {0:?} does not belong to this pool")]
    UnknownSet(vk::DescriptorSet),

    /// Other device failure
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// One binding of a set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Stages that access the binding
    pub stage_flags: vk::ShaderStageFlags,
    /// Array size
    pub count: u32,
}

/// Descriptor set layout with RAII cleanup
///
/// Keeps its bindings so pools can budget allocations and writers can check
/// writes against it.
pub struct DescriptorSetLayout<D: RenderDevice> {
    device: Rc<D>,
    layout: vk::DescriptorSetLayout,
    bindings: BTreeMap<u32, LayoutBinding>,
}

impl<D: RenderDevice> DescriptorSetLayout<D> {
    /// Start describing a layout
    pub fn builder(device: Rc<D>) -> DescriptorSetLayoutBuilder<D> {
        DescriptorSetLayoutBuilder {
            device,
            bindings: BTreeMap::new(),
            duplicate: None,
        }
    }

    /// Get layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Description of one binding
    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.get(&binding)
    }

    /// Descriptors of each type one set of this layout consumes
    pub fn requirements(&self) -> BTreeMap<vk::DescriptorType, u32> {
        let mut totals = BTreeMap::new();
        for binding in self.bindings.values() {
            *totals.entry(binding.descriptor_type).or_insert(0) += binding.count;
        }
        totals
    }
}

impl<D: RenderDevice> Drop for DescriptorSetLayout<D> {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.layout);
    }
}

/// Builder for [`DescriptorSetLayout`]
pub struct DescriptorSetLayoutBuilder<D: RenderDevice> {
    device: Rc<D>,
    bindings: BTreeMap<u32, LayoutBinding>,
    duplicate: Option<u32>,
}

impl<D: RenderDevice> DescriptorSetLayoutBuilder<D> {
    /// Add a binding; reusing an index fails the build
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        if self.bindings.contains_key(&binding) {
            self.duplicate.get_or_insert(binding);
        } else {
            self.bindings.insert(binding, LayoutBinding { descriptor_type, stage_flags, count });
        }
        self
    }

    /// Add a single uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags, 1)
    }

    /// Add a single combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags, 1)
    }

    /// Create the layout
    pub fn build(self) -> Result<DescriptorSetLayout<D>, DescriptorError> {
        if let Some(binding) = self.duplicate {
            return Err(DescriptorError::DuplicateBinding(binding));
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .map(|(&binding, info)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(info.descriptor_type)
                    .descriptor_count(info.count)
                    .stage_flags(info.stage_flags)
                    .build()
            })
            .collect();

        let layout = self.device.create_descriptor_set_layout(&vk_bindings)?;
        Ok(DescriptorSetLayout {
            device: self.device,
            layout,
            bindings: self.bindings,
        })
    }
}

#[derive(Debug, Default)]
struct PoolBudget {
    capacity: BTreeMap<vk::DescriptorType, u32>,
    in_use: BTreeMap<vk::DescriptorType, u32>,
    max_sets: u32,
    sets_in_use: u32,
    allocations: HashMap<vk::DescriptorSet, BTreeMap<vk::DescriptorType, u32>>,
}

impl PoolBudget {
    fn available(&self, descriptor_type: vk::DescriptorType) -> u32 {
        let capacity = self.capacity.get(&descriptor_type).copied().unwrap_or(0);
        capacity.saturating_sub(self.in_use.get(&descriptor_type).copied().unwrap_or(0))
    }

    fn check(&self, requirements: &BTreeMap<vk::DescriptorType, u32>) -> Result<(), DescriptorError> {
        if self.sets_in_use >= self.max_sets {
            return Err(DescriptorError::SetLimitReached { max_sets: self.max_sets });
        }
        for (&descriptor_type, &requested) in requirements {
            let available = self.available(descriptor_type);
            if requested > available {
                return Err(DescriptorError::PoolExhausted {
                    descriptor_type,
                    requested,
                    available,
                    capacity: self.capacity.get(&descriptor_type).copied().unwrap_or(0),
                });
            }
        }
        Ok(())
    }

    fn commit(&mut self, set: vk::DescriptorSet, requirements: BTreeMap<vk::DescriptorType, u32>) {
        for (&descriptor_type, &count) in &requirements {
            *self.in_use.entry(descriptor_type).or_insert(0) += count;
        }
        self.sets_in_use += 1;
        self.allocations.insert(set, requirements);
    }

    fn release(&mut self, set: vk::DescriptorSet) {
        if let Some(requirements) = self.allocations.remove(&set) {
            for (descriptor_type, count) in requirements {
                if let Some(in_use) = self.in_use.get_mut(&descriptor_type) {
                    *in_use = in_use.saturating_sub(count);
                }
            }
            self.sets_in_use = self.sets_in_use.saturating_sub(1);
        }
    }

    fn clear(&mut self) {
        self.in_use.clear();
        self.allocations.clear();
        self.sets_in_use = 0;
    }
}

/// Fixed-capacity descriptor pool
pub struct DescriptorPool<D: RenderDevice> {
    device: Rc<D>,
    pool: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    budget: RefCell<PoolBudget>,
}

impl<D: RenderDevice> DescriptorPool<D> {
    /// Start describing a pool
    pub fn builder(device: Rc<D>) -> DescriptorPoolBuilder<D> {
        DescriptorPoolBuilder {
            device,
            pool_sizes: BTreeMap::new(),
            flags: vk::DescriptorPoolCreateFlags::empty(),
            max_sets: 1000,
        }
    }

    /// Allocate one set of `layout`
    pub fn allocate_descriptor(&self, layout: &DescriptorSetLayout<D>) -> Result<vk::DescriptorSet, DescriptorError> {
        let requirements = layout.requirements();
        self.budget.borrow().check(&requirements)?;

        let set = self
            .device
            .allocate_descriptor_set(self.pool, layout.handle())
            .map_err(|e| match e {
                VulkanError::Api(result @ (vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)) => {
                    DescriptorError::DeviceExhausted(result)
                }
                other => DescriptorError::Vulkan(other),
            })?;

        self.budget.borrow_mut().commit(set, requirements);
        log::trace!("Allocated descriptor set {:?}", set);
        Ok(set)
    }

    /// Return sets to the pool
    pub fn free_descriptors(&self, sets: &[vk::DescriptorSet]) -> Result<(), DescriptorError> {
        if !self.supports_free() {
            return Err(DescriptorError::FreeNotSupported);
        }
        {
            let budget = self.budget.borrow();
            let mut unique = HashSet::with_capacity(sets.len());
            // A repeated set counts as unknown: its first entry already frees it
            if let Some(&unknown) = sets
                .iter()
                .find(|&&set| !budget.allocations.contains_key(&set) || !unique.insert(set))
            {
                return Err(DescriptorError::UnknownSet(unknown));
            }
        }
        if sets.is_empty() {
            return Ok(());
        }

        self.device.free_descriptor_sets(self.pool, sets)?;
        let mut budget = self.budget.borrow_mut();
        for &set in sets {
            budget.release(set);
        }
        Ok(())
    }

    /// Return every set at once
    pub fn reset_pool(&self) -> Result<(), DescriptorError> {
        self.device.reset_descriptor_pool(self.pool)?;
        self.budget.borrow_mut().clear();
        log::debug!("Descriptor pool {:?} reset", self.pool);
        Ok(())
    }

    /// Descriptors of `descriptor_type` still available
    pub fn remaining(&self, descriptor_type: vk::DescriptorType) -> u32 {
        self.budget.borrow().available(descriptor_type)
    }

    /// Sets that can still be allocated
    pub fn sets_remaining(&self) -> u32 {
        let budget = self.budget.borrow();
        budget.max_sets.saturating_sub(budget.sets_in_use)
    }

    /// Whether individual sets can be freed
    pub fn supports_free(&self) -> bool {
        self.flags.contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
    }

    /// Get pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl<D: RenderDevice> Drop for DescriptorPool<D> {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
    }
}

/// Builder for [`DescriptorPool`]
pub struct DescriptorPoolBuilder<D: RenderDevice> {
    device: Rc<D>,
    pool_sizes: BTreeMap<vk::DescriptorType, u32>,
    flags: vk::DescriptorPoolCreateFlags,
    max_sets: u32,
}

impl<D: RenderDevice> DescriptorPoolBuilder<D> {
    /// Reserve `count` descriptors of a type; repeated types accumulate
    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        *self.pool_sizes.entry(descriptor_type).or_insert(0) += count;
        self
    }

    /// Pool creation flags
    pub fn pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Maximum number of sets
    pub fn max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    /// Create the pool
    pub fn build(self) -> Result<DescriptorPool<D>, DescriptorError> {
        let sizes: Vec<vk::DescriptorPoolSize> = self
            .pool_sizes
            .iter()
            .map(|(&ty, &descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
            .collect();

        let pool = self.device.create_descriptor_pool(self.max_sets, self.flags, &sizes)?;
        log::debug!("Descriptor pool created: {} sets, {:?}", self.max_sets, self.pool_sizes);

        Ok(DescriptorPool {
            device: self.device,
            pool,
            flags: self.flags,
            budget: RefCell::new(PoolBudget {
                capacity: self.pool_sizes,
                max_sets: self.max_sets,
                ..PoolBudget::default()
            }),
        })
    }
}

fn is_buffer_type(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

fn is_image_type(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::STORAGE_IMAGE
            | vk::DescriptorType::INPUT_ATTACHMENT
            | vk::DescriptorType::SAMPLER
    )
}

/// Collects writes for one set, then allocates or rewrites it
///
/// Writing a binding the layout lacks, an array binding, or a binding of the
/// other resource kind is a programming error and panics.
pub struct DescriptorWriter<'a, D: RenderDevice> {
    layout: &'a DescriptorSetLayout<D>,
    pool: &'a DescriptorPool<D>,
    writes: Vec<DescriptorWrite>,
}

impl<'a, D: RenderDevice> DescriptorWriter<'a, D> {
    /// Create a writer for sets of `layout` from `pool`
    pub fn new(layout: &'a DescriptorSetLayout<D>, pool: &'a DescriptorPool<D>) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
        }
    }

    fn checked_binding(&self, binding: u32) -> LayoutBinding {
        let info = *self
            .layout
            .binding(binding)
            .unwrap_or_else(|| panic!("Layout does not contain binding {}", binding));
        assert_eq!(
            info.count, 1,
            "Binding {} expects {} descriptors, single writes need a count of 1",
            binding, info.count
        );
        info
    }

    /// Point `binding` at a buffer
    pub fn write_buffer(mut self, binding: u32, buffer_info: vk::DescriptorBufferInfo) -> Self {
        let info = self.checked_binding(binding);
        assert!(
            is_buffer_type(info.descriptor_type),
            "Binding {} is {:?}, not a buffer binding",
            binding,
            info.descriptor_type
        );
        self.writes.push(DescriptorWrite {
            binding,
            descriptor_type: info.descriptor_type,
            resource: DescriptorResource::Buffer(buffer_info),
        });
        self
    }

    /// Point `binding` at an image
    pub fn write_image(mut self, binding: u32, image_info: vk::DescriptorImageInfo) -> Self {
        let info = self.checked_binding(binding);
        assert!(
            is_image_type(info.descriptor_type),
            "Binding {} is {:?}, not an image binding",
            binding,
            info.descriptor_type
        );
        self.writes.push(DescriptorWrite {
            binding,
            descriptor_type: info.descriptor_type,
            resource: DescriptorResource::Image(image_info),
        });
        self
    }

    /// Allocate a set and apply the writes
    pub fn build(self) -> Result<vk::DescriptorSet, DescriptorError> {
        let set = self.pool.allocate_descriptor(self.layout)?;
        self.overwrite(set);
        Ok(set)
    }

    /// Apply the writes to an existing set
    pub fn overwrite(&self, set: vk::DescriptorSet) {
        self.layout.device.update_descriptor_set(set, &self.writes);
    }
}
