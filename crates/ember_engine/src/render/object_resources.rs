//! Per-object component descriptor sets
//!
//! Every object with a model gets set 1: binding 0 is a small uniform block
//! with the object's id, binding 1 its texture (or a shared fallback image
//! when it has no material). Sets follow the drawn objects: created when an
//! object appears, replaced when its texture changes and retired when it is
//! no longer drawn. Replaced and retired sets are only reused or freed once
//! no frame in flight can reference them.

use std::collections::{BTreeMap, BTreeSet};
use std::mem::size_of;
use std::rc::Rc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::render::api::{MappedBuffer, RenderDevice};
use crate::render::descriptors::{DescriptorError, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use crate::render::game_object::{GameObject, GameObjectId, SampledImage};
use crate::render::vulkan::VulkanResult;

/// Component uniform block of one object (std140)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectUbo {
    /// Id of the object
    pub object_id: u32,
    /// 1 when binding 1 holds the object's own texture
    pub has_texture: u32,
    _padding: [u32; 2],
}

unsafe impl Zeroable for ObjectUbo {}
unsafe impl Pod for ObjectUbo {}

impl ObjectUbo {
    /// Block for `object`
    pub fn for_object(object: &GameObject) -> Self {
        Self {
            object_id: object.id(),
            has_texture: u32::from(object.material.is_some()),
            _padding: [0; 2],
        }
    }
}

struct ObjectEntry<D: RenderDevice> {
    buffer: D::Buffer,
    descriptor_set: vk::DescriptorSet,
    texture: Rc<dyn SampledImage>,
}

/// Descriptor sets of every drawable object
pub struct ObjectResources<D: RenderDevice> {
    device: Rc<D>,
    pool: Rc<DescriptorPool<D>>,
    layout: DescriptorSetLayout<D>,
    fallback: Rc<dyn SampledImage>,
    entries: BTreeMap<GameObjectId, ObjectEntry<D>>,
    // Sets of removed objects wait for this many syncs before release
    retired: Vec<(usize, ObjectEntry<D>)>,
    spare_sets: Vec<vk::DescriptorSet>,
}

impl<D: RenderDevice> ObjectResources<D> {
    /// Create the set layout; sets are allocated from `pool` on [`sync`](Self::sync)
    pub fn new(device: Rc<D>, pool: Rc<DescriptorPool<D>>, fallback: Rc<dyn SampledImage>) -> Result<Self, DescriptorError> {
        let layout = DescriptorSetLayout::builder(device.clone())
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .build()?;

        Ok(Self {
            device,
            pool,
            layout,
            fallback,
            entries: BTreeMap::new(),
            retired: Vec::new(),
            spare_sets: Vec::new(),
        })
    }

    /// Layout of set 1
    pub fn layout(&self) -> &DescriptorSetLayout<D> {
        &self.layout
    }

    /// Set of an object, if it is drawable
    pub fn descriptor_set(&self, id: GameObjectId) -> Option<vk::DescriptorSet> {
        self.entries.get(&id).map(|entry| entry.descriptor_set)
    }

    /// Number of objects with a set
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no object has a set
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bring the sets in line with the drawable objects of a frame
    ///
    /// Call once per frame before recording, with every object that will be
    /// drawn. `frames_in_flight` is the number of frame slots: the set of an
    /// object that is no longer passed in, or whose texture changed, is only
    /// released after that many further calls, when no submitted frame can
    /// still reference it.
    pub fn sync<'a>(
        &mut self,
        objects: impl IntoIterator<Item = &'a GameObject>,
        frames_in_flight: usize,
    ) -> Result<(), DescriptorError> {
        self.release_retired()?;

        let mut seen = BTreeSet::new();
        for object in objects {
            seen.insert(object.id());
            let texture = object
                .material
                .as_ref()
                .map(|material| material.texture.clone())
                .unwrap_or_else(|| self.fallback.clone());

            let texture_changed = match self.entries.get(&object.id()) {
                Some(entry) => !Rc::ptr_eq(&entry.texture, &texture),
                None => true,
            };
            if !texture_changed {
                continue;
            }

            // Frames in flight may still reference the old set
            let entry = self.create_entry(object, texture)?;
            if let Some(previous) = self.entries.insert(object.id(), entry) {
                log::trace!("Rebound texture of object {}", object.id());
                self.retired.push((frames_in_flight, previous));
            }
        }

        let stale: Vec<GameObjectId> = self.entries.keys().copied().filter(|id| !seen.contains(id)).collect();
        for id in stale {
            if let Some(entry) = self.entries.remove(&id) {
                log::debug!("Retiring descriptor set of object {}", id);
                self.retired.push((frames_in_flight, entry));
            }
        }

        Ok(())
    }

    fn upload(buffer: &mut D::Buffer, ubo: &ObjectUbo) -> VulkanResult<()> {
        buffer.write_bytes(bytemuck::bytes_of(ubo), 0);
        if !buffer.is_coherent() {
            buffer.flush()?;
        }
        Ok(())
    }

    fn create_entry(&mut self, object: &GameObject, texture: Rc<dyn SampledImage>) -> Result<ObjectEntry<D>, DescriptorError> {
        let mut buffer = self.device.create_mapped_buffer(
            size_of::<ObjectUbo>() as vk::DeviceSize,
            1,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            self.device.min_uniform_buffer_offset_alignment(),
        )?;
        Self::upload(&mut buffer, &ObjectUbo::for_object(object))?;

        let writer = DescriptorWriter::new(&self.layout, &self.pool)
            .write_buffer(0, buffer.descriptor_info())
            .write_image(1, texture.descriptor_image_info());
        let descriptor_set = match self.spare_sets.pop() {
            Some(set) => {
                writer.overwrite(set);
                set
            }
            None => writer.build()?,
        };

        log::trace!("Created descriptor set {:?} for object {}", descriptor_set, object.id());
        Ok(ObjectEntry {
            buffer,
            descriptor_set,
            texture,
        })
    }

    fn release_retired(&mut self) -> Result<(), DescriptorError> {
        let mut expired = Vec::new();
        self.retired.retain_mut(|(remaining, entry)| {
            if *remaining == 0 {
                expired.push(entry.descriptor_set);
                false
            } else {
                *remaining -= 1;
                true
            }
        });

        if expired.is_empty() {
            return Ok(());
        }
        if self.pool.supports_free() {
            self.pool.free_descriptors(&expired)?;
        } else {
            self.spare_sets.extend(expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::game_object::{MaterialComponent, Scene};
    use crate::render::testing::{Call, MockDevice, StubImage};

    fn pool(device: &Rc<MockDevice>, flags: vk::DescriptorPoolCreateFlags) -> Rc<DescriptorPool<MockDevice>> {
        Rc::new(
            DescriptorPool::builder(device.clone())
                .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 16)
                .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 16)
                .pool_flags(flags)
                .max_sets(16)
                .build()
                .unwrap(),
        )
    }

    fn resources(device: &Rc<MockDevice>, flags: vk::DescriptorPoolCreateFlags) -> ObjectResources<MockDevice> {
        ObjectResources::new(device.clone(), pool(device, flags), Rc::new(StubImage(1))).unwrap()
    }

    #[test]
    fn test_object_ubo_layout() {
        assert_eq!(size_of::<ObjectUbo>(), 16);
    }

    #[test]
    fn test_object_ubo_marks_material() {
        let mut scene = Scene::new();
        let plain = ObjectUbo::for_object(scene.create_object());
        let textured = {
            let object = scene.create_object();
            object.material = Some(MaterialComponent { texture: Rc::new(StubImage(2)) });
            ObjectUbo::for_object(object)
        };
        assert_eq!(plain.has_texture, 0);
        assert_eq!(textured.has_texture, 1);
        assert_eq!(textured.object_id, 1);
    }

    #[test]
    fn test_one_set_per_object_and_stable_across_frames() {
        let device = Rc::new(MockDevice::new());
        let mut resources = resources(&device, vk::DescriptorPoolCreateFlags::empty());
        let mut scene = Scene::new();
        let a = scene.create_object().id();
        let b = scene.create_object().id();

        resources.sync(scene.iter(), 2).unwrap();
        let set_a = resources.descriptor_set(a).unwrap();
        assert_ne!(Some(set_a), resources.descriptor_set(b));

        device.clear_calls();
        resources.sync(scene.iter(), 2).unwrap();
        assert!(device.calls().is_empty());
        assert_eq!(resources.descriptor_set(a), Some(set_a));
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn test_texture_change_leaves_in_flight_set_untouched() {
        let device = Rc::new(MockDevice::new());
        let mut resources = resources(&device, vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let mut scene = Scene::new();
        let id = scene.create_object().id();
        resources.sync(scene.iter(), 2).unwrap();
        let old_set = resources.descriptor_set(id).unwrap();

        let texture: Rc<dyn SampledImage> = Rc::new(StubImage(7));
        scene.get_mut(id).unwrap().material = Some(MaterialComponent { texture });
        device.clear_calls();
        resources.sync(scene.iter(), 2).unwrap();

        let new_set = resources.descriptor_set(id).unwrap();
        assert_ne!(new_set, old_set);
        assert_eq!(device.count(|c| matches!(c, Call::AllocateDescriptorSet(_))), 1);
        assert!(!device
            .calls()
            .iter()
            .any(|c| matches!(c, Call::UpdateDescriptorSet { set, .. } if *set == old_set)));

        // The replaced set outlives the frames that may still use it
        resources.sync(scene.iter(), 2).unwrap();
        resources.sync(scene.iter(), 2).unwrap();
        assert_eq!(device.count(|c| matches!(c, Call::FreeDescriptorSets(_))), 0);
        resources.sync(scene.iter(), 2).unwrap();
        assert!(device.calls().contains(&Call::FreeDescriptorSets(vec![old_set])));
        assert_eq!(resources.descriptor_set(id), Some(new_set));
    }

    #[test]
    fn test_unchanged_texture_keeps_set() {
        let device = Rc::new(MockDevice::new());
        let mut resources = resources(&device, vk::DescriptorPoolCreateFlags::empty());
        let mut scene = Scene::new();
        let texture: Rc<dyn SampledImage> = Rc::new(StubImage(3));
        let id = {
            let object = scene.create_object();
            object.material = Some(MaterialComponent { texture: texture.clone() });
            object.id()
        };
        resources.sync(scene.iter(), 2).unwrap();
        let set = resources.descriptor_set(id).unwrap();

        scene.get_mut(id).unwrap().material = Some(MaterialComponent { texture });
        device.clear_calls();
        resources.sync(scene.iter(), 2).unwrap();

        assert!(device.calls().is_empty());
        assert_eq!(resources.descriptor_set(id), Some(set));
    }

    #[test]
    fn test_removed_object_is_freed_after_frames_in_flight() {
        let device = Rc::new(MockDevice::new());
        let mut resources = resources(&device, vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let mut scene = Scene::new();
        let id = scene.create_object().id();
        resources.sync(scene.iter(), 2).unwrap();
        let set = resources.descriptor_set(id).unwrap();

        scene.remove(id);
        resources.sync(scene.iter(), 2).unwrap();
        assert_eq!(resources.descriptor_set(id), None);

        resources.sync(scene.iter(), 2).unwrap();
        resources.sync(scene.iter(), 2).unwrap();
        assert_eq!(device.count(|c| matches!(c, Call::FreeDescriptorSets(_))), 0);

        resources.sync(scene.iter(), 2).unwrap();
        assert!(device.calls().contains(&Call::FreeDescriptorSets(vec![set])));
    }

    #[test]
    fn test_retired_sets_are_reused_without_free_support() {
        let device = Rc::new(MockDevice::new());
        let mut resources = resources(&device, vk::DescriptorPoolCreateFlags::empty());
        let mut scene = Scene::new();
        let old = scene.create_object().id();
        resources.sync(scene.iter(), 1).unwrap();
        let set = resources.descriptor_set(old).unwrap();

        scene.remove(old);
        resources.sync(scene.iter(), 1).unwrap();
        resources.sync(scene.iter(), 1).unwrap();
        resources.sync(scene.iter(), 1).unwrap();

        let new = scene.create_object().id();
        device.clear_calls();
        resources.sync(scene.iter(), 1).unwrap();

        assert_eq!(resources.descriptor_set(new), Some(set));
        assert_eq!(device.count(|c| matches!(c, Call::AllocateDescriptorSet(_))), 0);
        assert_eq!(device.count(|c| matches!(c, Call::FreeDescriptorSets(_))), 0);
    }
}
