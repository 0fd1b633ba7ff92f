//! Game objects and the scene that owns them
//!
//! A game object is a transform plus optional components: a model to draw, a
//! point light, a material texture. The [`Scene`] hands out ids in increasing
//! order and iterates objects in that order.

use std::collections::BTreeMap;
use std::rc::Rc;

use ash::vk;

use crate::foundation::math::{Transform, Vec3};
use crate::render::primitives::Model;

/// Identifier of a game object, unique within its scene
pub type GameObjectId = u32;

/// Anything that can be bound as a combined image sampler
pub trait SampledImage {
    /// Sampler, view and layout for a descriptor write
    fn descriptor_image_info(&self) -> vk::DescriptorImageInfo;
}

/// Makes an object emit light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLightComponent {
    /// Multiplier applied to the object's color
    pub light_intensity: f32,
}

/// Texture sampled by the mesh shader
#[derive(Clone)]
pub struct MaterialComponent {
    /// Diffuse texture
    pub texture: Rc<dyn SampledImage>,
}

/// An entity in the scene
pub struct GameObject {
    id: GameObjectId,
    /// Placement in world space; a point light's radius is `scale.x`
    pub transform: Transform,
    /// Base color, also the light color of point lights
    pub color: Vec3,
    /// Mesh to draw
    pub model: Option<Rc<Model>>,
    /// Light emitted by this object
    pub point_light: Option<PointLightComponent>,
    /// Texture of this object
    pub material: Option<MaterialComponent>,
}

impl GameObject {
    fn new(id: GameObjectId) -> Self {
        Self {
            id,
            transform: Transform::default(),
            color: Vec3::new(1.0, 1.0, 1.0),
            model: None,
            point_light: None,
            material: None,
        }
    }

    /// Identifier of this object
    pub fn id(&self) -> GameObjectId {
        self.id
    }

    /// Radius of a point light billboard
    pub fn light_radius(&self) -> f32 {
        self.transform.scale.x
    }
}

/// Owns all game objects
#[derive(Default)]
pub struct Scene {
    objects: BTreeMap<GameObjectId, GameObject>,
    next_id: GameObjectId,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty object and return it for configuration
    pub fn create_object(&mut self) -> &mut GameObject {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.entry(id).or_insert_with(|| GameObject::new(id))
    }

    /// Add a point light
    pub fn make_point_light(&mut self, intensity: f32, radius: f32, color: Vec3) -> &mut GameObject {
        let object = self.create_object();
        object.color = color;
        object.transform.scale.x = radius;
        object.point_light = Some(PointLightComponent { light_intensity: intensity });
        object
    }

    /// Look up an object
    pub fn get(&self, id: GameObjectId) -> Option<&GameObject> {
        self.objects.get(&id)
    }

    /// Look up an object for modification
    pub fn get_mut(&mut self, id: GameObjectId) -> Option<&mut GameObject> {
        self.objects.get_mut(&id)
    }

    /// Remove an object, its id is never reused
    pub fn remove(&mut self, id: GameObjectId) -> Option<GameObject> {
        self.objects.remove(&id)
    }

    /// All objects in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    /// All objects in ascending id order, mutable
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut GameObject> {
        self.objects.values_mut()
    }

    /// Objects with a point light component, in ascending id order
    pub fn point_lights(&self) -> impl Iterator<Item = (&GameObject, PointLightComponent)> {
        self.objects
            .values()
            .filter_map(|object| object.point_light.map(|light| (object, light)))
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the scene has no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
