//! Demo scene: a textured floor, a cube and a ring of colored point lights

use std::path::Path;
use std::rc::Rc;

use ash::vk;
use ember_engine::core::ApplicationConfig;
use ember_engine::foundation::math::{Transform, Vec3};
use ember_engine::foundation::time::FrameTimer;
use ember_engine::render::api::RenderDevice;
use ember_engine::render::descriptors::DescriptorPool;
use ember_engine::render::systems::{MeshSystem, PointLightSystem};
use ember_engine::render::vulkan::{Texture, TextureError, VulkanDevice, VulkanError, Window, WindowError};
use ember_engine::render::{
    Camera, DescriptorError, FrameInfo, FrameUniforms, GlobalUbo, MaterialComponent, MeshData, Model,
    PresentationSurface, RenderError, RenderSystem, Renderer, SampledImage, Scene,
};
use glfw::{Action, Key};
use nalgebra::{Rotation3, Vector3};
use thiserror::Error;

use crate::keyboard_movement_controller::KeyboardMovementController;

/// Upper bound on frame slots the global pool is sized for
const MAX_FRAME_SLOTS: u32 = 8;
/// Upper bound on drawable objects
const MAX_OBJECTS: u32 = 256;
const FLOOR_TEXTURE: &str = "resources/textures/floor.png";
const LIGHT_ORBIT_SPEED: f32 = 0.5;

/// Errors ending the demo
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Texture(#[from] TextureError),
}

/// Rotate `position` around the world Y axis
pub fn rotate_about_y(position: Vec3, angle: f32) -> Vec3 {
    Rotation3::from_axis_angle(&Vector3::y_axis(), angle) * position
}

/// Evenly spaced points on a horizontal circle
pub fn light_ring(count: usize, radius: f32, height: f32) -> Vec<Vec3> {
    (0..count)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::TAU / count as f32;
            rotate_about_y(Vec3::new(radius, height, 0.0), angle)
        })
        .collect()
}

fn checker_pixels(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells).max(1);
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            if light {
                [220, 220, 220, 255]
            } else {
                [90, 90, 110, 255]
            }
        })
        .collect()
}

pub struct App {
    // Dropped in declaration order: everything holding GPU resources goes
    // before the renderer, the device and finally the window
    mesh_system: MeshSystem,
    point_light_system: PointLightSystem<VulkanDevice>,
    frame_uniforms: FrameUniforms<VulkanDevice>,
    scene: Scene,
    renderer: Renderer<VulkanDevice>,
    device: Rc<VulkanDevice>,
    window: Window,
    controller: KeyboardMovementController,
    viewer: Transform,
    camera: Camera,
    max_frame_time: f32,
}

impl App {
    pub fn new(config: &ApplicationConfig) -> Result<Self, AppError> {
        let mut window = Window::new(&config.window)?;
        let device = Rc::new(VulkanDevice::new(&mut window, &config.renderer)?);
        let mut renderer = Renderer::new(device.clone(), &mut window, &config.renderer)?;

        let global_layout = Rc::new(FrameUniforms::create_layout(device.clone())?);
        let global_pool = Rc::new(
            DescriptorPool::builder(device.clone())
                .max_sets(MAX_FRAME_SLOTS)
                .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, MAX_FRAME_SLOTS)
                .build()?,
        );
        let frame_uniforms =
            FrameUniforms::new(device.clone(), global_layout.clone(), global_pool, renderer.image_count())?;

        let object_pool = Rc::new(
            DescriptorPool::builder(device.clone())
                .max_sets(MAX_OBJECTS)
                .pool_flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, MAX_OBJECTS)
                .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, MAX_OBJECTS)
                .build()?,
        );
        let fallback: Rc<dyn SampledImage> = Rc::new(Texture::solid_color(&device, [255, 255, 255, 255])?);

        let shaders = &config.renderer.shaders;
        let mesh_system = MeshSystem::new(
            device.clone(),
            renderer.pipelines_mut(),
            global_layout.handle(),
            object_pool,
            fallback,
            shaders,
        )?;
        let point_light_system =
            PointLightSystem::new(device.clone(), renderer.pipelines_mut(), global_layout.handle(), shaders)?;

        let scene = Self::build_scene(&device)?;

        let mut viewer = Transform::default();
        viewer.translation = Vec3::new(0.0, -0.5, -2.5);

        log::info!("Demo scene ready: {} objects", scene.len());

        Ok(Self {
            mesh_system,
            point_light_system,
            frame_uniforms,
            scene,
            renderer,
            device,
            window,
            controller: KeyboardMovementController::default(),
            viewer,
            camera: Camera::new(),
            max_frame_time: config.engine.max_frame_time,
        })
    }

    fn floor_texture(device: &VulkanDevice) -> Result<Texture, AppError> {
        if Path::new(FLOOR_TEXTURE).exists() {
            return Ok(Texture::from_file(device, FLOOR_TEXTURE)?);
        }
        log::debug!("{} not found, generating a checker texture", FLOOR_TEXTURE);
        let size = 64;
        Ok(Texture::from_rgba(
            device,
            vk::Extent2D { width: size, height: size },
            &checker_pixels(size, 8),
        )?)
    }

    fn build_scene(device: &VulkanDevice) -> Result<Scene, AppError> {
        let mut scene = Scene::new();

        let quad = Rc::new(Model::from_mesh(device, &MeshData::quad())?);
        let floor: Rc<dyn SampledImage> = Rc::new(Self::floor_texture(device)?);
        for x in -2..=2 {
            for z in -2..=2 {
                let tile = scene.create_object();
                tile.model = Some(quad.clone());
                tile.transform.translation = Vec3::new(x as f32, 0.5, z as f32);
                if (x + z) % 2 == 0 {
                    tile.material = Some(MaterialComponent { texture: floor.clone() });
                }
            }
        }

        let cube = scene.create_object();
        cube.model = Some(Rc::new(Model::from_mesh(device, &MeshData::cube())?));
        cube.transform.translation = Vec3::new(0.0, 0.25, 0.0);
        cube.transform.scale = Vec3::new(0.5, 0.5, 0.5);

        let colors = [
            Vec3::new(1.0, 0.1, 0.1),
            Vec3::new(0.1, 0.1, 1.0),
            Vec3::new(0.1, 1.0, 0.1),
            Vec3::new(1.0, 1.0, 0.1),
            Vec3::new(0.1, 1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
        ];
        for (position, color) in light_ring(colors.len(), 1.5, -1.0).into_iter().zip(colors) {
            scene.make_point_light(0.2, 0.1, color).transform.translation = position;
        }

        Ok(scene)
    }

    fn animate_lights(&mut self, dt: f32) {
        for object in self.scene.iter_mut().filter(|o| o.point_light.is_some()) {
            object.transform.translation = rotate_about_y(object.transform.translation, LIGHT_ORBIT_SPEED * dt);
        }
    }

    pub fn run(&mut self) -> Result<(), AppError> {
        let mut timer = FrameTimer::new().with_max_delta(self.max_frame_time);

        while !self.window.should_close() {
            self.window.poll_events();
            if self.window.get_key(Key::Escape) == Action::Press {
                self.window.set_should_close(true);
            }

            let frame_time = timer.tick();
            self.controller.move_in_plane_xz(&self.window, frame_time, &mut self.viewer);
            self.camera.set_view_yxz(self.viewer.translation, self.viewer.rotation);
            self.camera
                .set_perspective_projection(50f32.to_radians(), self.renderer.aspect_ratio(), 0.1, 100.0);
            self.animate_lights(frame_time);

            // Slot count follows the swap chain after a rebuild
            let slots = self.renderer.image_count();
            self.frame_uniforms.ensure_slot_count(slots)?;
            self.mesh_system.prepare(&self.scene, slots)?;

            let Some(command_buffer) = self.renderer.begin_frame(&mut self.window)? else {
                continue;
            };
            let frame_index = self.renderer.frame_index();

            let mut ubo = GlobalUbo::default();
            ubo.set_camera(&self.camera);
            self.point_light_system.update(&self.scene, &mut ubo);
            self.frame_uniforms.write(frame_index, &ubo)?;

            let frame = FrameInfo {
                frame_index,
                frame_time,
                command_buffer,
                camera: &self.camera,
                global_descriptor_set: self.frame_uniforms.descriptor_set(frame_index),
                scene: &self.scene,
                pipelines: self.renderer.pipelines(),
            };

            self.renderer.begin_render_pass(command_buffer);
            self.mesh_system.render(&frame)?;
            self.point_light_system.render(&frame)?;
            self.renderer.end_render_pass(command_buffer);
            self.renderer.end_frame(&mut self.window)?;

            if timer.frame_count() % 1000 == 0 {
                log::debug!("Average FPS: {:.1}", timer.average_fps());
            }
        }

        log::info!("Exiting after {} frames", timer.frame_count());
        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        // Resources below are released while frames may still be in flight
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_light_ring_is_evenly_spaced() {
        let ring = light_ring(4, 2.0, -1.0);
        assert_eq!(ring.len(), 4);
        for position in &ring {
            assert_relative_eq!(position.y, -1.0);
            assert_relative_eq!(Vec3::new(position.x, 0.0, position.z).norm(), 2.0, epsilon = 1e-5);
        }
        assert_relative_eq!(ring[0], Vec3::new(2.0, -1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(ring[2], Vec3::new(-2.0, -1.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_rotation_keeps_height_and_radius() {
        let rotated = rotate_about_y(Vec3::new(1.0, 3.0, 0.0), 1.0);
        assert_relative_eq!(rotated.y, 3.0);
        assert_relative_eq!(Vec3::new(rotated.x, 0.0, rotated.z).norm(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_checker_pixels() {
        let pixels = checker_pixels(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(&pixels[0..4], &[220, 220, 220, 255]);
        // Third pixel of the first row is in the next cell
        assert_eq!(&pixels[8..12], &[90, 90, 110, 255]);
    }
}
