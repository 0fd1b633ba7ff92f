//! First-person camera movement from keyboard state

use std::f32::consts::TAU;

use ember_engine::foundation::math::{Transform, Vec3};
use ember_engine::render::vulkan::Window;
use glfw::{Action, Key};

/// Keys driving the controller
#[derive(Debug, Clone, Copy)]
pub struct KeyMappings {
    pub move_left: Key,
    pub move_right: Key,
    pub move_forward: Key,
    pub move_backward: Key,
    pub move_up: Key,
    pub move_down: Key,
    pub look_left: Key,
    pub look_right: Key,
    pub look_up: Key,
    pub look_down: Key,
}

impl Default for KeyMappings {
    fn default() -> Self {
        Self {
            move_left: Key::A,
            move_right: Key::D,
            move_forward: Key::W,
            move_backward: Key::S,
            move_up: Key::E,
            move_down: Key::Q,
            look_left: Key::Left,
            look_right: Key::Right,
            look_up: Key::Up,
            look_down: Key::Down,
        }
    }
}

/// Snapshot of the pressed movement keys
#[derive(Debug, Clone, Copy, Default)]
pub struct MovementInput {
    pub left: bool,
    pub right: bool,
    pub forward: bool,
    pub backward: bool,
    pub up: bool,
    pub down: bool,
    pub look_left: bool,
    pub look_right: bool,
    pub look_up: bool,
    pub look_down: bool,
}

fn axis(positive: bool, negative: bool) -> f32 {
    f32::from(u8::from(positive)) - f32::from(u8::from(negative))
}

/// Moves a transform in the XZ plane and turns it with the arrow keys
pub struct KeyboardMovementController {
    pub keys: KeyMappings,
    pub move_speed: f32,
    pub look_speed: f32,
}

impl Default for KeyboardMovementController {
    fn default() -> Self {
        Self {
            keys: KeyMappings::default(),
            move_speed: 5.0,
            look_speed: 1.5,
        }
    }
}

impl KeyboardMovementController {
    /// Pitch limit in radians
    pub const MAX_PITCH: f32 = 1.5;

    fn read_input(&self, window: &Window) -> MovementInput {
        let pressed = |key: Key| window.get_key(key) == Action::Press;
        MovementInput {
            left: pressed(self.keys.move_left),
            right: pressed(self.keys.move_right),
            forward: pressed(self.keys.move_forward),
            backward: pressed(self.keys.move_backward),
            up: pressed(self.keys.move_up),
            down: pressed(self.keys.move_down),
            look_left: pressed(self.keys.look_left),
            look_right: pressed(self.keys.look_right),
            look_up: pressed(self.keys.look_up),
            look_down: pressed(self.keys.look_down),
        }
    }

    /// Apply the current keyboard state
    pub fn move_in_plane_xz(&self, window: &Window, dt: f32, transform: &mut Transform) {
        let input = self.read_input(window);
        self.apply(input, dt, transform);
    }

    /// Apply one input snapshot over `dt` seconds
    pub fn apply(&self, input: MovementInput, dt: f32, transform: &mut Transform) {
        let rotate = Vec3::new(
            axis(input.look_up, input.look_down),
            axis(input.look_right, input.look_left),
            0.0,
        );
        if rotate.dot(&rotate) > f32::EPSILON {
            transform.rotation += self.look_speed * dt * rotate.normalize();
        }

        transform.rotation.x = transform.rotation.x.clamp(-Self::MAX_PITCH, Self::MAX_PITCH);
        transform.rotation.y = transform.rotation.y.rem_euclid(TAU);

        let yaw = transform.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        // Vulkan clip space: -y is up
        let up = Vec3::new(0.0, -1.0, 0.0);

        let direction = forward * axis(input.forward, input.backward)
            + right * axis(input.right, input.left)
            + up * axis(input.up, input.down);
        if direction.dot(&direction) > f32::EPSILON {
            transform.translation += self.move_speed * dt * direction.normalize();
        }
    }
}
