// Import specific Rapier2D types, including vector macro
use rapier2d::prelude::{
    ColliderBuilder, Group, InteractionGroups, Real, RigidBodyBuilder, RigidBodyHandle,
    RigidBodySet, Vector, vector,
};
use serde::{Deserialize, Serialize};

// --- Collision Groups (shared across all physics code) ---
pub const GROUP_BOB: u32 = 1 << 0; // 0b00000001
pub const GROUP_BOUNDARY: u32 = 1 << 1; // 0b00000010
pub const BOB_FILTER: u32 = GROUP_BOUNDARY; // Bobs collide with walls only, never with other bobs
pub const BOUNDARY_FILTER: u32 = GROUP_BOB; // Walls collide with bobs

// --- World Constants (1 unit = 1 cm, y grows downward) ---
pub const DEFAULT_WORLD_WIDTH: f32 = 1000.0;
pub const DEFAULT_WORLD_HEIGHT: f32 = 700.0;
pub const DEFAULT_GRAVITY: f32 = 981.0;
pub const WALL_THICKNESS: f32 = 20.0;

// --- Physics Parameters ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsParameters {
    pub width: f32,
    pub height: f32,
    /// Downward acceleration in units/s².
    pub gravity: f32,
    /// Enclose the world with static walls.
    pub boundaries: bool,
    pub wall_restitution: f32,
    pub wall_friction: f32,
}

impl Default for PhysicsParameters {
    fn default() -> Self {
        Self {
            width: DEFAULT_WORLD_WIDTH,
            height: DEFAULT_WORLD_HEIGHT,
            gravity: DEFAULT_GRAVITY,
            boundaries: false, // Training runs have no walls
            wall_restitution: 0.4,
            wall_friction: 0.5,
        }
    }
}

impl PhysicsParameters {
    pub fn gravity_vector(&self) -> Vector<Real> {
        vector![0.0, self.gravity]
    }

    /// Horizontal span the pivot may occupy: the middle two-thirds of the world.
    pub fn travel_bounds(&self) -> TravelBounds {
        TravelBounds {
            min_x: self.width / 6.0,
            max_x: self.width - self.width / 6.0,
        }
    }
}

/// Closed interval of allowed pivot x-coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelBounds {
    pub min_x: f32,
    pub max_x: f32,
}

impl TravelBounds {
    pub fn clamp(&self, x: f32) -> f32 {
        x.clamp(self.min_x, self.max_x)
    }

    pub fn span(&self) -> f32 {
        self.max_x - self.min_x
    }

    /// Linearly rescales `x` so that `min_x` maps to -1 and `max_x` to +1.
    pub fn normalize(&self, x: f32) -> f32 {
        (x - self.min_x) / self.span() * 2.0 - 1.0
    }
}

// === Boundary Builder ===
pub struct BoundaryDefinition {
    pub width: f32,
    pub height: f32,
    pub thickness: f32,
    pub friction: f32,
    pub restitution: f32,
}

impl BoundaryDefinition {
    pub fn new(params: &PhysicsParameters) -> Self {
        Self {
            width: params.width,
            height: params.height,
            thickness: WALL_THICKNESS,
            friction: params.wall_friction,
            restitution: params.wall_restitution,
        }
    }

    // Floor, ceiling, left and right walls as (center, half extents)
    fn wall_boxes(&self) -> [(Vector<Real>, Real, Real); 4] {
        let (w, h, t) = (self.width, self.height, self.thickness);
        [
            (vector![w / 2.0, h - t / 2.0], w / 2.0, t / 2.0),
            (vector![w / 2.0, t / 2.0], w / 2.0, t / 2.0),
            (vector![t / 2.0, h / 2.0], t / 2.0, h / 2.0),
            (vector![w - t / 2.0, h / 2.0], t / 2.0, h / 2.0),
        ]
    }

    // Creates the walls for the headless world
    pub fn create_for_headless(&self) -> Vec<(RigidBodyBuilder, ColliderBuilder)> {
        self.wall_boxes()
            .into_iter()
            .map(|(center, hx, hy)| {
                let body = RigidBodyBuilder::fixed().translation(center);
                let collider = ColliderBuilder::cuboid(hx, hy)
                    .friction(self.friction)
                    .restitution(self.restitution)
                    .collision_groups(InteractionGroups::new(
                        Group::from_bits_truncate(GROUP_BOUNDARY),
                        Group::from_bits_truncate(BOUNDARY_FILTER),
                    ));
                (body, collider)
            })
            .collect()
    }
}

// === Pendulum Builder ===
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendulumDefinition {
    /// Pivot height relative to the vertical center of the world.
    pub pivot_offset_y: f32,
    /// Bob position relative to the pivot at spawn.
    pub bob_offset: [f32; 2],
    pub bob_radius: f32,
    pub bob_mass: f32,
    pub bob_restitution: f32,
    pub bob_friction: f32,
}

impl Default for PendulumDefinition {
    fn default() -> Self {
        Self {
            pivot_offset_y: -50.0,
            bob_offset: [0.0, 100.0], // Hanging straight down
            bob_radius: 20.0,
            bob_mass: 20.0,
            bob_restitution: 0.95,
            bob_friction: 1.0,
        }
    }
}

impl PendulumDefinition {
    pub fn with_bob_offset(mut self, dx: f32, dy: f32) -> Self {
        self.bob_offset = [dx, dy];
        self
    }

    // Calculate the initial pivot position
    pub fn get_initial_pivot_position(&self, params: &PhysicsParameters) -> Vector<Real> {
        vector![params.width / 2.0, params.height / 2.0 + self.pivot_offset_y]
    }

    pub fn get_initial_bob_position(&self, params: &PhysicsParameters) -> Vector<Real> {
        self.get_initial_pivot_position(params) + vector![self.bob_offset[0], self.bob_offset[1]]
    }

    // Creates the pivot for the headless world: moved only by commands
    pub fn create_pivot_for_headless(&self, params: &PhysicsParameters) -> RigidBodyBuilder {
        RigidBodyBuilder::kinematic_velocity_based()
            .translation(self.get_initial_pivot_position(params))
    }

    // Creates the bob for the headless world, tagged with its agent so it never collides with other bobs
    pub fn create_bob_for_headless(
        &self,
        params: &PhysicsParameters,
        isolation_tag: u128,
    ) -> (RigidBodyBuilder, ColliderBuilder) {
        let body = RigidBodyBuilder::dynamic()
            .translation(self.get_initial_bob_position(params))
            .can_sleep(false)
            .ccd_enabled(false);

        let collider = ColliderBuilder::ball(self.bob_radius)
            .mass(self.bob_mass)
            .friction(self.bob_friction)
            .restitution(self.bob_restitution)
            .collision_groups(InteractionGroups::new(
                Group::from_bits_truncate(GROUP_BOB),
                Group::from_bits_truncate(BOB_FILTER),
            ))
            .user_data(isolation_tag);

        (body, collider)
    }
}

// === Pin Constraint ===

/// Rigid-distance joint between a pivot and a bob, solved by projection after
/// every integration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinConstraint {
    pub pivot: RigidBodyHandle,
    pub bob: RigidBodyHandle,
    pub rest_length: f32,
}

impl PinConstraint {
    /// Joins two bodies at their current separation.
    pub fn between(
        bodies: &RigidBodySet,
        pivot: RigidBodyHandle,
        bob: RigidBodyHandle,
    ) -> Option<Self> {
        let pivot_pos = *bodies.get(pivot)?.translation();
        let bob_pos = *bodies.get(bob)?.translation();
        Some(Self {
            pivot,
            bob,
            rest_length: (bob_pos - pivot_pos).norm(),
        })
    }

    /// Projects the bob back onto the circle of radius `rest_length` around the
    /// pivot's current position and strips the radial part of its velocity
    /// relative to the pivot. Returns `false` if either body is gone.
    pub fn solve(&self, bodies: &mut RigidBodySet) -> bool {
        let Some((pivot_pos, pivot_vel)) = bodies
            .get(self.pivot)
            .map(|rb| (*rb.translation(), *rb.linvel()))
        else {
            return false;
        };
        let Some(bob) = bodies.get_mut(self.bob) else {
            return false;
        };

        let arm = bob.translation() - pivot_pos;
        let distance = arm.norm();
        if distance <= Real::EPSILON {
            // No direction to project along; leave the bob where it is.
            return true;
        }
        let direction = arm / distance;

        let relative = bob.linvel() - pivot_vel;
        let radial_speed = relative.dot(&direction);
        let corrected_vel = bob.linvel() - direction * radial_speed;

        bob.set_translation(pivot_pos + direction * self.rest_length, true);
        bob.set_linvel(corrected_vel, true);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn travel_bounds_cover_middle_two_thirds() {
        let params = PhysicsParameters::default();
        let bounds = params.travel_bounds();
        assert_relative_eq!(bounds.min_x, 1000.0 / 6.0);
        assert_relative_eq!(bounds.max_x, 1000.0 - 1000.0 / 6.0);
        assert_relative_eq!(bounds.normalize(bounds.min_x), -1.0);
        assert_relative_eq!(bounds.normalize(bounds.max_x), 1.0);
        assert_relative_eq!(bounds.normalize(500.0), 0.0, epsilon = 1e-6);
        assert_eq!(bounds.clamp(0.0), bounds.min_x);
        assert_eq!(bounds.clamp(2000.0), bounds.max_x);
    }

    #[test]
    fn default_pendulum_hangs_one_meter_below_pivot() {
        let params = PhysicsParameters::default();
        let def = PendulumDefinition::default();
        let pivot = def.get_initial_pivot_position(&params);
        let bob = def.get_initial_bob_position(&params);
        assert_relative_eq!(pivot.x, 500.0);
        assert_relative_eq!(pivot.y, 300.0);
        assert_relative_eq!(bob.y, 400.0);
    }

    #[test]
    fn boundaries_produce_four_walls() {
        let walls = BoundaryDefinition::new(&PhysicsParameters::default()).create_for_headless();
        assert_eq!(walls.len(), 4);
    }

    #[test]
    fn pin_projects_bob_onto_rest_circle() {
        let mut bodies = RigidBodySet::new();
        let pivot = bodies.insert(
            RigidBodyBuilder::kinematic_velocity_based()
                .translation(vector![0.0, 0.0])
                .build(),
        );
        let bob = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(vector![0.0, 100.0])
                .build(),
        );
        let pin = PinConstraint::between(&bodies, pivot, bob).unwrap();
        assert_relative_eq!(pin.rest_length, 100.0);

        // Stretch the arm and give the bob a purely radial velocity.
        bodies[bob].set_translation(vector![0.0, 130.0], true);
        bodies[bob].set_linvel(vector![3.0, 50.0], true);
        assert!(pin.solve(&mut bodies));

        let pos = *bodies[bob].translation();
        let vel = *bodies[bob].linvel();
        assert_relative_eq!(pos.norm(), 100.0, epsilon = 1e-4);
        assert_relative_eq!(vel.y, 0.0, epsilon = 1e-4);
        assert_relative_eq!(vel.x, 3.0, epsilon = 1e-4);
    }

    #[test]
    fn pin_tolerates_coincident_bodies() {
        let mut bodies = RigidBodySet::new();
        let pivot = bodies.insert(RigidBodyBuilder::kinematic_velocity_based().build());
        let bob = bodies.insert(RigidBodyBuilder::dynamic().build());
        let pin = PinConstraint::between(&bodies, pivot, bob).unwrap();
        assert!(pin.solve(&mut bodies));
        assert!(bodies[bob].translation().x.is_finite());
    }
}
