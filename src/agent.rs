//! One pendulum instance: its lifecycle, sensory readout and command interface.

use std::f32::consts::PI;

use nalgebra::Vector2;

use crate::arena::{AgentId, Arena, PendulumState};
use crate::error::ArenaError;
use crate::physics::{PendulumDefinition, TravelBounds};

/// Fraction of the arm length the bob must rise above the pivot to count as balanced.
pub const UPRIGHT_FRACTION: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    Active,
    Retired,
}

/// Normalized observation handed to a controller every step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensoryTuple {
    /// Pivot x rescaled from its travel bounds to [-1, 1].
    pub pivot_x: f32,
    /// Arm angle from `atan2`, divided by π.
    pub angle: f32,
    /// Angular velocity in rad/s, divided by π.
    pub angular_velocity: f32,
}

impl SensoryTuple {
    pub fn to_array(self) -> [f32; 3] {
        [self.pivot_x, self.angle, self.angular_velocity]
    }
}

#[derive(Debug, Clone)]
pub struct PendulumAgent {
    definition: PendulumDefinition,
    state: AgentState,
    id: Option<AgentId>,
    // Fixed at construction; the solver may let the real distance drift slightly.
    pendulum_length: f32,
    bounds: Option<TravelBounds>,
}

impl PendulumAgent {
    pub fn new(definition: PendulumDefinition) -> Self {
        let [dx, dy] = definition.bob_offset;
        Self {
            pendulum_length: Vector2::new(dx, dy).norm(),
            definition,
            state: AgentState::Unregistered,
            id: None,
            bounds: None,
        }
    }

    pub fn definition(&self) -> &PendulumDefinition {
        &self.definition
    }

    pub fn id(&self) -> Option<AgentId> {
        self.id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn pendulum_length(&self) -> f32 {
        self.pendulum_length
    }

    pub(crate) fn ensure_unregistered(&self) -> Result<(), ArenaError> {
        match (self.state, self.id) {
            (AgentState::Unregistered, _) => Ok(()),
            (AgentState::Active, Some(agent)) => Err(ArenaError::AlreadyRegistered { agent }),
            (AgentState::Retired, Some(agent)) => Err(ArenaError::Retired { agent }),
            (_, None) => Err(ArenaError::invalid(None)),
        }
    }

    pub(crate) fn activate(&mut self, id: AgentId, bounds: TravelBounds) {
        self.id = Some(id);
        self.bounds = Some(bounds);
        self.state = AgentState::Active;
    }

    pub(crate) fn retire(&mut self) {
        self.state = AgentState::Retired;
    }

    fn active_id(&self) -> Result<AgentId, ArenaError> {
        match (self.state, self.id) {
            (AgentState::Active, Some(id)) => Ok(id),
            (_, id) => Err(ArenaError::invalid(id)),
        }
    }

    /// Current pivot and bob state of this agent.
    pub fn observe(&self, arena: &Arena) -> Result<PendulumState, ArenaError> {
        arena.pendulum_state(self.active_id()?)
    }

    /// Reads the normalized `(pivot_x, angle, angular_velocity)` tuple.
    pub fn sense(&self, arena: &Arena) -> Result<SensoryTuple, ArenaError> {
        let state = self.observe(arena)?;
        let bounds = arena.params().travel_bounds();
        let arm = state.bob_position - state.pivot_position;

        Ok(SensoryTuple {
            pivot_x: bounds.normalize(state.pivot_position.x),
            angle: arm.y.atan2(arm.x) / PI,
            angular_velocity: angular_velocity(&state) / PI,
        })
    }

    /// Sets the pivot velocity to `(move_speed, 0)` and moves the pivot by
    /// `move_speed`, clamped to its travel bounds, in the same update.
    pub fn apply_command(&self, arena: &mut Arena, move_speed: f32) -> Result<(), ArenaError> {
        let id = self.active_id()?;
        let bounds = self
            .bounds
            .unwrap_or_else(|| arena.params().travel_bounds());
        let current_x = arena.pendulum_state(id)?.pivot_position.x;
        arena.set_pivot_motion(id, move_speed, bounds.clamp(current_x + move_speed))
    }

    /// Height the bob has to rise above (numerically below) to count as inverted.
    pub fn threshold_y(&self, state: &PendulumState) -> f32 {
        state.pivot_position.y - UPRIGHT_FRACTION * self.pendulum_length
    }

    pub fn is_inverted(&self, state: &PendulumState) -> bool {
        state.bob_position.y < self.threshold_y(state)
    }
}

/// Angular velocity of the bob about the pivot in rad/s; zero for a collapsed arm.
pub fn angular_velocity(state: &PendulumState) -> f32 {
    let arm = state.bob_position - state.pivot_position;
    let length = arm.norm();
    if length == 0.0 {
        return 0.0;
    }

    let relative_velocity = state.bob_velocity - state.pivot_velocity;
    let direction = arm / length;
    let tangential = Vector2::new(-direction.y, direction.x);
    relative_velocity.dot(&tangential) / length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::PhysicsParameters;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const DT: f32 = 1.0 / 60.0;

    fn spawn(def: PendulumDefinition) -> (Arena, PendulumAgent) {
        let mut arena = Arena::new(&PhysicsParameters::default());
        let mut agent = PendulumAgent::new(def);
        arena.add_agent(&mut agent).unwrap();
        (arena, agent)
    }

    #[test]
    fn hanging_pendulum_senses_center_and_half_turn() {
        let (arena, agent) = spawn(PendulumDefinition::default());
        let senses = agent.sense(&arena).unwrap();
        assert_abs_diff_eq!(senses.pivot_x, 0.0, epsilon = 1e-6);
        // Straight down in a y-down world is +π/2.
        assert_relative_eq!(senses.angle, 0.5);
        assert_eq!(senses.angular_velocity, 0.0);
        assert_relative_eq!(agent.pendulum_length(), 100.0);
    }

    #[test]
    fn pivot_x_reaches_unit_bounds_at_the_clamp() {
        let (mut arena, agent) = spawn(PendulumDefinition::default());
        for _ in 0..200 {
            agent.apply_command(&mut arena, -5.0).unwrap();
        }
        assert_relative_eq!(agent.sense(&arena).unwrap().pivot_x, -1.0);

        for _ in 0..400 {
            agent.apply_command(&mut arena, 5.0).unwrap();
        }
        assert_relative_eq!(agent.sense(&arena).unwrap().pivot_x, 1.0);
    }

    #[test]
    fn clamp_pins_the_pivot_exactly_at_the_boundary() {
        let (mut arena, agent) = spawn(PendulumDefinition::default());
        let bounds = arena.params().travel_bounds();
        let mut reached = false;
        for _ in 0..300 {
            agent.apply_command(&mut arena, 7.5).unwrap();
            let x = agent.observe(&arena).unwrap().pivot_position.x;
            assert!(x <= bounds.max_x);
            if reached {
                assert_eq!(x, bounds.max_x);
            }
            reached |= x == bounds.max_x;
            arena.step(DT);
            assert!(agent.observe(&arena).unwrap().pivot_position.x <= bounds.max_x);
        }
        assert!(reached);
    }

    #[test]
    fn command_sets_velocity_and_position_together() {
        let (mut arena, agent) = spawn(PendulumDefinition::default());
        agent.apply_command(&mut arena, 3.0).unwrap();
        let state = agent.observe(&arena).unwrap();
        assert_relative_eq!(state.pivot_position.x, 503.0);
        assert_relative_eq!(state.pivot_position.y, 300.0);
        assert_eq!(state.pivot_velocity, Vector2::new(3.0, 0.0));
    }

    #[test]
    fn angular_velocity_uses_tangential_component_only() {
        let state = PendulumState {
            pivot_position: Vector2::new(0.0, 0.0),
            pivot_velocity: Vector2::new(1.0, 0.0),
            bob_position: Vector2::new(0.0, 50.0),
            // Radial part (y) must be ignored.
            bob_velocity: Vector2::new(-24.0, 30.0),
        };
        // Tangent of a downward arm is (-1, 0); relative velocity is (-25, 30).
        assert_relative_eq!(angular_velocity(&state), 0.5);
    }

    #[test]
    fn collapsed_arm_reads_zero_angular_velocity() {
        let state = PendulumState {
            pivot_position: Vector2::new(10.0, 10.0),
            pivot_velocity: Vector2::zeros(),
            bob_position: Vector2::new(10.0, 10.0),
            bob_velocity: Vector2::new(5.0, -5.0),
        };
        assert_eq!(angular_velocity(&state), 0.0);
    }

    #[test]
    fn retired_agent_cannot_sense_or_move() {
        let (mut arena, mut agent) = spawn(PendulumDefinition::default());
        arena.remove_agent(&mut agent).unwrap();
        assert_eq!(agent.state(), AgentState::Retired);
        assert!(matches!(agent.sense(&arena), Err(ArenaError::InvalidAgent { .. })));
        assert!(matches!(
            agent.apply_command(&mut arena, 1.0),
            Err(ArenaError::InvalidAgent { .. })
        ));
    }

    #[test]
    fn unregistered_agent_cannot_sense() {
        let arena = Arena::new(&PhysicsParameters::default());
        let agent = PendulumAgent::new(PendulumDefinition::default());
        assert_eq!(agent.state(), AgentState::Unregistered);
        assert!(agent.sense(&arena).is_err());
    }

    #[test]
    fn upright_bob_clears_the_threshold() {
        let agent = PendulumAgent::new(PendulumDefinition::default());
        let mut state = PendulumState {
            pivot_position: Vector2::new(500.0, 300.0),
            pivot_velocity: Vector2::zeros(),
            bob_position: Vector2::new(500.0, 200.0),
            bob_velocity: Vector2::zeros(),
        };
        assert_relative_eq!(agent.threshold_y(&state), 210.0);
        assert!(agent.is_inverted(&state));

        state.bob_position.y = 215.0;
        assert!(!agent.is_inverted(&state));
    }
}
