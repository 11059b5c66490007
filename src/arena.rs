use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::Vector2;
use rapier2d::prelude::*;
use tracing::{debug, trace};

use crate::agent::PendulumAgent;
use crate::error::ArenaError;
use crate::physics::{BoundaryDefinition, PhysicsParameters, PinConstraint, TravelBounds};

// Global counter for unique agent tags
static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(0);

fn generate_unique_id() -> AgentId {
    AgentId(NEXT_AGENT_ID.fetch_add(1, Ordering::SeqCst))
}

/// Collision-isolation tag, unique to one agent for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// Handles owned by one registered agent
#[derive(Debug, Clone, Copy)]
struct AgentBodies {
    pivot: RigidBodyHandle,
    bob: RigidBodyHandle,
    pin: PinConstraint,
    bounds: TravelBounds,
    // Last commanded pivot x; the integrator never moves the pivot past it.
    pivot_x: f32,
}

/// Kinematic state of one pendulum, copied out of the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendulumState {
    pub pivot_position: Vector2<f32>,
    pub pivot_velocity: Vector2<f32>,
    pub bob_position: Vector2<f32>,
    pub bob_velocity: Vector2<f32>,
}

/// Read-only view of one agent handed to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub state: PendulumState,
}

/// Read-only view of the whole arena after a step.
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaSnapshot {
    pub steps: u64,
    pub elapsed: f32,
    pub agents: Vec<AgentSnapshot>,
}

/// Shared simulated world: every live pendulum is integrated here in lockstep.
pub struct Arena {
    params: PhysicsParameters,
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    agents: BTreeMap<AgentId, AgentBodies>,
    steps: u64,
    elapsed: f32,
}

impl Arena {
    pub fn new(params: &PhysicsParameters) -> Self {
        let mut integration_params = IntegrationParameters::default();
        integration_params.dt = 1.0 / 60.0; // Overwritten by every step()

        let mut arena = Self {
            params: params.clone(),
            gravity: params.gravity_vector(),
            integration_parameters: integration_params,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            agents: BTreeMap::new(),
            steps: 0,
            elapsed: 0.0,
        };

        if params.boundaries {
            for (body, collider) in BoundaryDefinition::new(params).create_for_headless() {
                let handle = arena.rigid_body_set.insert(body.build());
                arena.collider_set.insert_with_parent(
                    collider.build(),
                    handle,
                    &mut arena.rigid_body_set,
                );
            }
        }

        arena
    }

    pub fn params(&self) -> &PhysicsParameters {
        &self.params
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn is_registered(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Inserts the agent's pivot, bob and pin into the world and marks it active.
    pub fn add_agent(&mut self, agent: &mut PendulumAgent) -> Result<AgentId, ArenaError> {
        agent.ensure_unregistered()?;

        let id = generate_unique_id();
        let definition = agent.definition();

        let pivot_x = definition.get_initial_pivot_position(&self.params).x;
        let pivot = self
            .rigid_body_set
            .insert(definition.create_pivot_for_headless(&self.params).build());
        let (bob_body, bob_collider) =
            definition.create_bob_for_headless(&self.params, u128::from(id.0));
        let bob = self.rigid_body_set.insert(bob_body.build());
        self.collider_set
            .insert_with_parent(bob_collider.build(), bob, &mut self.rigid_body_set);

        let pin = PinConstraint {
            pivot,
            bob,
            rest_length: agent.pendulum_length(),
        };
        let bounds = self.params.travel_bounds();
        self.agents.insert(
            id,
            AgentBodies {
                pivot,
                bob,
                pin,
                bounds,
                pivot_x,
            },
        );
        agent.activate(id, bounds);

        debug!(agent = %id, length = pin.rest_length, "agent registered");
        Ok(id)
    }

    /// Removes the agent's bodies. Fails for agents that are not registered here.
    pub fn remove_agent(&mut self, agent: &mut PendulumAgent) -> Result<(), ArenaError> {
        let id = agent.id().ok_or_else(|| ArenaError::invalid(None))?;
        let bodies = self
            .agents
            .remove(&id)
            .ok_or_else(|| ArenaError::invalid(Some(id)))?;

        for handle in [bodies.bob, bodies.pivot] {
            self.rigid_body_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true, // Drop the bob collider with its body
            );
        }
        agent.retire();

        debug!(agent = %id, "agent retired");
        Ok(())
    }

    /// Advances every bob by `dt` seconds; pivots stay where the last command put them.
    /// A no-op when no agents are registered.
    pub fn step(&mut self, dt: f32) {
        if self.agents.is_empty() {
            return;
        }

        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(), // Hook, not used here
            &(), // Event handler, not used here
        );

        for (id, bodies) in &self.agents {
            // Pivots move only through commands: undo the integrator's
            // velocity drift while keeping the velocity for the pin and sensors.
            if let Some(pivot) = self.rigid_body_set.get_mut(bodies.pivot) {
                let pos = *pivot.translation();
                let commanded_x = bodies.bounds.clamp(bodies.pivot_x);
                if commanded_x != pos.x {
                    pivot.set_translation(vector![commanded_x, pos.y], true);
                }
            }
            if !bodies.pin.solve(&mut self.rigid_body_set) {
                trace!(agent = %id, "pin skipped, body missing");
            }
        }

        self.steps += 1;
        self.elapsed += dt;
    }

    /// Copies out the pivot and bob state of a registered agent.
    pub fn pendulum_state(&self, id: AgentId) -> Result<PendulumState, ArenaError> {
        let bodies = self
            .agents
            .get(&id)
            .ok_or_else(|| ArenaError::invalid(Some(id)))?;
        let pivot = self
            .rigid_body_set
            .get(bodies.pivot)
            .ok_or(ArenaError::MissingBody { agent: id })?;
        let bob = self
            .rigid_body_set
            .get(bodies.bob)
            .ok_or(ArenaError::MissingBody { agent: id })?;

        Ok(PendulumState {
            pivot_position: *pivot.translation(),
            pivot_velocity: *pivot.linvel(),
            bob_position: *bob.translation(),
            bob_velocity: *bob.linvel(),
        })
    }

    /// Overwrites the pivot's commanded velocity and position in one update.
    pub(crate) fn set_pivot_motion(
        &mut self,
        id: AgentId,
        velocity_x: f32,
        position_x: f32,
    ) -> Result<(), ArenaError> {
        let bodies = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| ArenaError::invalid(Some(id)))?;
        let pivot = self
            .rigid_body_set
            .get_mut(bodies.pivot)
            .ok_or(ArenaError::MissingBody { agent: id })?;

        bodies.pivot_x = position_x;
        let y = pivot.translation().y;
        pivot.set_linvel(vector![velocity_x, 0.0], true);
        pivot.set_translation(vector![position_x, y], true);
        Ok(())
    }

    pub fn snapshot(&self) -> ArenaSnapshot {
        let agents = self
            .agents
            .keys()
            .filter_map(|&id| {
                self.pendulum_state(id)
                    .ok()
                    .map(|state| AgentSnapshot { id, state })
            })
            .collect();
        ArenaSnapshot {
            steps: self.steps,
            elapsed: self.elapsed,
            agents,
        }
    }
}
