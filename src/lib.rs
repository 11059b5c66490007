//! Headless arena of cart-and-pole pendulums plus the fitness harness and
//! neuro-evolution driver that trains controllers to keep them inverted.

pub mod agent;
pub mod arena;
pub mod config;
pub mod controller;
pub mod error;
pub mod evolution;
pub mod fitness;
pub mod physics;

pub use agent::{AgentState, PendulumAgent, SensoryTuple};
pub use arena::{AgentId, Arena, ArenaSnapshot, PendulumState};
pub use config::SimulationConfig;
pub use controller::{ConstantController, Controller, FnController, NeuralController};
pub use error::{ArenaError, ConfigError, ControllerError, EvaluationError, PersistenceError};
pub use evolution::{EvolutionConfig, EvolutionEngine, Individual, Population};
pub use fitness::{
    CenterBonus, EvaluationConfig, FitnessEvaluator, FitnessSink, RoundSummary, RoundView,
    StepObserver, TraceObserver,
};
pub use physics::{PendulumDefinition, PhysicsParameters};
