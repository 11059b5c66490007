//! Batch fitness evaluation: one round spawns a pendulum per controller,
//! drives every pendulum in lockstep and scores how long each stays inverted.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::agent::{PendulumAgent, SensoryTuple};
use crate::arena::{AgentId, AgentSnapshot, Arena, ArenaSnapshot};
use crate::controller::Controller;
use crate::error::{ArenaError, ControllerError, EvaluationError};
use crate::physics::PendulumDefinition;

/// How a balanced step is rewarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterBonus {
    /// Every balanced step is worth its duration.
    #[default]
    Flat,
    /// Balanced steps are weighted by how close the pivot is to the center.
    Centering,
}

impl CenterBonus {
    pub fn coefficient(self, pivot_x: f32, width: f32) -> f32 {
        match self {
            CenterBonus::Flat => 1.0,
            CenterBonus::Centering => {
                let offset = 1.0 - pivot_x / (width / 2.0);
                (1.0 - offset * offset).max(0.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub steps_per_second: f32,
    pub total_duration_secs: f32,
    /// Multiplier from controller output to pivot move speed.
    pub output_scale: f32,
    pub center_bonus: CenterBonus,
    /// Run the sense/evaluate phase across threads.
    pub parallel_control: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            steps_per_second: 60.0,
            total_duration_secs: 30.0,
            output_scale: 5.0,
            center_bonus: CenterBonus::Flat,
            parallel_control: false,
        }
    }
}

impl EvaluationConfig {
    pub fn step_duration(&self) -> f32 {
        1.0 / self.steps_per_second
    }
}

/// Number of fixed steps needed to cover `total_duration`: the ceiling of the
/// ratio, ignoring float noise just above a whole number.
pub fn step_count(step_duration: f32, total_duration: f32) -> Result<usize, EvaluationError> {
    let valid = step_duration.is_finite()
        && step_duration > 0.0
        && total_duration.is_finite()
        && total_duration >= 0.0;
    if !valid {
        return Err(EvaluationError::InvalidTiming {
            step_duration,
            total_duration,
        });
    }

    let ratio = f64::from(total_duration) / f64::from(step_duration);
    let nearest = ratio.round();
    let steps = if (ratio - nearest).abs() <= 1e-6 * ratio.max(1.0) {
        nearest
    } else {
        ratio.ceil()
    };
    Ok(steps as usize)
}

/// Receives the fitness computed for one population member.
pub trait FitnessSink {
    fn assign_fitness(&mut self, fitness: f32);
}

impl FitnessSink for f32 {
    fn assign_fitness(&mut self, fitness: f32) {
        *self = fitness;
    }
}

/// State of a round after one step, as seen by an observer.
pub struct RoundView<'a> {
    pub step: usize,
    pub total_steps: usize,
    /// Every agent in the arena, including ones registered outside this round.
    pub arena: ArenaSnapshot,
    /// This round's agents, in population order.
    pub ids: &'a [AgentId],
    /// Sensory tuple each controller saw this step, in population order.
    pub senses: &'a [SensoryTuple],
    /// Move speed each agent was commanded this step.
    pub commands: &'a [f32],
    pub fitness: &'a [f32],
}

impl RoundView<'_> {
    /// Snapshot of the `index`-th population member's pendulum.
    pub fn agent(&self, index: usize) -> Option<&AgentSnapshot> {
        let id = self.ids.get(index)?;
        self.arena.agents.iter().find(|agent| agent.id == *id)
    }
}

/// Optional read-only hook invoked after every step.
pub trait StepObserver {
    fn on_step(&mut self, view: &RoundView<'_>);
}

impl<F> StepObserver for F
where
    F: FnMut(&RoundView<'_>),
{
    fn on_step(&mut self, view: &RoundView<'_>) {
        self(view)
    }
}

/// Logs every agent's readout at a fixed step interval.
pub struct TraceObserver {
    every: usize,
}

impl TraceObserver {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl StepObserver for TraceObserver {
    fn on_step(&mut self, view: &RoundView<'_>) {
        if view.step % self.every != 0 && view.step + 1 != view.total_steps {
            return;
        }
        let readouts = view
            .ids
            .iter()
            .zip(view.senses)
            .zip(view.commands)
            .zip(view.fitness);
        for (((id, senses), move_speed), fitness) in readouts {
            let Some(agent) = view.arena.agents.iter().find(|agent| agent.id == *id) else {
                continue;
            };
            info!(
                step = view.step,
                agent = %id,
                pivot_x = agent.state.pivot_position.x,
                angle = senses.angle,
                angular_velocity = senses.angular_velocity,
                move_speed,
                fitness,
                "pendulum"
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundSummary {
    pub agents: usize,
    pub steps: usize,
    pub best_fitness: f32,
    pub mean_fitness: f32,
}

struct RoundEntry<C> {
    controller: C,
    agent: PendulumAgent,
    fitness: f32,
}

impl<C: Controller> RoundEntry<C> {
    fn decide(
        &self,
        arena: &Arena,
        output_scale: f32,
        index: usize,
        step: usize,
    ) -> Result<(SensoryTuple, f32), EvaluationError> {
        let senses = self.agent.sense(arena)?;
        let controller_error = |source| EvaluationError::Controller {
            index,
            step,
            source,
        };

        let outputs = self
            .controller
            .evaluate(senses.to_array())
            .map_err(controller_error)?;
        let first = *outputs
            .first()
            .ok_or_else(|| controller_error(ControllerError::EmptyOutput))?;
        if !first.is_finite() {
            return Err(controller_error(ControllerError::NonFiniteOutput(first)));
        }

        Ok((senses, first * output_scale))
    }
}

/// Controllers, agents and accumulated fitness for one round.
pub struct FitnessRound<C> {
    entries: Vec<RoundEntry<C>>,
    elapsed: f32,
    step_count: usize,
}

impl<C: Controller> FitnessRound<C> {
    fn new(step_count: usize, capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            elapsed: 0.0,
            step_count,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn fitness(&self) -> Vec<f32> {
        self.entries.iter().map(|e| e.fitness).collect()
    }

    fn decide_all(
        &self,
        arena: &Arena,
        config: &EvaluationConfig,
        step: usize,
    ) -> Result<Vec<(SensoryTuple, f32)>, EvaluationError> {
        if config.parallel_control {
            self.entries
                .par_iter()
                .enumerate()
                .map(|(i, entry)| entry.decide(arena, config.output_scale, i, step))
                .collect()
        } else {
            self.entries
                .iter()
                .enumerate()
                .map(|(i, entry)| entry.decide(arena, config.output_scale, i, step))
                .collect()
        }
    }

    fn run(
        &mut self,
        arena: &mut Arena,
        config: &EvaluationConfig,
        mut observer: Option<&mut dyn StepObserver>,
    ) -> Result<(), EvaluationError> {
        if self.entries.is_empty() {
            return Ok(());
        }

        let dt = config.step_duration();
        let width = arena.params().width;

        for step in 0..self.step_count {
            let decisions = self.decide_all(arena, config, step)?;

            for (entry, &(_, move_speed)) in self.entries.iter_mut().zip(&decisions) {
                entry.agent.apply_command(arena, move_speed)?;

                let state = entry.agent.observe(arena)?;
                if entry.agent.is_inverted(&state) {
                    entry.fitness +=
                        dt * config.center_bonus.coefficient(state.pivot_position.x, width);
                }
            }

            arena.step(dt);
            self.elapsed += dt;

            if let Some(observer) = observer.as_mut() {
                let (senses, commands): (Vec<_>, Vec<_>) = decisions.into_iter().unzip();
                let fitness = self.fitness();
                let ids: Vec<AgentId> = self.entries.iter().filter_map(|e| e.agent.id()).collect();
                observer.on_step(&RoundView {
                    step,
                    total_steps: self.step_count,
                    arena: arena.snapshot(),
                    ids: &ids,
                    senses: &senses,
                    commands: &commands,
                    fitness: &fitness,
                });
            }
            trace!(step, elapsed = self.elapsed, "round step");
        }
        Ok(())
    }

    // Deregisters every still-active agent; reports the first failure.
    fn retire(&mut self, arena: &mut Arena) -> Result<(), ArenaError> {
        let mut first_error = None;
        for entry in &mut self.entries {
            if entry.agent.id().is_some_and(|id| arena.is_registered(id)) {
                if let Err(err) = arena.remove_agent(&mut entry.agent) {
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn summary(&self) -> RoundSummary {
        let agents = self.entries.len();
        let total: f32 = self.entries.iter().map(|e| e.fitness).sum();
        RoundSummary {
            agents,
            steps: self.step_count,
            best_fitness: self
                .entries
                .iter()
                .map(|e| e.fitness)
                .fold(0.0, f32::max),
            mean_fitness: if agents == 0 {
                0.0
            } else {
                total / agents as f32
            },
        }
    }
}

/// Runs fitness rounds over whole populations.
#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    config: EvaluationConfig,
    pendulum: PendulumDefinition,
}

impl FitnessEvaluator {
    pub fn new(config: EvaluationConfig, pendulum: PendulumDefinition) -> Self {
        Self { config, pendulum }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluates every member of `population` in one shared arena and writes
    /// the accumulated fitness back through [`FitnessSink`].
    ///
    /// Any controller or arena failure aborts the round. Every agent this
    /// round registered is removed from `arena` before returning, on success
    /// and on failure alike.
    pub fn run_round<M, C, F>(
        &self,
        arena: &mut Arena,
        population: &mut [M],
        mut controller_factory: F,
        observer: Option<&mut dyn StepObserver>,
    ) -> Result<RoundSummary, EvaluationError>
    where
        M: FitnessSink,
        C: Controller,
        F: FnMut(&M) -> C,
    {
        let steps = step_count(self.config.step_duration(), self.config.total_duration_secs)?;
        let mut round = FitnessRound::new(steps, population.len());

        for member in population.iter() {
            let controller = controller_factory(member);
            let mut agent = PendulumAgent::new(self.pendulum.clone());
            if let Err(err) = arena.add_agent(&mut agent) {
                round.retire(arena)?;
                return Err(err.into());
            }
            round.entries.push(RoundEntry {
                controller,
                agent,
                fitness: 0.0,
            });
        }
        debug!(agents = round.len(), steps, "round started");

        let outcome = round.run(arena, &self.config, observer);
        let retired = round.retire(arena);
        outcome?;
        retired?;

        for (member, entry) in population.iter_mut().zip(&round.entries) {
            member.assign_fitness(entry.fitness);
        }

        let summary = round.summary();
        debug!(
            agents = summary.agents,
            best = summary.best_fitness,
            mean = summary.mean_fitness,
            "round complete"
        );
        Ok(summary)
    }
}
