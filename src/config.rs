use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::evolution::EvolutionConfig;
use crate::fitness::{CenterBonus, EvaluationConfig};
use crate::physics::{PendulumDefinition, PhysicsParameters};

/// Everything a training or demo run needs, loadable from a JSON file.
///
/// Missing sections or fields fall back to [`SimulationConfig::default`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub physics: PhysicsParameters,
    pub pendulum: PendulumDefinition,
    pub evaluation: EvaluationConfig,
    pub evolution: EvolutionConfig,
}

impl SimulationConfig {
    /// Balance rewarded only near the middle of the track.
    pub fn centering() -> Self {
        Self {
            evaluation: EvaluationConfig {
                total_duration_secs: 25.0,
                center_bonus: CenterBonus::Centering,
                ..EvaluationConfig::default()
            },
            evolution: EvolutionConfig {
                num_generations: 20,
                ..EvolutionConfig::default()
            },
            ..Self::default()
        }
    }

    /// Short training run for smoke tests.
    pub fn quick() -> Self {
        Self {
            evolution: EvolutionConfig {
                num_generations: 10,
                ..EvolutionConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "centering" => Some(Self::centering()),
            "quick" => Some(Self::quick()),
            _ => None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let physics = &self.physics;
        if !(physics.width.is_finite() && physics.width > 0.0) {
            return Err(ConfigError::invalid("physics.width", "must be positive"));
        }
        if !(physics.height.is_finite() && physics.height > 0.0) {
            return Err(ConfigError::invalid("physics.height", "must be positive"));
        }
        if !physics.gravity.is_finite() {
            return Err(ConfigError::invalid("physics.gravity", "must be finite"));
        }

        let pendulum = &self.pendulum;
        if !(pendulum.bob_radius > 0.0) {
            return Err(ConfigError::invalid("pendulum.bob_radius", "must be positive"));
        }
        if !(pendulum.bob_mass > 0.0) {
            return Err(ConfigError::invalid("pendulum.bob_mass", "must be positive"));
        }
        if !pendulum.bob_offset.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::invalid("pendulum.bob_offset", "must be finite"));
        }

        let evaluation = &self.evaluation;
        if !(evaluation.steps_per_second.is_finite() && evaluation.steps_per_second > 0.0) {
            return Err(ConfigError::invalid(
                "evaluation.steps_per_second",
                "must be positive",
            ));
        }
        if !(evaluation.total_duration_secs.is_finite() && evaluation.total_duration_secs >= 0.0) {
            return Err(ConfigError::invalid(
                "evaluation.total_duration_secs",
                "must be zero or more",
            ));
        }
        if !evaluation.output_scale.is_finite() {
            return Err(ConfigError::invalid("evaluation.output_scale", "must be finite"));
        }

        let evolution = &self.evolution;
        if evolution.population_size == 0 {
            return Err(ConfigError::invalid("evolution.population_size", "must be at least 1"));
        }
        if evolution.tournament_size == 0 {
            return Err(ConfigError::invalid("evolution.tournament_size", "must be at least 1"));
        }
        if evolution.elitism_count > evolution.population_size {
            return Err(ConfigError::invalid(
                "evolution.elitism_count",
                format!("cannot exceed population size {}", evolution.population_size),
            ));
        }
        for (field, rate) in [
            ("evolution.mutation_rate_per_gene", evolution.mutation_rate_per_gene),
            ("evolution.mutation_rate_per_individual", evolution.mutation_rate_per_individual),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::invalid(field, "must lie in [0, 1]"));
            }
        }
        if !(evolution.weight_limit.is_finite() && evolution.weight_limit > 0.0) {
            return Err(ConfigError::invalid("evolution.weight_limit", "must be positive"));
        }
        Ok(())
    }
}
