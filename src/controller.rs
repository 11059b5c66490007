//! Controller capability consumed by the fitness harness, plus the concrete
//! controllers shipped with the crate.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ControllerError, PersistenceError};

pub const INPUT_COUNT: usize = 3;
pub const OUTPUT_COUNT: usize = 1;

/// Anything that maps a sensory tuple to at least one output. Only the first
/// output is consumed by the harness.
pub trait Controller: Send + Sync {
    fn evaluate(&self, inputs: [f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError>;
}

impl<C: Controller + ?Sized> Controller for Box<C> {
    fn evaluate(&self, inputs: [f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError> {
        (**self).evaluate(inputs)
    }
}

impl<C: Controller + ?Sized> Controller for Arc<C> {
    fn evaluate(&self, inputs: [f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError> {
        (**self).evaluate(inputs)
    }
}

impl<C: Controller + ?Sized> Controller for &C {
    fn evaluate(&self, inputs: [f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError> {
        (**self).evaluate(inputs)
    }
}

/// Always emits the same output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantController(pub f32);

impl Controller for ConstantController {
    fn evaluate(&self, _inputs: [f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError> {
        Ok(vec![self.0])
    }
}

/// Adapts a closure into a controller.
pub struct FnController<F>(pub F);

impl<F> Controller for FnController<F>
where
    F: Fn([f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError> + Send + Sync,
{
    fn evaluate(&self, inputs: [f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError> {
        (self.0)(inputs)
    }
}

/// Fixed-topology feed-forward network with tanh activations.
///
/// With `hidden == 0` the inputs connect straight to the output. Weights are stored flat, layer by
/// layer: for each layer the `inputs × outputs` matrix (row per input) followed
/// by the layer's biases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredController")]
pub struct NeuralController {
    hidden: usize,
    weights: Vec<f32>,
    fitness: Option<f32>,
}

// On-disk shape; only turned into a controller once the weights fit the topology.
#[derive(Deserialize)]
struct StoredController {
    hidden: usize,
    weights: Vec<f32>,
    #[serde(default)]
    fitness: Option<f32>,
}

impl TryFrom<StoredController> for NeuralController {
    type Error = ControllerError;

    fn try_from(stored: StoredController) -> Result<Self, Self::Error> {
        let controller = Self::from_weights(stored.hidden, stored.weights)?;
        Ok(Self {
            fitness: stored.fitness,
            ..controller
        })
    }
}

impl NeuralController {
    pub fn weight_count(hidden: usize) -> usize {
        layer_sizes(hidden)
            .windows(2)
            .map(|pair| pair[0] * pair[1] + pair[1])
            .sum()
    }

    pub fn from_weights(hidden: usize, weights: Vec<f32>) -> Result<Self, ControllerError> {
        let expected = Self::weight_count(hidden);
        if weights.len() != expected {
            return Err(ControllerError::WeightCount {
                expected,
                actual: weights.len(),
            });
        }
        Ok(Self {
            hidden,
            weights,
            fitness: None,
        })
    }

    pub fn new_random<R: Rng + ?Sized>(rng: &mut R, hidden: usize, weight_limit: f32) -> Self {
        let weights = (0..Self::weight_count(hidden))
            .map(|_| rng.gen_range(-weight_limit..=weight_limit))
            .collect();
        Self {
            hidden,
            weights,
            fitness: None,
        }
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    /// Fitness recorded when the network was saved, if any.
    pub fn recorded_fitness(&self) -> Option<f32> {
        self.fitness
    }

    pub fn with_recorded_fitness(mut self, fitness: f32) -> Self {
        self.fitness = Some(fitness);
        self
    }

    pub fn forward(&self, inputs: [f32; INPUT_COUNT]) -> Vec<f32> {
        let mut activations = inputs.to_vec();
        let mut offset = 0;

        for pair in layer_sizes(self.hidden).windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            let matrix = &self.weights[offset..offset + n_in * n_out];
            let biases = &self.weights[offset + n_in * n_out..offset + n_in * n_out + n_out];

            let mut next = biases.to_vec();
            for (i, &x) in activations.iter().enumerate() {
                for (j, out) in next.iter_mut().enumerate() {
                    *out += x * matrix[i * n_out + j];
                }
            }
            for out in &mut next {
                *out = out.tanh();
            }

            activations = next;
            offset += n_in * n_out + n_out;
        }

        activations
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "controller saved");
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl Controller for NeuralController {
    fn evaluate(&self, inputs: [f32; INPUT_COUNT]) -> Result<Vec<f32>, ControllerError> {
        Ok(self.forward(inputs))
    }
}

fn layer_sizes(hidden: usize) -> Vec<usize> {
    if hidden == 0 {
        vec![INPUT_COUNT, OUTPUT_COUNT]
    } else {
        vec![INPUT_COUNT, hidden, OUTPUT_COUNT]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn weight_counts_follow_topology() {
        assert_eq!(NeuralController::weight_count(0), 3 + 1);
        assert_eq!(NeuralController::weight_count(4), 3 * 4 + 4 + 4 + 1);
    }

    #[test]
    fn direct_network_is_tanh_of_weighted_sum() {
        let net = NeuralController::from_weights(0, vec![0.5, -1.0, 2.0, 0.1]).unwrap();
        let out = net.evaluate([1.0, 0.5, 0.25]).unwrap();
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0], 0.6f32.tanh(), epsilon = 1e-6);
    }

    #[test]
    fn hidden_layer_feeds_the_output() {
        // One hidden node that copies input 0, output copies the hidden node.
        let weights = vec![
            1.0, 0.0, 0.0, // input -> hidden
            0.0, // hidden bias
            1.0, // hidden -> output
            0.0, // output bias
        ];
        let net = NeuralController::from_weights(1, weights).unwrap();
        let out = net.forward([0.3, 9.0, -9.0]);
        assert_relative_eq!(out[0], 0.3f32.tanh().tanh());
    }

    #[test]
    fn wrong_weight_count_is_rejected() {
        let err = NeuralController::from_weights(2, vec![0.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::WeightCount {
                expected: 11,
                actual: 3
            }
        ));
    }

    #[test]
    fn outputs_stay_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = NeuralController::new_random(&mut rng, 6, 3.0);
        for inputs in [[1.0, 1.0, 1.0], [-1.0, 0.5, -3.0], [0.0, 0.0, 0.0]] {
            let out = net.forward(inputs)[0];
            assert!((-1.0..=1.0).contains(&out));
        }
    }

    #[test]
    fn saved_controller_loads_back() {
        let mut rng = StdRng::seed_from_u64(11);
        let net = NeuralController::new_random(&mut rng, 3, 2.0).with_recorded_fitness(12.5);
        let path = std::env::temp_dir().join(format!("pendulum_evo_ctrl_{}.json", std::process::id()));

        net.save_json(&path).unwrap();
        let loaded = NeuralController::load_json(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.recorded_fitness(), Some(12.5));
        assert_eq!(loaded.hidden(), 3);
        let inputs = [0.2, -0.4, 0.1];
        assert_relative_eq!(loaded.forward(inputs)[0], net.forward(inputs)[0]);
    }

    #[test]
    fn mismatched_weights_do_not_deserialize() {
        let err = serde_json::from_str::<NeuralController>(r#"{ "hidden": 2, "weights": [0.1, 0.2, 0.3] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("expected 11"));

        let net: NeuralController =
            serde_json::from_str(r#"{ "hidden": 0, "weights": [1.0, 0.0, 0.0, 0.0] }"#).unwrap();
        assert_eq!(net.recorded_fitness(), None);
        assert_relative_eq!(net.forward([0.5, 0.0, 0.0])[0], 0.5f32.tanh());
    }

    #[test]
    fn closures_and_boxes_are_controllers() {
        let closure = FnController(|inputs: [f32; INPUT_COUNT]| Ok::<_, ControllerError>(vec![inputs[0] * 2.0]));
        assert_eq!(closure.evaluate([0.25, 0.0, 0.0]).unwrap(), vec![0.5]);

        let boxed: Box<dyn Controller> = Box::new(ConstantController(-1.0));
        assert_eq!(boxed.evaluate([0.0; INPUT_COUNT]).unwrap(), vec![-1.0]);
    }
}
