use crate::arena::Arena;
use crate::controller::NeuralController;
use crate::error::{ControllerError, EvaluationError};
use crate::fitness::{FitnessEvaluator, FitnessSink, RoundSummary};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

// Global counter for unique individual IDs
static NEXT_INDIVIDUAL_ID: AtomicUsize = AtomicUsize::new(0);

fn generate_unique_id() -> usize {
    NEXT_INDIVIDUAL_ID.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverType {
    SinglePoint,
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub num_generations: usize,
    pub tournament_size: usize, // For tournament selection
    pub elitism_count: usize, // Number of elite individuals to carry over
    pub mutation_rate_per_gene: f64,
    pub mutation_rate_per_individual: f64, // Chance an individual undergoes mutation at all
    pub crossover_type: CrossoverType,
    pub hidden_neurons: usize,
    pub weight_limit: f32, // Weights live in [-limit, limit]
    pub seed: Option<u64>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            num_generations: 30,
            tournament_size: 3,
            elitism_count: 2, // Carry over top 2 individuals
            mutation_rate_per_gene: 0.2,
            mutation_rate_per_individual: 0.9,
            crossover_type: CrossoverType::Uniform,
            hidden_neurons: 4,
            weight_limit: 3.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Individual {
    pub id: usize,
    pub network: NeuralController,
    pub fitness: f32,
    pub generation: usize, // Track which generation this individual belongs to
}

impl FitnessSink for Individual {
    fn assign_fitness(&mut self, fitness: f32) {
        self.fitness = fitness;
    }
}

impl Individual {
    pub fn new_random<R: Rng + ?Sized>(rng: &mut R, generation: usize, config: &EvolutionConfig) -> Self {
        Self {
            id: generate_unique_id(),
            network: NeuralController::new_random(rng, config.hidden_neurons, config.weight_limit),
            fitness: 0.0,
            generation,
        }
    }

    // Applies mutation to a network based on the evolution config
    fn mutate_network<R: Rng + ?Sized>(network: &mut NeuralController, rng: &mut R, config: &EvolutionConfig) {
        if rng.gen_bool(config.mutation_rate_per_individual) {
            for weight in network.weights_mut() {
                if rng.gen_bool(config.mutation_rate_per_gene) {
                    Self::mutate_float_gene(weight, -config.weight_limit, config.weight_limit, rng);
                }
            }
        }
    }

    fn mutate_float_gene<R: Rng + ?Sized>(value: &mut f32, min: f32, max: f32, rng: &mut R) {
        let range = max - min;
        // Standard deviation is a fraction of the range (e.g., 10%)
        let std_dev = (range * 0.1).max(f32::EPSILON);
        let mutation_value = match Normal::new(0.0, std_dev) {
            Ok(normal) => normal.sample(rng),
            Err(_) => 0.0,
        };
        *value += mutation_value;
        *value = value.clamp(min, max); // Ensure value stays within bounds
    }

    pub fn from_parents<R: Rng + ?Sized>(
        parent1: &Individual,
        parent2: &Individual,
        rng: &mut R,
        config: &EvolutionConfig,
        generation: usize,
    ) -> Result<Self, ControllerError> {
        let mut genes = parent1.network.weights().to_vec();
        let parent2_genes = parent2.network.weights();
        if parent1.network.hidden() != parent2.network.hidden() {
            return Err(ControllerError::WeightCount {
                expected: genes.len(),
                actual: parent2_genes.len(),
            });
        }
        let gene_count = genes.len();

        if gene_count > 0 {
            match config.crossover_type {
                CrossoverType::SinglePoint => {
                    let crossover_point = rng.gen_range(0..gene_count);
                    genes[crossover_point..gene_count]
                        .copy_from_slice(&parent2_genes[crossover_point..gene_count]);
                }
                CrossoverType::Uniform => {
                    for (gene, &other) in genes.iter_mut().zip(parent2_genes) {
                        if rng.gen_bool(0.5) { // 50% chance to take from parent2
                            *gene = other;
                        }
                    }
                }
            }
        }

        let mut network = NeuralController::from_weights(parent1.network.hidden(), genes)?;
        Self::mutate_network(&mut network, rng, config);

        Ok(Self {
            id: generate_unique_id(),
            network,
            fitness: 0.0,
            generation,
        })
    }
}

#[derive(Debug)]
pub struct Population {
    pub individuals: Vec<Individual>,
    pub generation_count: usize,
}

impl Population {
    pub fn new_random<R: Rng + ?Sized>(rng: &mut R, generation: usize, config: &EvolutionConfig) -> Self {
        let individuals = (0..config.population_size)
            .map(|_| Individual::new_random(rng, generation, config))
            .collect();
        Self {
            individuals,
            generation_count: generation,
        }
    }

    // Tournament Selection
    fn select_one_parent<'a, R: Rng + ?Sized>(
        &'a self,
        rng: &mut R,
        tournament_size: usize,
    ) -> Option<&'a Individual> {
        (0..tournament_size.max(1))
            .filter_map(|_| self.individuals.choose(rng))
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
    }

    pub fn select_parents<'a, R: Rng + ?Sized>(
        &'a self,
        rng: &mut R,
        tournament_size: usize,
    ) -> Option<(&'a Individual, &'a Individual)> {
        let parent1 = self.select_one_parent(rng, tournament_size)?;
        let mut parent2 = self.select_one_parent(rng, tournament_size)?;
        // Ensure parents are different if population size allows
        if self.individuals.len() > 1 {
            for _ in 0..16 {
                if parent2.id != parent1.id {
                    break;
                }
                parent2 = self.select_one_parent(rng, tournament_size)?;
            }
        }
        Some((parent1, parent2))
    }

    /// Scores every individual in one shared round, then sorts best first.
    pub fn evaluate_fitness(
        &mut self,
        arena: &mut Arena,
        evaluator: &FitnessEvaluator,
    ) -> Result<RoundSummary, EvaluationError> {
        let summary = evaluator.run_round(
            arena,
            &mut self.individuals,
            |individual| individual.network.clone(),
            None,
        )?;
        // Sort by fitness (descending) for elitism and stats
        self.individuals
            .sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        Ok(summary)
    }

    pub fn best(&self) -> Option<&Individual> {
        self.individuals.first()
    }

    pub fn mean_fitness(&self) -> f32 {
        if self.individuals.is_empty() {
            0.0
        } else {
            self.individuals.iter().map(|ind| ind.fitness).sum::<f32>() / self.individuals.len() as f32
        }
    }
}

pub struct EvolutionEngine {
    pub population: Population,
    config: EvolutionConfig,
    rng: StdRng,
    pub all_time_best_individual: Option<Individual>, // Hall of Fame
}

impl EvolutionEngine {
    pub fn new(config: EvolutionConfig) -> Self {
        let mut rng = Self::make_rng(&config);
        let population = Population::new_random(&mut rng, 0, &config);
        Self {
            population,
            config,
            rng,
            all_time_best_individual: None,
        }
    }

    fn make_rng(config: &EvolutionConfig) -> StdRng {
        match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    // Method to reset the engine to its initial state
    pub fn reset(&mut self) {
        self.rng = Self::make_rng(&self.config);
        self.population = Population::new_random(&mut self.rng, 0, &self.config);
        self.all_time_best_individual = None;
        info!("evolution engine reset");
    }

    fn update_all_time_best(&mut self) {
        if let Some(current_gen_best) = self.population.best() {
            let improved = self
                .all_time_best_individual
                .as_ref()
                .map_or(true, |best| current_gen_best.fitness > best.fitness);
            if improved {
                info!(
                    id = current_gen_best.id,
                    fitness = current_gen_best.fitness,
                    generation = current_gen_best.generation,
                    "new all-time best individual"
                );
                self.all_time_best_individual = Some(current_gen_best.clone());
            }
        }
    }

    /// Evaluates the current generation and records its statistics.
    pub fn evaluate_generation(
        &mut self,
        arena: &mut Arena,
        evaluator: &FitnessEvaluator,
    ) -> Result<RoundSummary, EvaluationError> {
        let summary = self.population.evaluate_fitness(arena, evaluator)?;
        self.update_all_time_best();
        info!(
            generation = self.population.generation_count,
            best = summary.best_fitness,
            mean = summary.mean_fitness,
            "generation evaluated"
        );
        Ok(summary)
    }

    /// Replaces the population with elites plus offspring of tournament winners.
    /// On error the current population is left untouched.
    pub fn breed_next_generation(&mut self) -> Result<(), ControllerError> {
        let next_generation_number = self.population.generation_count + 1;
        let mut new_population = Vec::with_capacity(self.config.population_size);

        // Elitism: Carry over the best individuals from the current population
        new_population.extend(
            self.population
                .individuals
                .iter()
                .take(self.config.elitism_count.min(self.config.population_size))
                .cloned(),
        );

        // Fill the rest of the new population with offspring
        while new_population.len() < self.config.population_size {
            let Some((parent1, parent2)) =
                self.population.select_parents(&mut self.rng, self.config.tournament_size)
            else {
                break;
            };
            let offspring = Individual::from_parents(parent1, parent2, &mut self.rng, &self.config, next_generation_number)?;
            new_population.push(offspring);
        }

        self.population.individuals = new_population;
        self.population.generation_count = next_generation_number;
        Ok(())
    }

    /// Scores the current generation, then breeds its successor.
    pub fn evolve_generation(
        &mut self,
        arena: &mut Arena,
        evaluator: &FitnessEvaluator,
    ) -> Result<RoundSummary, EvaluationError> {
        let summary = self.evaluate_generation(arena, evaluator)?;
        self.breed_next_generation()
            .map_err(EvaluationError::Breeding)?;
        Ok(summary)
    }

    pub fn all_time_best(&self) -> Option<&Individual> {
        self.all_time_best_individual.as_ref()
    }

    /// Runs evaluate/breed cycles for the configured number of generations and
    /// returns the best individual ever seen.
    pub fn run(
        &mut self,
        arena: &mut Arena,
        evaluator: &FitnessEvaluator,
    ) -> Result<Option<&Individual>, EvaluationError> {
        for gen_idx in 0..self.config.num_generations {
            // The final generation is only scored.
            if gen_idx + 1 < self.config.num_generations {
                self.evolve_generation(arena, evaluator)?;
            } else {
                self.evaluate_generation(arena, evaluator)?;
            }
        }

        if let Some(best_overall) = &self.all_time_best_individual {
            info!(
                id = best_overall.id,
                fitness = best_overall.fitness,
                generation = best_overall.generation,
                "training finished"
            );
        }
        Ok(self.all_time_best_individual.as_ref())
    }
}
