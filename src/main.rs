use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pendulum_evo::{
    Arena, EvolutionEngine, FitnessEvaluator, NeuralController, SimulationConfig, TraceObserver,
};

#[derive(Parser)]
#[command(name = "pendulum-evo")]
#[command(about = "Evolve neural controllers that balance inverted pendulums")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run neuro-evolution and save the best controller
    Train {
        /// Path to config file (JSON); overrides --preset
        #[arg(long)]
        config: Option<PathBuf>,

        /// Built-in configuration: default, centering or quick
        #[arg(long, default_value = "default")]
        preset: String,

        /// Where to write the winning controller
        #[arg(long, default_value = "winner.json")]
        out: PathBuf,

        /// Override the number of generations
        #[arg(long)]
        generations: Option<usize>,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Evaluate controllers on a thread pool
        #[arg(long)]
        parallel: bool,
    },
    /// Replay a saved controller on a single pendulum
    Demo {
        /// Controller JSON written by `train`
        controller: PathBuf,

        /// Path to config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Length of the replay in seconds
        #[arg(long)]
        seconds: Option<f32>,

        /// Log every N-th step
        #[arg(long, default_value_t = 30)]
        every: usize,
    },
    /// Print a preset configuration as JSON
    PrintConfig {
        #[arg(long, default_value = "default")]
        preset: String,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            preset,
            out,
            generations,
            seed,
            parallel,
        } => {
            let mut config = resolve_config(config, &preset)?;
            if let Some(generations) = generations {
                config.evolution.num_generations = generations;
            }
            if seed.is_some() {
                config.evolution.seed = seed;
            }
            config.evaluation.parallel_control |= parallel;
            train(&config, &out)
        }
        Commands::Demo {
            controller,
            config,
            seconds,
            every,
        } => {
            let mut config = resolve_config(config, "default")?;
            if let Some(seconds) = seconds {
                config.evaluation.total_duration_secs = seconds;
            }
            demo(&config, &controller, every)
        }
        Commands::PrintConfig { preset } => {
            let config = SimulationConfig::preset(&preset)
                .with_context(|| format!("unknown preset '{preset}'"))?;
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn resolve_config(path: Option<PathBuf>, preset: &str) -> Result<SimulationConfig> {
    let config = match path {
        Some(path) => SimulationConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SimulationConfig::preset(preset)
            .with_context(|| format!("unknown preset '{preset}'"))?,
    };
    config.validate()?;
    Ok(config)
}

fn train(config: &SimulationConfig, out: &Path) -> Result<()> {
    info!(
        population = config.evolution.population_size,
        generations = config.evolution.num_generations,
        seconds = config.evaluation.total_duration_secs,
        "training started"
    );

    let mut arena = Arena::new(&config.physics);
    let evaluator = FitnessEvaluator::new(config.evaluation.clone(), config.pendulum.clone());
    let mut engine = EvolutionEngine::new(config.evolution.clone());

    let Some(best) = engine.run(&mut arena, &evaluator)? else {
        bail!("evolution produced no individuals");
    };

    best.network
        .clone()
        .with_recorded_fitness(best.fitness)
        .save_json(out)?;
    info!(fitness = best.fitness, path = %out.display(), "winner saved");
    Ok(())
}

fn demo(config: &SimulationConfig, controller: &Path, every: usize) -> Result<()> {
    let network = NeuralController::load_json(controller)
        .with_context(|| format!("failed to load controller from {}", controller.display()))?;
    if let Some(recorded) = network.recorded_fitness() {
        info!(recorded, "replaying controller");
    }

    let mut arena = Arena::new(&config.physics);
    let evaluator = FitnessEvaluator::new(config.evaluation.clone(), config.pendulum.clone());
    let mut observer = TraceObserver::new(every);
    let mut fitness = vec![0.0f32];

    let summary = evaluator.run_round(
        &mut arena,
        &mut fitness,
        |_| &network,
        Some(&mut observer),
    )?;

    if summary.best_fitness == 0.0 {
        warn!("controller never balanced the pendulum");
    }
    info!(
        fitness = fitness[0],
        steps = summary.steps,
        "demo finished"
    );
    Ok(())
}
