use std::path::Path;
use std::result::Result;

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use plastic_esn::prelude::*;
use plastic_esn::{init, readout};

/// Everything one `run` needs, loadable from a partial JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RunConfig {
    init: InitConfig,
    reservoir: ReservoirConfig,
    plasticity: PlasticityConfig,
    readout: ReadoutConfig,
    /// Length of the generated input sequence.
    samples: Option<usize>,
    /// Auxiliary inhibitory neurons; 0 runs without a cross pool.
    inhibitory_pool: usize,
    inhibitory_connectivity: Option<f64>,
    /// Report progress every this fraction of the input.
    progress_every: Option<f64>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" || args[1] == "help" {
        print_help();
        return;
    }

    let result = match args[1].as_str() {
        "run" => load_config(args.get(2).map(Path::new)).and_then(|cfg| run(&cfg)),
        "config" => serde_json::to_string_pretty(&RunConfig::default())
            .map(|json| println!("{json}"))
            .map_err(|e| e.to_string()),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("plastic-esn (echo-state reservoir with structural plasticity)");
    println!("usage:");
    println!("  plastic-esn run [config.json]   drive DESP over a sine input, print a JSON summary");
    println!("  plastic-esn config              print the default config as JSON");
    println!("  plastic-esn --help");
}

fn load_config(path: Option<&Path>) -> Result<RunConfig, String> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))
}

/// `channels` phase-shifted sines, `time x channels`.
fn sine_input(samples: usize, channels: usize) -> Array2<f64> {
    Array2::from_shape_fn((samples, channels), |(t, k)| {
        (t as f64 * 0.05 + k as f64 * std::f64::consts::FRAC_PI_4).sin()
    })
}

fn run(cfg: &RunConfig) -> Result<(), String> {
    let err = |e: PlasticityError| e.to_string();

    let mut rng = Prng::new(cfg.init.seed);
    let m = init::init_matrices(&cfg.init, &mut rng).map_err(err)?;
    let initial_edges = m.w.nnz();

    let inputs = cfg.init.input_dim();
    let schedule = IncrementSchedule::from_config(&cfg.plasticity);
    let warmup = plastic_esn::driver::WARMUP_INCREMENTS * cfg.plasticity.time_increment;
    let samples = cfg.samples.unwrap_or(warmup + 50 * schedule.max());
    let input = sine_input(samples, inputs);

    let reservoir = Reservoir::new(m.w_in, m.bias, cfg.reservoir).map_err(err)?;
    let mut driver = SimulationDriver::new(reservoir, m.w, cfg.plasticity).map_err(err)?;
    if cfg.inhibitory_pool > 0 {
        let density = cfg.inhibitory_connectivity.unwrap_or(cfg.init.connectivity);
        let w_i = init::cross_matrix(
            cfg.init.n,
            cfg.inhibitory_pool,
            density,
            &cfg.init.w_distribution,
            &mut rng,
        )
        .map_err(err)?;
        driver = driver.with_inhibitory(w_i).map_err(err)?;
    }

    info!(neurons = cfg.init.n, inputs, samples, "run configured");
    let mut observer = TracingObserver::new(cfg.progress_every.unwrap_or(0.1));
    let outcome = driver
        .run_observed(input.view(), &mut observer)
        .map_err(err)?;

    // One-step-ahead prediction of the first channel from the trajectory.
    let consumed = outcome.history.nrows();
    let fit = if consumed > 1 && inputs > 0 {
        let states = outcome.history.slice(s![..consumed - 1, ..]);
        let targets = input.slice(s![1..consumed, ..1]);
        match readout::ridge_regression(states, targets, cfg.readout.ridge_coef) {
            Ok(r) => {
                let pred = r.predict(states).map_err(err)?;
                let mse = (&pred - &targets).mapv(|e| e * e).mean().unwrap_or(0.0);
                Some(mse.sqrt())
            }
            Err(e) => {
                warn!(%e, "readout fit skipped");
                None
            }
        }
    } else {
        None
    };

    let summary = serde_json::json!({
        "neurons": cfg.init.n,
        "inputs": inputs,
        "samples": samples,
        "consumed": consumed,
        "schedule": schedule.sizes(),
        "rounds": outcome.steps.len(),
        "counters": outcome.counters,
        "initial_edges": initial_edges,
        "final_edges": outcome.weights.nnz(),
        "inhibitory_edges": outcome.inhibitory.as_ref().map(|w| w.nnz()),
        "add_trace": outcome.add_trace,
        "prun_trace": outcome.prun_trace,
        "steps": outcome.steps,
        "readout_rmse": fit,
    });
    let text = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}
