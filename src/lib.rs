//! # plastic_esn
//!
//! Echo-state reservoirs whose recurrent wiring rewires itself.
//!
//! A leaky-integrator reservoir is driven over an input sequence; after every
//! window of activity a homeostatic rule adds or removes recurrent edges so
//! that each neuron's activity (ADSP) or activity variance (DESP) drifts back
//! toward a target band. A ridge-regression readout turns the final
//! trajectory into predictions.
//!
//! ## Quick Start
//!
//! ```
//! use plastic_esn::prelude::*;
//! use ndarray::Array2;
//!
//! let init = InitConfig::default().with_size(32, 4).with_connectivity(0.2);
//! let mut rng = Prng::new(init.seed);
//! let m = init_matrices(&init, &mut rng).unwrap();
//!
//! let reservoir = Reservoir::new(m.w_in, m.bias, ReservoirConfig::default()).unwrap();
//! let cfg = PlasticityConfig::default().with_increments(5, Some(20));
//! let mut driver = SimulationDriver::new(reservoir, m.w, cfg).unwrap();
//!
//! let input = Array2::from_shape_fn((400, 8), |(t, k)| ((t + k) as f64 * 0.1).sin());
//! let outcome = driver.run(input.view()).unwrap();
//! assert!(outcome.weights.diagonal_is_empty());
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Serialization of configs, matrices and readouts
//! - `parallel`: Row-parallel recurrent update via rayon
//! - `simd`: 4-lane leaky blend via the `wide` crate
//!
//! ## Modules
//!
//! - [`connectivity`]: Sparse signed weight matrices
//! - [`dynamics`]: The reservoir recurrence
//! - [`partners`]: Growth and pruning partner selection
//! - [`plasticity`]: ADSP / DESP controllers
//! - [`driver`]: Windowed simulation loop
//! - [`readout`]: Ridge-regression readout
//! - [`init`]: Random reservoir construction
//! - [`analysis`]: Richness measures over state histories
//! - [`observer`]: Read-only progress observation

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/connectivity.rs"]
pub mod connectivity;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/dynamics.rs"]
pub mod dynamics;

#[path = "core/analysis.rs"]
pub mod analysis;

#[path = "core/partners.rs"]
pub mod partners;

#[path = "core/plasticity.rs"]
pub mod plasticity;

#[path = "core/driver.rs"]
pub mod driver;

#[path = "core/readout.rs"]
pub mod readout;

#[path = "core/init.rs"]
pub mod init;

pub mod observer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{AveragingMode, PlasticityConfig};
    pub use crate::connectivity::{
        Connection, ConnectivityMatrix, EdgeChange, NeuronId, Polarity, PoolKind, Weight,
    };
    pub use crate::driver::{IncrementSchedule, SimulationDriver, SimulationOutcome};
    pub use crate::dynamics::{Activation, ExecutionTier, Reservoir, ReservoirConfig};
    pub use crate::error::{PlasticityError, Result};
    pub use crate::init::{init_matrices, Distribution, InitConfig, InitialMatrices};
    pub use crate::observer::{NoopObserver, ProgressObserver, RunSnapshot, TracingObserver};
    pub use crate::plasticity::{adsp, compute_variance, desp, EditCounters, Homeostasis};
    pub use crate::prng::Prng;
    pub use crate::readout::{Readout, ReadoutConfig};
}
