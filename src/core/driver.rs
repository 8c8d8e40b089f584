//! Outer simulation loop: warm-up, then windows of log-scheduled length, each
//! followed by one plasticity round on the trajectory it produced.
//!
//! The widening windows anneal the rewiring frequency as the network settles.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::config::PlasticityConfig;
use crate::connectivity::ConnectivityMatrix;
use crate::dynamics::Reservoir;
use crate::error::{PlasticityError, Result};
use crate::observer::{NoopObserver, ProgressObserver, RunSnapshot};
use crate::plasticity::{self, EditCounters};
use crate::prng::Prng;

/// The warm-up lasts this many `time_increment`s.
pub const WARMUP_INCREMENTS: usize = 5;

/// Candidate window lengths; one is drawn uniformly per round.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IncrementSchedule {
    sizes: Vec<usize>,
}

impl IncrementSchedule {
    pub fn fixed(size: usize) -> Self {
        Self {
            sizes: vec![size.max(1)],
        }
    }

    /// `points` sizes spaced evenly in log10 between `min` and `max`, rounded.
    pub fn log_spaced(min: usize, max: usize, points: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        if points <= 1 {
            return Self::fixed(min);
        }
        let lo = (min as f64).log10();
        let hi = (max as f64).log10();
        let sizes = (0..points)
            .map(|k| {
                let e = lo + (hi - lo) * k as f64 / (points - 1) as f64;
                (10f64.powf(e).round() as usize).max(1)
            })
            .collect();
        Self { sizes }
    }

    pub fn from_config(cfg: &PlasticityConfig) -> Self {
        match cfg.max_increment {
            Some(max) => Self::log_spaced(cfg.time_increment, max, cfg.schedule_points),
            None => Self::fixed(cfg.time_increment),
        }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn max(&self) -> usize {
        self.sizes.iter().copied().max().unwrap_or(1)
    }

    pub fn draw(&self, rng: &mut Prng) -> usize {
        rng.choose(&self.sizes).copied().unwrap_or(1)
    }
}

/// Which homeostatic rule runs after each window.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Rule {
    Desp,
    /// ADSP driven by the window mean against a target rate.
    Adsp { target: f64 },
}

/// Everything a finished run hands back.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    /// `time x neurons`, warm-up included.
    pub history: Array2<f64>,
    pub final_state: Array1<f64>,
    pub weights: ConnectivityMatrix,
    pub inhibitory: Option<ConnectivityMatrix>,
    pub counters: EditCounters,
    /// Cumulative `total_add` after each round, starting with 0.
    pub add_trace: Vec<u64>,
    /// Cumulative `total_prun` after each round, starting with 0.
    pub prun_trace: Vec<u64>,
    /// Samples consumed after the warm-up at the end of each round.
    pub steps: Vec<usize>,
}

/// Drives a reservoir over an input sequence and rewires it as it goes.
///
/// The driver owns the weight matrices and the run's random generator for the
/// duration of the run; nothing else can observe a half-applied round.
#[derive(Debug, Clone)]
pub struct SimulationDriver {
    reservoir: Reservoir,
    w: ConnectivityMatrix,
    w_inhibitory: Option<ConnectivityMatrix>,
    cfg: PlasticityConfig,
    schedule: IncrementSchedule,
    rng: Prng,
}

impl SimulationDriver {
    pub fn new(reservoir: Reservoir, w: ConnectivityMatrix, cfg: PlasticityConfig) -> Result<Self> {
        cfg.validate()?;
        if reservoir.size() == 0 {
            return Err(PlasticityError::InvalidConfig("reservoir must have at least one neuron"));
        }
        if w.rows() != reservoir.size() || w.cols() != reservoir.size() {
            return Err(PlasticityError::ShapeMismatch {
                what: "recurrent matrix",
                expected: reservoir.size(),
                found: w.rows(),
            });
        }
        Ok(Self {
            schedule: IncrementSchedule::from_config(&cfg),
            rng: Prng::new(cfg.seed),
            reservoir,
            w,
            w_inhibitory: None,
            cfg,
        })
    }

    /// Attach a cross-pool inhibitory matrix (`neurons x auxiliary`).
    pub fn with_inhibitory(mut self, w_inhibitory: ConnectivityMatrix) -> Result<Self> {
        if w_inhibitory.rows() != self.w.rows() {
            return Err(PlasticityError::ShapeMismatch {
                what: "cross-pool matrix rows",
                expected: self.w.rows(),
                found: w_inhibitory.rows(),
            });
        }
        self.w_inhibitory = Some(w_inhibitory);
        Ok(self)
    }

    /// Replace the generator, e.g. to continue the stream used for initialisation.
    pub fn with_rng(mut self, rng: Prng) -> Self {
        self.rng = rng;
        self
    }

    pub fn weights(&self) -> &ConnectivityMatrix {
        &self.w
    }

    pub fn inhibitory(&self) -> Option<&ConnectivityMatrix> {
        self.w_inhibitory.as_ref()
    }

    pub fn reservoir(&self) -> &Reservoir {
        &self.reservoir
    }

    pub fn schedule(&self) -> &IncrementSchedule {
        &self.schedule
    }

    pub fn config(&self) -> &PlasticityConfig {
        &self.cfg
    }

    /// DESP over `input` (`time x input_dim`).
    pub fn run(&mut self, input: ArrayView2<'_, f64>) -> Result<SimulationOutcome> {
        self.run_observed(input, &mut NoopObserver)
    }

    pub fn run_observed(
        &mut self,
        input: ArrayView2<'_, f64>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<SimulationOutcome> {
        self.run_rule(input, Rule::Desp, observer)
    }

    /// ADSP over `input`, with `delta_z = trunc((mean(window) - target) / growth_parameter)`.
    pub fn run_adsp(
        &mut self,
        input: ArrayView2<'_, f64>,
        target: f64,
        observer: &mut dyn ProgressObserver,
    ) -> Result<SimulationOutcome> {
        if !target.is_finite() {
            return Err(PlasticityError::InvalidConfig("rate target must be finite"));
        }
        self.run_rule(input, Rule::Adsp { target }, observer)
    }

    fn snapshot(&self, consumed: usize, total: usize, rounds: usize, counters: EditCounters) -> RunSnapshot {
        RunSnapshot {
            consumed,
            total,
            rounds,
            counters,
            excitatory_edges: self.w.nnz(),
            inhibitory_edges: self.w_inhibitory.as_ref().map_or(0, ConnectivityMatrix::nnz),
        }
    }

    /// Advance `len` samples from `cursor`, appending each state to `history`.
    fn advance_window(
        &self,
        input: ArrayView2<'_, f64>,
        cursor: usize,
        len: usize,
        state: &mut Array1<f64>,
        history: &mut Vec<f64>,
    ) -> Result<()> {
        for t in cursor..cursor + len {
            let next = self.reservoir.step(&self.w, input.row(t), state.view())?;
            history.extend(next.iter().copied());
            *state = next;
        }
        Ok(())
    }

    fn run_rule(
        &mut self,
        input: ArrayView2<'_, f64>,
        rule: Rule,
        observer: &mut dyn ProgressObserver,
    ) -> Result<SimulationOutcome> {
        let n = self.reservoir.size();
        let total = input.nrows();
        if input.ncols() != self.reservoir.input_dim() {
            return Err(PlasticityError::ShapeMismatch {
                what: "input width",
                expected: self.reservoir.input_dim(),
                found: input.ncols(),
            });
        }
        let warmup = WARMUP_INCREMENTS * self.cfg.time_increment;
        if total < warmup {
            return Err(PlasticityError::ShapeMismatch {
                what: "input length (warm-up)",
                expected: warmup,
                found: total,
            });
        }

        tracing::info!(
            neurons = n,
            samples = total,
            warmup,
            rule = ?rule,
            schedule = ?self.schedule.sizes(),
            "simulation start"
        );

        let mut state = Array1::from_shape_fn(n, |_| self.rng.gen_range_f64(0.0, 1.0));
        let mut history: Vec<f64> = Vec::with_capacity(total * n);

        // INIT: no plasticity while the reservoir settles onto its trajectory.
        self.advance_window(input, 0, warmup, &mut state, &mut history)?;
        let mut cursor = warmup;

        let mut counters = EditCounters::default();
        let mut add_trace = vec![0];
        let mut prun_trace = vec![0];
        let mut steps = Vec::new();
        let mut step = 0usize;
        observer.on_progress(&self.snapshot(cursor, total, 0, counters));

        // STEP until the remaining input cannot hold the largest window.
        let max_increment = self.schedule.max();
        while total - cursor > max_increment {
            let inc = self.schedule.draw(&mut self.rng);
            self.advance_window(input, cursor, inc, &mut state, &mut history)?;
            cursor += inc;

            let rows = history.len() / n;
            let window = ArrayView2::from_shape((inc, n), &history[(rows - inc) * n..]).map_err(
                |_| PlasticityError::ShapeMismatch {
                    what: "activity window",
                    expected: inc * n,
                    found: history.len(),
                },
            )?;

            let round = match rule {
                Rule::Desp => {
                    let variance = plasticity::compute_variance(
                        window,
                        self.cfg.growth_parameter,
                        self.cfg.averaging,
                        self.cfg.queue_size,
                    )?;
                    plasticity::desp(
                        &mut self.w,
                        self.w_inhibitory.as_mut(),
                        &variance.to_vec(),
                        window,
                        &self.cfg,
                        &mut self.rng,
                    )?
                }
                Rule::Adsp { target } => {
                    let gamma = self.cfg.growth_parameter;
                    let delta_z: Vec<f64> = window
                        .mean_axis(Axis(0))
                        .map(|m| m.mapv(|x| ((x - target) / gamma).trunc()).to_vec())
                        .unwrap_or_else(|| vec![0.0; n]);
                    plasticity::adsp(
                        &mut self.w,
                        self.w_inhibitory.as_mut(),
                        &delta_z,
                        self.cfg.value,
                        &mut self.rng,
                    )?
                }
            };

            counters.merge(round);
            add_trace.push(counters.total_add);
            prun_trace.push(counters.total_prun);
            step += inc;
            steps.push(step);
            observer.on_progress(&self.snapshot(cursor, total, steps.len(), counters));
        }

        // DONE
        let rows = history.len() / n;
        let history = Array2::from_shape_vec((rows, n), history).map_err(|_| {
            PlasticityError::ShapeMismatch {
                what: "state history",
                expected: rows * n,
                found: rows * n,
            }
        })?;

        tracing::info!(
            rounds = steps.len(),
            consumed = cursor,
            added = counters.total_add,
            pruned = counters.total_prun,
            edges = self.w.nnz(),
            "simulation done"
        );

        Ok(SimulationOutcome {
            history,
            final_state: state,
            weights: self.w.clone(),
            inhibitory: self.w_inhibitory.clone(),
            counters,
            add_trace,
            prun_trace,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AveragingMode;
    use crate::connectivity::{Polarity, PoolKind};
    use crate::dynamics::ReservoirConfig;
    use crate::observer::RecordingObserver;
    use ndarray::Array2;

    fn ring(n: usize, weight: f64) -> ConnectivityMatrix {
        ConnectivityMatrix::from_triplets(
            n,
            n,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            (0..n).map(|i| (i, (i + 1) % n, weight)),
        )
        .unwrap()
    }

    fn sine_input(len: usize) -> Array2<f64> {
        Array2::from_shape_fn((len, 1), |(t, _)| (t as f64 * 0.2).sin())
    }

    fn driver(n: usize, cfg: PlasticityConfig) -> SimulationDriver {
        let w_in = Array2::from_shape_fn((n, 1), |(i, _)| 0.5 + 0.1 * i as f64);
        let bias = Array1::from_elem(n, 0.05);
        let reservoir =
            Reservoir::new(w_in, bias, ReservoirConfig::default().with_leaky_rate(0.5)).unwrap();
        SimulationDriver::new(reservoir, ring(n, 0.2), cfg).unwrap()
    }

    #[test]
    fn log_schedule_spans_both_bounds() {
        let s = IncrementSchedule::log_spaced(10, 1000, 3);
        assert_eq!(s.sizes(), &[10, 100, 1000]);
        assert_eq!(s.max(), 1000);

        let s = IncrementSchedule::log_spaced(5, 50, 10);
        assert_eq!(s.sizes().len(), 10);
        assert_eq!(s.sizes()[0], 5);
        assert_eq!(s.sizes()[9], 50);
        assert!(s.sizes().windows(2).all(|w| w[0] <= w[1]));

        let mut rng = Prng::new(3);
        for _ in 0..100 {
            assert!(s.sizes().contains(&s.draw(&mut rng)));
        }
    }

    #[test]
    fn fixed_schedule_without_max_increment() {
        let cfg = PlasticityConfig::default().with_increments(7, None);
        assert_eq!(IncrementSchedule::from_config(&cfg).sizes(), &[7]);
    }

    #[test]
    fn run_consumes_input_until_the_largest_window_no_longer_fits() {
        let cfg = PlasticityConfig::default().with_increments(5, Some(20));
        let mut d = driver(6, cfg);
        let input = sine_input(300);
        let out = d.run(input.view()).unwrap();

        let warmup = 25;
        let consumed = warmup + out.steps.last().copied().unwrap_or(0);
        assert_eq!(out.history.nrows(), consumed);
        assert_eq!(out.history.ncols(), 6);
        assert!(300 - consumed <= 20);
        assert_eq!(out.add_trace.len(), out.steps.len() + 1);
        assert_eq!(out.final_state, out.history.row(consumed - 1).to_owned());
    }

    #[test]
    fn runs_are_reproducible() {
        let cfg = PlasticityConfig::default()
            .with_increments(4, Some(16))
            .with_value(0.05)
            .with_seed(2024);
        let input = sine_input(400);

        let a = driver(8, cfg).run(input.view()).unwrap();
        let b = driver(8, cfg).run(input.view()).unwrap();

        assert_eq!(a.weights, b.weights);
        assert_eq!(a.history, b.history);
        assert_eq!(a.counters, b.counters);
        assert_eq!(a.steps, b.steps);
    }

    #[test]
    fn invariants_hold_across_a_run() {
        let cfg = PlasticityConfig::default()
            .with_increments(4, Some(12))
            .with_value(0.05)
            .with_max_partners(Some(3))
            .with_growth_parameter(0.05)
            .with_averaging(AveragingMode::Queue, 4);
        let mut d = driver(10, cfg)
            .with_inhibitory(ConnectivityMatrix::cross(10, 4, Polarity::Inhibitory))
            .unwrap();
        let initial_edges = (d.weights().nnz()) as i64;

        let out = d.run(sine_input(500).view()).unwrap();

        assert!(out.weights.diagonal_is_empty());
        assert!(out.weights.sign_consistent());
        assert!(out.inhibitory.as_ref().unwrap().sign_consistent());
        assert!(out.add_trace.windows(2).all(|w| w[0] <= w[1]));
        assert!(out.prun_trace.windows(2).all(|w| w[0] <= w[1]));
        let final_edges =
            (out.weights.nnz() + out.inhibitory.as_ref().map_or(0, |m| m.nnz())) as i64;
        assert_eq!(out.counters.net_edges(), final_edges - initial_edges);
    }

    #[test]
    fn observer_sees_every_round() {
        let cfg = PlasticityConfig::default().with_increments(5, None);
        let mut d = driver(4, cfg);
        let mut obs = RecordingObserver::default();
        let out = d.run_observed(sine_input(100).view(), &mut obs).unwrap();

        assert_eq!(obs.snapshots.len(), out.steps.len() + 1);
        assert_eq!(obs.snapshots[0].consumed, 25);
        assert!(obs.snapshots.windows(2).all(|w| w[0].consumed < w[1].consumed));
    }

    #[test]
    fn short_input_is_rejected() {
        let cfg = PlasticityConfig::default().with_increments(10, None);
        let mut d = driver(4, cfg);
        let err = d.run(sine_input(30).view()).unwrap_err();
        assert!(matches!(
            err,
            PlasticityError::ShapeMismatch {
                expected: 50,
                found: 30,
                ..
            }
        ));
    }

    #[test]
    fn empty_reservoir_is_rejected() {
        let reservoir = Reservoir::new(
            Array2::zeros((0, 1)),
            Array1::zeros(0),
            ReservoirConfig::default(),
        )
        .unwrap();
        let err = SimulationDriver::new(
            reservoir,
            ConnectivityMatrix::recurrent(0, Polarity::Excitatory),
            PlasticityConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlasticityError::InvalidConfig(_)));
    }

    #[test]
    fn adsp_run_keeps_invariants() {
        let cfg = PlasticityConfig::default()
            .with_increments(5, Some(10))
            .with_growth_parameter(0.1);
        let mut d = driver(6, cfg)
            .with_inhibitory(ConnectivityMatrix::cross(6, 3, Polarity::Inhibitory))
            .unwrap();
        let out = d
            .run_adsp(sine_input(200).view(), 0.2, &mut NoopObserver)
            .unwrap();
        assert!(out.weights.diagonal_is_empty());
        assert!(out.weights.sign_consistent());
        assert!(!out.steps.is_empty());
    }
}
