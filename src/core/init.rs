//! Random reservoir construction.
//!
//! Every draw comes from the caller's generator, in a fixed order (recurrent
//! positions, recurrent weights, input weights, bias), so a seed pins down the
//! whole network.

use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ndarray::{Array1, Array2};

use crate::connectivity::{ConnectivityMatrix, Polarity, PoolKind};
use crate::error::{PlasticityError, Result};
use crate::prng::Prng;

/// Power iteration stops once `|W v - λ v| <= SPECTRAL_TOLERANCE * |λ|`.
pub const SPECTRAL_TOLERANCE: f64 = 1e-6;

/// Power iteration budget per neuron.
pub const SPECTRAL_ITERATIONS_PER_NEURON: usize = 20;

/// Floor on the budget of the shifted iteration.
pub const SHIFTED_MIN_ITERATIONS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "lowercase"))]
pub enum Distribution {
    /// Uniform in `[low, high)`.
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
}

impl Distribution {
    pub fn sample(&self, rng: &mut Prng) -> f64 {
        match *self {
            Distribution::Uniform { low, high } => rng.gen_range_f64(low, high),
            Distribution::Normal { mean, std } => mean + std * rng.next_gaussian(),
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match *self {
            Distribution::Uniform { low, high } => low.is_finite() && high.is_finite() && low <= high,
            Distribution::Normal { mean, std } => mean.is_finite() && std.is_finite() && std >= 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(PlasticityError::InvalidConfig("distribution parameters are invalid"))
        }
    }
}

/// Shape and statistics of a freshly generated reservoir.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InitConfig {
    /// Reservoir neurons.
    pub n: usize,
    /// Fraction of the `n x n` recurrent positions that start populated.
    pub connectivity: f64,
    /// Neurons driven by each input channel; there are `n / k` inputs.
    pub k: usize,
    /// Target spectral radius of the recurrent matrix.
    pub spectral_radius: f64,
    pub w_distribution: Distribution,
    pub win_distribution: Distribution,
    pub bias_distribution: Distribution,
    pub seed: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            n: 100,
            connectivity: 0.1,
            k: 1,
            spectral_radius: 1.0,
            w_distribution: Distribution::Uniform { low: 0.0, high: 1.0 },
            win_distribution: Distribution::Normal { mean: 1.0, std: 0.5 },
            bias_distribution: Distribution::Normal { mean: 0.1, std: 0.1 },
            seed: 111,
        }
    }
}

impl InitConfig {
    pub fn with_size(mut self, n: usize, k: usize) -> Self {
        self.n = n;
        self.k = k;
        self
    }

    pub fn with_connectivity(mut self, connectivity: f64) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_spectral_radius(mut self, spectral_radius: f64) -> Self {
        self.spectral_radius = spectral_radius;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn input_dim(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.n / self.k
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(PlasticityError::InvalidConfig("n must be >= 1"));
        }
        if self.k == 0 || self.k > self.n {
            return Err(PlasticityError::InvalidConfig("k must be in 1..=n"));
        }
        if !(0.0..=1.0).contains(&self.connectivity) {
            return Err(PlasticityError::InvalidConfig("connectivity must be in [0, 1]"));
        }
        if !(self.spectral_radius.is_finite() && self.spectral_radius > 0.0) {
            return Err(PlasticityError::InvalidConfig(
                "spectral_radius must be finite and > 0",
            ));
        }
        self.w_distribution.validate()?;
        self.win_distribution.validate()?;
        self.bias_distribution.validate()
    }
}

/// A generated reservoir: `w_in` is `n x input_dim`, `bias` has `n` entries.
#[derive(Debug, Clone)]
pub struct InitialMatrices {
    pub w_in: Array2<f64>,
    pub w: ConnectivityMatrix,
    pub bias: Array1<f64>,
}

/// `count` distinct indices in `0..total`, in ascending order (Floyd's algorithm).
fn sample_positions(total: usize, count: usize, rng: &mut Prng) -> BTreeSet<usize> {
    let count = count.min(total);
    let mut picked = BTreeSet::new();
    for j in (total - count)..total {
        let t = rng.gen_range_usize(0, j + 1);
        if !picked.insert(t) {
            picked.insert(j);
        }
    }
    picked
}

/// Sparse random `rows x cols` triplets with weights from `dist`.
///
/// Draws whose sign does not fit `polarity` (zero included) leave their
/// position empty.
fn random_triplets(
    rows: usize,
    cols: usize,
    density: f64,
    dist: &Distribution,
    polarity: Polarity,
    rng: &mut Prng,
) -> Vec<(usize, usize, f64)> {
    let total = rows * cols;
    let count = (density * total as f64).round() as usize;
    let positions = sample_positions(total, count, rng);
    positions
        .into_iter()
        .filter_map(|p| {
            let w = dist.sample(rng);
            polarity.admits(w).then_some((p / cols, p % cols, w))
        })
        .collect()
}

/// Build the input matrix, the recurrent matrix and the bias of a new reservoir.
///
/// The recurrent matrix is excitatory, has an empty diagonal and is rescaled
/// to `cfg.spectral_radius` unless it has no edges (or a nilpotent pattern).
pub fn init_matrices(cfg: &InitConfig, rng: &mut Prng) -> Result<InitialMatrices> {
    cfg.validate()?;
    let n = cfg.n;

    let triplets = random_triplets(
        n,
        n,
        cfg.connectivity,
        &cfg.w_distribution,
        Polarity::Excitatory,
        rng,
    );
    let mut w = ConnectivityMatrix::from_triplets(
        n,
        n,
        Polarity::Excitatory,
        PoolKind::Recurrent,
        triplets.into_iter().filter(|&(r, c, _)| r != c),
    )?;

    if w.nnz() > 0 {
        let radius = spectral_radius(&w, rng)?;
        if radius > 0.0 {
            w.scale(cfg.spectral_radius / radius)?;
        }
        tracing::debug!(n, edges = w.nnz(), radius, "recurrent matrix rescaled");
    }

    let inputs = cfg.input_dim();
    let mut w_in = Array2::zeros((n, inputs));
    for i in 0..inputs {
        for r in (i * cfg.k)..((i + 1) * cfg.k) {
            w_in[[r, i]] = cfg.win_distribution.sample(rng);
        }
    }

    let bias = Array1::from_shape_fn(n, |_| cfg.bias_distribution.sample(rng));

    Ok(InitialMatrices { w_in, w, bias })
}

/// A sparse inhibitory `rows x cols` matrix for a cross pool.
///
/// Weights are drawn from `dist` and negated, so a positive distribution
/// yields a purely inhibitory pool.
pub fn cross_matrix(
    rows: usize,
    cols: usize,
    density: f64,
    dist: &Distribution,
    rng: &mut Prng,
) -> Result<ConnectivityMatrix> {
    if !(0.0..=1.0).contains(&density) {
        return Err(PlasticityError::InvalidConfig("connectivity must be in [0, 1]"));
    }
    dist.validate()?;
    let negated = match *dist {
        Distribution::Uniform { low, high } => Distribution::Uniform { low: -high, high: -low },
        Distribution::Normal { mean, std } => Distribution::Normal { mean: -mean, std },
    };
    let triplets = random_triplets(rows, cols, density, &negated, Polarity::Inhibitory, rng);
    ConnectivityMatrix::from_triplets(rows, cols, Polarity::Inhibitory, PoolKind::Cross, triplets)
}

/// Largest eigenvalue magnitude of a square single-polarity matrix.
///
/// Plain power iteration is tried first. When the dominant eigenvalues share
/// their magnitude (a cycle of period `p` has `p` of them), it cannot settle,
/// so the iteration is repeated on `|W| + sI`. For a nonnegative matrix the
/// Perron root `ρ + s` is then strictly dominant, whatever the period.
pub fn spectral_radius(w: &ConnectivityMatrix, rng: &mut Prng) -> Result<f64> {
    let start: Vec<f64> = (0..w.rows()).map(|_| rng.gen_range_f64(0.5, 1.0)).collect();
    match power_iteration(w, start.clone()) {
        Err(PlasticityError::ConvergenceFailure { .. }) => shifted_power_iteration(w, start),
        other => other,
    }
}

/// Power iteration from `start` with a budget of `20 * n` products.
///
/// A dominant pair of equal magnitude (e.g. a permutation cycle) never settles
/// and is reported as `ConvergenceFailure`.
pub fn power_iteration(w: &ConnectivityMatrix, start: Vec<f64>) -> Result<f64> {
    let v = unit_start(w, start)?;
    let budget = w.rows() * SPECTRAL_ITERATIONS_PER_NEURON;
    let lambda = rayleigh_iteration(v, budget, |x, out| w.matvec_into(x, out))?;
    Ok(lambda.map_or(0.0, f64::abs))
}

/// Power iteration on `|W| + sI`, with `s` the mean absolute row sum of `W`.
///
/// The budget is `20 * n` products but never below
/// [`SHIFTED_MIN_ITERATIONS`]: the shift that breaks the periodicity also
/// narrows the spectral gap.
pub fn shifted_power_iteration(w: &ConnectivityMatrix, start: Vec<f64>) -> Result<f64> {
    let v = unit_start(w, start)?;
    let n = w.rows();
    let shift = w.iter().map(|(_, _, x)| x.abs()).sum::<f64>() / n as f64;
    if shift == 0.0 {
        return Ok(0.0);
    }
    let sign = w.polarity().sign();
    let budget = (n * SPECTRAL_ITERATIONS_PER_NEURON).max(SHIFTED_MIN_ITERATIONS);
    let lambda = rayleigh_iteration(v, budget, |x, out| {
        w.matvec_into(x, out)?;
        for (o, &xi) in out.iter_mut().zip(x) {
            *o = sign * *o + shift * xi;
        }
        Ok(())
    })?;
    Ok(lambda.map_or(0.0, |l| (l - shift).max(0.0)))
}

fn unit_start(w: &ConnectivityMatrix, start: Vec<f64>) -> Result<Vec<f64>> {
    let n = w.rows();
    if w.cols() != n || start.len() != n {
        return Err(PlasticityError::ShapeMismatch {
            what: "power iteration vector",
            expected: n,
            found: start.len(),
        });
    }
    let len = norm(&start);
    if len == 0.0 {
        return Err(PlasticityError::InvalidConfig("power iteration start is zero"));
    }
    Ok(start.into_iter().map(|x| x / len).collect())
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Signed dominant eigenvalue of the operator `apply`, starting from unit `v`.
///
/// `None` when the iterate vanishes (nilpotent operator).
fn rayleigh_iteration<F>(mut v: Vec<f64>, budget: usize, mut apply: F) -> Result<Option<f64>>
where
    F: FnMut(&[f64], &mut [f64]) -> Result<()>,
{
    let mut next = vec![0.0; v.len()];
    for _ in 0..budget {
        apply(&v, &mut next)?;
        let len = norm(&next);
        if len == 0.0 {
            return Ok(None);
        }
        // Rayleigh quotient keeps the sign, so a negative dominant root converges too.
        let lambda: f64 = v.iter().zip(&next).map(|(a, b)| a * b).sum();
        let residual = v
            .iter()
            .zip(&next)
            .map(|(a, b)| (b - lambda * a).powi(2))
            .sum::<f64>()
            .sqrt();
        if residual <= SPECTRAL_TOLERANCE * lambda.abs() {
            return Ok(Some(lambda));
        }
        for (a, b) in v.iter_mut().zip(&next) {
            *a = b / len;
        }
    }
    Err(PlasticityError::ConvergenceFailure { iterations: budget })
}
