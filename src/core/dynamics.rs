use std::borrow::Cow;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "simd")]
use wide::f64x4;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ndarray::{Array1, Array2, ArrayView1};

use crate::connectivity::ConnectivityMatrix;
use crate::error::{PlasticityError, Result};

/// Elementwise nonlinearity applied after the leaky blend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Activation {
    #[default]
    Tanh,
    Sigmoid,
    Relu,
    Identity,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Relu => x.max(0.0),
            Activation::Identity => x,
        }
    }
}

/// Execution tier for the recurrent update.
///
/// Every tier evaluates the same arithmetic in the same order, so switching
/// tiers never changes a trajectory:
/// - `Scalar`: single-threaded baseline
/// - `Simd`: 4-lane leaky blend via `wide` (requires `simd` feature)
/// - `Parallel`: row-parallel `W·r` via rayon (requires `parallel` feature)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    #[default]
    Scalar,
    Simd,
    Parallel,
}

impl ExecutionTier {
    /// The tier that will actually run, given the compiled features.
    pub fn effective(self) -> ExecutionTier {
        match self {
            ExecutionTier::Scalar => ExecutionTier::Scalar,
            ExecutionTier::Simd => {
                #[cfg(feature = "simd")]
                {
                    ExecutionTier::Simd
                }
                #[cfg(not(feature = "simd"))]
                {
                    ExecutionTier::Scalar
                }
            }
            ExecutionTier::Parallel => {
                #[cfg(feature = "parallel")]
                {
                    ExecutionTier::Parallel
                }
                #[cfg(not(feature = "parallel"))]
                {
                    ExecutionTier::Scalar
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReservoirConfig {
    /// Leaky-integration rate in (0, 1]; 1 is a pure feed-forward response.
    pub leaky_rate: f64,
    pub activation: Activation,
    pub tier: ExecutionTier,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            leaky_rate: 1.0,
            activation: Activation::Tanh,
            tier: ExecutionTier::Scalar,
        }
    }
}

impl ReservoirConfig {
    pub fn with_leaky_rate(mut self, leaky_rate: f64) -> Self {
        self.leaky_rate = leaky_rate;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_tier(mut self, tier: ExecutionTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.leaky_rate.is_finite() && self.leaky_rate > 0.0 && self.leaky_rate <= 1.0) {
            return Err(PlasticityError::InvalidConfig("leaky_rate must be in (0, 1]"));
        }
        Ok(())
    }
}

/// Input coupling and bias of an echo-state reservoir.
///
/// The recurrent matrix is not owned here: plasticity mutates it between
/// windows, so every step borrows the current version.
#[derive(Debug, Clone)]
pub struct Reservoir {
    w_in: Array2<f64>,
    bias: Array1<f64>,
    cfg: ReservoirConfig,
}

impl Reservoir {
    /// `w_in` is `neurons x input_dim`, `bias` has one entry per neuron.
    pub fn new(w_in: Array2<f64>, bias: Array1<f64>, cfg: ReservoirConfig) -> Result<Self> {
        cfg.validate()?;
        if bias.len() != w_in.nrows() {
            return Err(PlasticityError::ShapeMismatch {
                what: "bias",
                expected: w_in.nrows(),
                found: bias.len(),
            });
        }
        Ok(Self { w_in, bias, cfg })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.w_in.nrows()
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.w_in.ncols()
    }

    pub fn config(&self) -> &ReservoirConfig {
        &self.cfg
    }

    pub fn w_in(&self) -> &Array2<f64> {
        &self.w_in
    }

    pub fn bias(&self) -> &Array1<f64> {
        &self.bias
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.cfg.tier = tier;
    }

    /// One recurrence step with the current recurrent weights.
    pub fn step(
        &self,
        w: &ConnectivityMatrix,
        u: ArrayView1<'_, f64>,
        r_prev: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>> {
        advance_with_tier(
            w,
            &self.w_in,
            u,
            r_prev,
            self.cfg.leaky_rate,
            self.bias.view(),
            |x| self.cfg.activation.apply(x),
            self.cfg.tier,
        )
    }
}

/// `r_next = φ((1−α)·r_prev + α·(W·r_prev) + Win·u + b)`.
///
/// Stateless: identical inputs always produce identical outputs.
pub fn advance<F>(
    w: &ConnectivityMatrix,
    w_in: &Array2<f64>,
    u: ArrayView1<'_, f64>,
    r_prev: ArrayView1<'_, f64>,
    leaky_rate: f64,
    bias: ArrayView1<'_, f64>,
    activation: F,
) -> Result<Array1<f64>>
where
    F: Fn(f64) -> f64 + Sync,
{
    advance_with_tier(
        w,
        w_in,
        u,
        r_prev,
        leaky_rate,
        bias,
        activation,
        ExecutionTier::Scalar,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn advance_with_tier<F>(
    w: &ConnectivityMatrix,
    w_in: &Array2<f64>,
    u: ArrayView1<'_, f64>,
    r_prev: ArrayView1<'_, f64>,
    leaky_rate: f64,
    bias: ArrayView1<'_, f64>,
    activation: F,
    tier: ExecutionTier,
) -> Result<Array1<f64>>
where
    F: Fn(f64) -> f64 + Sync,
{
    let n = w.rows();
    if w.cols() != n {
        return Err(PlasticityError::ShapeMismatch {
            what: "recurrent matrix columns",
            expected: n,
            found: w.cols(),
        });
    }
    if r_prev.len() != n {
        return Err(PlasticityError::ShapeMismatch {
            what: "previous state",
            expected: n,
            found: r_prev.len(),
        });
    }
    if w_in.nrows() != n {
        return Err(PlasticityError::ShapeMismatch {
            what: "input matrix rows",
            expected: n,
            found: w_in.nrows(),
        });
    }
    if u.len() != w_in.ncols() {
        return Err(PlasticityError::ShapeMismatch {
            what: "input sample",
            expected: w_in.ncols(),
            found: u.len(),
        });
    }
    if bias.len() != n {
        return Err(PlasticityError::ShapeMismatch {
            what: "bias",
            expected: n,
            found: bias.len(),
        });
    }

    let r: Cow<'_, [f64]> = match r_prev.as_slice() {
        Some(s) => Cow::Borrowed(s),
        None => Cow::Owned(r_prev.to_vec()),
    };
    let drive: Vec<f64> = w_in.dot(&u).to_vec();
    let b: Vec<f64> = bias.to_vec();

    let pre = match tier.effective() {
        ExecutionTier::Scalar => blend_scalar(w, &r, &drive, &b, leaky_rate),
        ExecutionTier::Simd => blend_simd(w, &r, &drive, &b, leaky_rate),
        ExecutionTier::Parallel => blend_parallel(w, &r, &drive, &b, leaky_rate),
    };

    Ok(Array1::from_iter(pre.into_iter().map(activation)))
}

fn blend_scalar(
    w: &ConnectivityMatrix,
    r: &[f64],
    drive: &[f64],
    b: &[f64],
    alpha: f64,
) -> Vec<f64> {
    (0..r.len())
        .map(|i| (1.0 - alpha) * r[i] + alpha * w.row_dot(i, r) + drive[i] + b[i])
        .collect()
}

/// Vectorizes the blend while keeping the sparse row accumulation scalar
/// (irregular memory access patterns).
#[cfg(feature = "simd")]
fn blend_simd(
    w: &ConnectivityMatrix,
    r: &[f64],
    drive: &[f64],
    b: &[f64],
    alpha: f64,
) -> Vec<f64> {
    let n = r.len();
    let wr: Vec<f64> = (0..n).map(|i| w.row_dot(i, r)).collect();
    let mut out = vec![0.0; n];

    let keep = f64x4::splat(1.0 - alpha);
    let alpha_v = f64x4::splat(alpha);

    let simd_end = n - (n % 4);
    for i in (0..simd_end).step_by(4) {
        let rv = f64x4::from([r[i], r[i + 1], r[i + 2], r[i + 3]]);
        let wv = f64x4::from([wr[i], wr[i + 1], wr[i + 2], wr[i + 3]]);
        let iv = f64x4::from([drive[i], drive[i + 1], drive[i + 2], drive[i + 3]]);
        let bv = f64x4::from([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        let pre = keep * rv + alpha_v * wv + iv + bv;
        out[i..(i + 4)].copy_from_slice(&pre.to_array());
    }

    // Tail elements.
    for i in simd_end..n {
        out[i] = (1.0 - alpha) * r[i] + alpha * wr[i] + drive[i] + b[i];
    }
    out
}

#[cfg(not(feature = "simd"))]
fn blend_simd(
    w: &ConnectivityMatrix,
    r: &[f64],
    drive: &[f64],
    b: &[f64],
    alpha: f64,
) -> Vec<f64> {
    blend_scalar(w, r, drive, b, alpha)
}

#[cfg(feature = "parallel")]
fn blend_parallel(
    w: &ConnectivityMatrix,
    r: &[f64],
    drive: &[f64],
    b: &[f64],
    alpha: f64,
) -> Vec<f64> {
    (0..r.len())
        .into_par_iter()
        .map(|i| (1.0 - alpha) * r[i] + alpha * w.row_dot(i, r) + drive[i] + b[i])
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn blend_parallel(
    w: &ConnectivityMatrix,
    r: &[f64],
    drive: &[f64],
    b: &[f64],
    alpha: f64,
) -> Vec<f64> {
    blend_scalar(w, r, drive, b, alpha)
}
