//! Linear readout fitted by ridge regression on reservoir states.
//!
//! The design matrix gets a leading bias column; the bias weight is not
//! regularized. The normal equations are solved by Gaussian elimination with
//! partial pivoting, and a vanishing pivot is reported instead of producing a
//! meaningless fit.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ndarray::{s, Array1, Array2, ArrayView2, Axis};

use crate::connectivity::ConnectivityMatrix;
use crate::dynamics::Reservoir;
use crate::error::{PlasticityError, Result};
use crate::prng::Prng;

/// Pivots smaller than this fraction of the largest diagonal entry are singular.
pub const PIVOT_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReadoutConfig {
    /// L2 strength on the state weights.
    pub ridge_coef: f64,
    /// Leading samples driven through the reservoir but left out of the fit.
    pub init_len: usize,
}

impl Default for ReadoutConfig {
    fn default() -> Self {
        Self {
            ridge_coef: 1e-8,
            init_len: 0,
        }
    }
}

impl ReadoutConfig {
    pub fn with_ridge_coef(mut self, ridge_coef: f64) -> Self {
        self.ridge_coef = ridge_coef;
        self
    }

    pub fn with_init_len(mut self, init_len: usize) -> Self {
        self.init_len = init_len;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.ridge_coef.is_finite() && self.ridge_coef >= 0.0) {
            return Err(PlasticityError::InvalidConfig(
                "ridge_coef must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

/// `y = W_out · r + b_out`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Readout {
    /// `outputs x neurons`.
    pub w_out: Array2<f64>,
    pub b_out: Array1<f64>,
}

impl Readout {
    pub fn outputs(&self) -> usize {
        self.w_out.nrows()
    }

    /// Predictions for every row of `states` (`time x neurons`), as `time x outputs`.
    pub fn predict(&self, states: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if states.ncols() != self.w_out.ncols() {
            return Err(PlasticityError::ShapeMismatch {
                what: "readout state width",
                expected: self.w_out.ncols(),
                found: states.ncols(),
            });
        }
        Ok(states.dot(&self.w_out.t()) + &self.b_out)
    }
}

/// Fit `targets ≈ states · W_outᵀ + b_out`.
///
/// `states` is `time x neurons`, `targets` is `time x outputs`.
pub fn ridge_regression(
    states: ArrayView2<'_, f64>,
    targets: ArrayView2<'_, f64>,
    ridge_coef: f64,
) -> Result<Readout> {
    if states.nrows() != targets.nrows() {
        return Err(PlasticityError::ShapeMismatch {
            what: "target rows",
            expected: states.nrows(),
            found: targets.nrows(),
        });
    }
    let (t, n) = states.dim();
    if t == 0 {
        return Err(PlasticityError::ShapeMismatch {
            what: "training samples",
            expected: 1,
            found: 0,
        });
    }

    let mut design = Array2::ones((t, n + 1));
    design.slice_mut(s![.., 1..]).assign(&states);

    let mut gram = design.t().dot(&design);
    for i in 1..=n {
        gram[[i, i]] += ridge_coef;
    }
    let rhs = design.t().dot(&targets);

    let solution = solve(gram, rhs)?;
    Ok(Readout {
        w_out: solution.slice(s![1.., ..]).t().to_owned(),
        b_out: solution.row(0).to_owned(),
    })
}

/// Solve `a · x = b` in place. `a` is square, `b` may carry several columns.
fn solve(mut a: Array2<f64>, mut b: Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let scale = a.diag().iter().fold(0.0f64, |m, &d| m.max(d.abs()));
    let threshold = PIVOT_TOLERANCE * scale;
    if scale == 0.0 {
        return Err(PlasticityError::NumericalInstability(
            "normal matrix is zero".to_string(),
        ));
    }

    for col in 0..n {
        let (pivot_row, pivot) = (col..n)
            .map(|r| (r, a[[r, col]].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if pivot <= threshold {
            return Err(PlasticityError::NumericalInstability(format!(
                "pivot {pivot:e} in column {col} is below {threshold:e}"
            )));
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap([col, k], [pivot_row, k]);
            }
            for k in 0..b.ncols() {
                b.swap([col, k], [pivot_row, k]);
            }
        }

        for r in (col + 1)..n {
            let factor = a[[r, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[r, k]] -= factor * a[[col, k]];
            }
            for k in 0..b.ncols() {
                b[[r, k]] -= factor * b[[col, k]];
            }
        }
    }

    for col in (0..n).rev() {
        for k in 0..b.ncols() {
            let mut acc = b[[col, k]];
            for j in (col + 1)..n {
                acc -= a[[col, j]] * b[[j, k]];
            }
            b[[col, k]] = acc / a[[col, col]];
        }
    }
    Ok(b)
}

fn drive(
    reservoir: &Reservoir,
    w: &ConnectivityMatrix,
    inputs: ArrayView2<'_, f64>,
    mut state: Array1<f64>,
    keep_from: usize,
) -> Result<(Array2<f64>, Array1<f64>)> {
    let n = reservoir.size();
    if inputs.ncols() != reservoir.input_dim() {
        return Err(PlasticityError::ShapeMismatch {
            what: "input width",
            expected: reservoir.input_dim(),
            found: inputs.ncols(),
        });
    }
    if state.len() != n {
        return Err(PlasticityError::ShapeMismatch {
            what: "initial state",
            expected: n,
            found: state.len(),
        });
    }

    let kept = inputs.nrows().saturating_sub(keep_from);
    let mut states = Array2::zeros((kept, n));
    for (t, u) in inputs.axis_iter(Axis(0)).enumerate() {
        state = reservoir.step(w, u, state.view())?;
        if t >= keep_from {
            states.row_mut(t - keep_from).assign(&state);
        }
    }
    Ok((states, state))
}

/// Drive the reservoir over `inputs` and fit a readout onto `targets`.
///
/// Returns the readout and the state after the last input, so a following
/// [`run`] can continue the trajectory. Without `state`, the reservoir starts
/// uniform in [-1, 1).
pub fn train(
    reservoir: &Reservoir,
    w: &ConnectivityMatrix,
    inputs: ArrayView2<'_, f64>,
    targets: ArrayView2<'_, f64>,
    cfg: &ReadoutConfig,
    state: Option<Array1<f64>>,
    rng: &mut Prng,
) -> Result<(Readout, Array1<f64>)> {
    cfg.validate()?;
    if targets.nrows() != inputs.nrows() {
        return Err(PlasticityError::ShapeMismatch {
            what: "target rows",
            expected: inputs.nrows(),
            found: targets.nrows(),
        });
    }
    if cfg.init_len >= inputs.nrows() {
        return Err(PlasticityError::ShapeMismatch {
            what: "training samples after init_len",
            expected: cfg.init_len + 1,
            found: inputs.nrows(),
        });
    }

    let state =
        state.unwrap_or_else(|| Array1::from_shape_fn(reservoir.size(), |_| rng.gen_range_f64(-1.0, 1.0)));
    let (states, last) = drive(reservoir, w, inputs, state, cfg.init_len)?;
    let readout = ridge_regression(
        states.view(),
        targets.slice(s![cfg.init_len.., ..]),
        cfg.ridge_coef,
    )?;

    tracing::debug!(
        samples = states.nrows(),
        neurons = states.ncols(),
        outputs = readout.outputs(),
        ridge = cfg.ridge_coef,
        "readout trained"
    );
    Ok((readout, last))
}

/// Replay the recurrence over `inputs` with a fixed readout.
///
/// Returns `time x outputs` predictions. Without `last_state`, the reservoir
/// starts uniform in [0, 1).
pub fn run(
    reservoir: &Reservoir,
    w: &ConnectivityMatrix,
    readout: &Readout,
    inputs: ArrayView2<'_, f64>,
    last_state: Option<Array1<f64>>,
    rng: &mut Prng,
) -> Result<Array2<f64>> {
    let state = last_state
        .unwrap_or_else(|| Array1::from_shape_fn(reservoir.size(), |_| rng.gen_range_f64(0.0, 1.0)));
    let (states, _) = drive(reservoir, w, inputs, state, 0)?;
    readout.predict(states.view())
}
