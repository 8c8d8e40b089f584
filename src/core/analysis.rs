//! Richness measures over state histories (`time x neurons`).

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{PlasticityError, Result};

/// Kernel width used for Rényi's quadratic entropy.
pub const RENYI_KERNEL: f64 = 0.3;

const JACOBI_SWEEPS: usize = 100;

/// Pearson correlation of two equally long series.
///
/// A constant series has no defined correlation; it is reported as 0.
pub fn pearson(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Result<f64> {
    if a.len() != b.len() {
        return Err(PlasticityError::ShapeMismatch {
            what: "pearson series length",
            expected: a.len(),
            found: b.len(),
        });
    }
    let (Some(ma), Some(mb)) = (a.mean(), b.mean()) else {
        return Ok(0.0);
    };
    let mut num = 0.0;
    let mut da = 0.0;
    let mut db = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        num += (x - ma) * (y - mb);
        da += (x - ma) * (x - ma);
        db += (y - mb) * (y - mb);
    }
    let denom = (da * db).sqrt();
    Ok(if denom > 0.0 { num / denom } else { 0.0 })
}

/// Correlation of every pair of neuron trajectories, as `neurons x neurons`.
pub fn pearson_matrix(states: ArrayView2<'_, f64>) -> Array2<f64> {
    let n = states.ncols();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for j in i..n {
            // Columns of one matrix always have equal length.
            let rho = pearson(states.column(i), states.column(j)).unwrap_or(0.0);
            out[[i, j]] = rho;
            out[[j, i]] = rho;
        }
    }
    out
}

/// Rényi's quadratic entropy per time step, by a Parzen window with a
/// Gaussian kernel of width `k` over the standardized neuron activities.
///
/// Constant neurons are centered but not scaled.
pub fn renyi_entropy(states: ArrayView2<'_, f64>, k: f64) -> Result<Array1<f64>> {
    let (t, n) = states.dim();
    if n == 0 || t == 0 {
        return Err(PlasticityError::ShapeMismatch {
            what: "entropy states",
            expected: 1,
            found: 0,
        });
    }
    if !(k.is_finite() && k > 0.0) {
        return Err(PlasticityError::InvalidConfig("kernel width must be finite and > 0"));
    }

    let mut z = states.to_owned();
    for mut col in z.axis_iter_mut(Axis(1)) {
        let mean = col.mean().unwrap_or(0.0);
        col.mapv_inplace(|x| x - mean);
        let std = col.std(0.0);
        if std > 0.0 {
            col.mapv_inplace(|x| x / std);
        }
    }

    let denom = 2.0 * k * k;
    let pairs = (n * n) as f64;
    Ok(z
        .axis_iter(Axis(0))
        .map(|row| {
            let mut acc = 0.0;
            for &a in row.iter() {
                for &b in row.iter() {
                    acc += (-(a - b) * (a - b) / denom).exp();
                }
            }
            (acc / pairs).ln()
        })
        .collect())
}

/// Number of singular directions needed to explain a fraction `a` of the
/// first `horizon` states, and the fraction actually reached.
///
/// Singular values are weighted linearly (not squared), as in the
/// uncoupled-dynamics richness measure.
pub fn uncoupled_dynamics(states: ArrayView2<'_, f64>, horizon: usize, a: f64) -> Result<(usize, f64)> {
    if !(a > 0.0 && a <= 1.0) {
        return Err(PlasticityError::InvalidConfig("explained fraction must be in (0, 1]"));
    }
    let rows = states.nrows().min(horizon);
    let x = states.slice(ndarray::s![..rows, ..]);
    if rows == 0 || x.ncols() == 0 {
        return Ok((0, 0.0));
    }

    let eigen = symmetric_eigenvalues(x.t().dot(&x))?;
    let mut singular: Vec<f64> = eigen.iter().map(|&e| e.max(0.0).sqrt()).collect();
    singular.sort_by(|p, q| q.total_cmp(p));
    let total: f64 = singular.iter().sum();
    if total == 0.0 {
        return Ok((0, 0.0));
    }

    let mut count = 0;
    let mut frac = 0.0;
    while frac < a && count < singular.len() {
        frac += singular[count] / total;
        count += 1;
    }
    Ok((count, frac))
}

/// Eigenvalues of a symmetric matrix by cyclic Jacobi rotations.
pub fn symmetric_eigenvalues(mut m: Array2<f64>) -> Result<Vec<f64>> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(PlasticityError::ShapeMismatch {
            what: "symmetric matrix columns",
            expected: n,
            found: m.ncols(),
        });
    }
    let scale: f64 = m.iter().map(|x| x * x).sum::<f64>().sqrt();
    if scale == 0.0 {
        return Ok(vec![0.0; n]);
    }

    for _ in 0..JACOBI_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| m[[i, j]] * m[[i, j]])
            .sum::<f64>()
            .sqrt();
        if off <= 1e-12 * scale {
            return Ok(m.diag().to_vec());
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq == 0.0 {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
            }
        }
    }
    Err(PlasticityError::ConvergenceFailure {
        iterations: JACOBI_SWEEPS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn pearson_of_linear_relations() {
        let a = arr1(&[1.0, 2.0, 3.0, 4.0]);
        let b = arr1(&[2.0, 4.0, 6.0, 8.0]);
        let c = arr1(&[4.0, 3.0, 2.0, 1.0]);
        assert!((pearson(a.view(), b.view()).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(a.view(), c.view()).unwrap() + 1.0).abs() < 1e-12);

        let flat = arr1(&[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(pearson(a.view(), flat.view()).unwrap(), 0.0);
        assert!(pearson(a.view(), arr1(&[1.0]).view()).is_err());
    }

    #[test]
    fn pearson_matrix_is_symmetric_with_unit_diagonal() {
        let states = arr2(&[[1.0, 0.3, 2.0], [2.0, -0.1, 1.0], [3.0, 0.7, 0.5], [4.0, 0.2, 0.1]]);
        let m = pearson_matrix(states.view());
        for i in 0..3 {
            assert!((m[[i, i]] - 1.0).abs() < 1e-12);
            for j in 0..3 {
                assert_eq!(m[[i, j]], m[[j, i]]);
            }
        }
    }

    #[test]
    fn identical_neurons_maximise_the_entropy_estimate() {
        // All neurons identical: every kernel term is exp(0) = 1, so ln(1) = 0.
        let states = arr2(&[[0.1, 0.1], [0.5, 0.5], [-0.3, -0.3]]);
        let h = renyi_entropy(states.view(), RENYI_KERNEL).unwrap();
        assert_eq!(h.len(), 3);
        for v in h.iter() {
            assert!(v.abs() < 1e-12);
        }

        let spread = arr2(&[[1.0, -1.0], [-1.0, 1.0], [0.5, 0.0]]);
        let h = renyi_entropy(spread.view(), RENYI_KERNEL).unwrap();
        assert!(h.iter().all(|&v| v < 0.0));
    }

    #[test]
    fn jacobi_matches_known_eigenvalues() {
        let m = arr2(&[[2.0, 1.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.0, 5.0]]);
        let mut e = symmetric_eigenvalues(m).unwrap();
        e.sort_by(|a, b| a.total_cmp(b));
        assert!((e[0] - 1.0).abs() < 1e-10);
        assert!((e[1] - 3.0).abs() < 1e-10);
        assert!((e[2] - 5.0).abs() < 1e-10);
    }

    #[test]
    fn rank_one_dynamics_need_one_direction() {
        let states = Array2::from_shape_fn((50, 4), |(t, j)| (t as f64 * 0.3).sin() * (j + 1) as f64);
        let (ud, frac) = uncoupled_dynamics(states.view(), 5000, 0.9).unwrap();
        assert_eq!(ud, 1);
        assert!(frac > 0.99);
    }

    #[test]
    fn independent_directions_are_counted() {
        // Orthogonal columns of equal norm: each explains a quarter.
        let mut states = Array2::zeros((4, 4));
        for i in 0..4 {
            states[[i, i]] = 1.0;
        }
        let (ud, frac) = uncoupled_dynamics(states.view(), 4, 0.6).unwrap();
        assert_eq!(ud, 3);
        assert!((frac - 0.75).abs() < 1e-9);
        assert!(uncoupled_dynamics(states.view(), 4, 0.0).is_err());
    }
}
