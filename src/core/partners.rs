//! Partner selection for structural edits.
//!
//! Selectors only propose `(neuron, partner)` pairs; they never touch a matrix.
//! A neuron with no eligible partner is skipped (`EmptyCandidateSet` is logged
//! and absorbed), while out-of-range neurons abort the whole selection.

use ndarray::{Array2, ArrayView2};

use crate::analysis::pearson_matrix;
use crate::connectivity::{ConnectivityMatrix, NeuronId, PoolKind};
use crate::error::{PlasticityError, Result};
use crate::prng::Prng;

/// `(neuron, partner)`: the row that is edited and the column inside it.
pub type Pair = (NeuronId, NeuronId);

/// Symmetric pairwise information between the trajectories of two neurons.
///
/// Uses the Gaussian proxy `I(i;j) = -1/2 ln(1 - rho^2)` where `rho` is the
/// Pearson correlation over the window. A constant trajectory carries no
/// information about anything (rho = 0).
#[derive(Debug, Clone)]
pub struct PairwiseInformation {
    mi: Array2<f64>,
}

impl PairwiseInformation {
    /// `states` is `time x neurons`.
    pub fn from_window(states: ArrayView2<'_, f64>) -> Self {
        let mut mi = pearson_matrix(states);
        for ((i, j), v) in mi.indexed_iter_mut() {
            *v = if i == j {
                0.0
            } else {
                -0.5 * (1.0 - (*v * *v).min(1.0 - 1e-12)).ln()
            };
        }
        Self { mi }
    }

    pub fn size(&self) -> usize {
        self.mi.nrows()
    }

    #[inline]
    pub fn get(&self, i: NeuronId, j: NeuronId) -> f64 {
        self.mi[[i, j]]
    }
}

/// How a pruning partner is picked among a neuron's current partners.
#[derive(Debug, Clone, Copy)]
pub enum PruningPolicy<'a> {
    Uniform,
    /// Remove the least-informative partner first (ties go to the lowest index).
    MutualInformation(&'a PairwiseInformation),
}

fn check_neuron(neuron: NeuronId, matrix: &ConnectivityMatrix) -> Result<()> {
    if neuron >= matrix.rows() {
        return Err(PlasticityError::IndexOutOfRange {
            row: neuron,
            col: 0,
            rows: matrix.rows(),
            cols: matrix.cols(),
        });
    }
    Ok(())
}

/// Draw one growth partner for `neuron`.
///
/// Every column is a candidate, already-connected ones included; only the
/// neuron itself is excluded, and only in a recurrent pool.
pub fn growth_partner(
    neuron: NeuronId,
    matrix: &ConnectivityMatrix,
    max_partners: Option<usize>,
    rng: &mut Prng,
) -> Result<NeuronId> {
    check_neuron(neuron, matrix)?;
    if let Some(cap) = max_partners {
        if matrix.degree(neuron) >= cap {
            return Err(PlasticityError::EmptyCandidateSet { neuron });
        }
    }

    match matrix.kind() {
        PoolKind::Recurrent => {
            let candidates = matrix.cols().saturating_sub(1);
            if candidates == 0 {
                return Err(PlasticityError::EmptyCandidateSet { neuron });
            }
            let k = rng.gen_range_usize(0, candidates);
            Ok(if k >= neuron { k + 1 } else { k })
        }
        PoolKind::Cross => {
            if matrix.cols() == 0 {
                return Err(PlasticityError::EmptyCandidateSet { neuron });
            }
            Ok(rng.gen_range_usize(0, matrix.cols()))
        }
    }
}

/// Pick one existing partner of `neuron` to prune.
pub fn pruning_partner(
    neuron: NeuronId,
    matrix: &ConnectivityMatrix,
    policy: PruningPolicy<'_>,
    rng: &mut Prng,
) -> Result<NeuronId> {
    let row = matrix.row(neuron)?;
    if row.is_empty() {
        return Err(PlasticityError::EmptyCandidateSet { neuron });
    }

    match policy {
        PruningPolicy::MutualInformation(info)
            if matrix.kind() == PoolKind::Recurrent && info.size() == matrix.cols() =>
        {
            let mut best = row[0].partner;
            let mut best_info = info.get(neuron, best);
            for c in &row[1..] {
                let v = info.get(neuron, c.partner);
                if v < best_info {
                    best = c.partner;
                    best_info = v;
                }
            }
            Ok(best)
        }
        // Cross pools have no trajectory for the auxiliary neurons.
        _ => {
            let idx = rng.gen_range_usize(0, row.len());
            Ok(row[idx].partner)
        }
    }
}

fn absorb(result: Result<NeuronId>, neuron: NeuronId, pairs: &mut Vec<Pair>) -> Result<()> {
    match result {
        Ok(partner) => {
            pairs.push((neuron, partner));
            Ok(())
        }
        Err(err) if err.is_recoverable() => {
            tracing::trace!(neuron, %err, "edit skipped");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// One growth proposal per flagged neuron, in the order given.
pub fn select_growth(
    flagged: &[NeuronId],
    matrix: &ConnectivityMatrix,
    max_partners: Option<usize>,
    rng: &mut Prng,
) -> Result<Vec<Pair>> {
    let mut pairs = Vec::with_capacity(flagged.len());
    for &neuron in flagged {
        absorb(growth_partner(neuron, matrix, max_partners, rng), neuron, &mut pairs)?;
    }
    Ok(pairs)
}

/// One pruning proposal per flagged neuron that still has partners.
pub fn select_pruning(
    flagged: &[NeuronId],
    matrix: &ConnectivityMatrix,
    policy: PruningPolicy<'_>,
    rng: &mut Prng,
) -> Result<Vec<Pair>> {
    let mut pairs = Vec::with_capacity(flagged.len());
    for &neuron in flagged {
        absorb(pruning_partner(neuron, matrix, policy, rng), neuron, &mut pairs)?;
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Polarity;
    use ndarray::arr2;

    #[test]
    fn growth_never_proposes_self_loops() {
        let w = ConnectivityMatrix::recurrent(4, Polarity::Excitatory);
        let mut rng = Prng::new(3);
        for _ in 0..500 {
            let pairs = select_growth(&[0, 1, 2, 3], &w, None, &mut rng).unwrap();
            assert_eq!(pairs.len(), 4);
            for (n, p) in pairs {
                assert_ne!(n, p);
                assert!(p < 4);
            }
        }
    }

    #[test]
    fn growth_reaches_every_other_neuron() {
        let w = ConnectivityMatrix::recurrent(5, Polarity::Excitatory);
        let mut rng = Prng::new(11);
        let mut seen = [false; 5];
        for _ in 0..400 {
            let p = growth_partner(2, &w, None, &mut rng).unwrap();
            seen[p] = true;
        }
        assert_eq!(seen, [true, true, false, true, true]);
    }

    #[test]
    fn cross_pool_growth_may_pick_the_same_index() {
        let w = ConnectivityMatrix::cross(3, 3, Polarity::Inhibitory);
        let mut rng = Prng::new(5);
        let hit_diagonal = (0..300).any(|_| growth_partner(1, &w, None, &mut rng).unwrap() == 1);
        assert!(hit_diagonal);
    }

    #[test]
    fn neurons_at_capacity_are_skipped() {
        let w = ConnectivityMatrix::from_triplets(
            4,
            4,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            [(0, 1, 0.1), (0, 2, 0.1), (1, 2, 0.1)],
        )
        .unwrap();
        let mut rng = Prng::new(8);
        let pairs = select_growth(&[0, 1], &w, Some(2), &mut rng).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, 1);
        assert_eq!(
            growth_partner(0, &w, Some(2), &mut rng).unwrap_err(),
            PlasticityError::EmptyCandidateSet { neuron: 0 }
        );
    }

    #[test]
    fn single_neuron_pool_has_no_growth_candidates() {
        let w = ConnectivityMatrix::recurrent(1, Polarity::Excitatory);
        let mut rng = Prng::new(1);
        assert!(select_growth(&[0], &w, None, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn pruning_only_picks_existing_partners() {
        let w = ConnectivityMatrix::from_triplets(
            4,
            4,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            [(0, 2, 0.1), (0, 3, 0.1)],
        )
        .unwrap();
        let mut rng = Prng::new(21);
        for _ in 0..100 {
            let pairs = select_pruning(&[0, 1], &w, PruningPolicy::Uniform, &mut rng).unwrap();
            assert_eq!(pairs.len(), 1);
            assert!(pairs[0] == (0, 2) || pairs[0] == (0, 3));
        }
    }

    #[test]
    fn out_of_range_neuron_aborts_selection() {
        let w = ConnectivityMatrix::recurrent(3, Polarity::Excitatory);
        let mut rng = Prng::new(2);
        let err = select_growth(&[0, 7], &w, None, &mut rng).unwrap_err();
        assert!(matches!(err, PlasticityError::IndexOutOfRange { row: 7, .. }));
        let err = select_pruning(&[9], &w, PruningPolicy::Uniform, &mut rng).unwrap_err();
        assert!(matches!(err, PlasticityError::IndexOutOfRange { row: 9, .. }));
    }

    #[test]
    fn information_weighted_pruning_drops_the_least_informative_partner() {
        // Neuron 1 tracks neuron 0 exactly; neuron 2 is uncorrelated with 0.
        let states = arr2(&[
            [1.0, 1.0, 0.0],
            [-1.0, -1.0, 1.0],
            [1.0, 1.0, 0.0],
            [-1.0, -1.0, -1.0],
            [1.0, 1.0, 0.0],
            [-1.0, -1.0, 0.0],
        ]);
        let info = PairwiseInformation::from_window(states.view());
        assert!(info.get(0, 1) > info.get(0, 2));
        assert_eq!(info.get(0, 1), info.get(1, 0));

        let w = ConnectivityMatrix::from_triplets(
            3,
            3,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            [(0, 1, 0.2), (0, 2, 0.2)],
        )
        .unwrap();
        let mut rng = Prng::new(4);
        for _ in 0..20 {
            let p =
                pruning_partner(0, &w, PruningPolicy::MutualInformation(&info), &mut rng).unwrap();
            assert_eq!(p, 2);
        }
    }

    #[test]
    fn constant_trajectories_carry_no_information() {
        let states = arr2(&[[0.5, 0.1], [0.5, 0.9], [0.5, 0.3]]);
        let info = PairwiseInformation::from_window(states.view());
        assert_eq!(info.get(0, 1), 0.0);
    }
}
