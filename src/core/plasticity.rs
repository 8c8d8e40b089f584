//! Homeostatic structural plasticity: the ADSP (rate) and DESP (variance) rules.
//!
//! Both rules split neurons into three bands: `Shrink` neurons lose excitatory
//! partners (and, with a cross-pool matrix, gain inhibitory ones), `Grow` neurons
//! gain excitatory partners, and `Stable` neurons are left alone. The stable band
//! gives hysteresis so a neuron near its target is not rewired back and forth.
//!
//! The inhibitory prune of the grow phase is applied to the *shrink* set in both
//! rules. This coupling between the two regimes is kept exactly as the algorithm
//! defines it.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ndarray::{s, Array1, ArrayView2, Axis};

use crate::config::{AveragingMode, PlasticityConfig};
use crate::connectivity::{ConnectivityMatrix, EdgeChange, NeuronId, Weight};
use crate::error::{PlasticityError, Result};
use crate::partners::{self, Pair, PairwiseInformation, PruningPolicy};
use crate::prng::Prng;

/// Lower bound of the ADSP grow band and negated upper bound of its shrink band.
pub const RATE_THRESHOLD: f64 = 1.0;

/// Running structural-edit counters.
///
/// `total_add` counts edges that came into existence and `total_prun` counts
/// edges that were removed, so `total_add - total_prun` always equals the net
/// change in stored edges. Edits that only moved the weight of an existing edge
/// are tallied separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EditCounters {
    pub total_add: u64,
    pub total_prun: u64,
    pub strengthened: u64,
    pub weakened: u64,
}

impl EditCounters {
    fn record(&mut self, change: EdgeChange) {
        match change {
            EdgeChange::Created => self.total_add += 1,
            EdgeChange::Removed => self.total_prun += 1,
            EdgeChange::Updated => {}
            EdgeChange::Unchanged => {}
        }
    }

    pub fn merge(&mut self, other: EditCounters) {
        self.total_add += other.total_add;
        self.total_prun += other.total_prun;
        self.strengthened += other.strengthened;
        self.weakened += other.weakened;
    }

    /// `total_add - total_prun`.
    pub fn net_edges(&self) -> i64 {
        self.total_add as i64 - self.total_prun as i64
    }
}

/// Homeostatic band of a neuron for one plasticity round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Homeostasis {
    Shrink,
    Stable,
    Grow,
}

/// ADSP bands: `delta_z <= -1` shrinks, `delta_z >= 1` grows.
pub fn classify_rate(delta_z: f64) -> Homeostasis {
    if delta_z <= -RATE_THRESHOLD {
        Homeostasis::Shrink
    } else if delta_z >= RATE_THRESHOLD {
        Homeostasis::Grow
    } else {
        Homeostasis::Stable
    }
}

/// DESP bands: `variance <= min` shrinks, `variance >= max` grows.
pub fn classify_variance(variance: f64, min_variance: f64, max_variance: f64) -> Homeostasis {
    if variance <= min_variance {
        Homeostasis::Shrink
    } else if variance >= max_variance {
        Homeostasis::Grow
    } else {
        Homeostasis::Stable
    }
}

fn split_bands<F>(signal: &[f64], classify: F) -> (Vec<NeuronId>, Vec<NeuronId>)
where
    F: Fn(f64) -> Homeostasis,
{
    let mut shrink = Vec::new();
    let mut grow = Vec::new();
    for (i, &x) in signal.iter().enumerate() {
        match classify(x) {
            Homeostasis::Shrink => shrink.push(i),
            Homeostasis::Grow => grow.push(i),
            Homeostasis::Stable => {}
        }
    }
    (shrink, grow)
}

/// Per-neuron variance of `states / growth_parameter`, truncated toward zero.
///
/// `states` is `time x neurons`. Truncation coarse-grains the statistic so that
/// fluctuations below 1.0 never count as growth pressure.
pub fn compute_variance(
    states: ArrayView2<'_, f64>,
    growth_parameter: f64,
    averaging: AveragingMode,
    queue_size: usize,
) -> Result<Array1<f64>> {
    if states.nrows() == 0 {
        return Err(PlasticityError::ShapeMismatch {
            what: "activity window length",
            expected: 1,
            found: 0,
        });
    }
    if !(growth_parameter.is_finite() && growth_parameter > 0.0) {
        return Err(PlasticityError::InvalidConfig(
            "growth_parameter must be finite and > 0",
        ));
    }

    let window = match averaging {
        AveragingMode::Whole => states,
        AveragingMode::Queue => {
            let start = states.nrows().saturating_sub(queue_size);
            states.slice_move(s![start.., ..])
        }
    };
    let scaled = window.mapv(|x| x / growth_parameter);
    Ok(scaled.var_axis(Axis(0), 0.0).mapv(f64::trunc))
}

fn apply_growth(
    matrix: &mut ConnectivityMatrix,
    pairs: &[Pair],
    value: Weight,
    counters: &mut EditCounters,
) -> Result<()> {
    for &(neuron, partner) in pairs {
        let change = matrix.strengthen(neuron, partner, value)?;
        if change == EdgeChange::Updated {
            counters.strengthened += 1;
        }
        counters.record(change);
    }
    Ok(())
}

fn apply_pruning(
    matrix: &mut ConnectivityMatrix,
    pairs: &[Pair],
    value: Weight,
    counters: &mut EditCounters,
) -> Result<()> {
    for &(neuron, partner) in pairs {
        let change = matrix.weaken(neuron, partner, value)?;
        if change == EdgeChange::Updated {
            counters.weakened += 1;
        }
        counters.record(change);
    }
    Ok(())
}

fn check_signal(w_e: &ConnectivityMatrix, len: usize, what: &'static str) -> Result<()> {
    if len != w_e.rows() {
        return Err(PlasticityError::ShapeMismatch {
            what,
            expected: w_e.rows(),
            found: len,
        });
    }
    Ok(())
}

fn usable_cross<'a>(
    w_e: &ConnectivityMatrix,
    w_cross: Option<&'a mut ConnectivityMatrix>,
) -> Result<Option<&'a mut ConnectivityMatrix>> {
    match w_cross {
        Some(m) if m.is_degenerate() => Ok(None),
        Some(m) if m.rows() != w_e.rows() => Err(PlasticityError::ShapeMismatch {
            what: "cross-pool matrix rows",
            expected: w_e.rows(),
            found: m.rows(),
        }),
        other => Ok(other),
    }
}

/// Rate-based structural plasticity.
///
/// `delta_z` is the externally computed, normalized rate deviation of each
/// neuron of `w_e`. Growth is uncapped.
pub fn adsp(
    w_e: &mut ConnectivityMatrix,
    w_outside: Option<&mut ConnectivityMatrix>,
    delta_z: &[f64],
    value: Weight,
    rng: &mut Prng,
) -> Result<EditCounters> {
    check_signal(w_e, delta_z.len(), "delta_z")?;
    let mut w_outside = usable_cross(w_e, w_outside)?;
    let mut counters = EditCounters::default();

    let (need_decrease, need_increase) = split_bands(delta_z, classify_rate);

    // Decrease the rate: fewer excitatory inputs...
    let pairs = partners::select_pruning(&need_decrease, w_e, PruningPolicy::Uniform, rng)?;
    apply_pruning(w_e, &pairs, value, &mut counters)?;
    // ...and more inhibitory ones.
    if let Some(w_o) = w_outside.as_deref_mut() {
        let pairs = partners::select_growth(&need_decrease, w_o, None, rng)?;
        apply_growth(w_o, &pairs, value, &mut counters)?;
    }

    // Increase the rate: more excitatory inputs...
    let pairs = partners::select_growth(&need_increase, w_e, None, rng)?;
    apply_growth(w_e, &pairs, value, &mut counters)?;
    // ...and fewer inhibitory ones, taken from the decrease set.
    if let Some(w_o) = w_outside.as_deref_mut() {
        let pairs = partners::select_pruning(&need_decrease, w_o, PruningPolicy::Uniform, rng)?;
        apply_pruning(w_o, &pairs, value, &mut counters)?;
    }

    tracing::debug!(
        shrink = need_decrease.len(),
        grow = need_increase.len(),
        added = counters.total_add,
        pruned = counters.total_prun,
        "adsp round"
    );
    Ok(counters)
}

/// Variance-based structural plasticity with a partner cap.
///
/// `variance` is the output of [`compute_variance`]; `window` is the
/// `time x neurons` trajectory it came from, used for information-weighted
/// pruning when `cfg.mi_based` is set.
pub fn desp(
    w_e: &mut ConnectivityMatrix,
    w_inhibitory: Option<&mut ConnectivityMatrix>,
    variance: &[f64],
    window: ArrayView2<'_, f64>,
    cfg: &PlasticityConfig,
    rng: &mut Prng,
) -> Result<EditCounters> {
    check_signal(w_e, variance.len(), "variance")?;
    let mut w_inhibitory = usable_cross(w_e, w_inhibitory)?;
    let mut counters = EditCounters::default();

    let info = if cfg.mi_based {
        check_signal(w_e, window.ncols(), "activity window width")?;
        Some(PairwiseInformation::from_window(window))
    } else {
        None
    };
    let excitatory_policy = match &info {
        Some(info) => PruningPolicy::MutualInformation(info),
        None => PruningPolicy::Uniform,
    };

    let (need_pruning, need_increase) = split_bands(variance, |v| {
        classify_variance(v, cfg.min_variance, cfg.max_variance)
    });

    // Too quiet: drop excitatory partners, recruit inhibitory ones.
    let pairs = partners::select_pruning(&need_pruning, w_e, excitatory_policy, rng)?;
    apply_pruning(w_e, &pairs, cfg.value, &mut counters)?;
    if let Some(w_i) = w_inhibitory.as_deref_mut() {
        let pairs = partners::select_growth(&need_pruning, w_i, cfg.max_partners, rng)?;
        apply_growth(w_i, &pairs, cfg.value, &mut counters)?;
    }

    // Too variable: recruit excitatory partners.
    let pairs = partners::select_growth(&need_increase, w_e, cfg.max_partners, rng)?;
    apply_growth(w_e, &pairs, cfg.value, &mut counters)?;
    // Corrective inhibitory prune on the quiet set.
    if let Some(w_i) = w_inhibitory.as_deref_mut() {
        let pairs = partners::select_pruning(&need_pruning, w_i, PruningPolicy::Uniform, rng)?;
        apply_pruning(w_i, &pairs, cfg.value, &mut counters)?;
    }

    tracing::debug!(
        shrink = need_pruning.len(),
        grow = need_increase.len(),
        added = counters.total_add,
        pruned = counters.total_prun,
        "desp round"
    );
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{Polarity, PoolKind};
    use ndarray::{arr2, Array2};

    fn cfg(value: f64, max_partners: Option<usize>) -> PlasticityConfig {
        PlasticityConfig::default()
            .with_value(value)
            .with_max_partners(max_partners)
    }

    #[test]
    fn growth_in_an_empty_matrix_adds_one_edge() {
        let mut w = ConnectivityMatrix::recurrent(5, Polarity::Excitatory);
        let mut rng = Prng::new(42);
        let variance = [0.5, 0.5, 3.0, 0.5, 0.5];
        let window = Array2::zeros((4, 5));

        let counters = desp(
            &mut w,
            None,
            &variance,
            window.view(),
            &cfg(0.5, Some(2)),
            &mut rng,
        )
        .unwrap();

        assert_eq!(counters.total_add, 1);
        assert_eq!(counters.total_prun, 0);
        let row = w.row(2).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0].weight, 0.5);
        assert_ne!(row[0].partner, 2);
        assert_eq!(w.nnz(), 1);
    }

    #[test]
    fn pruning_a_single_edge_removes_it() {
        let mut w = ConnectivityMatrix::from_triplets(
            3,
            3,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            [(0, 1, 0.5)],
        )
        .unwrap();
        let mut rng = Prng::new(42);

        let counters = adsp(&mut w, None, &[-1.0, 0.0, 0.0], 0.5, &mut rng).unwrap();

        assert_eq!(counters.total_prun, 1);
        assert_eq!(counters.total_add, 0);
        assert_eq!(w.nnz(), 0);
        assert!(w.row(0).unwrap().is_empty());
    }

    #[test]
    fn rate_thresholds_are_inclusive() {
        assert_eq!(classify_rate(-1.0), Homeostasis::Shrink);
        assert_eq!(classify_rate(-0.999), Homeostasis::Stable);
        assert_eq!(classify_rate(0.999), Homeostasis::Stable);
        assert_eq!(classify_rate(1.0), Homeostasis::Grow);
        assert_eq!(classify_rate(f64::NAN), Homeostasis::Stable);
    }

    #[test]
    fn variance_thresholds_are_inclusive() {
        assert_eq!(classify_variance(0.1, 0.1, 1.0), Homeostasis::Shrink);
        assert_eq!(classify_variance(0.1000001, 0.1, 1.0), Homeostasis::Stable);
        assert_eq!(classify_variance(0.9999999, 0.1, 1.0), Homeostasis::Stable);
        assert_eq!(classify_variance(1.0, 0.1, 1.0), Homeostasis::Grow);
    }

    #[test]
    fn constant_states_have_zero_variance() {
        let states = Array2::from_elem((6, 4), 0.7);
        for gamma in [0.01, 0.1, 1.0, 10.0] {
            let v = compute_variance(states.view(), gamma, AveragingMode::Whole, 10).unwrap();
            assert!(v.iter().all(|&x| x == 0.0), "gamma {}", gamma);
            let (shrink, grow) = split_bands(v.as_slice().unwrap(), |x| {
                classify_variance(x, 0.1, 1.0)
            });
            assert_eq!(shrink, vec![0, 1, 2, 3]);
            assert!(grow.is_empty());
        }
    }

    #[test]
    fn variance_is_truncated_and_queue_uses_the_tail() {
        // Column 0: variance of [0, 2, 0, 2] / 1 = 1.0; tail of 2 -> 1.0.
        // Column 1: first two samples swing, last two are flat.
        let states = arr2(&[[0.0, 0.0], [2.0, 3.0], [0.0, 1.0], [2.0, 1.0]]);
        let whole = compute_variance(states.view(), 1.0, AveragingMode::Whole, 2).unwrap();
        assert_eq!(whole[0], 1.0);
        // var([0, 3, 1, 1]) = 1.1875 -> 1.
        assert_eq!(whole[1], 1.0);

        let tail = compute_variance(states.view(), 1.0, AveragingMode::Queue, 2).unwrap();
        assert_eq!(tail[0], 1.0);
        assert_eq!(tail[1], 0.0);

        // Scaling by gamma divides the variance by gamma^2 before truncation.
        let scaled = compute_variance(states.view(), 2.0, AveragingMode::Whole, 2).unwrap();
        assert_eq!(scaled[0], 0.0);
    }

    #[test]
    fn empty_window_is_rejected() {
        let states = Array2::<f64>::zeros((0, 3));
        assert!(compute_variance(states.view(), 1.0, AveragingMode::Whole, 2).is_err());
    }

    #[test]
    fn inhibitory_prune_targets_the_decrease_set() {
        // Neuron 0 is too quiet, neuron 1 too active. Only neuron 0's inhibitory
        // row is ever touched, and it gets the add-then-prune sequence.
        let mut w_e = ConnectivityMatrix::recurrent(2, Polarity::Excitatory);
        let mut w_i = ConnectivityMatrix::from_triplets(
            2,
            3,
            Polarity::Inhibitory,
            PoolKind::Cross,
            [(1, 0, -0.4), (1, 1, -0.4), (1, 2, -0.4)],
        )
        .unwrap();
        let mut rng = Prng::new(9);

        adsp(&mut w_e, Some(&mut w_i), &[-2.0, 2.0], 0.4, &mut rng).unwrap();

        // Neuron 1's inhibitory row is untouched despite neuron 1 needing a higher rate.
        assert_eq!(w_i.degree(1), 3);
        // Neuron 0 gained one inhibitory edge and the same round pruned it again.
        assert_eq!(w_i.degree(0), 0);
        assert!(w_i.sign_consistent());
        assert_eq!(w_e.degree(1), 1);
    }

    #[test]
    fn counters_track_net_edge_change() {
        let mut w_e = ConnectivityMatrix::from_triplets(
            6,
            6,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            [(0, 1, 0.3), (0, 2, 0.1), (3, 4, 0.05), (5, 0, 0.2)],
        )
        .unwrap();
        let mut w_i = ConnectivityMatrix::cross(6, 2, Polarity::Inhibitory);
        let before = (w_e.nnz() + w_i.nnz()) as i64;
        let mut rng = Prng::new(77);
        let mut total = EditCounters::default();

        for round in 0..40 {
            let dz: Vec<f64> = (0..6)
                .map(|i| if (i + round) % 3 == 0 { -1.5 } else if (i + round) % 3 == 1 { 1.5 } else { 0.0 })
                .collect();
            let c = adsp(&mut w_e, Some(&mut w_i), &dz, 0.1, &mut rng).unwrap();
            let prev = total;
            total.merge(c);
            assert!(total.total_add >= prev.total_add);
            assert!(total.total_prun >= prev.total_prun);
            assert!(w_e.diagonal_is_empty());
            assert!(w_e.sign_consistent() && w_i.sign_consistent());
        }
        let after = (w_e.nnz() + w_i.nnz()) as i64;
        assert_eq!(total.net_edges(), after - before);
    }

    #[test]
    fn capacity_is_respected_during_growth() {
        let mut w = ConnectivityMatrix::recurrent(8, Polarity::Excitatory);
        let mut rng = Prng::new(5);
        let c = cfg(0.2, Some(3));
        let variance = [5.0; 8];
        let window = Array2::zeros((2, 8));
        for _ in 0..50 {
            desp(&mut w, None, &variance, window.view(), &c, &mut rng).unwrap();
            for i in 0..8 {
                assert!(w.degree(i) <= 3, "neuron {} has {} partners", i, w.degree(i));
            }
        }
        assert!((0..8).all(|i| w.degree(i) == 3));
    }

    #[test]
    fn identical_seeds_give_identical_edits() {
        let start = ConnectivityMatrix::from_triplets(
            5,
            5,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            [(0, 1, 0.3), (1, 3, 0.3), (2, 4, 0.3), (4, 0, 0.3)],
        )
        .unwrap();
        let run = |seed: u64| {
            let mut w = start.clone();
            let mut rng = Prng::new(seed);
            let variance = [0.0, 2.0, 0.0, 2.0, 0.5];
            let window = Array2::zeros((3, 5));
            for _ in 0..10 {
                desp(&mut w, None, &variance, window.view(), &cfg(0.1, Some(4)), &mut rng)
                    .unwrap();
            }
            w
        };
        assert_eq!(run(123), run(123));
    }

    #[test]
    fn desp_grow_phase_prunes_inhibition_only_on_quiet_rows() {
        // Neuron 0 is quiet, neuron 2 is too variable, 1 and 3 are stable.
        let mut w_e = ConnectivityMatrix::recurrent(4, Polarity::Excitatory);
        let mut w_i = ConnectivityMatrix::from_triplets(
            4,
            2,
            Polarity::Inhibitory,
            PoolKind::Cross,
            (0..4).flat_map(|r| [(r, 0, -1.0), (r, 1, -1.0)]),
        )
        .unwrap();
        let before = w_i.clone();
        let mut rng = Prng::new(31);
        let variance = [0.0, 0.5, 3.0, 0.5];
        let window = Array2::zeros((3, 4));

        let counters = desp(
            &mut w_e,
            Some(&mut w_i),
            &variance,
            window.view(),
            &cfg(0.1, None),
            &mut rng,
        )
        .unwrap();

        for r in 1..4 {
            assert_eq!(w_i.row(r).unwrap(), before.row(r).unwrap(), "row {r} changed");
        }
        // Row 0: one inhibitory strengthening, then one corrective weakening.
        assert_eq!(counters.strengthened, 1);
        assert_eq!(counters.weakened, 1);
        assert_eq!(w_i.degree(0), 2);
        // Neuron 2 gained its first excitatory partner; neuron 0 had none to lose.
        assert_eq!(counters.total_add, 1);
        assert_eq!(counters.total_prun, 0);
        assert_eq!(w_e.degree(2), 1);
    }

    #[test]
    fn information_weighted_desp_drops_the_uncorrelated_partner() {
        // Neuron 1 tracks neuron 0; neuron 2 does not.
        let window = arr2(&[
            [1.0, 1.0, 0.0],
            [-1.0, -1.0, 1.0],
            [1.0, 1.0, 0.0],
            [-1.0, -1.0, -1.0],
            [1.0, 1.0, 0.0],
            [-1.0, -1.0, 0.0],
        ]);
        let start = ConnectivityMatrix::from_triplets(
            3,
            3,
            Polarity::Excitatory,
            PoolKind::Recurrent,
            [(0, 1, 0.2), (0, 2, 0.2)],
        )
        .unwrap();
        let c = cfg(0.5, None).with_mi_based(true);

        for seed in 1..20 {
            let mut w = start.clone();
            let mut rng = Prng::new(seed);
            let counters =
                desp(&mut w, None, &[0.0, 0.5, 0.5], window.view(), &c, &mut rng).unwrap();
            assert_eq!(counters.total_prun, 1);
            assert!(w.contains(0, 1).unwrap());
            assert!(!w.contains(0, 2).unwrap());
        }

        let mut w = start.clone();
        let narrow = Array2::zeros((6, 2));
        let err = desp(&mut w, None, &[0.0, 0.5, 0.5], narrow.view(), &c, &mut Prng::new(1))
            .unwrap_err();
        assert!(matches!(
            err,
            PlasticityError::ShapeMismatch {
                what: "activity window width",
                ..
            }
        ));
        assert_eq!(w, start);
    }

    #[test]
    fn mismatched_signal_length_is_an_error() {
        let mut w = ConnectivityMatrix::recurrent(3, Polarity::Excitatory);
        let mut rng = Prng::new(1);
        let err = adsp(&mut w, None, &[0.0, 0.0], 0.1, &mut rng).unwrap_err();
        assert!(matches!(err, PlasticityError::ShapeMismatch { what: "delta_z", .. }));
    }
}
