#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ndarray::Array2;

use crate::error::{PlasticityError, Result};

pub type NeuronId = usize;

/// Type alias for synaptic weights. The sign is fixed by the matrix polarity.
pub type Weight = f64;

/// Designated sign of every nonzero entry in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Polarity {
    /// Entries are strictly positive.
    Excitatory,
    /// Entries are strictly negative.
    Inhibitory,
}

impl Polarity {
    #[inline]
    pub fn sign(self) -> Weight {
        match self {
            Polarity::Excitatory => 1.0,
            Polarity::Inhibitory => -1.0,
        }
    }

    /// True when `w` is a legal stored value for this polarity.
    #[inline]
    pub fn admits(self, w: Weight) -> bool {
        match self {
            Polarity::Excitatory => w > 0.0,
            Polarity::Inhibitory => w < 0.0,
        }
    }
}

/// Whether rows and columns index the same population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PoolKind {
    /// Square matrix over one population; the diagonal is always empty.
    Recurrent,
    /// Rectangular matrix between two populations; no self-loop rule.
    Cross,
}

/// One stored entry of a row: `partner` drives the row's neuron with `weight`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Connection {
    pub partner: NeuronId,
    pub weight: Weight,
}

/// Structural outcome of a single edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeChange {
    Created,
    Updated,
    Removed,
    /// Nothing stored before or after (e.g. pruning an absent edge).
    Unchanged,
}

/// Sparse signed weight matrix with row-major adjacency lists.
///
/// Row `i` holds the weights that drive neuron `i` in `W·r`. Rows are kept sorted
/// by partner so iteration order (and therefore every random draw that depends on
/// it) is deterministic. Explicit zeros are never stored.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectivityMatrix {
    rows: usize,
    cols: usize,
    polarity: Polarity,
    kind: PoolKind,
    entries: Vec<Vec<Connection>>,
}

impl ConnectivityMatrix {
    /// Empty square matrix for one population.
    pub fn recurrent(n: usize, polarity: Polarity) -> Self {
        Self {
            rows: n,
            cols: n,
            polarity,
            kind: PoolKind::Recurrent,
            entries: vec![Vec::new(); n],
        }
    }

    /// Empty rectangular matrix from an auxiliary pool of `cols` neurons into `rows` neurons.
    pub fn cross(rows: usize, cols: usize, polarity: Polarity) -> Self {
        Self {
            rows,
            cols,
            polarity,
            kind: PoolKind::Cross,
            entries: vec![Vec::new(); rows],
        }
    }

    /// Build from `(row, col, weight)` triplets. Zero weights are skipped; a
    /// duplicate coordinate keeps the last value.
    pub fn from_triplets<I>(
        rows: usize,
        cols: usize,
        polarity: Polarity,
        kind: PoolKind,
        triplets: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (NeuronId, NeuronId, Weight)>,
    {
        if kind == PoolKind::Recurrent && rows != cols {
            return Err(PlasticityError::ShapeMismatch {
                what: "recurrent matrix columns",
                expected: rows,
                found: cols,
            });
        }
        let mut m = Self {
            rows,
            cols,
            polarity,
            kind,
            entries: vec![Vec::new(); rows],
        };
        for (r, c, w) in triplets {
            m.check_edit(r, c)?;
            if w == 0.0 {
                continue;
            }
            if !polarity.admits(w) {
                return Err(PlasticityError::InvalidConfig(
                    "weight sign does not match matrix polarity",
                ));
            }
            let row = &mut m.entries[r];
            match row.binary_search_by_key(&c, |e| e.partner) {
                Ok(idx) => row[idx].weight = w,
                Err(idx) => row.insert(idx, Connection { partner: c, weight: w }),
            }
        }
        Ok(m)
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    #[inline]
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// A matrix with zero rows or zero columns carries no cross-pool edits.
    pub fn is_degenerate(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    fn check_bounds(&self, row: NeuronId, col: NeuronId) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(PlasticityError::IndexOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    fn check_edit(&self, row: NeuronId, col: NeuronId) -> Result<()> {
        self.check_bounds(row, col)?;
        if self.kind == PoolKind::Recurrent && row == col {
            return Err(PlasticityError::SelfLoop { neuron: row });
        }
        Ok(())
    }

    /// Stored weight, or 0.0 when there is no edge.
    pub fn get(&self, row: NeuronId, col: NeuronId) -> Result<Weight> {
        self.check_bounds(row, col)?;
        let row = &self.entries[row];
        Ok(row
            .binary_search_by_key(&col, |e| e.partner)
            .map(|idx| row[idx].weight)
            .unwrap_or(0.0))
    }

    pub fn contains(&self, row: NeuronId, col: NeuronId) -> Result<bool> {
        Ok(self.get(row, col)? != 0.0)
    }

    /// Entries of one row, sorted by partner.
    pub fn row(&self, row: NeuronId) -> Result<&[Connection]> {
        self.entries
            .get(row)
            .map(Vec::as_slice)
            .ok_or(PlasticityError::IndexOutOfRange {
                row,
                col: 0,
                rows: self.rows,
                cols: self.cols,
            })
    }

    /// Number of partners currently wired into `row` (0 for an out-of-range row).
    pub fn degree(&self, row: NeuronId) -> usize {
        self.entries.get(row).map_or(0, Vec::len)
    }

    /// Total number of stored (nonzero) entries.
    pub fn nnz(&self) -> usize {
        self.entries.iter().map(Vec::len).sum()
    }

    /// Iterate `(row, partner, weight)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (NeuronId, NeuronId, Weight)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().map(move |c| (r, c.partner, c.weight)))
    }

    /// Apply a signed delta to one coordinate.
    ///
    /// Bounds and the self-loop rule are checked before anything changes. A result
    /// that is zero, or whose sign leaves the matrix polarity, removes the entry.
    pub fn set_edge(&mut self, row: NeuronId, col: NeuronId, delta: Weight) -> Result<EdgeChange> {
        self.check_edit(row, col)?;
        let polarity = self.polarity;
        let entries = &mut self.entries[row];
        let change = match entries.binary_search_by_key(&col, |e| e.partner) {
            Ok(idx) => {
                let next = entries[idx].weight + delta;
                if polarity.admits(next) {
                    entries[idx].weight = next;
                    EdgeChange::Updated
                } else {
                    entries.remove(idx);
                    EdgeChange::Removed
                }
            }
            Err(idx) => {
                if polarity.admits(delta) {
                    entries.insert(
                        idx,
                        Connection {
                            partner: col,
                            weight: delta,
                        },
                    );
                    EdgeChange::Created
                } else {
                    EdgeChange::Unchanged
                }
            }
        };
        Ok(change)
    }

    /// Move the weight away from zero by `magnitude` in the pool's sign.
    pub fn strengthen(&mut self, row: NeuronId, col: NeuronId, magnitude: Weight) -> Result<EdgeChange> {
        self.set_edge(row, col, self.polarity.sign() * magnitude.abs())
    }

    /// Move the weight toward zero by `magnitude`; crossing zero removes the edge.
    pub fn weaken(&mut self, row: NeuronId, col: NeuronId, magnitude: Weight) -> Result<EdgeChange> {
        self.set_edge(row, col, -self.polarity.sign() * magnitude.abs())
    }

    /// Multiply every weight by a positive factor (sign is preserved).
    pub fn scale(&mut self, factor: Weight) -> Result<()> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(PlasticityError::InvalidConfig(
                "scale factor must be finite and > 0",
            ));
        }
        for row in &mut self.entries {
            for c in row.iter_mut() {
                c.weight *= factor;
            }
        }
        Ok(())
    }

    /// `(W·r)[row]`.
    #[inline]
    pub fn row_dot(&self, row: NeuronId, r: &[f64]) -> f64 {
        self.entries[row]
            .iter()
            .map(|c| c.weight * r[c.partner])
            .sum()
    }

    /// `out = W·r`.
    pub fn matvec_into(&self, r: &[f64], out: &mut [f64]) -> Result<()> {
        if r.len() != self.cols {
            return Err(PlasticityError::ShapeMismatch {
                what: "state vector",
                expected: self.cols,
                found: r.len(),
            });
        }
        if out.len() != self.rows {
            return Err(PlasticityError::ShapeMismatch {
                what: "output vector",
                expected: self.rows,
                found: out.len(),
            });
        }
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.row_dot(i, r);
        }
        Ok(())
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for (r, c, w) in self.iter() {
            dense[[r, c]] = w;
        }
        dense
    }

    /// Sum of each row: the synaptic activation target of that neuron.
    pub fn row_sums(&self) -> Vec<Weight> {
        self.entries
            .iter()
            .map(|row| row.iter().map(|c| c.weight).sum())
            .collect()
    }

    /// Rescale every row so its weights sum to 1 in magnitude.
    ///
    /// Empty rows are left as they are.
    pub fn normalize_rows(&mut self) {
        for row in &mut self.entries {
            let total: Weight = row.iter().map(|c| c.weight.abs()).sum();
            if total > 0.0 {
                for c in row.iter_mut() {
                    c.weight /= total;
                }
            }
        }
    }

    /// Rescale every row to the given row sums (usually from [`Self::row_sums`]).
    ///
    /// Rows with a zero current sum, or whose target has the wrong sign, are
    /// left unchanged.
    pub fn scale_rows_to(&mut self, targets: &[Weight]) -> Result<()> {
        if targets.len() != self.rows {
            return Err(PlasticityError::ShapeMismatch {
                what: "row targets",
                expected: self.rows,
                found: targets.len(),
            });
        }
        let polarity = self.polarity;
        for (row, &target) in self.entries.iter_mut().zip(targets) {
            let total: Weight = row.iter().map(|c| c.weight).sum();
            if total == 0.0 || !polarity.admits(target) {
                continue;
            }
            let factor = target / total;
            for c in row.iter_mut() {
                c.weight *= factor;
            }
        }
        Ok(())
    }

    /// True when no diagonal entry is stored (always true for cross pools).
    pub fn diagonal_is_empty(&self) -> bool {
        self.kind == PoolKind::Cross
            || self
                .entries
                .iter()
                .enumerate()
                .all(|(i, row)| row.binary_search_by_key(&i, |e| e.partner).is_err())
    }

    /// True when every stored weight matches the polarity.
    pub fn sign_consistent(&self) -> bool {
        self.iter().all(|(_, _, w)| self.polarity.admits(w))
    }
}
