//! Error taxonomy for the plasticity engine.
//!
//! `EmptyCandidateSet` is recoverable and absorbed by the partner selector;
//! the other variants propagate to the caller of the enclosing operation.

pub type Result<T> = core::result::Result<T, PlasticityError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlasticityError {
    #[error("index ({row}, {col}) out of range for a {rows}x{cols} matrix")]
    IndexOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("self-loop on neuron {neuron} is not allowed in a recurrent pool")]
    SelfLoop { neuron: usize },

    #[error("no eligible partner for neuron {neuron}")]
    EmptyCandidateSet { neuron: usize },

    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error("eigenvalue estimate did not converge within {iterations} iterations")]
    ConvergenceFailure { iterations: usize },

    #[error("shape mismatch for {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl PlasticityError {
    /// Errors that are expected under capacity constraints and never abort a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlasticityError::EmptyCandidateSet { .. })
    }
}
