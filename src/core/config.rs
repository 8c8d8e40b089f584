#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::connectivity::Weight;
use crate::error::{PlasticityError, Result};

/// How much of the activity window feeds the variance statistic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum AveragingMode {
    /// Every sample handed to the statistic.
    #[default]
    Whole,
    /// Only the trailing `queue_size` samples.
    Queue,
}

/// Knobs of the structural plasticity engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlasticityConfig {
    /// Magnitude of each individual weight add/prune edit.
    pub value: Weight,

    /// Cap on the number of partners a neuron may grow to. `None` disables it.
    pub max_partners: Option<usize>,

    pub averaging: AveragingMode,
    /// Window length when `averaging` is `Queue`.
    pub queue_size: usize,

    /// States are divided by this before the variance is taken.
    pub growth_parameter: f64,

    // DESP thresholds: variance <= min prunes, variance >= max grows.
    pub min_variance: f64,
    pub max_variance: f64,

    /// Smallest plasticity-evaluation window (and 1/5 of the warm-up).
    pub time_increment: usize,
    /// Largest window of the log-spaced schedule. `None` keeps `time_increment` fixed.
    pub max_increment: Option<usize>,
    /// Number of log-spaced window sizes between the two bounds.
    pub schedule_points: usize,

    /// Prune the least-informative partner instead of a uniform one.
    pub mi_based: bool,

    pub seed: u64,
}

impl Default for PlasticityConfig {
    fn default() -> Self {
        Self {
            value: 0.1,
            max_partners: Some(12),
            averaging: AveragingMode::Whole,
            queue_size: 10,
            growth_parameter: 0.1,
            min_variance: 0.1,
            max_variance: 1.0,
            time_increment: 10,
            max_increment: None,
            schedule_points: 10,
            mi_based: false,
            seed: 111,
        }
    }
}

impl PlasticityConfig {
    pub fn with_value(mut self, value: Weight) -> Self {
        self.value = value;
        self
    }

    pub fn with_max_partners(mut self, max_partners: Option<usize>) -> Self {
        self.max_partners = max_partners;
        self
    }

    pub fn with_averaging(mut self, averaging: AveragingMode, queue_size: usize) -> Self {
        self.averaging = averaging;
        self.queue_size = queue_size;
        self
    }

    pub fn with_growth_parameter(mut self, growth_parameter: f64) -> Self {
        self.growth_parameter = growth_parameter;
        self
    }

    pub fn with_increments(mut self, time_increment: usize, max_increment: Option<usize>) -> Self {
        self.time_increment = time_increment;
        self.max_increment = max_increment;
        self
    }

    pub fn with_variance_band(mut self, min_variance: f64, max_variance: f64) -> Self {
        self.min_variance = min_variance;
        self.max_variance = max_variance;
        self
    }

    pub fn with_schedule_points(mut self, schedule_points: usize) -> Self {
        self.schedule_points = schedule_points;
        self
    }

    pub fn with_mi_based(mut self, mi_based: bool) -> Self {
        self.mi_based = mi_based;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.value.is_finite() && self.value > 0.0) {
            return Err(PlasticityError::InvalidConfig("value must be finite and > 0"));
        }
        if self.max_partners == Some(0) {
            return Err(PlasticityError::InvalidConfig("max_partners must be >= 1"));
        }
        if self.queue_size == 0 {
            return Err(PlasticityError::InvalidConfig("queue_size must be >= 1"));
        }
        if !(self.growth_parameter.is_finite() && self.growth_parameter > 0.0) {
            return Err(PlasticityError::InvalidConfig(
                "growth_parameter must be finite and > 0",
            ));
        }
        if !(self.min_variance.is_finite() && self.max_variance.is_finite())
            || self.min_variance >= self.max_variance
        {
            return Err(PlasticityError::InvalidConfig(
                "min_variance must be < max_variance",
            ));
        }
        if self.time_increment == 0 {
            return Err(PlasticityError::InvalidConfig("time_increment must be >= 1"));
        }
        if let Some(max) = self.max_increment {
            if max < self.time_increment {
                return Err(PlasticityError::InvalidConfig(
                    "max_increment must be >= time_increment",
                ));
            }
        }
        if self.schedule_points == 0 {
            return Err(PlasticityError::InvalidConfig("schedule_points must be >= 1"));
        }
        Ok(())
    }
}
