use crate::plasticity::EditCounters;

/// A read-only snapshot of a running simulation.
///
/// Design intent:
/// - Observers cannot mutate or steer the run; the driver hands out copies.
/// - One snapshot is emitted after the warm-up and one after every plasticity round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSnapshot {
    /// Input samples consumed so far (warm-up included).
    pub consumed: usize,
    /// Total input samples handed to the run.
    pub total: usize,
    /// Plasticity rounds completed.
    pub rounds: usize,
    /// Cumulative edit counters.
    pub counters: EditCounters,
    pub excitatory_edges: usize,
    pub inhibitory_edges: usize,
}

impl RunSnapshot {
    /// Fraction of the input consumed, in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.consumed as f64 / self.total as f64
        }
    }
}

pub trait ProgressObserver {
    fn on_progress(&mut self, snapshot: &RunSnapshot);
}

/// Ignores every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&mut self, _snapshot: &RunSnapshot) {}
}

/// Keeps every snapshot in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub snapshots: Vec<RunSnapshot>,
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&mut self, snapshot: &RunSnapshot) {
        self.snapshots.push(*snapshot);
    }
}

/// Emits an `info` event every time another `every` fraction of the input is consumed.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    every: f64,
    next: f64,
}

impl TracingObserver {
    pub fn new(every: f64) -> Self {
        let every = if every.is_finite() && every > 0.0 { every } else { 0.1 };
        Self { every, next: 0.0 }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl ProgressObserver for TracingObserver {
    fn on_progress(&mut self, snapshot: &RunSnapshot) {
        let fraction = snapshot.fraction();
        if fraction + 1e-12 < self.next {
            return;
        }
        let next = ((fraction / self.every).floor() + 1.0) * self.every;
        // Below float resolution the step cannot move past `fraction`.
        self.next = if next > fraction { next } else { fraction + f64::EPSILON };
        tracing::info!(
            consumed = snapshot.consumed,
            total = snapshot.total,
            rounds = snapshot.rounds,
            added = snapshot.counters.total_add,
            pruned = snapshot.counters.total_prun,
            edges = snapshot.excitatory_edges,
            "simulation progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(consumed: usize) -> RunSnapshot {
        RunSnapshot {
            consumed,
            total: 100,
            rounds: 0,
            counters: EditCounters::default(),
            excitatory_edges: 0,
            inhibitory_edges: 0,
        }
    }

    #[test]
    fn fraction_handles_empty_runs() {
        let mut s = snapshot(0);
        s.total = 0;
        assert_eq!(s.fraction(), 1.0);
        assert_eq!(snapshot(25).fraction(), 0.25);
    }

    #[test]
    fn tracing_observer_advances_its_threshold() {
        let mut obs = TracingObserver::new(0.5);
        obs.on_progress(&snapshot(10));
        assert!(obs.next > 0.1);
        obs.on_progress(&snapshot(60));
        assert!(obs.next > 0.6);
        assert!((obs.next - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tiny_reporting_step_terminates() {
        let mut obs = TracingObserver::new(1e-300);
        obs.on_progress(&snapshot(50));
        assert!(obs.next > 0.5);
        obs.on_progress(&snapshot(100));
        assert!(obs.next > 1.0);
    }
}
