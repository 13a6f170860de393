//! Auto-tuning results tracking

use super::search::Binding;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timing of a single run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Values of the tuned parameters
    pub binding: Binding,
    /// Sum of the profiler counters, in seconds
    pub elapsed: f64,
}

impl RunRecord {
    /// `name=value` pairs, comma separated
    pub fn to_string_compact(&self) -> String {
        self.binding.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
    }
}

/// Results from auto-tuning
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TuningResults {
    results: Vec<RunRecord>,
}

impl TuningResults {
    /// Create empty results
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result
    pub fn add(&mut self, binding: Binding, elapsed: f64) {
        self.results.push(RunRecord { binding, elapsed });
    }

    /// The fastest run; the earliest one on ties
    pub fn best(&self) -> Option<&RunRecord> {
        self.results.iter().min_by(|a, b| a.elapsed.total_cmp(&b.elapsed))
    }

    /// Get all results sorted by performance
    pub fn sorted(&self) -> Vec<&RunRecord> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| a.elapsed.total_cmp(&b.elapsed));
        sorted
    }

    /// Get number of runs
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Get all results
    pub fn all(&self) -> &[RunRecord] {
        &self.results
    }

    /// Export results to CSV format
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("run,elapsed\n");
        for r in &self.results {
            csv.push_str(&format!("\"{}\",{:.6}\n", r.to_string_compact(), r.elapsed));
        }
        csv
    }
}

/// What an auto-tuning session did.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningSummary {
    /// Runs actually timed
    pub runs: usize,
    /// Timesteps executed per run
    pub timesteps_per_run: i64,
    /// The selected parameter values
    pub tuned: IndexMap<String, i64>,
}

impl TuningSummary {
    /// True when no tuning took place.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for TuningSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tuned: Vec<String> = self.tuned.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "runs={} tpr={} tuned=[{}]", self.runs, self.timesteps_per_run, tuned.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(v: i64) -> Binding {
        vec![("x0_blk0_size".to_string(), v)]
    }

    #[test]
    fn test_results() {
        let mut results = TuningResults::new();
        results.add(run(8), 1.0);
        results.add(run(16), 0.5);
        results.add(run(32), 0.5);
        results.add(run(64), 0.9);

        assert_eq!(results.len(), 4);
        assert_eq!(results.best().map(|r| r.binding.clone()), Some(run(16)));
        assert_eq!(results.sorted().last().map(|r| r.elapsed), Some(1.0));

        let csv = results.to_csv();
        assert!(csv.starts_with("run,elapsed\n"));
        assert!(csv.contains("\"x0_blk0_size=16\",0.500000"));
    }

    #[test]
    fn test_summary_is_empty() {
        assert!(TuningSummary::default().is_empty());
        let summary = TuningSummary { runs: 1, timesteps_per_run: 5, tuned: IndexMap::new() };
        assert!(!summary.is_empty());
        assert_eq!(summary.to_string(), "runs=1 tpr=5 tuned=[]");
    }
}
