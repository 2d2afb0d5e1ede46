//! Stability heuristics over a grid of per-offset costs
//!
//! Purely diagnostic: a warning never stops the benchmark.

use std::fmt;

/// First (aligned) cost above `min * ANOMALY_RATIO` is flagged
pub const ANOMALY_RATIO: f64 = 1.15;

/// Second-smallest cost above `smallest * OUTLIER_RATIO` is flagged
pub const OUTLIER_RATIO: f64 = 1.7;

/// A suspicious timing pattern
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// The aligned configuration is noticeably slower than the fastest one
    FirstAboveMin {
        /// Cost of the first configuration
        first: f64,
        /// Smallest cost in the grid
        min: f64,
    },
    /// The fastest configuration stands far apart from the next one
    Outlier {
        /// All costs in ascending order
        sorted: Vec<f64>,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstAboveMin { first, min } => write!(
                f,
                "warning: anomaly detected, use --verbose and improve stability, [0]: {first}  min: {min}"
            ),
            Self::Outlier { sorted } => write!(f, "warning: outlier? {sorted:?}"),
        }
    }
}

/// Inspect costs in grid order (index 0 is the aligned case)
#[must_use]
pub fn check_results(costs: &[f64]) -> Vec<Anomaly> {
    let mut found = Vec::new();
    let Some(&first) = costs.first() else {
        return found;
    };

    let min = costs.iter().copied().fold(f64::INFINITY, f64::min);
    if first > min * ANOMALY_RATIO {
        found.push(Anomaly::FirstAboveMin { first, min });
    }

    if costs.len() >= 2 {
        let mut sorted = costs.to_vec();
        sorted.sort_by(f64::total_cmp);
        if sorted[0] > 0.0 && sorted[1] > sorted[0] * OUTLIER_RATIO {
            found.push(Anomaly::Outlier { sorted });
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_twenty_percent_above_min_warns() {
        let costs = [1.2, 1.0, 1.05, 1.1];
        let found = check_results(&costs);
        assert_eq!(found, vec![Anomaly::FirstAboveMin { first: 1.2, min: 1.0 }]);
        assert!(found[0].to_string().starts_with("warning: anomaly detected"));
    }

    #[test]
    fn test_stable_grid_is_quiet() {
        let costs = [1.05, 1.0, 1.1, 1.12];
        assert!(check_results(&costs).is_empty());
    }

    #[test]
    fn test_isolated_fast_entry_is_outlier() {
        let costs = [2.0, 2.1, 1.0, 2.05];
        let found = check_results(&costs);
        assert!(found.iter().any(|a| matches!(a, Anomaly::Outlier { .. })));
        let outlier = found
            .iter()
            .find(|a| matches!(a, Anomaly::Outlier { .. }))
            .unwrap();
        assert!(outlier.to_string().starts_with("warning: outlier?"));
    }

    #[test]
    fn test_single_and_empty_grids() {
        assert!(check_results(&[]).is_empty());
        assert!(check_results(&[3.0]).is_empty());
    }
}
