//! Per-iteration statistics and the structured log record.

use std::collections::BTreeMap;

use serde::Serialize;

/// One record of the optimization log. Serialized as a single JSON line
/// per iteration; non-finite estimates are recorded as `null` alongside
/// the `Degenerate` marker.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    #[serde(rename = "Iteration")]
    pub iteration: usize,
    #[serde(rename = "Energy")]
    pub energy: Option<f64>,
    #[serde(rename = "EnergyVariance")]
    pub energy_variance: Option<f64>,
    #[serde(rename = "Acceptance")]
    pub acceptance: f64,
    #[serde(rename = "Observables")]
    pub observables: BTreeMap<String, f64>,
    #[serde(rename = "Degenerate")]
    pub degenerate: bool,
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean() {
        assert_relative_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_record_serializes_with_stable_field_names() {
        let record = IterationRecord {
            iteration: 3,
            energy: Some(-1.5),
            energy_variance: Some(0.25),
            acceptance: 0.6,
            observables: BTreeMap::from([("SigmaX".to_string(), 0.1)]),
            degenerate: false,
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"Iteration\":3"));
        assert!(line.contains("\"Energy\":-1.5"));
        assert!(line.contains("\"SigmaX\":0.1"));
    }
}
