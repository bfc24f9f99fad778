//! Full / not-full hysteresis for cap utilization metrics

use crate::models::{Alert, AlertCategory, AlertKind, Severity};

/// Cap threshold used when none is configured
pub const DEFAULT_CAP_THRESHOLD: f64 = 1.0;

/// Decides alerts for ratio metrics by comparing against the previous sample
#[derive(Debug, Clone, Copy)]
pub struct CapEvaluator {
    threshold: f64,
}

impl Default for CapEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_CAP_THRESHOLD)
    }
}

impl CapEvaluator {
    /// Create an evaluator; any value at or above `threshold` counts as full
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Configured threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluate a transition from `last_value` to `value`
    pub fn evaluate(
        &self,
        key: &str,
        display_name: &str,
        value: f64,
        last_value: Option<f64>,
    ) -> Vec<Alert> {
        let Some(last_value) = last_value else {
            return Vec::new();
        };

        let was_full = last_value >= self.threshold;
        let is_full = value >= self.threshold;

        match (was_full, is_full) {
            (false, true) => vec![Alert::new(
                AlertCategory::Cap,
                Severity::Minor,
                key,
                AlertKind::CapReached {
                    name: display_name.to_string(),
                },
            )],
            // Leaving a cap is major, filling one is minor.
            (true, false) => vec![Alert::new(
                AlertCategory::Cap,
                Severity::Major,
                key,
                AlertKind::CapReleased {
                    name: display_name.to_string(),
                    usage: value,
                },
            )],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const KEY: &str = "aave:rlusd:supply:cap_util";

    #[rstest]
    #[case::first_sight(None, 1.0)]
    #[case::still_full(Some(1.0), 1.0)]
    #[case::still_open(Some(0.4), 0.6)]
    #[case::over_full_stays_full(Some(1.2), 1.0)]
    fn no_transition_no_alert(#[case] last: Option<f64>, #[case] value: f64) {
        let caps = CapEvaluator::default();
        assert!(caps.evaluate(KEY, "RLUSD", value, last).is_empty());
    }

    #[test]
    fn filling_up_is_minor() {
        let alerts = CapEvaluator::default().evaluate(KEY, "RLUSD", 1.0, Some(0.5));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Minor);
        assert_eq!(alerts[0].category, AlertCategory::Cap);
        assert!(matches!(alerts[0].kind, AlertKind::CapReached { .. }));
    }

    #[test]
    fn freeing_up_is_major() {
        let alerts = CapEvaluator::default().evaluate(KEY, "RLUSD", 0.999, Some(1.0));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Major);
        assert!(matches!(alerts[0].kind, AlertKind::CapReleased { usage, .. } if usage == 0.999));
    }

    #[test]
    fn near_one_threshold_absorbs_float_noise() {
        let caps = CapEvaluator::new(0.99995);

        assert_eq!(caps.evaluate(KEY, "RLUSD", 0.99997, Some(0.9)).len(), 1);
        assert!(caps.evaluate(KEY, "RLUSD", 0.99996, Some(0.99997)).is_empty());
        assert_eq!(caps.evaluate(KEY, "RLUSD", 0.9999, Some(0.99997)).len(), 1);
    }
}
