//! Per-cycle response-time statistics.
//!
//! A cycle owns its samples outright. The collection is created when the
//! cycle starts and consumed when the report is built, so a straggler from a
//! timed-out emission can never leak into the next cycle's numbers.

use serde::Serialize;

/// One captured round trip: the raw reply and its latency in milliseconds.
#[derive(Debug, Clone)]
pub struct TimingSample {
    pub response: String,
    pub mrt_ms: f64,
}

/// The record a finished cycle produces.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub service_count: usize,
    pub messages_sent: usize,
    pub responses_received: usize,
    pub mean_mrt_ms: f64,
    pub stddev_mrt_ms: f64,
}

impl CycleReport {
    pub fn from_samples(
        cycle: u64,
        service_count: usize,
        messages_sent: usize,
        samples: &[TimingSample],
    ) -> CycleReport {
        let mrts: Vec<f64> = samples.iter().map(|s| s.mrt_ms).collect();
        CycleReport {
            cycle,
            service_count,
            messages_sent,
            responses_received: samples.len(),
            mean_mrt_ms: mean(&mrts),
            stddev_mrt_ms: stddev(&mrts),
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (divides by `n - 1`). Zero for fewer than two
/// samples.
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn stddev_of_empty_and_single_is_zero() {
        assert_eq!(stddev(&[]), 0.0);
        assert_eq!(stddev(&[12.5]), 0.0);
    }

    #[test]
    fn stddev_uses_sample_formula() {
        // sqrt(((10-20)^2 + 0 + (30-20)^2) / 2) = 10
        let sd = stddev(&[10.0, 20.0, 30.0]);
        assert!((sd - 10.0).abs() < 1e-9);
    }

    #[test]
    fn report_aggregates_samples() {
        let samples = vec![
            TimingSample {
                response: "a".into(),
                mrt_ms: 10.0,
            },
            TimingSample {
                response: "b".into(),
                mrt_ms: 30.0,
            },
        ];
        let report = CycleReport::from_samples(2, 4, 5, &samples);
        assert_eq!(report.cycle, 2);
        assert_eq!(report.messages_sent, 5);
        assert_eq!(report.responses_received, 2);
        assert!((report.mean_mrt_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn report_of_empty_cycle_is_all_zero() {
        let report = CycleReport::from_samples(0, 1, 10, &[]);
        assert_eq!(report.responses_received, 0);
        assert_eq!(report.mean_mrt_ms, 0.0);
        assert_eq!(report.stddev_mrt_ms, 0.0);
    }
}
