use std::collections::HashMap;

use crate::types::HistoricalLap;

/// Baseline pace for a driver, tagged with where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaceEstimate {
    /// Median of the driver's recorded laps.
    Historical(f64),
    /// No laps on record; the configured fallback is used.
    Fallback(f64),
}

impl PaceEstimate {
    pub fn seconds(self) -> f64 {
        match self {
            PaceEstimate::Historical(s) | PaceEstimate::Fallback(s) => s,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, PaceEstimate::Fallback(_))
    }
}

/// Per-driver baseline pace estimated from historical timing.
///
/// Drivers without usable laps have no entry; the median is the only
/// outlier handling (pit laps and slow laps are not filtered out).
#[derive(Debug, Clone, Default)]
pub struct PaceModel {
    base: HashMap<String, f64>,
}

impl PaceModel {
    pub fn from_laps(laps: &[HistoricalLap]) -> Self {
        let mut by_driver: HashMap<&str, Vec<f64>> = HashMap::new();
        for lap in laps {
            if lap.lap_time_s.is_finite() && lap.lap_time_s > 0.0 {
                by_driver
                    .entry(lap.driver.as_str())
                    .or_default()
                    .push(lap.lap_time_s);
            }
        }

        let base = by_driver
            .into_iter()
            .filter_map(|(driver, mut times)| median(&mut times).map(|m| (driver.to_string(), m)))
            .collect();
        Self { base }
    }

    pub fn historical(&self, driver: &str) -> Option<f64> {
        self.base.get(driver).copied()
    }

    pub fn estimate(&self, driver: &str, fallback_pace: f64) -> PaceEstimate {
        match self.historical(driver) {
            Some(pace) => PaceEstimate::Historical(pace),
            None => PaceEstimate::Fallback(fallback_pace),
        }
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
