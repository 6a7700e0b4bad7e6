use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::ResultRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverSummary {
    pub driver: String,
    pub runs: u32,
    pub mean_finish: f64,
    pub best_finish: u32,
    pub worst_finish: u32,
    pub wins: u32,
    pub podiums: u32,
    pub mean_points: f64,
}

/// Finishing statistics over a set of independent runs of the same event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnsembleSummary {
    pub runs: usize,
    /// Ordered by mean finish, then driver code.
    pub drivers: Vec<DriverSummary>,
}

#[derive(Default)]
struct Tally {
    runs: u32,
    finish_sum: u64,
    best: u32,
    worst: u32,
    wins: u32,
    podiums: u32,
    points_sum: u64,
}

impl EnsembleSummary {
    pub fn from_results(runs: &[Vec<ResultRecord>]) -> Self {
        let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
        for results in runs {
            for r in results {
                let t = tallies.entry(r.driver.as_str()).or_insert_with(|| Tally {
                    best: u32::MAX,
                    ..Default::default()
                });
                t.runs += 1;
                t.finish_sum += u64::from(r.finish_position);
                t.best = t.best.min(r.finish_position);
                t.worst = t.worst.max(r.finish_position);
                t.points_sum += u64::from(r.points);
                if r.finish_position == 1 {
                    t.wins += 1;
                }
                if r.finish_position <= 3 {
                    t.podiums += 1;
                }
            }
        }

        let mut drivers: Vec<DriverSummary> = tallies
            .into_iter()
            .map(|(driver, t)| DriverSummary {
                driver: driver.to_string(),
                runs: t.runs,
                mean_finish: t.finish_sum as f64 / f64::from(t.runs),
                best_finish: t.best,
                worst_finish: t.worst,
                wins: t.wins,
                podiums: t.podiums,
                mean_points: t.points_sum as f64 / f64::from(t.runs),
            })
            .collect();
        drivers.sort_by(|a, b| {
            a.mean_finish
                .total_cmp(&b.mean_finish)
                .then_with(|| a.driver.cmp(&b.driver))
        });

        Self {
            runs: runs.len(),
            drivers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::points_for_position;

    fn result(driver: &str, finish_position: u32) -> ResultRecord {
        ResultRecord {
            simulation_id: 1,
            driver: driver.to_string(),
            team: None,
            grid_position: 1,
            finish_position,
            points: points_for_position(finish_position),
            status: "Finished".to_string(),
            total_time_s: 0.0,
        }
    }

    #[test]
    fn test_summary_over_runs() {
        let runs = vec![
            vec![result("VER", 1), result("NOR", 2)],
            vec![result("NOR", 1), result("VER", 2)],
            vec![result("VER", 1), result("NOR", 2)],
        ];
        let summary = EnsembleSummary::from_results(&runs);
        assert_eq!(summary.runs, 3);

        let ver = &summary.drivers[0];
        assert_eq!(ver.driver, "VER");
        assert_eq!(ver.wins, 2);
        assert_eq!(ver.podiums, 3);
        assert_eq!(ver.best_finish, 1);
        assert_eq!(ver.worst_finish, 2);
        assert!((ver.mean_finish - 4.0 / 3.0).abs() < 1e-12);
        assert!((ver.mean_points - 68.0 / 3.0).abs() < 1e-12);

        assert_eq!(summary.drivers[1].driver, "NOR");
        assert_eq!(summary.drivers[1].wins, 1);
    }

    #[test]
    fn test_empty_ensemble() {
        let summary = EnsembleSummary::from_results(&[]);
        assert_eq!(summary.runs, 0);
        assert!(summary.drivers.is_empty());
    }
}
