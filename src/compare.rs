use std::collections::{HashMap, HashSet};

use crate::types::{ActualResult, ComparisonRow, ResultRecord, SimulationRun};

/// Join simulated and actual classifications by driver.
///
/// Rows follow the order of the actual results. Drivers missing from either
/// side, or without an actual finishing position, are left out. A driver
/// listed twice in the actual results is compared on their first row only.
pub fn compare_to_actual(
    run: &SimulationRun,
    simulated: &[ResultRecord],
    actual: &[ActualResult],
) -> Vec<ComparisonRow> {
    let by_driver: HashMap<&str, &ResultRecord> =
        simulated.iter().map(|r| (r.driver.as_str(), r)).collect();
    let mut seen = HashSet::new();

    actual
        .iter()
        .filter(|a| seen.insert(a.driver.clone()))
        .filter_map(|a| {
            let actual_finish = a.position?;
            let sim = by_driver.get(a.driver.as_str())?;
            Some(ComparisonRow {
                simulation_id: run.id,
                season: run.season,
                round: run.round,
                driver: a.driver.clone(),
                actual_finish,
                sim_finish: sim.finish_position,
                diff_positions: sim.finish_position as i64 - actual_finish as i64,
                actual_points: a.points,
                sim_points: sim.points,
            })
        })
        .collect()
}

/// Mean absolute position error across compared drivers.
pub fn mean_abs_position_error(rows: &[ComparisonRow]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let total: i64 = rows.iter().map(|r| r.diff_positions.abs()).sum();
    Some(total as f64 / rows.len() as f64)
}
