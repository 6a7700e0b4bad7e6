use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{Compound, GridEntry};

/// Planned pit laps and starting tyre for one driver. Fixed for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub planned_pit_laps: BTreeSet<u32>,
    #[serde(default)]
    pub starting_compound: Compound,
}

impl StrategyPlan {
    pub fn new(pit_laps: impl IntoIterator<Item = u32>, starting_compound: Compound) -> Self {
        Self {
            planned_pit_laps: pit_laps.into_iter().collect(),
            starting_compound,
        }
    }

    /// A plan with no stops at all.
    pub fn no_stop(starting_compound: Compound) -> Self {
        Self::new([], starting_compound)
    }
}

/// Heuristic pit laps for a starting slot and race distance.
pub fn heuristic_pit_laps(grid_position: u32, race_laps: u32) -> BTreeSet<u32> {
    if grid_position <= 5 && race_laps >= 50 {
        BTreeSet::from([18, 40])
    } else if race_laps >= 40 {
        BTreeSet::from([22])
    } else {
        BTreeSet::from([(0.55 * race_laps as f64).round() as u32])
    }
}

/// Build the heuristic plan for every grid entry, then apply caller overrides.
/// An override replaces the driver's heuristic plan outright.
pub fn resolve_strategies(
    grid: &[GridEntry],
    race_laps: u32,
    overrides: &HashMap<String, StrategyPlan>,
) -> HashMap<String, StrategyPlan> {
    let mut plans: HashMap<String, StrategyPlan> = grid
        .iter()
        .map(|entry| {
            let plan = StrategyPlan {
                planned_pit_laps: heuristic_pit_laps(entry.grid_position, race_laps),
                starting_compound: Compound::Medium,
            };
            (entry.driver.clone(), plan)
        })
        .collect();

    for (driver, plan) in overrides {
        plans.insert(driver.clone(), plan.clone());
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(driver: &str, grid_position: u32) -> GridEntry {
        GridEntry {
            driver: driver.to_string(),
            team: None,
            grid_position,
        }
    }

    #[test]
    fn test_front_runners_two_stop_on_long_races() {
        assert_eq!(heuristic_pit_laps(1, 57), BTreeSet::from([18, 40]));
        assert_eq!(heuristic_pit_laps(5, 50), BTreeSet::from([18, 40]));
        assert_eq!(heuristic_pit_laps(6, 57), BTreeSet::from([22]));
    }

    #[test]
    fn test_medium_races_one_stop_on_lap_22() {
        assert_eq!(heuristic_pit_laps(1, 49), BTreeSet::from([22]));
        assert_eq!(heuristic_pit_laps(12, 40), BTreeSet::from([22]));
    }

    #[test]
    fn test_short_races_stop_at_55_percent() {
        assert_eq!(heuristic_pit_laps(3, 39), BTreeSet::from([21]));
        assert_eq!(heuristic_pit_laps(3, 10), BTreeSet::from([6]));
        assert_eq!(heuristic_pit_laps(3, 2), BTreeSet::from([1]));
    }

    #[test]
    fn test_override_replaces_plan_without_merging() {
        let grid = vec![entry("VER", 1), entry("HAM", 2)];
        let mut overrides = HashMap::new();
        overrides.insert(
            "VER".to_string(),
            StrategyPlan::new([30], Compound::Soft),
        );

        let plans = resolve_strategies(&grid, 57, &overrides);
        assert_eq!(plans["VER"].planned_pit_laps, BTreeSet::from([30]));
        assert_eq!(plans["VER"].starting_compound, Compound::Soft);
        assert_eq!(plans["HAM"].planned_pit_laps, BTreeSet::from([18, 40]));
        assert_eq!(plans["HAM"].starting_compound, Compound::Medium);
    }

    #[test]
    fn test_override_json_defaults_compound() {
        let plan: StrategyPlan =
            serde_json::from_str(r#"{ "planned_pit_laps": [40, 20, 20] }"#).unwrap();
        assert_eq!(plan.planned_pit_laps, BTreeSet::from([20, 40]));
        assert_eq!(plan.starting_compound, Compound::Medium);
    }
}
