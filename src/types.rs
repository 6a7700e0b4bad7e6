use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the storage collaborator to one simulation run.
pub type SimulationId = u64;

/// Tyre compound fitted to a car.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compound {
    Soft,
    #[default]
    Medium,
    Hard,
}

impl Compound {
    /// Compound fitted at a pit stop. Only alternates Hard and Medium;
    /// Soft is a valid starting tyre but never re-selected.
    pub fn after_pit(self) -> Compound {
        match self {
            Compound::Hard => Compound::Medium,
            Compound::Soft | Compound::Medium => Compound::Hard,
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compound::Soft => "Soft",
            Compound::Medium => "Medium",
            Compound::Hard => "Hard",
        };
        f.write_str(name)
    }
}

/// One starting slot: driver code, team label and grid position (1 = pole).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridEntry {
    pub driver: String,
    pub team: Option<String>,
    pub grid_position: u32,
}

/// Historical lap timing row used by the pace model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalLap {
    pub driver: String,
    /// Absent when the timing archive did not number the lap.
    pub lap_number: Option<u32>,
    pub lap_time_s: f64,
}

/// Actual classified result of a real race, used for comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualResult {
    pub driver: String,
    pub team: Option<String>,
    pub position: Option<u32>,
    pub points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: SimulationId,
    pub season: i32,
    pub round: u32,
    pub event_name: String,
    pub strategy_model: String,
}

/// Telemetry for one driver on one lap. Position, stint and compound are the
/// values after the lap has been completed and ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    pub simulation_id: SimulationId,
    pub lap: u32,
    pub driver: String,
    pub position: u32,
    pub lap_time_s: f64,
    pub stint: u32,
    pub tyre_compound: Compound,
    pub is_pit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitRecord {
    pub simulation_id: SimulationId,
    pub driver: String,
    pub lap: u32,
    pub pit_time_s: f64,
    pub from_compound: Compound,
    pub to_compound: Compound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub simulation_id: SimulationId,
    pub driver: String,
    pub team: Option<String>,
    pub grid_position: u32,
    pub finish_position: u32,
    pub points: u32,
    pub status: String,
    pub total_time_s: f64,
}

/// Simulated vs. actual finish for one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub simulation_id: SimulationId,
    pub season: i32,
    pub round: u32,
    pub driver: String,
    pub actual_finish: u32,
    pub sim_finish: u32,
    /// `sim_finish - actual_finish`; negative means the simulation ranked the driver higher.
    pub diff_positions: i64,
    pub actual_points: Option<f64>,
    pub sim_points: u32,
}
