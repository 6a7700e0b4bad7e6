use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::types::{ActualResult, GridEntry, HistoricalLap};

/// Starting grid for an event plus the drivers that had to be left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    /// Sorted by grid position, pole first.
    pub entries: Vec<GridEntry>,
    /// Drivers with no usable grid slot.
    pub excluded: Vec<String>,
    /// Drivers listed more than once; only their first row is used.
    pub duplicates: Vec<String>,
}

/// Read-only access to historical event data.
pub trait EventSource: Send + Sync {
    /// Whether any race, result, qualifying or lap row exists for the event.
    fn has_event(&self, season: i32, round: u32) -> bool;

    fn event_name(&self, season: i32, round: u32) -> Option<String>;

    fn get_grid(&self, season: i32, round: u32) -> Grid;

    fn get_historical_laps(&self, season: i32, round: u32) -> Vec<HistoricalLap>;

    /// Highest recorded lap number, if lap numbers are available.
    fn get_race_length(&self, season: i32, round: u32) -> Option<u32>;

    fn get_actual_results(&self, season: i32, round: u32) -> Vec<ActualResult>;
}

#[derive(Deserialize, Debug, Clone)]
pub struct RaceRow {
    pub season: i32,
    pub round: u32,
    pub race_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ResultRow {
    pub season: i32,
    pub round: u32,
    pub driver: String,
    pub team: Option<String>,
    pub position: Option<u32>,
    pub points: Option<f64>,
    /// Starting slot as recorded in the race classification.
    pub grid: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct QualifyingRow {
    pub season: i32,
    pub round: u32,
    pub driver: String,
    pub team: Option<String>,
    pub position: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LapRow {
    pub season: i32,
    pub round: u32,
    pub driver: String,
    pub lap_number: Option<u32>,
    pub lap_time_s: Option<f64>,
}

/// Tables of historical data as exported from the timing archive.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct EventDataset {
    pub races: Vec<RaceRow>,
    pub results: Vec<ResultRow>,
    pub qualifying: Vec<QualifyingRow>,
    pub laps: Vec<LapRow>,
}

/// `EventSource` over an in-memory dataset, usually loaded from JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonEventStore {
    data: EventDataset,
}

impl JsonEventStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read event data at {}", path.display()))?;
        let data: EventDataset = serde_json::from_str(&raw)
            .with_context(|| format!("invalid event data JSON in {}", path.display()))?;
        tracing::info!(
            races = data.races.len(),
            results = data.results.len(),
            qualifying = data.qualifying.len(),
            laps = data.laps.len(),
            "loaded event data from {}",
            path.display()
        );
        Ok(Self { data })
    }

    pub fn from_dataset(data: EventDataset) -> Self {
        Self { data }
    }

    pub fn dataset(&self) -> &EventDataset {
        &self.data
    }
}

fn slot(position: Option<u32>) -> Option<u32> {
    // 0 is how pit-lane starts are recorded; it is not a grid slot.
    position.filter(|p| *p > 0)
}

fn lap_no(lap_number: Option<u32>) -> Option<u32> {
    // Laps count from 1; a 0 is an unnumbered row.
    lap_number.filter(|n| *n > 0)
}

impl EventSource for JsonEventStore {
    fn has_event(&self, season: i32, round: u32) -> bool {
        let hit = |s: i32, r: u32| s == season && r == round;
        self.data.races.iter().any(|x| hit(x.season, x.round))
            || self.data.results.iter().any(|x| hit(x.season, x.round))
            || self.data.qualifying.iter().any(|x| hit(x.season, x.round))
            || self.data.laps.iter().any(|x| hit(x.season, x.round))
    }

    fn event_name(&self, season: i32, round: u32) -> Option<String> {
        self.data
            .races
            .iter()
            .find(|r| r.season == season && r.round == round)
            .and_then(|r| r.race_name.clone())
    }

    fn get_grid(&self, season: i32, round: u32) -> Grid {
        let quali: Vec<&QualifyingRow> = self
            .data
            .qualifying
            .iter()
            .filter(|q| q.season == season && q.round == round)
            .collect();

        let candidates: Vec<(String, Option<String>, Option<u32>)> =
            if quali.iter().any(|q| slot(q.position).is_some()) {
                quali
                    .into_iter()
                    .map(|q| (q.driver.clone(), q.team.clone(), slot(q.position)))
                    .collect()
            } else {
                self.data
                    .results
                    .iter()
                    .filter(|r| r.season == season && r.round == round)
                    .map(|r| (r.driver.clone(), r.team.clone(), slot(r.grid)))
                    .collect()
            };

        let mut grid = Grid::default();
        let mut seen = HashSet::new();
        for (driver, team, position) in candidates {
            if !seen.insert(driver.clone()) {
                grid.duplicates.push(driver);
                continue;
            }
            match position {
                Some(grid_position) => grid.entries.push(GridEntry {
                    driver,
                    team,
                    grid_position,
                }),
                None => grid.excluded.push(driver),
            }
        }
        grid.entries.sort_by_key(|e| e.grid_position);
        grid
    }

    fn get_historical_laps(&self, season: i32, round: u32) -> Vec<HistoricalLap> {
        self.data
            .laps
            .iter()
            .filter(|l| l.season == season && l.round == round)
            .filter_map(|l| {
                Some(HistoricalLap {
                    driver: l.driver.clone(),
                    lap_number: lap_no(l.lap_number),
                    lap_time_s: l.lap_time_s?,
                })
            })
            .collect()
    }

    fn get_race_length(&self, season: i32, round: u32) -> Option<u32> {
        self.data
            .laps
            .iter()
            .filter(|l| l.season == season && l.round == round)
            .filter_map(|l| lap_no(l.lap_number))
            .max()
    }

    fn get_actual_results(&self, season: i32, round: u32) -> Vec<ActualResult> {
        self.data
            .results
            .iter()
            .filter(|r| r.season == season && r.round == round)
            .map(|r| ActualResult {
                driver: r.driver.clone(),
                team: r.team.clone(),
                position: r.position,
                points: r.points,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "races": [ { "season": 2024, "round": 3, "race_name": "Australian Grand Prix" } ],
        "results": [
            { "season": 2024, "round": 3, "driver": "SAI", "team": "Ferrari", "position": 1, "points": 25, "grid": 2 },
            { "season": 2024, "round": 3, "driver": "LEC", "team": "Ferrari", "position": 2, "points": 19, "grid": 4 },
            { "season": 2024, "round": 3, "driver": "VER", "team": "Red Bull", "position": null, "points": 0, "grid": 1 }
        ],
        "qualifying": [
            { "season": 2024, "round": 3, "driver": "VER", "team": "Red Bull", "position": 1 },
            { "season": 2024, "round": 3, "driver": "SAI", "team": "Ferrari", "position": 2 },
            { "season": 2024, "round": 3, "driver": "LEC", "team": "Ferrari", "position": null }
        ],
        "laps": [
            { "season": 2024, "round": 3, "driver": "SAI", "lap_number": 1, "lap_time_s": 82.1 },
            { "season": 2024, "round": 3, "driver": "SAI", "lap_number": 58, "lap_time_s": 81.9 },
            { "season": 2024, "round": 3, "driver": "LEC", "lap_number": 2, "lap_time_s": null }
        ]
    }"#;

    fn store() -> JsonEventStore {
        JsonEventStore::from_dataset(serde_json::from_str(SAMPLE).unwrap())
    }

    #[test]
    fn test_grid_from_qualifying_drops_missing_slots() {
        let grid = store().get_grid(2024, 3);
        let drivers: Vec<&str> = grid.entries.iter().map(|e| e.driver.as_str()).collect();
        assert_eq!(drivers, vec!["VER", "SAI"]);
        assert_eq!(grid.excluded, vec!["LEC".to_string()]);
    }

    #[test]
    fn test_grid_falls_back_to_result_slots() {
        let mut data: EventDataset = serde_json::from_str(SAMPLE).unwrap();
        for q in &mut data.qualifying {
            q.position = None;
        }
        let grid = JsonEventStore::from_dataset(data).get_grid(2024, 3);
        let drivers: Vec<(&str, u32)> = grid
            .entries
            .iter()
            .map(|e| (e.driver.as_str(), e.grid_position))
            .collect();
        assert_eq!(drivers, vec![("VER", 1), ("SAI", 2), ("LEC", 4)]);
        assert!(grid.excluded.is_empty());
    }

    #[test]
    fn test_duplicate_rows_keep_first_slot() {
        let mut data: EventDataset = serde_json::from_str(SAMPLE).unwrap();
        data.qualifying = [("VER", 1), ("VER", 3), ("HAM", 2)]
            .into_iter()
            .map(|(driver, position)| QualifyingRow {
                season: 2024,
                round: 3,
                driver: driver.to_string(),
                team: None,
                position: Some(position),
            })
            .collect();
        let grid = JsonEventStore::from_dataset(data).get_grid(2024, 3);
        let drivers: Vec<(&str, u32)> = grid
            .entries
            .iter()
            .map(|e| (e.driver.as_str(), e.grid_position))
            .collect();
        assert_eq!(drivers, vec![("VER", 1), ("HAM", 2)]);
        assert_eq!(grid.duplicates, vec!["VER".to_string()]);
        assert!(grid.excluded.is_empty());
    }

    #[test]
    fn test_lap_zero_is_not_a_lap_number() {
        let mut data: EventDataset = serde_json::from_str(SAMPLE).unwrap();
        data.laps = vec![LapRow {
            season: 2024,
            round: 3,
            driver: "SAI".to_string(),
            lap_number: Some(0),
            lap_time_s: Some(82.0),
        }];
        let s = JsonEventStore::from_dataset(data);
        assert_eq!(s.get_race_length(2024, 3), None);
        let laps = s.get_historical_laps(2024, 3);
        assert_eq!(laps.len(), 1, "the lap time still feeds the pace model");
        assert_eq!(laps[0].lap_number, None);
    }

    #[test]
    fn test_race_length_and_laps() {
        let s = store();
        assert_eq!(s.get_race_length(2024, 3), Some(58));
        assert_eq!(s.get_race_length(2024, 4), None);
        let laps = s.get_historical_laps(2024, 3);
        assert_eq!(laps.len(), 2, "rows without a lap time are skipped");
    }

    #[test]
    fn test_event_lookup() {
        let s = store();
        assert!(s.has_event(2024, 3));
        assert!(!s.has_event(2023, 3));
        assert_eq!(
            s.event_name(2024, 3).as_deref(),
            Some("Australian Grand Prix")
        );
        assert_eq!(s.get_actual_results(2024, 3).len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let s = JsonEventStore::load(file.path()).expect("sample should load");
        assert_eq!(s.dataset().races.len(), 1);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"{ not json").unwrap();
        assert!(JsonEventStore::load(bad.path()).is_err());
    }
}
