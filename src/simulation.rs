use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::compare::compare_to_actual;
use crate::config::SimConfig;
use crate::data::EventSource;
use crate::ensemble::EnsembleSummary;
use crate::error::{DataNotice, SimError};
use crate::model::{DriverSetup, RaceState};
use crate::pace::PaceModel;
use crate::storage::{RecordKind, SimulationStore};
use crate::strategy::{resolve_strategies, StrategyPlan};
use crate::types::{
    ComparisonRow, Compound, LapRecord, PitRecord, ResultRecord, SimulationId, SimulationRun,
};

/// Parameters for one simulation run.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimulationRequest {
    pub season: i32,
    pub round: u32,
    /// Per-driver plans that replace the heuristic plan outright.
    #[serde(default)]
    pub overrides: HashMap<String, StrategyPlan>,
    #[serde(default)]
    pub config: SimConfig,
}

impl SimulationRequest {
    pub fn new(season: i32, round: u32) -> Self {
        Self {
            season,
            round,
            ..Default::default()
        }
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_override(mut self, driver: impl Into<String>, plan: StrategyPlan) -> Self {
        self.overrides.insert(driver.into(), plan);
        self
    }
}

/// A finished run held in memory, together with which record sets have
/// already reached the store.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub run: SimulationRun,
    pub race_laps: u32,
    pub laps: Vec<LapRecord>,
    pub pit_stops: Vec<PitRecord>,
    pub results: Vec<ResultRecord>,
    pub notices: Vec<DataNotice>,
    persisted: HashSet<RecordKind>,
}

impl SimulationOutcome {
    pub fn is_persisted(&self, kind: RecordKind) -> bool {
        self.persisted.contains(&kind)
    }

    pub fn fully_persisted(&self) -> bool {
        [RecordKind::Laps, RecordKind::PitStops, RecordKind::Results]
            .iter()
            .all(|k| self.persisted.contains(k))
    }
}

/// Runs simulations against an event source and writes them to a store.
#[derive(Clone)]
pub struct Simulator {
    source: Arc<dyn EventSource>,
    store: Arc<dyn SimulationStore>,
}

impl Simulator {
    pub fn new(source: Arc<dyn EventSource>, store: Arc<dyn SimulationStore>) -> Self {
        Self { source, store }
    }

    pub fn store(&self) -> &Arc<dyn SimulationStore> {
        &self.store
    }

    /// Run one simulation and persist its records. Returns the run id.
    pub fn simulate(&self, request: &SimulationRequest) -> Result<SimulationId, SimError> {
        let outcome = self.run(request)?;
        let outcome = self.persist(outcome)?;
        Ok(outcome.run.id)
    }

    /// Run one simulation to completion without persisting lap, pit or
    /// result records. The run itself is registered to obtain its id.
    pub fn run(&self, request: &SimulationRequest) -> Result<SimulationOutcome, SimError> {
        let (season, round) = (request.season, request.round);
        let cfg = &request.config;
        cfg.validate()?;

        if !self.source.has_event(season, round) {
            return Err(SimError::DataUnavailable { season, round });
        }

        let event_name = self
            .source
            .event_name(season, round)
            .unwrap_or_else(|| format!("Round {round}"));
        let mut notices = Vec::new();

        let grid = self.source.get_grid(season, round);
        for driver in grid.excluded {
            warn!(%driver, season, round, "no grid position, driver excluded");
            notices.push(DataNotice::IncompleteDriverData { driver });
        }
        for driver in grid.duplicates {
            warn!(%driver, season, round, "driver listed twice, later row ignored");
            notices.push(DataNotice::DuplicateDriver { driver });
        }

        let race_laps = match self.source.get_race_length(season, round) {
            Some(laps) => laps,
            None => {
                warn!(
                    season,
                    round,
                    fallback = cfg.fallback_race_laps,
                    "race length unknown, using fallback"
                );
                notices.push(DataNotice::UnknownRaceLength {
                    fallback_laps: cfg.fallback_race_laps,
                });
                cfg.fallback_race_laps
            }
        };

        let pace = PaceModel::from_laps(&self.source.get_historical_laps(season, round));
        let plans = resolve_strategies(&grid.entries, race_laps, &request.overrides);

        let mut drivers = Vec::with_capacity(grid.entries.len());
        for entry in grid.entries {
            let estimate = pace.estimate(&entry.driver, cfg.fallback_pace);
            if estimate.is_fallback() {
                warn!(driver = %entry.driver, pace = cfg.fallback_pace, "no lap data, using fallback pace");
                notices.push(DataNotice::MissingPaceData {
                    driver: entry.driver.clone(),
                    fallback_pace: cfg.fallback_pace,
                });
            }
            let plan = plans
                .get(&entry.driver)
                .cloned()
                .unwrap_or_else(|| StrategyPlan::no_stop(Compound::Medium));
            drivers.push(DriverSetup {
                driver: entry.driver,
                team: entry.team,
                grid_position: entry.grid_position,
                pace: estimate,
                plan,
            });
        }

        let id = self
            .store
            .create_simulation(season, round, &event_name, &cfg.strategy_model)
            .map_err(SimError::Registration)?;
        info!(
            simulation_id = id,
            season,
            round,
            drivers = drivers.len(),
            race_laps,
            seed = cfg.seed,
            "starting simulation of {}",
            event_name
        );

        let mut race = RaceState::new(id, drivers, race_laps, cfg.clone());
        let output = race.run_to_completion();
        let results = race.classify();

        if let Some(winner) = results.first() {
            info!(
                simulation_id = id,
                winner = %winner.driver,
                total_time_s = winner.total_time_s,
                pit_stops = output.pit_stops.len(),
                "simulation complete"
            );
        }

        Ok(SimulationOutcome {
            run: SimulationRun {
                id,
                season,
                round,
                event_name,
                strategy_model: cfg.strategy_model.clone(),
            },
            race_laps,
            laps: output.laps,
            pit_stops: output.pit_stops,
            results,
            notices,
            persisted: HashSet::new(),
        })
    }

    /// Write the outcome's record sets, skipping any already stored. On
    /// failure the outcome comes back inside the error so this can be retried.
    pub fn persist(&self, mut outcome: SimulationOutcome) -> Result<SimulationOutcome, SimError> {
        for kind in [RecordKind::Laps, RecordKind::PitStops, RecordKind::Results] {
            if outcome.persisted.contains(&kind) {
                continue;
            }
            let written = match kind {
                RecordKind::Laps if !outcome.laps.is_empty() => {
                    self.store.bulk_insert_laps(&outcome.laps)
                }
                RecordKind::PitStops if !outcome.pit_stops.is_empty() => {
                    self.store.bulk_insert_pitstops(&outcome.pit_stops)
                }
                RecordKind::Results if !outcome.results.is_empty() => {
                    self.store.bulk_insert_results(&outcome.results)
                }
                _ => Ok(()),
            };
            match written {
                Ok(()) => {
                    outcome.persisted.insert(kind);
                }
                Err(source) => {
                    error!(simulation_id = outcome.run.id, %kind, error = %source, "persistence failed");
                    return Err(SimError::PersistenceFailure {
                        kind,
                        source,
                        outcome: Box::new(outcome),
                    });
                }
            }
        }
        Ok(outcome)
    }

    /// Run one simulation per seed on a pool of `workers` threads. Runs are
    /// independent; results come back in seed order.
    ///
    /// `cancel` is checked before each run starts. Runs already underway
    /// finish and are stored; seeds not yet started yield `SimError::Cancelled`
    /// and register nothing.
    pub fn run_ensemble(
        &self,
        request: &SimulationRequest,
        seeds: &[u64],
        workers: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<Result<SimulationId, SimError>>, SimError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| SimError::WorkerPool(e.to_string()))?;

        info!(runs = seeds.len(), workers, "starting ensemble");
        let runs: Vec<Result<SimulationId, SimError>> = pool.install(|| {
            seeds
                .par_iter()
                .map(|&seed| {
                    if cancel.load(Ordering::Acquire) {
                        return Err(SimError::Cancelled);
                    }
                    let mut req = request.clone();
                    req.config.seed = seed;
                    self.simulate(&req)
                })
                .collect()
        });

        let cancelled = runs
            .iter()
            .filter(|r| matches!(r, Err(SimError::Cancelled)))
            .count();
        if cancelled > 0 {
            warn!(cancelled, runs = seeds.len(), "ensemble cancelled");
        }
        Ok(runs)
    }

    /// Aggregate stored results of the given runs.
    pub fn summarize(&self, ids: &[SimulationId]) -> Result<EnsembleSummary, SimError> {
        let runs = ids
            .iter()
            .map(|&id| self.store.results_for(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EnsembleSummary::from_results(&runs))
    }

    /// Compare a stored run against the actual race result and store the rows.
    pub fn compare(&self, simulation_id: SimulationId) -> Result<Vec<ComparisonRow>, SimError> {
        let run = self
            .store
            .simulation(simulation_id)?
            .ok_or(SimError::UnknownSimulation(simulation_id))?;
        let simulated = self.store.results_for(simulation_id)?;
        let actual = self.source.get_actual_results(run.season, run.round);

        let rows = compare_to_actual(&run, &simulated, &actual);
        self.store.bulk_insert_comparisons(&rows)?;
        info!(simulation_id, drivers = rows.len(), "stored comparison with actual result");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EventDataset, JsonEventStore, LapRow, QualifyingRow, RaceRow};
    use crate::storage::MemoryStore;

    fn dataset() -> EventDataset {
        let mut data = EventDataset::default();
        data.races.push(RaceRow {
            season: 2023,
            round: 5,
            race_name: Some("Miami Grand Prix".to_string()),
        });
        for (driver, position) in [("VER", 1), ("PER", 2), ("ALO", 3)] {
            data.qualifying.push(QualifyingRow {
                season: 2023,
                round: 5,
                driver: driver.to_string(),
                team: None,
                position: Some(position),
            });
        }
        for lap_number in 1..=10 {
            data.laps.push(LapRow {
                season: 2023,
                round: 5,
                driver: "VER".to_string(),
                lap_number: Some(lap_number),
                lap_time_s: Some(91.0),
            });
            data.laps.push(LapRow {
                season: 2023,
                round: 5,
                driver: "PER".to_string(),
                lap_number: Some(lap_number),
                lap_time_s: Some(91.5),
            });
        }
        data
    }

    fn simulator() -> (Simulator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(JsonEventStore::from_dataset(dataset()));
        (Simulator::new(source, store.clone()), store)
    }

    #[test]
    fn test_missing_pace_is_reported_and_fallback_used() {
        let (sim, _) = simulator();
        let req = SimulationRequest::new(2023, 5).with_config(SimConfig::deterministic());
        let outcome = sim.run(&req).unwrap();

        assert_eq!(outcome.race_laps, 10);
        assert_eq!(outcome.run.event_name, "Miami Grand Prix");
        assert!(outcome.notices.contains(&DataNotice::MissingPaceData {
            driver: "ALO".to_string(),
            fallback_pace: 90.0
        }));
        // ALO on the 90s fallback is quicker than both measured drivers.
        assert_eq!(outcome.results[0].driver, "ALO");
    }

    #[test]
    fn test_run_does_not_write_records() {
        let (sim, store) = simulator();
        let outcome = sim.run(&SimulationRequest::new(2023, 5)).unwrap();
        assert!(!outcome.fully_persisted());
        assert!(store.laps_for(outcome.run.id).unwrap().is_empty());

        let outcome = sim.persist(outcome).unwrap();
        assert!(outcome.fully_persisted());
        assert_eq!(store.laps_for(outcome.run.id).unwrap().len(), 30);
    }

    #[test]
    fn test_invalid_config_rejected_before_registration() {
        let (sim, store) = simulator();
        let req = SimulationRequest::new(2023, 5).with_config(SimConfig::default().with_noise(-0.1, 0.8));
        assert!(matches!(sim.run(&req), Err(SimError::InvalidConfig(_))));
        assert_eq!(store.simulation_count(), 0);
    }

    #[test]
    fn test_event_name_falls_back_to_round() {
        let mut data = dataset();
        data.races.clear();
        let sim = Simulator::new(
            Arc::new(JsonEventStore::from_dataset(data)),
            Arc::new(MemoryStore::new()),
        );
        let outcome = sim.run(&SimulationRequest::new(2023, 5)).unwrap();
        assert_eq!(outcome.run.event_name, "Round 5");
    }

    #[test]
    fn test_duplicate_grid_row_gives_one_result() {
        let mut data = dataset();
        data.qualifying.push(QualifyingRow {
            season: 2023,
            round: 5,
            driver: "VER".to_string(),
            team: None,
            position: Some(4),
        });
        let sim = Simulator::new(
            Arc::new(JsonEventStore::from_dataset(data)),
            Arc::new(MemoryStore::new()),
        );
        let req = SimulationRequest::new(2023, 5).with_config(SimConfig::deterministic());
        let outcome = sim.run(&req).unwrap();

        let ver: Vec<_> = outcome.results.iter().filter(|r| r.driver == "VER").collect();
        assert_eq!(ver.len(), 1);
        assert_eq!(ver[0].grid_position, 1, "first row wins");
        assert_eq!(outcome.results.len(), 3);
        let points: u32 = outcome.results.iter().map(|r| r.points).sum();
        assert_eq!(points, 25 + 18 + 15);
        assert!(outcome.notices.contains(&DataNotice::DuplicateDriver {
            driver: "VER".to_string()
        }));
    }

    #[test]
    fn test_cancelled_ensemble_registers_nothing() {
        let (sim, store) = simulator();
        let cancel = AtomicBool::new(true);
        let runs = sim
            .run_ensemble(&SimulationRequest::new(2023, 5), &[1, 2, 3], 2, &cancel)
            .unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| matches!(r, Err(SimError::Cancelled))));
        assert_eq!(store.simulation_count(), 0);
    }

    #[test]
    fn test_unknown_race_length_uses_fallback() {
        let mut data = dataset();
        for (i, lap) in data.laps.iter_mut().enumerate() {
            // Unnumbered rows, written either way the archive does it.
            lap.lap_number = if i % 2 == 0 { None } else { Some(0) };
        }
        let sim = Simulator::new(
            Arc::new(JsonEventStore::from_dataset(data)),
            Arc::new(MemoryStore::new()),
        );
        let outcome = sim.run(&SimulationRequest::new(2023, 5)).unwrap();
        assert_eq!(outcome.race_laps, 57);
        assert!(outcome
            .notices
            .contains(&DataNotice::UnknownRaceLength { fallback_laps: 57 }));
    }
}
