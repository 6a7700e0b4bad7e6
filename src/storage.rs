use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::types::{ComparisonRow, LapRecord, PitRecord, ResultRecord, SimulationId, SimulationRun};

/// The record sets written for a run, one batch each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKind {
    Laps,
    PitStops,
    Results,
    Comparisons,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Laps => "lap records",
            RecordKind::PitStops => "pit stop records",
            RecordKind::Results => "result records",
            RecordKind::Comparisons => "comparison rows",
        };
        f.write_str(name)
    }
}

/// Storage collaborator for simulation output.
///
/// Each bulk insert is all-or-nothing for its batch. Implementations must
/// hand out distinct ids when `create_simulation` is called concurrently.
pub trait SimulationStore: Send + Sync {
    fn create_simulation(
        &self,
        season: i32,
        round: u32,
        event_name: &str,
        strategy_model: &str,
    ) -> Result<SimulationId, StoreError>;

    fn bulk_insert_laps(&self, records: &[LapRecord]) -> Result<(), StoreError>;

    fn bulk_insert_pitstops(&self, records: &[PitRecord]) -> Result<(), StoreError>;

    fn bulk_insert_results(&self, records: &[ResultRecord]) -> Result<(), StoreError>;

    fn bulk_insert_comparisons(&self, rows: &[ComparisonRow]) -> Result<(), StoreError>;

    fn simulation(&self, id: SimulationId) -> Result<Option<SimulationRun>, StoreError>;

    fn results_for(&self, id: SimulationId) -> Result<Vec<ResultRecord>, StoreError>;

    fn laps_for(&self, id: SimulationId) -> Result<Vec<LapRecord>, StoreError>;

    fn pitstops_for(&self, id: SimulationId) -> Result<Vec<PitRecord>, StoreError>;
}

#[derive(Default)]
struct Tables {
    runs: HashMap<SimulationId, SimulationRun>,
    laps: HashMap<SimulationId, Vec<LapRecord>>,
    pit_stops: HashMap<SimulationId, Vec<PitRecord>>,
    results: HashMap<SimulationId, Vec<ResultRecord>>,
    comparisons: HashMap<SimulationId, Vec<ComparisonRow>>,
    written: HashSet<(SimulationId, RecordKind)>,
}

impl Tables {
    /// Check a batch can be applied before touching any table.
    fn admit<T>(
        &self,
        kind: RecordKind,
        records: &[T],
        id_of: impl Fn(&T) -> SimulationId,
    ) -> Result<Option<SimulationId>, StoreError> {
        let Some(first) = records.first() else {
            return Ok(None);
        };
        let id = id_of(first);
        if let Some(other) = records.iter().map(&id_of).find(|other| *other != id) {
            return Err(StoreError::MixedBatch {
                expected: id,
                found: other,
            });
        }
        if !self.runs.contains_key(&id) {
            return Err(StoreError::UnknownSimulation(id));
        }
        if self.written.contains(&(id, kind)) {
            return Err(StoreError::AlreadyPersisted {
                simulation_id: id,
                kind,
            });
        }
        Ok(Some(id))
    }
}

/// In-process store. Used by the HTTP service and by tests.
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicU64,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simulation_count(&self) -> usize {
        self.tables.read().runs.len()
    }

    pub fn comparisons_for(&self, id: SimulationId) -> Vec<ComparisonRow> {
        self.tables
            .read()
            .comparisons
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn insert<T: Clone>(
        &self,
        kind: RecordKind,
        records: &[T],
        id_of: impl Fn(&T) -> SimulationId,
        table: impl FnOnce(&mut Tables) -> &mut HashMap<SimulationId, Vec<T>>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let Some(id) = tables.admit(kind, records, id_of)? else {
            return Ok(());
        };
        table(&mut *tables).insert(id, records.to_vec());
        tables.written.insert((id, kind));
        Ok(())
    }

    fn read<T: Clone>(
        &self,
        id: SimulationId,
        table: impl FnOnce(&Tables) -> &HashMap<SimulationId, Vec<T>>,
    ) -> Result<Vec<T>, StoreError> {
        let tables = self.tables.read();
        if !tables.runs.contains_key(&id) {
            return Err(StoreError::UnknownSimulation(id));
        }
        Ok(table(&*tables).get(&id).cloned().unwrap_or_default())
    }
}

impl SimulationStore for MemoryStore {
    fn create_simulation(
        &self,
        season: i32,
        round: u32,
        event_name: &str,
        strategy_model: &str,
    ) -> Result<SimulationId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let run = SimulationRun {
            id,
            season,
            round,
            event_name: event_name.to_string(),
            strategy_model: strategy_model.to_string(),
        };
        self.tables.write().runs.insert(id, run);
        Ok(id)
    }

    fn bulk_insert_laps(&self, records: &[LapRecord]) -> Result<(), StoreError> {
        self.insert(RecordKind::Laps, records, |r| r.simulation_id, |t| &mut t.laps)
    }

    fn bulk_insert_pitstops(&self, records: &[PitRecord]) -> Result<(), StoreError> {
        self.insert(RecordKind::PitStops, records, |r| r.simulation_id, |t| {
            &mut t.pit_stops
        })
    }

    fn bulk_insert_results(&self, records: &[ResultRecord]) -> Result<(), StoreError> {
        self.insert(RecordKind::Results, records, |r| r.simulation_id, |t| {
            &mut t.results
        })
    }

    fn bulk_insert_comparisons(&self, rows: &[ComparisonRow]) -> Result<(), StoreError> {
        self.insert(RecordKind::Comparisons, rows, |r| r.simulation_id, |t| {
            &mut t.comparisons
        })
    }

    fn simulation(&self, id: SimulationId) -> Result<Option<SimulationRun>, StoreError> {
        Ok(self.tables.read().runs.get(&id).cloned())
    }

    fn results_for(&self, id: SimulationId) -> Result<Vec<ResultRecord>, StoreError> {
        self.read(id, |t| &t.results)
    }

    fn laps_for(&self, id: SimulationId) -> Result<Vec<LapRecord>, StoreError> {
        self.read(id, |t| &t.laps)
    }

    fn pitstops_for(&self, id: SimulationId) -> Result<Vec<PitRecord>, StoreError> {
        self.read(id, |t| &t.pit_stops)
    }
}
