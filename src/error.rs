use crate::simulation::SimulationOutcome;
use crate::storage::RecordKind;
use crate::types::SimulationId;
use thiserror::Error;

/// Failures of the storage collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("simulation {0} does not exist")]
    UnknownSimulation(SimulationId),
    #[error("{kind} for simulation {simulation_id} were already persisted")]
    AlreadyPersisted {
        simulation_id: SimulationId,
        kind: RecordKind,
    },
    #[error("batch mixes records from simulations {expected} and {found}")]
    MixedBatch {
        expected: SimulationId,
        found: SimulationId,
    },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("no event data for season {season} round {round}")]
    DataUnavailable { season: i32, round: u32 },

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error("failed to register simulation run: {0}")]
    Registration(#[source] StoreError),

    /// The run completed in memory but one record batch could not be written.
    /// The outcome is handed back so persistence can be retried on its own.
    #[error("failed to persist {kind} for simulation {}: {source}", .outcome.run.id)]
    PersistenceFailure {
        kind: RecordKind,
        #[source]
        source: StoreError,
        outcome: Box<SimulationOutcome>,
    },

    #[error("simulation {0} not found")]
    UnknownSimulation(SimulationId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not build worker pool: {0}")]
    WorkerPool(String),

    /// The ensemble was cancelled before this run started.
    #[error("run cancelled before it started")]
    Cancelled,
}

/// Non-fatal data gaps. The run continues with a fallback value or without
/// the affected driver; the notice is kept on the outcome for callers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum DataNotice {
    /// Driver has no numeric grid slot and was left out of the simulation.
    IncompleteDriverData { driver: String },
    /// Driver appeared on more than one grid row; the first row was kept.
    DuplicateDriver { driver: String },
    /// Driver has no historical laps; the fallback pace was used.
    MissingPaceData { driver: String, fallback_pace: f64 },
    /// No lap numbers were available; the fallback race length was used.
    UnknownRaceLength { fallback_laps: u32 },
}
