//! Lap-by-lap stochastic race simulation over historical timing data.
//!
//! A run resolves the grid and historical laps for an event, derives a pit
//! plan and baseline pace per driver, then steps the race one lap at a time
//! (tyre wear, traffic, pit loss and seeded Gaussian noise) and classifies
//! the field by cumulative time. Lap telemetry, pit stops and results are
//! written to a [`SimulationStore`] in one batch per record type.

pub mod compare;
pub mod config;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod model;
pub mod noise;
pub mod pace;
pub mod simulation;
pub mod storage;
pub mod strategy;
pub mod types;

pub use config::{ServerConfig, SimConfig};
pub use data::{EventDataset, EventSource, Grid, JsonEventStore};
pub use ensemble::{DriverSummary, EnsembleSummary};
pub use error::{DataNotice, SimError, StoreError};
pub use model::{points_for_position, DriverSetup, DriverState, RaceState};
pub use pace::{PaceEstimate, PaceModel};
pub use simulation::{SimulationOutcome, SimulationRequest, Simulator};
pub use storage::{MemoryStore, RecordKind, SimulationStore};
pub use strategy::{resolve_strategies, StrategyPlan};
pub use types::*;
