use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SimError;

/// Tunables for the lap stepper, strategy and pace fallbacks.
///
/// Every field has a default, so a config file only needs the values it
/// overrides. Setting either noise standard deviation to 0 removes that
/// source of randomness.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub seed: u64,
    pub lap_noise_sd: f64,
    pub pit_noise_sd: f64,
    pub pit_loss_base: f64,
    pub pit_loss_floor: f64,
    /// Seconds added per lap of tyre age within a wear cycle.
    pub wear_coefficient: f64,
    pub wear_cycle_laps: u32,
    /// Seconds added per position behind the leader.
    pub traffic_coefficient: f64,
    pub lap_time_floor: f64,
    pub fallback_pace: f64,
    pub fallback_race_laps: u32,
    pub strategy_model: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            lap_noise_sd: 0.15,
            pit_noise_sd: 0.8,
            pit_loss_base: 22.0,
            pit_loss_floor: 18.0,
            wear_coefficient: 0.08,
            wear_cycle_laps: 15,
            traffic_coefficient: 0.02,
            lap_time_floor: 75.0,
            fallback_pace: 90.0,
            fallback_race_laps: 57,
            strategy_model: "heuristic_v1".to_string(),
        }
    }
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read sim config at {}", path.display()))?;
        let cfg: SimConfig = serde_json::from_str(&data)
            .with_context(|| format!("invalid sim config JSON in {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic config: both noise sources disabled.
    pub fn deterministic() -> Self {
        Self::default().with_noise(0.0, 0.0)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_noise(mut self, lap_noise_sd: f64, pit_noise_sd: f64) -> Self {
        self.lap_noise_sd = lap_noise_sd;
        self.pit_noise_sd = pit_noise_sd;
        self
    }

    pub fn with_pit_loss(mut self, base: f64, floor: f64) -> Self {
        self.pit_loss_base = base;
        self.pit_loss_floor = floor;
        self
    }

    pub fn with_wear(mut self, coefficient: f64, cycle_laps: u32) -> Self {
        self.wear_coefficient = coefficient;
        self.wear_cycle_laps = cycle_laps;
        self
    }

    pub fn with_traffic(mut self, coefficient: f64) -> Self {
        self.traffic_coefficient = coefficient;
        self
    }

    pub fn validate(&self) -> Result<(), SimError> {
        for (name, sd) in [
            ("lap_noise_sd", self.lap_noise_sd),
            ("pit_noise_sd", self.pit_noise_sd),
        ] {
            if !sd.is_finite() || sd < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {sd}"
                )));
            }
        }
        // A positive floor keeps cumulative time strictly increasing.
        if !(self.lap_time_floor.is_finite() && self.lap_time_floor > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "lap_time_floor must be positive, got {}",
                self.lap_time_floor
            )));
        }
        if self.wear_cycle_laps == 0 {
            return Err(SimError::InvalidConfig(
                "wear_cycle_laps must be at least 1".to_string(),
            ));
        }
        let finite = [
            self.pit_loss_base,
            self.pit_loss_floor,
            self.wear_coefficient,
            self.traffic_coefficient,
            self.fallback_pace,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(SimError::InvalidConfig(
                "pit loss, wear, traffic and fallback pace must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the HTTP binary, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub event_data: PathBuf,
    pub sim_config: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let event_data = std::env::var("EVENT_DATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| resolve_event_data_path());
        let sim_config = std::env::var("SIM_CONFIG").ok().map(PathBuf::from);
        Self {
            bind_addr,
            event_data,
            sim_config,
        }
    }
}

/// Probe the usual run locations for the event data file: the working
/// directory first, then next to the executable.
fn resolve_event_data_path() -> PathBuf {
    let candidates = [
        PathBuf::from("data/events.json"),
        PathBuf::from("./events.json"),
        {
            let mut p = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
            p.pop();
            p.push("data/events.json");
            p
        },
    ];

    for c in candidates {
        if c.exists() {
            return c;
        }
    }

    // Loading will report the missing file.
    PathBuf::from("data/events.json")
}
