use std::collections::BTreeSet;
use tracing::debug;

use crate::config::SimConfig;
use crate::noise::NoiseSource;
use crate::pace::PaceEstimate;
use crate::strategy::StrategyPlan;
use crate::types::{Compound, LapRecord, PitRecord, ResultRecord, SimulationId};

/// Championship points for positions 1 through 10.
const POINTS_TABLE: [u32; 10] = [25, 18, 15, 12, 10, 8, 6, 4, 2, 1];

pub fn points_for_position(finish_position: u32) -> u32 {
    match finish_position {
        1..=10 => POINTS_TABLE[finish_position as usize - 1],
        _ => 0,
    }
}

/// Everything the stepper needs to know about a driver before the start.
#[derive(Debug, Clone)]
pub struct DriverSetup {
    pub driver: String,
    pub team: Option<String>,
    pub grid_position: u32,
    pub pace: PaceEstimate,
    pub plan: StrategyPlan,
}

/// Per-driver state, rewritten every lap.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverState {
    pub position: u32,
    pub stint: u32,
    pub compound: Compound,
    pub total_time: f64,
    pub pitted_laps: BTreeSet<u32>,
}

/// Records produced by one completed lap.
#[derive(Debug, Default)]
pub struct LapOutput {
    pub laps: Vec<LapRecord>,
    pub pit_stops: Vec<PitRecord>,
}

/// Lap time before the floor is applied. `prior_position` is the position
/// the driver held coming into the lap.
pub fn raw_lap_time(
    config: &SimConfig,
    base_pace: f64,
    lap: u32,
    prior_position: u32,
    noise: f64,
    pit_time: f64,
) -> f64 {
    let wear = config.wear_coefficient * (lap % config.wear_cycle_laps) as f64;
    let traffic = config.traffic_coefficient * prior_position.saturating_sub(1) as f64;
    base_pace + wear + traffic + noise + pit_time
}

/// Race in progress. Drivers are stored in grid order; `ranking` holds
/// driver indices in current running order.
pub struct RaceState {
    simulation_id: SimulationId,
    config: SimConfig,
    drivers: Vec<DriverSetup>,
    states: Vec<DriverState>,
    ranking: Vec<usize>,
    lap: u32,
    race_laps: u32,
    noise: NoiseSource,
}

impl RaceState {
    /// Build the starting state. Drivers are sorted by grid slot and given
    /// dense starting positions 1..N, so gaps left by excluded drivers close up.
    pub fn new(
        simulation_id: SimulationId,
        mut drivers: Vec<DriverSetup>,
        race_laps: u32,
        config: SimConfig,
    ) -> Self {
        drivers.sort_by_key(|d| d.grid_position);
        let states = drivers
            .iter()
            .enumerate()
            .map(|(idx, d)| DriverState {
                position: idx as u32 + 1,
                stint: 1,
                compound: d.plan.starting_compound,
                total_time: 0.0,
                pitted_laps: BTreeSet::new(),
            })
            .collect();
        let ranking = (0..drivers.len()).collect();
        let noise = NoiseSource::new(config.seed);

        Self {
            simulation_id,
            config,
            drivers,
            states,
            ranking,
            lap: 0,
            race_laps,
            noise,
        }
    }

    pub fn current_lap(&self) -> u32 {
        self.lap
    }

    pub fn race_laps(&self) -> u32 {
        self.race_laps
    }

    pub fn is_complete(&self) -> bool {
        self.lap >= self.race_laps
    }

    pub fn drivers(&self) -> &[DriverSetup] {
        &self.drivers
    }

    pub fn states(&self) -> &[DriverState] {
        &self.states
    }

    /// Advance one lap. Returns `None` once the race is complete.
    pub fn step(&mut self) -> Option<LapOutput> {
        if self.is_complete() {
            return None;
        }
        let lap = self.lap + 1;
        let cfg = &self.config;
        let mut output = LapOutput::default();

        // Lap times use the position from the previous lap; nothing is
        // re-ranked until every driver's time is known.
        let mut lap_times = Vec::with_capacity(self.drivers.len());
        for (setup, state) in self.drivers.iter().zip(self.states.iter_mut()) {
            let noise = self.noise.gaussian(cfg.lap_noise_sd);

            let mut pit_time = 0.0;
            if setup.plan.planned_pit_laps.contains(&lap) && !state.pitted_laps.contains(&lap) {
                pit_time = (cfg.pit_loss_base + self.noise.gaussian(cfg.pit_noise_sd))
                    .max(cfg.pit_loss_floor);
                let from = state.compound;
                let to = from.after_pit();
                state.pitted_laps.insert(lap);
                state.stint += 1;
                state.compound = to;

                debug!(
                    driver = %setup.driver,
                    lap,
                    pit_time_s = pit_time,
                    %from,
                    %to,
                    "pit stop"
                );
                output.pit_stops.push(PitRecord {
                    simulation_id: self.simulation_id,
                    driver: setup.driver.clone(),
                    lap,
                    pit_time_s: pit_time,
                    from_compound: from,
                    to_compound: to,
                });
            }

            let t = raw_lap_time(
                cfg,
                setup.pace.seconds(),
                lap,
                state.position,
                noise,
                pit_time,
            );
            lap_times.push(t.max(cfg.lap_time_floor));
        }

        for (state, t) in self.states.iter_mut().zip(&lap_times) {
            state.total_time += t;
        }

        // Stable: equal totals keep the order they had after the previous lap.
        let states = &self.states;
        self.ranking
            .sort_by(|&a, &b| states[a].total_time.total_cmp(&states[b].total_time));
        for (pos, &idx) in self.ranking.iter().enumerate() {
            self.states[idx].position = pos as u32 + 1;
        }

        output.laps = self
            .drivers
            .iter()
            .zip(&self.states)
            .zip(&lap_times)
            .map(|((setup, state), &lap_time_s)| LapRecord {
                simulation_id: self.simulation_id,
                lap,
                driver: setup.driver.clone(),
                position: state.position,
                lap_time_s,
                stint: state.stint,
                tyre_compound: state.compound,
                is_pit: state.pitted_laps.contains(&lap),
            })
            .collect();

        self.lap = lap;
        Some(output)
    }

    /// Run every remaining lap, collecting lap and pit records in order.
    pub fn run_to_completion(&mut self) -> LapOutput {
        let mut all = LapOutput::default();
        while let Some(out) = self.step() {
            all.laps.extend(out.laps);
            all.pit_stops.extend(out.pit_stops);
        }
        all
    }

    /// Final classification by cumulative time, winner first.
    pub fn classify(&self) -> Vec<ResultRecord> {
        self.ranking
            .iter()
            .enumerate()
            .map(|(idx, &d)| {
                let finish_position = idx as u32 + 1;
                let setup = &self.drivers[d];
                ResultRecord {
                    simulation_id: self.simulation_id,
                    driver: setup.driver.clone(),
                    team: setup.team.clone(),
                    grid_position: setup.grid_position,
                    finish_position,
                    points: points_for_position(finish_position),
                    status: "Finished".to_string(),
                    total_time_s: self.states[d].total_time,
                }
            })
            .collect()
    }
}
