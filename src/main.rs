use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use race_sim::{
    EnsembleSummary, JsonEventStore, LapRecord, MemoryStore, PitRecord, ResultRecord,
    ServerConfig, SimConfig, SimError, SimulationId, SimulationRequest, SimulationRun, Simulator,
    StoreError,
};

/// Most seeds one ensemble request may ask for.
const MAX_ENSEMBLE_SEEDS: usize = 1000;

// ---------- Request/Response types ----------

/// Ensemble body: the simulate fields plus the seeds to run.
#[derive(Deserialize, Debug)]
struct EnsembleIn {
    seeds: Vec<u64>,
    #[serde(default = "default_workers")]
    workers: usize,
}

fn default_workers() -> usize {
    4
}

/// Check the seed count and limit the requested workers to the cores this
/// host has.
fn ensemble_workers(body: &EnsembleIn) -> Result<usize, ApiError> {
    if body.seeds.len() > MAX_ENSEMBLE_SEEDS {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!(
                    "at most {MAX_ENSEMBLE_SEEDS} seeds per ensemble, got {}",
                    body.seeds.len()
                )
            })),
        ));
    }
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    Ok(body.workers.clamp(1, cores))
}

/// Sets the flag when dropped. Axum drops the handler future when the
/// client goes away, which stops the ensemble between runs.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

#[derive(Serialize)]
struct SimulateOut {
    simulation_id: SimulationId,
}

#[derive(Serialize)]
struct EnsembleOut {
    simulation_ids: Vec<SimulationId>,
    failures: Vec<String>,
    summary: EnsembleSummary,
}

#[derive(Serialize)]
struct RunOut {
    run: SimulationRun,
    results: Vec<ResultRecord>,
    pit_stops: Vec<PitRecord>,
}

// ---------- Server state ----------

#[derive(Clone)]
struct AppState {
    sim: Arc<Simulator>,
    defaults: Arc<SimConfig>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(e: SimError) -> ApiError {
    let status = match &e {
        SimError::DataUnavailable { .. } | SimError::UnknownSimulation(_) => StatusCode::NOT_FOUND,
        SimError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn not_found(e: StoreError) -> SimError {
    match e {
        StoreError::UnknownSimulation(id) => SimError::UnknownSimulation(id),
        other => SimError::Store(other),
    }
}

/// Run blocking simulation work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SimError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?
        .map_err(api_error)
}

// ---------- Handlers ----------

async fn simulate(
    State(state): State<AppState>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<SimulateOut>, ApiError> {
    let request = request_with_defaults(raw, &state.defaults)?;
    let sim = state.sim.clone();
    let simulation_id = blocking(move || sim.simulate(&request)).await?;
    Ok(Json(SimulateOut { simulation_id }))
}

async fn ensemble(
    State(state): State<AppState>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<EnsembleOut>, ApiError> {
    let body: EnsembleIn = serde_json::from_value(raw.clone())
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))))?;
    let workers = ensemble_workers(&body)?;
    let request = request_with_defaults(raw, &state.defaults)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(cancel.clone());
    let sim = state.sim.clone();
    let out = blocking(move || {
        let runs = sim.run_ensemble(&request, &body.seeds, workers, &cancel)?;
        let mut simulation_ids = Vec::new();
        let mut failures = Vec::new();
        for run in runs {
            match run {
                Ok(id) => simulation_ids.push(id),
                Err(e) => failures.push(e.to_string()),
            }
        }
        let summary = sim.summarize(&simulation_ids)?;
        Ok(EnsembleOut {
            simulation_ids,
            failures,
            summary,
        })
    })
    .await?;
    Ok(Json(out))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<SimulationId>,
) -> Result<Json<RunOut>, ApiError> {
    let store = state.sim.store().clone();
    let out = blocking(move || {
        let run = store
            .simulation(id)?
            .ok_or(SimError::UnknownSimulation(id))?;
        Ok(RunOut {
            run,
            results: store.results_for(id).map_err(not_found)?,
            pit_stops: store.pitstops_for(id).map_err(not_found)?,
        })
    })
    .await?;
    Ok(Json(out))
}

async fn get_laps(
    State(state): State<AppState>,
    Path(id): Path<SimulationId>,
) -> Result<Json<Vec<LapRecord>>, ApiError> {
    let store = state.sim.store().clone();
    let laps = blocking(move || store.laps_for(id).map_err(not_found)).await?;
    Ok(Json(laps))
}

async fn compare(
    State(state): State<AppState>,
    Path(id): Path<SimulationId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sim = state.sim.clone();
    let rows = blocking(move || sim.compare(id)).await?;
    let mae = race_sim::compare::mean_abs_position_error(&rows);
    Ok(Json(json!({ "rows": rows, "mean_abs_position_error": mae })))
}

/// Missing `config` keys in a request take the server's configured values
/// rather than the built-in defaults.
fn request_with_defaults(
    mut raw: serde_json::Value,
    defaults: &SimConfig,
) -> Result<SimulationRequest, ApiError> {
    let bad_request = |e: serde_json::Error| {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
    };
    let mut merged = serde_json::to_value(defaults).map_err(bad_request)?;
    if let (Some(base), Some(given)) = (
        merged.as_object_mut(),
        raw.get("config").and_then(|c| c.as_object()),
    ) {
        for (k, v) in given {
            base.insert(k.clone(), v.clone());
        }
    }
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("config".to_string(), merged);
    }
    serde_json::from_value(raw).map_err(bad_request)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = ServerConfig::from_env();
    let source = JsonEventStore::load(&cfg.event_data)?;
    let defaults = match &cfg.sim_config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    tracing::info!(?defaults, "simulation defaults");

    let state = AppState {
        sim: Arc::new(Simulator::new(Arc::new(source), Arc::new(MemoryStore::new()))),
        defaults: Arc::new(defaults),
    };

    let app = axum::Router::new()
        .route("/simulate", post(simulate))
        .route("/ensemble", post(ensemble))
        .route("/simulations/:id", get(get_run))
        .route("/simulations/:id/laps", get(get_laps))
        .route("/simulations/:id/compare", post(compare))
        .with_state(state);

    tracing::info!("listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(seeds: usize, workers: usize) -> EnsembleIn {
        EnsembleIn {
            seeds: (0..seeds as u64).collect(),
            workers,
        }
    }

    #[test]
    fn test_workers_limited_to_host_cores() {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        assert_eq!(ensemble_workers(&body(8, 1_000_000)).unwrap(), cores);
        assert_eq!(ensemble_workers(&body(8, 0)).unwrap(), 1);
        assert_eq!(ensemble_workers(&body(8, 1)).unwrap(), 1);
    }

    #[test]
    fn test_too_many_seeds_rejected() {
        assert!(ensemble_workers(&body(MAX_ENSEMBLE_SEEDS, 2)).is_ok());
        let (status, _) = ensemble_workers(&body(MAX_ENSEMBLE_SEEDS + 1, 2)).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_dropped_guard_sets_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        {
            let _guard = CancelOnDrop(flag.clone());
            assert!(!flag.load(Ordering::Acquire));
        }
        assert!(flag.load(Ordering::Acquire));
    }
}
