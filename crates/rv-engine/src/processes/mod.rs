//! Built-in processes and the standard registry.

mod calibration;
mod collaborator;
mod simulation;

pub use calibration::ModelCalibration;
pub use collaborator::UpstreamProcess;
pub use simulation::ModelSimulation;

use rv_model::{ModelAdapter, ModelContext, Objective, DEFAULT_OBJECTIVE_METRIC};
use rv_types::{
    is_valid_artifact_name, validation_error, InputSpec, ObjectiveDirection, ProcessInputs,
    ProcessSchema, RvResult,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::ServiceConfig;
use crate::registry::ProcessRegistry;

pub const MODEL_SIMULATION: &str = "model-simulation";
pub const MODEL_CALIBRATION: &str = "model-calibration";
pub const ZONAL_STATS: &str = "zonal-stats";
pub const RASTER_SUBSET: &str = "raster-subset";
pub const TERRAIN_ANALYSIS: &str = "terrain-analysis";
pub const WATERSHED_DELINEATION: &str = "watershed-delineation";

/// Forcing files accepted by one model process.
const MAX_FORCING_FILES: usize = 16;

/// Model settings passed through to the adapter untouched.
const MODEL_CONFIG_KEYS: &[&str] = &[
    "name",
    "start_date",
    "end_date",
    "duration",
    "area",
    "latitude",
    "longitude",
    "elevation",
];

/// Inputs shared by every process that runs the model.
fn with_model_inputs(schema: ProcessSchema) -> ProcessSchema {
    schema
        .input(
            InputSpec::reference("ts")
                .title("Input time series files")
                .required()
                .max_occurs(MAX_FORCING_FILES),
        )
        .input(
            InputSpec::string("run_name")
                .title("Simulation run name")
                .with_default(json!("run")),
        )
        .input(InputSpec::string("name").title("Watershed name"))
        .input(InputSpec::string("start_date").title("Simulation start date"))
        .input(InputSpec::string("end_date").title("Simulation end date"))
        .input(
            InputSpec::integer("duration")
                .title("Simulation duration in days")
                .at_least(1.0),
        )
        .input(InputSpec::float("area").title("Watershed area (km2)").at_least(0.0))
        .input(InputSpec::float("latitude").title("Latitude").range(-90.0, 90.0))
        .input(InputSpec::float("longitude").title("Longitude").range(-180.0, 180.0))
        .input(InputSpec::float("elevation").title("Elevation (m)"))
        .input(
            InputSpec::string("objective")
                .title("Diagnostic used as the objective")
                .with_default(json!(DEFAULT_OBJECTIVE_METRIC)),
        )
        .input(
            InputSpec::string("direction")
                .title("Objective direction")
                .one_of(&["maximize", "minimize"])
                .with_default(json!("maximize")),
        )
}

/// Checks shared by every process that runs the model.
fn validate_model_inputs(inputs: &ProcessInputs) -> RvResult<()> {
    let run_name = inputs.string("run_name")?;
    if !is_valid_artifact_name(run_name) {
        return Err(validation_error!(
            "run_name {run_name:?} cannot be used as a file name prefix"
        ));
    }
    Ok(())
}

fn objective(inputs: &ProcessInputs) -> RvResult<Objective> {
    let direction = inputs.string("direction")?;
    Ok(Objective {
        metric: inputs.string("objective")?.to_string(),
        direction: ObjectiveDirection::parse(direction)
            .ok_or_else(|| validation_error!("unknown objective direction {direction}"))?,
    })
}

fn model_context(inputs: &ProcessInputs) -> RvResult<ModelContext> {
    let forcing = inputs.strings("ts").into_iter().map(str::to_string).collect();
    let mut ctx = ModelContext::new(inputs.string("run_name")?)
        .with_forcing(forcing)
        .with_objective(objective(inputs)?);
    for key in MODEL_CONFIG_KEYS {
        if let Some(value) = inputs.get(key) {
            ctx = ctx.with_config(*key, serde_json::to_value(value)?);
        }
    }
    Ok(ctx)
}

/// Progress percentage after `done` of `total` steps, kept within 1..=99.
fn step_percent(done: usize, total: usize) -> u8 {
    let total = total.max(1);
    (1 + 98 * done.min(total) / total) as u8
}

/// Registry of the built-in processes.
///
/// Model processes are registered when a model adapter is available and
/// the geospatial processes when an upstream URL is configured.
pub fn standard_registry(
    config: &ServiceConfig,
    model: Option<Arc<dyn ModelAdapter>>,
) -> RvResult<ProcessRegistry> {
    let mut builder = ProcessRegistry::builder();

    if let Some(model) = model {
        info!(model = model.name(), "registering model processes");
        builder = builder
            .register(ModelSimulation::descriptor(model.clone()))
            .register(ModelCalibration::descriptor(model, config.default_max_evals));
    }

    if let Some(base_url) = &config.upstream_url {
        info!(upstream = %base_url, "registering geospatial processes");
        let client = collaborator::http_client()?;
        for descriptor in UpstreamProcess::catalog(client, base_url) {
            builder = builder.register(descriptor);
        }
    }

    builder.build()
}
