//! Geospatial processes delegated to an upstream service over HTTP.

use async_trait::async_trait;
use rv_store::ArtifactSink;
use rv_types::{
    config_error, validation_error, InputSpec, OutputSpec, ProcessInputs, ProcessSchema, RvError,
    RvResult,
};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RASTER_SUBSET, TERRAIN_ANALYSIS, WATERSHED_DELINEATION, ZONAL_STATS};
use crate::context::JobContext;
use crate::registry::{ProcessDescriptor, ProcessHandler};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(600);

/// Bytes of an upstream error body quoted in the job error.
const ERROR_SNIPPET_BYTES: usize = 512;

pub(super) fn http_client() -> RvResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .user_agent(concat!("rivulet/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| config_error!("cannot build HTTP client: {e}"))
}

type InputCheck = fn(&ProcessInputs) -> RvResult<()>;

fn no_checks(_: &ProcessInputs) -> RvResult<()> {
    Ok(())
}

fn check_location(inputs: &ProcessInputs) -> RvResult<()> {
    match inputs.float_list("location")? {
        [lon, lat] if (-180.0..=180.0).contains(lon) && (-90.0..=90.0).contains(lat) => Ok(()),
        other => Err(validation_error!(
            "location must be \"longitude, latitude\", got {other:?}"
        )),
    }
}

/// A process whose work is done by the upstream service. The inputs are
/// posted as JSON to `{base_url}/processes/{name}/execution` and the
/// response body is stored as the job's single output artifact.
#[derive(Debug, Clone)]
pub struct UpstreamProcess {
    service: String,
    base_url: String,
    output: String,
    client: reqwest::Client,
    checks: InputCheck,
}

impl UpstreamProcess {
    pub fn new(
        service: impl Into<String>,
        base_url: impl Into<String>,
        output: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            service: service.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            output: output.into(),
            client,
            checks: no_checks,
        }
    }

    fn with_checks(mut self, checks: InputCheck) -> Self {
        self.checks = checks;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/processes/{}/execution", self.base_url, self.service)
    }

    fn failure(&self, message: impl Into<String>) -> RvError {
        RvError::Collaborator {
            service: self.service.clone(),
            message: message.into(),
        }
    }

    /// Descriptors of every geospatial process served by `base_url`.
    pub fn catalog(client: reqwest::Client, base_url: &str) -> Vec<ProcessDescriptor> {
        let shape = || {
            InputSpec::reference("shape")
                .title("Vector shape (GeoJSON, GML, GeoPackage or zipped Shapefile)")
                .required()
        };
        let raster = || InputSpec::reference("raster").title("Gridded raster data set");
        let touching = || {
            InputSpec::boolean("select_all_touching")
                .title("Also select boundary pixels touched by the shape")
                .with_default(json!(false))
        };

        let zonal = ProcessSchema::new()
            .input(shape())
            .input(raster())
            .input(
                InputSpec::integer("band")
                    .title("Raster band")
                    .at_least(1.0)
                    .with_default(json!(1)),
            )
            .input(
                InputSpec::boolean("categorical")
                    .title("Return distinct pixel categories")
                    .with_default(json!(false)),
            )
            .input(touching())
            .output(OutputSpec::new("statistics", "Zonal statistics", "application/json"));

        let subset = ProcessSchema::new()
            .input(shape())
            .input(raster())
            .input(
                InputSpec::integer("band")
                    .title("Raster band")
                    .at_least(1.0)
                    .with_default(json!(1)),
            )
            .input(touching())
            .output(OutputSpec::new("raster", "Raster subset as zipped GeoTIFF", "application/zip"));

        let terrain = ProcessSchema::new()
            .input(shape())
            .input(raster())
            .input(
                InputSpec::integer("projected_crs")
                    .title("EPSG code of the projection used for slope and aspect")
                    .with_default(json!(32198)),
            )
            .input(touching())
            .output(OutputSpec::new("properties", "Terrain properties", "application/json"));

        let watershed = ProcessSchema::new()
            .input(
                InputSpec::float_list("location")
                    .title("Outlet location as \"longitude, latitude\"")
                    .required(),
            )
            .input(
                InputSpec::integer("level")
                    .title("HydroBASINS level of detail")
                    .range(7.0, 12.0)
                    .with_default(json!(12)),
            )
            .input(
                InputSpec::boolean("lakes")
                    .title("Use the basins including lakes")
                    .with_default(json!(true)),
            )
            .output(OutputSpec::new("boundary", "Watershed boundary", "application/geo+json"));

        vec![
            ProcessDescriptor::new(
                ZONAL_STATS,
                "Raster zonal statistics",
                zonal,
                Self::new(ZONAL_STATS, base_url, "statistics.json", client.clone()),
            ),
            ProcessDescriptor::new(
                RASTER_SUBSET,
                "Raster subset",
                subset,
                Self::new(RASTER_SUBSET, base_url, "subset.zip", client.clone()),
            )
            .with_description("Return a masked raster based on the boundaries of a vector shape"),
            ProcessDescriptor::new(
                TERRAIN_ANALYSIS,
                "Terrain analysis",
                terrain,
                Self::new(TERRAIN_ANALYSIS, base_url, "terrain.json", client.clone()),
            ),
            ProcessDescriptor::new(
                WATERSHED_DELINEATION,
                "Watershed delineation",
                watershed,
                Self::new(WATERSHED_DELINEATION, base_url, "boundary.geojson", client)
                    .with_checks(check_location),
            ),
        ]
    }
}

#[async_trait]
impl ProcessHandler for UpstreamProcess {
    async fn run(&self, ctx: &JobContext, inputs: &ProcessInputs) -> RvResult<()> {
        ctx.checkpoint()?;
        let endpoint = self.endpoint();
        debug!(job_id = %ctx.job_id(), endpoint = %endpoint, "calling upstream service");
        ctx.progress(5, format!("Request sent to {}", self.service));

        let response = self
            .client
            .post(&endpoint)
            .json(&inputs.to_json())
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.failure(e.to_string()))?;
        ctx.checkpoint()?;

        if !status.is_success() {
            warn!(job_id = %ctx.job_id(), service = %self.service, %status, "upstream request failed");
            ctx.write("upstream-error.txt", body.to_vec()).await?;
            let snippet = String::from_utf8_lossy(&body[..body.len().min(ERROR_SNIPPET_BYTES)]).into_owned();
            return Err(self.failure(format!("HTTP {status}: {snippet}")));
        }

        ctx.progress(90, "Upstream response received");
        ctx.write(&self.output, body.to_vec()).await?;
        Ok(())
    }

    fn validate(&self, inputs: &ProcessInputs) -> RvResult<()> {
        (self.checks)(inputs)
    }
}
