use async_trait::async_trait;
use rv_store::ArtifactSink;
use rv_types::{ModelError, ObjectiveResult, ParameterVector};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{score, Diagnostics, ModelAdapter, ModelContext};

type ModelFn = dyn Fn(&ParameterVector) -> Result<BTreeMap<String, f64>, String> + Send + Sync;

/// Closure-backed model. The closure returns the run's diagnostics; they
/// are stored as `<label>-diagnostics.csv` exactly as a real run would
/// produce them. A failing closure leaves `<label>-error.log` behind.
#[derive(Clone)]
pub struct FnModel {
    name: String,
    f: Arc<ModelFn>,
}

impl FnModel {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ParameterVector) -> Result<BTreeMap<String, f64>, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// Model reporting a single diagnostic computed from the vector.
    pub fn scalar<F>(metric: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        let metric = metric.into();
        Self::new("scalar", move |v: &ParameterVector| {
            Ok(BTreeMap::from([(metric.clone(), f(v.values()))]))
        })
    }
}

impl fmt::Debug for FnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModel").field("name", &self.name).finish()
    }
}

#[async_trait]
impl ModelAdapter for FnModel {
    async fn evaluate(
        &self,
        ctx: &ModelContext,
        vector: &ParameterVector,
        sink: &dyn ArtifactSink,
    ) -> Result<ObjectiveResult, ModelError> {
        let metrics = match (self.f)(vector) {
            Ok(metrics) => metrics,
            Err(message) => {
                sink.write(&ctx.artifact_name("error.log"), message.clone().into_bytes())
                    .await?;
                return Err(ModelError::Execution { message });
            }
        };

        let diagnostics = Diagnostics::from_metrics(&metrics);
        let artifact = sink
            .write(&ctx.artifact_name("diagnostics.csv"), diagnostics.to_csv()?)
            .await?;
        score(ctx, &diagnostics, vec![artifact])
    }

    fn name(&self) -> &str {
        &self.name
    }
}
