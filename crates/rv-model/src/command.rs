use async_trait::async_trait;
use rv_store::ArtifactSink;
use rv_types::{ModelError, ObjectiveResult, ParameterVector};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{score, Diagnostics, ModelAdapter, ModelContext};

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

const PARAMS_FILE: &str = "params.csv";
const RUN_FILE: &str = "run.json";
const DIAGNOSTICS_FILE: &str = "diagnostics.csv";

/// Model backed by an external executable.
///
/// Every call gets a fresh scratch directory as its working directory,
/// containing `params.csv` (the vector on one line, also passed as the
/// last argument) and `run.json` (vector, forcing references, config).
/// Forcing references are exported as `RIVULET_FORCING`, one per line.
/// The executable is expected to leave `diagnostics.csv` behind.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: PathBuf,
    args: Vec<String>,
}

fn execution(message: impl Into<String>) -> ModelError {
    ModelError::Execution {
        message: message.into(),
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl CommandModel {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Split a whitespace separated command line. `None` when blank.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).with_args(words))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl CommandModel {
    /// Prepare a scratch directory and run the program to completion.
    async fn launch(
        &self,
        ctx: &ModelContext,
        vector: &ParameterVector,
    ) -> Result<(TempDir, Output), ModelError> {
        let scratch = tempfile::Builder::new()
            .prefix("rivulet-run-")
            .tempdir()
            .map_err(|e| execution(format!("cannot create scratch directory: {e}")))?;
        let dir = scratch.path();

        let run = serde_json::json!({
            "params": vector.values(),
            "forcing": ctx.forcing,
            "config": ctx.config,
        });
        let run = serde_json::to_vec_pretty(&run).map_err(|e| execution(e.to_string()))?;
        tokio::fs::write(dir.join(RUN_FILE), run)
            .await
            .map_err(|e| execution(format!("cannot write {RUN_FILE}: {e}")))?;
        tokio::fs::write(dir.join(PARAMS_FILE), format!("{}\n", vector.to_csv_line()))
            .await
            .map_err(|e| execution(format!("cannot write {PARAMS_FILE}: {e}")))?;

        debug!(
            program = %self.program.display(),
            run = %ctx.run_label,
            params = %vector.to_csv_line(),
            "launching model"
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(PARAMS_FILE)
            .current_dir(dir)
            .env("RIVULET_FORCING", ctx.forcing.join("\n"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| execution(format!("cannot launch {}: {e}", self.program.display())))?;
        Ok((scratch, output))
    }
}

/// Leave `<label>-error.log` behind for a run that never produced logs.
async fn record_failure(ctx: &ModelContext, sink: &dyn ArtifactSink, error: ModelError) -> ModelError {
    let name = ctx.artifact_name("error.log");
    if let Err(e) = sink.write(&name, error.to_string().into_bytes()).await {
        warn!(run = %ctx.run_label, artifact = %name, error = %e, "cannot store model error log");
    }
    error
}

#[async_trait]
impl ModelAdapter for CommandModel {
    async fn evaluate(
        &self,
        ctx: &ModelContext,
        vector: &ParameterVector,
        sink: &dyn ArtifactSink,
    ) -> Result<ObjectiveResult, ModelError> {
        let (scratch, output) = match self.launch(ctx, vector).await {
            Ok(launched) => launched,
            Err(e) => return Err(record_failure(ctx, sink, e).await),
        };
        let dir = scratch.path();

        let mut artifacts = Vec::with_capacity(3);
        artifacts.push(sink.write(&ctx.artifact_name("stdout.log"), output.stdout).await?);
        let stderr_tail = tail(&output.stderr);
        artifacts.push(sink.write(&ctx.artifact_name("stderr.log"), output.stderr).await?);

        if !output.status.success() {
            warn!(run = %ctx.run_label, status = %output.status, "model run failed");
            return Err(execution(format!(
                "model exited with {}: {stderr_tail}",
                output.status
            )));
        }

        let bytes = match tokio::fs::read(dir.join(DIAGNOSTICS_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(execution(format!("model produced no {DIAGNOSTICS_FILE}")));
            }
            Err(e) => return Err(execution(format!("cannot read {DIAGNOSTICS_FILE}: {e}"))),
        };
        let diagnostics = Diagnostics::parse(&bytes);
        artifacts.push(sink.write(&ctx.artifact_name(DIAGNOSTICS_FILE), bytes).await?);

        score(ctx, &diagnostics?, artifacts)
    }

    fn name(&self) -> &str {
        "command"
    }
}
