//! HTTP JSON front end for the scheduler.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rv_types::{validation_error, ArtifactRef, JobId, RvError, RvResult, StoreError};
use serde_json::{json, Map, Value};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::scheduler::Scheduler;
use crate::status::{ProcessSummary, StatusReport};

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// An error answered to the caller as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<RvError> for ApiError {
    fn from(error: RvError) -> Self {
        Self {
            status: status_of(&error),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// HTTP status for an error surfaced to a caller.
pub fn status_of(error: &RvError) -> StatusCode {
    match error {
        RvError::InvalidInput(_) | RvError::Serialization(_) => StatusCode::BAD_REQUEST,
        RvError::Storage(StoreError::InvalidName { .. }) => StatusCode::BAD_REQUEST,
        RvError::NotFound { .. } | RvError::Storage(StoreError::NotFound { .. }) => {
            StatusCode::NOT_FOUND
        }
        RvError::NotReady { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn content_type_of(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("json") => "application/json",
        Some("geojson") => "application/geo+json",
        Some("csv") => "text/csv",
        Some("zip") => "application/zip",
        Some("log") | Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn parse_job_id(raw: &str) -> RvResult<JobId> {
    raw.parse()
        .map_err(|_| validation_error!("{raw:?} is not a job id"))
}

/// Request inputs; a blank body means no inputs.
fn parse_inputs(body: &[u8]) -> RvResult<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(inputs) => Ok(inputs),
        other => Err(validation_error!("request body must be a JSON object, got {other}")),
    }
}

/// Routes of the processing service.
pub fn router(scheduler: Scheduler) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/processes", get(list_processes))
        .route("/processes/{name}", get(describe_process))
        .route("/processes/{name}/execution", post(execute))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(job_status).delete(cancel_job))
        .route("/jobs/{id}/results", get(job_results))
        .route("/jobs/{id}/artifacts/{name}", get(job_artifact))
        .fallback(no_route)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(scheduler)
}

async fn health(State(scheduler): State<Scheduler>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rivulet",
        "processes": scheduler.registry().len(),
        "store": scheduler.store().name().to_string(),
    }))
}

async fn list_processes(State(scheduler): State<Scheduler>) -> Json<Vec<ProcessSummary>> {
    Json(scheduler.processes())
}

async fn describe_process(
    State(scheduler): State<Scheduler>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProcessSummary>> {
    scheduler
        .processes()
        .into_iter()
        .find(|p| p.name == name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown process {name}")))
}

async fn execute(
    State(scheduler): State<Scheduler>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let inputs = parse_inputs(&body)?;
    let job_id = scheduler.submit(&name, &inputs)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "job_id": job_id, "status": "accepted" })),
    ))
}

async fn list_jobs(State(scheduler): State<Scheduler>) -> Json<Vec<StatusReport>> {
    Json(scheduler.list())
}

async fn job_status(
    State(scheduler): State<Scheduler>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusReport>> {
    Ok(Json(scheduler.status(parse_job_id(&id)?)?))
}

async fn job_results(
    State(scheduler): State<Scheduler>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ArtifactRef>>> {
    Ok(Json(scheduler.result(parse_job_id(&id)?)?))
}

async fn job_artifact(
    State(scheduler): State<Scheduler>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let bytes = scheduler.artifact(parse_job_id(&id)?, &name).await?;
    Ok(([(header::CONTENT_TYPE, content_type_of(&name))], bytes).into_response())
}

async fn cancel_job(
    State(scheduler): State<Scheduler>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let job_id = parse_job_id(&id)?;
    let status = scheduler.cancel(job_id)?;
    Ok(Json(json!({ "job_id": job_id, "status": status })))
}

async fn no_route(uri: Uri) -> ApiError {
    ApiError::not_found(format!("no route for {}", uri.path()))
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, scheduler: Scheduler, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "rivulet service listening");
    axum::serve(listener, router(scheduler))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobContext;
    use crate::registry::{ProcessDescriptor, ProcessHandler, ProcessRegistry};
    use crate::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{HeaderMap, Method, Request};
    use rv_store::{ArtifactSink, MemoryArtifactStore};
    use rv_types::{InputSpec, JobStatus, OutputSpec, ProcessInputs, ProcessSchema};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    /// Writes its `text` input back as `echo.txt`, or under `name`.
    struct Echo;

    #[async_trait]
    impl ProcessHandler for Echo {
        async fn run(&self, ctx: &JobContext, inputs: &ProcessInputs) -> RvResult<()> {
            let text = inputs.string("text")?;
            if text == "hang" {
                loop {
                    ctx.checkpoint()?;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
            let name = if inputs.contains("name") {
                inputs.string("name")?
            } else {
                "echo.txt"
            };
            ctx.write(name, text.as_bytes().to_vec()).await?;
            Ok(())
        }
    }

    fn scheduler() -> Scheduler {
        let schema = ProcessSchema::new()
            .input(InputSpec::string("text").required())
            .input(InputSpec::string("name"))
            .output(OutputSpec::new("echo", "Echoed text", "text/plain"));
        let registry = ProcessRegistry::builder()
            .register(ProcessDescriptor::new("echo", "Echo", schema, Echo))
            .build()
            .unwrap();
        Scheduler::new(
            Arc::new(registry),
            Arc::new(MemoryArtifactStore::new()),
            SchedulerConfig::default(),
        )
    }

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    impl Reply {
        fn json(&self) -> Value {
            serde_json::from_slice(&self.body).unwrap_or(Value::Null)
        }
    }

    async fn send(app: &Router, method: Method, uri: &str, body: &str) -> Reply {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn submit(app: &Router, inputs: Value) -> JobId {
        let reply = send(app, Method::POST, "/processes/echo/execution", &inputs.to_string()).await;
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.json()["status"], "accepted");
        serde_json::from_value(reply.json()["job_id"].clone()).unwrap()
    }

    #[tokio::test]
    async fn execute_then_fetch_results() {
        let scheduler = scheduler();
        let app = router(scheduler.clone());
        let job_id = submit(&app, json!({ "text": "hello" })).await;
        scheduler.wait(job_id).await.unwrap();

        let status = send(&app, Method::GET, &format!("/jobs/{job_id}"), "").await;
        assert_eq!(status.status, StatusCode::OK);
        assert_eq!(status.json()["status"], "succeeded");

        let results = send(&app, Method::GET, &format!("/jobs/{job_id}/results"), "").await;
        assert_eq!(results.json()[0]["name"], "echo.txt");

        let artifact = send(&app, Method::GET, &format!("/jobs/{job_id}/artifacts/echo.txt"), "").await;
        assert_eq!(artifact.status, StatusCode::OK);
        assert_eq!(artifact.headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(artifact.body, b"hello");

        let listing = send(&app, Method::GET, "/jobs", "").await;
        assert_eq!(listing.json().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn artifact_names_are_percent_decoded() {
        let scheduler = scheduler();
        let app = router(scheduler.clone());
        let job_id = submit(&app, json!({ "text": "spaced", "name": "flow series.csv" })).await;
        scheduler.wait(job_id).await.unwrap();

        let uri = format!("/jobs/{job_id}/artifacts/flow%20series.csv");
        let artifact = send(&app, Method::GET, &uri, "").await;
        assert_eq!(artifact.status, StatusCode::OK);
        assert_eq!(artifact.headers[header::CONTENT_TYPE], "text/csv");
        assert_eq!(artifact.body, b"spaced");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = router(scheduler());
        let missing = uuid::Uuid::new_v4();

        let cases = [
            (Method::POST, "/processes/echo/execution".to_string(), "{}", StatusCode::BAD_REQUEST),
            (Method::POST, "/processes/echo/execution".to_string(), "[1, 2]", StatusCode::BAD_REQUEST),
            (Method::POST, "/processes/echo/execution".to_string(), "{not json", StatusCode::BAD_REQUEST),
            (Method::POST, "/processes/echo/execution".to_string(), "  \n", StatusCode::BAD_REQUEST),
            (Method::POST, "/processes/nope/execution".to_string(), "{}", StatusCode::BAD_REQUEST),
            (Method::GET, format!("/jobs/{missing}"), "", StatusCode::NOT_FOUND),
            (Method::GET, "/jobs/not-a-uuid".to_string(), "", StatusCode::BAD_REQUEST),
            (Method::DELETE, format!("/jobs/{missing}"), "", StatusCode::NOT_FOUND),
            (Method::GET, format!("/jobs/{missing}/artifacts/a.csv"), "", StatusCode::NOT_FOUND),
            (Method::GET, "/processes/nope".to_string(), "", StatusCode::NOT_FOUND),
            (Method::GET, "/metrics".to_string(), "", StatusCode::NOT_FOUND),
        ];
        for (method, path, body, expected) in cases {
            let reply = send(&app, method.clone(), &path, body).await;
            assert_eq!(reply.status, expected, "{method} {path} {body}");
            assert!(reply.json()["error"].is_string(), "{method} {path}");
        }

        let reply = send(&app, Method::PUT, "/jobs", "").await;
        assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn results_of_running_job_conflict() {
        let scheduler = scheduler();
        let app = router(scheduler.clone());
        let job_id = submit(&app, json!({ "text": "hang" })).await;

        let results = send(&app, Method::GET, &format!("/jobs/{job_id}/results"), "").await;
        assert_eq!(results.status, StatusCode::CONFLICT);
        let missing = send(&app, Method::GET, &format!("/jobs/{job_id}/artifacts/echo.txt"), "").await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let cancelled = send(&app, Method::DELETE, &format!("/jobs/{job_id}"), "").await;
        assert_eq!(cancelled.status, StatusCode::OK);
        let report = scheduler.wait(job_id).await.unwrap();
        assert_eq!(report.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn lists_processes_and_health() {
        let app = router(scheduler());
        let processes = send(&app, Method::GET, "/processes", "").await;
        assert_eq!(processes.json()[0]["name"], "echo");
        assert_eq!(processes.json()[0]["inputs"][0]["name"], "text");

        let echo = send(&app, Method::GET, "/processes/echo", "").await;
        assert_eq!(echo.status, StatusCode::OK);
        assert_eq!(echo.json()["name"], "echo");

        let health = send(&app, Method::GET, "/health", "").await;
        assert_eq!(health.json()["status"], "ok");
        assert_eq!(health.json()["store"], "memory");
    }

    async fn exchange(addr: std::net::SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_chunked_requests_over_tcp() {
        let scheduler = scheduler();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, scheduler.clone(), async move {
            let _ = stopped.await;
        }));

        let health = exchange(
            addr,
            b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(health.starts_with("HTTP/1.1 200 OK\r\n"), "{health}");
        assert!(health.contains("\"status\":\"ok\""));

        let chunked = exchange(
            addr,
            b"POST /processes/echo/execution HTTP/1.1\r\nHost: localhost\r\n\
              Content-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
              8\r\n{\"text\":\r\na\r\n\"chunked\"}\r\n0\r\n\r\n",
        )
        .await;
        assert!(chunked.starts_with("HTTP/1.1 201 Created\r\n"), "{chunked}");
        let (_, body) = chunked.split_once("\r\n\r\n").unwrap();
        let accepted: Value = serde_json::from_str(body).unwrap();
        let job_id: JobId = serde_json::from_value(accepted["job_id"].clone()).unwrap();
        scheduler.wait(job_id).await.unwrap();
        assert_eq!(scheduler.artifact(job_id, "echo.txt").await.unwrap(), b"chunked");

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
