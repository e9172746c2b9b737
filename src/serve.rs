//! Purpose: Host pooled runtime contexts behind a small HTTP/JSON API.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based loopback server; each request checks out a context from the pool.
//! Invariants: Every response body goes through a `ByteCounter` and its tally is logged.
//! Invariants: Checkouts never span an `.await`; contexts return to the pool before responding.
//! Invariants: Context construction and rendering run on the blocking pool, never on a worker.
//! Invariants: On shutdown the pool is marked shut down but its contexts are not destroyed.
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path as AxumPath, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinError;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use poolside::api::{
    BufferedResponse, ByteCounter, ContextPool, Error, ErrorKind, MismatchStyle, ResponseSink,
    Runtime, RuntimeConfig, RuntimeEvent, builtin_checklist, report_json,
};

const VERSION_HEADER: &str = "poolside-version";
const RESERVED_GLOBAL: &str = "runtime";

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub prelude: Option<PathBuf>,
    pub prewarm: usize,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

struct AppState {
    pool: Arc<ContextPool<Runtime>>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let runtime_config = match &config.prelude {
        Some(path) => RuntimeConfig::from_prelude_path(path)?,
        None => RuntimeConfig::default(),
    };
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(log_runtime_events(events_rx));

    let pool = Arc::new(ContextPool::new(runtime_config.factory(Some(events_tx))));
    let prewarm_pool = pool.clone();
    let prewarm = config.prewarm;
    tokio::task::spawn_blocking(move || prewarm_pool.prewarm(prewarm))
        .await
        .map_err(|err| blocking_failed("prewarm", err))??;

    let state = Arc::new(AppState { pool: pool.clone() });
    let app = router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(bind = %config.bind, prewarm = config.prewarm, "serving runtime contexts");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => result.map_err(server_failed),
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(server_failed),
                Err(_) => Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out")),
            }
        }
    };
    pool.shutdown();
    result
}

fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/globals", get(list_globals))
        .route("/v0/globals/:name", get(get_global).put(put_global))
        .route("/v0/pool", get(pool_stats))
        .route("/v0/versions", get(versions))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn server_failed(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("server failed")
        .with_source(err)
}

fn blocking_failed(task: &'static str, err: JoinError) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message(format!("{task} task failed"))
        .with_source(err)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn log_runtime_events(mut events: UnboundedReceiver<RuntimeEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RuntimeEvent::Constructed { id } => debug!(context = id, "runtime context constructed"),
            RuntimeEvent::GlobalSet { id, name } => {
                debug!(context = id, global = %name, "runtime global set")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetGlobalRequest {
    value: Value,
}

async fn healthz() -> Response {
    json_response("healthz", StatusCode::OK, &json!({ "ok": true }))
}

async fn list_globals(State(state): State<Arc<AppState>>) -> Response {
    with_runtime(state, "globals", |runtime| {
        Ok(json!({
            "context": runtime.id(),
            "globals": runtime.globals(),
        }))
    })
    .await
}

async fn get_global(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    with_runtime(state, "global", move |runtime| {
        let Some(value) = runtime.global(&name) else {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("global not found: {name}")));
        };
        Ok(json!({
            "context": runtime.id(),
            "name": name,
            "value": value,
        }))
    })
    .await
}

async fn put_global(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Json(payload): Json<SetGlobalRequest>,
) -> Response {
    if name == RESERVED_GLOBAL {
        return error_response(
            "global",
            Error::new(ErrorKind::Usage)
                .with_message(format!("global `{RESERVED_GLOBAL}` is read-only"))
                .with_hint("Pick another name; builtins are installed per context."),
        );
    }
    with_runtime(state, "global", move |runtime| {
        let previous = runtime.set_global(name.clone(), payload.value);
        Ok(json!({
            "context": runtime.id(),
            "name": name,
            "previous": previous,
        }))
    })
    .await
}

async fn pool_stats(State(state): State<Arc<AppState>>) -> Response {
    let stats = state.pool.stats();
    json_response(
        "pool",
        StatusCode::OK,
        &json!({
            "pool": {
                "idle": stats.idle,
                "created": stats.created,
                "checked_out": stats.checked_out,
                "peak_checked_out": stats.peak_checked_out,
                "shut_down": stats.shut_down,
            }
        }),
    )
}

async fn versions() -> Response {
    json_response(
        "versions",
        StatusCode::OK,
        &report_json(&builtin_checklist(), MismatchStyle::CurrentAndTarget),
    )
}

/// Checks out a context, builds the payload with it, and renders through that same context.
///
/// The factory may block, so the whole checkout runs on tokio's blocking pool.
async fn with_runtime<F>(state: Arc<AppState>, route: &'static str, build: F) -> Response
where
    F: FnOnce(&mut Runtime) -> Result<Value, Error> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || render_pooled(&state.pool, route, build)).await {
        Ok(response) => response,
        Err(err) => error_response(route, blocking_failed(route, err)),
    }
}

fn render_pooled(
    pool: &ContextPool<Runtime>,
    route: &'static str,
    build: impl FnOnce(&mut Runtime) -> Result<Value, Error>,
) -> Response {
    let mut runtime = match pool.checkout() {
        Ok(runtime) => runtime,
        Err(err) => return error_response(route, err),
    };
    let payload = match build(&mut *runtime) {
        Ok(payload) => payload,
        Err(err) => return error_response(route, err),
    };

    let mut sink = counted_sink(StatusCode::OK);
    if let Err(err) = runtime.render(&payload, &mut sink) {
        return error_response(route, err);
    }
    debug!(context = runtime.id(), evaluations = runtime.evaluations(), "rendered");
    finish(route, sink)
}

fn counted_sink(status: StatusCode) -> ByteCounter<BufferedResponse> {
    let mut sink = ByteCounter::new(BufferedResponse::new());
    sink.write_status(status);
    sink.headers()
        .insert(VERSION_HEADER, HeaderValue::from_static("1"));
    sink
}

fn finish(route: &'static str, sink: ByteCounter<BufferedResponse>) -> Response {
    let bytes = sink.counter();
    let status = sink.get_ref().status();
    info!(route, status = status.as_u16(), bytes, "response written");
    sink.into_inner().into_response()
}

fn json_response(route: &'static str, status: StatusCode, payload: &Value) -> Response {
    let mut sink = counted_sink(status);
    sink.headers()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut body = serde_json::to_vec(payload).unwrap_or_else(|_| {
        b"{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_vec()
    });
    body.push(b'\n');
    write_body(route, &mut sink, &body);
    finish(route, sink)
}

/// Writes `body` through the counted sink; a short write is logged and the partial body kept.
fn write_body(
    route: &'static str,
    sink: &mut ByteCounter<BufferedResponse>,
    body: &[u8],
) -> bool {
    let outcome = sink.write(body);
    if let Some(err) = &outcome.error {
        warn!(
            route,
            accepted = outcome.accepted,
            len = body.len(),
            error = %err,
            "response body truncated"
        );
    }
    outcome.is_ok()
}

fn error_response(route: &'static str, err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Factory => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut body = serde_json::Map::new();
    body.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    body.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("error")),
    );
    if let Some(hint) = err.hint() {
        body.insert("hint".to_string(), json!(hint));
    }
    json_response(route, status, &json!({ "error": body }))
}
