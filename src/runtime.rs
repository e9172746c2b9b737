//! Purpose: Interpreter contexts handed out by the pool when hosted by `poolside serve`.
//! Exports: `Runtime`, `RuntimeConfig`, `RuntimeEvent`, `load_prelude`.
//! Role: Heavyweight per-context state: prelude globals, builtins, render buffer, event wiring.
//! Invariants: Contexts are numbered 1, 2, 3, ... in construction order per factory.
//! Invariants: A reused context keeps whatever state its previous holder left behind.
//! Invariants: Prelude files are re-read for every fresh context; read failures are factory errors.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::HeaderValue;
use axum::http::header::CONTENT_TYPE;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::core::counting::ResponseSink;
use crate::core::error::{Error, ErrorKind};
use crate::versions::RUNTIME_VERSION;

const BUILTIN_GLOBAL: &str = "runtime";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuntimeEvent {
    Constructed { id: u64 },
    GlobalSet { id: u64, name: String },
}

#[derive(Clone, Debug)]
enum PreludeSource {
    Inline(Map<String, Value>),
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    prelude: PreludeSource,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl RuntimeConfig {
    pub fn new(prelude: Map<String, Value>) -> Self {
        Self {
            prelude: PreludeSource::Inline(prelude),
        }
    }

    /// Uses a JSON object file as the prelude; the file is checked once here.
    pub fn from_prelude_path(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        load_prelude(&path)?;
        Ok(Self {
            prelude: PreludeSource::File(path),
        })
    }

    /// Builds the pool factory. Every call yields a freshly initialized context.
    pub fn factory(
        self,
        events: Option<UnboundedSender<RuntimeEvent>>,
    ) -> impl Fn() -> Result<Runtime, Error> + Send + Sync + 'static {
        let next_id = AtomicU64::new(1);
        move || {
            let globals = match &self.prelude {
                PreludeSource::Inline(map) => map.clone(),
                PreludeSource::File(path) => load_prelude(path).map_err(|err| {
                    Error::new(ErrorKind::Factory)
                        .with_message("failed to construct runtime context")
                        .with_path(path.clone())
                        .with_source(err)
                })?,
            };
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Runtime::boot(id, globals, events.clone()))
        }
    }
}

pub fn load_prelude(path: &Path) -> Result<Map<String, Value>, Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read prelude")
            .with_path(path)
            .with_source(err)
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("prelude is not valid JSON")
            .with_path(path)
            .with_source(err)
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("prelude must be a JSON object")
            .with_path(path)
            .with_hint("Use an object like {\"greeting\": \"hello\"}.")),
    }
}

#[derive(Debug)]
pub struct Runtime {
    id: u64,
    globals: Map<String, Value>,
    buffer: Vec<u8>,
    evaluations: u64,
    events: Option<UnboundedSender<RuntimeEvent>>,
}

impl Runtime {
    fn boot(
        id: u64,
        mut globals: Map<String, Value>,
        events: Option<UnboundedSender<RuntimeEvent>>,
    ) -> Self {
        globals.insert(
            BUILTIN_GLOBAL.to_string(),
            json!({ "id": id, "version": RUNTIME_VERSION }),
        );
        debug!(id, globals = globals.len(), "booted runtime context");
        let runtime = Self {
            id,
            globals,
            buffer: Vec::with_capacity(4096),
            evaluations: 0,
            events,
        };
        runtime.emit(RuntimeEvent::Constructed { id });
        runtime
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        let name = name.into();
        self.emit(RuntimeEvent::GlobalSet {
            id: self.id,
            name: name.clone(),
        });
        self.globals.insert(name, value)
    }

    /// Serializes `value` as one JSON line into `sink`, reusing this context's buffer.
    pub fn render<S: ResponseSink>(
        &mut self,
        value: &Value,
        sink: &mut S,
    ) -> Result<usize, Error> {
        self.buffer.clear();
        serde_json::to_writer(&mut self.buffer, value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode response")
                .with_source(err)
        })?;
        self.buffer.push(b'\n');
        self.evaluations += 1;

        sink.headers()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let outcome = sink.write(&self.buffer);
        if let Some(err) = outcome.error {
            return Err(Error::new(ErrorKind::Io)
                .with_message(format!(
                    "short response write: {} of {} bytes",
                    outcome.accepted,
                    self.buffer.len()
                ))
                .with_source(err));
        }
        Ok(outcome.accepted)
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(events) = &self.events {
            // A closed receiver only means nobody is listening anymore.
            let _ = events.send(event);
        }
    }
}
