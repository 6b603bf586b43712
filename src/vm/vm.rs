//! Isolated JavaScript execution host.
//!
//! The embedded engine is not `Send`, so each VM owns a dedicated OS thread
//! and callers talk to it through a message-passing handle. The handle is the
//! unit pooled by [`crate::vm::VmPool`]; a handle whose deadline expired is
//! poisoned and never returns to the pool, while the engine-side loop
//! iteration backstop bounds the abandoned thread.

use crate::error::Error;
use crate::vm::effects::{AttributeMap, ElementList, Redirect, VmEffects};
use boa_engine::{Context, Source};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Upper bound on loop iterations inside one evaluation. Bundles never get
/// close; an abandoned infinite loop trips it and frees the thread.
const LOOP_ITERATION_BACKSTOP: u64 = 100_000_000;

/// Globals re-bound by `configure` before each execution.
#[derive(Debug, Clone, Default)]
pub struct VmContext {
    pub env: String,
    pub addr: String,
    pub port: u16,
    pub version: String,
    /// Current request path, exposed as `server.url`.
    pub url: String,
    /// Server-state map as JSON text, exposed as `server.state`.
    pub server_state: Option<String>,
}

enum Job {
    Configure(Box<VmContext>, oneshot::Sender<Result<(), Error>>),
    Execute {
        origin: String,
        source: String,
        reply: oneshot::Sender<Result<VmEffects, Error>>,
    },
}

/// Owning handle to one VM thread.
pub struct VmHandle {
    jobs: mpsc::Sender<Job>,
    healthy: bool,
}

impl VmHandle {
    /// Starts the VM thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the OS refuses a new thread.
    pub fn spawn() -> Result<Self, Error> {
        let (jobs, inbox) = mpsc::channel();
        std::thread::Builder::new()
            .name("neon-vm".to_string())
            .spawn(move || vm_thread(inbox))?;
        Ok(Self { jobs, healthy: true })
    }

    /// Resets the effects slate and re-binds the global object graph.
    ///
    /// # Errors
    ///
    /// Returns `Error::VmExecution` when the VM thread is gone or the global
    /// installation fails.
    pub async fn configure(&mut self, ctx: VmContext) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        if self.jobs.send(Job::Configure(Box::new(ctx), reply)).is_err() {
            self.healthy = false;
            return Err(Error::vm_execution("configure", "vm thread is gone"));
        }
        match response.await {
            Ok(result) => result,
            Err(_) => {
                self.healthy = false;
                Err(Error::vm_execution("configure", "vm thread terminated"))
            }
        }
    }

    /// Runs the bundle and returns its captured side-effects.
    ///
    /// The call suspends the caller but enforces `timeout`: on expiry it
    /// returns `Error::VmTimeout` and the handle is poisoned so the pool
    /// replaces it.
    ///
    /// # Errors
    ///
    /// `Error::VmTimeout` on deadline, `Error::VmExecution` when the bundle
    /// throws, fails to parse, or the VM thread died.
    pub async fn execute(
        &mut self,
        origin: &str,
        source: &str,
        timeout: Duration,
    ) -> Result<VmEffects, Error> {
        let (reply, response) = oneshot::channel();
        let job = Job::Execute {
            origin: origin.to_string(),
            source: source.to_string(),
            reply,
        };
        if self.jobs.send(job).is_err() {
            self.healthy = false;
            return Err(Error::vm_execution(origin, "vm thread is gone"));
        }
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.healthy = false;
                Err(Error::vm_execution(origin, "vm thread terminated"))
            }
            Err(_) => {
                self.healthy = false;
                Err(Error::VmTimeout(timeout))
            }
        }
    }

    /// False once a deadline expired or the thread died; the pool drops
    /// unhealthy handles instead of reusing them.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.healthy
    }
}

fn vm_thread(inbox: mpsc::Receiver<Job>) {
    let mut runtime = VmRuntime::new();
    while let Ok(job) = inbox.recv() {
        match job {
            Job::Configure(ctx, reply) => {
                let _ = reply.send(runtime.configure(&ctx));
            }
            Job::Execute { origin, source, reply } => {
                let _ = reply.send(runtime.execute(&origin, &source));
            }
        }
    }
}

/// The engine state living on the VM thread: one context plus the assembled
/// program cache keyed by origin and source digest.
struct VmRuntime {
    context: Context,
    programs: HashMap<String, Arc<str>>,
}

const PRELUDE_API: &str = r#"
globalThis.__neon = {
  render: null, title: null, status: null, redirect: null, redirectCalls: 0,
  headers: {}, metas: [], links: [], scripts: [], logs: []
};
globalThis.setRender = function (html) { __neon.render = String(html); };
globalThis.setStatus = function (code) { __neon.status = Number(code) | 0; };
globalThis.setRedirect = function (url, status) {
  __neon.redirectCalls += 1;
  __neon.redirect = { url: String(url), status: Number(status) | 0 };
};
globalThis.setTitle = function (title) { __neon.title = String(title); };
globalThis.setHeader = function (name, value) { __neon.headers[String(name)] = String(value); };
function __neonAttrs(attrs) {
  var source = Object(attrs || {});
  var out = {};
  for (var key in source) {
    if (Object.prototype.hasOwnProperty.call(source, key)) { out[key] = String(source[key]); }
  }
  return out;
}
globalThis.addMeta = function (id, attrs) { __neon.metas.push({ id: String(id), attrs: __neonAttrs(attrs) }); };
globalThis.addLink = function (id, attrs) { __neon.links.push({ id: String(id), attrs: __neonAttrs(attrs) }); };
globalThis.addScript = function (id, attrs) { __neon.scripts.push({ id: String(id), attrs: __neonAttrs(attrs) }); };
function __neonLog(level) {
  return function () {
    var parts = [];
    for (var i = 0; i < arguments.length; i += 1) { parts.push(String(arguments[i])); }
    __neon.logs.push({ level: level, message: parts.join(" ") });
  };
}
globalThis.console = {
  log: __neonLog("log"), info: __neonLog("info"), warn: __neonLog("warn"),
  error: __neonLog("error"), debug: __neonLog("debug")
};
"#;

const HARVEST: &str = "JSON.stringify(globalThis.__neon);";

impl VmRuntime {
    fn new() -> Self {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(LOOP_ITERATION_BACKSTOP);
        Self {
            context,
            programs: HashMap::new(),
        }
    }

    fn configure(&mut self, ctx: &VmContext) -> Result<(), Error> {
        let prelude = build_prelude(ctx);
        self.context
            .eval(Source::from_bytes(prelude.as_bytes()))
            .map(|_| ())
            .map_err(|e| Error::vm_execution("prelude", e.to_string()))
    }

    fn execute(&mut self, origin: &str, source: &str) -> Result<VmEffects, Error> {
        let program = self.program_for(origin, source);
        self.context
            .eval(Source::from_reader(
                program.as_bytes(),
                Some(Path::new(origin)),
            ))
            .map_err(|e| Error::vm_execution(origin, e.to_string()))?;

        let harvested = self
            .context
            .eval(Source::from_bytes(HARVEST.as_bytes()))
            .map_err(|e| Error::vm_execution(origin, e.to_string()))?;
        let json = harvested
            .to_string(&mut self.context)
            .map_err(|e| Error::vm_execution(origin, e.to_string()))?
            .to_std_string_escaped();

        let raw: RawEffects = serde_json::from_str(&json)
            .map_err(|e| Error::vm_execution(origin, format!("malformed effects: {e}")))?;
        Ok(raw.finish(origin))
    }

    /// Assembles the bundle into a function-scoped program so re-execution
    /// does not redeclare top-level bindings; cached by origin and digest.
    fn program_for(&mut self, origin: &str, source: &str) -> Arc<str> {
        let mut hasher = Sha256::new();
        hasher.update(origin.as_bytes());
        hasher.update([0]);
        hasher.update(source.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        if let Some(program) = self.programs.get(&digest) {
            return Arc::clone(program);
        }
        let program: Arc<str> = Arc::from(format!("(function () {{\n{source}\n}})();"));
        self.programs.insert(digest, Arc::clone(&program));
        program
    }
}

fn build_prelude(ctx: &VmContext) -> String {
    let state = ctx.server_state.as_deref().unwrap_or("{}");
    format!(
        "globalThis.process = {{ env: {{ ENV: {env} }} }};\n\
         globalThis.server = {{ addr: {addr}, port: {port}, version: {version}, url: {url}, state: JSON.parse({state}) }};\n\
         {api}",
        env = js_string(&ctx.env),
        addr = js_string(&ctx.addr),
        port = ctx.port,
        version = js_string(&ctx.version),
        url = js_string(&ctx.url),
        state = js_string(state),
        api = PRELUDE_API,
    )
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[derive(serde::Deserialize)]
struct RawEffects {
    render: Option<String>,
    title: Option<String>,
    status: Option<i64>,
    redirect: Option<RawRedirect>,
    #[serde(default, rename = "redirectCalls")]
    redirect_calls: u32,
    #[serde(default)]
    headers: IndexMap<String, String>,
    #[serde(default)]
    metas: Vec<RawElement>,
    #[serde(default)]
    links: Vec<RawElement>,
    #[serde(default)]
    scripts: Vec<RawElement>,
    #[serde(default)]
    logs: Vec<RawLog>,
}

#[derive(serde::Deserialize)]
struct RawRedirect {
    url: String,
    status: i64,
}

#[derive(serde::Deserialize)]
struct RawElement {
    id: String,
    #[serde(default)]
    attrs: AttributeMap,
}

#[derive(serde::Deserialize)]
struct RawLog {
    level: String,
    message: String,
}

impl RawEffects {
    fn finish(self, origin: &str) -> VmEffects {
        if self.redirect_calls > 1 {
            warn!(
                origin,
                calls = self.redirect_calls,
                "multiple setRedirect calls; last one wins"
            );
        }
        if crate::logging::debug_enabled() {
            for line in &self.logs {
                debug!(origin, level = %line.level, "console: {}", line.message);
            }
        }

        VmEffects {
            render: self.render,
            title: self.title,
            status: self
                .status
                .and_then(|s| u16::try_from(s).ok()),
            redirect: self.redirect.map(|r| Redirect {
                url: r.url,
                status: u16::try_from(r.status).ok().filter(|s| *s != 0).unwrap_or(302),
            }),
            headers: self.headers,
            metas: fold_elements(self.metas),
            links: fold_elements(self.links),
            scripts: fold_elements(self.scripts),
        }
    }
}

fn fold_elements(raw: Vec<RawElement>) -> ElementList {
    let mut list = ElementList::new();
    for element in raw {
        list.insert(element.id, element.attrs);
    }
    list
}
