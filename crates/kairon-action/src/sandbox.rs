//! Sandboxed script evaluation.
//!
//! User code runs in a restricted Rhai engine on a dedicated worker thread.
//! Concurrency is bounded by a semaphore; each evaluation carries a
//! wall-clock deadline enforced from inside the engine's progress hook, and
//! the caller can abandon it at any time by dropping the future.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Scope};
use serde_json::{Map, Value};
use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

use kairon_core::config::SandboxConfig;

use crate::error::ActionError;
use crate::types::REDACTED;

/// Extra wait on top of the script deadline before the caller gives up on
/// the worker.
const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// Deadline checks happen every this many engine operations.
const PROGRESS_CHECK_INTERVAL: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Expression,
    Script,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_operations: u64,
    max_string_size: usize,
    max_collection_size: usize,
    max_call_depth: usize,
}

/// Bounded pool of script workers.
#[derive(Clone)]
pub struct Sandbox {
    permits: Arc<Semaphore>,
    limits: Limits,
    max_timeout: Duration,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            limits: Limits {
                max_operations: config.max_operations,
                max_string_size: config.max_string_size,
                max_collection_size: config.max_collection_size,
                max_call_depth: config.max_call_depth,
            },
            max_timeout: Duration::from_secs(config.max_timeout_secs),
        }
    }

    /// Cap a requested timeout at the server-wide maximum.
    pub fn clamp_timeout(&self, requested: Duration) -> Duration {
        requested.min(self.max_timeout)
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a script and return its final top-level variables.
    ///
    /// `bot_response` is always defined so scripts can assign it without
    /// declaring it. Values that cannot be represented as JSON (function
    /// pointers, closures) are dropped from the result.
    pub async fn run_script(
        &self,
        source: &str,
        locals: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Map<String, Value>, ActionError> {
        match self.evaluate(Mode::Script, source, locals, timeout).await? {
            Value::Object(map) => Ok(map),
            other => Err(ActionError::ScriptCrashed(format!(
                "script produced {} instead of a scope",
                other
            ))),
        }
    }

    /// Evaluate a single expression and return its value.
    pub async fn eval_expression(
        &self,
        source: &str,
        locals: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, ActionError> {
        self.evaluate(Mode::Expression, source, locals, timeout).await
    }

    async fn evaluate(
        &self,
        mode: Mode,
        source: &str,
        locals: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, ActionError> {
        let timeout = self.clamp_timeout(timeout);
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ActionError::ScriptCrashed("sandbox is shut down".to_string()))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancel));
        let (tx, rx) = oneshot::channel();
        let limits = self.limits;
        let source = source.to_string();
        let worker_cancel = Arc::clone(&cancel);

        std::thread::Builder::new()
            .name("kairon-sandbox".to_string())
            .spawn(move || {
                let _permit = permit;
                let deadline = Instant::now() + timeout;
                let result = execute(mode, &source, locals, limits, deadline, &worker_cancel, timeout);
                let _ = tx.send(result);
            })
            .map_err(|e| ActionError::ScriptCrashed(format!("failed to start sandbox worker: {}", e)))?;

        match tokio::time::timeout(timeout + TERMINATION_GRACE, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ActionError::ScriptCrashed(
                "sandbox worker exited without a result".to_string(),
            )),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                Err(ActionError::ScriptTimeout(timeout.as_millis() as u64))
            }
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("available_workers", &self.permits.available_permits())
            .field("max_timeout", &self.max_timeout)
            .finish()
    }
}

/// Signals the worker to stop once the caller stops waiting.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// String values of the `key_vault` local.
fn vault_secrets(locals: &Map<String, Value>) -> Arc<Vec<String>> {
    let secrets = locals
        .get("key_vault")
        .and_then(Value::as_object)
        .map(|vault| {
            vault
                .values()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Arc::new(secrets)
}

fn scrub_secrets(text: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
}

fn build_engine(
    limits: Limits,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
    secrets: Arc<Vec<String>>,
) -> Engine {
    let mut engine = Engine::new();
    engine
        .disable_symbol("eval")
        .disable_symbol("import")
        .set_module_resolver(DummyModuleResolver::new())
        .set_max_expr_depths(64, 32)
        .set_max_call_levels(limits.max_call_depth)
        .set_max_operations(limits.max_operations)
        .set_max_string_size(limits.max_string_size)
        .set_max_array_size(limits.max_collection_size)
        .set_max_map_size(limits.max_collection_size);

    engine.on_progress(move |ops| {
        if ops % PROGRESS_CHECK_INTERVAL != 0 {
            return None;
        }
        if cancel.load(Ordering::Relaxed) || Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    let print_secrets = Arc::clone(&secrets);
    engine.on_print(move |text| {
        debug!(target: "kairon::script", "{}", scrub_secrets(text, &print_secrets))
    });
    engine.on_debug(move |text, _source, pos| {
        debug!(target: "kairon::script", position = %pos, "{}", scrub_secrets(text, &secrets))
    });

    engine.register_fn("str", |value: Dynamic| value.to_string());
    engine.register_fn("json_dumps", |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
        let json: Value = from_dynamic(&value)?;
        serde_json::to_string(&json).map_err(|e| e.to_string().into())
    });
    engine.register_fn("json_loads", |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
        let json: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        to_dynamic(json)
    });
    engine.register_fn("now_utc", || Utc::now().to_rfc3339());
    engine.register_fn("timestamp", || Utc::now().timestamp());
    engine.register_fn(
        "format_timestamp",
        |ts: i64, format: &str| -> Result<String, Box<EvalAltResult>> {
            let dt: DateTime<Utc> = DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| format!("timestamp out of range: {}", ts))?;
            let mut out = String::new();
            write!(out, "{}", dt.format(format))
                .map_err(|_| format!("invalid format string: {}", format))?;
            Ok(out)
        },
    );

    engine
}

fn execute(
    mode: Mode,
    source: &str,
    locals: Map<String, Value>,
    limits: Limits,
    deadline: Instant,
    cancel: &Arc<AtomicBool>,
    timeout: Duration,
) -> Result<Value, ActionError> {
    let engine = build_engine(limits, deadline, Arc::clone(cancel), vault_secrets(&locals));

    let mut scope = Scope::new();
    let declares_response = locals.contains_key("bot_response");
    for (name, value) in locals {
        let dynamic = to_dynamic(value)
            .map_err(|e| ActionError::ScriptCrashed(format!("cannot bind '{}': {}", name, e)))?;
        scope.push_dynamic(name, dynamic);
    }

    let map_err = |err: Box<EvalAltResult>| match *err {
        EvalAltResult::ErrorTerminated(..) if cancel.load(Ordering::Relaxed) => ActionError::Cancelled,
        EvalAltResult::ErrorTerminated(..) => ActionError::ScriptTimeout(timeout.as_millis() as u64),
        EvalAltResult::ErrorTooManyOperations(..) => {
            ActionError::ScriptCrashed("operation limit exceeded".to_string())
        }
        EvalAltResult::ErrorParsing(ref parse, pos) => {
            ActionError::ScriptSyntax(format!("{} ({})", parse, pos))
        }
        other => ActionError::ScriptCrashed(other.to_string()),
    };

    match mode {
        Mode::Expression => {
            let ast = engine
                .compile_expression_with_scope(&scope, source)
                .map_err(|e| ActionError::ScriptSyntax(e.to_string()))?;
            let result = engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
                .map_err(map_err)?;
            from_dynamic::<Value>(&result)
                .map_err(|e| ActionError::ScriptCrashed(format!("unserializable result: {}", e)))
        }
        Mode::Script => {
            if !declares_response {
                scope.push_dynamic("bot_response", Dynamic::UNIT);
            }
            let ast = engine
                .compile_with_scope(&scope, source)
                .map_err(|e| ActionError::ScriptSyntax(e.to_string()))?;
            engine.run_ast_with_scope(&mut scope, &ast).map_err(map_err)?;

            let mut out = Map::new();
            for (name, _constant, value) in scope.iter() {
                if value.is::<FnPtr>() {
                    continue;
                }
                if let Ok(json) = from_dynamic::<Value>(&value) {
                    out.insert(name.to_string(), json);
                }
            }
            Ok(Value::Object(out))
        }
    }
}
