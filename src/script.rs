// src/script.rs

//! Sandboxed evaluation of template expressions and hook scripts.
//!
//! Everything user-supplied runs through a locked-down Rhai engine: no
//! module loading, bounded operations, bounded nesting. Values cross the
//! boundary as `serde_json::Value`.
//!
//! Variables named after Rhai keywords (`loop`, `fn`, `let`, `in`, ...)
//! cannot be reached with dot access; write `env["loop"]` instead.

use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::path;

const MAX_OPERATIONS: u64 = 500_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_STRING_SIZE: usize = 1 << 20;
const MAX_COLLECTION_SIZE: usize = 100_000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptFault {
    /// Raised explicitly by the script through `fail(msg)` or `throw`.
    #[error("{0}")]
    Failed(String),
    #[error("`{0}` is undefined")]
    Undefined(String),
    #[error("{0}")]
    Script(String),
    #[error("cannot convert `{name}`: {reason}")]
    Convert { name: String, reason: String },
}

/// Hook sources starting with this are read from a file next to the test file.
pub const FILE_SCHEME: &str = "file://";

#[derive(Debug, Error)]
#[error("failToLoad({}): {source}", path.display())]
pub struct SourceLoadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Returns the script text for an inline or `file://` hook source.
pub fn load_source(source: &str, base_dir: &Path) -> Result<String, SourceLoadError> {
    match source.strip_prefix(FILE_SCHEME) {
        Some(file) => {
            let path = base_dir.join(file);
            fs::read_to_string(&path).map_err(|source| SourceLoadError { path, source })
        }
        None => Ok(source.to_string()),
    }
}

/// Rhai engine configured for untrusted test files.
pub struct Sandbox {
    engine: Engine,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine
            .set_max_operations(MAX_OPERATIONS)
            .set_max_call_levels(MAX_CALL_LEVELS)
            .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH / 2)
            .set_max_string_size(MAX_STRING_SIZE)
            .set_max_array_size(MAX_COLLECTION_SIZE)
            .set_max_map_size(MAX_COLLECTION_SIZE);
        engine.register_fn("fail", |message: &str| -> Result<(), Box<EvalAltResult>> {
            Err(message.into())
        });
        Self { engine }
    }

    /// Evaluates a single expression. Rhai yields unit both for a missing
    /// property and for JSON `null`; a unit result is `Value::Null` when the
    /// expression is a path to a bound `null`, and
    /// [`ScriptFault::Undefined`] otherwise.
    pub fn eval(&self, expression: &str, bindings: &Map<String, Value>) -> Result<Value, ScriptFault> {
        let mut scope = scope_from(bindings)?;
        let result = self
            .engine
            .eval_expression_with_scope::<Dynamic>(&mut scope, expression)
            .map_err(|err| fault(*err))?;
        if result.is_unit() {
            if bound_null(expression, bindings) {
                return Ok(Value::Null);
            }
            return Err(ScriptFault::Undefined(expression.trim().to_string()));
        }
        from_dynamic::<Value>(&result).map_err(|err| ScriptFault::Convert {
            name: expression.trim().to_string(),
            reason: err.to_string(),
        })
    }

    /// Runs a statement script. Bindings are writable: whatever the script
    /// leaves in each bound variable is copied back into `bindings`.
    pub fn run(&self, script: &str, bindings: &mut Map<String, Value>) -> Result<(), ScriptFault> {
        let mut scope = scope_from(bindings)?;
        self.engine
            .run_with_scope(&mut scope, script)
            .map_err(|err| fault(*err))?;
        for (name, slot) in bindings.iter_mut() {
            if let Some(value) = scope.get_value::<Dynamic>(name) {
                *slot = from_dynamic::<Value>(&value).map_err(|err| ScriptFault::Convert {
                    name: name.clone(),
                    reason: err.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

/// Whether `expression` is a plain path that lands on a present `null`.
fn bound_null(expression: &str, bindings: &Map<String, Value>) -> bool {
    let expression = expression.trim();
    if expression.starts_with('$') {
        return false;
    }
    let root = Value::Object(bindings.clone());
    matches!(path::resolve(expression, &root), Some(Value::Null))
}

fn scope_from(bindings: &Map<String, Value>) -> Result<Scope<'static>, ScriptFault> {
    let mut scope = Scope::new();
    for (name, value) in bindings {
        let dynamic = to_dynamic(value).map_err(|err| ScriptFault::Convert {
            name: name.clone(),
            reason: err.to_string(),
        })?;
        scope.push_dynamic(name.clone(), dynamic);
    }
    Ok(scope)
}

fn fault(err: EvalAltResult) -> ScriptFault {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => ScriptFault::Failed(value.to_string()),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => fault(*inner),
        other => ScriptFault::Script(other.to_string()),
    }
}
