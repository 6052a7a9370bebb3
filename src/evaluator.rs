// src/evaluator.rs

//! `${expr}` substitution over JSON templates.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

use crate::context::{plain_string, Context};
use crate::script::{Sandbox, ScriptFault};

/// Upper bound on expansion passes over one string. Each pass substitutes
/// every placeholder present, so this bounds nesting depth, not the number
/// of placeholders. Self-referential variables would otherwise expand forever.
pub const MAX_EXPANSION_DEPTH: usize = 32;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("${{{expression}}}: {source}")]
    Eval {
        expression: String,
        #[source]
        source: ScriptFault,
    },
    #[error("cyclic expression: `{template}` unresolved after {} expansion passes", MAX_EXPANSION_DEPTH)]
    TooDeep { template: String },
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}

/// Substitutes placeholders against a snapshot of the context taken at
/// construction time.
pub struct Evaluator<'a> {
    sandbox: &'a Sandbox,
    bindings: Map<String, Value>,
    prefix: Option<&'a str>,
}

impl<'a> Evaluator<'a> {
    pub fn new(sandbox: &'a Sandbox, ctx: &Context) -> Self {
        Evaluator {
            sandbox,
            bindings: ctx.bindings(),
            prefix: None,
        }
    }

    /// Qualifies bare expressions, e.g. `id` becomes `env.response.data.id`.
    pub fn with_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Returns a copy of `template` with every string leaf substituted.
    pub fn evaluate(&self, template: &Value) -> Result<Value, ExpressionError> {
        match template {
            Value::String(s) => self.evaluate_str(s).map(Value::String),
            Value::Array(items) => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.evaluate(v)?)))
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    /// Like [`evaluate`](Self::evaluate), but a string that is exactly one
    /// `${expr}` yields the expression's value with its JSON type intact.
    pub fn evaluate_typed(&self, template: &Value) -> Result<Value, ExpressionError> {
        if let Value::String(s) = template {
            if let Some(caps) = placeholder().captures(s) {
                if caps.get(0).is_some_and(|whole| whole.as_str() == s.as_str()) {
                    let value = self.eval(&caps[1])?;
                    return match &value {
                        Value::String(text) if placeholder().is_match(text) => {
                            self.evaluate_str(text).map(Value::String)
                        }
                        _ => Ok(value),
                    };
                }
            }
        }
        self.evaluate(template)
    }

    /// Substitutes until no placeholder is left, so a value that itself
    /// contains `${...}` is expanded in turn.
    pub fn evaluate_str(&self, template: &str) -> Result<String, ExpressionError> {
        let mut current = template.to_string();
        for _ in 0..MAX_EXPANSION_DEPTH {
            if !placeholder().is_match(&current) {
                return Ok(current);
            }
            current = self.expand_once(&current)?;
        }
        if placeholder().is_match(&current) {
            return Err(ExpressionError::TooDeep {
                template: template.to_string(),
            });
        }
        Ok(current)
    }

    /// Substitutes every placeholder in `text` once.
    fn expand_once(&self, text: &str) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in placeholder().captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            out.push_str(&plain_string(&self.eval(&caps[1])?));
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn eval(&self, raw: &str) -> Result<Value, ExpressionError> {
        let expression = self.qualify(raw.trim().to_string());
        self.sandbox
            .eval(&expression, &self.bindings)
            .map_err(|source| ExpressionError::Eval { expression, source })
    }

    fn qualify(&self, expression: String) -> String {
        match self.prefix {
            Some(prefix) if !expression.starts_with(prefix) => format!("{prefix}{expression}"),
            _ => expression,
        }
    }
}
