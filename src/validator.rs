// src/validator.rs

//! The ordered assertion pipeline run against one response.
//!
//! Stages: status, content type, then either `containsString` (text body)
//! or `hasKey`/`dataType`/`extract` (structured body), then `extractJWT`
//! and the `onPass` hook. Status and content-type failures halt the
//! pipeline; every later stage appends its own errors independently.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::Value;
use std::path::Path;

use crate::base_request::HttpResponse;
use crate::context::{plain_string, Context};
use crate::evaluator::Evaluator;
use crate::path;
use crate::script::{load_source, Sandbox, ScriptFault};
use crate::spec::{DataTypeRule, ResponseSpec, ValueKind};

/// Prefix for bare expressions in `extract` templates.
const EXTRACT_PREFIX: &str = "env.response.data.";

/// Response body, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(Value),
    Text(String),
    Absent,
}

impl Payload {
    pub fn from_body(body: &str) -> Self {
        if body.trim().is_empty() {
            return Payload::Absent;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(Value::String(text)) => Payload::Text(text),
            Ok(value) => Payload::Structured(value),
            Err(_) => Payload::Text(body.to_string()),
        }
    }

    /// The payload as exposed to scripts and `env.response.data`.
    pub fn data(&self) -> Value {
        match self {
            Payload::Structured(value) => value.clone(),
            Payload::Text(text) => Value::String(text.clone()),
            Payload::Absent => Value::Null,
        }
    }
}

pub struct ResponseValidator<'a> {
    spec: &'a ResponseSpec,
    sandbox: &'a Sandbox,
    base_dir: &'a Path,
}

impl<'a> ResponseValidator<'a> {
    pub fn new(spec: &'a ResponseSpec, sandbox: &'a Sandbox, base_dir: &'a Path) -> Self {
        ResponseValidator {
            spec,
            sandbox,
            base_dir,
        }
    }

    /// Runs the pipeline and returns the accumulated errors. The caller owns
    /// the response slot in `ctx` and is expected to have set it.
    pub fn validate(&self, ctx: &mut Context, response: &HttpResponse, payload: &Payload) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.check_status(response.status, &mut errors) {
            return errors;
        }
        if !self.check_content_type(response.content_type(), &mut errors) {
            return errors;
        }

        match payload {
            Payload::Text(body) => self.contains_string(body, &mut errors),
            Payload::Structured(data) => {
                self.has_keys(data, &mut errors);
                self.data_types(ctx, data, &mut errors);
                self.extract(ctx, data, &mut errors);
            }
            Payload::Absent => {}
        }

        self.extract_jwt(ctx, payload, &mut errors);
        self.on_pass(ctx, payload, &mut errors);
        errors
    }

    fn check_status(&self, status: u16, errors: &mut Vec<String>) -> bool {
        match self.spec.expected_status() {
            Some(expected) if expected != status => {
                errors.push(format!("status={status}; expected={expected}"));
                false
            }
            _ => true,
        }
    }

    fn check_content_type(&self, content_type: &str, errors: &mut Vec<String>) -> bool {
        if content_type.contains(self.spec.content_type.as_str()) {
            return true;
        }
        errors.push(format!(
            "contentType={content_type}; expected={}",
            self.spec.content_type
        ));
        false
    }

    fn contains_string(&self, body: &str, errors: &mut Vec<String>) {
        let Some(wanted) = &self.spec.contains_string else {
            return;
        };
        for needle in wanted.items() {
            if !body.contains(needle.as_str()) {
                errors.push(format!("containsString: [{needle}] not found"));
            }
        }
    }

    fn has_keys(&self, data: &Value, errors: &mut Vec<String>) {
        for key in &self.spec.has_key {
            if path::resolve(key, data).is_none() {
                errors.push(format!("hasKey: [{key}] not defined"));
            }
        }
    }

    fn data_types(&self, ctx: &Context, data: &Value, errors: &mut Vec<String>) {
        if self.spec.data_type.0.is_empty() {
            return;
        }
        let evaluator = Evaluator::new(self.sandbox, ctx);
        for (key, rule) in &self.spec.data_type.0 {
            let actual = path::resolve(key, data);
            match rule {
                DataTypeRule::ImplicitEquals(expected) => match actual {
                    None => errors.push(format!("dataType: [{key}] not present")),
                    Some(actual) => check_equals(&evaluator, key, expected, actual, errors),
                },
                DataTypeRule::Structured { required, kind, eq } => {
                    let Some(actual) = actual else {
                        if *required {
                            errors.push(format!("dataType: [{key}] required=true; not present"));
                        }
                        continue;
                    };
                    if let Some(kind) = kind {
                        let was = ValueKind::of(actual);
                        if was != *kind {
                            errors.push(format!("dataType: [{key}] typeof={kind}; was {was}"));
                        }
                    }
                    if let Some(expected) = eq {
                        check_equals(&evaluator, key, expected, actual, errors);
                    }
                }
            }
        }
    }

    fn extract(&self, ctx: &mut Context, data: &Value, errors: &mut Vec<String>) {
        for (destination, source) in &self.spec.extract.0 {
            let value = if source.contains("${") {
                let evaluator = Evaluator::new(self.sandbox, ctx).with_prefix(EXTRACT_PREFIX);
                match evaluator.evaluate_str(source) {
                    Ok(text) => Value::String(text),
                    Err(err) => {
                        errors.push(format!("extract: [{destination}]: {err}"));
                        continue;
                    }
                }
            } else {
                match path::resolve(source, data) {
                    Some(Value::Number(n)) => Value::Number(n.clone()),
                    Some(other) => Value::String(plain_string(other)),
                    None => {
                        errors.push(format!("extract: [{destination}]: not found"));
                        continue;
                    }
                }
            };
            log::debug!(target: "apicheck", "extract: {destination}={value}");
            if let Err(err) = ctx.set_var(destination, value) {
                errors.push(format!("extract: [{destination}]: {err}"));
            }
        }
    }

    fn extract_jwt(&self, ctx: &mut Context, payload: &Payload, errors: &mut Vec<String>) {
        let Some(source) = self.spec.extract_jwt() else {
            return;
        };

        let token = if source.contains("${") {
            match Evaluator::new(self.sandbox, ctx).evaluate_str(source) {
                Ok(token) => Some(token),
                Err(err) => {
                    errors.push(format!("extractJWT: [{source}]: {err}"));
                    return;
                }
            }
        } else {
            match payload {
                Payload::Structured(data) => path::resolve(source, data).map(plain_string),
                _ => None,
            }
        };
        let Some(token) = token else {
            errors.push(format!("extractJWT: [{source}]: not found"));
            return;
        };

        match decode_jwt(&token) {
            Ok(claims) => {
                ctx.env.insert("jwtData".into(), claims);
            }
            Err(err) => errors.push(format!("extractJWT: error decoding JWT packet: {err}")),
        }
    }

    fn on_pass(&self, ctx: &mut Context, payload: &Payload, errors: &mut Vec<String>) {
        let Some(source) = self.spec.on_pass() else {
            return;
        };

        let script = match load_source(source, self.base_dir) {
            Ok(script) => script,
            Err(err) => {
                errors.push(format!("onPass: {err}"));
                return;
            }
        };
        let mut bindings = ctx.bindings();
        bindings.insert("data".into(), payload.data());
        match self.sandbox.run(&script, &mut bindings) {
            Ok(()) => {
                if let Some(env) = bindings.remove("env") {
                    ctx.absorb_env(env);
                }
            }
            Err(ScriptFault::Failed(message)) => errors.push(format!("onPass: fail({message})")),
            Err(err) => errors.push(format!("onPass: {err}")),
        }
    }
}

fn check_equals(
    evaluator: &Evaluator<'_>,
    key: &str,
    expected: &Value,
    actual: &Value,
    errors: &mut Vec<String>,
) {
    let expected = match evaluator.evaluate_typed(expected) {
        Ok(expected) => expected,
        Err(err) => {
            errors.push(format!("dataType: [{key}] {err}"));
            return;
        }
    };
    if !loosely_equal(&expected, actual) {
        errors.push(format!(
            "dataType: [{key}] expecting={}; was {}",
            plain_string(&expected),
            plain_string(actual)
        ));
    }
}

/// Equality tolerant of the string/number mix templates produce: `"42"`
/// equals `42`, `"true"` equals `true`. `null` only equals `null`.
pub fn loosely_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s.as_str() == if *b { "true" } else { "false" }
        }
        (a, b) => a == b,
    }
}

/// Decodes the claims segment of a JWT. The signature is not checked.
pub fn decode_jwt(token: &str) -> Result<Value, String> {
    let mut segments = token.trim().split('.');
    let (Some(_header), Some(claims), Some(_signature)) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Err("expected three dot-separated segments".to_string());
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(claims.trim_end_matches('='))
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
