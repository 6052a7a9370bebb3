// src/context.rs

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::base_request::set_header;
use crate::path;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_CONTENT_LENGTH: usize = 500_000;

/// Transport options applied to every request of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpDefaults {
    /// Request timeout in milliseconds.
    pub timeout: u64,
    pub max_content_length: usize,
}

impl Default for HttpDefaults {
    fn default() -> Self {
        HttpDefaults {
            timeout: DEFAULT_TIMEOUT_MS,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

/// Contents of the optional `--config-file`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default)]
    pub env: Map<String, Value>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub http_defaults: HttpDefaults,
    pub test_setup: Option<String>,
    pub test_tear_down: Option<String>,
    pub exec_setup: Option<String>,
    pub exec_tear_down: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The response currently under validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSlot {
    pub status: u16,
    pub headers: Map<String, Value>,
    pub data: Value,
}

/// Run-scoped state shared by every test case, in execution order.
#[derive(Debug, Clone)]
pub struct Context {
    /// User variables, reachable from templates as `env.*`.
    pub env: Map<String, Value>,
    /// Headers sent with every request unless a test overrides them.
    pub headers: BTreeMap<String, String>,
    pub http_defaults: HttpDefaults,
    /// Where failed tests dump their exchange, if anywhere.
    pub log_dir: Option<PathBuf>,
    response: Option<ResponseSlot>,
}

impl Default for Context {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Context {
            env: Map::new(),
            headers,
            http_defaults: HttpDefaults::default(),
            log_dir: None,
            response: None,
        }
    }
}

impl Context {
    /// Default context overlaid with a config file's values.
    pub fn from_config(config: &RunConfig) -> Self {
        let mut ctx = Context::default();
        ctx.env.extend(config.env.clone());
        for (name, value) in &config.headers {
            set_header(&mut ctx.headers, name, &plain_string(value));
        }
        ctx.http_defaults = config.http_defaults;
        ctx
    }

    /// Seeds the `__time`/date helper variables from `now`.
    pub fn with_clock(mut self, now: DateTime<Local>) -> Self {
        self.env.insert("__time".into(), json!(now.timestamp_millis()));
        self.env
            .insert("__yyyymmdd_".into(), json!(now.format("%Y-%m-%d").to_string()));
        self.env.insert(
            "__yyyymmddhhMMss_".into(),
            json!(now.format("%Y-%m-%d--%H:%M:%S").to_string()),
        );
        self.env
            .insert("__yyyymmdd".into(), json!(now.format("%Y%m%d").to_string()));
        self.env.insert("__now".into(), json!(now.to_rfc2822()));
        self
    }

    pub fn stamp_time(&mut self, now: DateTime<Local>) {
        self.env.insert("__time".into(), json!(now.timestamp_millis()));
    }

    pub fn response(&self) -> Option<&ResponseSlot> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, slot: ResponseSlot) {
        self.response = Some(slot);
    }

    pub fn clear_response(&mut self) {
        self.response = None;
    }

    /// The `env` view handed to expressions and hooks: the variable
    /// namespace plus `response` while one is being validated.
    pub fn env_view(&self) -> Value {
        let mut env = self.env.clone();
        if let Some(slot) = &self.response {
            env.insert(
                "response".into(),
                json!({ "status": slot.status, "headers": slot.headers, "data": slot.data }),
            );
        }
        Value::Object(env)
    }

    /// Script bindings with `env` as the only variable.
    pub fn bindings(&self) -> Map<String, Value> {
        let mut bindings = Map::new();
        bindings.insert("env".into(), self.env_view());
        bindings
    }

    /// Replaces the variable namespace with what a hook left behind. The
    /// `response` entry belongs to the slot and is dropped.
    pub fn absorb_env(&mut self, env: Value) {
        if let Value::Object(mut map) = env {
            map.remove("response");
            self.env = map;
        }
    }

    /// Stores `value` under a destination such as `env.user.id` or `token`.
    pub fn set_var(&mut self, destination: &str, value: Value) -> Result<(), String> {
        let segments = path::parse(destination)
            .ok_or_else(|| format!("invalid destination `{destination}`"))?;
        let segments = match segments.split_first() {
            Some((path::Segment::Key(root), rest)) if root == "env" => rest,
            _ => &segments[..],
        };
        if segments.is_empty() || !path::assign(&mut self.env, segments, value) {
            return Err(format!("cannot assign to `{destination}`"));
        }
        Ok(())
    }
}

/// Strings render bare; everything else as JSON text.
pub fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn config_overrides_defaults() {
        let config: RunConfig = serde_json::from_value(json!({
            "env": {"host": "http://localhost"},
            "headers": {"content-type": "text/plain", "X-Key": 7},
            "httpDefaults": {"timeout": 500}
        }))
        .unwrap();
        let ctx = Context::from_config(&config);
        assert_eq!(ctx.env["host"], json!("http://localhost"));
        assert_eq!(ctx.headers.get("content-type").unwrap(), "text/plain");
        assert!(ctx.headers.get("Content-Type").is_none());
        assert_eq!(ctx.headers.get("X-Key").unwrap(), "7");
        assert_eq!(ctx.http_defaults.timeout, 500);
        assert_eq!(ctx.http_defaults.max_content_length, DEFAULT_MAX_CONTENT_LENGTH);
    }

    #[test]
    fn response_only_visible_while_set() {
        let mut ctx = Context::default();
        assert!(ctx.env_view().get("response").is_none());
        ctx.set_response(ResponseSlot {
            status: 200,
            headers: Map::new(),
            data: json!({"id": 1}),
        });
        assert_eq!(ctx.env_view()["response"]["data"]["id"], json!(1));
        ctx.clear_response();
        assert!(ctx.response().is_none());
        assert!(ctx.env_view().get("response").is_none());
    }

    #[test]
    fn absorb_env_drops_response_entry() {
        let mut ctx = Context::default();
        ctx.absorb_env(json!({"a": 1, "response": {"data": 2}}));
        assert_eq!(Value::Object(ctx.env.clone()), json!({"a": 1}));
    }

    #[test]
    fn set_var_strips_env_prefix() {
        let mut ctx = Context::default();
        ctx.set_var("env.userId", json!(42)).unwrap();
        ctx.set_var("session.token", json!("t")).unwrap();
        assert_eq!(ctx.env["userId"], json!(42));
        assert_eq!(ctx.env["session"]["token"], json!("t"));
        assert!(ctx.set_var("env", json!(1)).is_err());
        assert!(ctx.set_var("a..b", json!(1)).is_err());
    }

    #[test]
    fn clock_helpers_are_formatted() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let ctx = Context::default().with_clock(now);
        assert_eq!(ctx.env["__yyyymmdd"], json!("20240309"));
        assert_eq!(ctx.env["__yyyymmdd_"], json!("2024-03-09"));
        assert_eq!(ctx.env["__yyyymmddhhMMss_"], json!("2024-03-09--07:05:01"));
        assert_eq!(ctx.env["__time"], json!(now.timestamp_millis()));
    }
}
