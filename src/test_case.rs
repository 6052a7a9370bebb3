// src/test_case.rs

//! One test's lifecycle: build the request, send it, validate, record.

use chrono::Local;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{
    fs,
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::base_request::{set_header, split_method_url, HttpRequest, HttpResponse, Transport};
use crate::context::{plain_string, Context, ResponseSlot};
use crate::evaluator::Evaluator;
use crate::report::pretty_json;
use crate::script::{load_source, Sandbox, ScriptFault};
use crate::spec::{ResponseSpec, TestSpec};
use crate::suggest;
use crate::validator::{Payload, ResponseValidator};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    /// A response was received and validated.
    pub ran: bool,
    pub passed: bool,
    pub skipped: bool,
    pub network_time_ms: u64,
    pub test_time_ms: u64,
    pub bytes: u64,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skipped,
    Passed,
    Failed,
    /// Nothing came back from the server. Counted as a failure, so it
    /// halts a `stopOnFail` run and writes a failure log: later tests
    /// depend on state this exchange never produced.
    Unreachable,
}

impl TestResult {
    pub fn outcome(&self) -> Outcome {
        if self.skipped {
            Outcome::Skipped
        } else if self.passed {
            Outcome::Passed
        } else if self.transport_error.is_some() && !self.ran {
            Outcome::Unreachable
        } else {
            Outcome::Failed
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome(), Outcome::Failed | Outcome::Unreachable)
    }
}

/// The request that went out and whatever came back.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
}

#[derive(Debug)]
pub struct TestCase {
    spec: TestSpec,
    expectations: ResponseSpec,
    /// Relative `bodyFile` and `file://` hook paths resolve here.
    base_dir: PathBuf,
    result: TestResult,
    exchange: Option<Exchange>,
    executed: bool,
}

impl TestCase {
    pub fn new(spec: TestSpec, base_dir: PathBuf) -> Self {
        let expectations = spec.response.clone().unwrap_or_else(|| ResponseSpec {
            declared_empty: true,
            ..ResponseSpec::default()
        });
        let result = TestResult {
            name: spec.display_name(),
            ..TestResult::default()
        };
        TestCase {
            spec,
            expectations,
            base_dir,
            result,
            exchange: None,
            executed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.result.name
    }

    pub fn spec(&self) -> &TestSpec {
        &self.spec
    }

    pub fn stops_on_fail(&self) -> bool {
        self.spec.stops_on_fail()
    }

    pub fn result(&self) -> &TestResult {
        &self.result
    }

    pub fn exchange(&self) -> Option<&Exchange> {
        self.exchange.as_ref()
    }

    /// Runs the test once. Later calls return the first result unchanged.
    pub async fn execute<T: Transport>(
        &mut self,
        ctx: &mut Context,
        transport: &T,
        sandbox: &Sandbox,
    ) -> &TestResult {
        if self.executed {
            log::warn!(target: "apicheck", "{}: already executed", self.result.name);
            return &self.result;
        }
        self.executed = true;

        if self.spec.skipped() {
            self.result.skipped = true;
            return &self.result;
        }

        let started = Instant::now();
        ctx.stamp_time(Local::now());

        let request = match self.build_request(ctx, sandbox) {
            Ok(request) => request,
            Err(error) => {
                self.result.errors.push(error);
                self.result.test_time_ms = millis(started.elapsed());
                return &self.result;
            }
        };
        if self.spec.output {
            log::info!(target: "apicheck", "  || request\n{}", pretty_json(&request));
        }

        let sent = Instant::now();
        let response = match transport.send(&request).await {
            Ok(response) => Some(response),
            Err(err) => match err.response {
                Some(response) => Some(response),
                None => {
                    log::warn!(target: "apicheck", "{}: {}", self.result.name, err.message);
                    self.result.transport_error = Some(err.message);
                    None
                }
            },
        };

        if let Some(response) = &response {
            self.result.network_time_ms = millis(sent.elapsed());
            self.validate(ctx, sandbox, response);
        }
        ctx.clear_response();

        self.result.passed = self.result.errors.is_empty() && self.result.ran;
        self.result.test_time_ms = millis(started.elapsed());
        self.exchange = Some(Exchange { request, response });
        &self.result
    }

    fn build_request(&self, ctx: &mut Context, sandbox: &Sandbox) -> Result<HttpRequest, String> {
        let spec = &self.spec.request;
        let evaluator = Evaluator::new(sandbox, ctx);

        let line = evaluator
            .evaluate_str(&spec.url)
            .map_err(|e| format!("url: {e}"))?;
        let (method, url) = split_method_url(&line);

        let mut headers = ctx.headers.clone();
        if let Some(template) = &spec.headers {
            let evaluated = evaluator
                .evaluate(&Value::Object(template.clone()))
                .map_err(|e| format!("headers: {e}"))?;
            if let Value::Object(map) = evaluated {
                for (name, value) in &map {
                    set_header(&mut headers, name, &plain_string(value));
                }
            }
        }

        let mut query = Vec::new();
        if let Some(template) = &spec.params {
            let evaluated = evaluator
                .evaluate(&Value::Object(template.clone()))
                .map_err(|e| format!("params: {e}"))?;
            if let Value::Object(map) = evaluated {
                query.extend(map.iter().map(|(k, v)| (k.clone(), plain_string(v))));
            }
        }

        let body = match (&spec.body, &spec.body_file) {
            (Some(template), _) => Some(plain_string(
                &evaluator.evaluate(template).map_err(|e| format!("body: {e}"))?,
            )),
            (None, Some(file)) => {
                let path = self.base_dir.join(file);
                let text = fs::read_to_string(&path)
                    .map_err(|e| format!("bodyFile: failToLoad({}): {e}", path.display()))?;
                Some(text)
            }
            (None, None) => None,
        };

        let timeout = ctx.http_defaults.timeout;
        let mut request = HttpRequest {
            method,
            url,
            headers,
            query,
            body,
            timeout: (timeout > 0).then(|| Duration::from_millis(timeout)),
            max_content_length: Some(ctx.http_defaults.max_content_length),
        };

        if let Some(source) = spec.on_pre_request() {
            self.pre_request(ctx, sandbox, source, &mut request)?;
        }
        Ok(request)
    }

    /// Runs `onPreRequest` with `env` and `req` in scope; both may be
    /// rewritten by the hook.
    fn pre_request(
        &self,
        ctx: &mut Context,
        sandbox: &Sandbox,
        source: &str,
        request: &mut HttpRequest,
    ) -> Result<(), String> {
        let script = load_source(source, &self.base_dir).map_err(|e| format!("onPreRequest: {e}"))?;
        let mut bindings = ctx.bindings();
        bindings.insert(
            "req".into(),
            json!({
                "method": request.method,
                "url": request.url,
                "headers": request.headers,
                "body": request.body,
            }),
        );
        sandbox.run(&script, &mut bindings).map_err(|fault| match fault {
            ScriptFault::Failed(message) => format!("onPreRequest: fail({message})"),
            other => format!("onPreRequest: {other}"),
        })?;

        if let Some(env) = bindings.remove("env") {
            ctx.absorb_env(env);
        }
        if let Some(Value::Object(req)) = bindings.remove("req") {
            apply_request_changes(request, req);
        }
        Ok(())
    }

    fn validate(&mut self, ctx: &mut Context, sandbox: &Sandbox, response: &HttpResponse) {
        self.result.ran = true;
        self.result.bytes = response
            .header("content-length")
            .and_then(|len| len.trim().parse().ok())
            .unwrap_or(response.body.len() as u64);

        let payload = Payload::from_body(&response.body);
        ctx.set_response(ResponseSlot {
            status: response.status,
            headers: response
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<_, _>>(),
            data: payload.data(),
        });

        if self.spec.output {
            log::info!(
                target: "apicheck",
                "  || response status={}\n{}",
                response.status,
                pretty_json(&payload.data())
            );
        }
        if self.spec.suggest_mode() {
            log::info!(target: "apicheck", "{}", suggest::render(&suggest::suggest(response, &payload)));
        }

        let errors = ResponseValidator::new(&self.expectations, sandbox, &self.base_dir)
            .validate(ctx, response, &payload);
        self.result.errors.extend(errors);
    }
}

fn apply_request_changes(request: &mut HttpRequest, req: Map<String, Value>) {
    if let Some(Value::String(method)) = req.get("method") {
        request.method = method.to_ascii_uppercase();
    }
    if let Some(Value::String(url)) = req.get("url") {
        request.url = url.clone();
    }
    if let Some(Value::Object(headers)) = req.get("headers") {
        request.headers = headers
            .iter()
            .map(|(k, v)| (k.clone(), plain_string(v)))
            .collect();
    }
    request.body = match req.get("body") {
        None | Some(Value::Null) => None,
        Some(body) => Some(plain_string(body)),
    };
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
