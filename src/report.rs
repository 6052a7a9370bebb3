// src/report.rs

//! Console banners, summary tables and failure logs.

use chrono::{DateTime, Local};
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::runner::RunStats;
use crate::test_case::{Exchange, TestResult};
use crate::validator::Payload;

pub fn report_error(diag: &dyn Diagnostic) -> String {
    let mut out = String::new();
    match GraphicalReportHandler::new_themed(GraphicalTheme::unicode())
        .with_width(80)
        .render_report(&mut out, diag)
    {
        Ok(()) => out,
        Err(_) => diag.to_string(),
    }
}

/// Colored when the terminal supports it, plain JSON otherwise.
pub fn pretty_json<T: Serialize>(value: &T) -> String {
    colored_json::to_colored_json_auto(value).unwrap_or_else(|_| {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".into())
    })
}

pub fn banner_start(name: &str) -> String {
    format!("--\\\\ {name}")
}

pub fn banner_result(result: &TestResult, log_file: Option<&Path>) -> String {
    let mut out = String::new();
    if result.passed {
        out.push_str("  // [PASS] ");
    } else if result.skipped {
        out.push_str("  // [SKIP] ");
    } else {
        if let Some(error) = &result.transport_error {
            out.push_str(&format!("   | {error}\n"));
        }
        for error in &result.errors {
            out.push_str(&format!("   | {error}\n"));
        }
        if let Some(file) = log_file {
            out.push_str(&format!("   | logFile={}\n", file.display()));
        }
        out.push_str("  // [FAIL] ");
    }
    out.push_str(&format!(
        "ContentLength={}; networkTime={}ms; testTime={}ms",
        result.bytes, result.network_time_ms, result.test_time_ms
    ));
    out
}

/// Bordered single-row summary.
pub fn stats_table(stats: &RunStats) -> String {
    let status = if stats.all_passed() { "PASS" } else { "FAIL" };
    let rows = [
        vec![
            "Status".to_string(),
            "Tests".into(),
            "Passed".into(),
            "Failed".into(),
            "Skipped".into(),
            "Bytes In".into(),
            "Network (ms)".into(),
            "Test (ms)".into(),
        ],
        vec![
            status.to_string(),
            stats.tests.to_string(),
            stats.passed.to_string(),
            stats.failed.to_string(),
            stats.skipped.to_string(),
            stats.bytes.to_string(),
            stats.network_time_ms.to_string(),
            stats.test_time_ms.to_string(),
        ],
    ];
    render_table(&rows)
}

fn render_table(rows: &[Vec<String>]) -> String {
    let columns = rows.first().map_or(0, Vec::len);
    let widths: Vec<usize> = (0..columns)
        .map(|c| rows.iter().map(|row| row[c].len() + 2).max().unwrap_or(2))
        .collect();

    let mut rule = String::from("+");
    for width in &widths {
        rule.push_str(&"-".repeat(*width));
        rule.push('+');
    }
    rule.push('\n');

    let mut out = rule.clone();
    for (index, row) in rows.iter().enumerate() {
        out.push('|');
        for (cell, width) in row.iter().zip(&widths) {
            out.push_str(&" ".repeat(width - cell.len() - 1));
            out.push_str(cell);
            out.push_str(" |");
        }
        out.push('\n');
        if index == 0 {
            out.push_str(&rule);
        }
    }
    out.push_str(&rule);
    out
}

/// Creates `<base>/api-log-YYYYMMDD-HHMMSS`.
pub fn create_log_dir(base: &Path, now: DateTime<Local>) -> io::Result<PathBuf> {
    let dir = base.join(format!("api-log-{}", now.format("%Y%m%d-%H%M%S")));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Test name made safe for use as a file name.
pub fn log_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 5);
    for c in name.chars() {
        match c {
            '/' => out.push_str("--"),
            ' ' | '\'' | '"' | ':' => out.push('_'),
            '{' | '}' | '\\' => out.push('('),
            other => out.push(other),
        }
    }
    out.push_str(".json");
    out
}

/// Dumps the exchange and the environment for a failed test.
pub fn write_failure_log(
    dir: &Path,
    result: &TestResult,
    exchange: Option<&Exchange>,
    env: &Map<String, Value>,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(&result.name));

    let response = exchange
        .and_then(|e| e.response.as_ref())
        .map_or(json!({"status": null, "data": null}), |r| {
            json!({"status": r.status, "data": Payload::from_body(&r.body).data()})
        });
    let request = exchange.map_or(Value::Null, |e| {
        json!({
            "url": e.request.url,
            "method": e.request.method,
            "headers": e.request.headers,
            "data": e.request.body.clone().unwrap_or_default(),
        })
    });
    let body = json!({ "response": response, "request": request, "env": env });

    let text = serde_json::to_string_pretty(&body).map_err(io::Error::from)?;
    fs::write(&path, text)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_request::{HttpRequest, HttpResponse};
    use chrono::TimeZone;

    #[test]
    fn sanitises_log_file_names() {
        assert_eq!(
            log_file_name("GET /users/{id}: 'ok' \"x\"\\"),
            "GET_--users--(id(___ok___x_(.json"
        );
    }

    #[test]
    fn banners_follow_outcome() {
        assert_eq!(banner_start("login"), "--\\\\ login");

        let passed = TestResult {
            name: "a".into(),
            passed: true,
            ran: true,
            bytes: 12,
            network_time_ms: 3,
            test_time_ms: 5,
            ..Default::default()
        };
        assert_eq!(
            banner_result(&passed, None),
            "  // [PASS] ContentLength=12; networkTime=3ms; testTime=5ms"
        );

        let failed = TestResult {
            name: "b".into(),
            errors: vec!["status=500; expected=200".into()],
            ..Default::default()
        };
        let banner = banner_result(&failed, Some(Path::new("/tmp/b.json")));
        assert!(banner.starts_with("   | status=500; expected=200\n   | logFile=/tmp/b.json\n  // [FAIL] "));
    }

    #[test]
    fn table_columns_are_aligned() {
        let stats = RunStats {
            tests: 2,
            passed: 1,
            failed: 1,
            ..Default::default()
        };
        let table = stats_table(&stats);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
        assert!(lines[3].contains("FAIL"));
        assert!(lines[1].contains("Network (ms)"));
    }

    #[test]
    fn log_dir_is_timestamped() {
        let base = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let dir = create_log_dir(base.path(), now).unwrap();
        assert!(dir.ends_with("api-log-20240102-030405"));
        assert!(dir.is_dir());
    }

    #[test]
    fn failure_log_contains_exchange_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let result = TestResult {
            name: "users/get one".into(),
            ..Default::default()
        };
        let exchange = Exchange {
            request: HttpRequest {
                method: "GET".into(),
                url: "http://x/users".into(),
                ..Default::default()
            },
            response: Some(HttpResponse {
                status: 500,
                body: r#"{"error":"boom"}"#.into(),
                ..Default::default()
            }),
        };
        let mut env = Map::new();
        env.insert("token".into(), json!("t"));

        let path = write_failure_log(dir.path(), &result, Some(&exchange), &env).unwrap();
        assert!(path.ends_with("users--get_one.json"));
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["response"], json!({"status": 500, "data": {"error": "boom"}}));
        assert_eq!(written["request"]["url"], json!("http://x/users"));
        assert_eq!(written["request"]["data"], json!(""));
        assert_eq!(written["env"]["token"], json!("t"));
    }
}
