// src/suggest.rs

//! Proposes a `response` section for tests written without one.

use serde_json::{json, Map, Value};

use crate::base_request::HttpResponse;
use crate::report::pretty_json;
use crate::validator::Payload;

/// Builds `{"response": {...}}` from what the server actually sent.
pub fn suggest(response: &HttpResponse, payload: &Payload) -> Value {
    let mut section = Map::new();
    section.insert("status".into(), json!(response.status));

    let content_type = response.content_type();
    if !content_type.is_empty() {
        section.insert("contentType".into(), json!(content_type));
    }
    if content_type.contains("json") {
        if let Payload::Structured(data) = payload {
            section.insert("hasKey".into(), json!(top_level_keys(data)));
        }
    }
    json!({ "response": section })
}

fn top_level_keys(data: &Value) -> Vec<String> {
    match data {
        Value::Array(items) => (0..items.len()).map(|i| format!("[{i}]")).collect(),
        Value::Object(map) => map.keys().map(|k| format!("['{k}']")).collect(),
        _ => Vec::new(),
    }
}

pub fn render(suggestion: &Value) -> String {
    format!(
        "  ||\n  || Suggested 'response' JSON for this test\n{}\n  ||",
        pretty_json(suggestion)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;

    #[test]
    fn suggests_resolvable_keys() {
        let mut response = HttpResponse {
            status: 200,
            body: r#"{"data":{"id":1},"odd-key":true}"#.into(),
            ..Default::default()
        };
        response
            .headers
            .insert("content-type".into(), "application/json".into());
        let payload = Payload::from_body(&response.body);
        let suggestion = suggest(&response, &payload);
        assert_eq!(
            suggestion,
            json!({"response": {
                "status": 200,
                "contentType": "application/json",
                "hasKey": ["['data']", "['odd-key']"]
            }})
        );

        let Payload::Structured(data) = &payload else {
            panic!("expected structured payload");
        };
        for key in suggestion["response"]["hasKey"].as_array().unwrap() {
            assert!(path::resolve(key.as_str().unwrap(), data).is_some());
        }
    }

    #[test]
    fn text_responses_only_get_status_and_type() {
        let mut response = HttpResponse {
            status: 204,
            ..Default::default()
        };
        response.headers.insert("content-type".into(), "text/plain".into());
        let suggestion = suggest(&response, &Payload::Absent);
        assert_eq!(
            suggestion,
            json!({"response": {"status": 204, "contentType": "text/plain"}})
        );
    }
}
