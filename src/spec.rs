// src/spec.rs

//! Declarative test descriptions as they appear in test files.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Status value meaning "any status is acceptable".
pub const ANY_STATUS: i64 = -1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecError {
    #[error("dataType [{key}]: a rule must be null, a string, a number, a boolean or an object")]
    InvalidRule { key: String },
    #[error("dataType [{key}]: unknown typeof `{kind}`")]
    UnknownKind { key: String, kind: String },
    #[error("extract [{key}]: source path must be a string")]
    InvalidExtract { key: String },
}

/// A single test as declared in a file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    pub name: Option<String>,
    pub request: RequestSpec,
    #[serde(default)]
    pub response: Option<ResponseSpec>,
    #[serde(default)]
    pub stop_on_fail: bool,
    #[serde(default)]
    pub skip_test: bool,
    /// Dump request and response while running.
    #[serde(default)]
    pub output: bool,
}

impl TestSpec {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "Test-XXX".to_string())
    }

    /// `stopOnFail` may sit at the top level or inside `response`.
    pub fn stops_on_fail(&self) -> bool {
        self.stop_on_fail
            || self
                .response
                .as_ref()
                .and_then(|r| r.stop_on_fail)
                .unwrap_or(false)
    }

    pub fn skipped(&self) -> bool {
        self.skip_test
            || self
                .response
                .as_ref()
                .and_then(|r| r.skip_test)
                .unwrap_or(false)
    }

    /// No response expectations at all: suggest some instead.
    pub fn suggest_mode(&self) -> bool {
        self.response.as_ref().map_or(true, ResponseSpec::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    /// `"METHOD url"` or a bare URL (GET).
    pub url: String,
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_file: Option<String>,
    #[serde(default, alias = "function onPreRequest(env, req)")]
    pub on_pre_request: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    #[serde(default = "any_status")]
    pub status: i64,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub has_key: Vec<String>,
    #[serde(default)]
    pub data_type: DataTypeRules,
    #[serde(default)]
    pub contains_string: Option<OneOrMany>,
    #[serde(default)]
    pub extract: Extractions,
    #[serde(default, rename = "extractJWT")]
    pub extract_jwt: Option<String>,
    #[serde(default, alias = "function onPass(env,data)")]
    pub on_pass: Option<String>,
    #[serde(default)]
    pub stop_on_fail: Option<bool>,
    #[serde(default)]
    pub skip_test: Option<bool>,
    /// Set when the section was written as `{}`; drives suggestion mode.
    #[serde(skip)]
    pub declared_empty: bool,
}

fn any_status() -> i64 {
    ANY_STATUS
}

fn default_content_type() -> String {
    "json".to_string()
}

impl Default for ResponseSpec {
    fn default() -> Self {
        ResponseSpec {
            status: ANY_STATUS,
            content_type: default_content_type(),
            has_key: Vec::new(),
            data_type: DataTypeRules::default(),
            contains_string: None,
            extract: Extractions::default(),
            extract_jwt: None,
            on_pass: None,
            stop_on_fail: None,
            skip_test: None,
            declared_empty: false,
        }
    }
}

impl ResponseSpec {
    pub fn expected_status(&self) -> Option<u16> {
        u16::try_from(self.status).ok()
    }

    fn is_empty(&self) -> bool {
        self.declared_empty
    }

    pub fn on_pass(&self) -> Option<&str> {
        self.on_pass.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn extract_jwt(&self) -> Option<&str> {
        self.extract_jwt.as_deref().filter(|s| !s.trim().is_empty())
    }
}

impl RequestSpec {
    pub fn on_pre_request(&self) -> Option<&str> {
        self.on_pre_request.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// A single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn items(&self) -> &[String] {
        match self {
            OneOrMany::One(s) => std::slice::from_ref(s),
            OneOrMany::Many(v) => v,
        }
    }
}

/// JSON kinds `typeof` can ask for. Arrays and `null` are distinct from
/// objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Object(_) => ValueKind::Object,
            Value::Array(_) => ValueKind::Array,
            Value::Null => ValueKind::Null,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ValueKind::String),
            "number" => Some(ValueKind::Number),
            "boolean" | "bool" => Some(ValueKind::Boolean),
            "object" => Some(ValueKind::Object),
            "array" => Some(ValueKind::Array),
            "null" => Some(ValueKind::Null),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
            ValueKind::Null => "null",
        };
        write!(f, "{label}")
    }
}

/// One `dataType` entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DataTypeRule {
    /// A bare literal: the value at the path must equal it.
    ImplicitEquals(Value),
    Structured {
        required: bool,
        kind: Option<ValueKind>,
        eq: Option<Value>,
    },
}

impl DataTypeRule {
    fn from_json(key: &str, rule: Value) -> Result<Self, SpecError> {
        match rule {
            Value::Object(mut fields) => {
                let required = fields
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let kind = match fields.get("typeof").or_else(|| fields.get("type")) {
                    None => None,
                    Some(Value::String(name)) => Some(ValueKind::parse(name).ok_or_else(|| {
                        SpecError::UnknownKind {
                            key: key.to_string(),
                            kind: name.clone(),
                        }
                    })?),
                    Some(other) => {
                        return Err(SpecError::UnknownKind {
                            key: key.to_string(),
                            kind: other.to_string(),
                        })
                    }
                };
                Ok(DataTypeRule::Structured {
                    required,
                    kind,
                    eq: fields.remove("eq"),
                })
            }
            Value::Array(_) => Err(SpecError::InvalidRule {
                key: key.to_string(),
            }),
            literal => Ok(DataTypeRule::ImplicitEquals(literal)),
        }
    }
}

/// `dataType` rules in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct DataTypeRules(pub Vec<(String, DataTypeRule)>);

impl TryFrom<Map<String, Value>> for DataTypeRules {
    type Error = SpecError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        map.into_iter()
            .map(|(key, rule)| {
                let rule = DataTypeRule::from_json(&key, rule)?;
                Ok((key, rule))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(DataTypeRules)
    }
}

/// `extract` entries, destination first, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Extractions(pub Vec<(String, String)>);

impl TryFrom<Map<String, Value>> for Extractions {
    type Error = SpecError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        map.into_iter()
            .map(|(key, source)| match source {
                Value::String(path) => Ok((key, path)),
                _ => Err(SpecError::InvalidExtract { key }),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Extractions)
    }
}

/// Parses one literal test object.
pub fn parse_test(value: Value) -> Result<TestSpec, serde_json::Error> {
    let declared_empty = match value.get("response") {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    };
    let mut spec: TestSpec = serde_json::from_value(value)?;
    match spec.response.as_mut() {
        Some(response) => response.declared_empty = declared_empty,
        None => {
            spec.response = Some(ResponseSpec {
                declared_empty: true,
                ..ResponseSpec::default()
            })
        }
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fills_response_defaults() {
        let spec = parse_test(json!({"request": {"url": "http://x"}})).unwrap();
        let response = spec.response.as_ref().unwrap();
        assert_eq!(response.status, ANY_STATUS);
        assert_eq!(response.expected_status(), None);
        assert_eq!(response.content_type, "json");
        assert!(spec.suggest_mode());
        assert!(!spec.stops_on_fail());
        assert_eq!(spec.display_name(), "Test-XXX");
    }

    #[test]
    fn reads_full_response_section() {
        let spec = parse_test(json!({
            "name": "users",
            "stopOnFail": true,
            "request": {"url": "POST http://x/users", "body": {"a": 1}},
            "response": {
                "status": 201,
                "hasKey": ["id"],
                "containsString": "ok",
                "dataType": {
                    "id": {"typeof": "number", "required": true},
                    "name": "ada",
                    "score": 3,
                    "gone": null,
                    "legacy": {"type": "array"}
                },
                "extract": {"env.userId": "id"},
                "extractJWT": "token",
                "function onPass(env,data)": "fail(\"x\")"
            }
        }))
        .unwrap();
        let response = spec.response.unwrap();
        assert!(spec.stop_on_fail);
        assert_eq!(response.expected_status(), Some(201));
        assert_eq!(
            response.contains_string.as_ref().unwrap().items(),
            ["ok".to_string()]
        );
        assert_eq!(
            response.data_type.0,
            vec![
                (
                    "id".to_string(),
                    DataTypeRule::Structured {
                        required: true,
                        kind: Some(ValueKind::Number),
                        eq: None
                    }
                ),
                ("name".to_string(), DataTypeRule::ImplicitEquals(json!("ada"))),
                ("score".to_string(), DataTypeRule::ImplicitEquals(json!(3))),
                ("gone".to_string(), DataTypeRule::ImplicitEquals(Value::Null)),
                (
                    "legacy".to_string(),
                    DataTypeRule::Structured {
                        required: false,
                        kind: Some(ValueKind::Array),
                        eq: None
                    }
                ),
            ]
        );
        assert_eq!(response.extract.0, vec![("env.userId".to_string(), "id".to_string())]);
        assert_eq!(response.on_pass(), Some("fail(\"x\")"));
        assert!(!response.declared_empty);
    }

    #[test]
    fn flags_inside_response_count() {
        let spec = parse_test(json!({
            "request": {"url": "http://x"},
            "response": {"status": 200, "stopOnFail": true, "skipTest": true}
        }))
        .unwrap();
        assert!(spec.stops_on_fail());
        assert!(spec.skipped());
        assert!(!spec.suggest_mode());
    }

    #[test]
    fn rejects_bad_rules() {
        assert!(parse_test(json!({
            "request": {"url": "x"},
            "response": {"dataType": {"a": [1]}}
        }))
        .is_err());
        assert!(parse_test(json!({
            "request": {"url": "x"},
            "response": {"dataType": {"a": {"typeof": "date"}}}
        }))
        .is_err());
        assert!(parse_test(json!({
            "request": {"url": "x"},
            "response": {"extract": {"a": 1}}
        }))
        .is_err());
        assert!(parse_test(json!({"response": {}})).is_err());
    }
}
