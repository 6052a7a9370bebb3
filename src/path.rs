// src/path.rs

//! Fail-soft addressing into JSON payloads.
//!
//! A path is dotted (`data.user.id`), bracket indexed (`items[0]`,
//! `items['odd-key']`) or a bare quoted key (`'odd-key'`). Paths starting
//! with `$` are handed to `jsonpath_lib`. Resolution never errors: anything
//! that cannot be followed yields `None`, which is distinct from a present
//! JSON `null`.

use jsonpath_lib::select;
use serde_json::{Map, Value};

/// One step of a parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Name older test files used for the payload root.
const LEGACY_ROOT: &str = "data";

/// Parses a dotted/bracketed path. Returns `None` for malformed input.
pub fn parse(path: &str) -> Option<Vec<Segment>> {
    let chars: Vec<char> = path.trim().chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    let mut expect_name = true;

    while i < chars.len() {
        match chars[i] {
            '[' => {
                let (segment, next) = parse_bracket(&chars, i + 1)?;
                segments.push(segment);
                i = next;
                expect_name = false;
            }
            '.' if !expect_name => {
                i += 1;
                expect_name = true;
            }
            q @ ('\'' | '"') if expect_name => {
                let end = find(&chars, i + 1, q)?;
                segments.push(Segment::Key(chars[i + 1..end].iter().collect()));
                i = end + 1;
                expect_name = false;
            }
            _ if expect_name => {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                if i == start {
                    return None;
                }
                segments.push(Segment::Key(chars[start..i].iter().collect()));
                expect_name = false;
            }
            _ => return None,
        }
    }

    if segments.is_empty() || expect_name {
        return None;
    }
    Some(segments)
}

fn parse_bracket(chars: &[char], start: usize) -> Option<(Segment, usize)> {
    match chars.get(start)? {
        q @ ('\'' | '"') => {
            let end = find(chars, start + 1, *q)?;
            if chars.get(end + 1) != Some(&']') {
                return None;
            }
            Some((Segment::Key(chars[start + 1..end].iter().collect()), end + 2))
        }
        _ => {
            let end = find(chars, start, ']')?;
            let inner: String = chars[start..end].iter().collect();
            let inner = inner.trim();
            if inner.is_empty() {
                return None;
            }
            let segment = match inner.parse::<usize>() {
                Ok(idx) => Segment::Index(idx),
                Err(_) => Segment::Key(inner.to_string()),
            };
            Some((segment, end + 1))
        }
    }
}

fn find(chars: &[char], from: usize, needle: char) -> Option<usize> {
    (from..chars.len()).find(|&i| chars[i] == needle)
}

/// Resolves `path` against `root`.
pub fn resolve<'a>(path: &str, root: &'a Value) -> Option<&'a Value> {
    let path = path.trim();
    if path.starts_with('$') {
        return select(root, path).ok()?.into_iter().next();
    }
    let segments = parse(path)?;
    if let Some(found) = walk(&segments, root) {
        return Some(found);
    }
    if segments[0] == Segment::Key(LEGACY_ROOT.to_string()) && !has_key(root, LEGACY_ROOT) {
        return walk(&segments[1..], root);
    }
    None
}

fn has_key(value: &Value, key: &str) -> bool {
    value.as_object().is_some_and(|map| map.contains_key(key))
}

fn walk<'a>(segments: &[Segment], root: &'a Value) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match (current, segment) {
        (Value::Object(map), Segment::Key(key)) => map.get(key),
        (Value::Object(map), Segment::Index(idx)) => map.get(&idx.to_string()),
        (Value::Array(items), Segment::Index(idx)) => items.get(*idx),
        (Value::Array(items), Segment::Key(key)) => {
            key.parse::<usize>().ok().and_then(|idx| items.get(idx))
        }
        _ => None,
    })
}

/// Writes `value` at `segments` below `root`, creating intermediate
/// objects. Fails when an existing non-object sits on the way.
pub fn assign(root: &mut Map<String, Value>, segments: &[Segment], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut current = root;
    for segment in parents {
        let key = segment_key(segment);
        let slot = current
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        match slot {
            Value::Object(map) => current = map,
            _ => return false,
        }
    }
    current.insert(segment_key(last), value);
    true
}

fn segment_key(segment: &Segment) -> String {
    match segment {
        Segment::Key(key) => key.clone(),
        Segment::Index(idx) => idx.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_mixed_notation() {
        assert_eq!(
            parse("data[0]['id'].name").unwrap(),
            vec![
                Segment::Key("data".into()),
                Segment::Index(0),
                Segment::Key("id".into()),
                Segment::Key("name".into()),
            ]
        );
        assert_eq!(parse("'x-y'").unwrap(), vec![Segment::Key("x-y".into())]);
        assert_eq!(parse(r#"a["b.c"]"#).unwrap()[1], Segment::Key("b.c".into()));
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "a.", ".a", "a..b", "a[0", "a[]", "a['x'", "a[0]b"] {
            assert!(parse(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn resolves_nested_values() {
        let body = json!({"data": [{"id": 1, "tags": {"x-y": true}}]});
        assert_eq!(resolve("data[0]['id']", &body), Some(&json!(1)));
        assert_eq!(resolve("data[0].tags['x-y']", &body), Some(&json!(true)));
        assert_eq!(resolve("data.0.id", &body), Some(&json!(1)));
    }

    #[test]
    fn null_is_found_not_missing() {
        let body = json!({"gone": null});
        assert_eq!(resolve("gone", &body), Some(&Value::Null));
        assert_eq!(resolve("absent", &body), None);
    }

    #[test]
    fn traversal_failures_are_not_found() {
        let body = json!({"items": [1, 2], "name": "x"});
        assert_eq!(resolve("items[5]", &body), None);
        assert_eq!(resolve("name.first", &body), None);
        assert_eq!(resolve("name[0]", &body), None);
        assert_eq!(resolve("items[", &body), None);
    }

    #[test]
    fn legacy_data_root_falls_back_to_payload() {
        let body = json!({"id": 7, "list": [3]});
        assert_eq!(resolve("data.id", &body), Some(&json!(7)));
        assert_eq!(resolve("data['list'][0]", &body), Some(&json!(3)));
        assert_eq!(resolve("data", &body), Some(&body));

        let array = json!([{"id": 9}]);
        assert_eq!(resolve("data[0].id", &array), Some(&json!(9)));
    }

    #[test]
    fn literal_data_key_wins_over_legacy_root() {
        let body = json!({"data": {"count": "5"}, "count": 1});
        assert_eq!(resolve("data.count", &body), Some(&json!("5")));
        assert_eq!(resolve("data.missing", &body), None);
    }

    #[test]
    fn jsonpath_takes_first_match() {
        let body = json!({"users": [{"id": 1}, {"id": 2}]});
        assert_eq!(resolve("$.users[*].id", &body), Some(&json!(1)));
        assert_eq!(resolve("$.nobody", &body), None);
    }

    #[test]
    fn assign_creates_intermediate_objects() {
        let mut root = Map::new();
        assert!(assign(&mut root, &parse("user.id").unwrap(), json!(42)));
        assert_eq!(Value::Object(root.clone()), json!({"user": {"id": 42}}));

        root.insert("flat".into(), json!("s"));
        assert!(!assign(&mut root, &parse("flat.x").unwrap(), json!(1)));
    }
}
