// src/loader.rs

//! Reads test files, following `testImport` entries.

use miette::{Diagnostic, NamedSource, SourceSpan};
use serde_json::Value;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::spec::parse_test;
use crate::test_case::TestCase;

pub const IMPORT_KEY: &str = "testImport";
pub const MAX_IMPORT_DEPTH: usize = 32;

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    #[diagnostic(
        code(apicheck::load::io),
        help("imports resolve relative to the file that declares them")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed JSON in {}: {source}", path.display())]
    #[diagnostic(code(apicheck::load::json))]
    Json {
        path: PathBuf,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        at: SourceSpan,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed YAML in {}: {source}", path.display())]
    #[diagnostic(code(apicheck::load::yaml))]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid test #{index} in {}: {source}", path.display())]
    #[diagnostic(
        code(apicheck::load::test),
        help("a test needs at least `request.url`")
    )]
    InvalidTest {
        path: PathBuf,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("cyclic import: {}", display_chain(chain))]
    #[diagnostic(code(apicheck::load::cycle))]
    CyclicImport { chain: Vec<PathBuf> },

    #[error("imports nested deeper than {} at {}", MAX_IMPORT_DEPTH, path.display())]
    #[diagnostic(code(apicheck::load::depth))]
    TooDeep { path: PathBuf },

    #[error("cannot list suite {}: {source}", path.display())]
    #[diagnostic(code(apicheck::load::suite))]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Loads `path` and every file it imports, flattened in declaration order.
pub fn load(path: &Path) -> Result<Vec<TestCase>, LoadError> {
    TestLoader::default().load_file(path)
}

#[derive(Default)]
struct TestLoader {
    /// Files currently being loaded, outermost first.
    stack: Vec<PathBuf>,
}

impl TestLoader {
    fn load_file(&mut self, path: &Path) -> Result<Vec<TestCase>, LoadError> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.stack.contains(&key) {
            let mut chain = self.stack.clone();
            chain.push(key);
            return Err(LoadError::CyclicImport { chain });
        }
        if self.stack.len() >= MAX_IMPORT_DEPTH {
            return Err(LoadError::TooDeep {
                path: path.to_path_buf(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = match parse_document(path, text)? {
            Value::Array(items) => items,
            single => vec![single],
        };
        log::debug!(target: "apicheck", "{}: {} entries", path.display(), entries.len());

        self.stack.push(key);
        let loaded = self.load_entries(path, entries);
        self.stack.pop();
        loaded
    }

    fn load_entries(&mut self, path: &Path, entries: Vec<Value>) -> Result<Vec<TestCase>, LoadError> {
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut cases = Vec::new();
        for (index, entry) in entries.into_iter().enumerate() {
            if let Some(import) = entry.get(IMPORT_KEY).and_then(Value::as_str) {
                cases.extend(self.load_file(&base_dir.join(import))?);
                continue;
            }
            let spec = parse_test(entry).map_err(|source| LoadError::InvalidTest {
                path: path.to_path_buf(),
                index,
                source,
            })?;
            cases.push(TestCase::new(spec, base_dir.clone()));
        }
        Ok(cases)
    }
}

fn parse_document(path: &Path, text: String) -> Result<Value, LoadError> {
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if yaml {
        return serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
            path: path.to_path_buf(),
            source,
        });
    }
    serde_json::from_str(&text).map_err(|source| {
        let offset = offset_of(&text, source.line(), source.column());
        LoadError::Json {
            path: path.to_path_buf(),
            src: NamedSource::new(path.display().to_string(), text.clone()),
            at: (offset, 0).into(),
            source,
        }
    })
}

/// Byte offset of a 1-based line and column.
fn offset_of(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}
