//! Combining several OpenAPI documents into one.
//!
//! Inputs are comma-separated glob patterns. Every pattern must match at
//! least one file; the ones that don't are reported together.

pub mod join;
pub mod operation_ids;
pub mod servers;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::CombineError;

pub use join::join_documents;
pub use operation_ids::{
    deduplicate_operation_ids, derive_slugs, find_conflicting_operation_ids, slugify,
};
pub use servers::{apply_server_strategy, base_param, ServerStrategy};

/// Options for [`combine_documents`] and [`combine_specs`].
#[derive(Debug, Clone, Default)]
pub struct CombineOptions {
    /// Server handling. `None` leaves every document's servers to the join.
    pub servers: Option<ServerStrategy>,
}

/// Files matched by a set of patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternMatches {
    /// Matched files in pattern order, duplicates removed.
    pub files: Vec<PathBuf>,
    /// Patterns that matched nothing.
    pub empty_patterns: Vec<String>,
}

/// A combined document with path counts.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedSpec {
    pub document: Value,
    /// Sum of the inputs' path counts.
    pub path_count_before: usize,
    /// Path count of the combined document.
    pub path_count_after: usize,
}

/// Split a comma-separated pattern list, dropping blanks.
pub fn split_patterns(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand every pattern. Never fails on an empty match; the caller decides.
pub fn resolve_patterns(patterns: &[String]) -> Result<PatternMatches, CombineError> {
    let mut matches = PatternMatches::default();
    for pattern in patterns {
        let paths = glob::glob(pattern).map_err(|e| CombineError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        let mut found = false;
        for entry in paths {
            let path = entry.map_err(|e| CombineError::Read {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if !path.is_file() {
                continue;
            }
            found = true;
            if !matches.files.contains(&path) {
                matches.files.push(path);
            }
        }
        if !found {
            matches.empty_patterns.push(pattern.clone());
        }
    }
    Ok(matches)
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// YAML to JSON, stringifying non-string keys (response codes are often
/// written as bare integers).
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

/// Parse document text. The extension picks the format; anything else is
/// tried as JSON, then YAML.
pub fn parse_document(path: &Path, text: &str) -> Result<Value, CombineError> {
    let parse_error = |message: String| CombineError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let as_yaml = |text: &str| {
        serde_yaml::from_str::<serde_yaml::Value>(text)
            .map(yaml_to_json)
            .map_err(|e| parse_error(e.to_string()))
    };

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let value: Value = match extension.as_deref() {
        Some("json") => serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        Some("yaml" | "yml") => as_yaml(text)?,
        _ => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => as_yaml(text)?,
        },
    };

    if !value.is_object() {
        return Err(CombineError::NotAMapping {
            path: path.to_path_buf(),
        });
    }
    Ok(value)
}

/// Read and parse one document.
pub fn load_document(path: &Path) -> Result<Value, CombineError> {
    let text = std::fs::read_to_string(path).map_err(|source| CombineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(path, &text)
}

/// Number of entries under `paths`.
pub fn path_count(doc: &Value) -> usize {
    doc.get("paths")
        .and_then(Value::as_object)
        .map(Map::len)
        .unwrap_or(0)
}

/// Combine already-loaded documents.
pub fn combine_documents(
    mut docs: Vec<Value>,
    options: &CombineOptions,
) -> Result<CombinedSpec, CombineError> {
    if docs.is_empty() {
        return Err(CombineError::NoInputs);
    }
    let path_count_before = docs.iter().map(path_count).sum();

    let renamed = deduplicate_operation_ids(&mut docs);
    if renamed > 0 {
        debug!(renamed, "prefixed conflicting operationIds");
    }
    if let Some(strategy) = &options.servers {
        apply_server_strategy(&mut docs, strategy);
    }

    let objects = docs
        .into_iter()
        .filter_map(|doc| match doc {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    let mut document = join_documents(objects)?;

    if let (Some(global), Some(obj)) = (
        options.servers.as_ref().and_then(|s| s.global.as_ref()),
        document.as_object_mut(),
    ) {
        obj.entry("servers")
            .or_insert_with(|| serde_json::json!([{ "url": global }]));
    }

    let path_count_after = path_count(&document);
    Ok(CombinedSpec {
        document,
        path_count_before,
        path_count_after,
    })
}

/// Resolve `patterns`, load every match and combine them.
pub fn combine_specs(
    patterns: &[String],
    options: &CombineOptions,
) -> Result<CombinedSpec, CombineError> {
    if patterns.is_empty() {
        return Err(CombineError::NoInputs);
    }
    let matches = resolve_patterns(patterns)?;
    if !matches.empty_patterns.is_empty() {
        return Err(CombineError::EmptyPatterns {
            patterns: matches.empty_patterns,
        });
    }

    let docs = matches
        .files
        .iter()
        .map(|path| load_document(path))
        .collect::<Result<Vec<_>, _>>()?;
    let combined = combine_documents(docs, options)?;
    info!(
        files = matches.files.len(),
        before = combined.path_count_before,
        after = combined.path_count_after,
        "combined specs"
    );
    Ok(combined)
}

/// Serialize `doc` to `path`: JSON for a `.json` extension, YAML otherwise.
pub fn write_document(path: &Path, doc: &Value) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let text = if is_json {
        let mut text = serde_json::to_string_pretty(doc)?;
        text.push('\n');
        text
    } else {
        serde_yaml::to_string(doc)?
    };
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_patterns_trims_and_drops_blanks() {
        assert_eq!(
            split_patterns(" a/*.yaml, b/missing.json ,,"),
            vec!["a/*.yaml", "b/missing.json"]
        );
    }

    #[test]
    fn yaml_integer_keys_become_strings() {
        let doc = parse_document(
            Path::new("spec.yaml"),
            "paths:\n  /a:\n    get:\n      responses:\n        200:\n          description: ok\n",
        )
        .unwrap();
        assert_eq!(
            doc["paths"]["/a"]["get"]["responses"]["200"]["description"],
            "ok"
        );
    }

    #[test]
    fn unknown_extension_falls_back_to_yaml() {
        let doc = parse_document(Path::new("spec.txt"), "openapi: 3.1.0\n").unwrap();
        assert_eq!(doc["openapi"], "3.1.0");
    }

    #[test]
    fn scalar_root_is_rejected() {
        let err = parse_document(Path::new("spec.json"), "[]").unwrap_err();
        assert!(matches!(err, CombineError::NotAMapping { .. }));
    }

    #[test]
    fn no_documents_is_an_error() {
        assert!(matches!(
            combine_documents(Vec::new(), &CombineOptions::default()),
            Err(CombineError::NoInputs)
        ));
    }
}
