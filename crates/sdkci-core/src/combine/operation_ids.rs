//! operationId collision handling.
//!
//! An operationId defined by more than one document is prefixed, in every
//! document that defines it, with a slug derived from that document's
//! `info.title`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// HTTP methods that may appear as operations in a path item.
pub const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^a-z0-9]+").expect("static regex"))
}

/// Lowercase, collapse every run of non-alphanumerics to one hyphen, trim
/// hyphens. Falls back to `api` for titles with nothing left.
pub fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    let slug = non_alphanumeric().replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "api".to_string()
    } else {
        slug.to_string()
    }
}

/// One unique slug per title.
///
/// A slug shared by several titles is numbered from zero in order of
/// appearance, first occurrence included: `["API", "API"]` gives
/// `["api-0", "api-1"]`.
pub fn derive_slugs<S: AsRef<str>>(titles: &[S]) -> Vec<String> {
    let bases: Vec<String> = titles.iter().map(|t| slugify(t.as_ref())).collect();

    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for base in &bases {
        *occurrences.entry(base.as_str()).or_default() += 1;
    }

    let mut used: HashSet<String> = bases
        .iter()
        .filter(|b| occurrences[b.as_str()] == 1)
        .cloned()
        .collect();
    let mut counters: HashMap<&str, usize> = HashMap::new();

    bases
        .iter()
        .map(|base| {
            if occurrences[base.as_str()] == 1 {
                return base.clone();
            }
            let counter = counters.entry(base.as_str()).or_default();
            loop {
                let candidate = format!("{base}-{counter}");
                *counter += 1;
                if used.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

/// Every operation object of a document.
pub(crate) fn operations(doc: &Value) -> Vec<&Map<String, Value>> {
    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };
    paths
        .values()
        .filter_map(Value::as_object)
        .flat_map(|item| {
            HTTP_METHODS
                .iter()
                .filter_map(move |m| item.get(*m).and_then(Value::as_object))
        })
        .collect()
}

pub(crate) fn operations_mut(doc: &mut Value) -> Vec<&mut Map<String, Value>> {
    let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else {
        return Vec::new();
    };
    paths
        .values_mut()
        .filter_map(Value::as_object_mut)
        .flat_map(|item| {
            item.iter_mut()
                .filter(|(key, _)| HTTP_METHODS.contains(&key.as_str()))
                .filter_map(|(_, op)| op.as_object_mut())
        })
        .collect()
}

fn operation_ids(doc: &Value) -> BTreeSet<String> {
    operations(doc)
        .into_iter()
        .filter_map(|op| op.get("operationId").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// operationIds defined by two or more documents.
pub fn find_conflicting_operation_ids(docs: &[Value]) -> BTreeSet<String> {
    let mut defined_by: BTreeMap<String, usize> = BTreeMap::new();
    for doc in docs {
        for id in operation_ids(doc) {
            *defined_by.entry(id).or_default() += 1;
        }
    }
    defined_by
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect()
}

pub(crate) fn document_title(doc: &Value) -> &str {
    doc.get("info")
        .and_then(|info| info.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Rewrite conflicting operationIds to `{slug}_{operationId}`. Returns the
/// number of operations renamed; everything else is left untouched.
pub fn deduplicate_operation_ids(docs: &mut [Value]) -> usize {
    let conflicts = find_conflicting_operation_ids(docs);
    if conflicts.is_empty() {
        return 0;
    }

    let titles: Vec<String> = docs.iter().map(|d| document_title(d).to_string()).collect();
    let slugs = derive_slugs(&titles);

    let mut renamed = 0;
    for (doc, slug) in docs.iter_mut().zip(&slugs) {
        for op in operations_mut(doc) {
            let Some(id) = op.get("operationId").and_then(Value::as_str) else {
                continue;
            };
            if conflicts.contains(id) {
                let prefixed = format!("{slug}_{id}");
                op.insert("operationId".to_string(), Value::String(prefixed));
                renamed += 1;
            }
        }
    }
    renamed
}
