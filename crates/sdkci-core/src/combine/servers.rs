//! Server URL handling when several documents are combined.
//!
//! A combined document can only declare one set of top-level servers.
//! Documents served from a URL in `preserve` keep their servers at the
//! operation level and get a `base` query parameter on every path so their
//! paths stay distinct. Other documents lose their servers unless they only
//! declare the `global` URL.

use serde_json::{json, Map, Value};
use url::Url;

use super::operation_ids::HTTP_METHODS;

/// Caller's choice of which server URLs survive combining.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStrategy {
    /// Server URLs whose documents keep their servers per operation.
    pub preserve: Vec<String>,
    /// URL used for the combined document's top-level servers.
    pub global: Option<String>,
}

fn normalize(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

fn server_urls(doc: &Value) -> Vec<&str> {
    doc.get("servers")
        .and_then(Value::as_array)
        .map(|servers| {
            servers
                .iter()
                .filter_map(|s| s.get("url").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Value of the `base` query parameter for a preserved server URL: its host
/// and path without a trailing slash.
pub fn base_param(server_url: &str) -> String {
    match Url::parse(server_url) {
        Ok(url) => format!(
            "{}{}",
            url.host_str().unwrap_or_default(),
            url.path().trim_end_matches('/')
        ),
        Err(_) => normalize(server_url).to_string(),
    }
}

fn with_base_query(path: &str, base: &str) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}base={base}")
}

fn preserve_servers(obj: &mut Map<String, Value>, base: &str, servers: Value) {
    let Some(Value::Object(paths)) = obj.remove("paths") else {
        return;
    };
    let mut rewritten = Map::new();
    for (path, mut item) in paths {
        if let Some(item) = item.as_object_mut() {
            for method in HTTP_METHODS {
                if let Some(Value::Object(op)) = item.get_mut(method) {
                    op.entry("servers").or_insert_with(|| servers.clone());
                }
            }
        }
        rewritten.insert(with_base_query(&path, base), item);
    }
    obj.insert("paths".to_string(), Value::Object(rewritten));
}

/// Apply `strategy` to every document in place.
pub fn apply_server_strategy(docs: &mut [Value], strategy: &ServerStrategy) {
    for doc in docs.iter_mut() {
        let urls: Vec<String> = server_urls(doc).into_iter().map(str::to_string).collect();
        let preserved = urls.iter().find(|url| {
            strategy
                .preserve
                .iter()
                .any(|p| normalize(p) == normalize(url))
        });

        let Some(obj) = doc.as_object_mut() else {
            continue;
        };

        if let Some(url) = preserved {
            let servers = obj.remove("servers").unwrap_or_else(|| json!([]));
            preserve_servers(obj, &base_param(url), servers);
            continue;
        }

        let only_global = matches!(
            (&strategy.global, urls.as_slice()),
            (Some(global), [single]) if normalize(global) == normalize(single)
        );
        if !only_global {
            obj.remove("servers");
        }
    }
}
