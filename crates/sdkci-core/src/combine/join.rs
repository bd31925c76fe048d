//! Merges prepared documents into one.
//!
//! Top-level fields come from the first document that has them. Paths are
//! merged per HTTP method, components per section and name, tags by name.

use serde_json::{Map, Value};

use super::operation_ids::HTTP_METHODS;
use crate::error::CombineError;

fn merge_path_item(
    path: &str,
    target: &mut Map<String, Value>,
    item: Map<String, Value>,
) -> Result<(), CombineError> {
    for (key, value) in item {
        let is_method = HTTP_METHODS.contains(&key.as_str());
        match target.get(&key) {
            Some(_) if is_method => {
                return Err(CombineError::PathConflict {
                    path: path.to_string(),
                    method: key,
                });
            }
            Some(_) => {}
            None => {
                target.insert(key, value);
            }
        }
    }
    Ok(())
}

fn merge_paths(
    target: &mut Map<String, Value>,
    paths: Map<String, Value>,
) -> Result<(), CombineError> {
    for (path, item) in paths {
        match (target.get_mut(&path), item) {
            (Some(Value::Object(existing)), Value::Object(item)) => {
                merge_path_item(&path, existing, item)?;
            }
            (Some(_), _) => {}
            (None, item) => {
                target.insert(path, item);
            }
        }
    }
    Ok(())
}

fn merge_components(
    target: &mut Map<String, Value>,
    components: Map<String, Value>,
) -> Result<(), CombineError> {
    for (section, entries) in components {
        let entries = match entries {
            Value::Object(entries) => entries,
            other => {
                target.entry(section).or_insert(other);
                continue;
            }
        };
        let slot = target
            .entry(section.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(slot) = slot.as_object_mut() else {
            continue;
        };
        for (name, definition) in entries {
            match slot.get(&name) {
                Some(existing) if *existing != definition => {
                    return Err(CombineError::ComponentConflict { section, name });
                }
                Some(_) => {}
                None => {
                    slot.insert(name, definition);
                }
            }
        }
    }
    Ok(())
}

fn merge_tags(target: &mut Vec<Value>, tags: Vec<Value>) {
    for tag in tags {
        let name = tag.get("name").and_then(Value::as_str);
        let seen = target
            .iter()
            .any(|t| name.is_some() && t.get("name").and_then(Value::as_str) == name);
        if !seen {
            target.push(tag);
        }
    }
}

/// Join documents in order. Every document must be a JSON object.
pub fn join_documents(docs: Vec<Map<String, Value>>) -> Result<Value, CombineError> {
    let mut combined = Map::new();
    let mut paths = Map::new();
    let mut components = Map::new();
    let mut tags = Vec::new();

    for mut doc in docs {
        if let Some(Value::Object(doc_paths)) = doc.remove("paths") {
            merge_paths(&mut paths, doc_paths)?;
        }
        if let Some(Value::Object(doc_components)) = doc.remove("components") {
            merge_components(&mut components, doc_components)?;
        }
        if let Some(Value::Array(doc_tags)) = doc.remove("tags") {
            merge_tags(&mut tags, doc_tags);
        }
        for (key, value) in doc {
            combined.entry(key).or_insert(value);
        }
    }

    combined.insert("paths".to_string(), Value::Object(paths));
    if !components.is_empty() {
        combined.insert("components".to_string(), Value::Object(components));
    }
    if !tags.is_empty() {
        combined.insert("tags".to_string(), Value::Array(tags));
    }
    Ok(Value::Object(combined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn first_document_wins_top_level_fields() {
        let joined = join_documents(vec![
            obj(json!({ "openapi": "3.1.0", "info": { "title": "A" }, "paths": {} })),
            obj(json!({ "openapi": "3.0.3", "info": { "title": "B" }, "paths": {} })),
        ])
        .unwrap();
        assert_eq!(joined["openapi"], "3.1.0");
        assert_eq!(joined["info"]["title"], "A");
    }

    #[test]
    fn methods_on_the_same_path_are_merged() {
        let joined = join_documents(vec![
            obj(json!({ "paths": { "/users": { "get": {} } } })),
            obj(json!({ "paths": { "/users": { "post": {} } } })),
        ])
        .unwrap();
        let item = joined["paths"]["/users"].as_object().unwrap();
        assert!(item.contains_key("get"));
        assert!(item.contains_key("post"));
    }

    #[test]
    fn same_method_twice_is_a_conflict() {
        let err = join_documents(vec![
            obj(json!({ "paths": { "/users": { "get": {} } } })),
            obj(json!({ "paths": { "/users": { "get": {} } } })),
        ])
        .unwrap_err();
        assert!(matches!(err, CombineError::PathConflict { ref method, .. } if method == "get"));
    }

    #[test]
    fn identical_components_are_shared_and_different_ones_conflict() {
        let user = json!({ "type": "object" });
        let joined = join_documents(vec![
            obj(json!({ "components": { "schemas": { "User": user.clone() } } })),
            obj(json!({ "components": { "schemas": { "User": user } } })),
        ])
        .unwrap();
        assert_eq!(joined["components"]["schemas"].as_object().unwrap().len(), 1);

        let err = join_documents(vec![
            obj(json!({ "components": { "schemas": { "User": { "type": "object" } } } })),
            obj(json!({ "components": { "schemas": { "User": { "type": "string" } } } })),
        ])
        .unwrap_err();
        assert!(matches!(err, CombineError::ComponentConflict { .. }));
    }

    #[test]
    fn tags_are_unioned_by_name() {
        let joined = join_documents(vec![
            obj(json!({ "tags": [{ "name": "users" }] })),
            obj(json!({ "tags": [{ "name": "users" }, { "name": "orders" }] })),
        ])
        .unwrap();
        assert_eq!(joined["tags"].as_array().unwrap().len(), 2);
    }
}
