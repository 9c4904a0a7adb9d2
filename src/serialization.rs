use crate::ast::{Item, PropValue};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

fn prop_value(value: &PropValue) -> Value {
    match value {
        PropValue::Str(text) => Value::String(text.get_string()),
        PropValue::Seq(texts) => {
            Value::Array(texts.iter().map(|t| Value::String(t.get_string())).collect())
        }
        PropValue::Map(pairs) => {
            let mut map = BTreeMap::new();
            for (key, value) in pairs {
                map.entry(key.get_string())
                    .or_insert_with(|| Value::String(value.get_string()));
            }
            Value::Object(map)
        }
    }
}

fn item_value(item: &Item) -> Value {
    let mut map = BTreeMap::new();
    if let Some(kind) = item.kind {
        map.insert("kind".to_string(), Value::String(kind.name().to_string()));
    }
    if let Some(labels) = &item.labels {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        map.insert("labels".to_string(), Value::Object(labels));
    }
    if let Some(reference) = &item.reference {
        map.insert(
            "reference".to_string(),
            Value::String(reference.get_string()),
        );
    }
    let props = item
        .properties
        .iter()
        .map(|prop| (prop.key.get_string(), prop_value(&prop.value)))
        .collect();
    map.insert("props".to_string(), Value::Object(props));
    Value::Object(map)
}

/// Groups items by section, keeping their order within each section.
pub(crate) fn to_value(items: &[Item]) -> Value {
    let mut sections: BTreeMap<String, Value> = BTreeMap::new();
    for item in items {
        let entry = sections
            .entry(item.section.get_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(item_value(item));
        }
    }
    Value::Object(sections)
}
