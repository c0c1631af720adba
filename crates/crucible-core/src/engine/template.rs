//! Prompt template filling.
//!
//! Templates are JSON documents whose string values may contain
//! `<prompt-input key="name" />` placeholders at any depth.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r#"<prompt-input\s+key="(\w+)"\s*/>"#).unwrap();
}

/// Replace every placeholder whose key is in `inputs`. Unknown keys are left
/// as written.
pub fn fill_string(text: &str, inputs: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| match inputs.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn fill_value(template: &Value, inputs: &BTreeMap<String, String>) -> Value {
    match template {
        Value::String(s) => Value::String(fill_string(s, inputs)),
        Value::Array(items) => Value::Array(items.iter().map(|v| fill_value(v, inputs)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), fill_value(v, inputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Fill `template` and, for object templates, pin `model`.
pub fn render_request_body(
    template: &Value,
    inputs: &BTreeMap<String, String>,
    model: &str,
) -> Value {
    let mut body = fill_value(template, inputs);
    if let Value::Object(map) = &mut body {
        map.insert("model".to_string(), Value::String(model.to_string()));
    }
    body
}
