//! Declared function parameters, checked before the handler runs.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::Number => "a number",
            ParamKind::Boolean => "a boolean",
            ParamKind::Array => "an array",
            ParamKind::Object => "an object",
            ParamKind::Any => "a value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRule {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamRule {
    fn new(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, ParamKind::String)
    }

    pub fn number(name: &'static str) -> Self {
        Self::new(name, ParamKind::Number)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    pub fn array(name: &'static str) -> Self {
        Self::new(name, ParamKind::Array)
    }

    pub fn object(name: &'static str) -> Self {
        Self::new(name, ParamKind::Object)
    }

    pub fn any(name: &'static str) -> Self {
        Self::new(name, ParamKind::Any)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Check every rule and report all failing fields at once.
pub fn validate_params(rules: &[ParamRule], params: &Map<String, Value>) -> Result<(), ApiError> {
    let mut errors = HashMap::new();
    for rule in rules {
        match params.get(rule.name) {
            None => {
                if rule.required {
                    errors.insert(rule.name.to_string(), format!("{} is required", rule.name));
                }
            }
            Some(value) if is_blank(value) => {
                if rule.required {
                    errors.insert(rule.name.to_string(), format!("{} is required", rule.name));
                }
            }
            Some(value) if !rule.kind.accepts(value) => {
                errors.insert(
                    rule.name.to_string(),
                    format!("{} must be {}", rule.name, rule.kind.describe()),
                );
            }
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation_error("Invalid parameters", Some(errors)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn accepts_valid_params() {
        let rules = [ParamRule::string("title").required(), ParamRule::number("price")];
        assert!(validate_params(&rules, &params(json!({"title": "Session"}))).is_ok());
        assert!(validate_params(&rules, &params(json!({"title": "Session", "price": 10}))).is_ok());
    }

    #[test]
    fn reports_every_bad_field() {
        let rules = [
            ParamRule::string("title").required(),
            ParamRule::number("price").required(),
            ParamRule::array("answers"),
        ];
        let err = validate_params(&rules, &params(json!({"title": "  ", "answers": "x"}))).unwrap_err();
        let body = err.to_json();
        assert_eq!(body["field_errors"]["title"], "title is required");
        assert_eq!(body["field_errors"]["price"], "price is required");
        assert_eq!(body["field_errors"]["answers"], "answers must be an array");
    }
}
