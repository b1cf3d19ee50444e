//! Declarative parameter schemas
//!
//! Each module declares its options as a static table of [`OptionSpec`]s
//! plus the cross-option rules (mutually exclusive, required together,
//! required if). [`ModuleSchema::validate`] turns the raw JSON parameters
//! into typed [`Params`] or a validation error, before any network I/O.

use std::collections::{BTreeMap, BTreeSet};

use ontap_client::{UnitTable, parse_size};
use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::host::HOST_OPTIONS;
use crate::model::AttrValue;

/// Kind of an option value
#[derive(Debug, Clone, Copy)]
pub enum OptionKind {
    Str,
    Int,
    Bool,
    Choice(&'static [&'static str]),
    /// Size string such as `1567gb`; plain integers use `implicit` units
    Size {
        table: UnitTable,
        implicit: &'static str,
    },
    List(&'static OptionKind),
    Dict(&'static [OptionSpec]),
    /// Free-form value, checked by whoever consumes it
    Raw,
}

/// One declared option
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    /// Default, written the way a user would write it
    pub default: Option<&'static str>,
    /// Redacted from the outcome
    pub no_log: bool,
}

impl OptionSpec {
    pub const fn new(name: &'static str, kind: OptionKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            no_log: false,
        }
    }

    pub const fn required(self) -> Self {
        Self { required: true, ..self }
    }

    pub const fn default(self, value: &'static str) -> Self {
        Self {
            default: Some(value),
            ..self
        }
    }

    pub const fn no_log(self) -> Self {
        Self { no_log: true, ..self }
    }
}

/// `state` option shared by most modules
pub const STATE: OptionSpec = OptionSpec::new("state", OptionKind::Choice(&["present", "absent"])).default("present");

/// Options and option rules of one module
#[derive(Debug)]
pub struct ModuleSchema {
    pub options: &'static [OptionSpec],
    pub mutually_exclusive: &'static [&'static [&'static str]],
    pub required_together: &'static [&'static [&'static str]],
    /// `(option, value, options required when option == value)`
    pub required_if: &'static [(&'static str, &'static str, &'static [&'static str])],
}

impl ModuleSchema {
    fn specs(&self) -> impl Iterator<Item = &'static OptionSpec> {
        HOST_OPTIONS.iter().chain(self.options.iter())
    }

    fn spec(&self, name: &str) -> Option<&'static OptionSpec> {
        self.specs().find(|spec| spec.name == name)
    }

    /// Validate raw parameters against host options plus this module's options.
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<Params, ReconcileError> {
        let unknown: Vec<&str> = raw
            .keys()
            .filter(|key| self.spec(key).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(ReconcileError::Validation(format!(
                "Unsupported parameters: {}",
                unknown.join(", ")
            )));
        }

        let mut params = Params::default();
        let mut missing = Vec::new();
        for spec in self.specs() {
            match raw.get(spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    params.values.insert(spec.name.to_string(), coerce(spec.name, &spec.kind, value)?);
                    params.supplied.insert(spec.name.to_string());
                }
                None => match spec.default {
                    Some(_) => {}
                    None if spec.required => missing.push(spec.name),
                    None => {}
                },
            }
            if let Some(default) = spec.default {
                let value = coerce(spec.name, &spec.kind, &default_json(&spec.kind, default))?;
                params.values.entry(spec.name.to_string()).or_insert_with(|| value.clone());
                params.defaults.insert(spec.name.to_string(), value);
            }
            if spec.no_log {
                params.no_log.insert(spec.name.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(ReconcileError::Validation(format!(
                "missing required arguments: {}",
                missing.join(", ")
            )));
        }

        for group in self.mutually_exclusive {
            let present: Vec<&str> = group.iter().copied().filter(|name| params.is_supplied(name)).collect();
            if present.len() > 1 {
                return Err(ReconcileError::Validation(format!(
                    "parameters are mutually exclusive: {}",
                    present.join("|")
                )));
            }
        }

        for group in self.required_together {
            let present = group.iter().filter(|name| params.is_supplied(name)).count();
            if present > 0 && present < group.len() {
                return Err(ReconcileError::Validation(format!(
                    "parameters are required together: {}",
                    group.join(", ")
                )));
            }
        }

        for (option, value, requirements) in self.required_if {
            if params.str(option) == Some(*value) {
                let absent: Vec<&str> = requirements
                    .iter()
                    .copied()
                    .filter(|name| params.get(name).is_none())
                    .collect();
                if !absent.is_empty() {
                    return Err(ReconcileError::Validation(format!(
                        "{option} is {value} but all of the following are missing: {}",
                        absent.join(", ")
                    )));
                }
            }
        }

        Ok(params)
    }
}

fn default_json(kind: &OptionKind, default: &str) -> Value {
    match kind {
        OptionKind::Bool => Value::Bool(default == "true"),
        OptionKind::Int => default.parse::<i64>().map_or_else(|_| Value::String(default.to_string()), Value::from),
        OptionKind::List(_) => Value::Array(
            default
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        _ => Value::String(default.to_string()),
    }
}

fn type_error(name: &str, expected: &str, value: &Value) -> ReconcileError {
    ReconcileError::Validation(format!(
        "argument '{name}' is of type {} and we were unable to convert to {expected}: {value}",
        json_type(value)
    ))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn coerce(name: &str, kind: &OptionKind, value: &Value) -> Result<AttrValue, ReconcileError> {
    match kind {
        OptionKind::Str => match value {
            Value::String(s) => Ok(AttrValue::Str(s.clone())),
            Value::Number(n) => Ok(AttrValue::Str(n.to_string())),
            Value::Bool(b) => Ok(AttrValue::Str(b.to_string())),
            other => Err(type_error(name, "str", other)),
        },
        OptionKind::Int => match value {
            Value::Number(n) => n.as_i64().map(AttrValue::Int).ok_or_else(|| type_error(name, "int", value)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(AttrValue::Int)
                .map_err(|_| type_error(name, "int", value)),
            other => Err(type_error(name, "int", other)),
        },
        OptionKind::Bool => match value {
            Value::Bool(b) => Ok(AttrValue::Bool(*b)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(AttrValue::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(AttrValue::Bool(false)),
                _ => Err(type_error(name, "bool", value)),
            },
            other => Err(type_error(name, "bool", other)),
        },
        OptionKind::Choice(choices) => {
            let AttrValue::Str(s) = coerce(name, &OptionKind::Str, value)? else {
                return Err(type_error(name, "str", value));
            };
            if choices.contains(&s.as_str()) {
                Ok(AttrValue::Str(s))
            } else {
                Err(ReconcileError::Validation(format!(
                    "value of {name} must be one of: {}, got: {s}",
                    choices.join(", ")
                )))
            }
        }
        OptionKind::Size { table, implicit } => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => return Err(type_error(name, "size", other)),
            };
            Ok(AttrValue::Size(parse_size(name, &text, *table, implicit)?))
        }
        OptionKind::List(item_kind) => {
            let items: Vec<Value> = match value {
                Value::Array(items) => items.clone(),
                Value::String(s) => s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
                other => vec![other.clone()],
            };
            items
                .iter()
                .map(|item| coerce(name, item_kind, item))
                .collect::<Result<Vec<_>, _>>()
                .map(AttrValue::List)
        }
        OptionKind::Dict(specs) => {
            let Value::Object(map) = value else {
                return Err(type_error(name, "dict", value));
            };
            let mut dict = BTreeMap::new();
            for key in map.keys() {
                if !specs.iter().any(|spec| spec.name == key) {
                    return Err(ReconcileError::Validation(format!(
                        "Unsupported parameters: {name}.{key}"
                    )));
                }
            }
            for spec in *specs {
                let nested = format!("{name}.{}", spec.name);
                match map.get(spec.name).filter(|v| !v.is_null()) {
                    Some(v) => {
                        dict.insert(spec.name.to_string(), coerce(&nested, &spec.kind, v)?);
                    }
                    None => match spec.default {
                        Some(default) => {
                            let v = default_json(&spec.kind, default);
                            dict.insert(spec.name.to_string(), coerce(&nested, &spec.kind, &v)?);
                        }
                        None if spec.required => {
                            return Err(ReconcileError::Validation(format!(
                                "missing required arguments: {nested}"
                            )));
                        }
                        None => {}
                    },
                }
            }
            Ok(AttrValue::Dict(dict))
        }
        OptionKind::Raw => AttrValue::from_json(value).ok_or_else(|| type_error(name, "value", value)),
    }
}

/// Validated parameters
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: BTreeMap<String, AttrValue>,
    /// Options the caller set explicitly (as opposed to defaults)
    supplied: BTreeSet<String>,
    defaults: BTreeMap<String, AttrValue>,
    no_log: BTreeSet<String>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttrValue::as_int)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(AttrValue::as_bool)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.bool(name).unwrap_or(false)
    }

    pub fn str_list(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(AttrValue::as_str_items)
    }

    /// `true` when the caller set the option explicitly
    pub fn is_supplied(&self, name: &str) -> bool {
        self.supplied.contains(name)
    }

    /// `true` when the caller set the option to something other than its default
    pub fn is_set_non_default(&self, name: &str) -> bool {
        match (self.supplied.contains(name), self.values.get(name)) {
            (true, Some(value)) => self.defaults.get(name).is_none_or(|default| !default.semantic_eq(value)),
            _ => false,
        }
    }

    /// Names of the `no_log` options
    pub fn no_log_options(&self) -> BTreeSet<String> {
        self.no_log.clone()
    }

    /// Required string; schema validation makes this infallible for
    /// required options
    pub fn require_str(&self, name: &str) -> Result<&str, ReconcileError> {
        self.str(name)
            .ok_or_else(|| ReconcileError::Validation(format!("missing required arguments: {name}")))
    }
}
