//! Dialect-independent attribute values
//!
//! Desired and current state are both expressed as an [`Attributes`] bag
//! keyed by abstract attribute name. Adapters translate the bag to REST JSON
//! and ZAPI elements; the kernel only ever diffs bags.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

/// One attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    /// Bytes
    Size(u64),
    /// Ordered sequence
    List(Vec<AttrValue>),
    /// Sequence whose order carries no meaning
    Set(Vec<AttrValue>),
    Dict(BTreeMap<String, AttrValue>),
}

/// Attribute bag keyed by abstract name
pub type Attributes = BTreeMap<String, AttrValue>;

impl AttrValue {
    pub fn str(value: impl Into<String>) -> Self {
        AttrValue::Str(value.into())
    }

    /// Set of strings
    pub fn str_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttrValue::Set(values.into_iter().map(|v| AttrValue::Str(v.into())).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Size(s) => i64::try_from(*s).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_size(&self) -> Option<u64> {
        match self {
            AttrValue::Size(s) => Some(*s),
            AttrValue::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    fn numeric(&self) -> Option<i128> {
        match self {
            AttrValue::Int(i) => Some(i128::from(*i)),
            AttrValue::Size(s) => Some(i128::from(*s)),
            _ => None,
        }
    }

    /// Items of a list or set
    pub fn as_items(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) | AttrValue::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Items of a list or set that are strings
    pub fn as_str_items(&self) -> Vec<String> {
        self.as_items()
            .unwrap_or_default()
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            AttrValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Equality after normalization: sets compare as multisets, sizes and
    /// integers compare numerically.
    pub fn semantic_eq(&self, other: &AttrValue) -> bool {
        match (self, other) {
            (AttrValue::Set(a), AttrValue::Set(b))
            | (AttrValue::Set(a), AttrValue::List(b))
            | (AttrValue::List(a), AttrValue::Set(b)) => multiset_eq(a, b),
            (AttrValue::List(a), AttrValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantic_eq(y))
            }
            (AttrValue::Dict(a), AttrValue::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.semantic_eq(other)))
            }
            (AttrValue::Size(_) | AttrValue::Int(_), AttrValue::Size(_) | AttrValue::Int(_)) => {
                self.numeric() == other.numeric()
            }
            _ => self == other,
        }
    }

    /// JSON form used in the outcome and in REST bodies
    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Str(s) => Value::String(s.clone()),
            AttrValue::Int(i) => Value::from(*i),
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::Size(s) => Value::from(*s),
            AttrValue::List(items) | AttrValue::Set(items) => {
                Value::Array(items.iter().map(AttrValue::to_json).collect())
            }
            AttrValue::Dict(d) => Value::Object(
                d.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }

    /// Best-effort conversion of arbitrary JSON (used for free-form options)
    pub fn from_json(value: &Value) -> Option<AttrValue> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(AttrValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(AttrValue::Int)
                .or_else(|| Some(AttrValue::Str(n.to_string()))),
            Value::String(s) => Some(AttrValue::Str(s.clone())),
            Value::Array(items) => Some(AttrValue::List(items.iter().filter_map(AttrValue::from_json).collect())),
            Value::Object(map) => Some(AttrValue::Dict(
                map.iter()
                    .filter_map(|(k, v)| AttrValue::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }
}

fn multiset_eq(a: &[AttrValue], b: &[AttrValue]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut unmatched: Vec<&AttrValue> = b.iter().collect();
    for item in a {
        match unmatched.iter().position(|candidate| item.semantic_eq(candidate)) {
            Some(index) => {
                unmatched.swap_remove(index);
            }
            None => return false,
        }
    }
    true
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Size(s) => write!(f, "{s}"),
            AttrValue::List(items) | AttrValue::Set(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            AttrValue::Dict(d) => {
                let rendered: Vec<String> = d.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_order_is_ignored() {
        let a = AttrValue::str_set(["mail1", "mail2"]);
        let b = AttrValue::str_set(["mail2", "mail1"]);
        assert!(a.semantic_eq(&b));
        assert!(!a.semantic_eq(&AttrValue::str_set(["mail1"])));
    }

    #[test]
    fn test_list_order_matters() {
        let a = AttrValue::List(vec!["a".into(), "b".into()]);
        let b = AttrValue::List(vec!["b".into(), "a".into()]);
        assert!(!a.semantic_eq(&b));
    }

    #[test]
    fn test_set_of_dicts() {
        let privilege = |path: &str, access: &str| {
            AttrValue::Dict(BTreeMap::from([
                ("access".to_string(), AttrValue::str(access)),
                ("path".to_string(), AttrValue::str(path)),
            ]))
        };
        let a = AttrValue::Set(vec![privilege("/api/a", "all"), privilege("/api/b", "readonly")]);
        let b = AttrValue::Set(vec![privilege("/api/b", "readonly"), privilege("/api/a", "all")]);
        assert!(a.semantic_eq(&b));
    }

    #[test]
    fn test_size_and_int_compare_numerically() {
        assert!(AttrValue::Size(4096).semantic_eq(&AttrValue::Int(4096)));
        assert!(!AttrValue::Size(4096).semantic_eq(&AttrValue::Int(4095)));
    }

    #[test]
    fn test_json_forms() {
        let mut d = BTreeMap::new();
        d.insert("count".to_string(), AttrValue::Int(10));
        assert_eq!(AttrValue::Dict(d).to_json(), json!({"count": 10}));
        assert_eq!(
            AttrValue::from_json(&json!({"a": [true, "x", null]})),
            Some(AttrValue::Dict(BTreeMap::from([(
                "a".to_string(),
                AttrValue::List(vec![AttrValue::Bool(true), AttrValue::str("x")])
            )])))
        );
    }
}
