//! Attribute to wire-field mapping
//!
//! Each adapter declares a table of [`FieldMap`]s: the abstract attribute
//! name used in plans and diffs, its REST JSON path (dotted), its ZAPI tag
//! path (slash separated, relative to the record element), a value kind and
//! the modification policy.

use ontap_client::{ClusterVersion, OntapVersion, ZapiElement};
use serde_json::{Map, Value};

use crate::model::{AttrValue, Attributes};

/// Value kind of a mapped field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Bool,
    /// Bytes
    Size,
    /// Unordered strings; the last ZAPI path segment is the item tag
    StrSet,
    /// Unordered records, compared item by item; built by the adapter on the ZAPI side
    DictSet,
}

/// How the kernel treats a difference on this attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrPolicy {
    Modifiable,
    /// Used at creation, ignored afterwards
    CreateOnly,
    /// A difference is refused
    Immutable,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub attr: &'static str,
    pub rest: Option<&'static str>,
    pub zapi: Option<&'static str>,
    pub kind: FieldKind,
    /// First version whose REST API knows the field
    pub min_version: Option<OntapVersion>,
    pub policy: AttrPolicy,
}

impl FieldMap {
    pub const fn new(attr: &'static str, kind: FieldKind) -> Self {
        Self {
            attr,
            rest: None,
            zapi: None,
            kind,
            min_version: None,
            policy: AttrPolicy::Modifiable,
        }
    }

    pub const fn rest(self, path: &'static str) -> Self {
        Self { rest: Some(path), ..self }
    }

    pub const fn zapi(self, path: &'static str) -> Self {
        Self { zapi: Some(path), ..self }
    }

    pub const fn since(self, version: OntapVersion) -> Self {
        Self {
            min_version: Some(version),
            ..self
        }
    }

    pub const fn create_only(self) -> Self {
        Self {
            policy: AttrPolicy::CreateOnly,
            ..self
        }
    }

    pub const fn immutable(self) -> Self {
        Self {
            policy: AttrPolicy::Immutable,
            ..self
        }
    }

    fn supported_by(&self, version: &ClusterVersion) -> bool {
        match (self.min_version, version.version) {
            (None, _) => true,
            (Some(minimum), Some(version)) => version >= minimum,
            (Some(_), None) => false,
        }
    }
}

/// Look up the mapping of an attribute
pub fn lookup<'a>(maps: &'a [FieldMap], attr: &str) -> Option<&'a FieldMap> {
    maps.iter().find(|map| map.attr == attr)
}

/// `fields=` value for a REST GET: mapped fields the version supports plus `extra`
pub fn rest_fields(maps: &[FieldMap], version: &ClusterVersion, extra: &[&str]) -> String {
    let mut fields: Vec<&str> = extra.to_vec();
    for map in maps.iter().filter(|map| map.supported_by(version)) {
        match map.rest {
            Some(path) if !fields.contains(&path) => fields.push(path),
            _ => {}
        }
    }
    fields.join(",")
}

fn json_to_attr(kind: FieldKind, value: &Value) -> Option<AttrValue> {
    match kind {
        FieldKind::Str => match value {
            Value::String(s) => Some(AttrValue::Str(s.clone())),
            Value::Number(n) => Some(AttrValue::Str(n.to_string())),
            _ => None,
        },
        FieldKind::Int => value.as_i64().map(AttrValue::Int),
        FieldKind::Bool => value.as_bool().map(AttrValue::Bool),
        FieldKind::Size => value.as_u64().map(AttrValue::Size),
        FieldKind::StrSet => Some(AttrValue::Set(
            value
                .as_array()?
                .iter()
                .filter_map(|item| item.as_str().map(AttrValue::str))
                .collect(),
        )),
        FieldKind::DictSet => Some(AttrValue::Set(
            value
                .as_array()?
                .iter()
                .filter(|item| item.is_object())
                .filter_map(AttrValue::from_json)
                .collect(),
        )),
    }
}

fn pointer(path: &str) -> String {
    format!("/{}", path.replace('.', "/"))
}

/// Read mapped attributes from a REST record
pub fn from_rest(maps: &[FieldMap], record: &Value) -> Attributes {
    maps.iter()
        .filter_map(|map| {
            let value = record.pointer(&pointer(map.rest?))?;
            json_to_attr(map.kind, value).map(|v| (map.attr.to_string(), v))
        })
        .collect()
}

/// Insert `value` at a dotted path, creating intermediate objects
pub fn set_json_path(body: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            body.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = body
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_json_path(child, rest, value);
            }
        }
    }
}

/// Build a REST body from the mapped attributes present in `attrs`
pub fn to_rest(maps: &[FieldMap], attrs: &Attributes) -> Map<String, Value> {
    let mut body = Map::new();
    for map in maps {
        if let (Some(path), Some(value)) = (map.rest, attrs.get(map.attr)) {
            set_json_path(&mut body, path, value.to_json());
        }
    }
    body
}

fn split_item_tag(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or((path, path))
}

/// Read mapped attributes from a ZAPI record element
pub fn from_zapi(maps: &[FieldMap], record: &ZapiElement) -> Attributes {
    maps.iter()
        .filter_map(|map| {
            let path = map.zapi?;
            let value = match map.kind {
                FieldKind::Str => record.path_content(path).map(AttrValue::str),
                FieldKind::Int => record.path_content(path)?.parse().ok().map(AttrValue::Int),
                FieldKind::Size => record.path_content(path)?.parse().ok().map(AttrValue::Size),
                FieldKind::Bool => match record.path_content(path)? {
                    "true" => Some(AttrValue::Bool(true)),
                    "false" => Some(AttrValue::Bool(false)),
                    _ => None,
                },
                FieldKind::StrSet => {
                    let (parent, _) = split_item_tag(path);
                    Some(AttrValue::Set(
                        record
                            .get_path(parent)?
                            .children()
                            .iter()
                            .filter_map(|child| child.content().map(AttrValue::str))
                            .collect(),
                    ))
                }
                FieldKind::DictSet => None,
            };
            value.map(|v| (map.attr.to_string(), v))
        })
        .collect()
}

/// Add the mapped attributes present in `attrs` to a ZAPI request
pub fn to_zapi(maps: &[FieldMap], attrs: &Attributes, request: &mut ZapiElement) {
    for map in maps {
        let (Some(path), Some(value)) = (map.zapi, attrs.get(map.attr)) else {
            continue;
        };
        match value {
            AttrValue::List(items) | AttrValue::Set(items) => {
                let (parent, item_tag) = split_item_tag(path);
                let list = request.path_mut(parent);
                for item in items {
                    list.add_new_child(item_tag, item.to_string());
                }
            }
            scalar => request.path_mut(path).set_content(scalar.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAPS: &[FieldMap] = &[
        FieldMap::new("comment", FieldKind::Str).rest("comment").zapi("comment"),
        FieldMap::new("size", FieldKind::Size).rest("space.size").zapi("size"),
        FieldMap::new("mail_hosts", FieldKind::StrSet)
            .rest("mail_hosts")
            .zapi("mail-hosts/string"),
        FieldMap::new("adaptive", FieldKind::Str)
            .rest("qos_policy.adaptive.name")
            .since(OntapVersion::new(9, 11, 1)),
        FieldMap::new("os_type", FieldKind::Str).rest("os_type").zapi("multiprotocol-type").create_only(),
    ];

    #[test]
    fn test_rest_fields_follow_version() {
        let old = ClusterVersion::known(OntapVersion::new(9, 10, 1));
        let new = ClusterVersion::known(OntapVersion::new(9, 11, 1));
        assert_eq!(
            rest_fields(MAPS, &old, &["uuid"]),
            "uuid,comment,space.size,mail_hosts,os_type"
        );
        assert!(rest_fields(MAPS, &new, &[]).contains("qos_policy.adaptive.name"));
    }

    #[test]
    fn test_rest_round_trip() {
        let record = json!({"comment": "c", "space": {"size": 4096}, "mail_hosts": ["b", "a"]});
        let attrs = from_rest(MAPS, &record);
        assert_eq!(attrs.get("size"), Some(&AttrValue::Size(4096)));
        assert_eq!(attrs.get("mail_hosts"), Some(&AttrValue::str_set(["b", "a"])));
        assert_eq!(Value::Object(to_rest(MAPS, &attrs)), record);
    }

    #[test]
    fn test_zapi_lists_use_item_tags() {
        let mut attrs = Attributes::new();
        attrs.insert("mail_hosts".to_string(), AttrValue::str_set(["m1", "m2"]));
        attrs.insert("comment".to_string(), AttrValue::str("hello"));
        let mut request = ZapiElement::new("autosupport-config-modify");
        to_zapi(MAPS, &attrs, &mut request);
        assert_eq!(
            request.to_xml(),
            "<autosupport-config-modify><comment>hello</comment>\
             <mail-hosts><string>m1</string><string>m2</string></mail-hosts></autosupport-config-modify>"
        );
        assert_eq!(from_zapi(MAPS, &request), attrs);
    }

    #[test]
    fn test_dict_sets_keep_records() {
        const ROLE_MAPS: &[FieldMap] = &[FieldMap::new("privileges", FieldKind::DictSet).rest("privileges")];
        let record = json!({"privileges": [{"path": "lun", "access": "all"}, "stray"]});
        let attrs = from_rest(ROLE_MAPS, &record);
        let items = attrs.get("privileges").and_then(AttrValue::as_items).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_dict().and_then(|d| d.get("access")), Some(&AttrValue::str("all")));
        assert!(from_zapi(ROLE_MAPS, &ZapiElement::new("security-login-role-info")).is_empty());
    }

    #[test]
    fn test_policy_lookup() {
        assert_eq!(lookup(MAPS, "os_type").map(|m| m.policy), Some(AttrPolicy::CreateOnly));
        assert!(lookup(MAPS, "missing").is_none());
    }
}
