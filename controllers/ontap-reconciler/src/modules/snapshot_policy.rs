//! Snapshot policies
//!
//! A policy holds up to five schedules, each with a retention count and an
//! optional SnapMirror label and prefix. The `schedule`, `count`,
//! `snapmirror_label` and `prefix` options are parallel lists folded into
//! the `copies` attribute, compared as a set keyed by schedule name.
//!
//! Schedule changes are applied removals first, then updates of surviving
//! schedules, then additions, so the policy never exceeds five schedules.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ontap_client::{Dialect, ZapiElement};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::adapter::{
    Applied, Capabilities, Current, DesiredState, ResourceAdapter, desired_from_params, rest_str, rest_uuid,
    zapi_get_one, zapi_iter_request,
};
use crate::error::ReconcileError;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest, from_zapi, to_rest};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "snapshot policy";
const API: &str = "storage/snapshot-policies";

const MAX_SCHEDULES: usize = 5;

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("name", OptionKind::Str).required(),
        OptionSpec::new("vserver", OptionKind::Str),
        OptionSpec::new("schedule", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("count", OptionKind::List(&OptionKind::Int)),
        OptionSpec::new("snapmirror_label", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("prefix", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("enabled", OptionKind::Bool),
        OptionSpec::new("comment", OptionKind::Str),
    ],
    mutually_exclusive: &[],
    required_together: &[&["schedule", "count"]],
    required_if: &[],
};

const FIELDS: &[FieldMap] = &[
    FieldMap::new("comment", FieldKind::Str).rest("comment").zapi("comment"),
    FieldMap::new("enabled", FieldKind::Bool).rest("enabled").zapi("enabled"),
    // schedules, read and written by the adapter
    FieldMap::new("copies", FieldKind::DictSet),
];

/// One schedule of the policy
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduleCopy {
    schedule: String,
    count: i64,
    snapmirror_label: Option<String>,
    prefix: Option<String>,
    /// REST key of the schedule entry, known for current schedules only
    schedule_uuid: Option<String>,
}

impl ScheduleCopy {
    fn to_attr(&self) -> AttrValue {
        let mut dict = BTreeMap::from([
            ("schedule".to_string(), AttrValue::str(&self.schedule)),
            ("count".to_string(), AttrValue::Int(self.count)),
        ]);
        if let Some(label) = &self.snapmirror_label {
            dict.insert("snapmirror_label".to_string(), AttrValue::str(label));
        }
        if let Some(prefix) = &self.prefix {
            dict.insert("prefix".to_string(), AttrValue::str(prefix));
        }
        if let Some(uuid) = &self.schedule_uuid {
            dict.insert("schedule_uuid".to_string(), AttrValue::str(uuid));
        }
        AttrValue::Dict(dict)
    }

    fn from_attr(value: &AttrValue) -> Option<Self> {
        let dict = value.as_dict()?;
        let text = |key: &str| dict.get(key).and_then(AttrValue::as_str).map(str::to_string);
        Some(ScheduleCopy {
            schedule: text("schedule")?,
            count: dict.get("count").and_then(AttrValue::as_int)?,
            snapmirror_label: text("snapmirror_label"),
            prefix: text("prefix"),
            schedule_uuid: text("schedule_uuid"),
        })
    }

    fn from_rest(record: &Value) -> Option<Self> {
        Some(ScheduleCopy {
            schedule: rest_str(record, "schedule.name")?.to_string(),
            count: record.get("count").and_then(Value::as_i64)?,
            snapmirror_label: rest_str(record, "snapmirror_label").map(none_dash),
            prefix: rest_str(record, "prefix").map(str::to_string),
            schedule_uuid: rest_str(record, "schedule.uuid").map(str::to_string),
        })
    }

    fn from_zapi(info: &ZapiElement) -> Option<Self> {
        Some(ScheduleCopy {
            schedule: info.child_content("schedule")?.to_string(),
            count: info.child_content("count")?.parse().ok()?,
            snapmirror_label: info.child_content("snapmirror-label").map(none_dash),
            prefix: info.child_content("prefix").map(str::to_string),
            schedule_uuid: None,
        })
    }

    /// Entry of a REST `copies` array or `schedules` POST
    fn rest_body(&self) -> Value {
        let mut body = json!({"schedule": {"name": self.schedule}, "count": self.count});
        if let Some(label) = &self.snapmirror_label {
            body["snapmirror_label"] = json!(label);
        }
        if let Some(prefix) = &self.prefix {
            body["prefix"] = json!(prefix);
        }
        body
    }
}

/// The cluster reports a missing SnapMirror label as `-`
fn none_dash(label: &str) -> String {
    if label == "-" { String::new() } else { label.to_string() }
}

fn copies_of(attrs: &Attributes) -> Vec<ScheduleCopy> {
    attrs
        .get("copies")
        .and_then(AttrValue::as_items)
        .unwrap_or_default()
        .iter()
        .filter_map(ScheduleCopy::from_attr)
        .collect()
}

/// Schedule changes, in the order they are applied
#[derive(Debug, Default, PartialEq)]
struct ScheduleChanges {
    delete: Vec<ScheduleCopy>,
    modify: Vec<ScheduleCopy>,
    create: Vec<ScheduleCopy>,
}

impl ScheduleChanges {
    /// `modify` entries carry the current schedule uuid
    fn between(current: &[ScheduleCopy], desired: &[ScheduleCopy]) -> Self {
        let find = |copies: &[ScheduleCopy], schedule: &str| copies.iter().find(|c| c.schedule == schedule).cloned();
        let mut changes = ScheduleChanges {
            delete: current
                .iter()
                .filter(|have| find(desired, &have.schedule).is_none())
                .cloned()
                .collect(),
            ..ScheduleChanges::default()
        };
        for want in desired {
            match find(current, &want.schedule) {
                None => changes.create.push(want.clone()),
                Some(have) => {
                    let label_differs = want.snapmirror_label.is_some() && want.snapmirror_label != have.snapmirror_label;
                    if want.count != have.count || label_differs {
                        changes.modify.push(ScheduleCopy {
                            schedule_uuid: have.schedule_uuid,
                            ..want.clone()
                        });
                    }
                }
            }
        }
        changes
    }
}

pub struct SnapshotPolicy {
    name: String,
    vserver: Option<String>,
    state: DesiredState,
    desired: Attributes,
}

fn parallel_list<T>(
    params: &Params,
    option: &str,
    schedules: usize,
    what: &str,
    item: impl Fn(&AttrValue) -> Option<T>,
) -> Result<Option<Vec<T>>, ReconcileError> {
    let Some(items) = params.get(option).and_then(AttrValue::as_items) else {
        return Ok(None);
    };
    if items.len() != schedules {
        return Err(ReconcileError::Validation(format!(
            "Error: Each Snapshot Policy schedule must have an accompanying {what}"
        )));
    }
    Ok(Some(items.iter().filter_map(item).collect()))
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let mut desired = desired_from_params(params, FIELDS);
    if let Some(schedules) = params.str_list("schedule") {
        if schedules.len() > MAX_SCHEDULES {
            return Err(ReconcileError::Validation(format!(
                "Error: A Snapshot policy can have up to a maximum of {MAX_SCHEDULES} schedules, and a count \
                 representing maximum number of Snapshot copies for each schedule"
            )));
        }
        let n = schedules.len();
        let counts = parallel_list(params, "count", n, "count", AttrValue::as_int)?.unwrap_or_default();
        if counts.len() != n {
            return Err(ReconcileError::Validation(
                "Error: Each Snapshot Policy schedule must have an accompanying count".to_string(),
            ));
        }
        let text = |value: &AttrValue| value.as_str().map(str::to_string);
        let labels = parallel_list(params, "snapmirror_label", n, "SnapMirror Label", text)?;
        let prefixes = parallel_list(params, "prefix", n, "prefix", text)?;
        let copies = schedules
            .into_iter()
            .zip(counts)
            .enumerate()
            .map(|(i, (schedule, count))| {
                ScheduleCopy {
                    schedule,
                    count,
                    snapmirror_label: labels.as_ref().and_then(|labels| labels.get(i).cloned()),
                    prefix: prefixes.as_ref().and_then(|prefixes| prefixes.get(i).cloned()),
                    schedule_uuid: None,
                }
                .to_attr()
            })
            .collect();
        desired.insert("copies".to_string(), AttrValue::Set(copies));
    }
    Ok(Box::new(SnapshotPolicy {
        name: params.require_str("name")?.to_string(),
        vserver: params.str("vserver").map(str::to_string),
        state: DesiredState::from_params(params),
        desired,
    }))
}

impl SnapshotPolicy {
    async fn get_rest(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let mut query = vec![("name", name), ("fields", "uuid,name,comment,enabled,copies")];
        match &self.vserver {
            Some(vserver) => query.push(("svm.name", vserver.as_str())),
            None => query.push(("scope", "cluster")),
        }
        let Some(record) = session.rest().get_one_record(API, &query).await? else {
            return Ok(None);
        };
        let mut attrs = from_rest(FIELDS, &record);
        let copies: Vec<AttrValue> = record
            .get("copies")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(ScheduleCopy::from_rest)
            .map(|copy| copy.to_attr())
            .collect();
        attrs.insert("copies".to_string(), AttrValue::Set(copies));
        Ok(Some(Current::new(attrs).with_key(rest_uuid(&record))))
    }

    async fn get_zapi(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let mut query = vec![("policy", name)];
        if let Some(vserver) = &self.vserver {
            query.push(("vserver-name", vserver.as_str()));
        }
        let request = zapi_iter_request("snapshot-policy-get-iter", "snapshot-policy-info", &query);
        let Some(record) = zapi_get_one(session, request, self.vserver.as_deref()).await? else {
            return Ok(None);
        };
        let mut attrs = from_zapi(FIELDS, &record);
        let copies: Vec<AttrValue> = record
            .child("snapshot-policy-schedules")
            .map_or(&[][..], ZapiElement::children)
            .iter()
            .filter_map(ScheduleCopy::from_zapi)
            .map(|copy| copy.to_attr())
            .collect();
        attrs.insert("copies".to_string(), AttrValue::Set(copies));
        Ok(Some(Current::new(attrs)))
    }

    fn schedules_api(uuid: &str) -> String {
        format!("{API}/{uuid}/schedules")
    }

    async fn apply_rest(&self, session: &Session, uuid: &str, changes: &ScheduleChanges) -> Result<(), ReconcileError> {
        let api = Self::schedules_api(uuid);
        let rest = session.rest();
        for copy in &changes.delete {
            let key = copy.schedule_uuid.as_deref().ok_or_else(|| {
                ReconcileError::Internal(format!("schedule {} of {} has no uuid", copy.schedule, self.name))
            })?;
            rest.delete_async(&api, Some(key), None, &[]).await?;
        }
        for copy in &changes.modify {
            let key = copy.schedule_uuid.as_deref().ok_or_else(|| {
                ReconcileError::Internal(format!("schedule {} of {} has no uuid", copy.schedule, self.name))
            })?;
            let mut body = json!({"count": copy.count});
            if let Some(label) = &copy.snapmirror_label {
                body["snapmirror_label"] = json!(label);
            }
            rest.patch_async(&api, Some(key), body, &[]).await?;
        }
        for copy in &changes.create {
            rest.post_async(&api, copy.rest_body(), &[]).await?;
        }
        Ok(())
    }

    async fn apply_zapi(&self, session: &Session, changes: &ScheduleChanges) -> Result<(), ReconcileError> {
        let vserver = self.vserver.as_deref();
        for copy in &changes.delete {
            let request = ZapiElement::new("snapshot-policy-remove-schedule")
                .with_child("policy", &self.name)
                .with_child("schedule", &copy.schedule);
            session.zapi(request, vserver).await?;
        }
        for copy in &changes.modify {
            let mut request = ZapiElement::new("snapshot-policy-modify-schedule")
                .with_child("policy", &self.name)
                .with_child("schedule-name", &copy.schedule)
                .with_child("new-count", copy.count.to_string());
            if let Some(label) = &copy.snapmirror_label {
                request.add_new_child("new-snapmirror-label", label);
            }
            session.zapi(request, vserver).await?;
        }
        for copy in &changes.create {
            let mut request = ZapiElement::new("snapshot-policy-add-schedule")
                .with_child("policy", &self.name)
                .with_child("schedule", &copy.schedule)
                .with_child("count", copy.count.to_string());
            if let Some(label) = &copy.snapmirror_label {
                request.add_new_child("snapmirror-label", label);
            }
            if let Some(prefix) = &copy.prefix {
                request.add_new_child("prefix", prefix);
            }
            session.zapi(request, vserver).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for SnapshotPolicy {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn capabilities(&self, _dialect: Dialect) -> Capabilities {
        Capabilities::ALL.without_rename()
    }

    fn field_map(&self) -> &'static [FieldMap] {
        FIELDS
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    /// Compare schedules on the keys the caller supplied. The prefix of an
    /// existing schedule cannot be changed, so it only counts for new ones.
    fn prepare_diff(&self, _session: &Session, current: &mut Attributes, desired: &mut Attributes) {
        let existing: Vec<String> = copies_of(current).into_iter().map(|copy| copy.schedule).collect();
        if let Some(AttrValue::Set(copies)) = desired.get_mut("copies") {
            for copy in copies.iter_mut() {
                if let AttrValue::Dict(dict) = copy {
                    let scheduled = dict
                        .get("schedule")
                        .and_then(AttrValue::as_str)
                        .is_some_and(|schedule| existing.iter().any(|have| have == schedule));
                    if scheduled {
                        dict.remove("prefix");
                    }
                }
            }
        }
        let Some(wanted) = desired.get("copies") else {
            return;
        };
        let keys: Vec<String> = wanted
            .as_items()
            .unwrap_or_default()
            .iter()
            .filter_map(AttrValue::as_dict)
            .flat_map(|dict| dict.keys().cloned())
            .filter(|key| key != "prefix")
            .collect();
        if let Some(AttrValue::Set(copies)) = current.get_mut("copies") {
            for copy in copies.iter_mut() {
                if let AttrValue::Dict(dict) = copy {
                    dict.retain(|key, _| keys.contains(key));
                }
            }
        }
    }

    async fn get_current(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session, name).await
        } else {
            self.get_zapi(session, name).await
        }
    }

    async fn create(&self, session: &Session) -> Result<(), ReconcileError> {
        let copies = copies_of(&self.desired);
        if copies.is_empty() {
            return Err(ReconcileError::Precondition(
                "Error: schedule and count are required to create a snapshot policy".to_string(),
            ));
        }
        if session.is_rest() {
            let mut body = to_rest(FIELDS, &self.desired);
            body.insert("name".to_string(), json!(self.name));
            if let Some(vserver) = &self.vserver {
                body.insert("svm".to_string(), json!({"name": vserver}));
            }
            body.insert(
                "copies".to_string(),
                Value::Array(copies.iter().map(ScheduleCopy::rest_body).collect()),
            );
            session.rest().post_async(API, Value::Object(body), &[]).await?;
            return Ok(());
        }
        let enabled = self.desired.get("enabled").and_then(AttrValue::as_bool).unwrap_or(true);
        let mut request = ZapiElement::new("snapshot-policy-create")
            .with_child("policy", &self.name)
            .with_child("enabled", enabled.to_string());
        if let Some(comment) = self.desired.get("comment") {
            request.add_new_child("comment", comment.to_string());
        }
        for (i, copy) in copies.iter().enumerate() {
            let n = i + 1;
            request.add_new_child(format!("schedule{n}"), &copy.schedule);
            request.add_new_child(format!("count{n}"), copy.count.to_string());
            if let Some(label) = &copy.snapmirror_label {
                request.add_new_child(format!("snapmirror-label{n}"), label);
            }
            if let Some(prefix) = &copy.prefix {
                request.add_new_child(format!("prefix{n}"), prefix);
            }
        }
        session.zapi(request, self.vserver.as_deref()).await?;
        Ok(())
    }

    async fn modify(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        let policy: Attributes = modify
            .iter()
            .filter(|(attr, _)| attr.as_str() != "copies")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if policy.is_empty() {
            debug!("Snapshot policy {}: no policy field changes", self.name);
        } else if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            let body: Map<String, Value> = to_rest(FIELDS, &policy);
            session.rest().patch_async(API, Some(uuid), Value::Object(body), &[]).await?;
        } else {
            let mut request = ZapiElement::new("snapshot-policy-modify").with_child("policy", &self.name);
            for (attr, value) in &policy {
                request.add_new_child(attr.as_str(), value.to_string());
            }
            session.zapi(request, self.vserver.as_deref()).await?;
        }

        if modify.contains_key("copies") {
            let changes = ScheduleChanges::between(&copies_of(&current.attrs), &copies_of(&self.desired));
            debug!("Snapshot policy {}: schedule changes {:?}", self.name, changes);
            if session.is_rest() {
                self.apply_rest(session, current.require_key(KIND)?, &changes).await?;
            } else {
                self.apply_zapi(session, &changes).await?;
            }
        }
        Ok(Applied::Changed)
    }

    async fn delete(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().delete_async(API, Some(uuid), None, &[]).await?;
        } else {
            let request = ZapiElement::new("snapshot-policy-delete").with_child("policy", &self.name);
            session.zapi(request, self.vserver.as_deref()).await?;
        }
        Ok(())
    }
}
