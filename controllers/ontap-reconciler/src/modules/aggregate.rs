//! Aggregates
//!
//! Node-scoped disk pools. Disk and RAID layout are chosen at creation and
//! only the disk count can grow afterwards. An object store can be attached
//! once, right after creation or later; `service_state` toggles the
//! aggregate online or offline.

use std::time::Duration;

use async_trait::async_trait;
use ontap_client::{Dialect, OntapVersion, ZapiElement};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::adapter::{
    Applied, Capabilities, Current, DesiredState, ResourceAdapter, desired_from_params, rest_str, rest_uuid,
    zapi_get_one, zapi_iter_request,
};
use crate::backoff::PollBudget;
use crate::error::ReconcileError;
use crate::gate::DialectAnnotations;
use crate::kernel::plan::{CdAction, ChangePlan};
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest, from_zapi, rest_fields, set_json_path, to_rest};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "aggregate";
const API: &str = "storage/aggregates";

/// Seconds between two reads while waiting for the aggregate to come online
const ONLINE_POLL_SECONDS: u64 = 10;

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("name", OptionKind::Str).required(),
        OptionSpec::new("from_name", OptionKind::Str),
        OptionSpec::new("nodes", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("disk_count", OptionKind::Int),
        OptionSpec::new("disk_class", OptionKind::Str),
        OptionSpec::new("disks", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("raid_type", OptionKind::Str),
        OptionSpec::new("raid_size", OptionKind::Int),
        OptionSpec::new("is_mirrored", OptionKind::Bool),
        OptionSpec::new(
            "snaplock_type",
            OptionKind::Choice(&["compliance", "enterprise", "non_snaplock"]),
        ),
        OptionSpec::new("service_state", OptionKind::Choice(&["online", "offline"])),
        OptionSpec::new("unmount_volumes", OptionKind::Bool),
        OptionSpec::new("object_store_name", OptionKind::Str),
        OptionSpec::new("allow_flexgroups", OptionKind::Bool),
        OptionSpec::new("wait_for_online", OptionKind::Bool).default("false"),
        OptionSpec::new("time_out", OptionKind::Int).default("100"),
    ],
    mutually_exclusive: &[&["is_mirrored", "disks"]],
    required_together: &[],
    required_if: &[],
};

pub const ANNOTATIONS: DialectAnnotations = DialectAnnotations {
    rest_unsupported: &["disks", "unmount_volumes"],
    zapi_unsupported: &[],
    rest_minimum: &[("allow_flexgroups", OntapVersion::new(9, 8, 0))],
    rest_only: false,
};

const FIELDS: &[FieldMap] = &[
    FieldMap::new("disk_count", FieldKind::Int)
        .rest("block_storage.primary.disk_count")
        .zapi("aggr-raid-attributes/disk-count"),
    FieldMap::new("disk_class", FieldKind::Str)
        .rest("block_storage.primary.disk_class")
        .create_only(),
    FieldMap::new("raid_type", FieldKind::Str)
        .rest("block_storage.primary.raid_type")
        .zapi("aggr-raid-attributes/raid-type")
        .create_only(),
    FieldMap::new("raid_size", FieldKind::Int)
        .rest("block_storage.primary.raid_size")
        .zapi("aggr-raid-attributes/raid-size")
        .create_only(),
    FieldMap::new("is_mirrored", FieldKind::Bool)
        .rest("block_storage.mirror.enabled")
        .zapi("aggr-raid-attributes/is-mirrored")
        .create_only(),
    FieldMap::new("snaplock_type", FieldKind::Str)
        .rest("snaplock_type")
        .zapi("aggr-snaplock-attributes/snaplock-type")
        .immutable(),
    FieldMap::new("service_state", FieldKind::Str)
        .rest("state")
        .zapi("aggr-raid-attributes/state"),
    // read from the cloud-stores sub-resource
    FieldMap::new("object_store_name", FieldKind::Str),
];

/// Tags of `aggr-create` for the create-time attributes
const ZAPI_CREATE_TAGS: &[(&str, &str)] = &[
    ("disk_count", "disk-count"),
    ("disk_class", "disk-type"),
    ("raid_type", "raid-type"),
    ("raid_size", "raid-size"),
    ("is_mirrored", "is-mirrored"),
    ("snaplock_type", "snaplock-type"),
];

pub struct Aggregate {
    name: String,
    from_name: Option<String>,
    state: DesiredState,
    nodes: Vec<String>,
    disks: Vec<String>,
    unmount_volumes: bool,
    allow_flexgroups: Option<bool>,
    wait_for_online: bool,
    time_out: u64,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let time_out = params.int("time_out").unwrap_or(100);
    let time_out = u64::try_from(time_out)
        .map_err(|_| ReconcileError::Validation(format!("time_out must not be negative, got: {time_out}")))?;
    Ok(Box::new(Aggregate {
        name: params.require_str("name")?.to_string(),
        from_name: params.str("from_name").map(str::to_string),
        state: DesiredState::from_params(params),
        nodes: params.str_list("nodes").unwrap_or_default(),
        disks: params.str_list("disks").unwrap_or_default(),
        unmount_volumes: params.flag("unmount_volumes"),
        allow_flexgroups: params.bool("allow_flexgroups"),
        wait_for_online: params.flag("wait_for_online"),
        time_out,
        desired: desired_from_params(params, FIELDS),
    }))
}

impl Aggregate {
    fn wants_object_store(&self) -> bool {
        self.desired.contains_key("object_store_name")
    }

    /// Desired attributes sent with the create call
    fn create_attrs(&self) -> Attributes {
        self.desired
            .iter()
            .filter(|(attr, _)| !self.post_create_attrs().contains(&attr.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn get_rest(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let fields = rest_fields(FIELDS, session.version(), &["uuid", "name", "node.name"]);
        let Some(record) = session
            .rest()
            .get_one_record(API, &[("name", name), ("fields", &fields)])
            .await?
        else {
            return Ok(None);
        };
        let mut current = Current::new(from_rest(FIELDS, &record)).with_key(rest_uuid(&record));
        if self.wants_object_store() {
            let uuid = current.require_key(KIND)?;
            let stores = session
                .rest()
                .get_records(&format!("{API}/{uuid}/cloud-stores"), &[("fields", "target.name")])
                .await?;
            if let Some(store) = stores.first().and_then(|store| rest_str(store, "target.name")) {
                current.attrs.insert("object_store_name".to_string(), AttrValue::str(store));
            }
        }
        Ok(Some(current))
    }

    async fn get_zapi(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let request = zapi_iter_request("aggr-get-iter", "aggr-attributes", &[("aggregate-name", name)]);
        let Some(record) = zapi_get_one(session, request, None).await? else {
            return Ok(None);
        };
        let mut current = Current::new(from_zapi(FIELDS, &record));
        if self.wants_object_store() {
            let request = zapi_iter_request(
                "aggr-object-store-get-iter",
                "object-store-information",
                &[("aggregate", name)],
            );
            let store = zapi_get_one(session, request, None).await?;
            if let Some(store) = store.as_ref().and_then(|info| info.child_content("object-store-name")) {
                current.attrs.insert("object_store_name".to_string(), AttrValue::str(store));
            }
        }
        Ok(Some(current))
    }

    async fn create_rest(&self, session: &Session) -> Result<(), ReconcileError> {
        if self.nodes.len() > 1 {
            return Err(ReconcileError::Precondition(
                "Error: only one node can be specified when creating an aggregate with REST".to_string(),
            ));
        }
        let mut body = to_rest(FIELDS, &self.create_attrs());
        body.insert("name".to_string(), json!(self.name));
        if let Some(node) = self.nodes.first() {
            set_json_path(&mut body, "node.name", json!(node));
        }
        session.rest().post_async(API, Value::Object(body), &[]).await?;
        Ok(())
    }

    async fn create_zapi(&self, session: &Session) -> Result<(), ReconcileError> {
        let mut request = ZapiElement::new("aggr-create").with_child("aggregate", &self.name);
        let attrs = self.create_attrs();
        for (attr, tag) in ZAPI_CREATE_TAGS {
            if let Some(value) = attrs.get(*attr) {
                request.add_new_child(*tag, value.to_string());
            }
        }
        if !self.nodes.is_empty() {
            let nodes = request.path_mut("nodes");
            for node in &self.nodes {
                nodes.add_new_child("node-name", node);
            }
        }
        if !self.disks.is_empty() {
            let disks = request.path_mut("disks");
            for disk in &self.disks {
                disks.add_child(ZapiElement::new("disk-info").with_child("name", disk));
            }
        }
        session.zapi(request, None).await?;
        Ok(())
    }

    async fn add_disks(&self, session: &Session, current: &Current, count: i64) -> Result<(), ReconcileError> {
        let have = current.attrs.get("disk_count").and_then(AttrValue::as_int).unwrap_or(0);
        if count < have {
            return Err(ReconcileError::Precondition(format!(
                "Error: specified disk_count is less than current disk_count. \
                 Only adding disks is allowed. Current: {have}, desired: {count}."
            )));
        }
        info!("Adding {} disk(s) to aggregate {}", count - have, self.name);
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session
                .rest()
                .patch_async(API, Some(uuid), json!({"block_storage": {"primary": {"disk_count": count}}}), &[])
                .await?;
        } else {
            let request = ZapiElement::new("aggr-add")
                .with_child("aggregate", &self.name)
                .with_child("disk-count", (count - have).to_string());
            session.zapi(request, None).await?;
        }
        Ok(())
    }

    async fn attach_object_store(&self, session: &Session, current: &Current, store: &str) -> Result<(), ReconcileError> {
        if let Some(attached) = current.str("object_store_name") {
            return Err(ReconcileError::Precondition(format!(
                "Error: object store {attached} is already associated with aggregate {}.",
                self.name
            )));
        }
        info!("Attaching object store {} to aggregate {}", store, self.name);
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            let target = session
                .rest()
                .get_one_record("cloud/targets", &[("name", store), ("fields", "uuid")])
                .await?
                .ok_or_else(|| ReconcileError::Precondition(format!("Error: object store {store} not found")))?;
            let mut body = json!({"target": {"uuid": rest_uuid(&target)}});
            if let Some(allow) = self.allow_flexgroups {
                body["allow_flexgroups"] = json!(allow);
            }
            session
                .rest()
                .post_async(&format!("{API}/{uuid}/cloud-stores"), body, &[])
                .await?;
        } else {
            let mut request = ZapiElement::new("aggr-object-store-attach")
                .with_child("aggregate", &self.name)
                .with_child("object-store-name", store);
            if let Some(allow) = self.allow_flexgroups {
                request.add_new_child("allow-flexgroup", allow.to_string());
            }
            session.zapi(request, None).await?;
        }
        Ok(())
    }

    async fn set_service_state(&self, session: &Session, current: &Current, state: &str) -> Result<(), ReconcileError> {
        info!("Setting aggregate {} {}", self.name, state);
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().patch_async(API, Some(uuid), json!({"state": state}), &[]).await?;
            return Ok(());
        }
        let request = if state == "online" {
            ZapiElement::new("aggr-online")
                .with_child("aggregate", &self.name)
                .with_child("force-online", "true")
        } else {
            ZapiElement::new("aggr-offline")
                .with_child("aggregate", &self.name)
                .with_child("force-offline", "false")
                .with_child("unmount-volumes", self.unmount_volumes.to_string())
        };
        session.zapi(request, None).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for Aggregate {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn from_name(&self) -> Option<&str> {
        self.from_name.as_deref()
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn capabilities(&self, _dialect: Dialect) -> Capabilities {
        Capabilities::ALL
    }

    fn field_map(&self) -> &'static [FieldMap] {
        FIELDS
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    fn post_create_attrs(&self) -> &'static [&'static str] {
        &["object_store_name", "service_state"]
    }

    async fn get_current(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session, name).await
        } else {
            self.get_zapi(session, name).await
        }
    }

    async fn create(&self, session: &Session) -> Result<(), ReconcileError> {
        if session.is_rest() {
            self.create_rest(session).await
        } else {
            self.create_zapi(session).await
        }
    }

    async fn rename(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().patch_async(API, Some(uuid), json!({"name": self.name}), &[]).await?;
        } else {
            let from = self.from_name.as_deref().unwrap_or_default();
            let request = ZapiElement::new("aggr-rename")
                .with_child("aggregate", from)
                .with_child("new-aggregate-name", &self.name);
            session.zapi(request, None).await?;
        }
        Ok(())
    }

    async fn modify(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        if let Some(count) = modify.get("disk_count").and_then(AttrValue::as_int) {
            self.add_disks(session, current, count).await?;
        }
        if let Some(store) = modify.get("object_store_name").and_then(AttrValue::as_str) {
            self.attach_object_store(session, current, store).await?;
        }
        if let Some(state) = modify.get("service_state").and_then(AttrValue::as_str) {
            self.set_service_state(session, current, state).await?;
        }
        Ok(Applied::Changed)
    }

    async fn delete(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().delete_async(API, Some(uuid), None, &[]).await?;
            return Ok(());
        }
        if current.str("service_state") == Some("online") {
            self.set_service_state(session, current, "offline").await?;
        }
        session
            .zapi(ZapiElement::new("aggr-destroy").with_child("aggregate", &self.name), None)
            .await?;
        Ok(())
    }

    async fn wait_for_completion(&self, session: &Session, plan: &ChangePlan) -> Result<(), ReconcileError> {
        let target = self
            .desired
            .get("service_state")
            .and_then(AttrValue::as_str)
            .unwrap_or("online");
        if !self.wait_for_online || target != "online" || plan.cd_action == Some(CdAction::Delete) {
            return Ok(());
        }
        let attempts = u32::try_from(self.time_out.div_ceil(ONLINE_POLL_SECONDS)).unwrap_or(u32::MAX);
        let mut budget = PollBudget::new(attempts, Duration::from_secs(ONLINE_POLL_SECONDS));
        let mut state = String::from("unknown");
        loop {
            if let Some(current) = self.get_current(session, &self.name).await? {
                if current.str("service_state") == Some("online") {
                    return Ok(());
                }
                state = current.str("service_state").unwrap_or("unknown").to_string();
            }
            debug!("Aggregate {} is {}, waiting for online", self.name, state);
            if !budget.try_consume() {
                break;
            }
            budget.pause().await;
        }
        Err(ReconcileError::PostCondition(format!(
            "Error: aggregate '{}' is not online after {} seconds, state: {}",
            self.name,
            budget.total_seconds(),
            state
        )))
    }
}
