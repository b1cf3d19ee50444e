//! User roles
//!
//! A role is a named set of privileges owned by an SVM (or the admin SVM for
//! cluster roles). Each privilege grants an access level on a command
//! directory or REST path, optionally narrowed by a query. Privileges are
//! compared as a set keyed by path.
//!
//! Over REST the role is renamed in place and privileges are edited one by
//! one under `security/roles/{owner}/{name}/privileges`. ZAPI stores one
//! entry per command directory and has no rename.
//!
//! Privilege edits run additions, then changes, then removals: a role must
//! keep at least one privilege, so replacing its only entry cannot start
//! with the removal.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ontap_client::zapi::iter_records;
use ontap_client::{Dialect, ZapiElement};
use serde_json::{Value, json};
use tracing::debug;

use crate::adapter::{Applied, Capabilities, Current, DesiredState, ResourceAdapter, rest_str, zapi_iter_request};
use crate::error::ReconcileError;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "user role";
const API: &str = "security/roles";

const ACCESS_LEVELS: &[&str] = &["all", "readonly", "none", "read_create", "read_modify", "read_create_modify"];

const PRIVILEGE: &[OptionSpec] = &[
    OptionSpec::new("path", OptionKind::Str).required(),
    OptionSpec::new("access", OptionKind::Choice(ACCESS_LEVELS)).default("all"),
    OptionSpec::new("query", OptionKind::Str),
];

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("name", OptionKind::Str).required(),
        OptionSpec::new("from_name", OptionKind::Str),
        OptionSpec::new("vserver", OptionKind::Str).required(),
        OptionSpec::new("privileges", OptionKind::List(&OptionKind::Dict(PRIVILEGE))),
        OptionSpec::new("command_directory_name", OptionKind::Str),
        OptionSpec::new("access_level", OptionKind::Choice(ACCESS_LEVELS)),
        OptionSpec::new("query", OptionKind::Str),
    ],
    mutually_exclusive: &[&["privileges", "command_directory_name"]],
    required_together: &[],
    required_if: &[],
};

const FIELDS: &[FieldMap] = &[
    // read and written per privilege by the adapter
    FieldMap::new("privileges", FieldKind::DictSet),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Privilege {
    path: String,
    access: String,
    query: Option<String>,
}

impl Privilege {
    fn to_attr(&self) -> AttrValue {
        let mut dict = BTreeMap::from([
            ("path".to_string(), AttrValue::str(&self.path)),
            ("access".to_string(), AttrValue::str(&self.access)),
        ]);
        if let Some(query) = &self.query {
            dict.insert("query".to_string(), AttrValue::str(query));
        }
        AttrValue::Dict(dict)
    }

    fn from_attr(value: &AttrValue) -> Option<Self> {
        let dict = value.as_dict()?;
        let text = |key: &str| dict.get(key).and_then(AttrValue::as_str).map(str::to_string);
        Some(Privilege {
            path: text("path")?,
            access: text("access").unwrap_or_else(|| "all".to_string()),
            query: text("query").filter(|query| !query.is_empty()),
        })
    }

    fn from_rest(record: &Value) -> Option<Self> {
        Some(Privilege {
            path: rest_str(record, "path")?.to_string(),
            access: rest_str(record, "access").unwrap_or("all").to_string(),
            query: rest_str(record, "query").filter(|query| !query.is_empty()).map(str::to_string),
        })
    }

    fn from_zapi(info: &ZapiElement) -> Option<Self> {
        Some(Privilege {
            path: info.child_content("command-directory-name")?.to_string(),
            access: info.child_content("access-level").unwrap_or("all").to_string(),
            query: info
                .child_content("role-query")
                .filter(|query| !query.is_empty())
                .map(str::to_string),
        })
    }

    fn rest_body(&self) -> Value {
        let mut body = json!({"path": self.path, "access": self.access});
        if let Some(query) = &self.query {
            body["query"] = json!(query);
        }
        body
    }

    /// Key of the privilege under `.../privileges`
    fn rest_key(&self) -> String {
        urlencoding::encode(&self.path).into_owned()
    }
}

fn privileges_of(attrs: &Attributes) -> Vec<Privilege> {
    attrs
        .get("privileges")
        .and_then(AttrValue::as_items)
        .unwrap_or_default()
        .iter()
        .filter_map(Privilege::from_attr)
        .collect()
}

fn privileges_attr(privileges: impl IntoIterator<Item = Privilege>) -> AttrValue {
    AttrValue::Set(privileges.into_iter().map(|privilege| privilege.to_attr()).collect())
}

/// Privilege changes, as `(create, modify, delete)`
fn privilege_changes(current: &[Privilege], desired: &[Privilege]) -> (Vec<Privilege>, Vec<Privilege>, Vec<Privilege>) {
    let find = |privileges: &[Privilege], path: &str| privileges.iter().find(|p| p.path == path).cloned();
    let mut create = Vec::new();
    let mut modify = Vec::new();
    for want in desired {
        match find(current, &want.path) {
            None => create.push(want.clone()),
            Some(have) if have != *want => modify.push(want.clone()),
            Some(_) => {}
        }
    }
    let delete = current
        .iter()
        .filter(|have| find(desired, &have.path).is_none())
        .cloned()
        .collect();
    (create, modify, delete)
}

pub struct UserRole {
    name: String,
    from_name: Option<String>,
    vserver: String,
    state: DesiredState,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let mut desired = Attributes::new();
    if let Some(privileges) = params.get("privileges") {
        let privileges = privileges
            .as_items()
            .unwrap_or_default()
            .iter()
            .filter_map(Privilege::from_attr);
        desired.insert("privileges".to_string(), privileges_attr(privileges));
    } else if let Some(directory) = params.str("command_directory_name") {
        let privilege = Privilege {
            path: directory.to_string(),
            access: params.str("access_level").unwrap_or("all").to_string(),
            query: params.str("query").map(str::to_string),
        };
        desired.insert("privileges".to_string(), privileges_attr([privilege]));
    }
    Ok(Box::new(UserRole {
        name: params.require_str("name")?.to_string(),
        from_name: params.str("from_name").map(str::to_string),
        vserver: params.require_str("vserver")?.to_string(),
        state: DesiredState::from_params(params),
        desired,
    }))
}

impl UserRole {
    /// `{owner uuid}/{role name}`
    fn role_key(current: &Current, name: &str) -> Result<String, ReconcileError> {
        let owner = current
            .parent
            .as_deref()
            .ok_or_else(|| ReconcileError::Internal(format!("{KIND} {name} has no owner uuid")))?;
        Ok(format!("{owner}/{}", urlencoding::encode(name)))
    }

    async fn get_rest(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let record = session
            .rest()
            .get_one_record(
                API,
                &[("name", name), ("owner.name", &self.vserver), ("fields", "name,owner.uuid,privileges")],
            )
            .await?;
        Ok(record.map(|record| {
            let privileges = record
                .get("privileges")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(Privilege::from_rest)
                .collect::<Vec<_>>();
            let attrs = Attributes::from([("privileges".to_string(), privileges_attr(privileges))]);
            Current::new(attrs)
                .with_key(rest_str(&record, "name").map(str::to_string))
                .with_parent(rest_str(&record, "owner.uuid").map(str::to_string))
        }))
    }

    async fn get_zapi(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let request = zapi_iter_request(
            "security-login-role-get-iter",
            "security-login-role-info",
            &[("role-name", name), ("vserver", &self.vserver)],
        );
        let results = session.zapi(request, None).await?;
        let privileges: Vec<Privilege> = iter_records(&results).iter().filter_map(Privilege::from_zapi).collect();
        if privileges.is_empty() {
            return Ok(None);
        }
        let attrs = Attributes::from([("privileges".to_string(), privileges_attr(privileges))]);
        Ok(Some(Current::new(attrs)))
    }

    fn zapi_entry(&self, api: &str, privilege: &Privilege, with_access: bool) -> ZapiElement {
        let mut request = ZapiElement::new(api)
            .with_child("role-name", &self.name)
            .with_child("vserver", &self.vserver)
            .with_child("command-directory-name", &privilege.path);
        if with_access {
            request.add_new_child("access-level", &privilege.access);
            if let Some(query) = &privilege.query {
                request.add_new_child("role-query", query);
            }
        }
        request
    }

    async fn modify_rest(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        let api = format!("{API}/{}/privileges", Self::role_key(current, &self.name)?);
        // read again: a rename may have happened since the role was fetched
        // privilege queries came with 9.11.1
        let fields = if session.meets_minimum(9, 11, 1) { "path,access,query" } else { "path,access" };
        let records = session.rest().get_records(&api, &[("fields", fields)]).await?;
        let have: Vec<Privilege> = records.iter().filter_map(Privilege::from_rest).collect();
        let (create, modify, delete) = privilege_changes(&have, &privileges_of(&self.desired));
        debug!(
            "Role {}: {} privilege(s) to add, {} to change, {} to remove",
            self.name,
            create.len(),
            modify.len(),
            delete.len()
        );
        let rest = session.rest();
        // additions first: the last privilege of a role cannot be removed
        for privilege in &create {
            rest.post_async(&api, privilege.rest_body(), &[]).await?;
        }
        for privilege in &modify {
            let mut body = json!({"access": privilege.access});
            if let Some(query) = &privilege.query {
                body["query"] = json!(query);
            }
            rest.patch_async(&api, Some(privilege.rest_key().as_str()), body, &[]).await?;
        }
        for privilege in &delete {
            rest.delete_async(&api, Some(privilege.rest_key().as_str()), None, &[]).await?;
        }
        Ok(())
    }

    async fn modify_zapi(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        let (create, modify, delete) = privilege_changes(&privileges_of(&current.attrs), &privileges_of(&self.desired));
        // same order as over REST
        for privilege in &create {
            session
                .zapi(self.zapi_entry("security-login-role-create", privilege, true), None)
                .await?;
        }
        for privilege in &modify {
            session
                .zapi(self.zapi_entry("security-login-role-modify", privilege, true), None)
                .await?;
        }
        for privilege in &delete {
            session
                .zapi(self.zapi_entry("security-login-role-delete", privilege, false), None)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for UserRole {
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

    fn capabilities(&self, dialect: Dialect) -> Capabilities {
        match dialect {
            Dialect::Rest => Capabilities::ALL,
            Dialect::Zapi => Capabilities::ALL.without_rename(),
        }
    }

    fn field_map(&self) -> &'static [FieldMap] {
        FIELDS
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    /// A privilege without a query matches whatever query the cluster reports
    fn prepare_diff(&self, _session: &Session, current: &mut Attributes, desired: &mut Attributes) {
        let wanted = privileges_of(desired);
        let trimmed = privileges_of(current).into_iter().map(|mut have| {
            if wanted.iter().any(|want| want.path == have.path && want.query.is_none()) {
                have.query = None;
            }
            have
        });
        let trimmed = privileges_attr(trimmed);
        if current.contains_key("privileges") {
            current.insert("privileges".to_string(), trimmed);
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
        let privileges = privileges_of(&self.desired);
        if privileges.is_empty() {
            return Err(ReconcileError::Precondition(
                "Error: privileges or command_directory_name is required to create a user role".to_string(),
            ));
        }
        if session.is_rest() {
            let body = json!({
                "name": self.name,
                "owner": {"name": self.vserver},
                "privileges": privileges.iter().map(Privilege::rest_body).collect::<Vec<_>>(),
            });
            session.rest().post_async(API, body, &[]).await?;
            return Ok(());
        }
        for privilege in &privileges {
            session
                .zapi(self.zapi_entry("security-login-role-create", privilege, true), None)
                .await?;
        }
        Ok(())
    }

    async fn rename(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        let from = current.key.as_deref().or(self.from_name.as_deref()).unwrap_or_default();
        let key = Self::role_key(current, from)?;
        session.rest().patch_async(API, Some(key.as_str()), json!({"name": self.name}), &[]).await?;
        Ok(())
    }

    async fn modify(&self, session: &Session, current: &Current, _modify: &Attributes) -> Result<Applied, ReconcileError> {
        if session.is_rest() {
            self.modify_rest(session, current).await?;
        } else {
            self.modify_zapi(session, current).await?;
        }
        Ok(Applied::Changed)
    }

    async fn delete(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let key = Self::role_key(current, &self.name)?;
            session.rest().delete_async(API, Some(key.as_str()), None, &[]).await?;
            return Ok(());
        }
        for privilege in &privileges_of(&current.attrs) {
            session
                .zapi(self.zapi_entry("security-login-role-delete", privilege, false), None)
                .await?;
        }
        Ok(())
    }
}
