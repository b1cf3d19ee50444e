//! Module adapters
//!
//! One file per managed resource type. Each module exports its parameter
//! schema, its dialect annotations and a `build` function turning validated
//! parameters into a [`ResourceAdapter`].
//!
//! Handles: aggregates, LUNs, LUN maps, QoS policy groups, snapshot
//! policies, user roles, UNIX groups, service processor networks,
//! autosupport, quota rules, software updates

pub mod aggregate;
pub mod autosupport;
pub mod lun;
pub mod lun_map;
#[cfg(test)]
mod lun_map_test;
pub mod qos_policy_group;
pub mod quota_rule;
pub mod service_processor_network;
#[cfg(test)]
mod service_processor_network_test;
pub mod snapshot_policy;
pub mod software_update;
#[cfg(test)]
mod software_update_test;
pub mod unix_group;
pub mod user_role;

use crate::adapter::ResourceAdapter;
use crate::error::ReconcileError;
use crate::gate::DialectAnnotations;
use crate::params::{ModuleSchema, Params};

/// Builds a module's adapter from validated parameters
pub type BuildFn = fn(&Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError>;

/// Registry entry
#[derive(Debug)]
pub struct ModuleDef {
    pub name: &'static str,
    pub schema: &'static ModuleSchema,
    pub annotations: &'static DialectAnnotations,
    pub build: BuildFn,
}

pub const MODULES: &[ModuleDef] = &[
    ModuleDef {
        name: "aggregate",
        schema: &aggregate::SCHEMA,
        annotations: &aggregate::ANNOTATIONS,
        build: aggregate::build,
    },
    ModuleDef {
        name: "autosupport",
        schema: &autosupport::SCHEMA,
        annotations: &autosupport::ANNOTATIONS,
        build: autosupport::build,
    },
    ModuleDef {
        name: "lun",
        schema: &lun::SCHEMA,
        annotations: &lun::ANNOTATIONS,
        build: lun::build,
    },
    ModuleDef {
        name: "lun_map",
        schema: &lun_map::SCHEMA,
        annotations: &DialectAnnotations::NONE,
        build: lun_map::build,
    },
    ModuleDef {
        name: "qos_policy_group",
        schema: &qos_policy_group::SCHEMA,
        annotations: &DialectAnnotations::NONE,
        build: qos_policy_group::build,
    },
    ModuleDef {
        name: "quota_rule",
        schema: &quota_rule::SCHEMA,
        annotations: &quota_rule::ANNOTATIONS,
        build: quota_rule::build,
    },
    ModuleDef {
        name: "service_processor_network",
        schema: &service_processor_network::SCHEMA,
        annotations: &DialectAnnotations::NONE,
        build: service_processor_network::build,
    },
    ModuleDef {
        name: "snapshot_policy",
        schema: &snapshot_policy::SCHEMA,
        annotations: &DialectAnnotations::NONE,
        build: snapshot_policy::build,
    },
    ModuleDef {
        name: "software_update",
        schema: &software_update::SCHEMA,
        annotations: &software_update::ANNOTATIONS,
        build: software_update::build,
    },
    ModuleDef {
        name: "unix_group",
        schema: &unix_group::SCHEMA,
        annotations: &DialectAnnotations::NONE,
        build: unix_group::build,
    },
    ModuleDef {
        name: "user_role",
        schema: &user_role::SCHEMA,
        annotations: &DialectAnnotations::NONE,
        build: user_role::build,
    },
];

/// Look up a module by name
pub fn find(name: &str) -> Option<&'static ModuleDef> {
    MODULES.iter().find(|module| module.name == name)
}
