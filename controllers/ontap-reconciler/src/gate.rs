//! Version and feature gate
//!
//! One annotation table per module decides which options each dialect can
//! serve. The gate applies it twice: before any network I/O (`use_rest:
//! never` with REST-only options) and after the dialect probe (minimum
//! versions, fallback to ZAPI or failure).

use ontap_client::{ClusterVersion, Dialect, OntapTransport, OntapVersion, UseRest, dialect};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::host::HostOptions;
use crate::model::AttrValue;
use crate::params::Params;

/// Dialect support of one module's options
#[derive(Debug, Clone, Copy)]
pub struct DialectAnnotations {
    /// Options REST cannot serve at any version
    pub rest_unsupported: &'static [&'static str],
    /// Options only REST can serve
    pub zapi_unsupported: &'static [&'static str],
    /// REST minimum version per option
    pub rest_minimum: &'static [(&'static str, OntapVersion)],
    /// The module has no ZAPI implementation
    pub rest_only: bool,
}

impl DialectAnnotations {
    pub const NONE: DialectAnnotations = DialectAnnotations {
        rest_unsupported: &[],
        zapi_unsupported: &[],
        rest_minimum: &[],
        rest_only: false,
    };

    fn set_options(names: &[&'static str], params: &Params) -> Vec<&'static str> {
        names.iter().copied().filter(|name| params.is_set_non_default(name)).collect()
    }
}

/// Dialect and version chosen for one reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub dialect: Dialect,
    pub version: ClusterVersion,
    pub warnings: Vec<String>,
}

fn require_rest(module: &str, options: &[&str], reason: &str) -> ReconcileError {
    if options.is_empty() {
        ReconcileError::Precondition(format!("Error: {module} only supports REST, {reason}."))
    } else {
        ReconcileError::Precondition(format!(
            "Error: REST is required for option(s): {}, {reason}.",
            options.join(", ")
        ))
    }
}

/// Checks that need no cluster: `use_rest: never` with REST-only options
pub fn check_before_connect(
    module: &str,
    annotations: &DialectAnnotations,
    params: &Params,
    use_rest: UseRest,
) -> Result<(), ReconcileError> {
    if use_rest != UseRest::Never {
        return Ok(());
    }
    if annotations.rest_only {
        return Err(require_rest(module, &[], "and use_rest is set to never"));
    }
    let rest_only = DialectAnnotations::set_options(annotations.zapi_unsupported, params);
    if !rest_only.is_empty() {
        return Err(require_rest(module, &rest_only, "and use_rest is set to never"));
    }
    Ok(())
}

/// Options set by the caller that need a newer REST than `version`
fn below_minimum(annotations: &DialectAnnotations, params: &Params, version: Option<OntapVersion>) -> Vec<(&'static str, OntapVersion)> {
    annotations
        .rest_minimum
        .iter()
        .copied()
        .filter(|(name, minimum)| params.is_set_non_default(name) && version.is_none_or(|v| v < *minimum))
        .collect()
}

/// Apply the forced version, warning when it hides the observed one
fn resolve_version(
    observed: Option<OntapVersion>,
    forced: Option<OntapVersion>,
    warnings: &mut Vec<String>,
) -> ClusterVersion {
    match (observed, forced) {
        (Some(observed), Some(forced)) if observed != forced => {
            warnings.push(format!(
                "Forcing ONTAP version to {forced} although the cluster reports {observed}"
            ));
            ClusterVersion::known(forced)
        }
        (None, Some(forced)) => {
            warnings.push(format!(
                "Forcing ONTAP version to {forced}, the cluster version could not be read"
            ));
            ClusterVersion::known(forced)
        }
        (Some(version), _) => ClusterVersion::known(version),
        (None, None) => ClusterVersion::unknown(),
    }
}

/// Cluster version over ZAPI; an unreadable version is left unknown
async fn zapi_version(transport: &dyn OntapTransport) -> Option<OntapVersion> {
    match dialect::zapi_cluster_version(transport).await {
        Ok(version) => Some(version),
        Err(err) => {
            debug!("Unable to read the cluster version over ZAPI: {}", err);
            None
        }
    }
}

/// Probe the cluster and settle the dialect for this reconciliation.
pub async fn choose_dialect(
    transport: &dyn OntapTransport,
    module: &str,
    annotations: &DialectAnnotations,
    params: &Params,
    host: &HostOptions,
) -> Result<GateDecision, ReconcileError> {
    let probe = dialect::select_dialect(transport, host.use_rest).await?;
    let mut warnings = Vec::new();

    if probe.dialect == Dialect::Zapi {
        if let Some(fault) = &probe.fault {
            debug!("REST probe fault: {}", fault);
            let reason = format!("but REST is not available: {fault}");
            if annotations.rest_only {
                return Err(require_rest(module, &[], &reason));
            }
            let rest_only = DialectAnnotations::set_options(annotations.zapi_unsupported, params);
            if !rest_only.is_empty() {
                return Err(require_rest(module, &rest_only, &reason));
            }
        }
        let observed = match probe.version {
            Some(version) => Some(version),
            None => zapi_version(transport).await,
        };
        let version = resolve_version(observed, host.force_ontap_version, &mut warnings);
        info!("Using ZAPI for {} on {} ({:?})", module, transport.host(), version.version);
        return Ok(GateDecision {
            dialect: Dialect::Zapi,
            version,
            warnings,
        });
    }

    let version = resolve_version(probe.version, host.force_ontap_version, &mut warnings);
    let unsupported = DialectAnnotations::set_options(annotations.rest_unsupported, params);
    let too_old = below_minimum(annotations, params, version.version);
    let blocking: Vec<String> = unsupported
        .iter()
        .map(|name| (*name).to_string())
        .chain(too_old.iter().map(|(name, _)| (*name).to_string()))
        .collect();

    if blocking.is_empty() {
        info!("Using REST for {} on {} ({:?})", module, transport.host(), version.version);
        return Ok(GateDecision {
            dialect: Dialect::Rest,
            version,
            warnings,
        });
    }

    let fail = || {
        if let Some(name) = unsupported.first() {
            ReconcileError::Precondition(format!("REST API currently does not support '{name}'"))
        } else {
            let messages: Vec<String> = too_old
                .iter()
                .map(|(name, minimum)| format!("Minimum version of ONTAP for {name} is {}", minimum.as_tuple()))
                .collect();
            ReconcileError::Precondition(messages.join(". "))
        }
    };

    let can_fall_back = host.use_rest == UseRest::Auto
        && !annotations.rest_only
        && DialectAnnotations::set_options(annotations.zapi_unsupported, params).is_empty();
    if !can_fall_back {
        return Err(fail());
    }

    for name in &blocking {
        let message = format!("Falling back to ZAPI because of unsupported option {name}");
        warn!("{}", message);
        warnings.push(message);
    }
    Ok(GateDecision {
        dialect: Dialect::Zapi,
        version,
        warnings,
    })
}

/// Refusal for a change to an attribute that cannot be modified in place
pub fn not_modifiable(attr: &str, desired: &AttrValue) -> ReconcileError {
    ReconcileError::Precondition(format!("Error: {attr} is not modifiable. Cannot change to: {desired}."))
}
