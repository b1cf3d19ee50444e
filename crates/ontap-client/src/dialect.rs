//! Dialect selection
//!
//! Decides whether a reconciliation talks REST or ZAPI, probing the cluster
//! when the policy is `auto`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::error::OntapError;
use crate::ontap_trait::{Method, OntapTransport, RestRequest};
use crate::rest::rest_error;
use crate::version::{OntapVersion, RestVersion};
use crate::zapi::ZapiElement;

/// Connection attempts made by the version probe
const PROBE_ATTEMPTS: u32 = 3;
const PROBE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// `use_rest` host option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseRest {
    /// ZAPI only
    Never,
    /// REST only
    Always,
    /// Probe, then prefer REST
    #[default]
    Auto,
}

impl FromStr for UseRest {
    type Err = OntapError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "never" => Ok(UseRest::Never),
            "always" => Ok(UseRest::Always),
            "auto" => Ok(UseRest::Auto),
            other => Err(OntapError::InvalidConfig(format!(
                "use_rest must be one of never, always, auto, got: {other}"
            ))),
        }
    }
}

/// Wire dialect of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Rest,
    Zapi,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Rest => "REST",
            Dialect::Zapi => "ZAPI",
        })
    }
}

/// Outcome of the probe half of dialect selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub dialect: Dialect,
    /// Version read by the probe, if any
    pub version: Option<OntapVersion>,
    /// Why REST was not chosen under `auto`
    pub fault: Option<String>,
}

/// Read the cluster version over REST (`GET cluster?fields=version`).
///
/// Connection faults are retried; every attempt emits a debug record.
pub async fn probe_cluster_version(transport: &dyn OntapTransport) -> Result<OntapVersion, OntapError> {
    let api = "cluster";
    let mut attempt = 0;
    let response = loop {
        attempt += 1;
        let request = RestRequest::new(Method::Get, api).with_query(vec![("fields".to_string(), "version".to_string())]);
        match transport.send_rest(request).await {
            Ok(response) => break response,
            Err(e @ OntapError::Connection(_)) => {
                debug!(
                    status_code = Option::<u16>::None,
                    endpoint = api,
                    message = %e,
                    "cluster probe failed (attempt {}/{})",
                    attempt,
                    PROBE_ATTEMPTS
                );
                if attempt >= PROBE_ATTEMPTS {
                    return Err(e);
                }
                tokio::time::sleep(PROBE_RETRY_PAUSE).await;
            }
            Err(e) => return Err(e),
        }
    };

    if !response.is_success() {
        return Err(rest_error(Method::Get, api, &response));
    }
    let version = response
        .body
        .as_ref()
        .and_then(|body| body.get("version"))
        .cloned()
        .ok_or_else(|| OntapError::InvalidResponse("cluster: no version in response".to_string()))?;
    let version: RestVersion = serde_json::from_value(version)?;
    Ok(version.into())
}

/// Read the cluster version over ZAPI (`system-get-version`).
pub async fn zapi_cluster_version(transport: &dyn OntapTransport) -> Result<OntapVersion, OntapError> {
    let results = transport
        .invoke_zapi(ZapiElement::new("system-get-version"), None)
        .await?;
    let tuple = results
        .get_path("version-tuple/system-version-tuple")
        .ok_or_else(|| OntapError::InvalidResponse("system-get-version: no version-tuple".to_string()))?;
    let part = |name: &str| -> Result<u32, OntapError> {
        tuple
            .child_content(name)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| OntapError::InvalidResponse(format!("system-get-version: bad {name}")))
    };
    Ok(OntapVersion::new(part("generation")?, part("major")?, part("minor")?))
}

/// Pick the dialect for the given policy.
///
/// `never` does not touch the network. `always` fails when the probe fails.
/// `auto` falls back to ZAPI on any probe failure and records the fault.
pub async fn select_dialect(transport: &dyn OntapTransport, policy: UseRest) -> Result<Probe, OntapError> {
    match policy {
        UseRest::Never => Ok(Probe {
            dialect: Dialect::Zapi,
            version: None,
            fault: None,
        }),
        UseRest::Always => {
            let version = probe_cluster_version(transport).await?;
            Ok(Probe {
                dialect: Dialect::Rest,
                version: Some(version),
                fault: None,
            })
        }
        UseRest::Auto => match probe_cluster_version(transport).await {
            Ok(version) => Ok(Probe {
                dialect: Dialect::Rest,
                version: Some(version),
                fault: None,
            }),
            Err(e) => {
                debug!("REST probe failed, using ZAPI: {}", e);
                Ok(Probe {
                    dialect: Dialect::Zapi,
                    version: None,
                    fault: Some(e.to_string()),
                })
            }
        },
    }
}
