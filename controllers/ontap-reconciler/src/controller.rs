//! Module invocation
//!
//! Validates parameters, connects, settles the dialect, builds the adapter
//! and runs the kernel. Every failure ends up in the outcome object; nothing
//! escapes as a panic or a process error.

use std::sync::Arc;

use ontap_client::{Dialect, OntapClient, OntapTransport};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::emitter::{Emitter, Outcome};
use crate::error::ReconcileError;
use crate::gate;
use crate::host::HostOptions;
use crate::kernel::{self, session::Session, session::SessionOptions};
use crate::modules;

/// Where the transport comes from
enum Connector {
    /// Real HTTP client built from the host options
    Live,
    /// Caller-supplied transport (scripted clusters, embedding)
    Given(Arc<dyn OntapTransport>),
}

/// Run `module` against the cluster named in `raw`.
pub async fn run(module: &str, raw: Map<String, Value>, check_mode: bool) -> Outcome {
    execute(module, raw, check_mode, Connector::Live).await
}

/// Run `module` over an existing transport.
pub async fn run_with_transport(
    module: &str,
    raw: Map<String, Value>,
    check_mode: bool,
    transport: Arc<dyn OntapTransport>,
) -> Outcome {
    execute(module, raw, check_mode, Connector::Given(transport)).await
}

async fn execute(module: &str, raw: Map<String, Value>, check_mode: bool, connector: Connector) -> Outcome {
    let Some(def) = modules::find(module) else {
        let names: Vec<&str> = modules::MODULES.iter().map(|m| m.name).collect();
        return Emitter::default().failure(&ReconcileError::Validation(format!(
            "Unknown module '{module}', expecting one of: {}",
            names.join(", ")
        )));
    };

    let params = match def.schema.validate(&raw) {
        Ok(params) => params,
        Err(err) => return Emitter::default().failure(&err),
    };
    let prepared = HostOptions::from_params(&params).and_then(|host| {
        gate::check_before_connect(def.name, def.annotations, &params, host.use_rest)?;
        let adapter = (def.build)(&params)?;
        Ok((host, adapter))
    });
    let (host, adapter) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return Emitter::new(params.no_log_options(), true).failure(&err),
    };
    let mut emitter = Emitter::new(params.no_log_options(), host.features.show_modified);

    let (transport, live): (Arc<dyn OntapTransport>, Option<Arc<OntapClient>>) = match connector {
        Connector::Given(transport) => (transport, None),
        Connector::Live => match OntapClient::new(&host.connection) {
            Ok(client) => {
                let client = Arc::new(client);
                let shared: Arc<dyn OntapTransport> = client.clone();
                (shared, Some(client))
            }
            Err(err) => return emitter.failure(&err.into()),
        },
    };

    let decision = match gate::choose_dialect(transport.as_ref(), def.name, def.annotations, &params, &host).await {
        Ok(decision) => decision,
        Err(err) => return emitter.failure(&err),
    };
    for warning in &decision.warnings {
        emitter.warn(warning);
    }
    if decision.dialect == Dialect::Zapi {
        if let Some(client) = &live {
            let (major, minor) = client.negotiate_zapi_version().await;
            debug!("ZAPI version {}.{}", major, minor);
        }
    }

    info!(
        "Running {} on {} over {}{}",
        def.name,
        transport.host(),
        decision.dialect,
        if check_mode { " (check mode)" } else { "" }
    );
    let session = Session::new(
        transport,
        decision.dialect,
        decision.version,
        SessionOptions {
            check_mode,
            job_options: host.job_options,
            strict_json: host.features.strict_json_check,
            continue_on_error: host.continue_on_error.clone(),
        },
        emitter,
    );

    let result = kernel::reconcile(adapter.as_ref(), &session).await;
    let emitter = session.into_emitter();
    match result {
        Ok(()) => emitter.success(),
        Err(err) => emitter.failure(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::host_params;
    use ontap_client::MockOntapClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_module() {
        let outcome = run_with_transport("volume_magic", host_params(json!({})), false, Arc::new(MockOntapClient::default())).await;
        assert!(outcome.failed);
        assert!(outcome.msg.unwrap().starts_with("Unknown module 'volume_magic'"));
    }

    #[tokio::test]
    async fn test_validation_error_touches_no_network() {
        let mock = MockOntapClient::default();
        let outcome = run_with_transport(
            "lun_map",
            host_params(json!({"path": "/vol/v/l", "initiator_group_name": "ig", "vserver": "svm1", "bogus": 1})),
            false,
            Arc::new(mock.clone()),
        )
        .await;
        assert!(outcome.failed);
        assert_eq!(outcome.msg.as_deref(), Some("Unsupported parameters: bogus"));
        assert!(mock.calls().is_empty());
    }
}
