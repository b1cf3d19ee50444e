//! Resource kernel
//!
//! The reconciliation loop shared by every module:
//!
//! 1. read the target (and the `from_name` resource when renaming)
//! 2. compute the change plan: create/delete, rename, modification set
//! 3. stop there in check mode
//! 4. apply rename → create (+ follow-up modification) → modify → delete
//! 5. let the adapter wait for the resource to settle
//!
//! Errors are prefixed with the failing step. Errors the caller's
//! `continue_on_error` policy accepts become warnings.

pub mod plan;
pub mod session;

#[cfg(test)]
mod kernel_test;

use std::future::Future;

use tracing::{debug, info};

use crate::adapter::{Applied, Current, DesiredState, ResourceAdapter};
use crate::error::{ReconcileError, Step};
use crate::gate::not_modifiable;
use crate::mapping::{AttrPolicy, lookup};
use crate::model::Attributes;
use plan::{CdAction, ChangePlan, Rename};
use session::Session;

/// Run one step; `Ok(None)` when its failure was demoted to a warning
async fn guarded<T>(
    session: &Session,
    step: Step,
    kind: &'static str,
    name: &str,
    operation: impl Future<Output = Result<T, ReconcileError>>,
) -> Result<Option<T>, ReconcileError> {
    match operation.await {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            let err = err.in_step(step, kind, name);
            if err
                .ontap()
                .is_some_and(|cause| session.continue_on_error().should_continue(cause))
            {
                session.warn(format!("Ignoring error ({}): {err}", err.class()));
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

/// Modification set of `desired` against `current`, optionally restricted
/// to `only`
fn diff(
    adapter: &dyn ResourceAdapter,
    session: &Session,
    current: &Current,
    only: Option<&[&str]>,
) -> Result<Attributes, ReconcileError> {
    let maps = adapter.field_map();
    let mut desired: Attributes = adapter
        .desired()
        .iter()
        .filter(|(attr, _)| only.is_none_or(|only| only.contains(&attr.as_str())))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut current_attrs = current.attrs.clone();
    adapter.prepare_diff(session, &mut current_attrs, &mut desired);

    let unknown: Vec<&str> = desired
        .keys()
        .filter(|attr| lookup(maps, attr).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ReconcileError::Internal(format!(
            "{} has no mapping for attribute(s): {}",
            adapter.kind(),
            unknown.join(", ")
        )));
    }

    let mut modify = Attributes::new();
    for (attr, wanted) in desired {
        let same = current_attrs
            .get(&attr)
            .is_some_and(|have| adapter.attrs_equal(&attr, have, &wanted));
        if same {
            continue;
        }
        match lookup(maps, &attr).map(|map| map.policy) {
            Some(AttrPolicy::Immutable) => return Err(not_modifiable(&attr, &wanted)),
            Some(AttrPolicy::CreateOnly) => {
                debug!("{} '{}': ignoring create-only attribute {}", adapter.kind(), adapter.name(), attr);
            }
            _ => {
                modify.insert(attr, wanted);
            }
        }
    }
    Ok(modify)
}

/// Reconcile one resource.
///
/// Records `changed`, warnings and the applied modification set in the
/// session's emitter; returns the first unrecoverable error.
pub async fn reconcile(adapter: &dyn ResourceAdapter, session: &Session) -> Result<(), ReconcileError> {
    let kind = adapter.kind();
    let name = adapter.name();
    let state = adapter.desired_state();
    let capabilities = adapter.capabilities(session.dialect());

    let Some(mut current) = guarded(session, Step::Fetching, kind, name, adapter.get_current(session, name)).await? else {
        return Ok(());
    };

    let mut rename = None;
    if let Some(from_name) = adapter.from_name().filter(|from| *from != name) {
        let Some(from) = guarded(session, Step::Fetching, kind, from_name, adapter.get_current(session, from_name)).await?
        else {
            return Ok(());
        };
        match (current.is_some(), from, state) {
            (true, Some(_), _) => {
                return Err(ReconcileError::Precondition(format!(
                    "Error renaming {kind}: both from_name '{from_name}' and name '{name}' exist"
                )));
            }
            (false, Some(from), DesiredState::Present) => {
                rename = Some(Rename {
                    from: from_name.to_string(),
                    to: name.to_string(),
                });
                current = Some(from);
            }
            (false, None, DesiredState::Present) => {
                return Err(ReconcileError::Precondition(format!(
                    "Error renaming {kind} '{name}': no resource with from_name '{from_name}'"
                )));
            }
            _ => {}
        }
    }

    let cd_action = match (&current, state) {
        (None, DesiredState::Present) => Some(CdAction::Create),
        (Some(_), DesiredState::Absent) => Some(CdAction::Delete),
        _ => None,
    };
    let modify = match (&current, cd_action, state) {
        (Some(current), None, DesiredState::Present) => diff(adapter, session, current, None)?,
        _ => Attributes::new(),
    };
    let plan = ChangePlan {
        cd_action,
        rename,
        modify,
    };
    info!("{} '{}': plan {}", kind, name, plan);
    if plan.is_empty() {
        return Ok(());
    }

    let refuse = |operation: &str| {
        ReconcileError::Precondition(format!("Error: {operation} {kind} is not supported with {}", session.dialect()))
    };
    if plan.cd_action == Some(CdAction::Create) && !capabilities.create {
        return Err(ReconcileError::Precondition(format!("Error: {kind} '{name}' not found")));
    }
    if plan.cd_action == Some(CdAction::Delete) && !capabilities.delete {
        return Err(refuse("deleting"));
    }
    if plan.rename.is_some() && !capabilities.rename {
        return Err(refuse("renaming"));
    }
    if !plan.modify.is_empty() && !capabilities.modify {
        return Err(refuse("modifying"));
    }

    if session.check_mode() {
        session.with_emitter(|emitter| {
            emitter.set_changed();
            emitter.record_modify(&plan.modify);
        });
        return Ok(());
    }

    apply(adapter, session, current.as_ref(), &plan).await
}

async fn apply(
    adapter: &dyn ResourceAdapter,
    session: &Session,
    current: Option<&Current>,
    plan: &ChangePlan,
) -> Result<(), ReconcileError> {
    let kind = adapter.kind();
    let name = adapter.name();
    let changed = || session.with_emitter(|emitter| emitter.set_changed());

    if let (Some(rename), Some(current)) = (&plan.rename, current) {
        info!("Renaming {} '{}' to '{}'", kind, rename.from, rename.to);
        if guarded(session, Step::Renaming, kind, name, adapter.rename(session, current)).await?.is_some() {
            changed();
        }
    }

    match (plan.cd_action, current) {
        (Some(CdAction::Create), _) => {
            info!("Creating {} '{}'", kind, name);
            if guarded(session, Step::Creating, kind, name, adapter.create(session)).await?.is_some() {
                changed();
                follow_up(adapter, session).await?;
            }
        }
        (Some(CdAction::Delete), Some(current)) => {
            info!("Deleting {} '{}'", kind, name);
            if guarded(session, Step::Deleting, kind, name, adapter.delete(session, current)).await?.is_some() {
                changed();
            }
        }
        _ => {}
    }

    if let Some(current) = current.filter(|_| !plan.modify.is_empty()) {
        info!("Modifying {} '{}': {:?}", kind, name, plan.modify.keys().collect::<Vec<_>>());
        match guarded(session, Step::Modifying, kind, name, adapter.modify(session, current, &plan.modify)).await? {
            Some(Applied::Changed) => session.with_emitter(|emitter| {
                emitter.set_changed();
                emitter.record_modify(&plan.modify);
            }),
            Some(Applied::Unchanged) => debug!("{} '{}': cluster reported no change", kind, name),
            None => {}
        }
    }

    adapter.wait_for_completion(session, plan).await
}

/// Apply post-create attributes as a follow-up modification
async fn follow_up(adapter: &dyn ResourceAdapter, session: &Session) -> Result<(), ReconcileError> {
    let attrs = adapter.post_create_attrs();
    if attrs.is_empty() || !attrs.iter().any(|attr| adapter.desired().contains_key(*attr)) {
        return Ok(());
    }
    let kind = adapter.kind();
    let name = adapter.name();
    let Some(created) = guarded(session, Step::Fetching, kind, name, adapter.get_current(session, name)).await? else {
        return Ok(());
    };
    let created = created.ok_or_else(|| {
        ReconcileError::PostCondition(format!("Error: {kind} '{name}' not found after creation"))
    })?;
    let modify = diff(adapter, session, &created, Some(attrs))?;
    if modify.is_empty() {
        return Ok(());
    }
    info!("Applying post-create attributes to {} '{}': {:?}", kind, name, modify.keys().collect::<Vec<_>>());
    guarded(session, Step::Modifying, kind, name, adapter.modify(session, &created, &modify)).await?;
    Ok(())
}
