//! Change plan computed by the kernel

use std::fmt;

use crate::model::Attributes;

/// Creation or deletion of the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdAction {
    Create,
    Delete,
}

/// Rename of the `from_name` resource to the target name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// `(cd_action, rename, modify)`; an empty plan is an idempotent no-op
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePlan {
    pub cd_action: Option<CdAction>,
    pub rename: Option<Rename>,
    pub modify: Attributes,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        self.cd_action.is_none() && self.rename.is_none() && self.modify.is_empty()
    }
}

impl fmt::Display for ChangePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(rename) = &self.rename {
            parts.push(format!("rename {} -> {}", rename.from, rename.to));
        }
        match self.cd_action {
            Some(CdAction::Create) => parts.push("create".to_string()),
            Some(CdAction::Delete) => parts.push("delete".to_string()),
            None => {}
        }
        if !self.modify.is_empty() {
            let keys: Vec<&str> = self.modify.keys().map(String::as_str).collect();
            parts.push(format!("modify [{}]", keys.join(", ")));
        }
        if parts.is_empty() {
            f.write_str("no-op")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}
