//! Wire types of the platform API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::kinds::{AclAction, Capability, CapabilityScope, CapabilitySet};

/// One page returned by a `list` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    /// Items on this page.
    pub items: Vec<Value>,
    /// Cursor of the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Body of a `list` request.
#[derive(Debug, Serialize)]
pub(crate) struct ListRequest {
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Body of `create`, `update` and `delete` requests.
#[derive(Debug, Serialize)]
pub(crate) struct ItemsRequest {
    pub items: Vec<Value>,
}

/// Body of a `byids` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ByIdsRequest {
    pub items: Vec<Value>,
    pub ignore_unknown_ids: bool,
}

/// Response of item-returning endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Body of an ad hoc query preview.
#[derive(Debug, Serialize)]
pub(crate) struct PreviewRequest<'a> {
    pub query: &'a str,
    pub limit: usize,
}

/// Error envelope returned by the platform.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Error details.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    /// Unknown identifiers, in wire form.
    #[serde(default)]
    pub missing: Vec<Value>,
}

/// Response of `token/inspect`.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenInspection {
    #[serde(default)]
    pub capabilities: Vec<GrantedAcl>,
}

/// One granted ACL.
#[derive(Debug, Deserialize)]
pub(crate) struct GrantedAcl {
    pub acl: String,
    #[serde(default)]
    pub actions: Vec<AclAction>,
    #[serde(default)]
    pub scope: GrantedScope,
}

/// Scope of a granted ACL.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GrantedScope {
    #[serde(default)]
    pub all: Option<Value>,
    #[serde(default)]
    pub ids: Option<BTreeSet<String>>,
}

impl TokenInspection {
    /// Flattens the inspection into a capability set.
    ///
    /// A grant with neither `all` nor `ids` is treated as unscoped.
    pub(crate) fn into_capabilities(self) -> CapabilitySet {
        let mut set = CapabilitySet::new();
        for grant in self.capabilities {
            let scope = match (grant.scope.all, grant.scope.ids) {
                (None, Some(ids)) => CapabilityScope::Ids(ids),
                _ => CapabilityScope::All,
            };
            for action in grant.actions {
                set.insert(Capability {
                    acl: grant.acl.clone(),
                    action,
                    scope: scope.clone(),
                });
            }
        }
        set
    }
}
