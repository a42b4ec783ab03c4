//! Views of the resources owned by the identity-service operator.
//!
//! Only the fields this operator reads or writes are modelled, everything else
//! on those objects is left untouched.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1beta1::{conditions_schema, Condition};

/// Registration of service URLs with keystone, created per GlanceAPI.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "KeystoneEndpoint", group = "keystone.openstack.org", version = "v1beta1", namespaced)]
#[kube(status = "KeystoneEndpointStatus")]
#[serde(rename_all = "camelCase")]
pub struct KeystoneEndpointSpec {
    pub service_name: String,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneEndpointStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
}

/// The keystone deployment of a namespace, read for its auth URLs.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "KeystoneAPI", group = "keystone.openstack.org", version = "v1beta1", namespaced)]
#[kube(status = "KeystoneAPIStatus")]
#[serde(rename_all = "camelCase")]
pub struct KeystoneAPISpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneAPIStatus {
    #[serde(default)]
    pub api_endpoints: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
}

impl KeystoneEndpoint {
    /// True once the identity operator reports the registration as Ready.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.conditions.iter().any(|c| c.type_ == "Ready" && c.is_true()))
            .unwrap_or(false)
    }
}

impl KeystoneAPI {
    /// Auth URL for the given endpoint kind, if keystone published it.
    pub fn endpoint(&self, kind: &str) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.api_endpoints.get(kind))
            .map(String::as_str)
    }
}
