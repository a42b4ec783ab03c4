use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1beta1::{conditions_schema, preserve_unknown_schema, APIType, Condition, Endpoint};

/// Name prefix shared by every glance service object and the keystone service name.
pub const SERVICE_NAME: &str = "glance";

/// Port the api container listens on, also used for every published service.
pub const GLANCE_PUBLIC_PORT: i32 = 9292;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSelector {
    /// Key of the service user password in the referenced secret
    #[serde(default = "default_service_selector")]
    pub service: String,
    /// Key of the database password in the referenced secret
    #[serde(default = "default_database_selector")]
    pub database: String,
}

fn default_service_selector() -> String {
    "GlancePassword".to_string()
}

fn default_database_selector() -> String {
    "GlanceDatabasePassword".to_string()
}

impl Default for PasswordSelector {
    fn default() -> Self {
        Self {
            service: default_service_selector(),
            database: default_database_selector(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Storage class to use for the image store volume claim
    pub storage_class: Option<String>,
    /// Size of the image store volume claim
    #[serde(default = "default_storage_size")]
    pub size: String,
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_class: None,
            size: default_storage_size(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct OverrideMetadata {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct OverrideServiceSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// User supplied shape of one published service.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ServiceOverride {
    /// Endpoint kind this override belongs to.
    ///
    /// Registration is keyed on the map key; when set, this must name the same kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Literal URL registered in keystone instead of the cluster-local default
    #[serde(rename = "endpointURL", default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub metadata: OverrideMetadata,
    #[serde(default)]
    pub spec: OverrideServiceSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct APIOverrideSpec {
    #[serde(default)]
    pub service: BTreeMap<Endpoint, ServiceOverride>,
}

/// Generate the Kubernetes wrapper struct `GlanceAPI` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(kind = "GlanceAPI", group = "glance.openstack.org", version = "v1beta1", namespaced)]
#[kube(status = "GlanceAPIStatus", shortname = "glanceapi")]
#[kube(printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#)]
#[serde(rename_all = "camelCase")]
pub struct GlanceAPISpec {
    pub api_type: APIType,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    pub container_image: String,
    #[serde(default)]
    pub custom_service_config: String,
    #[serde(default)]
    pub custom_service_config_secrets: Vec<String>,

    /// Secret carrying the service and database passwords
    pub secret: String,
    #[serde(default)]
    pub password_selectors: PasswordSelector,
    #[serde(default = "default_user")]
    pub service_user: String,
    #[serde(default = "default_user")]
    pub database_user: String,
    #[serde(default)]
    pub database_hostname: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_schema")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(rename = "override", default)]
    pub override_spec: APIOverrideSpec,
}

fn default_replicas() -> i32 {
    1
}

fn default_user() -> String {
    "glance".to_string()
}

/// The status object of `GlanceAPI`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlanceAPIStatus {
    #[serde(default)]
    pub ready_count: i32,
    #[serde(default)]
    pub hash: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub api_endpoints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl GlanceAPISpec {
    /// Checks the parts of the spec the schema cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.replicas < 0 {
            return Err(format!("replicas must be >= 0, got {}", self.replicas));
        }
        if self.container_image.trim().is_empty() {
            return Err("containerImage must not be empty".to_string());
        }
        if self.secret.trim().is_empty() {
            return Err("secret must not be empty".to_string());
        }
        if self.password_selectors.service.is_empty() || self.password_selectors.database.is_empty() {
            return Err("passwordSelectors must name non-empty keys".to_string());
        }
        for (kind, service) in &self.override_spec.service {
            match service.endpoint.as_deref() {
                Some(endpoint) if endpoint != kind.as_str() => {
                    return Err(format!(
                        "override.service.{kind}.endpoint must be '{kind}', got '{endpoint}'"
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// True when the secret named `name` is an input of this instance.
    pub fn references_secret(&self, name: &str) -> bool {
        self.secret == name || self.custom_service_config_secrets.iter().any(|s| s == name)
    }
}

impl GlanceAPI {
    pub fn references_secret(&self, name: &str) -> bool {
        self.spec.references_secret(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_defaults_are_applied() {
        let spec: GlanceAPISpec = serde_json::from_value(json!({
            "apiType": "single",
            "containerImage": "quay.io/podified/glance-api:current",
            "secret": "osp-secret",
        }))
        .unwrap();

        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.service_user, "glance");
        assert_eq!(spec.password_selectors, PasswordSelector::default());
        assert!(spec.override_spec.service.is_empty());
        assert_eq!(spec.storage.size, "10Gi");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn service_override_parses_wire_names() {
        let spec: GlanceAPISpec = serde_json::from_value(json!({
            "apiType": "External",
            "containerImage": "img",
            "secret": "osp-secret",
            "override": {
                "service": {
                    "public": {
                        "endpoint": "public",
                        "endpointURL": "http://glance-openstack.apps-crc.testing",
                        "spec": { "type": "LoadBalancer" }
                    }
                }
            }
        }))
        .unwrap();

        let public = &spec.override_spec.service[&Endpoint::Public];
        assert_eq!(
            public.endpoint_url.as_deref(),
            Some("http://glance-openstack.apps-crc.testing")
        );
        assert_eq!(public.spec.type_.as_deref(), Some("LoadBalancer"));
    }

    #[test]
    fn negative_replicas_are_rejected() {
        let spec: GlanceAPISpec = serde_json::from_value(json!({
            "apiType": "internal",
            "replicas": -1,
            "containerImage": "img",
            "secret": "osp-secret",
        }))
        .unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn override_endpoint_must_match_its_kind() {
        let with_endpoint = |endpoint: &str| -> GlanceAPISpec {
            serde_json::from_value(json!({
                "apiType": "internal",
                "containerImage": "img",
                "secret": "osp-secret",
                "override": { "service": { "internal": { "endpoint": endpoint } } }
            }))
            .unwrap()
        };

        assert!(with_endpoint("internal").validate().is_ok());
        let err = with_endpoint("public").validate().unwrap_err();
        assert!(err.contains("override.service.internal.endpoint"), "{err}");
    }

    #[test]
    fn unrelated_secrets_are_not_inputs() {
        let spec: GlanceAPISpec = serde_json::from_value(json!({
            "apiType": "single",
            "containerImage": "img",
            "secret": "osp-secret",
            "customServiceConfigSecrets": ["glance-extra"],
        }))
        .unwrap();

        assert!(spec.references_secret("osp-secret"));
        assert!(spec.references_secret("glance-extra"));
        assert!(!spec.references_secret("not-relevant-secret"));
    }

    #[test]
    fn fresh_status_is_empty() {
        let status = GlanceAPIStatus::default();
        assert_eq!(status.ready_count, 0);
        assert!(status.hash.is_empty());
        assert!(status.conditions.is_empty());
    }
}
