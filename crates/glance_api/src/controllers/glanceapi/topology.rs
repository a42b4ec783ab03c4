use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::api::v1beta1::{glanceapi::GlanceAPI, glanceapi::SERVICE_NAME, APIType, Endpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Replicas with stable identity and a per-replica image store claim
    StatefulSet,
    Deployment,
}

/// Everything the pipeline needs to know about an `apiType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub workload_kind: WorkloadKind,
    pub endpoints: &'static [Endpoint],
    pub label_suffix: &'static str,
}

const SINGLE: Topology = Topology {
    workload_kind: WorkloadKind::Deployment,
    endpoints: &[Endpoint::Internal],
    label_suffix: "single",
};

const INTERNAL: Topology = Topology {
    workload_kind: WorkloadKind::StatefulSet,
    endpoints: &[Endpoint::Internal],
    label_suffix: "internal",
};

const EXTERNAL: Topology = Topology {
    workload_kind: WorkloadKind::StatefulSet,
    endpoints: &[Endpoint::Public],
    label_suffix: "external",
};

impl Topology {
    pub fn for_api_type(api_type: APIType) -> &'static Topology {
        match api_type {
            APIType::Single => &SINGLE,
            APIType::Internal => &INTERNAL,
            APIType::External => &EXTERNAL,
        }
    }

    /// Value of the `service` label on the workload, its pods and its services.
    pub fn service_label(&self) -> String {
        format!("{}-{}", SERVICE_NAME, self.label_suffix)
    }

    /// Governing service of the stateful shape.
    pub fn primary_service_name(&self) -> String {
        let endpoint = self.endpoints.first().copied().unwrap_or(Endpoint::Internal);
        service_name(endpoint)
    }
}

pub fn service_name(endpoint: Endpoint) -> String {
    format!("{}-{}", SERVICE_NAME, endpoint)
}

pub fn workload_name(glance: &GlanceAPI) -> String {
    format!("{}-api", glance.name_any())
}

pub fn config_secret_name(glance: &GlanceAPI) -> String {
    format!("{}-config-data", glance.name_any())
}

/// Labels stamped on every child object, also used as the pod selector.
pub fn workload_labels(glance: &GlanceAPI, topology: &Topology) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("service".to_string(), topology.service_label()),
        ("app.kubernetes.io/name".to_string(), glance.name_any()),
        ("app.kubernetes.io/component".to_string(), "glance-api".to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "glance-operator".to_string(),
        ),
    ])
}
