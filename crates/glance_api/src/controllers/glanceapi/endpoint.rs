use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{api::Api, ResourceExt};
use tracing::info;

use crate::{
    api::{
        keystone::{KeystoneEndpoint, KeystoneEndpointSpec},
        v1beta1::glanceapi::{GlanceAPI, GLANCE_PUBLIC_PORT, SERVICE_NAME},
    },
    controllers::{
        glanceapi::topology::{service_name, workload_labels, Topology},
        glanceapi_controller::Context,
    },
    util::{apply::apply_owned, errors::Result},
};

/// Outcome of registering the instance with keystone.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub urls: BTreeMap<String, String>,
    pub ready: bool,
}

/// Endpoint kind to URL, an `endpointURL` override replacing the cluster-local default.
pub fn endpoint_urls(glance: &GlanceAPI, topology: &Topology, namespace: &str) -> BTreeMap<String, String> {
    topology
        .endpoints
        .iter()
        .map(|endpoint| {
            let url = glance
                .spec
                .override_spec
                .service
                .get(endpoint)
                .and_then(|over| over.endpoint_url.clone())
                .unwrap_or_else(|| {
                    format!(
                        "http://{}.{}.svc:{}",
                        service_name(*endpoint),
                        namespace,
                        GLANCE_PUBLIC_PORT
                    )
                });
            (endpoint.to_string(), url)
        })
        .collect()
}

pub fn create_desired_keystone_endpoint(
    glance: &GlanceAPI,
    topology: &Topology,
    urls: &BTreeMap<String, String>,
    oref: &OwnerReference,
) -> KeystoneEndpoint {
    let mut endpoint = KeystoneEndpoint::new(
        &glance.name_any(),
        KeystoneEndpointSpec {
            service_name: SERVICE_NAME.to_string(),
            endpoints: urls.clone(),
        },
    );
    endpoint.metadata.namespace = glance.namespace();
    endpoint.metadata.labels = Some(workload_labels(glance, topology));
    endpoint.metadata.owner_references = Some(vec![oref.clone()]);
    endpoint
}

fn keystone_endpoint_needs_update(existing: &KeystoneEndpoint, desired: &KeystoneEndpoint) -> bool {
    existing.spec != desired.spec || existing.metadata.labels != desired.metadata.labels
}

pub async fn reconcile(
    glance: &GlanceAPI,
    ctx: &Context,
    namespace: &str,
    topology: &Topology,
    oref: &OwnerReference,
) -> Result<Registration> {
    let urls = endpoint_urls(glance, topology, namespace);
    info!(
        "Registering {} endpoint(s) for '{}' with keystone",
        urls.len(),
        glance.name_any()
    );

    let api: Api<KeystoneEndpoint> = Api::namespaced(ctx.client.clone(), namespace);
    let desired = create_desired_keystone_endpoint(glance, topology, &urls, oref);
    let live = apply_owned(ctx, &api, &desired, keystone_endpoint_needs_update).await?;

    Ok(Registration {
        urls,
        ready: live.is_ready(),
    })
}
