use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::{apis::meta::v1::OwnerReference, util::intstr::IntOrString},
};
use kube::{
    api::{Api, ObjectMeta},
    ResourceExt,
};
use tracing::info;

use crate::{
    api::v1beta1::{
        glanceapi::{GlanceAPI, ServiceOverride, GLANCE_PUBLIC_PORT},
        Endpoint,
    },
    controllers::{
        glanceapi::topology::{service_name, workload_labels, Topology},
        glanceapi_controller::Context,
    },
    util::{apply::apply_owned, errors::Result},
};

const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

type OverrideRule = fn(&mut Service, &ServiceOverride);

/// How each part of a user override lands on the default service.
const OVERRIDE_RULES: &[(&str, OverrideRule)] = &[
    ("metadata.annotations", merge_annotations),
    ("metadata.labels", merge_labels),
    ("spec.type", replace_type),
];

fn merge_annotations(service: &mut Service, over: &ServiceOverride) {
    service
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .extend(over.metadata.annotations.clone());
}

fn merge_labels(service: &mut Service, over: &ServiceOverride) {
    service
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(over.metadata.labels.clone());
}

fn replace_type(service: &mut Service, over: &ServiceOverride) {
    if let (Some(type_), Some(spec)) = (&over.spec.type_, service.spec.as_mut()) {
        spec.type_ = Some(type_.clone());
    }
}

/// Publishes one service per endpoint kind of the topology.
pub async fn reconcile(
    glance: &GlanceAPI,
    ctx: &Context,
    namespace: &str,
    topology: &Topology,
    oref: &OwnerReference,
) -> Result<()> {
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);

    for endpoint in topology.endpoints {
        info!(
            "Reconciling Service '{}' for '{}' in namespace '{}'",
            service_name(*endpoint),
            glance.name_any(),
            namespace
        );
        let desired = create_desired_service(glance, topology, *endpoint, oref);
        apply_owned(ctx, &services, &desired, service_needs_update).await?;
    }

    Ok(())
}

pub fn create_desired_service(
    glance: &GlanceAPI,
    topology: &Topology,
    endpoint: Endpoint,
    oref: &OwnerReference,
) -> Service {
    let selector = workload_labels(glance, topology);
    let labels = BTreeMap::from([
        ("service".to_string(), topology.service_label()),
        ("endpoint".to_string(), endpoint.to_string()),
        ("app.kubernetes.io/name".to_string(), glance.name_any()),
    ]);

    let mut service = Service {
        metadata: ObjectMeta {
            name: Some(service_name(endpoint)),
            namespace: glance.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![oref.clone()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(DEFAULT_SERVICE_TYPE.to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some(format!("glance-{}", endpoint)),
                port: GLANCE_PUBLIC_PORT,
                target_port: Some(IntOrString::Int(GLANCE_PUBLIC_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    if let Some(over) = glance.spec.override_spec.service.get(&endpoint) {
        for (_, rule) in OVERRIDE_RULES {
            rule(&mut service, over);
        }
    }

    service
}

fn is_subset(desired: &Option<BTreeMap<String, String>>, existing: &Option<BTreeMap<String, String>>) -> bool {
    desired
        .iter()
        .flatten()
        .all(|(k, v)| existing.as_ref().and_then(|e| e.get(k)) == Some(v))
}

/// Ports are compared on the fields set here, the server fills in nodePort and friends.
fn service_needs_update(existing: &Service, desired: &Service) -> bool {
    let (Some(existing_spec), Some(desired_spec)) = (&existing.spec, &desired.spec) else {
        return true;
    };
    let ports = |s: &ServiceSpec| {
        s.ports
            .iter()
            .flatten()
            .map(|p| (p.name.clone(), p.port, p.target_port.clone()))
            .collect::<Vec<_>>()
    };

    existing_spec.type_ != desired_spec.type_
        || existing_spec.selector != desired_spec.selector
        || ports(existing_spec) != ports(desired_spec)
        || !is_subset(&desired.metadata.labels, &existing.metadata.labels)
        || !is_subset(&desired.metadata.annotations, &existing.metadata.annotations)
}
