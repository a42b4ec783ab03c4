use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec},
        core::v1::{
            Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction,
            PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
            SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, OwnerReference},
        util::intstr::IntOrString,
    },
};
use kube::{
    api::{Api, ObjectMeta},
    ResourceExt,
};
use tracing::{info, warn};

use crate::{
    api::v1beta1::glanceapi::{GlanceAPI, GLANCE_PUBLIC_PORT},
    controllers::{
        glanceapi::{
            config::{CONFIG_MOUNT_PATH, HTTPD_CONFIG_FILE, KOLLA_CONFIG_FILE, LOG_FILE},
            topology::{config_secret_name, workload_labels, workload_name, Topology, WorkloadKind},
        },
        glanceapi_controller::Context,
    },
    util::{
        apply::{apply_owned, apply_owned_adopting},
        errors::Result,
    },
};

pub const CONFIG_VOLUME: &str = "config-data";
pub const MERGED_CONFIG_VOLUME: &str = "config-data-merged";
pub const LOGS_VOLUME: &str = "logs";
pub const STORE_VOLUME: &str = "glance";

const LOG_DIR: &str = "/var/log/glance";
const STORE_DIR: &str = "/var/lib/glance";
const MERGED_CONFIG_DIR: &str = "/etc/glance/glance.conf.d";
const HEALTHCHECK_PATH: &str = "/healthcheck";

/// Applies the workload of the instance and returns its ready replica count.
pub async fn reconcile(
    glance: &GlanceAPI,
    ctx: &Context,
    namespace: &str,
    topology: &Topology,
    config_hash: &str,
    oref: &OwnerReference,
) -> Result<i32> {
    info!(
        "Reconciling {:?} '{}' in namespace '{}'",
        topology.workload_kind,
        workload_name(glance),
        namespace
    );

    let ready_replicas = match topology.workload_kind {
        WorkloadKind::StatefulSet => {
            let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
            let desired = create_desired_statefulset(glance, topology, config_hash, oref);
            let live =
                apply_owned_adopting(ctx, &api, &desired, statefulset_needs_update, keep_claim_templates)
                    .await?;
            live.status.and_then(|s| s.ready_replicas)
        }
        WorkloadKind::Deployment => {
            let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
            let desired = create_desired_deployment(glance, topology, config_hash, oref);
            let live = apply_owned(ctx, &api, &desired, deployment_needs_update).await?;
            live.status.and_then(|s| s.ready_replicas)
        }
    };

    Ok(ready_replicas.unwrap_or(0))
}

pub fn create_desired_statefulset(
    glance: &GlanceAPI,
    topology: &Topology,
    config_hash: &str,
    oref: &OwnerReference,
) -> StatefulSet {
    let labels = workload_labels(glance, topology);

    StatefulSet {
        metadata: workload_metadata(glance, &labels, oref),
        spec: Some(StatefulSetSpec {
            replicas: Some(glance.spec.replicas),
            service_name: Some(topology.primary_service_name()),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: create_pod_template(glance, &labels, config_hash, false),
            volume_claim_templates: Some(vec![create_store_claim(glance)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn create_desired_deployment(
    glance: &GlanceAPI,
    topology: &Topology,
    config_hash: &str,
    oref: &OwnerReference,
) -> Deployment {
    let labels = workload_labels(glance, topology);

    Deployment {
        metadata: workload_metadata(glance, &labels, oref),
        spec: Some(DeploymentSpec {
            replicas: Some(glance.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: create_pod_template(glance, &labels, config_hash, true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn workload_metadata(
    glance: &GlanceAPI,
    labels: &BTreeMap<String, String>,
    oref: &OwnerReference,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(workload_name(glance)),
        namespace: glance.namespace(),
        labels: Some(labels.clone()),
        owner_references: Some(vec![oref.clone()]),
        ..Default::default()
    }
}

fn create_store_claim(glance: &GlanceAPI) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(STORE_VOLUME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: glance.spec.storage.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(glance.spec.storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod of three containers: log tailer, httpd proxy and glance-api.
///
/// `ephemeral_store` adds the image store as an emptyDir for the shape that has
/// no volume claim templates.
pub fn create_pod_template(
    glance: &GlanceAPI,
    labels: &BTreeMap<String, String>,
    config_hash: &str,
    ephemeral_store: bool,
) -> PodTemplateSpec {
    let name = glance.name_any();

    let mut volumes = vec![
        Volume {
            name: CONFIG_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(config_secret_name(glance)),
                ..Default::default()
            }),
            ..Default::default()
        },
        empty_dir(MERGED_CONFIG_VOLUME),
        empty_dir(LOGS_VOLUME),
    ];
    if ephemeral_store {
        volumes.push(empty_dir(STORE_VOLUME));
    }

    let log = Container {
        name: format!("{}-log", name),
        image: Some(glance.spec.container_image.clone()),
        command: Some(vec!["/usr/bin/dumb-init".to_string()]),
        args: Some(vec![
            "--single-child".to_string(),
            "--".to_string(),
            "/usr/bin/tail".to_string(),
            "-n+1".to_string(),
            "-F".to_string(),
            LOG_FILE.to_string(),
        ]),
        volume_mounts: Some(vec![mount(LOGS_VOLUME, LOG_DIR, false)]),
        ..Default::default()
    };

    let httpd = Container {
        name: format!("{}-httpd", name),
        image: Some(glance.spec.container_image.clone()),
        command: Some(vec!["/usr/sbin/httpd".to_string()]),
        args: Some(vec!["-DFOREGROUND".to_string()]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: "/etc/httpd/conf.d/10-glance.conf".to_string(),
                sub_path: Some(HTTPD_CONFIG_FILE.to_string()),
                read_only: Some(true),
                ..Default::default()
            },
            mount(LOGS_VOLUME, LOG_DIR, false),
        ]),
        ..Default::default()
    };

    let api = Container {
        name: format!("{}-api", name),
        image: Some(glance.spec.container_image.clone()),
        command: Some(vec!["/bin/bash".to_string()]),
        args: Some(vec!["-c".to_string(), "/usr/local/bin/kolla_start".to_string()]),
        env: Some(vec![
            env("KOLLA_CONFIG_FILE", &format!("{}/{}", CONFIG_MOUNT_PATH, KOLLA_CONFIG_FILE)),
            env("KOLLA_CONFIG_STRATEGY", "COPY_ALWAYS"),
            env("CONFIG_HASH", config_hash),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("glance-api".to_string()),
            container_port: GLANCE_PUBLIC_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        liveness_probe: Some(http_probe(30)),
        readiness_probe: Some(http_probe(10)),
        resources: glance.spec.resources.clone(),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH, true),
            mount(MERGED_CONFIG_VOLUME, MERGED_CONFIG_DIR, false),
            mount(LOGS_VOLUME, LOG_DIR, false),
            mount(STORE_VOLUME, STORE_DIR, false),
        ]),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![log, httpd, api],
            volumes: Some(volumes),
            node_selector: glance.spec.node_selector.clone(),
            ..Default::default()
        }),
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn mount(volume: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn http_probe(period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTHCHECK_PATH.to_string()),
            port: IntOrString::Int(GLANCE_PUBLIC_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(30),
        ..Default::default()
    }
}

fn statefulset_needs_update(existing: &StatefulSet, desired: &StatefulSet) -> bool {
    match (&existing.spec, &desired.spec) {
        (Some(existing_spec), Some(desired_spec)) => {
            existing_spec.replicas != desired_spec.replicas
                || existing.metadata.labels != desired.metadata.labels
                || pod_template_needs_update(&existing_spec.template, &desired_spec.template)
        }
        _ => true,
    }
}

/// Volume claim templates cannot change once the StatefulSet exists, so the live
/// ones are kept and a storage edit is only reported.
fn keep_claim_templates(existing: &StatefulSet, desired: &mut StatefulSet) {
    let (Some(existing_spec), Some(desired_spec)) = (&existing.spec, &mut desired.spec) else {
        return;
    };
    if claim_storage_differs(existing_spec, desired_spec) {
        warn!(
            "Storage of StatefulSet '{}' no longer matches the GlanceAPI; volume claim templates are immutable, keeping the existing ones",
            existing.name_any()
        );
    }
    desired_spec.volume_claim_templates = existing_spec.volume_claim_templates.clone();
}

/// Requested size per claim, plus the storage class wherever one is asked for.
fn claim_storage_differs(existing: &StatefulSetSpec, desired: &StatefulSetSpec) -> bool {
    let claims = |s: &StatefulSetSpec| s.volume_claim_templates.clone().unwrap_or_default();
    let size = |c: &PersistentVolumeClaim| {
        c.spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage").cloned())
    };
    let class = |c: &PersistentVolumeClaim| c.spec.as_ref().and_then(|s| s.storage_class_name.clone());

    let (existing, desired) = (claims(existing), claims(desired));
    existing.len() != desired.len()
        || existing.iter().zip(&desired).any(|(e, d)| {
            size(e) != size(d) || (class(d).is_some() && class(e) != class(d))
        })
}

fn deployment_needs_update(existing: &Deployment, desired: &Deployment) -> bool {
    match (&existing.spec, &desired.spec) {
        (Some(existing_spec), Some(desired_spec)) => {
            existing_spec.replicas != desired_spec.replicas
                || existing.metadata.labels != desired.metadata.labels
                || pod_template_needs_update(&existing_spec.template, &desired_spec.template)
        }
        _ => true,
    }
}

/// Compares the fields this operator sets, ignoring server side defaults.
fn pod_template_needs_update(existing: &PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
    let (Some(existing_spec), Some(desired_spec)) = (&existing.spec, &desired.spec) else {
        return true;
    };

    let labels = |t: &PodTemplateSpec| t.metadata.as_ref().and_then(|m| m.labels.clone());
    let volume_names = |s: &PodSpec| {
        s.volumes
            .iter()
            .flatten()
            .map(|v| v.name.clone())
            .collect::<Vec<_>>()
    };

    labels(existing) != labels(desired)
        || existing_spec.node_selector != desired_spec.node_selector
        || volume_names(existing_spec) != volume_names(desired_spec)
        || existing_spec.containers.len() != desired_spec.containers.len()
        || existing_spec
            .containers
            .iter()
            .zip(&desired_spec.containers)
            .any(|(e, d)| container_needs_update(e, d))
}

fn container_needs_update(existing: &Container, desired: &Container) -> bool {
    existing.name != desired.name
        || existing.image != desired.image
        || existing.command != desired.command
        || existing.args != desired.args
        || existing.env != desired.env
        || existing.volume_mounts != desired.volume_mounts
        || existing.resources.clone().unwrap_or_default() != desired.resources.clone().unwrap_or_default()
}
