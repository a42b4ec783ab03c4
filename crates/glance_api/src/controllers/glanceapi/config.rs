//! Rendering of the layered glance-api configuration.
//!
//! The bundle is a flat map of file name to content, stored in the
//! `<instance>-config-data` secret and mounted into the pod. Kolla copies the
//! `*.conf` files into `/etc/glance/glance.conf.d`, where later files override
//! earlier ones, so user supplied settings in `02-config.conf` and
//! `03-config.conf` win over the rendered defaults.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::Secret,
    apimachinery::pkg::apis::meta::v1::OwnerReference,
    ByteString,
};
use kube::api::{Api, ListParams, ObjectMeta};
use kube::ResourceExt;
use minijinja::{context, AutoEscape, Environment, UndefinedBehavior};

use crate::{
    api::{
        keystone::KeystoneAPI,
        v1beta1::glanceapi::{GlanceAPI, GLANCE_PUBLIC_PORT},
    },
    controllers::{
        glanceapi::{
            input::ResolvedInputs,
            topology::{config_secret_name, workload_labels, Topology},
        },
        glanceapi_controller::Context,
    },
    util::{
        apply::apply_owned,
        errors::{Error, Result, StdError},
        hash::object_hash,
    },
};

pub const DEFAULT_CONFIG_FILE: &str = "00-config.conf";
pub const CUSTOM_CONFIG_FILE: &str = "02-config.conf";
pub const CUSTOM_SECRETS_CONFIG_FILE: &str = "03-config.conf";
pub const HTTPD_CONFIG_FILE: &str = "10-glance-httpd.conf";
pub const KOLLA_CONFIG_FILE: &str = "glance-api-config.json";

/// Where the bundle secret is mounted in the api and httpd containers.
pub const CONFIG_MOUNT_PATH: &str = "/var/lib/config-data/default";

/// glance-api listens here on localhost, httpd proxies the public port to it.
pub const GLANCE_BACKEND_PORT: i32 = 9293;

pub const LOG_FILE: &str = "/var/log/glance/glance-api.log";

const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../../../templates/glanceapi/config/00-config.conf");
const HTTPD_CONFIG_TEMPLATE: &str =
    include_str!("../../../templates/glanceapi/config/10-glance-httpd.conf");
const KOLLA_CONFIG_TEMPLATE: &str =
    include_str!("../../../templates/glanceapi/config/glance-api-config.json");

pub type ConfigBundle = BTreeMap<String, String>;

/// Auth URLs published by keystone for the namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct KeystoneURLs {
    pub internal: String,
    pub public: String,
}

impl KeystoneURLs {
    pub fn from_keystone_api(keystone: &KeystoneAPI) -> Result<Self> {
        let url = |kind: &str| {
            keystone.endpoint(kind).map(str::to_string).ok_or_else(|| {
                Error::StdError(StdError::RenderError(format!(
                    "KeystoneAPI '{}' publishes no {} endpoint",
                    keystone.name_any(),
                    kind
                )))
            })
        };

        Ok(Self {
            internal: url("internal")?,
            public: url("public")?,
        })
    }
}

/// Renders every file of the bundle. Pure and deterministic in its arguments.
pub fn render_bundle(
    glance: &GlanceAPI,
    inputs: &ResolvedInputs,
    keystone: &KeystoneURLs,
) -> Result<ConfigBundle> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_template(DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_TEMPLATE)
        .map_err(StdError::from)?;
    env.add_template(HTTPD_CONFIG_FILE, HTTPD_CONFIG_TEMPLATE)
        .map_err(StdError::from)?;
    env.add_template(KOLLA_CONFIG_FILE, KOLLA_CONFIG_TEMPLATE)
        .map_err(StdError::from)?;

    let mut config_files = vec![DEFAULT_CONFIG_FILE, CUSTOM_CONFIG_FILE];
    let custom_secrets = custom_secrets_config(inputs);
    if custom_secrets.is_some() {
        config_files.push(CUSTOM_SECRETS_CONFIG_FILE);
    }

    let database_hostname = match glance.spec.database_hostname.trim() {
        "" => "localhost",
        host => host,
    };

    let values = context! {
        instance_name => glance.name_any(),
        public_port => GLANCE_PUBLIC_PORT,
        backend_port => GLANCE_BACKEND_PORT,
        log_file => LOG_FILE,
        database_user => &glance.spec.database_user,
        database_password => &inputs.database_password,
        database_hostname => database_hostname,
        service_user => &glance.spec.service_user,
        service_password => &inputs.service_password,
        keystone_internal_url => &keystone.internal,
        keystone_public_url => &keystone.public,
        source_dir => CONFIG_MOUNT_PATH,
        config_files => config_files,
    };

    let mut bundle = ConfigBundle::new();
    for file in [DEFAULT_CONFIG_FILE, HTTPD_CONFIG_FILE, KOLLA_CONFIG_FILE] {
        let rendered = env
            .get_template(file)
            .and_then(|template| template.render(&values))
            .map_err(StdError::from)?;
        bundle.insert(file.to_string(), rendered);
    }
    bundle.insert(
        CUSTOM_CONFIG_FILE.to_string(),
        glance.spec.custom_service_config.clone(),
    );
    if let Some(custom_secrets) = custom_secrets {
        bundle.insert(CUSTOM_SECRETS_CONFIG_FILE.to_string(), custom_secrets);
    }

    Ok(bundle)
}

/// Concatenated values of the custom config secrets, in secret then key order.
fn custom_secrets_config(inputs: &ResolvedInputs) -> Option<String> {
    if inputs.custom_secrets.is_empty() {
        return None;
    }

    let mut out = String::new();
    for data in inputs.custom_secrets.values() {
        for value in data.values() {
            out.push_str(value);
            if !value.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    Some(out)
}

pub fn create_desired_config_secret(
    glance: &GlanceAPI,
    topology: &Topology,
    bundle: &ConfigBundle,
    oref: &OwnerReference,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(config_secret_name(glance)),
            namespace: glance.namespace(),
            labels: Some(workload_labels(glance, topology)),
            owner_references: Some(vec![oref.clone()]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            bundle
                .iter()
                .map(|(file, content)| (file.clone(), ByteString(content.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

fn config_secret_needs_update(existing: &Secret, desired: &Secret) -> bool {
    existing.data != desired.data || existing.metadata.labels != desired.metadata.labels
}

/// Renders the bundle, stores it and returns its fingerprint.
pub async fn reconcile(
    glance: &GlanceAPI,
    ctx: &Context,
    namespace: &str,
    topology: &Topology,
    inputs: &ResolvedInputs,
    oref: &OwnerReference,
) -> Result<String> {
    let keystone_apis: Api<KeystoneAPI> = Api::namespaced(ctx.client.clone(), namespace);
    let keystone = ctx
        .call(keystone_apis.list(&ListParams::default()))
        .await?
        .items
        .into_iter()
        .next()
        .ok_or_else(|| {
            Error::StdError(StdError::RenderError(format!(
                "no KeystoneAPI found in namespace '{}'",
                namespace
            )))
        })?;

    let bundle = render_bundle(glance, inputs, &KeystoneURLs::from_keystone_api(&keystone)?)?;
    let desired = create_desired_config_secret(glance, topology, &bundle, oref);

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    apply_owned(ctx, &secrets, &desired, config_secret_needs_update).await?;

    object_hash(&bundle)
}
