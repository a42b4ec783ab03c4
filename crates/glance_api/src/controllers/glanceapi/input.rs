use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, ResourceExt};
use serde::Serialize;
use tracing::info;

use crate::{
    api::v1beta1::glanceapi::GlanceAPI,
    controllers::glanceapi_controller::Context,
    util::{
        errors::{Error, Result, StdError},
        hash::object_hash,
    },
};

/// Materials read from the cluster that the rendered configuration depends on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedInputs {
    pub service_password: String,
    pub database_password: String,
    /// Data of every `customServiceConfigSecrets` entry, keyed by secret then key
    pub custom_secrets: BTreeMap<String, BTreeMap<String, String>>,
}

impl ResolvedInputs {
    pub fn fingerprint(&self) -> Result<String> {
        object_hash(self)
    }
}

pub async fn resolve(glance: &GlanceAPI, ctx: &Context, namespace: &str) -> Result<ResolvedInputs> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);

    let secret = fetch_secret(ctx, &secrets, &glance.spec.secret).await?;
    let data = secret_data(&secret, &glance.spec.secret)?;
    let selectors = &glance.spec.password_selectors;
    let service_password = required_key(&data, &glance.spec.secret, &selectors.service)?;
    let database_password = required_key(&data, &glance.spec.secret, &selectors.database)?;

    let mut custom_secrets = BTreeMap::new();
    for name in &glance.spec.custom_service_config_secrets {
        let secret = fetch_secret(ctx, &secrets, name).await?;
        custom_secrets.insert(name.clone(), secret_data(&secret, name)?);
    }

    info!(
        "Resolved inputs for '{}' from secret '{}' and {} custom config secret(s)",
        glance.name_any(),
        glance.spec.secret,
        custom_secrets.len()
    );

    Ok(ResolvedInputs {
        service_password,
        database_password,
        custom_secrets,
    })
}

async fn fetch_secret(ctx: &Context, secrets: &Api<Secret>, name: &str) -> Result<Secret> {
    match ctx.call(secrets.get(name)).await {
        Ok(secret) => Ok(secret),
        Err(e) if e.is_not_found() => Err(Error::StdError(StdError::InputMissing(format!(
            "secret '{}' not found",
            name
        )))),
        Err(e) => Err(e),
    }
}

/// Decoded view of `data` and `stringData`, the latter winning like on the API server.
pub fn secret_data(secret: &Secret, name: &str) -> Result<BTreeMap<String, String>> {
    let mut decoded = BTreeMap::new();
    for (key, value) in secret.data.iter().flatten() {
        let value = String::from_utf8(value.0.clone()).map_err(|_| {
            StdError::InputMissing(format!("secret '{}' key '{}' is not valid utf-8", name, key))
        })?;
        decoded.insert(key.clone(), value);
    }
    for (key, value) in secret.string_data.iter().flatten() {
        decoded.insert(key.clone(), value.clone());
    }
    Ok(decoded)
}

fn required_key(data: &BTreeMap<String, String>, secret: &str, key: &str) -> Result<String> {
    data.get(key).cloned().ok_or_else(|| {
        Error::StdError(StdError::InputMissing(format!(
            "secret '{}' has no key '{}'",
            secret, key
        )))
    })
}
