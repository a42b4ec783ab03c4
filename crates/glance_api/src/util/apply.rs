use std::fmt::Debug;

use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::controllers::glanceapi_controller::{Context, FIELD_MANAGER};
use crate::util::errors::Result;

/// Brings one child object to its desired state and returns the live object.
///
/// A missing object is created. An existing one is server-side applied only when
/// `needs_update` reports drift, so a pass over unchanged input issues reads only.
pub async fn apply_owned<K>(
    ctx: &Context,
    api: &Api<K>,
    desired: &K,
    needs_update: fn(&K, &K) -> bool,
) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    <K as Resource>::DynamicType: Default,
{
    apply_owned_adopting(ctx, api, desired, needs_update, |_, _| {}).await
}

/// [`apply_owned`] for kinds with fields that are fixed once created.
///
/// `adopt` copies those fields from the live object into the desired one before
/// drift is checked, so neither the comparison nor the patch ever carries them.
pub async fn apply_owned_adopting<K>(
    ctx: &Context,
    api: &Api<K>,
    desired: &K,
    needs_update: fn(&K, &K) -> bool,
    adopt: fn(&K, &mut K),
) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    <K as Resource>::DynamicType: Default,
{
    let name = desired.name_any();
    let kind = K::kind(&Default::default()).to_string();

    match ctx.call(api.get(&name)).await {
        Ok(existing) => {
            let mut desired = desired.clone();
            adopt(&existing, &mut desired);
            if needs_update(&existing, &desired) {
                info!("Updating {} '{}'", kind, name);
                ctx.call(api.patch(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&desired),
                ))
                .await
            } else {
                debug!("{} '{}' is up to date", kind, name);
                Ok(existing)
            }
        }
        Err(e) if e.is_not_found() => {
            info!("Creating {} '{}'", kind, name);
            ctx.call(api.create(&PostParams::default(), desired)).await
        }
        Err(e) => Err(e),
    }
}
