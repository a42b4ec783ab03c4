pub mod config;
pub mod endpoint;
pub mod input;
pub mod service;
pub mod topology;
pub mod workload;

use std::{collections::BTreeMap, sync::Arc};

use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::Action,
        events::{Event, EventType},
    },
    Resource, ResourceExt,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    api::v1beta1::{
        glanceapi::{GlanceAPI, GlanceAPIStatus},
        Severity,
    },
    controllers::glanceapi_controller::Context,
    util::{
        errors::{Error, Result, StdError},
        glanceapi_status::{
            ConditionLedger, StatusReason, DEPLOYMENT_READY_CONDITION, EXPOSE_SERVICE_READY_CONDITION,
            INPUT_READY_CONDITION, KEYSTONE_ENDPOINT_READY_CONDITION, SERVICE_CONFIG_READY_CONDITION,
        },
        hash::object_hash,
    },
};
use topology::{workload_name, Topology};

// Field manager for status updates
pub const STATUS_FIELD_MANAGER: &str = "glance-operator-status";

pub const INPUT_HASH: &str = "input";
pub const CONFIG_HASH: &str = "config";

/// How a pass that hit no error ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassOutcome {
    Ready,
    /// Halted on a workload or endpoint that is still coming up
    Waiting,
}

impl GlanceAPI {
    /// One reconciliation pass: run the pipeline, then persist the status once.
    pub async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let ns = self.namespace().ok_or_else(|| {
            StdError::MetadataMissing("GlanceAPI must be namespaced".to_string())
        })?;
        let previous = self.status.clone().unwrap_or_default();
        let generation = self.metadata.generation;

        let mut ledger = ConditionLedger::init(&previous.conditions);
        let mut status = GlanceAPIStatus {
            ready_count: 0,
            hash: if previous.observed_generation == generation {
                previous.hash
            } else {
                BTreeMap::new()
            },
            conditions: Vec::new(),
            api_endpoints: previous.api_endpoints,
            observed_generation: generation,
        };

        let outcome = match self.spec.validate() {
            Ok(()) => self.run_pipeline(&ctx, &ns, &mut ledger, &mut status).await,
            Err(message) => {
                ledger.mark_fatal(&message);
                Err(Error::StdError(StdError::InvalidArgument(message)))
            }
        };

        let outcome = match outcome {
            Err(e) if e.is_cancelled() => {
                info!("Pass for '{}' cancelled, status not persisted", self.name_any());
                return Err(e);
            }
            other => other,
        };

        status.conditions = ledger.into_conditions();
        match self.patch_status(&ctx, &ns, &status).await {
            Err(e) if e.is_not_found() => {
                info!("GlanceAPI '{}' is gone, nothing left to report", self.name_any());
                return Ok(Action::await_change());
            }
            other => other?,
        }

        match outcome {
            Ok(PassOutcome::Ready) => Ok(Action::requeue(ctx.config.requeue())),
            Ok(PassOutcome::Waiting) => Ok(Action::requeue(ctx.config.wait())),
            Err(e) => {
                self.publish_failure(&ctx, &e).await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        ctx: &Context,
        ns: &str,
        ledger: &mut ConditionLedger,
        status: &mut GlanceAPIStatus,
    ) -> Result<PassOutcome> {
        let topology = Topology::for_api_type(self.spec.api_type);
        let oref = self.controller_owner_ref(&()).ok_or_else(|| {
            StdError::MetadataMissing("uid should always be set on an existing object".to_string())
        })?;

        let inputs = step(ledger, INPUT_READY_CONDITION, input::resolve(self, ctx, ns).await)?;
        let input_hash = step(ledger, INPUT_READY_CONDITION, inputs.fingerprint())?;
        status.hash.insert(INPUT_HASH.to_string(), input_hash.clone());
        ledger.mark_true(INPUT_READY_CONDITION, "Input data complete");

        let config_hash = step(
            ledger,
            SERVICE_CONFIG_READY_CONDITION,
            config::reconcile(self, ctx, ns, topology, &inputs, &oref).await,
        )?;
        status.hash.insert(CONFIG_HASH.to_string(), config_hash.clone());
        ledger.mark_true(SERVICE_CONFIG_READY_CONDITION, "Service config create completed");

        let pod_hash = step(
            ledger,
            DEPLOYMENT_READY_CONDITION,
            object_hash(&[&input_hash, &config_hash]),
        )?;
        let ready_replicas = step(
            ledger,
            DEPLOYMENT_READY_CONDITION,
            workload::reconcile(self, ctx, ns, topology, &pod_hash, &oref).await,
        )?;
        if ready_replicas < 1 {
            ledger.mark_false(
                DEPLOYMENT_READY_CONDITION,
                StatusReason::WorkloadNotReady,
                Severity::Info,
                &format!("Waiting for '{}' to report ready replicas", workload_name(self)),
            );
            return Ok(PassOutcome::Waiting);
        }
        status.ready_count = ready_replicas;
        ledger.mark_true(DEPLOYMENT_READY_CONDITION, "Deployment completed");

        step(
            ledger,
            EXPOSE_SERVICE_READY_CONDITION,
            service::reconcile(self, ctx, ns, topology, &oref).await,
        )?;
        ledger.mark_true(EXPOSE_SERVICE_READY_CONDITION, "Exposing service completed");

        let registration = step(
            ledger,
            KEYSTONE_ENDPOINT_READY_CONDITION,
            endpoint::reconcile(self, ctx, ns, topology, &oref).await,
        )?;
        status.api_endpoints = registration.urls;
        if !registration.ready {
            ledger.mark_false(
                KEYSTONE_ENDPOINT_READY_CONDITION,
                StatusReason::EndpointNotReady,
                Severity::Info,
                "Waiting for the KeystoneEndpoint to become ready",
            );
            return Ok(PassOutcome::Waiting);
        }
        ledger.mark_true(KEYSTONE_ENDPOINT_READY_CONDITION, "Keystone endpoint registered");

        Ok(PassOutcome::Ready)
    }

    async fn patch_status(&self, ctx: &Context, ns: &str, status: &GlanceAPIStatus) -> Result<()> {
        let api: Api<GlanceAPI> = Api::namespaced(ctx.client.clone(), ns);
        let patch = Patch::Apply(json!({
            "apiVersion": GlanceAPI::api_version(&()),
            "kind": GlanceAPI::kind(&()),
            "status": status,
        }));

        ctx.call(api.patch_status(
            &self.name_any(),
            &PatchParams::apply(STATUS_FIELD_MANAGER).force(),
            &patch,
        ))
        .await?;
        Ok(())
    }

    /// Best-effort Warning event for a failed pass.
    async fn publish_failure(&self, ctx: &Context, error: &Error) {
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
        let event = Event {
            type_: EventType::Warning,
            reason: error.reason().to_string(),
            note: Some(error.to_string()),
            action: "Reconciling".into(),
            secondary: None,
        };

        if let Err(e) = ctx.call(recorder.publish(&event, &self.object_ref(&()))).await {
            warn!("failed to publish event for '{}': {}", self.name_any(), e);
        }
    }
}

/// Records a failed step on its condition before handing the error back.
fn step<T>(ledger: &mut ConditionLedger, condition: &str, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        warn!("{} failed: {}", condition, e);
        ledger.mark_error(condition, &e);
        e
    })
}
