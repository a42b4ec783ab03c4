use crate::api::keystone::KeystoneEndpoint;
use crate::api::v1beta1::glanceapi::GlanceAPI;
use crate::util::{
    config::OperatorConfig,
    errors::{self, Error, Result, StdError},
    metrics,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{Future, StreamExt};
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{Secret, Service},
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher::Config,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::*;

pub const FIELD_MANAGER: &str = "glance-operator";

/// Retry delay after an optimistic concurrency conflict.
const CONFLICT_RETRY: Duration = Duration::from_secs(1);

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
    /// Cancelled when the process is asked to shut down
    cancel: CancellationToken,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, config: OperatorConfig) -> Result<Arc<Context>> {
        let metrics = metrics::Metrics::new()
            .and_then(|m| m.register(&self.registry))
            .map_err(StdError::MetricsError)?;

        Ok(Arc::new(Context {
            client,
            metrics,
            diagnostics: self.diagnostics.clone(),
            config,
            cancel: self.cancel.clone(),
            error_counts: DashMap::new(),
        }))
    }
}

// Context for our reconciler
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
    pub config: OperatorConfig,
    pub cancel: CancellationToken,
    /// Consecutive failed passes per instance, drives the error backoff
    pub error_counts: DashMap<String, u32>,
}

impl Context {
    /// Runs one call against the cluster API.
    ///
    /// Nothing is sent once shutdown was requested, and every call is bounded by
    /// the configured per-call timeout.
    pub async fn call<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::StdError(StdError::Cancelled));
        }

        match tokio::time::timeout(self.config.api_timeout(), request).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::StdError(StdError::Timeout(format!(
                "cluster call exceeded {}s",
                self.config.api_timeout_seconds
            )))),
        }
    }

    /// Delay before retrying `key` after another failed pass.
    fn next_backoff(&self, key: &str) -> Duration {
        let mut attempts = self.error_counts.entry(key.to_string()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        self.config.backoff(*attempts)
    }

    fn reset_backoff(&self, key: &str) {
        self.error_counts.remove(key);
    }
}

fn instance_key(glance: &GlanceAPI) -> String {
    format!("{}/{}", glance.namespace().unwrap_or_default(), glance.name_any())
}

#[instrument(skip(ctx, glance), fields(trace_id))]
pub async fn reconcile(glance: Arc<GlanceAPI>, ctx: Arc<Context>) -> Result<Action> {
    #[cfg(feature = "telemetry")]
    Span::current().record("trace_id", field::display(&crate::util::telemetry::get_trace_id()));
    let _timer = ctx.metrics.count_and_measure("glanceapi");
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!(
        "Reconciling GlanceAPI \"{}\" in {}",
        glance.name_any(),
        glance.namespace().unwrap_or_default()
    );

    let action = glance.reconcile(ctx.clone()).await?;
    ctx.reset_backoff(&instance_key(&glance));
    Ok(action)
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: FIELD_MANAGER.into(),
        }
    }
}
impl Diagnostics {
    pub(crate) fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

pub fn error_policy(glance: Arc<GlanceAPI>, error: &errors::Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&glance, error);

    match error {
        Error::ErrorWithRequeue(e) => Action::requeue(e.duration),
        Error::StdError(StdError::ApplyConflict(_)) => Action::requeue(CONFLICT_RETRY),
        Error::StdError(StdError::InvalidArgument(_)) | Error::StdError(StdError::Cancelled) => {
            Action::await_change()
        }
        Error::StdError(_) => Action::requeue(ctx.next_backoff(&instance_key(&glance))),
    }
}

/// Instances in the secret's namespace that reference it by name.
fn instances_referencing(store: &[Arc<GlanceAPI>], secret: &Secret) -> Vec<ObjectRef<GlanceAPI>> {
    let name = secret.name_any();
    store
        .iter()
        .filter(|glance| glance.namespace() == secret.namespace() && glance.references_secret(&name))
        .map(|glance| ObjectRef::from_obj(glance.as_ref()))
        .collect()
}

/// Initialize the controller and shared state (given the crd is installed)
///
/// Returns once the cancellation token of `state` fires and in-flight passes finished.
pub async fn run(state: State, config: OperatorConfig) -> Result<()> {
    let client = Client::try_default().await?;

    macro_rules! scoped {
        ($kind:ty) => {
            match &config.watch_namespace {
                Some(ns) => Api::<$kind>::namespaced(client.clone(), ns),
                None => Api::<$kind>::all(client.clone()),
            }
        };
    }

    let glanceapis = scoped!(GlanceAPI);
    if let Err(e) = glanceapis.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(e.into());
    }

    let cancel = state.cancellation_token();
    let ctx = state.to_context(client.clone(), config.clone())?;
    let controller = Controller::new(glanceapis, Config::default().any_semantic());
    let store = controller.store();

    controller
        .owns(scoped!(StatefulSet), Config::default())
        .owns(scoped!(Deployment), Config::default())
        .owns(scoped!(Service), Config::default())
        .owns(scoped!(Secret), Config::default())
        .owns(scoped!(KeystoneEndpoint), Config::default())
        .watches(scoped!(Secret), Config::default(), move |secret| {
            instances_referencing(&store.state(), &secret)
        })
        .graceful_shutdown_on(cancel.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    info!("controller stopped");
    Ok(())
}
