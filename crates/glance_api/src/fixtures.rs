//! Helper methods only available for tests
use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use http::{Request, Response, StatusCode};
use k8s_openapi::api::core::v1::Secret;
use kube::{client::Body, Client};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{
        keystone::{KeystoneAPI, KeystoneAPISpec, KeystoneAPIStatus},
        v1beta1::glanceapi::GlanceAPI,
    },
    controllers::glanceapi_controller::{Context, Diagnostics},
    util::{config::OperatorConfig, metrics::Metrics},
};

impl GlanceAPI {
    /// A single-topology instance as it would come back from the API server
    pub fn test() -> Self {
        let mut glance: GlanceAPI = serde_json::from_value(json!({
            "apiVersion": "glance.openstack.org/v1beta1",
            "kind": "GlanceAPI",
            "metadata": {
                "name": "glance-single",
                "namespace": "default",
                "uid": "752d59ef-2671-4890-9feb-0097459b18c8",
                "generation": 1,
            },
            "spec": {
                "apiType": "single",
                "containerImage": "quay.io/podified-antelope-centos9/openstack-glance-api:current-podified",
                "secret": "osp-secret",
            }
        }))
        .expect("valid GlanceAPI fixture");
        glance.status = None;
        glance
    }
}

impl Context {
    /// A context whose client talks to the returned verifier instead of a cluster
    pub fn test() -> (Arc<Self>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "default");
        let ctx = Self {
            client: mock_client,
            metrics: Metrics::new().expect("metrics build"),
            diagnostics: Arc::new(tokio::sync::RwLock::new(Diagnostics::default())),
            config: OperatorConfig::default(),
            cancel: CancellationToken::new(),
            error_counts: DashMap::new(),
        };
        (Arc::new(ctx), ApiServerVerifier(handle))
    }
}

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// Serves the requests of a test client from a [`FakeCluster`].
pub struct ApiServerVerifier(ApiServerHandle);

impl ApiServerVerifier {
    /// Answers requests until every client handle is dropped, then hands the
    /// cluster back for assertions.
    pub fn run(mut self, mut cluster: FakeCluster) -> JoinHandle<FakeCluster> {
        tokio::spawn(async move {
            while let Some((request, send)) = self.0.next_request().await {
                let response = cluster.handle(request).await;
                send.send_response(response);
            }
            cluster
        })
    }
}

pub async fn timeout_after_1s(handle: JoinHandle<FakeCluster>) -> FakeCluster {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("mock apiserver panicked")
}

/// Minimal object store speaking enough of the API server protocol for one pass.
///
/// Workload and keystone endpoint readiness are simulated on write, the way the
/// real controllers would eventually report them.
#[derive(Default)]
pub struct FakeCluster {
    objects: BTreeMap<String, Value>,
    pub events: Vec<Value>,
    /// `METHOD path` of every request in arrival order
    pub log: Vec<String>,
    pub workloads_ready: bool,
    pub endpoints_ready: bool,
    /// Collections whose writes the API server refuses with `(code, reason)`
    rejected: BTreeMap<String, (u16, String)>,
}

const SECRETS: &str = "/api/v1/namespaces/default/secrets";
pub const GLANCEAPIS: &str = "/apis/glance.openstack.org/v1beta1/namespaces/default/glanceapis";
const KEYSTONEAPIS: &str = "/apis/keystone.openstack.org/v1beta1/namespaces/default/keystoneapis";
pub const KEYSTONEENDPOINTS: &str =
    "/apis/keystone.openstack.org/v1beta1/namespaces/default/keystoneendpoints";
pub const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/default/deployments";
pub const STATEFULSETS: &str = "/apis/apps/v1/namespaces/default/statefulsets";
pub const SERVICES: &str = "/api/v1/namespaces/default/services";

impl FakeCluster {
    pub fn new(glance: &GlanceAPI) -> Self {
        let mut cluster = Self::default();
        cluster.insert(GLANCEAPIS, serde_json::to_value(glance).expect("serializable"));
        cluster
    }

    pub fn with_secret(mut self, name: &str, data: &[(&str, &str)]) -> Self {
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            string_data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.insert(SECRETS, serde_json::to_value(secret).expect("serializable"));
        self
    }

    /// The secret every fixture instance references, with both password keys.
    pub fn with_osp_secret(self) -> Self {
        self.with_secret(
            "osp-secret",
            &[
                ("GlancePassword", "12345678"),
                ("GlanceDatabasePassword", "12345678"),
            ],
        )
    }

    /// Refuses every create or apply under `collection` with `code` and `reason`.
    pub fn rejecting_writes(mut self, collection: &str, code: u16, reason: &str) -> Self {
        self.rejected
            .insert(collection.to_string(), (code, reason.to_string()));
        self
    }

    pub fn with_keystone_api(mut self) -> Self {
        let mut keystone = KeystoneAPI::new("keystone", KeystoneAPISpec::default());
        keystone.metadata.namespace = Some("default".to_string());
        keystone.status = Some(KeystoneAPIStatus {
            api_endpoints: BTreeMap::from([
                (
                    "internal".to_string(),
                    "http://keystone-internal.openstack.svc:5000".to_string(),
                ),
                (
                    "public".to_string(),
                    "http://keystone-public.openstack.svc:5000".to_string(),
                ),
            ]),
            conditions: Vec::new(),
        });
        self.insert(KEYSTONEAPIS, serde_json::to_value(keystone).expect("serializable"));
        self
    }

    /// Marks existing workloads and endpoints ready and keeps doing so on later writes.
    pub fn make_ready(&mut self) {
        self.workloads_ready = true;
        self.endpoints_ready = true;
        let keys: Vec<String> = self.objects.keys().cloned().collect();
        for key in keys {
            if let Some(mut obj) = self.objects.remove(&key) {
                self.simulate(&key, &mut obj);
                self.objects.insert(key, obj);
            }
        }
    }

    pub fn get<K: DeserializeOwned>(&self, collection: &str, name: &str) -> Option<K> {
        self.objects
            .get(&format!("{}/{}", collection, name))
            .map(|v| serde_json::from_value(v.clone()).expect("stored object deserializes"))
    }

    /// Stored JSON of an object, for payload assertions.
    pub fn raw(&self, collection: &str, name: &str) -> Option<&Value> {
        self.objects.get(&format!("{}/{}", collection, name))
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.get(SECRETS, name)
    }

    pub fn glance(&self, name: &str) -> GlanceAPI {
        self.get(GLANCEAPIS, name).expect("GlanceAPI exists")
    }

    /// Requests that changed anything besides the GlanceAPI status and events.
    pub fn child_writes(&self) -> Vec<&String> {
        self.log
            .iter()
            .filter(|l| !l.starts_with("GET "))
            .filter(|l| !l.ends_with("/status") && !l.ends_with("/events"))
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.events.clear();
    }

    fn insert(&mut self, collection: &str, obj: Value) {
        let name = obj["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.objects.insert(format!("{}/{}", collection, name), obj);
    }

    fn simulate(&self, key: &str, obj: &mut Value) {
        let is_workload = key.starts_with(DEPLOYMENTS) || key.starts_with(STATEFULSETS);
        if self.workloads_ready && is_workload {
            obj["status"]["readyReplicas"] = obj["spec"]["replicas"].clone();
        }
        if self.endpoints_ready && key.starts_with(KEYSTONEENDPOINTS) {
            obj["status"] = json!({
                "conditions": [{
                    "type": "Ready",
                    "status": "True",
                    "reason": "Ready",
                    "message": "Setup complete",
                    "lastTransitionTime": "2024-01-01T00:00:00Z",
                }]
            });
        }
    }

    fn rejection(&self, path: &str) -> Option<Response<Body>> {
        let (code, reason) = self
            .rejected
            .iter()
            .find(|(collection, _)| path.starts_with(collection.as_str()))
            .map(|(_, rejection)| rejection)?;
        let status = StatusCode::from_u16(*code).expect("valid status code");
        Some(respond(
            status,
            &status_body(*code, reason, &format!("{} refused: {}", path, reason)),
        ))
    }

    async fn handle(&mut self, request: Request<Body>) -> Response<Body> {
        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        self.log.push(format!("{} {}", method, path));
        let body = request
            .into_body()
            .collect_bytes()
            .await
            .expect("request body readable");

        match method.as_str() {
            "GET" if is_collection(&path) => {
                let prefix = format!("{}/", path);
                let items: Vec<Value> = self
                    .objects
                    .iter()
                    .filter(|(k, _)| k.starts_with(&prefix) && !k[prefix.len()..].contains('/'))
                    .map(|(_, v)| v.clone())
                    .collect();
                respond(
                    StatusCode::OK,
                    &json!({
                        "apiVersion": "v1",
                        "kind": "List",
                        "metadata": { "resourceVersion": "" },
                        "items": items,
                    }),
                )
            }
            "GET" => match self.objects.get(&path) {
                Some(obj) => respond(StatusCode::OK, obj),
                None => not_found(&path),
            },
            "POST" => {
                let mut obj: Value = serde_json::from_slice(&body).expect("json body");
                if path.ends_with("/events") {
                    self.events.push(obj.clone());
                    return respond(StatusCode::CREATED, &obj);
                }
                if let Some(response) = self.rejection(&path) {
                    return response;
                }
                let key = format!("{}/{}", path, obj["metadata"]["name"].as_str().unwrap_or_default());
                if self.objects.contains_key(&key) {
                    return respond(
                        StatusCode::CONFLICT,
                        &status_body(409, "AlreadyExists", &format!("{} already exists", key)),
                    );
                }
                self.simulate(&key, &mut obj);
                self.objects.insert(key, obj.clone());
                respond(StatusCode::CREATED, &obj)
            }
            "PATCH" => {
                let patch: Value = serde_json::from_slice(&body).expect("json body");
                if let Some(key) = path.strip_suffix("/status") {
                    return match self.objects.get_mut(key) {
                        Some(obj) => {
                            obj["status"] = patch["status"].clone();
                            respond(StatusCode::OK, obj)
                        }
                        None => not_found(&path),
                    };
                }
                if let Some(response) = self.rejection(&path) {
                    return response;
                }
                let mut obj = patch;
                if let Some(existing) = self.objects.get(&path) {
                    obj["status"] = existing["status"].clone();
                }
                self.simulate(&path, &mut obj);
                self.objects.insert(path, obj.clone());
                respond(StatusCode::OK, &obj)
            }
            other => panic!("unexpected {} request", other),
        }
    }
}

/// `/api/v1/namespaces/<ns>/<plural>` or `/apis/<group>/<version>/namespaces/<ns>/<plural>`
fn is_collection(path: &str) -> bool {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let collection_len = if segments.first() == Some(&"api") { 5 } else { 6 };
    segments.len() == collection_len
}

fn status_body(code: u16, reason: &str, message: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    })
}

fn not_found(path: &str) -> Response<Body> {
    respond(
        StatusCode::NOT_FOUND,
        &status_body(404, "NotFound", &format!("{} not found", path)),
    )
}

fn respond(status: StatusCode, body: &Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(serde_json::to_vec(body).expect("serializable")))
        .expect("valid response")
}

/// `METHOD collection/name` as recorded in [`FakeCluster::log`].
pub fn log_line(method: &str, collection: &str, name: &str) -> String {
    format!("{} {}/{}", method, collection, name)
}

/// Copy of `glance` as it would look after the API server bumped its generation.
pub fn next_generation(glance: &GlanceAPI) -> GlanceAPI {
    let mut next = glance.clone();
    next.metadata.generation = Some(glance.metadata.generation.unwrap_or(1) + 1);
    next
}
