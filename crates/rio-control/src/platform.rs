//! Platform API client.
//!
//! [`PlatformApi`] is the thin slice of the platform REST API that
//! reconciliation needs: list, fetch, create and delete for packages, routed
//! networks and deployments, plus device labels. Every fetch by identity
//! returns a [`Lookup`], so "does not exist" is never confused with a failed
//! call.
//!
//! [`HttpPlatformClient`] sends everything through an authenticated
//! [`Session`]. [`MockPlatform`] keeps the same resources in memory for
//! tests.

use std::sync::Arc;

use async_trait::async_trait;
use rio_auth::{AuthError, Method, PlatformConfig, RequestScope, Session};
use rio_core::{CoreError, DeploymentId, DeviceId, Lookup, NetworkGuid, PackageGuid};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::lifecycle::Phase;

/// Trait for platform resource operations.
///
/// This trait abstracts the platform API, allowing for mock implementations
/// in tests.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// List package summaries (`id`, `name`, `metadata.packageVersion`).
    async fn list_packages(&self) -> Result<Vec<Value>>;

    /// Fetch a package's status document (`packageInfo`, `packageUrl`).
    async fn get_package(&self, guid: &PackageGuid) -> Result<Lookup<Value>>;

    /// Fetch the manifest a package was created from.
    async fn get_manifest(&self, guid: &PackageGuid) -> Result<Lookup<Value>>;

    /// Upload a package manifest.
    async fn create_package(&self, manifest: &Value) -> Result<Value>;

    /// Delete a package.
    async fn delete_package(&self, guid: &PackageGuid) -> Result<()>;

    /// List routed networks in any phase.
    async fn list_networks(&self) -> Result<Vec<Value>>;

    /// Fetch a routed network.
    async fn get_network(&self, guid: &NetworkGuid) -> Result<Lookup<Value>>;

    /// Create a routed network from `{name, runtime, rosDistro, parameters}`.
    async fn create_network(&self, network: &Value) -> Result<Value>;

    /// Delete a routed network.
    async fn delete_network(&self, guid: &NetworkGuid) -> Result<()>;

    /// List deployments in the given phases, optionally of one package.
    async fn list_deployments(
        &self,
        package: Option<&PackageGuid>,
        phases: &[Phase],
    ) -> Result<Vec<Value>>;

    /// Fetch a deployment.
    async fn get_deployment(&self, id: &DeploymentId) -> Result<Lookup<Value>>;

    /// Submit a provision request (see [`provision_request`]) and return the
    /// id of the new deployment.
    async fn provision(&self, request: &Value) -> Result<DeploymentId>;

    /// Deprovision a deployment given its document.
    async fn deprovision(&self, deployment: &Value) -> Result<()>;

    /// List devices with their labels.
    async fn list_devices(&self) -> Result<Vec<Value>>;

    /// Add a label to a device.
    async fn add_label(&self, device: &DeviceId, key: &str, value: &str) -> Result<()>;

    /// Change the value of an existing label.
    async fn update_label(&self, label_id: &str, key: &str, value: &str) -> Result<()>;

    /// Remove a label.
    async fn delete_label(&self, label_id: &str) -> Result<()>;
}

/// Read a string field of a platform document.
///
/// # Errors
///
/// Returns `CoreError::MalformedDocument` if the field is missing or not a string.
pub fn str_field<'a>(doc: &'a Value, field: &str) -> Result<&'a str> {
    doc.get(field).and_then(Value::as_str).ok_or_else(|| {
        CoreError::MalformedDocument(format!("missing string field '{field}'")).into()
    })
}

/// Read an identifier field that may be a string or a number.
fn id_field(doc: &Value, field: &str) -> Result<String> {
    match doc.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(CoreError::MalformedDocument(format!("missing id field '{field}'")).into()),
    }
}

fn into_list(doc: Value, what: &str) -> Result<Vec<Value>> {
    match doc {
        Value::Array(items) => Ok(items),
        _ => Err(CoreError::MalformedDocument(format!("expected a list of {what}")).into()),
    }
}

/// Build the body of a provision request.
///
/// Each component of the package's first plan gets its parameters from
/// `parameters[<component name>]`, falling back to the parameter defaults
/// declared by the package.
///
/// # Errors
///
/// Returns `CoreError::MalformedDocument` if the package document has no
/// plan or a component cannot be mapped to its internal id.
pub fn provision_request(
    name: &str,
    package: &Value,
    parameters: &Value,
    networks: &[NetworkGuid],
    dependencies: &[DeploymentId],
) -> Result<Value> {
    let info = package
        .get("packageInfo")
        .ok_or_else(|| CoreError::MalformedDocument("package has no packageInfo".to_string()))?;
    let service_id = str_field(info, "guid")?;
    let plan = info
        .get("plans")
        .and_then(|plans| plans.get(0))
        .ok_or_else(|| CoreError::MalformedDocument("package has no plans".to_string()))?;
    let plan_id = str_field(plan, "planId")?;

    let internal = plan
        .get("internalComponents")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let components = plan
        .pointer("/components/components")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut provision_parameters = Map::new();
    provision_parameters.insert("global".to_string(), json!({}));

    for component in components {
        let component_name = str_field(component, "name")?;
        let component_id = internal
            .iter()
            .find(|ic| ic.get("componentName").and_then(Value::as_str) == Some(component_name))
            .and_then(|ic| ic.get("componentId"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::MalformedDocument(format!(
                    "component '{component_name}' has no internal id"
                ))
            })?;

        let mut values = Map::new();
        values.insert("component_id".to_string(), json!(component_id));

        let declared = component
            .get("parameters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for parameter in declared {
            let parameter_name = str_field(parameter, "name")?;
            let value = parameters
                .get(component_name)
                .and_then(|given| given.get(parameter_name))
                .or_else(|| parameter.get("default"))
                .cloned()
                .unwrap_or(Value::Null);
            values.insert(parameter_name.to_string(), value);
        }

        provision_parameters.insert(component_id.to_string(), Value::Object(values));
    }

    Ok(json!({
        "accepts_incomplete": true,
        "api_version": "1.0.0",
        "context": {
            "dependentDeployments": dependencies
                .iter()
                .map(|id| json!({"dependentDeploymentId": id.as_str()}))
                .collect::<Vec<_>>(),
            "labels": [],
            "name": name,
            "routedNetworks": networks
                .iter()
                .map(|guid| json!({"guid": guid.as_str()}))
                .collect::<Vec<_>>(),
        },
        "parameters": provision_parameters,
        "plan_id": plan_id,
        "service_id": service_id,
        "space_guid": "spaceGuid",
        "instance_id": "instanceId",
        "organization_guid": "organizationGuid",
    }))
}

/// Platform client backed by an authenticated session.
#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    session: Arc<Session>,
    catalog_host: String,
    core_host: String,
    scope: RequestScope,
}

impl HttpPlatformClient {
    /// Create a client for the hosts in `config`, acting in the ambient scope.
    #[must_use]
    pub fn new(session: Arc<Session>, config: &PlatformConfig) -> Self {
        Self {
            session,
            catalog_host: config.catalog_host.trim_end_matches('/').to_string(),
            core_host: config.core_host.trim_end_matches('/').to_string(),
            scope: RequestScope::ambient(),
        }
    }

    /// Act in an explicit project or with an explicit token.
    #[must_use]
    pub fn with_scope(mut self, scope: RequestScope) -> Self {
        self.scope = scope;
        self
    }

    fn catalog(&self, path: &str) -> String {
        format!("{}{path}", self.catalog_host)
    }

    fn device_manager(&self, path: &str) -> String {
        format!("{}/api/device-manager/v0/{path}", self.core_host)
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
    ) -> std::result::Result<Value, AuthError> {
        self.session
            .authenticated_request(method, url, body, params, &self.scope)
            .await
    }

    async fn lookup(&self, url: &str, params: &[(&str, &str)]) -> Result<Lookup<Value>> {
        match self.call(Method::GET, url, None, params).await {
            Ok(doc) => Ok(Lookup::Found(doc)),
            Err(AuthError::RemoteApi { status: 404, .. }) => Ok(Lookup::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformClient {
    async fn list_packages(&self) -> Result<Vec<Value>> {
        let mut doc = self
            .call(Method::GET, &self.catalog("/v2/catalog"), None, &[])
            .await?;
        into_list(doc["services"].take(), "packages")
    }

    async fn get_package(&self, guid: &PackageGuid) -> Result<Lookup<Value>> {
        self.lookup(
            &self.catalog("/serviceclass/status"),
            &[("package_uid", guid.as_str())],
        )
        .await
    }

    async fn get_manifest(&self, guid: &PackageGuid) -> Result<Lookup<Value>> {
        let Lookup::Found(package) = self.get_package(guid).await? else {
            return Ok(Lookup::NotFound);
        };
        let url = str_field(&package, "packageUrl")?;
        tracing::debug!(package_id = %guid, url = %url, "Fetching package manifest");
        Ok(Lookup::Found(self.session.fetch_document(url).await?))
    }

    async fn create_package(&self, manifest: &Value) -> Result<Value> {
        Ok(self
            .call(
                Method::POST,
                &self.catalog("/serviceclass/add"),
                Some(manifest),
                &[],
            )
            .await?)
    }

    async fn delete_package(&self, guid: &PackageGuid) -> Result<()> {
        self.call(
            Method::DELETE,
            &self.catalog("/serviceclass/delete"),
            None,
            &[("package_uid", guid.as_str())],
        )
        .await?;
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<Value>> {
        let doc = self
            .call(Method::GET, &self.catalog("/routednetwork"), None, &[])
            .await?;
        into_list(doc, "routed networks")
    }

    async fn get_network(&self, guid: &NetworkGuid) -> Result<Lookup<Value>> {
        self.lookup(&self.catalog(&format!("/routednetwork/{guid}")), &[])
            .await
    }

    async fn create_network(&self, network: &Value) -> Result<Value> {
        Ok(self
            .call(
                Method::POST,
                &self.catalog("/routednetwork"),
                Some(network),
                &[],
            )
            .await?)
    }

    async fn delete_network(&self, guid: &NetworkGuid) -> Result<()> {
        self.call(
            Method::DELETE,
            &self.catalog(&format!("/routednetwork/{guid}")),
            None,
            &[],
        )
        .await?;
        Ok(())
    }

    async fn list_deployments(
        &self,
        package: Option<&PackageGuid>,
        phases: &[Phase],
    ) -> Result<Vec<Value>> {
        let mut params = vec![("package_uid", package.map_or("", PackageGuid::as_str))];
        params.extend(phases.iter().map(|phase| ("phase", phase.as_str())));

        let doc = self
            .call(Method::GET, &self.catalog("/deployment/list"), None, &params)
            .await?;
        into_list(doc, "deployments")
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Lookup<Value>> {
        self.lookup(&self.catalog(&format!("/serviceinstance/{id}")), &[])
            .await
    }

    async fn provision(&self, request: &Value) -> Result<DeploymentId> {
        let response = self
            .call(
                Method::PUT,
                &self.catalog("/v2/service_instances/instanceId"),
                Some(request),
                &[],
            )
            .await?;
        Ok(DeploymentId::new(str_field(&response, "operation")?)?)
    }

    async fn deprovision(&self, deployment: &Value) -> Result<()> {
        let id = str_field(deployment, "deploymentId")?;
        let params = [
            ("service_id", str_field(deployment, "packageId")?),
            ("plan_id", str_field(deployment, "planId")?),
        ];
        self.call(
            Method::DELETE,
            &self.catalog(&format!("/v2/service_instances/{id}")),
            None,
            &params,
        )
        .await?;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<Value>> {
        let mut doc = self
            .call(Method::GET, &self.device_manager("devices/"), None, &[])
            .await?;
        into_list(doc["response"]["data"].take(), "devices")
    }

    async fn add_label(&self, device: &DeviceId, key: &str, value: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert(key.to_string(), json!(value));
        self.call(
            Method::POST,
            &self.device_manager(&format!("labels/{device}")),
            Some(&Value::Object(body)),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn update_label(&self, label_id: &str, key: &str, value: &str) -> Result<()> {
        self.call(
            Method::PUT,
            &self.device_manager(&format!("labels/{label_id}")),
            Some(&json!({"key": key, "value": value})),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn delete_label(&self, label_id: &str) -> Result<()> {
        self.call(
            Method::DELETE,
            &self.device_manager(&format!("labels/{label_id}")),
            None,
            &[],
        )
        .await?;
        Ok(())
    }
}

/// Extract the labels of a device document as `(id, key, value)`.
///
/// # Errors
///
/// Returns `CoreError::MalformedDocument` if a label lacks an id or key.
pub fn device_labels(device: &Value) -> Result<Vec<(String, String, String)>> {
    device
        .get("labels")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|label| {
            Ok((
                id_field(label, "id")?,
                str_field(label, "key")?.to_string(),
                label
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ))
        })
        .collect()
}

/// An in-memory platform for testing.
///
/// Resources are plain JSON documents shaped like the platform's. Every
/// mutating call is recorded, deployment phases can be scripted and
/// individual operations can be made to fail.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MockPlatform {
    state: parking_lot::Mutex<MockState>,
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
struct MockState {
    packages: Vec<(String, Value)>,
    networks: Vec<Value>,
    deployments: Vec<Value>,
    devices: Vec<Value>,
    phase_scripts: std::collections::HashMap<String, std::collections::VecDeque<Phase>>,
    provision_phases: Vec<Phase>,
    provision_requests: Vec<Value>,
    polls: std::collections::HashMap<String, usize>,
    failures: std::collections::HashMap<String, u16>,
    mutations: Vec<String>,
    misconfigured: bool,
    next_id: u32,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn mutate(&mut self, op: &str) -> Result<()> {
        self.mutations.push(op.to_string());
        self.fail(op)
    }

    fn fail(&mut self, op: &str) -> Result<()> {
        if self.misconfigured {
            return Err(AuthError::Configuration(format!("{op}: no project configured")).into());
        }
        match self.failures.remove(op) {
            Some(status) => Err(AuthError::RemoteApi {
                status,
                message: format!("{op} failed"),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn package_status(guid: &str, manifest: &Value) -> Value {
        let plan = manifest.pointer("/plans/0").cloned().unwrap_or_else(|| json!({}));
        let components = plan
            .get("components")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let internal: Vec<Value> = components
            .iter()
            .filter_map(|c| c.get("name").and_then(Value::as_str))
            .map(|name| json!({"componentName": name, "componentId": format!("comp-{name}")}))
            .collect();

        json!({
            "packageInfo": {
                "guid": guid,
                "name": manifest.get("name").cloned().unwrap_or(Value::Null),
                "plans": [{
                    "planId": plan.get("planId").and_then(Value::as_str).unwrap_or("plan-1"),
                    "components": {"components": components},
                    "internalComponents": internal,
                }],
            },
            "packageUrl": format!("mock://packages/{guid}"),
        })
    }

    fn find_label(&self, label_id: &str) -> Option<(usize, usize)> {
        self.devices.iter().enumerate().find_map(|(d, device)| {
            device["labels"].as_array().and_then(|labels| {
                labels
                    .iter()
                    .position(|l| id_field(l, "id").is_ok_and(|id| id == label_id))
                    .map(|l| (d, l))
            })
        })
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MockPlatform {
    /// Create an empty platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package from its manifest (`name`, `packageVersion`).
    ///
    /// # Panics
    ///
    /// Panics if the generated id is empty.
    pub fn insert_package(&self, manifest: Value) -> PackageGuid {
        let mut state = self.state.lock();
        let guid = state.next_id("pkg");
        state.packages.push((guid.clone(), manifest));
        PackageGuid::new(guid).expect("generated id")
    }

    /// Register a routed network.
    ///
    /// # Panics
    ///
    /// Panics if the generated id is empty.
    pub fn insert_network(&self, network: &Value, phase: Phase) -> NetworkGuid {
        let mut state = self.state.lock();
        let guid = state.next_id("net");
        let mut doc = network.clone();
        doc["guid"] = json!(guid);
        doc["internalDeploymentStatus"] = json!({"phase": phase.as_str()});
        state.networks.push(doc);
        NetworkGuid::new(guid).expect("generated id")
    }

    /// Register a deployment of `package_guid`.
    ///
    /// # Panics
    ///
    /// Panics if the generated id is empty.
    pub fn insert_deployment(&self, name: &str, package_guid: &str, phase: Phase) -> DeploymentId {
        let mut state = self.state.lock();
        let id = state.next_id("dep");
        state.deployments.push(json!({
            "deploymentId": id,
            "name": name,
            "packageId": package_guid,
            "planId": "plan-1",
            "phase": phase.as_str(),
        }));
        DeploymentId::new(id).expect("generated id")
    }

    /// Register a device with labels.
    ///
    /// # Panics
    ///
    /// Panics if the generated id is empty.
    pub fn insert_device(&self, name: &str, labels: &[(&str, &str)]) -> DeviceId {
        let mut state = self.state.lock();
        let uuid = state.next_id("dev");
        let mut docs = Vec::new();
        for (key, value) in labels {
            let id = state.next_id("label");
            docs.push(json!({"id": id, "key": key, "value": value}));
        }
        state.devices.push(json!({"uuid": uuid, "name": name, "labels": docs}));
        DeviceId::new(uuid).expect("generated id")
    }

    /// Phases successive polls of deployment `id` report; the last repeats.
    pub fn script_phases(&self, id: &DeploymentId, phases: &[Phase]) {
        self.state
            .lock()
            .phase_scripts
            .insert(id.to_string(), phases.iter().copied().collect());
    }

    /// Phases that deployments created by `provision` go through.
    pub fn set_provision_phases(&self, phases: &[Phase]) {
        self.state.lock().provision_phases = phases.to_vec();
    }

    /// Make the next call of `op` (e.g. `"create_package"`) fail with `status`.
    pub fn fail_next(&self, op: &str, status: u16) {
        self.state.lock().failures.insert(op.to_string(), status);
    }

    /// Make every listing and mutation fail with a configuration error.
    pub fn misconfigure(&self) {
        self.state.lock().misconfigured = true;
    }

    /// Names of the mutating operations performed so far.
    #[must_use]
    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().mutations.clone()
    }

    /// Number of mutating operations performed so far.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state.lock().mutations.len()
    }

    /// Number of times deployment `id` was fetched.
    #[must_use]
    pub fn poll_count(&self, id: &DeploymentId) -> usize {
        self.state.lock().polls.get(id.as_str()).copied().unwrap_or(0)
    }

    /// Provision requests received so far.
    #[must_use]
    pub fn provision_requests(&self) -> Vec<Value> {
        self.state.lock().provision_requests.clone()
    }

    /// Current package manifests.
    #[must_use]
    pub fn manifests(&self) -> Vec<Value> {
        self.state.lock().packages.iter().map(|(_, m)| m.clone()).collect()
    }

    /// Current routed network documents.
    #[must_use]
    pub fn networks(&self) -> Vec<Value> {
        self.state.lock().networks.clone()
    }

    /// Current deployment documents.
    #[must_use]
    pub fn deployments(&self) -> Vec<Value> {
        self.state.lock().deployments.clone()
    }

    /// Current labels of the device called `name` as `(key, value)` pairs.
    #[must_use]
    pub fn labels_of(&self, name: &str) -> Vec<(String, String)> {
        let state = self.state.lock();
        state
            .devices
            .iter()
            .find(|d| d["name"] == name)
            .and_then(|d| device_labels(d).ok())
            .unwrap_or_default()
            .into_iter()
            .map(|(_, key, value)| (key, value))
            .collect()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl PlatformApi for MockPlatform {
    async fn list_packages(&self) -> Result<Vec<Value>> {
        let mut state = self.state.lock();
        state.fail("list_packages")?;
        Ok(state
            .packages
            .iter()
            .map(|(guid, manifest)| {
                json!({
                    "id": guid,
                    "name": manifest.get("name").cloned().unwrap_or(Value::Null),
                    "metadata": {
                        "packageVersion": manifest.get("packageVersion").cloned().unwrap_or(Value::Null),
                    },
                })
            })
            .collect())
    }

    async fn get_package(&self, guid: &PackageGuid) -> Result<Lookup<Value>> {
        let state = self.state.lock();
        Ok(state
            .packages
            .iter()
            .find(|(g, _)| g == guid.as_str())
            .map(|(g, manifest)| MockState::package_status(g, manifest))
            .into())
    }

    async fn get_manifest(&self, guid: &PackageGuid) -> Result<Lookup<Value>> {
        let state = self.state.lock();
        Ok(state
            .packages
            .iter()
            .find(|(g, _)| g == guid.as_str())
            .map(|(_, manifest)| manifest.clone())
            .into())
    }

    async fn create_package(&self, manifest: &Value) -> Result<Value> {
        let mut state = self.state.lock();
        state.mutate("create_package")?;
        let guid = state.next_id("pkg");
        state.packages.push((guid.clone(), manifest.clone()));
        Ok(json!({"guid": guid}))
    }

    async fn delete_package(&self, guid: &PackageGuid) -> Result<()> {
        let mut state = self.state.lock();
        state.mutate("delete_package")?;
        state.packages.retain(|(g, _)| g != guid.as_str());
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<Value>> {
        let mut state = self.state.lock();
        state.fail("list_networks")?;
        Ok(state.networks.clone())
    }

    async fn get_network(&self, guid: &NetworkGuid) -> Result<Lookup<Value>> {
        let state = self.state.lock();
        Ok(state
            .networks
            .iter()
            .find(|n| n["guid"] == guid.as_str())
            .cloned()
            .into())
    }

    async fn create_network(&self, network: &Value) -> Result<Value> {
        let mut state = self.state.lock();
        state.mutate("create_network")?;
        let guid = state.next_id("net");
        let mut doc = network.clone();
        doc["guid"] = json!(guid);
        doc["internalDeploymentStatus"] = json!({"phase": Phase::Succeeded.as_str()});
        state.networks.push(doc);
        Ok(json!({"guid": guid}))
    }

    async fn delete_network(&self, guid: &NetworkGuid) -> Result<()> {
        let mut state = self.state.lock();
        state.mutate("delete_network")?;
        state.networks.retain(|n| n["guid"] != guid.as_str());
        Ok(())
    }

    async fn list_deployments(
        &self,
        package: Option<&PackageGuid>,
        phases: &[Phase],
    ) -> Result<Vec<Value>> {
        let mut state = self.state.lock();
        state.fail("list_deployments")?;
        Ok(state
            .deployments
            .iter()
            .filter(|d| package.map_or(true, |guid| d["packageId"] == guid.as_str()))
            .filter(|d| {
                phases.is_empty()
                    || d["phase"]
                        .as_str()
                        .and_then(|p| p.parse::<Phase>().ok())
                        .is_some_and(|p| phases.contains(&p))
            })
            .cloned()
            .collect())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Lookup<Value>> {
        let mut state = self.state.lock();
        *state.polls.entry(id.to_string()).or_default() += 1;

        let next = state.phase_scripts.get_mut(id.as_str()).and_then(|script| {
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            }
        });

        let Some(doc) = state.deployments.iter_mut().find(|d| d["deploymentId"] == id.as_str())
        else {
            return Ok(Lookup::NotFound);
        };
        if let Some(phase) = next {
            doc["phase"] = json!(phase.as_str());
        }
        Ok(Lookup::Found(doc.clone()))
    }

    async fn provision(&self, request: &Value) -> Result<DeploymentId> {
        let mut state = self.state.lock();
        state.mutate("provision")?;
        state.provision_requests.push(request.clone());

        let id = state.next_id("dep");
        state.deployments.push(json!({
            "deploymentId": id,
            "name": request.pointer("/context/name").cloned().unwrap_or(Value::Null),
            "packageId": request["service_id"],
            "planId": request["plan_id"],
            "phase": Phase::InProgress.as_str(),
        }));

        let phases = if state.provision_phases.is_empty() {
            vec![Phase::Succeeded]
        } else {
            state.provision_phases.clone()
        };
        state.phase_scripts.insert(id.clone(), phases.into());
        Ok(DeploymentId::new(id)?)
    }

    async fn deprovision(&self, deployment: &Value) -> Result<()> {
        let mut state = self.state.lock();
        state.mutate("deprovision")?;
        let id = str_field(deployment, "deploymentId")?.to_string();
        state.deployments.retain(|d| d["deploymentId"] != id.as_str());
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<Value>> {
        let mut state = self.state.lock();
        state.fail("list_devices")?;
        Ok(state.devices.clone())
    }

    async fn add_label(&self, device: &DeviceId, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.mutate("add_label")?;
        let label_id = state.next_id("label");
        if let Some(doc) = state.devices.iter_mut().find(|d| d["uuid"] == device.as_str()) {
            if let Some(labels) = doc["labels"].as_array_mut() {
                labels.push(json!({"id": label_id, "key": key, "value": value}));
            }
        }
        Ok(())
    }

    async fn update_label(&self, label_id: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.mutate("update_label")?;
        if let Some((d, l)) = state.find_label(label_id) {
            state.devices[d]["labels"][l] = json!({"id": label_id, "key": key, "value": value});
        }
        Ok(())
    }

    async fn delete_label(&self, label_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.mutate("delete_label")?;
        if let Some((d, l)) = state.find_label(label_id) {
            if let Some(labels) = state.devices[d]["labels"].as_array_mut() {
                labels.remove(l);
            }
        }
        Ok(())
    }
}
