//! Declarative reconciliation of platform resources.
//!
//! Every "present" operation follows the same shape:
//!
//! ```text
//!   resolve identity ──▶ fetch observed ──▶ diff against desired
//!                                              │
//!                 ┌────────────────────────────┼──────────────────────┐
//!                 ▼                            ▼                      ▼
//!            empty diff                    dry run                 mutate
//!            (unchanged)               (would change)      (replace, then wait
//!                                                            for deployments)
//! ```
//!
//! "Absent" operations are the dual: resolve, no-op if already gone, report
//! in a dry run, otherwise delete.
//!
//! Errors never escape as `Err` except configuration errors; everything else
//! becomes a failed [`ReconcileOutcome`] carrying the error message. Once a
//! mutation has been applied, a later failure is reported with
//! `changed = Some(true)` so a half-applied replacement is never hidden.

use std::path::Path;
use std::sync::Arc;

use rio_core::diff::{diff_fields, is_empty, project};
use rio_core::{DeploymentId, DeviceId, Lookup, NetworkGuid, PackageGuid, PackageRef};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, Result};
use crate::identity::{resolve_deployment, resolve_network, resolve_package};
use crate::lifecycle::{wait_for_deployment, PollConfig, ProvisioningOutcome, POSITIVE_PHASES};
use crate::manifest::load_manifest;
use crate::platform::{device_labels, provision_request, str_field, PlatformApi};
use crate::types::{
    DeploymentSpec, Ensure, LabelSpec, NetworkSpec, ReconcileOptions, ReconcileOutcome, StateEntry,
};

/// Decides which devices a selector addresses.
pub trait TargetMatcher: Send + Sync {
    /// Returns true if the device described by `attributes` matches `selector`.
    fn matches(&self, selector: &str, attributes: &Value) -> bool;
}

/// Matches `*` against every device and anything else against the device name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameMatcher;

impl TargetMatcher for NameMatcher {
    fn matches(&self, selector: &str, attributes: &Value) -> bool {
        selector == "*" || attributes.get("name").and_then(Value::as_str) == Some(selector)
    }
}

/// Converges platform resources towards a desired state.
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn PlatformApi>,
    poll: PollConfig,
    cancel: CancellationToken,
    matcher: Arc<dyn TargetMatcher>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("poll", &self.poll)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Turn an operation result into an outcome.
///
/// Configuration errors propagate; every other error becomes a failed outcome.
fn settle(
    name: &str,
    result: Result<ReconcileOutcome>,
    options: ReconcileOptions,
) -> Result<ReconcileOutcome> {
    match result {
        Ok(outcome) => Ok(outcome.redacted(options.show_changes)),
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => {
            tracing::warn!(resource = %name, error = %e, "Reconciliation failed");
            Ok(ReconcileOutcome::failed(name, e.to_string()))
        }
    }
}

fn package_ref(manifest: &Value) -> Result<PackageRef> {
    let field = |key: &str| {
        manifest
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ControlError::InvalidManifest(format!("package manifest has no '{key}'")))
    };
    Ok(PackageRef::new(field("name")?, field("packageVersion")?))
}

fn package_label(manifest: &Value) -> String {
    package_ref(manifest).map_or_else(
        |_| {
            manifest
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("<unnamed package>")
                .to_string()
        },
        |package| package.to_string(),
    )
}

fn required<'a>(value: Option<&'a String>, what: &str, name: &str) -> Result<&'a str> {
    value
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ControlError::InvalidManifest(format!("'{name}' needs a {what}")))
}

impl Reconciler {
    /// Create a reconciler with default poll bounds and the name matcher.
    #[must_use]
    pub fn new(api: Arc<dyn PlatformApi>) -> Self {
        Self {
            api,
            poll: PollConfig::default(),
            cancel: CancellationToken::new(),
            matcher: Arc::new(NameMatcher),
        }
    }

    /// Use different provisioning poll bounds.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Interrupt provisioning waits when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Select devices with a different matcher.
    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn TargetMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    // =========================================================================
    // Packages
    // =========================================================================

    /// Ensure a package with this manifest exists.
    ///
    /// The manifest's `name` and `packageVersion` identify the package; every
    /// top-level key of the manifest is compared. Packages cannot be updated
    /// in place, so drift replaces the package, which is refused while a
    /// deployment of it is active.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn package_present(
        &self,
        manifest: &Value,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let name = package_label(manifest);
        settle(&name, self.ensure_package(manifest, options).await, options)
    }

    /// Ensure no package with this name and version exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn package_absent(
        &self,
        name: &str,
        version: &str,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let package = PackageRef::new(name, version);
        settle(
            &package.to_string(),
            self.remove_package(&package, options).await,
            options,
        )
    }

    async fn observed_package(&self, package: &PackageRef) -> Result<Lookup<(PackageGuid, Value)>> {
        let Lookup::Found(guid) = resolve_package(self.api.as_ref(), package).await? else {
            return Ok(Lookup::NotFound);
        };
        Ok(self
            .api
            .get_manifest(&guid)
            .await?
            .map(|manifest| (guid, manifest)))
    }

    async fn ensure_package_unused(&self, guid: &PackageGuid, message: String) -> Result<()> {
        let active = self.api.list_deployments(Some(guid), &POSITIVE_PHASES).await?;
        if active.is_empty() {
            Ok(())
        } else {
            tracing::info!(package_id = %guid, deployments = active.len(), "Package is in use");
            Err(ControlError::Precondition(message))
        }
    }

    async fn ensure_package(
        &self,
        desired: &Value,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let package = package_ref(desired)?;
        let name = package.to_string();

        let Lookup::Found((guid, observed)) = self.observed_package(&package).await? else {
            let diff = json!({"new": desired});
            if options.dry_run {
                return Ok(ReconcileOutcome::would_change(
                    name,
                    format!("New package '{package}' would be created"),
                    diff,
                ));
            }
            self.api.create_package(desired).await?;
            tracing::info!(package = %package, "Created package");
            return Ok(ReconcileOutcome::changed(
                name,
                format!("New package '{package}' created"),
                diff,
            ));
        };

        let fields: Vec<&str> = desired
            .as_object()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        let diff = diff_fields(&observed, desired, &fields);
        if is_empty(&diff) {
            return Ok(ReconcileOutcome::unchanged(
                name,
                format!("Package '{package}' is in the correct state"),
            ));
        }

        self.ensure_package_unused(
            &guid,
            format!("Package '{package}' is in use and can't be updated."),
        )
        .await?;

        if options.dry_run {
            return Ok(ReconcileOutcome::would_change(
                name,
                format!("Package '{package}' would be updated"),
                diff,
            ));
        }

        self.api.delete_package(&guid).await?;
        tracing::info!(package = %package, package_id = %guid, "Deleted package for replacement");

        if let Err(e) = self.api.create_package(desired).await {
            tracing::error!(package = %package, error = %e, "Re-creating package failed");
            return Ok(ReconcileOutcome::partially_applied(
                name,
                format!("Package '{package}' was deleted but re-creating it failed: {e}"),
                json!({"old": observed}),
            ));
        }
        tracing::info!(package = %package, "Replaced package");

        Ok(ReconcileOutcome::changed(
            name,
            format!("Package '{package}' was updated"),
            diff,
        ))
    }

    async fn remove_package(
        &self,
        package: &PackageRef,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let name = package.to_string();
        let Lookup::Found((guid, observed)) = self.observed_package(package).await? else {
            return Ok(ReconcileOutcome::unchanged(
                name,
                format!("Package '{package}' is not present"),
            ));
        };

        self.ensure_package_unused(
            &guid,
            format!("Package '{package}' is in use and can't be deleted."),
        )
        .await?;

        let diff = json!({"old": observed});
        if options.dry_run {
            return Ok(ReconcileOutcome::would_change(
                name,
                format!("Package '{package}' would be deleted"),
                diff,
            ));
        }

        self.api.delete_package(&guid).await?;
        tracing::info!(package = %package, package_id = %guid, "Deleted package");
        Ok(ReconcileOutcome::changed(
            name,
            format!("Package '{package}' deleted"),
            diff,
        ))
    }

    // =========================================================================
    // Routed networks
    // =========================================================================

    /// Ensure a routed network with these settings exists.
    ///
    /// Networks cannot be updated in place; drift replaces the network.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn network_present(
        &self,
        spec: &NetworkSpec,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        settle(&spec.name, self.ensure_network(spec, options).await, options)
    }

    /// Ensure no routed network with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn network_absent(
        &self,
        name: &str,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        settle(name, self.remove_network(name, options).await, options)
    }

    async fn observed_network(&self, name: &str) -> Result<Lookup<(NetworkGuid, Value)>> {
        let Lookup::Found(guid) = resolve_network(self.api.as_ref(), name).await? else {
            return Ok(Lookup::NotFound);
        };
        Ok(self.api.get_network(&guid).await?.map(|doc| (guid, doc)))
    }

    async fn ensure_network(
        &self,
        spec: &NetworkSpec,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let name = spec.name.as_str();
        let desired = spec.desired();

        let Lookup::Found((guid, observed)) = self.observed_network(name).await? else {
            let diff = json!({"new": desired});
            if options.dry_run {
                return Ok(ReconcileOutcome::would_change(
                    name,
                    format!("Network '{name}' would be created."),
                    diff,
                ));
            }
            self.api.create_network(&desired).await?;
            tracing::info!(network = %name, runtime = %spec.runtime, "Created routed network");
            return Ok(ReconcileOutcome::changed(
                name,
                format!("New network {name} created"),
                diff,
            ));
        };

        let mut current = project(&observed, &NetworkSpec::FIELDS);
        if let Some(fields) = current.as_object_mut() {
            fields.entry("parameters").or_insert_with(|| json!({}));
        }
        let diff = diff_fields(&current, &desired, &NetworkSpec::FIELDS);
        if is_empty(&diff) {
            return Ok(ReconcileOutcome::unchanged(
                name,
                format!("Network '{name}' is in the correct state."),
            ));
        }

        if options.dry_run {
            return Ok(ReconcileOutcome::would_change(
                name,
                format!("Network '{name}' would be replaced."),
                diff,
            ));
        }

        self.api.delete_network(&guid).await?;
        tracing::info!(network = %name, network_id = %guid, "Deleted routed network for replacement");

        if let Err(e) = self.api.create_network(&desired).await {
            tracing::error!(network = %name, error = %e, "Re-creating routed network failed");
            return Ok(ReconcileOutcome::partially_applied(
                name,
                format!("Network {name} was deleted but re-creating it failed: {e}"),
                json!({"old": current}),
            ));
        }
        tracing::info!(network = %name, "Replaced routed network");

        Ok(ReconcileOutcome::changed(
            name,
            format!("Network {name} replaced"),
            diff,
        ))
    }

    async fn remove_network(&self, name: &str, options: ReconcileOptions) -> Result<ReconcileOutcome> {
        let Lookup::Found((guid, observed)) = self.observed_network(name).await? else {
            return Ok(ReconcileOutcome::unchanged(
                name,
                format!("Network '{name}' is not present."),
            ));
        };

        let diff = json!({"old": project(&observed, &NetworkSpec::FIELDS)});
        if options.dry_run {
            return Ok(ReconcileOutcome::would_change(
                name,
                format!("Network '{name}' would be deleted."),
                diff,
            ));
        }

        self.api.delete_network(&guid).await?;
        tracing::info!(network = %name, network_id = %guid, "Deleted routed network");
        Ok(ReconcileOutcome::changed(
            name,
            format!("Network {name} deleted"),
            diff,
        ))
    }

    // =========================================================================
    // Deployments
    // =========================================================================

    /// Ensure a deployment of this package exists and is running.
    ///
    /// The package, routed networks and dependencies must already exist.
    /// A deployment of a different package is deprovisioned and provisioned
    /// again; new deployments are polled until they reach a terminal phase.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn deployment_present(
        &self,
        spec: &DeploymentSpec,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        settle(&spec.name, self.ensure_deployment(spec, options).await, options)
    }

    /// Ensure no active deployment with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn deployment_absent(
        &self,
        name: &str,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        settle(name, self.remove_deployment(name, options).await, options)
    }

    async fn observed_deployment(&self, name: &str) -> Result<Lookup<Value>> {
        let Lookup::Found(id) = resolve_deployment(self.api.as_ref(), name).await? else {
            return Ok(Lookup::NotFound);
        };
        self.api.get_deployment(&id).await
    }

    /// Resolve everything a provision request refers to.
    async fn provision_inputs(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<(PackageGuid, Value, Vec<NetworkGuid>, Vec<DeploymentId>)> {
        let api = self.api.as_ref();
        let missing_package =
            || ControlError::Precondition(format!("Package '{}' does not exist", spec.package));

        let guid = resolve_package(api, &spec.package)
            .await?
            .found()
            .ok_or_else(missing_package)?;
        let package = api.get_package(&guid).await?.found().ok_or_else(missing_package)?;

        let mut networks = Vec::with_capacity(spec.networks.len());
        for network in &spec.networks {
            let guid = resolve_network(api, network).await?.found().ok_or_else(|| {
                ControlError::Precondition(format!("Routed network '{network}' does not exist"))
            })?;
            networks.push(guid);
        }

        let mut dependencies = Vec::with_capacity(spec.dependencies.len());
        for dependency in &spec.dependencies {
            let id = resolve_deployment(api, dependency).await?.found().ok_or_else(|| {
                ControlError::Precondition(format!(
                    "Dependent deployment '{dependency}' does not exist"
                ))
            })?;
            dependencies.push(id);
        }

        Ok((guid, package, networks, dependencies))
    }

    async fn await_provisioned(&self, name: &str, id: &DeploymentId) -> Result<Value> {
        match wait_for_deployment(self.api.as_ref(), id, &self.poll, &self.cancel).await? {
            ProvisioningOutcome::Succeeded(doc) => {
                tracing::info!(deployment = %name, deployment_id = %id, "Deployment running");
                Ok(doc)
            }
            ProvisioningOutcome::Failed(phase) => Err(ControlError::ProvisioningFailed {
                deployment: name.to_string(),
                phase,
            }),
        }
    }

    async fn ensure_deployment(
        &self,
        spec: &DeploymentSpec,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let name = spec.name.as_str();
        let (guid, package, networks, dependencies) = self.provision_inputs(spec).await?;
        let desired = json!({"packageId": guid.as_str()});

        let observed = self.observed_deployment(name).await?;
        let (diff, replaced) = match &observed {
            Lookup::Found(doc) => {
                let diff = diff_fields(doc, &desired, &["packageId"]);
                if is_empty(&diff) {
                    return Ok(ReconcileOutcome::unchanged(
                        name,
                        format!("Deployment '{name}' is in the correct state"),
                    ));
                }
                (diff, Some(doc))
            }
            Lookup::NotFound => (
                json!({"new": {
                    "name": name,
                    "package": spec.package.to_string(),
                    "packageId": guid.as_str(),
                    "parameters": spec.parameters,
                    "networks": spec.networks,
                    "dependencies": spec.dependencies,
                }}),
                None,
            ),
        };

        if options.dry_run {
            let message = if replaced.is_some() {
                format!("Deployment '{name}' would be replaced")
            } else {
                format!("Deployment '{name}' would be created")
            };
            return Ok(ReconcileOutcome::would_change(name, message, diff));
        }

        let request = provision_request(name, &package, &spec.parameters, &networks, &dependencies)?;

        if let Some(doc) = replaced {
            self.api.deprovision(doc).await?;
            tracing::info!(deployment = %name, "Deprovisioned deployment for replacement");
        }

        let provisioned = match self.api.provision(&request).await {
            Ok(id) => {
                tracing::info!(deployment = %name, deployment_id = %id, "Provisioning deployment");
                self.await_provisioned(name, &id).await
            }
            // A rejected submission without a prior deprovision changed nothing
            Err(e) if replaced.is_none() => return Err(e),
            Err(e) => Err(e),
        };

        match provisioned {
            Ok(_) => Ok(ReconcileOutcome::changed(
                name,
                if replaced.is_some() {
                    format!("Deployment '{name}' replaced")
                } else {
                    format!("Deployment '{name}' created")
                },
                diff,
            )),
            Err(e) if e.is_configuration() => Err(e),
            Err(e) => {
                tracing::error!(deployment = %name, error = %e, "Provisioning did not succeed");
                let prefix = if replaced.is_some() {
                    "was deprovisioned but provisioning it again failed"
                } else {
                    "was submitted but provisioning failed"
                };
                Ok(ReconcileOutcome::partially_applied(
                    name,
                    format!("Deployment '{name}' {prefix}: {e}"),
                    diff,
                ))
            }
        }
    }

    async fn remove_deployment(
        &self,
        name: &str,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let Lookup::Found(observed) = self.observed_deployment(name).await? else {
            return Ok(ReconcileOutcome::unchanged(
                name,
                format!("Deployment '{name}' is not present"),
            ));
        };

        let diff = json!({"old": observed});
        if options.dry_run {
            return Ok(ReconcileOutcome::would_change(
                name,
                format!("Deployment '{name}' would be removed"),
                diff,
            ));
        }

        self.api.deprovision(&observed).await?;
        tracing::info!(deployment = %name, "Deprovisioned deployment");
        Ok(ReconcileOutcome::changed(
            name,
            format!("Deployment '{name}' removed"),
            diff,
        ))
    }

    // =========================================================================
    // Device labels
    // =========================================================================

    /// Ensure every matching device carries `key=value`.
    ///
    /// An empty value removes the label instead.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn device_label_present(
        &self,
        spec: &LabelSpec,
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        settle(&spec.key, self.ensure_label(spec, options).await, options)
    }

    async fn plan_labels(&self, spec: &LabelSpec) -> Result<Vec<LabelChange>> {
        let mut plan = Vec::new();
        for device in self.api.list_devices().await? {
            if !self.matcher.matches(&spec.selector, &device) {
                continue;
            }
            let device_name = device
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let existing = device_labels(&device)?
                .into_iter()
                .find(|(_, key, _)| *key == spec.key);

            let action = match (existing, spec.value.is_empty()) {
                (None, true) => continue,
                (Some((label_id, _, _)), true) => LabelAction::Delete(label_id),
                (Some((_, _, value)), false) if value == spec.value => continue,
                (Some((label_id, _, _)), false) => LabelAction::Update(label_id),
                (None, false) => LabelAction::Add(DeviceId::new(str_field(&device, "uuid")?)?),
            };
            plan.push(LabelChange { device_name, action });
        }
        Ok(plan)
    }

    async fn ensure_label(&self, spec: &LabelSpec, options: ReconcileOptions) -> Result<ReconcileOutcome> {
        let key = spec.key.as_str();
        let plan = self.plan_labels(spec).await?;

        if plan.is_empty() {
            return Ok(ReconcileOutcome::unchanged(
                key,
                format!("Label '{key}' is in the correct state on all matching devices"),
            ));
        }
        if options.dry_run {
            return Ok(ReconcileOutcome::would_change(
                key,
                format!("Label '{key}' would be changed on {} device(s)", plan.len()),
                label_diff(&plan),
            ));
        }

        for (done, change) in plan.iter().enumerate() {
            let result = match &change.action {
                LabelAction::Add(device) => self.api.add_label(device, key, &spec.value).await,
                LabelAction::Update(label_id) => {
                    self.api.update_label(label_id, key, &spec.value).await
                }
                LabelAction::Delete(label_id) => self.api.delete_label(label_id).await,
            };

            if let Err(e) = result {
                if e.is_configuration() || done == 0 {
                    return Err(e);
                }
                tracing::error!(label = %key, device = %change.device_name, error = %e, "Label change failed");
                return Ok(ReconcileOutcome::partially_applied(
                    key,
                    format!(
                        "Label '{key}' changed on {done} device(s) before failing on '{}': {e}",
                        change.device_name
                    ),
                    label_diff(&plan[..done]),
                ));
            }
            tracing::info!(label = %key, device = %change.device_name, action = change.action.verb(), "Applied label change");
        }

        Ok(ReconcileOutcome::changed(
            key,
            format!("Label '{key}' changed on {} device(s)", plan.len()),
            label_diff(&plan),
        ))
    }

    // =========================================================================
    // State entries
    // =========================================================================

    /// Reconcile one entry of a state file.
    ///
    /// Invalid entries (a missing version, runtime, ...) yield a failed
    /// outcome rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems.
    pub async fn apply(&self, entry: &StateEntry, options: ReconcileOptions) -> Result<ReconcileOutcome> {
        match entry {
            StateEntry::Package {
                ensure: Ensure::Present,
                name,
                version,
                manifest,
                source,
            } => match desired_manifest(name, version.as_deref(), manifest.as_ref(), source.as_deref()) {
                Ok(manifest) => self.package_present(&manifest, options).await,
                Err(e) => settle(name, Err(e), options),
            },
            StateEntry::Package {
                ensure: Ensure::Absent,
                name,
                version,
                ..
            } => match required(version.as_ref(), "version", name) {
                Ok(version) => self.package_absent(name, version, options).await,
                Err(e) => settle(name, Err(e), options),
            },
            StateEntry::Network {
                ensure: Ensure::Present,
                name,
                runtime,
                ros_distro,
                parameters,
            } => {
                let spec = required(runtime.as_ref(), "runtime", name).and_then(|runtime| {
                    Ok(NetworkSpec {
                        name: name.clone(),
                        runtime: runtime.to_string(),
                        ros_distro: required(ros_distro.as_ref(), "ros_distro", name)?.to_string(),
                        parameters: parameters.clone().unwrap_or(Value::Null),
                    })
                });
                match spec {
                    Ok(spec) => self.network_present(&spec, options).await,
                    Err(e) => settle(name, Err(e), options),
                }
            }
            StateEntry::Network {
                ensure: Ensure::Absent,
                name,
                ..
            } => self.network_absent(name, options).await,
            StateEntry::Deployment {
                ensure: Ensure::Present,
                name,
                package,
                version,
                parameters,
                networks,
                dependencies,
            } => {
                let spec = required(package.as_ref(), "package", name).and_then(|package| {
                    Ok(DeploymentSpec {
                        name: name.clone(),
                        package: PackageRef::new(
                            package,
                            required(version.as_ref(), "version", name)?,
                        ),
                        parameters: parameters.clone().unwrap_or_else(|| json!({})),
                        networks: networks.clone(),
                        dependencies: dependencies.clone(),
                    })
                });
                match spec {
                    Ok(spec) => self.deployment_present(&spec, options).await,
                    Err(e) => settle(name, Err(e), options),
                }
            }
            StateEntry::Deployment {
                ensure: Ensure::Absent,
                name,
                ..
            } => self.deployment_absent(name, options).await,
            StateEntry::DeviceLabel {
                selector,
                key,
                value,
            } => {
                let spec = LabelSpec {
                    selector: selector.clone(),
                    key: key.clone(),
                    value: value.clone(),
                };
                self.device_label_present(&spec, options).await
            }
        }
    }
}

/// Build the desired manifest of a package entry.
///
/// An inline manifest wins over `source`; `name` and `version` fill the
/// manifest's `name` and `packageVersion` when it has none.
fn desired_manifest(
    name: &str,
    version: Option<&str>,
    inline: Option<&Value>,
    source: Option<&Path>,
) -> Result<Value> {
    let mut manifest = match (inline, source) {
        (Some(manifest), _) => manifest.clone(),
        (None, Some(path)) => load_manifest(path)?,
        (None, None) => {
            return Err(ControlError::InvalidManifest(format!(
                "package '{name}' needs a manifest or a source"
            )))
        }
    };

    let Some(fields) = manifest.as_object_mut() else {
        return Err(ControlError::InvalidManifest(format!(
            "manifest of package '{name}' is not a mapping"
        )));
    };
    fields.entry("name").or_insert_with(|| json!(name));
    if let Some(version) = version {
        fields.entry("packageVersion").or_insert_with(|| json!(version));
    }
    Ok(manifest)
}

#[derive(Debug)]
enum LabelAction {
    Add(DeviceId),
    Update(String),
    Delete(String),
}

impl LabelAction {
    const fn verb(&self) -> &'static str {
        match self {
            Self::Add(_) => "added",
            Self::Update(_) => "updated",
            Self::Delete(_) => "deleted",
        }
    }
}

#[derive(Debug)]
struct LabelChange {
    device_name: String,
    action: LabelAction,
}

fn label_diff(changes: &[LabelChange]) -> Value {
    let names = |verb: &str| -> Vec<&str> {
        changes
            .iter()
            .filter(|c| c.action.verb() == verb)
            .map(|c| c.device_name.as_str())
            .collect()
    };
    json!({
        "added": names("added"),
        "updated": names("updated"),
        "deleted": names("deleted"),
    })
}
