//! Request and result types for reconciliation.

use std::path::PathBuf;

use rio_core::PackageRef;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Placeholder that replaces the diff when changes are hidden.
pub const HIDDEN_CHANGES: &str = "<show_changes=False>";

/// How a reconciliation call behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Compute and report the change without mutating anything.
    pub dry_run: bool,
    /// Include the diff in the outcome.
    pub show_changes: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            show_changes: true,
        }
    }
}

impl ReconcileOptions {
    /// Options for a dry run.
    #[must_use]
    pub const fn dry_run() -> Self {
        Self {
            dry_run: true,
            show_changes: true,
        }
    }
}

/// Uniform result of one reconciliation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// The resource this outcome is about.
    pub name: String,
    /// Whether the resource is (or, in a dry run, would be) in the desired state.
    pub succeeded: bool,
    /// Whether remote state was changed; `None` for dry-run would-change results.
    pub changed: Option<bool>,
    /// Human-readable summary.
    pub message: String,
    /// What changed, or [`HIDDEN_CHANGES`].
    pub diff: Value,
}

impl ReconcileOutcome {
    /// The resource already matched; nothing was done.
    #[must_use]
    pub fn unchanged(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeeded: true,
            changed: Some(false),
            message: message.into(),
            diff: Value::Object(Map::new()),
        }
    }

    /// Remote state was changed.
    #[must_use]
    pub fn changed(name: impl Into<String>, message: impl Into<String>, diff: Value) -> Self {
        Self {
            name: name.into(),
            succeeded: true,
            changed: Some(true),
            message: message.into(),
            diff,
        }
    }

    /// A dry run found a change it would make.
    #[must_use]
    pub fn would_change(name: impl Into<String>, message: impl Into<String>, diff: Value) -> Self {
        Self {
            name: name.into(),
            succeeded: true,
            changed: None,
            message: message.into(),
            diff,
        }
    }

    /// Reconciliation failed before changing anything.
    #[must_use]
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeeded: false,
            changed: Some(false),
            message: message.into(),
            diff: Value::Object(Map::new()),
        }
    }

    /// Reconciliation failed after part of the change was applied.
    #[must_use]
    pub fn partially_applied(name: impl Into<String>, message: impl Into<String>, diff: Value) -> Self {
        Self {
            name: name.into(),
            succeeded: false,
            changed: Some(true),
            message: message.into(),
            diff,
        }
    }

    /// Replace a non-empty diff with [`HIDDEN_CHANGES`] unless `show_changes`.
    #[must_use]
    pub fn redacted(mut self, show_changes: bool) -> Self {
        if !show_changes && !rio_core::diff::is_empty(&self.diff) {
            self.diff = json!(HIDDEN_CHANGES);
        }
        self
    }
}

/// Desired state of a routed network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Network name.
    pub name: String,
    /// `cloud` or `device`.
    pub runtime: String,
    /// ROS distribution, e.g. `melodic`.
    pub ros_distro: String,
    /// Runtime-specific parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl NetworkSpec {
    /// Fields of a network that reconciliation controls.
    pub const FIELDS: [&'static str; 4] = ["name", "runtime", "rosDistro", "parameters"];

    /// The network as the platform describes it.
    #[must_use]
    pub fn desired(&self) -> Value {
        let parameters = if self.parameters.is_null() {
            json!({})
        } else {
            self.parameters.clone()
        };
        json!({
            "name": self.name,
            "runtime": self.runtime,
            "rosDistro": self.ros_distro,
            "parameters": parameters,
        })
    }
}

/// Desired state of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Deployment name.
    pub name: String,
    /// Package to deploy.
    pub package: PackageRef,
    /// Parameters per component name.
    #[serde(default)]
    pub parameters: Value,
    /// Names of routed networks to attach.
    #[serde(default)]
    pub networks: Vec<String>,
    /// Names of deployments this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Desired value of a label on a set of devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSpec {
    /// Device selector passed to the target matcher.
    pub selector: String,
    /// Label key.
    pub key: String,
    /// Label value; empty removes the label.
    pub value: String,
}

/// Whether a resource should exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ensure {
    /// The resource should exist and match.
    #[default]
    Present,
    /// The resource should not exist.
    Absent,
}

fn default_selector() -> String {
    "*".to_string()
}

/// One entry of a state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateEntry {
    /// A package manifest.
    Package {
        /// Present or absent.
        #[serde(default)]
        ensure: Ensure,
        /// Package name; also fills a manifest without one.
        name: String,
        /// Package version; required when absent.
        #[serde(default)]
        version: Option<String>,
        /// Inline manifest.
        #[serde(default)]
        manifest: Option<Value>,
        /// Manifest file (`.json`, `.yaml`, `.yml`).
        #[serde(default)]
        source: Option<PathBuf>,
    },
    /// A routed network.
    Network {
        /// Present or absent.
        #[serde(default)]
        ensure: Ensure,
        /// Network name.
        name: String,
        /// Runtime; required when present.
        #[serde(default)]
        runtime: Option<String>,
        /// ROS distribution; required when present.
        #[serde(default)]
        ros_distro: Option<String>,
        /// Runtime-specific parameters.
        #[serde(default)]
        parameters: Option<Value>,
    },
    /// A deployment.
    Deployment {
        /// Present or absent.
        #[serde(default)]
        ensure: Ensure,
        /// Deployment name.
        name: String,
        /// Package name; required when present.
        #[serde(default)]
        package: Option<String>,
        /// Package version; required when present.
        #[serde(default)]
        version: Option<String>,
        /// Parameters per component name.
        #[serde(default)]
        parameters: Option<Value>,
        /// Names of routed networks to attach.
        #[serde(default)]
        networks: Vec<String>,
        /// Names of deployments this one depends on.
        #[serde(default)]
        dependencies: Vec<String>,
    },
    /// A label on matching devices.
    DeviceLabel {
        /// Device selector; `*` matches every device.
        #[serde(default = "default_selector")]
        selector: String,
        /// Label key.
        key: String,
        /// Label value; empty removes the label.
        #[serde(default)]
        value: String,
    },
}

impl StateEntry {
    /// Name used for the outcome of this entry.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Package { name, .. }
            | Self::Network { name, .. }
            | Self::Deployment { name, .. } => name,
            Self::DeviceLabel { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_hides_only_non_empty_diffs() {
        let changed = ReconcileOutcome::changed("net", "created", json!({"new": {"name": "net"}}));
        assert_eq!(changed.clone().redacted(true), changed);
        assert_eq!(changed.redacted(false).diff, json!(HIDDEN_CHANGES));

        let unchanged = ReconcileOutcome::unchanged("net", "in the correct state");
        assert_eq!(unchanged.redacted(false).diff, json!({}));
    }

    #[test]
    fn outcome_serializes_uniformly() {
        let outcome = ReconcileOutcome::would_change("grafana v2", "would be created", json!({}));
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "name": "grafana v2",
                "succeeded": true,
                "changed": null,
                "message": "would be created",
                "diff": {},
            })
        );
    }

    #[test]
    fn network_parameters_default_to_empty_mapping() {
        let spec = NetworkSpec {
            name: "net".to_string(),
            runtime: "cloud".to_string(),
            ros_distro: "melodic".to_string(),
            parameters: Value::Null,
        };
        assert_eq!(spec.desired()["parameters"], json!({}));
    }

    #[test]
    fn state_entries_parse() {
        let entries: Vec<StateEntry> = serde_json::from_value(json!([
            {"kind": "network", "name": "net", "runtime": "cloud", "ros_distro": "melodic"},
            {"kind": "deployment", "ensure": "absent", "name": "old"},
            {"kind": "device_label", "key": "site", "value": "lab"},
        ]))
        .unwrap();

        assert!(matches!(&entries[0], StateEntry::Network { ensure: Ensure::Present, .. }));
        assert!(matches!(&entries[1], StateEntry::Deployment { ensure: Ensure::Absent, .. }));
        assert!(matches!(&entries[2], StateEntry::DeviceLabel { selector, .. } if selector == "*"));
        assert_eq!(entries[2].name(), "site");
    }
}
