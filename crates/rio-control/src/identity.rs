//! Identity resolution.
//!
//! Operators name resources by name (and version, for packages); the
//! platform addresses them by GUID. Each resolver lists the resources of one
//! kind and returns the canonical id of the match, or `NotFound`.

use rio_core::{DeploymentId, Lookup, NetworkGuid, PackageGuid, PackageRef};
use serde_json::Value;

use crate::error::Result;
use crate::lifecycle::{Phase, POSITIVE_PHASES};
use crate::platform::{str_field, PlatformApi};

/// Resolve a package by name and version.
///
/// Versions match with or without a leading `v`; the first match wins.
///
/// # Errors
///
/// Returns an error if the package list cannot be fetched or a matching
/// summary has no id.
pub async fn resolve_package(api: &dyn PlatformApi, package: &PackageRef) -> Result<Lookup<PackageGuid>> {
    for summary in api.list_packages().await? {
        let name = summary.get("name").and_then(Value::as_str).unwrap_or_default();
        let version = summary
            .pointer("/metadata/packageVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if package.matches(name, version) {
            let guid = PackageGuid::new(str_field(&summary, "id")?)?;
            tracing::debug!(package = %package, package_id = %guid, "Resolved package");
            return Ok(Lookup::Found(guid));
        }
    }
    Ok(Lookup::NotFound)
}

/// Resolve a routed network by name.
///
/// Only networks in a positive phase count; a failed or stopped network of
/// the same name is treated as absent.
///
/// # Errors
///
/// Returns an error if the network list cannot be fetched or a matching
/// network has no GUID.
pub async fn resolve_network(api: &dyn PlatformApi, name: &str) -> Result<Lookup<NetworkGuid>> {
    for network in api.list_networks().await? {
        if network.get("name").and_then(Value::as_str) != Some(name) {
            continue;
        }
        let phase = network
            .pointer("/internalDeploymentStatus/phase")
            .and_then(Value::as_str)
            .and_then(|p| p.parse::<Phase>().ok());
        if phase.is_some_and(Phase::is_positive) {
            return Ok(Lookup::Found(NetworkGuid::new(str_field(&network, "guid")?)?));
        }
    }
    Ok(Lookup::NotFound)
}

/// Resolve a deployment by name among deployments in a positive phase.
///
/// # Errors
///
/// Returns an error if the deployment list cannot be fetched or a matching
/// deployment has no id.
pub async fn resolve_deployment(api: &dyn PlatformApi, name: &str) -> Result<Lookup<DeploymentId>> {
    let deployments = api.list_deployments(None, &POSITIVE_PHASES).await?;
    match deployments
        .iter()
        .find(|d| d.get("name").and_then(Value::as_str) == Some(name))
    {
        Some(deployment) => Ok(Lookup::Found(DeploymentId::new(str_field(
            deployment,
            "deploymentId",
        )?)?)),
        None => Ok(Lookup::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use serde_json::json;

    #[tokio::test]
    async fn package_version_prefix_is_ignored() {
        let mock = MockPlatform::new();
        let guid = mock.insert_package(json!({"name": "grafana", "packageVersion": "v2.0"}));

        let found = resolve_package(&mock, &PackageRef::new("grafana", "2.0")).await.unwrap();
        assert_eq!(found, Lookup::Found(guid));

        let missing = resolve_package(&mock, &PackageRef::new("grafana", "3.0")).await.unwrap();
        assert_eq!(missing, Lookup::NotFound);
    }

    #[tokio::test]
    async fn failed_networks_are_absent() {
        let mock = MockPlatform::new();
        mock.insert_network(&json!({"name": "old"}), Phase::FailedToStart);
        let live = mock.insert_network(&json!({"name": "live"}), Phase::Succeeded);

        assert_eq!(resolve_network(&mock, "old").await.unwrap(), Lookup::NotFound);
        assert_eq!(resolve_network(&mock, "live").await.unwrap(), Lookup::Found(live));
    }

    #[tokio::test]
    async fn stopped_deployments_are_absent() {
        let mock = MockPlatform::new();
        mock.insert_deployment("stopped", "pkg-1", Phase::Stopped);
        let running = mock.insert_deployment("running", "pkg-1", Phase::Succeeded);

        assert_eq!(resolve_deployment(&mock, "stopped").await.unwrap(), Lookup::NotFound);
        assert_eq!(
            resolve_deployment(&mock, "running").await.unwrap(),
            Lookup::Found(running)
        );
    }

    #[tokio::test]
    async fn listing_failure_is_an_error() {
        let mock = MockPlatform::new();
        mock.fail_next("list_packages", 503);

        let result = resolve_package(&mock, &PackageRef::new("grafana", "v1")).await;
        assert!(result.is_err());
    }
}
