//! Deployment provisioning state machine.
//!
//! Provisioning a deployment is asynchronous: the platform accepts the
//! request, hands back an operation id and moves the deployment through a
//! series of phases. [`wait_for_deployment`] polls the deployment at a fixed
//! interval until it leaves the in-flight phases.
//!
//! # Phases
//!
//! ```text
//!        ┌──────────────┐      ┌──────────────┐
//!  ────▶ │ In progress  │─────▶│ Provisioning │
//!        └──────┬───────┘      └──────┬───────┘
//!               │                     │
//!               ▼                     ▼
//!   ┌────────────────────────────────────────────────┐
//!   │ Succeeded │ Failed to start │ Partially        │
//!   │           │                 │ deprovisioned    │
//!   │           │                 │ Deployment       │
//!   │           │                 │ stopped          │
//!   └────────────────────────────────────────────────┘
//! ```
//!
//! The wait is bounded by both an attempt count and a total duration, and
//! can be interrupted through a [`CancellationToken`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rio_auth::PlatformConfig;
use rio_core::{DeploymentId, Lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, Result};
use crate::platform::PlatformApi;

/// Phase of a deployment (or routed network) on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Phase {
    /// Accepted, not yet provisioning.
    InProgress,
    /// Resources are being provisioned.
    Provisioning,
    /// Running.
    Succeeded,
    /// Provisioning failed.
    FailedToStart,
    /// Deprovisioning did not complete.
    PartiallyDeprovisioned,
    /// Stopped by the user or platform.
    Stopped,
}

/// Phases that count as "exists" when listing resources.
pub const POSITIVE_PHASES: [Phase; 3] = [Phase::InProgress, Phase::Provisioning, Phase::Succeeded];

impl Phase {
    /// The platform's wire string for this phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "In progress",
            Self::Provisioning => "Provisioning",
            Self::Succeeded => "Succeeded",
            Self::FailedToStart => "Failed to start",
            Self::PartiallyDeprovisioned => "Partially deprovisioned",
            Self::Stopped => "Deployment stopped",
        }
    }

    /// Returns true while provisioning has not finished.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::InProgress | Self::Provisioning)
    }

    /// Returns true if no further transition will occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    /// Returns true for phases where the resource is considered present.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::InProgress | Self::Provisioning | Self::Succeeded)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ControlError;

    /// Parse a phase, ignoring case and accepting `_` for spaces.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('_', " ").to_ascii_lowercase();
        match normalized.as_str() {
            "in progress" | "inprogress" => Ok(Self::InProgress),
            "provisioning" => Ok(Self::Provisioning),
            "succeeded" => Ok(Self::Succeeded),
            "failed to start" => Ok(Self::FailedToStart),
            "partially deprovisioned" => Ok(Self::PartiallyDeprovisioned),
            "deployment stopped" | "stopped" => Ok(Self::Stopped),
            _ => Err(ControlError::Internal(format!("unknown phase: {s}"))),
        }
    }
}

impl TryFrom<String> for Phase {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.as_str().to_string()
    }
}

/// Bounds on the provisioning wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between status polls.
    pub interval: Duration,
    /// Maximum number of status polls.
    pub max_attempts: u32,
    /// Maximum total wait.
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from_platform(&PlatformConfig::default())
    }
}

impl PollConfig {
    /// Take the poll bounds from platform configuration.
    #[must_use]
    pub const fn from_platform(config: &PlatformConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.poll_max_attempts,
            max_wait: config.poll_max_wait(),
        }
    }
}

/// Terminal result of a provisioning wait.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningOutcome {
    /// The deployment is running; carries the last observed document.
    Succeeded(Value),
    /// The deployment ended in another terminal phase.
    Failed(Phase),
}

/// Read the phase of a deployment document.
///
/// # Errors
///
/// Returns an error if the document has no recognised `phase`.
pub fn deployment_phase(doc: &Value) -> Result<Phase> {
    doc.get("phase")
        .and_then(Value::as_str)
        .ok_or_else(|| ControlError::Internal("deployment has no phase".to_string()))?
        .parse()
}

/// Poll a deployment until it reaches a terminal phase.
///
/// The deployment starts out `In progress`. Each round sleeps one interval,
/// cut short so the wait never runs past `max_wait`, and then fetches the
/// deployment.
///
/// # Errors
///
/// Returns an error if:
/// - The poll bounds are exhausted (`ProvisioningTimedOut`)
/// - `cancel` fires (`ProvisioningCancelled`)
/// - The deployment disappears or a status call fails
pub async fn wait_for_deployment(
    api: &dyn PlatformApi,
    operation_id: &DeploymentId,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<ProvisioningOutcome> {
    let started = Instant::now();
    let mut phase = Phase::InProgress;
    let mut attempts = 0u32;

    while phase.is_in_flight() {
        if attempts >= config.max_attempts || started.elapsed() >= config.max_wait {
            tracing::warn!(
                deployment_id = %operation_id,
                attempts,
                phase = %phase,
                "Provisioning wait exhausted"
            );
            return Err(ControlError::ProvisioningTimedOut {
                operation_id: operation_id.to_string(),
                attempts,
                waited: started.elapsed(),
            });
        }

        let nap = config
            .interval
            .min(config.max_wait.saturating_sub(started.elapsed()));
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(deployment_id = %operation_id, "Provisioning wait cancelled");
                return Err(ControlError::ProvisioningCancelled(operation_id.to_string()));
            }
            () = tokio::time::sleep(nap) => {}
        }

        attempts += 1;
        let doc = match api.get_deployment(operation_id).await? {
            Lookup::Found(doc) => doc,
            Lookup::NotFound => {
                return Err(ControlError::Internal(format!(
                    "deployment {operation_id} disappeared while provisioning"
                )));
            }
        };

        phase = deployment_phase(&doc)?;
        tracing::debug!(deployment_id = %operation_id, attempts, phase = %phase, "Polled deployment");

        if phase == Phase::Succeeded {
            return Ok(ProvisioningOutcome::Succeeded(doc));
        }
    }

    Ok(ProvisioningOutcome::Failed(phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;

    fn poll(max_attempts: u32, max_wait_secs: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(10),
            max_attempts,
            max_wait: Duration::from_secs(max_wait_secs),
        }
    }

    fn deployment(mock: &MockPlatform, phases: &[Phase]) -> DeploymentId {
        let id = mock.insert_deployment("grafana-dep", "pkg-1", Phase::InProgress);
        mock.script_phases(&id, phases);
        id
    }

    #[test]
    fn phase_wire_strings() {
        for phase in [
            Phase::InProgress,
            Phase::Provisioning,
            Phase::Succeeded,
            Phase::FailedToStart,
            Phase::PartiallyDeprovisioned,
            Phase::Stopped,
        ] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
    }

    #[test]
    fn phase_parsing_is_lenient() {
        assert_eq!("IN_PROGRESS".parse::<Phase>().unwrap(), Phase::InProgress);
        assert_eq!("In Progress".parse::<Phase>().unwrap(), Phase::InProgress);
        assert_eq!("FAILED_TO_START".parse::<Phase>().unwrap(), Phase::FailedToStart);
        assert!("Exploded".parse::<Phase>().is_err());
    }

    #[test]
    fn phase_classes() {
        assert!(Phase::Provisioning.is_in_flight());
        assert!(Phase::Succeeded.is_terminal());
        assert!(Phase::Succeeded.is_positive());
        assert!(!Phase::FailedToStart.is_positive());
        assert_eq!(POSITIVE_PHASES.iter().filter(|p| p.is_in_flight()).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_third_poll() {
        let mock = MockPlatform::new();
        let id = deployment(
            &mock,
            &[Phase::InProgress, Phase::Provisioning, Phase::Succeeded],
        );
        let started = Instant::now();

        let outcome = wait_for_deployment(&mock, &id, &poll(10, 600), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, ProvisioningOutcome::Succeeded(ref doc) if doc["phase"] == "Succeeded"));
        assert_eq!(mock.poll_count(&id), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_after_second_poll() {
        let mock = MockPlatform::new();
        let id = deployment(&mock, &[Phase::InProgress, Phase::FailedToStart]);

        let outcome = wait_for_deployment(&mock, &id, &poll(10, 600), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Failed(Phase::FailedToStart));
        assert_eq!(mock.poll_count(&id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_bound_times_out() {
        let mock = MockPlatform::new();
        let id = deployment(&mock, &[Phase::Provisioning]);

        let err = wait_for_deployment(&mock, &id, &poll(3, 600), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::ProvisioningTimedOut { attempts: 3, .. }));
        assert_eq!(mock.poll_count(&id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_bound_times_out() {
        let mock = MockPlatform::new();
        let id = deployment(&mock, &[Phase::InProgress]);

        let started = Instant::now();

        let err = wait_for_deployment(&mock, &id, &poll(100, 45), &CancellationToken::new())
            .await
            .unwrap_err();

        // Polls at 10, 20, 30, 40 and a last one at the 45s bound
        assert!(matches!(
            err,
            ControlError::ProvisioningTimedOut { attempts: 5, waited, .. } if waited == Duration::from_secs(45)
        ));
        assert_eq!(mock.poll_count(&id), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let mock = MockPlatform::new();
        let id = deployment(&mock, &[Phase::InProgress]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let err = wait_for_deployment(&mock, &id, &poll(100, 6000), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::ProvisioningCancelled(_)));
        assert_eq!(mock.poll_count(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_deployment_is_an_error() {
        let mock = MockPlatform::new();
        let id = DeploymentId::new("dep-missing").unwrap();

        let err = wait_for_deployment(&mock, &id, &poll(10, 600), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::Internal(_)));
    }
}
