//! Readiness gate for one deployment attempt.
//!
//! The poller owns a transient record of which services have been confirmed
//! healthy and walks an explicit state machine:
//!
//! `Pending` -> `Polling` -> `Healthy` | `TimedOut`
//!
//! Each iteration waits one poll interval, then checks every service that
//! has not yet reported healthy. A healthy mark is sticky for the attempt;
//! a fresh deployment starts a fresh attempt. Transient probe errors count
//! as "not yet healthy", never as fatal.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HealthTarget, ServiceSpec};

/// Health signal reported by a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Initial state before the first check of a service.
    Unknown,
}

/// State of one deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Polling,
    Healthy,
    TimedOut,
}

/// Outcome of one attempt, naming every service either way.
#[derive(Debug)]
pub struct AttemptReport {
    pub state: AttemptState,
    pub healthy: Vec<String>,
    pub unhealthy: Vec<String>,
    pub iterations: u32,
    /// True when the attempt was cancelled mid-poll; started services are
    /// left running, stopping is an explicit separate action.
    pub cancelled: bool,
}

impl AttemptReport {
    pub fn is_success(&self) -> bool {
        self.state == AttemptState::Healthy
    }
}

/// Probes one service's health signal.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, spec: &ServiceSpec) -> HealthStatus;
}

/// Production probe: HTTP GET (2xx is healthy) or shell command (exit 0 is
/// healthy). Any transport or spawn error is simply "not healthy yet".
pub struct ServiceProbe {
    client: reqwest::Client,
}

impl ServiceProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for ServiceProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for ServiceProbe {
    async fn probe(&self, spec: &ServiceSpec) -> HealthStatus {
        match &spec.health {
            HealthTarget::Http { url } => match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => HealthStatus::Healthy,
                Ok(response) => {
                    debug!("Service {} returned status {}", spec.name, response.status());
                    HealthStatus::Unhealthy
                }
                Err(e) => {
                    debug!("Failed to check service {}: {}", spec.name, e);
                    HealthStatus::Unhealthy
                }
            },
            HealthTarget::Command { command } => {
                match tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .output()
                    .await
                {
                    Ok(output) if output.status.success() => HealthStatus::Healthy,
                    Ok(output) => {
                        debug!(
                            "Health command for {} exited with {}",
                            spec.name, output.status
                        );
                        HealthStatus::Unhealthy
                    }
                    Err(e) => {
                        debug!("Failed to run health command for {}: {}", spec.name, e);
                        HealthStatus::Unhealthy
                    }
                }
            }
        }
    }
}

/// Waiting primitive between poll iterations, injected so tests run
/// without real timers.
#[async_trait]
pub trait PollClock: Send + Sync {
    async fn wait(&self, interval: Duration);
}

pub struct TokioClock;

#[async_trait]
impl PollClock for TokioClock {
    async fn wait(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Which services are confirmed healthy within the current attempt.
/// Discarded when the attempt concludes.
struct DeploymentState {
    marks: HashMap<String, HealthStatus>,
}

impl DeploymentState {
    fn new(specs: &[ServiceSpec]) -> Self {
        Self {
            marks: specs
                .iter()
                .map(|s| (s.name.clone(), HealthStatus::Unknown))
                .collect(),
        }
    }

    fn mark_healthy(&mut self, name: &str) {
        self.marks.insert(name.to_string(), HealthStatus::Healthy);
    }

    fn is_healthy(&self, name: &str) -> bool {
        self.marks.get(name) == Some(&HealthStatus::Healthy)
    }

    fn all_healthy(&self, specs: &[ServiceSpec]) -> bool {
        specs.iter().all(|s| self.is_healthy(&s.name))
    }

    fn split_names(&self, specs: &[ServiceSpec]) -> (Vec<String>, Vec<String>) {
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for spec in specs {
            if self.is_healthy(&spec.name) {
                healthy.push(spec.name.clone());
            } else {
                unhealthy.push(spec.name.clone());
            }
        }
        (healthy, unhealthy)
    }
}

pub struct HealthPoller {
    probe: std::sync::Arc<dyn HealthProbe>,
    clock: std::sync::Arc<dyn PollClock>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl HealthPoller {
    pub fn new(
        probe: std::sync::Arc<dyn HealthProbe>,
        clock: std::sync::Arc<dyn PollClock>,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        Self {
            probe,
            clock,
            poll_interval,
            max_wait,
        }
    }

    /// Iteration budget for one attempt. Per-service timeout overrides
    /// extend the window, they never shrink the group-wide maximum.
    fn iteration_budget(&self, specs: &[ServiceSpec]) -> u32 {
        let longest_override = specs
            .iter()
            .filter_map(|s| s.timeout_secs)
            .max()
            .unwrap_or(0);
        let window = self.max_wait.as_secs().max(longest_override);
        let interval = self.poll_interval.as_secs().max(1);
        ((window / interval).max(1)) as u32
    }

    /// Poll until every service reports healthy or the window elapses.
    pub async fn await_group(
        &self,
        specs: &[ServiceSpec],
        cancel: &CancellationToken,
    ) -> AttemptReport {
        let mut state = AttemptState::Pending;
        let mut record = DeploymentState::new(specs);
        let budget = self.iteration_budget(specs);
        let mut iterations = 0u32;

        info!(
            "Waiting for {} services (interval: {:?}, budget: {} checks)",
            specs.len(),
            self.poll_interval,
            budget
        );

        while iterations < budget {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Health polling cancelled; started services are left running");
                    let (healthy, unhealthy) = record.split_names(specs);
                    return AttemptReport {
                        state,
                        healthy,
                        unhealthy,
                        iterations,
                        cancelled: true,
                    };
                }
                _ = self.clock.wait(self.poll_interval) => {}
            }

            state = AttemptState::Polling;
            iterations += 1;

            for spec in specs {
                if record.is_healthy(&spec.name) {
                    continue;
                }
                if self.probe.probe(spec).await == HealthStatus::Healthy {
                    info!("Service {} is healthy", spec.name);
                    record.mark_healthy(&spec.name);
                }
            }

            if record.all_healthy(specs) {
                let (healthy, unhealthy) = record.split_names(specs);
                info!("All {} services healthy after {} checks", specs.len(), iterations);
                return AttemptReport {
                    state: AttemptState::Healthy,
                    healthy,
                    unhealthy,
                    iterations,
                    cancelled: false,
                };
            }

            debug!(
                "Health check {}/{}: {} of {} services healthy",
                iterations,
                budget,
                specs.iter().filter(|s| record.is_healthy(&s.name)).count(),
                specs.len()
            );
        }

        let (healthy, unhealthy) = record.split_names(specs);
        warn!("Health wait window elapsed; still unhealthy: {}", unhealthy.join(", "));
        AttemptReport {
            state: AttemptState::TimedOut,
            healthy,
            unhealthy,
            iterations,
            cancelled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            health: HealthTarget::Http {
                url: format!("http://127.0.0.1:1/{}", name),
            },
            timeout_secs: None,
        }
    }

    fn poller(interval_secs: u64, max_wait_secs: u64) -> HealthPoller {
        struct NeverHealthy;
        #[async_trait]
        impl HealthProbe for NeverHealthy {
            async fn probe(&self, _spec: &ServiceSpec) -> HealthStatus {
                HealthStatus::Unhealthy
            }
        }
        struct Instant;
        #[async_trait]
        impl PollClock for Instant {
            async fn wait(&self, _interval: Duration) {}
        }
        HealthPoller::new(
            std::sync::Arc::new(NeverHealthy),
            std::sync::Arc::new(Instant),
            Duration::from_secs(interval_secs),
            Duration::from_secs(max_wait_secs),
        )
    }

    #[test]
    fn test_iteration_budget() {
        let specs = vec![spec("a"), spec("b")];
        assert_eq!(poller(5, 10).iteration_budget(&specs), 2);
        assert_eq!(poller(5, 180).iteration_budget(&specs), 36);
        // Window shorter than the interval still yields one check.
        assert_eq!(poller(30, 10).iteration_budget(&specs), 1);
    }

    #[test]
    fn test_per_service_timeout_extends_budget() {
        let mut long = spec("slow");
        long.timeout_secs = Some(300);
        let specs = vec![spec("a"), long];
        assert_eq!(poller(5, 180).iteration_budget(&specs), 60);

        // An override below the group maximum changes nothing.
        let mut short = spec("fast");
        short.timeout_secs = Some(10);
        let specs = vec![spec("a"), short];
        assert_eq!(poller(5, 180).iteration_budget(&specs), 36);
    }

    #[test]
    fn test_deployment_state_marks_are_sticky() {
        let specs = vec![spec("a"), spec("b")];
        let mut record = DeploymentState::new(&specs);

        assert!(!record.all_healthy(&specs));
        record.mark_healthy("a");
        assert!(record.is_healthy("a"));
        assert!(!record.all_healthy(&specs));

        record.mark_healthy("b");
        assert!(record.all_healthy(&specs));

        let (healthy, unhealthy) = record.split_names(&specs);
        assert_eq!(healthy, vec!["a", "b"]);
        assert!(unhealthy.is_empty());
    }
}
