//! Bounded fixed-interval health polling.

use crate::clock::Clock;
use crate::environment::EnvironmentConfig;
use crate::host::Host;
use crate::probe::ProbeResult;
use crate::service::ServiceDescriptor;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Polling intervals shorter than this are raised to it.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

fn default_timeout() -> u32 {
    60
}

fn default_interval() -> u32 {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_interval")]
    pub interval_seconds: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            interval_seconds: default_interval(),
        }
    }
}

impl HealthSettings {
    pub fn new(timeout_seconds: u32, interval_seconds: u32) -> Self {
        Self {
            timeout_seconds,
            interval_seconds,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds as u64)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub health: Health,
    pub attempts: u32,
    pub elapsed: Duration,
    /// The last probe result observed, if any probe ran.
    pub last: Option<ProbeResult>,
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }

    pub fn describe(&self) -> String {
        let last = self
            .last
            .as_ref()
            .map(|r| format!(" (last: {})", r.summary()))
            .unwrap_or_default();
        match self.health {
            Health::Healthy => format!(
                "healthy after {} probe(s) in {:.1}s",
                self.attempts,
                self.elapsed.as_secs_f64()
            ),
            Health::Unhealthy => format!(
                "unhealthy after {} probe(s) in {:.1}s{last}",
                self.attempts,
                self.elapsed.as_secs_f64()
            ),
        }
    }
}

/// Polls a service's probe until it matches or the timeout passes.
///
/// Probes at t=0 and then after every interval. Stops with `Healthy` on the
/// first match and with `Unhealthy` once elapsed time reaches the timeout.
pub struct HealthVerifier<'a> {
    host: &'a dyn Host,
    clock: &'a dyn Clock,
    env: &'a EnvironmentConfig,
}

impl<'a> HealthVerifier<'a> {
    pub fn new(host: &'a dyn Host, clock: &'a dyn Clock, env: &'a EnvironmentConfig) -> Self {
        Self { host, clock, env }
    }

    pub fn verify(
        &self,
        descriptor: &ServiceDescriptor,
        timeout: Duration,
        interval: Duration,
    ) -> Verdict {
        let interval = interval.max(MIN_INTERVAL);
        let start = self.clock.now();
        let mut attempts = 0u32;

        loop {
            let result = descriptor.probe.run(self.host, self.env);
            attempts += 1;
            let elapsed = self.clock.now().saturating_duration_since(start);
            let matched = descriptor.expect.matches(&result);
            tracing::debug!(
                service = %descriptor.name,
                attempt = attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                matched,
                result = %result.summary(),
                "health probe"
            );
            if matched {
                return Verdict {
                    health: Health::Healthy,
                    attempts,
                    elapsed,
                    last: Some(result),
                };
            }

            let remaining = timeout.saturating_sub(elapsed);
            if !remaining.is_zero() {
                self.clock.sleep(interval.min(remaining));
            }
            let elapsed = self.clock.now().saturating_duration_since(start);
            if elapsed >= timeout {
                return Verdict {
                    health: Health::Unhealthy,
                    attempts,
                    elapsed,
                    last: Some(result),
                };
            }
        }
    }

    /// Verify using the descriptor's own settings, falling back to `defaults`.
    pub fn verify_with(&self, descriptor: &ServiceDescriptor, defaults: HealthSettings) -> Verdict {
        let settings = descriptor.health.unwrap_or(defaults);
        self.verify(descriptor, settings.timeout(), settings.interval())
    }
}
