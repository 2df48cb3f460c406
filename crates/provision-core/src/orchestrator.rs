//! Sequential provisioning run.
//!
//! The orchestrator walks an ordered action list exactly once:
//!
//! ```text
//! platform filter -> precondition -> effect (with retries) -> health gate
//! ```
//!
//! Every step records an [`Outcome`]. A fatal failure stops the run on the
//! spot; nothing already applied is undone. Re-running the same plan is
//! always safe because satisfied preconditions turn into `Skipped` outcomes.

use crate::action::{Action, Criticality, ExecContext, Operation, ServiceControl};
use crate::clock::Clock;
use crate::environment::EnvironmentConfig;
use crate::error::{ProvisionError, Result};
use crate::health::{HealthSettings, HealthVerifier, Verdict};
use crate::host::Host;
use crate::log::{DeploymentLog, Outcome, OutcomeResult, RunHeader};
use crate::predicate::Satisfaction;
use crate::report::{self, Report};
use crate::service::ServiceRegistry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    /// The plan was rejected before any action ran.
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    pub current_action_index: usize,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub action_id: String,
    pub description: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub outcomes: Vec<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log_errors: Vec<String>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    pub fn count(&self, result: OutcomeResult) -> usize {
        self.outcomes.iter().filter(|o| o.result == result).count()
    }

    pub fn tail(&self, n: usize) -> &[Outcome] {
        let start = self.outcomes.len().saturating_sub(n);
        &self.outcomes[start..]
    }
}

/// Result of a single service start/stop issued outside a run.
#[derive(Debug, Clone)]
pub struct ControlResult {
    pub detail: String,
    /// Present when the control started the service.
    pub verdict: Option<Verdict>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a> {
    env: EnvironmentConfig,
    host: &'a dyn Host,
    clock: &'a dyn Clock,
    health: HealthSettings,
    persist: bool,
}

/// Why one attempt at an action failed.
struct AttemptFailure {
    detail: String,
    /// The effect ran but the started service never became healthy.
    unhealthy: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(env: EnvironmentConfig, host: &'a dyn Host, clock: &'a dyn Clock) -> Self {
        Self {
            env,
            host,
            clock,
            health: HealthSettings::default(),
            persist: true,
        }
    }

    /// Timeout and interval for services without their own settings.
    pub fn with_health_defaults(mut self, health: HealthSettings) -> Self {
        self.health = health;
        self
    }

    /// Keep the deployment log in memory only.
    pub fn in_memory(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn env(&self) -> &EnvironmentConfig {
        &self.env
    }

    pub fn run(&self, actions: &[Action], services: &ServiceRegistry) -> RunResult {
        let header = RunHeader::new(self.env.name.clone(), self.env.platform);
        let mut log = if self.persist {
            DeploymentLog::create(&self.env.log_dir, header)
        } else {
            DeploymentLog::in_memory(header)
        };
        tracing::info!(
            run_id = %log.run_id(),
            environment = %self.env.name,
            platform = %self.env.platform,
            actions = actions.len(),
            "provisioning run started"
        );

        let mut state = RunState {
            current_action_index: 0,
            status: RunStatus::Running,
        };
        let mut failure = None;

        if let Err(report) = preflight(actions, services) {
            tracing::error!(action = %report.action_id, "run aborted: {}", report.detail);
            state.status = RunStatus::Aborted;
            failure = Some(report);
        } else {
            let ctx = ExecContext {
                host: self.host,
                env: &self.env,
                services,
            };
            for (index, action) in actions.iter().enumerate() {
                state.current_action_index = index;
                if let Some(report) = self.step(&ctx, action, &mut log) {
                    state.status = RunStatus::Failed;
                    failure = Some(report);
                    break;
                }
            }
            if state.status == RunStatus::Running {
                state.status = RunStatus::Succeeded;
            }
        }

        log.finish(state.status);
        tracing::info!(
            run_id = %log.run_id(),
            status = %state.status,
            executed = log.executed_count(),
            "provisioning run finished"
        );

        let run_id = log.run_id().to_string();
        let log_path = log.path().map(|p| p.to_path_buf());
        let log_errors = log.errors().to_vec();
        RunResult {
            run_id,
            status: state.status,
            outcomes: log.into_outcomes(),
            failure,
            log_path,
            log_errors,
        }
    }

    /// Evaluate every precondition and service without changing the host.
    pub fn check(&self, actions: &[Action], services: &ServiceRegistry) -> Report {
        let ctx = ExecContext {
            host: self.host,
            env: &self.env,
            services,
        };
        report::check(&ctx, actions)
    }

    /// Start, stop or restart one service directly. Starting waits for the
    /// service to become healthy.
    pub fn control(
        &self,
        services: &ServiceRegistry,
        name: &str,
        control: ServiceControl,
    ) -> Result<ControlResult> {
        let descriptor = services.get(name)?;
        let ctx = ExecContext {
            host: self.host,
            env: &self.env,
            services,
        };
        let detail = descriptor.control(&ctx, control)?;
        if !control.starts() {
            return Ok(ControlResult {
                detail,
                verdict: None,
            });
        }
        let verdict = HealthVerifier::new(self.host, self.clock, &self.env)
            .verify_with(descriptor, self.health);
        Ok(ControlResult {
            detail,
            verdict: Some(verdict),
        })
    }

    /// Run one action. `Some` halts the run.
    fn step(
        &self,
        ctx: &ExecContext<'_>,
        action: &Action,
        log: &mut DeploymentLog,
    ) -> Option<FailureReport> {
        let started = Utc::now();
        if !action.applies_to(self.env.platform) {
            log.append(Outcome::finished(
                &action.id,
                1,
                started,
                OutcomeResult::Skipped,
                format!("not applicable on {}", self.env.platform),
            ));
            return None;
        }

        match action.precondition.evaluate(ctx) {
            Ok(Satisfaction::Satisfied) => {
                tracing::info!(action = %action.id, "already satisfied");
                log.append(Outcome::finished(
                    &action.id,
                    1,
                    started,
                    OutcomeResult::Skipped,
                    "already satisfied",
                ));
                return None;
            }
            Ok(Satisfaction::Unsatisfied) => {}
            Ok(Satisfaction::Unknown) => {
                tracing::warn!(action = %action.id, "precondition unknown, running effect");
            }
            Err(e) => {
                tracing::warn!(action = %action.id, error = %e, "precondition unknown, running effect");
            }
        }

        let attempts = action.retries.saturating_add(1);
        for attempt in 1..=attempts {
            let started = Utc::now();
            tracing::info!(action = %action.id, kind = %action.kind, attempt, "running {}", action.effect);
            match self.attempt(ctx, action) {
                Ok(detail) => {
                    log.append(Outcome::finished(
                        &action.id,
                        attempt,
                        started,
                        OutcomeResult::Succeeded,
                        detail,
                    ));
                    return None;
                }
                Err(failure) => {
                    log.append(Outcome::finished(
                        &action.id,
                        attempt,
                        started,
                        OutcomeResult::Failed,
                        failure.detail.clone(),
                    ));
                    let report = FailureReport {
                        action_id: action.id.clone(),
                        description: action.description.clone(),
                        detail: failure.detail,
                    };
                    if failure.unhealthy {
                        tracing::error!(action = %action.id, "{}", report.detail);
                        return Some(report);
                    }
                    if attempt < attempts {
                        tracing::warn!(action = %action.id, attempt, "{}; retrying", report.detail);
                        continue;
                    }
                    return match action.criticality {
                        Criticality::Recoverable => {
                            tracing::warn!(action = %action.id, "{}; continuing", report.detail);
                            None
                        }
                        Criticality::Fatal => {
                            tracing::error!(action = %action.id, "{}", report.detail);
                            Some(report)
                        }
                    };
                }
            }
        }
        None
    }

    fn attempt(
        &self,
        ctx: &ExecContext<'_>,
        action: &Action,
    ) -> std::result::Result<String, AttemptFailure> {
        let detail = action.effect.apply(ctx).map_err(|e| AttemptFailure {
            detail: e.to_string(),
            unhealthy: false,
        })?;
        let Some(service) = action.started_service() else {
            return Ok(detail);
        };
        let descriptor = ctx.services.get(service).map_err(|e| AttemptFailure {
            detail: e.to_string(),
            unhealthy: false,
        })?;

        let verdict = HealthVerifier::new(self.host, self.clock, &self.env)
            .verify_with(descriptor, self.health);
        if verdict.is_healthy() {
            return Ok(verdict.describe());
        }
        let err = ProvisionError::HealthCheckTimeout {
            service: service.to_string(),
            attempts: verdict.attempts,
            elapsed_ms: verdict.elapsed.as_millis() as u64,
        };
        let detail = match &verdict.last {
            Some(last) => format!("{err} (last: {})", last.summary()),
            None => err.to_string(),
        };
        Err(AttemptFailure {
            detail,
            unhealthy: true,
        })
    }
}

/// Reject plans with duplicate ids or references to unregistered services.
fn preflight(
    actions: &[Action],
    services: &ServiceRegistry,
) -> std::result::Result<(), FailureReport> {
    let mut seen = HashSet::new();
    for action in actions {
        let reject = |err: ProvisionError| FailureReport {
            action_id: action.id.clone(),
            description: action.description.clone(),
            detail: err.to_string(),
        };
        if !seen.insert(action.id.as_str()) {
            return Err(reject(ProvisionError::DuplicateActionId(action.id.clone())));
        }
        let mut refs = action.precondition.service_refs();
        if let Operation::Service { name, .. } = &action.effect {
            refs.push(name.as_str());
        }
        if let Some(missing) = refs.into_iter().find(|name| !services.contains(name)) {
            return Err(reject(ProvisionError::ServiceNotFound(missing.to_string())));
        }
    }
    Ok(())
}
