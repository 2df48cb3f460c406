use crate::action::{ExecContext, Operation, ServiceControl};
use crate::error::{ProvisionError, Result};
use crate::health::HealthSettings;
use crate::probe::{Matcher, Probe};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// Static metadata for an externally supervised service.
///
/// The orchestrator never supervises processes itself; it triggers the
/// supervisor through `start`/`stop`/`status` and observes `probe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub probe: Probe,
    #[serde(default)]
    pub expect: Matcher,
    pub start: Operation,
    pub stop: Operation,
    /// Succeeds iff the supervisor reports the service running.
    pub status: Operation,
    /// Overrides the run-wide health polling defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSettings>,
}

impl ServiceDescriptor {
    /// Run the start or stop operation. Restart stops first and ignores a
    /// failed stop.
    pub fn control(&self, ctx: &ExecContext<'_>, control: ServiceControl) -> Result<String> {
        match control {
            ServiceControl::Start => self.start.apply(ctx),
            ServiceControl::Stop => self.stop.apply(ctx),
            ServiceControl::Restart => {
                if let Err(e) = self.stop.apply(ctx) {
                    tracing::warn!(
                        service = %self.name,
                        error = %e,
                        "stop before restart failed; starting anyway"
                    );
                }
                self.start.apply(ctx)
            }
        }
    }

    /// Query the supervisor. `Ok(false)` when the status command ran and
    /// exited non-zero; `Err` when it could not be run at all.
    pub fn is_running(&self, ctx: &ExecContext<'_>) -> Result<bool> {
        let spec = self.status.command_spec(ctx.env)?.ok_or_else(|| {
            ProvisionError::InvalidConfig(format!(
                "service '{}' status operation must be a shell or exec command",
                self.name
            ))
        })?;
        let out = ctx.host.execute(&spec)?;
        if out.timed_out {
            return Err(ProvisionError::PreconditionEvaluation(format!(
                "status of service '{}' timed out",
                self.name
            )));
        }
        Ok(out.success())
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registered service descriptors, in registration order. Descriptors are
/// immutable once registered.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Result<Self> {
        let mut registry = Self::default();
        for d in descriptors {
            registry.register(d)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        crate::action::validate_id(&descriptor.name)?;
        if self.contains(&descriptor.name) {
            return Err(ProvisionError::InvalidConfig(format!(
                "service '{}' registered twice",
                descriptor.name
            )));
        }
        for (what, op) in [
            ("start", &descriptor.start),
            ("stop", &descriptor.stop),
            ("status", &descriptor.status),
        ] {
            if matches!(op, Operation::Service { .. }) {
                return Err(ProvisionError::InvalidConfig(format!(
                    "service '{}' {what} operation may not delegate to another service",
                    descriptor.name
                )));
            }
        }
        if !matches!(
            descriptor.status,
            Operation::Shell { .. } | Operation::Exec { .. }
        ) {
            return Err(ProvisionError::InvalidConfig(format!(
                "service '{}' status operation must be a shell or exec command",
                descriptor.name
            )));
        }
        self.services.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ProvisionError::ServiceNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
