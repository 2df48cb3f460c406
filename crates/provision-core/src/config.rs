use crate::action::{validate_id, Action, ActionKind, Operation};
use crate::environment::EnvironmentConfig;
use crate::error::{ProvisionError, Result};
use crate::health::HealthSettings;
use crate::paths;
use crate::service::{ServiceDescriptor, ServiceRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: String) -> Self {
        Self {
            level: WarnLevel::Warning,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            level: WarnLevel::Error,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

/// `.provision/config.yaml`: the environment plus the ordered plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Health polling for services without their own settings.
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

fn default_version() -> u32 {
    1
}

const MAX_SENSIBLE_RETRIES: u32 = 10;

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            environment: EnvironmentConfig::default(),
            health: HealthSettings::default(),
            services: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ProvisionError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Build the service registry. Fails on the first invalid descriptor.
    pub fn registry(&self) -> Result<ServiceRegistry> {
        ServiceRegistry::new(self.services.iter().cloned())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. Service descriptors
        let mut names = HashSet::new();
        for svc in &self.services {
            if let Err(e) = validate_id(&svc.name) {
                warnings.push(ConfigWarning::error(format!("service: {e}")));
            }
            if !names.insert(svc.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "service '{}' is defined more than once",
                    svc.name
                )));
            }
            for (what, op) in [
                ("start", &svc.start),
                ("stop", &svc.stop),
                ("status", &svc.status),
            ] {
                if matches!(op, Operation::Service { .. }) {
                    warnings.push(ConfigWarning::error(format!(
                        "service '{}' {what} operation may not delegate to another service",
                        svc.name
                    )));
                }
                self.check_operation(&mut warnings, &format!("service '{}' {what}", svc.name), op);
            }
            if matches!(svc.status, Operation::WriteFile { .. }) {
                warnings.push(ConfigWarning::error(format!(
                    "service '{}' status operation must be a shell or exec command",
                    svc.name
                )));
            }
            self.check_templates(
                &mut warnings,
                &format!("service '{}' probe", svc.name),
                [svc.probe.target()],
            );
            if let Some(health) = &svc.health {
                check_health(&mut warnings, &format!("service '{}'", svc.name), health);
            }
        }
        check_health(&mut warnings, "health", &self.health);

        // 2. Actions
        let mut ids = HashSet::new();
        for action in &self.actions {
            let at = format!("action '{}'", action.id);
            if let Err(e) = validate_id(&action.id) {
                warnings.push(ConfigWarning::error(format!("action: {e}")));
            }
            if !ids.insert(action.id.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate action id '{}'",
                    action.id
                )));
            }

            let mut refs = action.precondition.service_refs();
            if let Operation::Service { name, .. } = &action.effect {
                refs.push(name.as_str());
            }
            for name in refs {
                if !names.contains(name) {
                    warnings.push(ConfigWarning::error(format!(
                        "{at} references unknown service '{name}'"
                    )));
                }
            }

            self.check_operation(&mut warnings, &at, &action.effect);
            self.check_templates(
                &mut warnings,
                &format!("{at} precondition"),
                action.precondition.templates(),
            );

            if action.kind == ActionKind::ServiceControl
                && !matches!(action.effect, Operation::Service { .. })
            {
                warnings.push(ConfigWarning::warning(format!(
                    "{at} is service_control but its effect is not a service operation; \
                     it will not be health-checked"
                )));
            }
            if action.retries > MAX_SENSIBLE_RETRIES {
                warnings.push(ConfigWarning::warning(format!(
                    "{at} has retries={} (>{MAX_SENSIBLE_RETRIES} is unusual)",
                    action.retries
                )));
            }
        }

        warnings
    }

    fn check_operation(&self, warnings: &mut Vec<ConfigWarning>, at: &str, op: &Operation) {
        match op {
            Operation::Shell { command, .. } if command.trim().is_empty() => {
                warnings.push(ConfigWarning::warning(format!("{at} has an empty command")));
            }
            Operation::Exec { program, .. } if program.trim().is_empty() => {
                warnings.push(ConfigWarning::warning(format!("{at} has an empty program")));
            }
            _ => {}
        }
        self.check_templates(warnings, at, op.templates());
    }

    fn check_templates<'s>(
        &self,
        warnings: &mut Vec<ConfigWarning>,
        at: &str,
        templates: impl IntoIterator<Item = &'s str>,
    ) {
        let mut reported = HashSet::new();
        for template in templates {
            for name in self.environment.undefined_in(template) {
                if reported.insert(name.clone()) {
                    warnings.push(ConfigWarning::error(format!(
                        "{at} uses undefined variable '${{{name}}}'"
                    )));
                }
            }
        }
    }
}

fn check_health(warnings: &mut Vec<ConfigWarning>, at: &str, health: &HealthSettings) {
    if health.interval_seconds == 0 {
        warnings.push(ConfigWarning::warning(format!(
            "{at} has interval_seconds=0; probes will run back to back"
        )));
    } else if health.interval_seconds > health.timeout_seconds {
        warnings.push(ConfigWarning::warning(format!(
            "{at} interval ({}s) is longer than its timeout ({}s); only one probe will run",
            health.interval_seconds, health.timeout_seconds
        )));
    }
}
