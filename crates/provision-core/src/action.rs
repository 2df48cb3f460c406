//! Action data model.
//!
//! An `Action` is the atomic unit of provisioning: a precondition (is the goal
//! state already reached?) paired with an effect (the operation that reaches
//! it). Effects must be safe to re-run once the host is in the target state.

use crate::environment::{EnvironmentConfig, Platform};
use crate::error::{ProvisionError, Result};
use crate::host::{CommandSpec, Host};
use crate::predicate::Predicate;
use crate::service::ServiceRegistry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// ExecContext
// ---------------------------------------------------------------------------

/// Everything an effect or predicate may touch.
#[derive(Clone, Copy)]
pub struct ExecContext<'a> {
    pub host: &'a dyn Host,
    pub env: &'a EnvironmentConfig,
    pub services: &'a ServiceRegistry,
}

// ---------------------------------------------------------------------------
// ActionKind / Criticality
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Install,
    Configure,
    ServiceControl,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Install => "install",
            ActionKind::Configure => "configure",
            ActionKind::ServiceControl => "service_control",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a failed effect halts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    #[default]
    Fatal,
    Recoverable,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criticality::Fatal => f.write_str("fatal"),
            Criticality::Recoverable => f.write_str("recoverable"),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceControl
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceControl {
    Start,
    Stop,
    Restart,
}

impl ServiceControl {
    pub fn starts(&self) -> bool {
        matches!(self, ServiceControl::Start | ServiceControl::Restart)
    }
}

impl fmt::Display for ServiceControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceControl::Start => f.write_str("start"),
            ServiceControl::Stop => f.write_str("stop"),
            ServiceControl::Restart => f.write_str("restart"),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

fn default_effect_timeout() -> u32 {
    600
}

/// A host-level operation. Used as an action's effect and as a service's
/// start/stop/status operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Operation {
    /// Run through the platform shell (`sh -c` / `cmd /C`). `0` disables the timeout.
    Shell {
        command: String,
        #[serde(default = "default_effect_timeout")]
        timeout_seconds: u32,
    },
    /// Run a program directly, without a shell.
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_effect_timeout")]
        timeout_seconds: u32,
    },
    WriteFile {
        path: String,
        contents: String,
    },
    /// Delegate to a registered service's start/stop operation.
    Service {
        name: String,
        control: ServiceControl,
    },
}

impl Operation {
    pub fn shell(command: impl Into<String>) -> Self {
        Operation::Shell {
            command: command.into(),
            timeout_seconds: default_effect_timeout(),
        }
    }

    pub fn write_file(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Operation::WriteFile {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn service(name: impl Into<String>, control: ServiceControl) -> Self {
        Operation::Service {
            name: name.into(),
            control,
        }
    }

    /// The command this operation runs, expanded. `None` for operations that
    /// are not commands.
    pub fn command_spec(&self, env: &EnvironmentConfig) -> Result<Option<CommandSpec>> {
        let spec = match self {
            Operation::Shell {
                command,
                timeout_seconds,
            } => CommandSpec::shell(&env.expand(command)?, env.platform)
                .with_timeout(*timeout_seconds),
            Operation::Exec {
                program,
                args,
                timeout_seconds,
            } => {
                let args = args
                    .iter()
                    .map(|a| env.expand(a))
                    .collect::<Result<Vec<_>>>()?;
                CommandSpec::exec(env.expand(program)?, args).with_timeout(*timeout_seconds)
            }
            Operation::WriteFile { .. } | Operation::Service { .. } => return Ok(None),
        };
        Ok(Some(spec.in_dir(env.working_dir.clone())))
    }

    /// Apply the operation. On success returns a short detail for the log.
    pub fn apply(&self, ctx: &ExecContext<'_>) -> Result<String> {
        match self {
            Operation::Shell { .. } | Operation::Exec { .. } => match self.command_spec(ctx.env)? {
                Some(spec) => run_checked(ctx.host, &spec),
                None => Ok(String::new()),
            },
            Operation::WriteFile { path, contents } => {
                let path = ctx.env.expand_path(path)?;
                let contents = ctx.env.expand(contents)?;
                ctx.host.write_file(&path, contents.as_bytes())?;
                Ok(format!("wrote {} ({} bytes)", path.display(), contents.len()))
            }
            Operation::Service { name, control } => {
                let descriptor = ctx.services.get(name)?;
                descriptor.control(ctx, *control)
            }
        }
    }

    /// Every templated string this operation carries, for validation.
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Operation::Shell { command, .. } => vec![command.as_str()],
            Operation::Exec { program, args, .. } => std::iter::once(program.as_str())
                .chain(args.iter().map(String::as_str))
                .collect(),
            Operation::WriteFile { path, contents } => vec![path.as_str(), contents.as_str()],
            Operation::Service { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Shell { command, .. } => write!(f, "$ {command}"),
            Operation::Exec { program, args, .. } => {
                write!(f, "{program}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                Ok(())
            }
            Operation::WriteFile { path, .. } => write!(f, "write {path}"),
            Operation::Service { name, control } => write!(f, "service {name} {control}"),
        }
    }
}

fn run_checked(host: &dyn Host, spec: &CommandSpec) -> Result<String> {
    let out = host.execute(spec)?;
    if out.success() {
        Ok(out.summary())
    } else {
        Err(ProvisionError::effect(spec.display(), out.summary()))
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Action {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub precondition: Predicate,
    pub effect: Operation,
    pub kind: ActionKind,
    #[serde(default)]
    pub criticality: Criticality,
    /// Extra attempts after a failed effect. Each attempt is logged.
    #[serde(default)]
    pub retries: u32,
    /// Platforms this action applies to. Empty means every platform.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<Platform>,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        kind: ActionKind,
        effect: Operation,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            precondition: Predicate::Never,
            effect,
            kind,
            criticality: Criticality::Fatal,
            retries: 0,
            platforms: Vec::new(),
        }
    }

    pub fn when(mut self, precondition: Predicate) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.criticality = Criticality::Recoverable;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn only_on(mut self, platforms: &[Platform]) -> Self {
        self.platforms = platforms.to_vec();
        self
    }

    pub fn applies_to(&self, platform: Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&platform)
    }

    /// The service this action brings up, if it is a service-starting
    /// ServiceControl action. Those actions are gated by a health check.
    pub fn started_service(&self) -> Option<&str> {
        match (&self.kind, &self.effect) {
            (ActionKind::ServiceControl, Operation::Service { name, control })
                if control.starts() =>
            {
                Some(name.as_str())
            }
            _ => None,
        }
    }
}

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-\.]*$").unwrap())
}

/// Action ids and service names: lowercase alphanumeric with `-`, `_`, `.`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(ProvisionError::InvalidConfig(format!(
            "invalid id '{id}': must be lowercase alphanumeric with '-', '_' or '.'"
        )));
    }
    Ok(())
}
