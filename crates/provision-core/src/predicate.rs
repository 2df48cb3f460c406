//! Preconditions: side-effect-free questions about host state.
//!
//! A predicate answers "is this action's goal already reached?". Evaluating
//! one must never change the host, which is what lets a whole plan be re-run
//! on a half-provisioned machine.

use crate::action::ExecContext;
use crate::error::{ProvisionError, Result};
use crate::host::CommandSpec;
use crate::probe::{Matcher, Probe};
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_check_timeout() -> u32 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Satisfaction {
    Satisfied,
    Unsatisfied,
    /// The question could not be answered. Treated as unsatisfied.
    Unknown,
}

impl Satisfaction {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Satisfaction::Satisfied)
    }

    fn from_bool(b: bool) -> Self {
        if b {
            Satisfaction::Satisfied
        } else {
            Satisfaction::Unsatisfied
        }
    }
}

impl fmt::Display for Satisfaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Satisfaction::Satisfied => f.write_str("satisfied"),
            Satisfaction::Unsatisfied => f.write_str("unsatisfied"),
            Satisfaction::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Predicate {
    /// Never satisfied: the effect always runs.
    #[default]
    Never,
    FileExists {
        path: String,
    },
    FileContains {
        path: String,
        text: String,
    },
    /// An executable resolves on `PATH`.
    CommandAvailable {
        name: String,
    },
    /// Exit 0 means satisfied. The command must be a read-only query.
    CommandSucceeds {
        command: String,
        #[serde(default = "default_check_timeout")]
        timeout_seconds: u32,
    },
    ServiceRunning {
        name: String,
    },
    Probe {
        probe: Probe,
        #[serde(default)]
        expect: Matcher,
    },
    All {
        of: Vec<Predicate>,
    },
}

impl Predicate {
    pub fn file_exists(path: impl Into<String>) -> Self {
        Predicate::FileExists { path: path.into() }
    }

    pub fn command_available(name: impl Into<String>) -> Self {
        Predicate::CommandAvailable { name: name.into() }
    }

    pub fn command_succeeds(command: impl Into<String>) -> Self {
        Predicate::CommandSucceeds {
            command: command.into(),
            timeout_seconds: default_check_timeout(),
        }
    }

    pub fn service_running(name: impl Into<String>) -> Self {
        Predicate::ServiceRunning { name: name.into() }
    }

    /// Evaluate against the host. `Err` means the predicate could not be
    /// evaluated; callers treat that as [`Satisfaction::Unknown`].
    pub fn evaluate(&self, ctx: &ExecContext<'_>) -> Result<Satisfaction> {
        match self {
            Predicate::Never => Ok(Satisfaction::Unsatisfied),
            Predicate::FileExists { path } => {
                let path = ctx.env.expand_path(path)?;
                Ok(Satisfaction::from_bool(ctx.host.file_exists(&path)))
            }
            Predicate::FileContains { path, text } => {
                let path = ctx.env.expand_path(path)?;
                let text = ctx.env.expand(text)?;
                match ctx.host.read_file(&path) {
                    Ok(contents) => Ok(Satisfaction::from_bool(contents.contains(&text))),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok(Satisfaction::Unsatisfied)
                    }
                    Err(e) => Err(ProvisionError::PreconditionEvaluation(format!(
                        "cannot read {}: {e}",
                        path.display()
                    ))),
                }
            }
            Predicate::CommandAvailable { name } => {
                let name = ctx.env.expand(name)?;
                Ok(Satisfaction::from_bool(ctx.host.command_available(&name)))
            }
            Predicate::CommandSucceeds {
                command,
                timeout_seconds,
            } => {
                let command = ctx.env.expand(command)?;
                let spec = CommandSpec::shell(&command, ctx.env.platform)
                    .in_dir(ctx.env.working_dir.clone())
                    .with_timeout(*timeout_seconds);
                let out = ctx.host.execute(&spec)?;
                if out.timed_out {
                    return Ok(Satisfaction::Unknown);
                }
                Ok(Satisfaction::from_bool(out.success()))
            }
            Predicate::ServiceRunning { name } => {
                let descriptor = ctx.services.get(name)?;
                Ok(Satisfaction::from_bool(descriptor.is_running(ctx)?))
            }
            Predicate::Probe { probe, expect } => {
                let result = probe.run(ctx.host, ctx.env);
                Ok(Satisfaction::from_bool(expect.matches(&result)))
            }
            Predicate::All { of } => {
                let mut unknown = false;
                for p in of {
                    match p.evaluate(ctx) {
                        Ok(Satisfaction::Satisfied) => {}
                        Ok(Satisfaction::Unsatisfied) => return Ok(Satisfaction::Unsatisfied),
                        Ok(Satisfaction::Unknown) | Err(_) => unknown = true,
                    }
                }
                if unknown {
                    Ok(Satisfaction::Unknown)
                } else {
                    Ok(Satisfaction::Satisfied)
                }
            }
        }
    }

    /// Every templated string this predicate carries, for validation.
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Predicate::Never | Predicate::ServiceRunning { .. } => Vec::new(),
            Predicate::FileExists { path } => vec![path.as_str()],
            Predicate::FileContains { path, text } => vec![path.as_str(), text.as_str()],
            Predicate::CommandAvailable { name } => vec![name.as_str()],
            Predicate::CommandSucceeds { command, .. } => vec![command.as_str()],
            Predicate::Probe { probe, .. } => vec![probe.target()],
            Predicate::All { of } => of.iter().flat_map(|p| p.templates()).collect(),
        }
    }

    /// Services this predicate refers to by name.
    pub fn service_refs(&self) -> Vec<&str> {
        match self {
            Predicate::ServiceRunning { name } => vec![name.as_str()],
            Predicate::All { of } => of.iter().flat_map(|p| p.service_refs()).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Never => f.write_str("always run"),
            Predicate::FileExists { path } => write!(f, "file exists: {path}"),
            Predicate::FileContains { path, text } => write!(f, "{path} contains '{text}'"),
            Predicate::CommandAvailable { name } => write!(f, "'{name}' on PATH"),
            Predicate::CommandSucceeds { command, .. } => write!(f, "succeeds: {command}"),
            Predicate::ServiceRunning { name } => write!(f, "service '{name}' running"),
            Predicate::Probe { probe, .. } => write!(f, "probe {probe}"),
            Predicate::All { of } => {
                let parts: Vec<String> = of.iter().map(|p| p.to_string()).collect();
                write!(f, "all of [{}]", parts.join("; "))
            }
        }
    }
}
