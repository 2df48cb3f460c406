//! Read-only view of how far a host is from the plan's target state.

use crate::action::{Action, ActionKind, ExecContext};
use crate::predicate::Satisfaction;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Satisfied,
    Pending,
    /// The precondition could not be evaluated; a run would execute the effect.
    Unknown,
    NotApplicable,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Satisfied => "satisfied",
            ActionState::Pending => "pending",
            ActionState::Unknown => "unknown",
            ActionState::NotApplicable => "not applicable",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionCheck {
    pub id: String,
    pub description: String,
    pub kind: ActionKind,
    pub state: ActionState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceCheck {
    pub name: String,
    /// `None` when the status operation could not be run.
    pub running: Option<bool>,
    pub healthy: bool,
    pub detail: String,
}

impl ServiceCheck {
    pub fn passed(&self) -> bool {
        self.running == Some(true) && self.healthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub actions: Vec<ActionCheck>,
    pub services: Vec<ServiceCheck>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    /// Percentage of passed checks; 100 when there is nothing to check.
    pub success_rate: f64,
}

impl Report {
    /// Nothing pending and every service up and healthy.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn pending(&self) -> impl Iterator<Item = &ActionCheck> {
        self.actions
            .iter()
            .filter(|a| matches!(a.state, ActionState::Pending | ActionState::Unknown))
    }
}

/// Evaluate every precondition and probe every service once. Never runs an
/// effect or a service start/stop operation.
pub fn check(ctx: &ExecContext<'_>, actions: &[Action]) -> Report {
    let actions: Vec<ActionCheck> = actions.iter().map(|a| check_action(ctx, a)).collect();
    let services: Vec<ServiceCheck> = ctx
        .services
        .iter()
        .map(|descriptor| {
            let (running, status_detail) = match descriptor.is_running(ctx) {
                Ok(r) => (Some(r), None),
                Err(e) => (None, Some(e.to_string())),
            };
            let result = descriptor.probe.run(ctx.host, ctx.env);
            let healthy = descriptor.expect.matches(&result);
            ServiceCheck {
                name: descriptor.name.clone(),
                running,
                healthy,
                detail: status_detail.unwrap_or_else(|| result.summary()),
            }
        })
        .collect();

    let applicable = actions
        .iter()
        .filter(|a| a.state != ActionState::NotApplicable);
    let total = applicable.clone().count() + services.len();
    let passed = applicable
        .filter(|a| a.state == ActionState::Satisfied)
        .count()
        + services.iter().filter(|s| s.passed()).count();
    let success_rate = if total == 0 {
        100.0
    } else {
        passed as f64 * 100.0 / total as f64
    };

    Report {
        actions,
        services,
        passed,
        failed: total - passed,
        total,
        success_rate,
    }
}

fn check_action(ctx: &ExecContext<'_>, action: &Action) -> ActionCheck {
    let (state, detail) = if !action.applies_to(ctx.env.platform) {
        (ActionState::NotApplicable, String::new())
    } else {
        match action.precondition.evaluate(ctx) {
            Ok(Satisfaction::Satisfied) => (ActionState::Satisfied, String::new()),
            Ok(Satisfaction::Unsatisfied) => (ActionState::Pending, String::new()),
            Ok(Satisfaction::Unknown) => (ActionState::Unknown, "timed out".to_string()),
            Err(e) => (ActionState::Unknown, e.to_string()),
        }
    };
    ActionCheck {
        id: action.id.clone(),
        description: action.description.clone(),
        kind: action.kind,
        state,
        detail,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::action::Operation;
    use crate::environment::{EnvironmentConfig, Platform};
    use crate::predicate::Predicate;
    use crate::probe::{Matcher, Probe};
    use crate::service::{ServiceDescriptor, ServiceRegistry};
    use crate::testing::ScriptedHost;
    use tempfile::TempDir;

    fn proxy() -> ServiceDescriptor {
        ServiceDescriptor {
            name: "nginx".to_string(),
            description: String::new(),
            probe: Probe::http("http://localhost/"),
            expect: Matcher::default(),
            start: Operation::shell("touch nginx.pid"),
            stop: Operation::shell("rm -f nginx.pid"),
            status: Operation::shell("test -f nginx.pid"),
            health: None,
        }
    }

    fn action(id: &str, marker: &str) -> Action {
        Action::new(
            id,
            "",
            ActionKind::Configure,
            Operation::shell(format!("touch {marker}")),
        )
        .when(Predicate::file_exists(marker))
    }

    #[test]
    fn report_classifies_actions_and_services() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("done"), "").unwrap();
        std::fs::write(dir.path().join("nginx.pid"), "").unwrap();
        let mut env = EnvironmentConfig::new("test", Platform::Linux);
        env.resolve_paths(dir.path());
        let services = ServiceRegistry::new([proxy()]).unwrap();
        let host = ScriptedHost::new();
        host.push_http(200, "<html>");
        let ctx = ExecContext {
            host: &host,
            env: &env,
            services: &services,
        };

        let actions = vec![
            action("done", "done"),
            action("todo", "todo"),
            action("odd", "todo").when(Predicate::file_exists("${MISSING}")),
            action("win", "win").only_on(&[Platform::Windows]),
        ];
        let report = check(&ctx, &actions);

        let states: Vec<ActionState> = report.actions.iter().map(|a| a.state).collect();
        assert_eq!(
            states,
            vec![
                ActionState::Satisfied,
                ActionState::Pending,
                ActionState::Unknown,
                ActionState::NotApplicable
            ]
        );
        assert_eq!(report.services[0].running, Some(true));
        assert!(report.services[0].healthy);
        assert_eq!((report.passed, report.failed, report.total), (2, 2, 4));
        assert!((report.success_rate - 50.0).abs() < f64::EPSILON);
        assert!(!report.is_clean());
        assert_eq!(report.pending().count(), 2);
        // check never applies effects
        assert!(!dir.path().join("todo").exists());
    }

    #[test]
    fn empty_plan_is_clean() {
        let env = EnvironmentConfig::new("test", Platform::Linux);
        let services = ServiceRegistry::default();
        let host = ScriptedHost::new();
        let ctx = ExecContext {
            host: &host,
            env: &env,
            services: &services,
        };
        let report = check(&ctx, &[]);
        assert!(report.is_clean());
        assert_eq!(report.success_rate, 100.0);
    }
}
