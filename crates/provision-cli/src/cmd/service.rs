use crate::cmd::{load_config, Overrides};
use crate::output::{print_json, print_table, yes_no};
use anyhow::Context;
use clap::Subcommand;
use provision_core::{
    action::{ExecContext, ServiceControl},
    clock::SystemClock,
    host::SystemHost,
    orchestrator::Orchestrator,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum ServiceSubcommand {
    /// List configured services
    List,

    /// Start a service and wait until it is healthy
    Start { name: String },

    /// Stop a service
    Stop { name: String },

    /// Stop then start a service and wait until it is healthy
    Restart { name: String },

    /// Show whether a service is running and passes its probe
    Status { name: String },
}

pub fn run(
    root: &Path,
    overrides: &Overrides,
    subcommand: ServiceSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root, overrides)?;
    let services = config
        .registry()
        .context("invalid service definitions")?;
    let host = SystemHost::new();
    let clock = SystemClock;

    let (name, control) = match subcommand {
        ServiceSubcommand::List => {
            if json {
                return print_json(&config.services);
            }
            let rows = services
                .iter()
                .map(|s| vec![s.name.clone(), s.probe.to_string(), s.description.clone()])
                .collect();
            print_table(&["SERVICE", "PROBE", "DESCRIPTION"], rows);
            return Ok(());
        }
        ServiceSubcommand::Status { name } => {
            let descriptor = services.get(&name)?;
            let ctx = ExecContext {
                host: &host,
                env: &config.environment,
                services: &services,
            };
            let running = descriptor.is_running(&ctx).ok();
            let result = descriptor.probe.run(&host, &config.environment);
            let healthy = descriptor.expect.matches(&result);
            if json {
                print_json(&serde_json::json!({
                    "name": name,
                    "running": running,
                    "healthy": healthy,
                    "probe": result,
                }))?;
            } else {
                println!("{name}: running={} healthy={}", yes_no(running), yes_no(Some(healthy)));
                println!("  {}", result.summary());
            }
            if running != Some(true) || !healthy {
                anyhow::bail!("service '{name}' is not up");
            }
            return Ok(());
        }
        ServiceSubcommand::Start { name } => (name, ServiceControl::Start),
        ServiceSubcommand::Stop { name } => (name, ServiceControl::Stop),
        ServiceSubcommand::Restart { name } => (name, ServiceControl::Restart),
    };

    let orchestrator = Orchestrator::new(config.environment.clone(), &host, &clock)
        .with_health_defaults(config.health);
    let result = orchestrator
        .control(&services, &name, control)
        .with_context(|| format!("failed to {control} service '{name}'"))?;

    let healthy = result.verdict.as_ref().map(|v| v.is_healthy());
    if json {
        print_json(&serde_json::json!({
            "name": name,
            "control": control,
            "detail": result.detail,
            "healthy": healthy,
        }))?;
    } else {
        println!("{control} {name}: ok");
        if let Some(verdict) = &result.verdict {
            println!("  {}", verdict.describe());
        }
    }
    if healthy == Some(false) {
        anyhow::bail!("service '{name}' did not become healthy");
    }
    Ok(())
}
