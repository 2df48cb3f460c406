use crate::cmd::{load_config, Overrides};
use crate::output::print_json;
use anyhow::Context;
use provision_core::{
    clock::SystemClock,
    host::SystemHost,
    log::OutcomeResult,
    orchestrator::{Orchestrator, RunResult, RunStatus},
};
use std::path::Path;

pub fn run(root: &Path, overrides: &Overrides, tail: usize, json: bool) -> anyhow::Result<()> {
    let config = load_config(root, overrides)?;
    let services = config
        .registry()
        .context("invalid service definitions")?;

    let host = SystemHost::new();
    let clock = SystemClock;
    let orchestrator = Orchestrator::new(config.environment.clone(), &host, &clock)
        .with_health_defaults(config.health);
    let result = orchestrator.run(&config.actions, &services);

    if json {
        print_json(&result)?;
    } else {
        print_result(&result, tail);
    }
    for e in &result.log_errors {
        eprintln!("warning: deployment log: {e}");
    }

    match (&result.status, &result.failure) {
        (RunStatus::Succeeded, _) => Ok(()),
        (status, Some(failure)) => anyhow::bail!(
            "run {status} at action '{}': {}",
            failure.action_id,
            failure.detail
        ),
        (status, None) => anyhow::bail!("run {status}"),
    }
}

fn print_result(result: &RunResult, tail: usize) {
    println!("run {}", result.run_id);
    for outcome in &result.outcomes {
        println!("  {}", outcome.render());
    }
    println!(
        "\n{}: {} succeeded, {} skipped, {} failed",
        result.status,
        result.count(OutcomeResult::Succeeded),
        result.count(OutcomeResult::Skipped),
        result.count(OutcomeResult::Failed),
    );

    if let Some(failure) = &result.failure {
        let description = if failure.description.is_empty() {
            String::new()
        } else {
            format!(" ({})", failure.description)
        };
        println!("\nFailed at '{}'{description}", failure.action_id);
        println!("  {}", failure.detail);
        if !result.outcomes.is_empty() && tail > 0 {
            println!("\nLast outcomes:");
            for outcome in result.tail(tail) {
                println!("  {}", outcome.render());
            }
        }
        if result.status == RunStatus::Failed {
            println!("\nFix the problem and re-run; completed steps will be skipped.");
        }
    }
    if let Some(path) = &result.log_path {
        println!("log: {}", path.display());
    }
}
