use crate::cmd::{load_config, Overrides};
use crate::output::{print_json, print_table, yes_no};
use anyhow::Context;
use provision_core::{clock::SystemClock, host::SystemHost, orchestrator::Orchestrator};
use std::path::Path;

pub fn run(root: &Path, overrides: &Overrides, strict: bool, json: bool) -> anyhow::Result<()> {
    let config = load_config(root, overrides)?;
    let services = config
        .registry()
        .context("invalid service definitions")?;

    let host = SystemHost::new();
    let clock = SystemClock;
    let report = Orchestrator::new(config.environment.clone(), &host, &clock)
        .check(&config.actions, &services);

    if json {
        print_json(&report)?;
    } else {
        let rows = report
            .actions
            .iter()
            .map(|a| {
                vec![
                    a.id.clone(),
                    a.kind.to_string(),
                    a.state.as_str().to_string(),
                    a.detail.clone(),
                ]
            })
            .collect();
        print_table(&["ACTION", "KIND", "STATE", "DETAIL"], rows);

        if !report.services.is_empty() {
            println!();
            let rows = report
                .services
                .iter()
                .map(|s| {
                    vec![
                        s.name.clone(),
                        yes_no(s.running),
                        yes_no(Some(s.healthy)),
                        s.detail.clone(),
                    ]
                })
                .collect();
            print_table(&["SERVICE", "RUNNING", "HEALTHY", "DETAIL"], rows);
        }

        println!(
            "\n{}/{} checks passed ({:.1}%)",
            report.passed, report.total, report.success_rate
        );
    }

    if strict && !report.is_clean() {
        anyhow::bail!("{} check(s) not satisfied", report.failed);
    }
    Ok(())
}
