use crate::cmd::{load_config, Overrides};
use crate::output::{print_json, print_table};
use anyhow::Context;
use provision_core::{
    log::{list_runs, DeploymentLog, Outcome, RunHeader, RunSummary},
    paths, ProvisionError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub struct LogQuery {
    pub run: Option<String>,
    pub failed: bool,
    pub tail: Option<usize>,
    pub list: bool,
}

#[derive(Serialize)]
struct LogView<'a> {
    header: &'a RunHeader,
    outcomes: Vec<&'a Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a RunSummary>,
}

pub fn run(root: &Path, overrides: &Overrides, query: LogQuery, json: bool) -> anyhow::Result<()> {
    let log_dir = log_dir(root, overrides)?;

    if query.list {
        let runs = list_runs(&log_dir).context("failed to list runs")?;
        if json {
            return print_json(&runs);
        }
        if runs.is_empty() {
            println!("No runs recorded in {}.", log_dir.display());
            return Ok(());
        }
        let rows = runs
            .iter()
            .map(|id| {
                let status = DeploymentLog::load_run(&log_dir, id)
                    .ok()
                    .and_then(|log| log.summary().map(|s| s.status.to_string()))
                    .unwrap_or_else(|| "unfinished".to_string());
                vec![id.clone(), status]
            })
            .collect();
        print_table(&["RUN", "STATUS"], rows);
        return Ok(());
    }

    let log = match &query.run {
        Some(id) => DeploymentLog::load_run(&log_dir, id),
        None => DeploymentLog::load_latest(&log_dir),
    }
    .context("failed to load deployment log")?;

    let mut outcomes: Vec<&Outcome> = if query.failed {
        log.failed().collect()
    } else {
        log.outcomes().iter().collect()
    };
    if let Some(n) = query.tail {
        let start = outcomes.len().saturating_sub(n);
        outcomes.drain(..start);
    }

    if json {
        return print_json(&LogView {
            header: log.header(),
            outcomes,
            summary: log.summary(),
        });
    }

    if !query.failed && query.tail.is_none() {
        print!("{}", log.render_text());
        return Ok(());
    }
    println!("run {}", log.run_id());
    if outcomes.is_empty() {
        println!("  (no matching outcomes)");
    }
    for outcome in outcomes {
        println!("{}", outcome.render());
    }
    Ok(())
}

/// Log directory from config, or the default one when the project has no config yet.
fn log_dir(root: &Path, overrides: &Overrides) -> anyhow::Result<PathBuf> {
    match load_config(root, overrides) {
        Ok(config) => Ok(config.environment.log_dir),
        Err(e) if matches!(
            e.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::NotInitialized)
        ) => {
            Ok(paths::default_logs_dir(root))
        }
        Err(e) => Err(e),
    }
}
