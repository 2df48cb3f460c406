use crate::cmd::{load_config, Overrides};
use crate::output::print_json;
use clap::Subcommand;
use provision_core::config::WarnLevel;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,

    /// Print the effective config after --var/--platform overrides
    Show,
}

pub fn run(
    root: &Path,
    overrides: &Overrides,
    subcommand: ConfigSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcommand {
        ConfigSubcommand::Validate => validate(root, overrides, json),
        ConfigSubcommand::Show => show(root, overrides, json),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(root, overrides)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!(
            "Config is valid: {} action(s), {} service(s). No warnings.",
            config.actions.len(),
            config.services.len()
        );
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(root, overrides)?;
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}
