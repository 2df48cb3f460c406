pub mod check;
pub mod config;
pub mod init;
pub mod log;
pub mod run;
pub mod service;

use anyhow::Context;
use provision_core::config::Config;
use provision_core::environment::Platform;
use std::path::Path;

/// Command-line overrides applied on top of the loaded environment.
pub struct Overrides {
    pub vars: Vec<(String, String)>,
    pub platform: Option<Platform>,
}

/// Load `.provision/config.yaml`, apply overrides and resolve paths against `root`.
pub fn load_config(root: &Path, overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = Config::load(root).context("failed to load config")?;
    if let Some(platform) = overrides.platform {
        config.environment.platform = platform;
    }
    for (key, value) in &overrides.vars {
        config.environment.set_var(key, value);
    }
    config.environment.resolve_paths(root);
    Ok(config)
}

pub fn parse_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn parse_platform(s: &str) -> Result<Platform, String> {
    Platform::parse(s).ok_or_else(|| format!("unknown platform '{s}' (linux, windows, macos)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_splits_on_first_equals() {
        assert_eq!(
            parse_var("DATABASE_URL=tcp://db:8529?x=1").unwrap(),
            ("DATABASE_URL".to_string(), "tcp://db:8529?x=1".to_string())
        );
        assert_eq!(parse_var("EMPTY=").unwrap().1, "");
        assert!(parse_var("NOEQUALS").is_err());
        assert!(parse_var("=value").is_err());
    }

    #[test]
    fn parse_platform_aliases() {
        assert_eq!(parse_platform("ubuntu").unwrap(), Platform::Linux);
        assert_eq!(parse_platform("Windows").unwrap(), Platform::Windows);
        assert!(parse_platform("solaris").is_err());
    }
}
