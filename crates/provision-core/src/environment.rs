//! The explicit environment a run executes against.
//!
//! Every host-facing string in a plan (commands, URLs, file paths, file
//! contents) may reference `${NAME}`. Expansion reads only
//! `EnvironmentConfig::variables`; the process environment is never consulted.

use crate::error::{ProvisionError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Variable injected by [`EnvironmentConfig::resolve_paths`] when not set explicitly.
pub const PROJECT_ROOT_VAR: &str = "PROJECT_ROOT";

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Windows,
    Macos,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Macos => "macos",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linux" | "ubuntu" => Some(Platform::Linux),
            "windows" => Some(Platform::Windows),
            "macos" | "darwin" => Some(Platform::Macos),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EnvironmentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "Platform::current")]
    pub platform: Platform,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Working directory for shell and exec operations. Defaults to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(crate::paths::LOGS_DIR)
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            platform: Platform::current(),
            variables: BTreeMap::new(),
            log_dir: default_log_dir(),
            working_dir: None,
        }
    }
}

static VAR_RE: OnceLock<Regex> = OnceLock::new();

fn var_re() -> &'static Regex {
    VAR_RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

impl EnvironmentConfig {
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            platform,
            ..Self::default()
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Make `log_dir` and `working_dir` absolute against `root` and expose the
    /// root as `${PROJECT_ROOT}` unless the config already defines it.
    pub fn resolve_paths(&mut self, root: &Path) {
        self.log_dir = crate::paths::resolve(root, &self.log_dir);
        self.working_dir = Some(match &self.working_dir {
            Some(dir) => crate::paths::resolve(root, dir),
            None => root.to_path_buf(),
        });
        self.variables
            .entry(PROJECT_ROOT_VAR.to_string())
            .or_insert_with(|| root.display().to_string());
    }

    /// Replace every `${NAME}` in `input`. Fails on the first unknown name.
    pub fn expand(&self, input: &str) -> Result<String> {
        let re = var_re();
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in re.captures_iter(input) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let name = &caps[1];
            let value = self
                .variables
                .get(name)
                .ok_or_else(|| ProvisionError::UnknownVariable(name.to_string()))?;
            out.push_str(&input[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&input[last..]);
        Ok(out)
    }

    pub fn expand_path(&self, input: &str) -> Result<PathBuf> {
        let expanded = PathBuf::from(self.expand(input)?);
        match &self.working_dir {
            Some(dir) if expanded.is_relative() => Ok(dir.join(expanded)),
            _ => Ok(expanded),
        }
    }

    /// Names referenced by `input` that are not defined.
    pub fn undefined_in(&self, input: &str) -> Vec<String> {
        var_re()
            .captures_iter(input)
            .map(|c| c[1].to_string())
            .filter(|name| !self.variables.contains_key(name) && name != PROJECT_ROOT_VAR)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> EnvironmentConfig {
        EnvironmentConfig::new("production", Platform::Linux)
            .with_var("APP_PORT", "8000")
            .with_var("APP_DIR", "/opt/pathrag")
    }

    #[test]
    fn expand_replaces_known_vars() {
        let e = env();
        assert_eq!(
            e.expand("http://localhost:${APP_PORT}/health").unwrap(),
            "http://localhost:8000/health"
        );
        assert_eq!(
            e.expand("${APP_DIR}/venv/bin/pip install -r ${APP_DIR}/requirements.txt")
                .unwrap(),
            "/opt/pathrag/venv/bin/pip install -r /opt/pathrag/requirements.txt"
        );
    }

    #[test]
    fn expand_leaves_plain_dollars_alone() {
        let e = env();
        assert_eq!(e.expand("echo $HOME $1").unwrap(), "echo $HOME $1");
    }

    #[test]
    fn expand_unknown_var_fails() {
        let e = env();
        let err = e.expand("${DB_PASSWORD}").unwrap_err();
        assert!(matches!(err, ProvisionError::UnknownVariable(ref n) if n == "DB_PASSWORD"));
    }

    #[test]
    fn undefined_in_lists_missing_names() {
        let e = env();
        let missing = e.undefined_in("${APP_PORT} ${NGINX_SITE} ${PROJECT_ROOT}");
        assert_eq!(missing, vec!["NGINX_SITE".to_string()]);
    }

    #[test]
    fn resolve_paths_anchors_relative_dirs() {
        let mut e = env();
        e.resolve_paths(Path::new("/srv/stack"));
        assert_eq!(e.log_dir, PathBuf::from("/srv/stack/.provision/logs"));
        assert_eq!(e.working_dir, Some(PathBuf::from("/srv/stack")));
        assert_eq!(e.variables[PROJECT_ROOT_VAR], "/srv/stack");
        assert_eq!(
            e.expand_path("deploy/app.conf").unwrap(),
            PathBuf::from("/srv/stack/deploy/app.conf")
        );
    }

    #[test]
    fn platform_parse_accepts_aliases() {
        assert_eq!(Platform::parse("Ubuntu"), Some(Platform::Linux));
        assert_eq!(Platform::parse("windows"), Some(Platform::Windows));
        assert_eq!(Platform::parse("beos"), None);
    }

    #[test]
    fn environment_yaml_defaults() {
        let e: EnvironmentConfig = serde_yaml::from_str("name: dev\nplatform: windows\n").unwrap();
        assert_eq!(e.platform, Platform::Windows);
        assert!(e.variables.is_empty());
        assert_eq!(e.log_dir, PathBuf::from(".provision/logs"));
    }
}
