use crate::environment::EnvironmentConfig;
use crate::host::{CommandSpec, Host};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// A single readiness/health question asked of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Probe {
    Http {
        url: String,
        #[serde(default = "default_probe_timeout")]
        timeout_seconds: u32,
    },
    Command {
        command: String,
        #[serde(default = "default_probe_timeout")]
        timeout_seconds: u32,
    },
}

fn default_probe_timeout() -> u32 {
    10
}

impl Probe {
    pub fn http(url: impl Into<String>) -> Self {
        Probe::Http {
            url: url.into(),
            timeout_seconds: default_probe_timeout(),
        }
    }

    pub fn command(command: impl Into<String>) -> Self {
        Probe::Command {
            command: command.into(),
            timeout_seconds: default_probe_timeout(),
        }
    }

    /// The raw (unexpanded) target: URL or command line.
    pub fn target(&self) -> &str {
        match self {
            Probe::Http { url, .. } => url,
            Probe::Command { command, .. } => command,
        }
    }

    /// Issue the probe once. Never fails: transport and spawn errors become
    /// [`ProbeResult::Error`].
    pub fn run(&self, host: &dyn Host, env: &EnvironmentConfig) -> ProbeResult {
        match self {
            Probe::Http {
                url,
                timeout_seconds,
            } => {
                let url = match env.expand(url) {
                    Ok(u) => u,
                    Err(e) => return ProbeResult::error(e.to_string()),
                };
                let timeout = Duration::from_secs((*timeout_seconds).max(1) as u64);
                match host.http_get(&url, timeout) {
                    Ok(resp) => ProbeResult::Http {
                        status: resp.status,
                        body: resp.body,
                    },
                    Err(e) => ProbeResult::error(e),
                }
            }
            Probe::Command {
                command,
                timeout_seconds,
            } => {
                let command = match env.expand(command) {
                    Ok(c) => c,
                    Err(e) => return ProbeResult::error(e.to_string()),
                };
                let spec = CommandSpec::shell(&command, env.platform)
                    .in_dir(env.working_dir.clone())
                    .with_timeout(*timeout_seconds);
                match host.execute(&spec) {
                    Ok(out) if out.timed_out => ProbeResult::error(out.summary()),
                    Ok(out) => ProbeResult::Command {
                        exit_code: out.exit_code,
                        output: out.output,
                    },
                    Err(e) => ProbeResult::error(e.to_string()),
                }
            }
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Http { url, .. } => write!(f, "GET {url}"),
            Probe::Command { command, .. } => write!(f, "$ {command}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ProbeResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeResult {
    Http { status: u16, body: String },
    Command { exit_code: Option<i32>, output: String },
    Error { message: String },
}

impl ProbeResult {
    pub fn error(message: impl Into<String>) -> Self {
        ProbeResult::Error {
            message: message.into(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ProbeResult::Http { status, body } => {
                let snippet: String = body.trim().chars().take(120).collect();
                if snippet.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {snippet}")
                }
            }
            ProbeResult::Command { exit_code, output } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let tail = output.trim().lines().last().unwrap_or("").trim();
                if tail.is_empty() {
                    format!("exit {code}")
                } else {
                    format!("exit {code}: {tail}")
                }
            }
            ProbeResult::Error { message } => format!("error: {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Expected probe outcome. Every present field must hold; an empty matcher
/// means HTTP 200 or exit code 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Matcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// RFC 6901 pointer (`/services/arangodb`) or dotted path (`services.arangodb`)
    /// into a JSON response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<serde_json::Value>,
}

impl Matcher {
    pub fn status(code: u16) -> Self {
        Self {
            status: Some(code),
            ..Self::default()
        }
    }

    pub fn json_field(pointer: impl Into<String>, equals: serde_json::Value) -> Self {
        Self {
            json_pointer: Some(pointer.into()),
            equals: Some(equals),
            ..Self::default()
        }
    }

    pub fn matches(&self, result: &ProbeResult) -> bool {
        match result {
            ProbeResult::Error { .. } => false,
            ProbeResult::Http { status, body } => {
                if self.exit_code.is_some() {
                    return false;
                }
                if *status != self.status.unwrap_or(200) {
                    return false;
                }
                self.body_matches(body)
            }
            ProbeResult::Command { exit_code, output } => {
                if self.status.is_some() {
                    return false;
                }
                if *exit_code != Some(self.exit_code.unwrap_or(0)) {
                    return false;
                }
                self.body_matches(output)
            }
        }
    }

    fn body_matches(&self, body: &str) -> bool {
        if let Some(needle) = &self.contains {
            if !body.contains(needle.as_str()) {
                return false;
            }
        }
        if self.json_pointer.is_none() && self.equals.is_none() {
            return true;
        }
        let Ok(doc) = serde_json::from_str::<serde_json::Value>(body) else {
            return false;
        };
        let pointer = self
            .json_pointer
            .as_deref()
            .map(normalize_pointer)
            .unwrap_or_default();
        let Some(found) = doc.pointer(&pointer) else {
            return false;
        };
        match &self.equals {
            Some(expected) => found == expected,
            None => true,
        }
    }
}

fn normalize_pointer(p: &str) -> String {
    if p.is_empty() || p.starts_with('/') {
        p.to_string()
    } else {
        format!("/{}", p.replace('.', "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http(status: u16, body: &str) -> ProbeResult {
        ProbeResult::Http {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn empty_matcher_expects_200_or_exit_zero() {
        let m = Matcher::default();
        assert!(m.matches(&http(200, "")));
        assert!(!m.matches(&http(502, "")));
        assert!(m.matches(&ProbeResult::Command {
            exit_code: Some(0),
            output: String::new()
        }));
        assert!(!m.matches(&ProbeResult::Command {
            exit_code: Some(1),
            output: String::new()
        }));
    }

    #[test]
    fn errors_never_match() {
        assert!(!Matcher::default().matches(&ProbeResult::error("connection refused")));
    }

    #[test]
    fn contains_checks_body() {
        let m = Matcher {
            contains: Some("healthy".to_string()),
            ..Matcher::default()
        };
        assert!(m.matches(&http(200, r#"{"status":"healthy"}"#)));
        assert!(!m.matches(&http(200, r#"{"status":"starting"}"#)));
    }

    #[test]
    fn json_field_with_dotted_path() {
        let m = Matcher::json_field("services.arangodb", json!("connected"));
        assert!(m.matches(&http(
            200,
            r#"{"status":"healthy","services":{"arangodb":"connected"}}"#
        )));
        assert!(!m.matches(&http(
            200,
            r#"{"status":"degraded","services":{"arangodb":"disconnected"}}"#
        )));
        assert!(!m.matches(&http(200, "not json")));
    }

    #[test]
    fn json_pointer_presence_only() {
        let m = Matcher {
            json_pointer: Some("/version".to_string()),
            ..Matcher::default()
        };
        assert!(m.matches(&http(200, r#"{"server":"arango","version":"3.11.5"}"#)));
        assert!(!m.matches(&http(200, r#"{"server":"arango"}"#)));
    }

    #[test]
    fn status_field_does_not_apply_to_commands() {
        let m = Matcher::status(200);
        assert!(!m.matches(&ProbeResult::Command {
            exit_code: Some(0),
            output: String::new()
        }));
    }

    #[test]
    fn probe_yaml_tagged() {
        let yaml = "type: http\nurl: http://localhost:8529/_api/version\n";
        let p: Probe = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(p, Probe::http("http://localhost:8529/_api/version"));
        assert_eq!(p.to_string(), "GET http://localhost:8529/_api/version");
    }

    #[test]
    fn matcher_yaml_equals_string() {
        let yaml = "json_pointer: services.arangodb\nequals: connected\n";
        let m: Matcher = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(m.equals, Some(json!("connected")));
    }

    #[test]
    fn result_summary_truncates_body() {
        let long = "x".repeat(500);
        let s = http(200, &long).summary();
        assert!(s.starts_with("HTTP 200: "));
        assert!(s.len() < 140);
    }
}
