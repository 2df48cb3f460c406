//! Append-only deployment log.
//!
//! One JSON Lines file per run: a header record, one record per Outcome
//! (flushed as it is appended), and a closing summary record. `latest` in the
//! log directory holds the id of the most recently finished run.

use crate::environment::Platform;
use crate::error::{ProvisionError, Result};
use crate::orchestrator::RunStatus;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Skipped,
    Succeeded,
    Failed,
}

impl OutcomeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeResult::Skipped => "skipped",
            OutcomeResult::Succeeded => "succeeded",
            OutcomeResult::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record of one attempt at one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub action_id: String,
    /// 1-based. Retries of the same action produce attempts 2, 3, ...
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: OutcomeResult,
    #[serde(default)]
    pub detail: String,
}

impl Outcome {
    /// An outcome finishing now.
    pub fn finished(
        action_id: impl Into<String>,
        attempt: u32,
        started_at: DateTime<Utc>,
        result: OutcomeResult,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            attempt,
            started_at,
            finished_at: Utc::now(),
            result,
            detail: detail.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.result == OutcomeResult::Failed
    }

    /// Executed means the effect ran, whatever its result.
    pub fn is_executed(&self) -> bool {
        self.result != OutcomeResult::Skipped
    }

    pub fn render(&self) -> String {
        let attempt = if self.attempt > 1 {
            format!(" (attempt {})", self.attempt)
        } else {
            String::new()
        };
        let detail = if self.detail.is_empty() {
            String::new()
        } else {
            format!("  {}", self.detail)
        };
        format!(
            "{}  {:<9}  {}{attempt}{detail}",
            self.finished_at.format("%H:%M:%S"),
            self.result.as_str(),
            self.action_id,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_id: String,
    pub environment: String,
    pub platform: Platform,
    pub started_at: DateTime<Utc>,
}

impl RunHeader {
    pub fn new(environment: impl Into<String>, platform: Platform) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: new_run_id(started_at),
            environment: environment.into(),
            platform,
            started_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// One line of a run log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Header(RunHeader),
    Outcome(Outcome),
    Summary(RunSummary),
}

/// Sortable run id: UTC start time plus a random suffix.
pub fn new_run_id(started_at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", started_at.format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

// ---------------------------------------------------------------------------
// DeploymentLog
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DeploymentLog {
    header: RunHeader,
    outcomes: Vec<Outcome>,
    summary: Option<RunSummary>,
    path: Option<PathBuf>,
    file: Option<File>,
    errors: Vec<String>,
}

impl DeploymentLog {
    /// A log that is never written to disk.
    pub fn in_memory(header: RunHeader) -> Self {
        Self {
            header,
            outcomes: Vec::new(),
            summary: None,
            path: None,
            file: None,
            errors: Vec::new(),
        }
    }

    /// Open `<log_dir>/<run_id>.jsonl` and write the header. Never fails: a
    /// log that cannot be persisted keeps working in memory, has no
    /// [`path`](DeploymentLog::path), and reports the problem through
    /// [`DeploymentLog::errors`].
    pub fn create(log_dir: &Path, header: RunHeader) -> Self {
        let path = paths::run_log_path(log_dir, &header.run_id);
        let mut log = Self::in_memory(header);

        let opened = crate::io::ensure_dir(log_dir).and_then(|()| {
            OpenOptions::new()
                .create_new(true)
                .append(true)
                .open(&path)
                .map_err(ProvisionError::from)
        });
        match opened {
            Ok(file) => {
                log.file = Some(file);
                log.path = Some(path);
                let record = LogRecord::Header(log.header.clone());
                log.write_record(&record);
            }
            Err(e) => log.record_error(format!("cannot open {}: {e}", path.display())),
        }
        log
    }

    pub fn header(&self) -> &RunHeader {
        &self.header
    }

    pub fn run_id(&self) -> &str {
        &self.header.run_id
    }

    /// Path of the run file, if one was created.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append(&mut self, outcome: Outcome) {
        self.write_record(&LogRecord::Outcome(outcome.clone()));
        self.outcomes.push(outcome);
    }

    /// Write the summary record and point `latest` at this run.
    pub fn finish(&mut self, status: RunStatus) {
        let summary = RunSummary {
            status,
            finished_at: Utc::now(),
            executed: self.executed_count(),
            skipped: self.outcomes.len() - self.executed_count(),
            failed: self.failed().count(),
        };
        self.write_record(&LogRecord::Summary(summary.clone()));
        self.summary = Some(summary);
        if self.file.take().is_none() {
            return;
        }
        let latest = self
            .path
            .as_deref()
            .and_then(Path::parent)
            .map(paths::latest_run_path);
        if let Some(latest) = latest {
            if let Err(e) = crate::io::atomic_write(&latest, self.header.run_id.as_bytes()) {
                self.record_error(format!("cannot update {}: {e}", latest.display()));
            }
        }
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    pub fn failed(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn tail(&self, n: usize) -> &[Outcome] {
        let start = self.outcomes.len().saturating_sub(n);
        &self.outcomes[start..]
    }

    pub fn executed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_executed()).count()
    }

    /// Persistence problems seen so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "run {}  environment={}  platform={}  started={}\n",
            self.header.run_id,
            self.header.environment,
            self.header.platform,
            self.header.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        for o in &self.outcomes {
            out.push_str(&o.render());
            out.push('\n');
        }
        match &self.summary {
            Some(s) => out.push_str(&format!(
                "{}: {} executed, {} skipped, {} failed\n",
                s.status, s.executed, s.skipped, s.failed
            )),
            None => out.push_str("(run did not finish)\n"),
        }
        out
    }

    fn write_record(&mut self, record: &LogRecord) {
        if self.file.is_none() {
            return;
        }
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                self.record_error(format!("cannot encode log record: {e}"));
                return;
            }
        };
        let written = match self.file.as_mut() {
            Some(file) => crate::io::append_line(file, &line),
            None => return,
        };
        if let Err(e) = written {
            let path = self
                .path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            self.record_error(format!("cannot append to {path}: {e}"));
        }
    }

    fn record_error(&mut self, message: String) {
        tracing::warn!(run_id = %self.header.run_id, "{message}");
        self.errors.push(message);
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Read a run file back. A truncated final line (crash mid-write) is
    /// ignored; any other malformed line is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut header = None;
        let mut outcomes = Vec::new();
        let mut summary = None;

        for (i, line) in lines.iter().enumerate() {
            let record: LogRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(_) if i + 1 == lines.len() && !data.ends_with('\n') => break,
                Err(e) => {
                    return Err(ProvisionError::LogPersistence(format!(
                        "{}:{}: {e}",
                        path.display(),
                        i + 1
                    )))
                }
            };
            match record {
                LogRecord::Header(h) if header.is_none() => header = Some(h),
                LogRecord::Header(_) => {
                    return Err(ProvisionError::LogPersistence(format!(
                        "{}: duplicate run header",
                        path.display()
                    )))
                }
                LogRecord::Outcome(o) => outcomes.push(o),
                LogRecord::Summary(s) => summary = Some(s),
            }
        }

        let header = header.ok_or_else(|| {
            ProvisionError::LogPersistence(format!("{}: missing run header", path.display()))
        })?;
        Ok(Self {
            header,
            outcomes,
            summary,
            path: Some(path.to_path_buf()),
            file: None,
            errors: Vec::new(),
        })
    }

    pub fn load_run(log_dir: &Path, run_id: &str) -> Result<Self> {
        let path = paths::run_log_path(log_dir, run_id);
        if !path.exists() {
            return Err(ProvisionError::RunNotFound(run_id.to_string()));
        }
        Self::load(&path)
    }

    /// The run named by `latest`, falling back to the newest run file.
    pub fn load_latest(log_dir: &Path) -> Result<Self> {
        let pointer = paths::latest_run_path(log_dir);
        let run_id = match std::fs::read_to_string(&pointer) {
            Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => list_runs(log_dir)?
                .pop()
                .ok_or_else(|| ProvisionError::RunNotFound("latest".to_string()))?,
        };
        Self::load_run(log_dir, &run_id)
    }
}

/// Run ids with a log file in `log_dir`, oldest first.
pub fn list_runs(log_dir: &Path) -> Result<Vec<String>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(paths::RUN_LOG_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            runs.push(stem.to_string());
        }
    }
    runs.sort();
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outcome(id: &str, result: OutcomeResult) -> Outcome {
        Outcome::finished(id, 1, Utc::now(), result, "")
    }

    fn header() -> RunHeader {
        RunHeader::new("production", Platform::Linux)
    }

    #[test]
    fn run_id_sorts_by_time() {
        let a = new_run_id("2026-01-02T03:04:05Z".parse().unwrap());
        let b = new_run_id("2026-01-02T03:04:06Z".parse().unwrap());
        assert!(a.starts_with("20260102T030405Z-"));
        assert_eq!(a.len(), "20260102T030405Z-".len() + 8);
        assert!(a < b);
    }

    #[test]
    fn persisted_log_replays_in_order() {
        let dir = TempDir::new().unwrap();
        let mut log = DeploymentLog::create(dir.path(), header());
        log.append(outcome("install-nginx", OutcomeResult::Skipped));
        log.append(outcome("write-site", OutcomeResult::Succeeded));
        log.append(outcome("start-nginx", OutcomeResult::Failed));
        log.finish(RunStatus::Failed);
        assert!(log.errors().is_empty());

        let loaded = DeploymentLog::load(log.path().unwrap()).unwrap();
        let ids: Vec<&str> = loaded.outcomes().iter().map(|o| o.action_id.as_str()).collect();
        assert_eq!(ids, vec!["install-nginx", "write-site", "start-nginx"]);
        assert_eq!(loaded.header(), log.header());
        let summary = loaded.summary().unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!((summary.executed, summary.skipped, summary.failed), (2, 1, 1));
    }

    #[test]
    fn outcomes_are_on_disk_before_finish() {
        let dir = TempDir::new().unwrap();
        let mut log = DeploymentLog::create(dir.path(), header());
        log.append(outcome("a", OutcomeResult::Succeeded));
        let loaded = DeploymentLog::load(log.path().unwrap()).unwrap();
        assert_eq!(loaded.outcomes().len(), 1);
        assert!(loaded.summary().is_none());
        assert!(loaded.render_text().contains("did not finish"));
    }

    #[test]
    fn truncated_last_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut log = DeploymentLog::create(dir.path(), header());
        log.append(outcome("a", OutcomeResult::Succeeded));
        let path = log.path().unwrap().to_path_buf();
        drop(log);
        let mut data = std::fs::read_to_string(&path).unwrap();
        data.push_str(r#"{"record":"outcome","action_id":"b","att"#);
        std::fs::write(&path, data).unwrap();

        let loaded = DeploymentLog::load(&path).unwrap();
        assert_eq!(loaded.outcomes().len(), 1);
    }

    #[test]
    fn corrupt_middle_line_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.jsonl");
        std::fs::write(&path, "garbage\n{\"record\":\"summary\"}\n").unwrap();
        assert!(matches!(
            DeploymentLog::load(&path),
            Err(ProvisionError::LogPersistence(_))
        ));
    }

    #[test]
    fn latest_pointer_tracks_finished_run() {
        let dir = TempDir::new().unwrap();
        let mut first = DeploymentLog::create(dir.path(), header());
        first.finish(RunStatus::Succeeded);
        let mut second = DeploymentLog::create(dir.path(), header());
        second.append(outcome("a", OutcomeResult::Succeeded));
        second.finish(RunStatus::Succeeded);

        let latest = DeploymentLog::load_latest(dir.path()).unwrap();
        assert_eq!(latest.run_id(), second.run_id());
        assert_eq!(list_runs(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn unknown_run_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            DeploymentLog::load_run(dir.path(), "nope"),
            Err(ProvisionError::RunNotFound(_))
        ));
        assert!(matches!(
            DeploymentLog::load_latest(dir.path()),
            Err(ProvisionError::RunNotFound(_))
        ));
    }

    #[test]
    fn unwritable_log_dir_is_collected_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mut log = DeploymentLog::create(&blocker, header());
        log.append(outcome("a", OutcomeResult::Succeeded));
        log.finish(RunStatus::Succeeded);
        assert_eq!(log.outcomes().len(), 1);
        assert_eq!(log.errors().len(), 1);
        assert!(log.path().is_none());
    }

    #[test]
    fn failed_filter_and_tail() {
        let mut log = DeploymentLog::in_memory(header());
        log.append(outcome("a", OutcomeResult::Succeeded));
        log.append(outcome("b", OutcomeResult::Failed));
        log.append(outcome("c", OutcomeResult::Skipped));
        let failed: Vec<&str> = log.failed().map(|o| o.action_id.as_str()).collect();
        assert_eq!(failed, vec!["b"]);
        let tail: Vec<&str> = log.tail(2).iter().map(|o| o.action_id.as_str()).collect();
        assert_eq!(tail, vec!["b", "c"]);
        assert_eq!(log.tail(10).len(), 3);
        assert_eq!(log.executed_count(), 2);
    }

    #[test]
    fn record_wire_format() {
        let o = Outcome {
            action_id: "pip-install".to_string(),
            attempt: 2,
            started_at: "2026-01-02T03:04:05Z".parse().unwrap(),
            finished_at: "2026-01-02T03:04:09Z".parse().unwrap(),
            result: OutcomeResult::Failed,
            detail: "exit 1: no matching distribution".to_string(),
        };
        let line = serde_json::to_string(&LogRecord::Outcome(o)).unwrap();
        assert!(line.starts_with(r#"{"record":"outcome","action_id":"pip-install","attempt":2"#));
        assert!(line.contains(r#""result":"failed""#));
    }
}
