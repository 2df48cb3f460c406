//! Test host: real commands and files, scripted HTTP responses.

use crate::error::Result;
use crate::host::{CommandSpec, ExecOutput, Host, HttpResponse, SystemHost};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

#[derive(Default)]
pub struct ScriptedHost {
    inner: SystemHost,
    responses: RefCell<VecDeque<std::result::Result<HttpResponse, String>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_http(&self, status: u16, body: &str) {
        self.responses.borrow_mut().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_refused(&self) {
        self.responses
            .borrow_mut()
            .push_back(Err("connection refused".to_string()));
    }

    /// URLs requested so far, in order.
    pub fn http_calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Host for ScriptedHost {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        self.inner.execute(spec)
    }

    fn http_get(&self, url: &str, _timeout: Duration) -> std::result::Result<HttpResponse, String> {
        self.calls.borrow_mut().push(url.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err("connection refused".to_string()))
    }

    fn read_file(&self, path: &Path) -> std::io::Result<String> {
        self.inner.read_file(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.inner.write_file(path, contents)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }

    fn command_available(&self, name: &str) -> bool {
        self.inner.command_available(name)
    }
}
