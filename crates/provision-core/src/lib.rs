pub mod action;
pub mod clock;
pub mod config;
pub mod environment;
pub mod error;
pub mod health;
pub mod host;
pub mod io;
pub mod log;
pub mod orchestrator;
pub mod paths;
pub mod predicate;
pub mod probe;
pub mod report;
pub mod scaffold;
pub mod service;

#[cfg(test)]
mod testing;

pub use error::{ProvisionError, Result};
