use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("not initialized: run 'provision init'")]
    NotInitialized,

    #[error("duplicate action id: {0}")]
    DuplicateActionId(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("unknown variable '${{{0}}}'")]
    UnknownVariable(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("precondition could not be evaluated: {0}")]
    PreconditionEvaluation(String),

    #[error("{operation} failed: {detail}")]
    EffectExecution { operation: String, detail: String },

    #[error("service '{service}' not healthy after {attempts} probe(s) in {elapsed_ms}ms")]
    HealthCheckTimeout {
        service: String,
        attempts: u32,
        elapsed_ms: u64,
    },

    #[error("deployment log: {0}")]
    LogPersistence(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    pub fn effect(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EffectExecution {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
