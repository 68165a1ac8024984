use thiserror::Error;

/// Failures surfaced at the engine boundaries. Channel transport errors never
/// appear here; plugins classify them into a `SendOutcome` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("webhook signature mismatch")]
    SignatureInvalid,

    #[error("unknown or unconfigured gateway: {0}")]
    UnknownGateway(String),

    #[error("storage failure: {0}")]
    Store(#[from] anyhow::Error),
}
