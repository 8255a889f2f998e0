use thiserror::Error;

/// Errors raised while validating a status change
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Unknown {entity} status: {value}")]
    UnknownStatus { entity: &'static str, value: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
