use std::fmt;
use std::time::Duration;

use crate::session::ProtocolState;

/// Failures while drafting or (de)serialising a trade record.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("Trade id is missing or empty")]
    MissingTradeId,
    #[error("The {0} party is not set")]
    MissingParty(&'static str),
    #[error("Initiator and counterparty must be distinct, both were {0}")]
    SameParty(String),
    #[error("Currency code for the {0} leg is missing or empty")]
    InvalidCurrency(&'static str),
    #[error("Failed to encode trade record: {0}")]
    Encoding(String),
    #[error("Failed to decode trade record: {0}")]
    Decoding(String),
}

/// Which contract check rejected a propose transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    WrongCommandCount,
    NonEmptyInputs,
    WrongOutputCount,
    NegativeAmount,
    UnauthorizedSigner,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationKind::WrongCommandCount => "WrongCommandCount",
            ValidationKind::NonEmptyInputs => "NonEmptyInputs",
            ValidationKind::WrongOutputCount => "WrongOutputCount",
            ValidationKind::NegativeAmount => "NegativeAmount",
            ValidationKind::UnauthorizedSigner => "UnauthorizedSigner",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No message arrived within {0:?}")]
    Timeout(Duration),
    #[error("No route to party {0}")]
    UnknownPeer(String),
    #[error("Channel to {0} is closed")]
    Disconnected(String),
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Everything that can end a negotiation, plus the two caller-misuse cases
/// (`NotCancellable`, `IllegalTransition`) which leave the session untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Invalid signature for {party}: {reason}")]
    InvalidSignature { party: String, reason: String },
    #[error("Counterparty rejected the proposal: {0}")]
    CounterpartyRejected(String),
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    TransportTimeout {
        waiting_for: String,
        timeout: Duration,
    },
    #[error("Finalization conflict: {0}")]
    FinalizationConflict(String),
    #[error(transparent)]
    Trade(#[from] TradeError),
    #[error("Unknown party: {0}")]
    UnknownParty(String),
    #[error("Transport failure: {0}")]
    Transport(TransportError),
    #[error("Session cancelled: {0}")]
    Cancelled(String),
    #[error("Session can no longer be cancelled in state {0:?}")]
    NotCancellable(ProtocolState),
    #[error("Illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: ProtocolState,
        to: ProtocolState,
    },
}

/// Flat classification of a [`WorkflowError`], kept on rejected sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation(ValidationKind),
    InvalidSignature,
    CounterpartyRejected,
    TransportTimeout,
    FinalizationConflict,
    MalformedTrade,
    UnknownParty,
    Transport,
    Cancelled,
    Misuse,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(e) => ErrorKind::Validation(e.kind),
            WorkflowError::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            WorkflowError::CounterpartyRejected(_) => ErrorKind::CounterpartyRejected,
            WorkflowError::TransportTimeout { .. } => ErrorKind::TransportTimeout,
            WorkflowError::FinalizationConflict(_) => ErrorKind::FinalizationConflict,
            WorkflowError::Trade(_) => ErrorKind::MalformedTrade,
            WorkflowError::UnknownParty(_) => ErrorKind::UnknownParty,
            WorkflowError::Transport(_) => ErrorKind::Transport,
            WorkflowError::Cancelled(_) => ErrorKind::Cancelled,
            WorkflowError::NotCancellable(_) | WorkflowError::IllegalTransition { .. } => {
                ErrorKind::Misuse
            }
        }
    }

    /// Whether this error moves the session to `Rejected`.
    pub fn is_terminal(&self) -> bool {
        self.kind() != ErrorKind::Misuse
    }

    pub(crate) fn timeout(waiting_for: &str, timeout: Duration) -> Self {
        WorkflowError::TransportTimeout {
            waiting_for: waiting_for.to_string(),
            timeout,
        }
    }
}

impl From<TransportError> for WorkflowError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(timeout) => WorkflowError::timeout("transport", timeout),
            other => WorkflowError::Transport(other),
        }
    }
}
