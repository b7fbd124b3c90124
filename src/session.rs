//! Protocol states and immutable negotiation snapshots
use chrono::Utc;

use super::error::{ErrorKind, WorkflowError};
use super::signature::SignatureSet;
use super::trade::{TimeStamp, TradeRecord, TradeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Building,
    LocallyValidated,
    SentForCountersignature,
    CounterpartyValidating,
    FullySigned,
    Finalizing,
    Finalized,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Why a session ended in `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ProtocolState,
    pub to: ProtocolState,
    pub at: TimeStamp<Utc>,
}

/// One negotiation over a single trade id.
///
/// Transitions return a new snapshot, so a session handed to an observer never
/// changes underneath it.
#[derive(Debug, Clone)]
pub struct WorkflowSession {
    trade_id: String,
    role: Role,
    state: ProtocolState,
    record: Option<TradeRecord>,
    signatures: SignatureSet,
    rejection: Option<Rejection>,
    history: Vec<Transition>,
}

impl ProtocolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolState::Finalized | ProtocolState::Rejected)
    }

    /// Either party may still walk away.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            ProtocolState::Building
                | ProtocolState::LocallyValidated
                | ProtocolState::SentForCountersignature
                | ProtocolState::CounterpartyValidating
        )
    }

    pub fn can_transition_to(self, next: ProtocolState) -> bool {
        use ProtocolState::*;

        match (self, next) {
            (Building, LocallyValidated)
            | (LocallyValidated, SentForCountersignature)
            | (SentForCountersignature, FullySigned)
            | (CounterpartyValidating, FullySigned)
            | (FullySigned, Finalizing)
            | (FullySigned, Finalized)
            | (Finalizing, Finalized) => true,
            // once fully signed only the finalizer may still turn a trade down
            (from, Rejected) => !from.is_terminal(),
            _ => false,
        }
    }

    /// The record status an observer should see for this protocol state.
    pub fn trade_status(self) -> TradeStatus {
        match self {
            ProtocolState::Building
            | ProtocolState::LocallyValidated
            | ProtocolState::SentForCountersignature
            | ProtocolState::CounterpartyValidating => TradeStatus::Proposed,
            ProtocolState::FullySigned | ProtocolState::Finalizing => TradeStatus::Signed,
            ProtocolState::Finalized => TradeStatus::Finalized,
            ProtocolState::Rejected => TradeStatus::Rejected,
        }
    }
}

impl WorkflowSession {
    /// Initiator side, starting in `Building`.
    pub fn initiate(trade_id: impl Into<String>) -> Self {
        Self::start(trade_id.into(), Role::Initiator, ProtocolState::Building)
    }
    /// Responder side, opened when a proposal arrives.
    pub fn respond(record: TradeRecord) -> Self {
        let mut session = Self::start(
            record.trade_id().to_string(),
            Role::Responder,
            ProtocolState::CounterpartyValidating,
        );
        session.record = Some(record);
        session
    }
    fn start(trade_id: String, role: Role, state: ProtocolState) -> Self {
        Self {
            trade_id,
            role,
            state,
            record: None,
            signatures: SignatureSet::new(),
            rejection: None,
            history: vec![],
        }
    }

    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn state(&self) -> ProtocolState {
        self.state
    }
    /// The record as agreed; signatures cover exactly these bytes.
    pub fn record(&self) -> Option<&TradeRecord> {
        self.record.as_ref()
    }
    /// The record restamped with the status matching the protocol state.
    pub fn status_view(&self) -> Option<TradeRecord> {
        self.record
            .as_ref()
            .map(|r| r.with_status(self.state.trade_status()))
    }
    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }
    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }
    pub fn history(&self) -> &[Transition] {
        &self.history
    }
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn advance(&self, to: ProtocolState) -> Result<Self, WorkflowError> {
        if !self.state.can_transition_to(to) {
            return Err(WorkflowError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        let mut next = self.clone();
        next.history.push(Transition {
            from: self.state,
            to,
            at: TimeStamp::new(),
        });
        next.state = to;
        Ok(next)
    }
    pub fn with_record(&self, record: TradeRecord) -> Self {
        Self {
            record: Some(record),
            ..self.clone()
        }
    }
    pub fn with_signatures(&self, signatures: SignatureSet) -> Self {
        Self {
            signatures,
            ..self.clone()
        }
    }
    /// Move to `Rejected`, recording the cause. Terminal sessions are returned as is.
    pub fn reject(&self, err: &WorkflowError) -> Self {
        match self.advance(ProtocolState::Rejected) {
            Ok(mut next) => {
                next.rejection = Some(Rejection {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                next
            }
            Err(_) => self.clone(),
        }
    }
    pub fn cancel(&self, reason: &str) -> Result<Self, WorkflowError> {
        if !self.state.is_cancellable() {
            return Err(WorkflowError::NotCancellable(self.state));
        }
        Ok(self.reject(&WorkflowError::Cancelled(reason.to_string())))
    }
}
