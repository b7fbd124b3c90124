//! Initiator side of the agreement workflow
//!
//! Drives one proposal from `Building` to `Finalized`. Each step can be called
//! on its own (useful when the caller wants to inspect or cancel in between) or
//! all at once through [`Initiator::run`]. Any protocol failure leaves the
//! session in `Rejected` with the cause recorded; calling a step out of order
//! returns `IllegalTransition` and changes nothing.
use std::time::Instant;

use tracing::{debug, info, warn};

use super::config::WorkflowConfig;
use super::contract;
use super::error::{TransportError, WorkflowError};
use super::finality::{FinalityReceipt, Finalizer};
use super::party::{Identity, IdentityResolver};
use super::session::{ProtocolState, WorkflowSession};
use super::signature::{Signature, SignatureSet};
use super::trade::{TradeDraft, TradeRecord, TradeStatus};
use super::transport::{Message, Transport};

/// Caller supplied terms of a new proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalParams {
    pub trade_id: String,
    /// Counterparty name, resolved through the identity resolver.
    pub counterparty: String,
    pub bought_currency: String,
    pub bought_amount: i64,
    pub sold_currency: String,
    pub sold_amount: i64,
}

/// A trade both parties signed and the finalizer committed.
#[derive(Debug, Clone)]
pub struct FinalizedAgreement {
    pub record: TradeRecord,
    pub signatures: SignatureSet,
    pub receipt: FinalityReceipt,
}

pub struct Initiator<'a> {
    identity: &'a Identity,
    resolver: &'a dyn IdentityResolver,
    transport: &'a dyn Transport,
    finalizer: &'a dyn Finalizer,
    config: WorkflowConfig,
    session: Option<WorkflowSession>,
}

impl ProposalParams {
    pub fn new(trade_id: impl Into<String>, counterparty: impl Into<String>) -> Self {
        Self {
            trade_id: trade_id.into(),
            counterparty: counterparty.into(),
            bought_currency: String::new(),
            bought_amount: 0,
            sold_currency: String::new(),
            sold_amount: 0,
        }
    }
    pub fn bought(mut self, currency: impl Into<String>, amount: i64) -> Self {
        self.bought_currency = currency.into();
        self.bought_amount = amount;
        self
    }
    pub fn sold(mut self, currency: impl Into<String>, amount: i64) -> Self {
        self.sold_currency = currency.into();
        self.sold_amount = amount;
        self
    }
}

impl<'a> Initiator<'a> {
    pub fn new(
        identity: &'a Identity,
        resolver: &'a dyn IdentityResolver,
        transport: &'a dyn Transport,
        finalizer: &'a dyn Finalizer,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            identity,
            resolver,
            transport,
            finalizer,
            config,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&WorkflowSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> Option<ProtocolState> {
        self.session.as_ref().map(WorkflowSession::state)
    }

    /// Runs every step in order and returns the committed agreement.
    pub fn run(&mut self, params: ProposalParams) -> Result<FinalizedAgreement, WorkflowError> {
        self.propose(params)?;
        self.request_countersignature()?;
        self.await_countersignature()?;
        self.finalize()
    }

    /// BUILDING: resolve the counterparty, build the record and validate it locally.
    pub fn propose(&mut self, params: ProposalParams) -> Result<&WorkflowSession, WorkflowError> {
        if let Some(live) = self.session.as_ref().filter(|s| !s.is_terminal()) {
            return Err(WorkflowError::IllegalTransition {
                from: live.state(),
                to: ProtocolState::Building,
            });
        }
        info!(trade_id = %params.trade_id, counterparty = %params.counterparty, "building proposal");
        let session = WorkflowSession::initiate(&params.trade_id);
        self.session = Some(session.clone());

        let record = match self.build_record(&params) {
            Ok(record) => record,
            Err(err) => return Err(self.fail(err)),
        };
        let next = session
            .with_record(record)
            .advance(ProtocolState::LocallyValidated)?;
        debug!(trade_id = %params.trade_id, "proposal validated locally");

        Ok(self.session.insert(next))
    }

    /// LOCALLY_VALIDATED → SENT_FOR_COUNTERSIGNATURE: sign and dispatch the proposal.
    pub fn request_countersignature(&mut self) -> Result<&WorkflowSession, WorkflowError> {
        let (session, record) = self.require(
            ProtocolState::LocallyValidated,
            ProtocolState::SentForCountersignature,
        )?;
        let signature = match Signature::sign(self.identity, &record) {
            Ok(signature) => signature,
            Err(err) => return Err(self.fail(err)),
        };
        let next = session
            .with_signatures(session.signatures().with(self.identity.party().id(), signature))
            .advance(ProtocolState::SentForCountersignature)?;

        let proposal = Message::Proposal {
            record: record.clone(),
            signature,
        };
        if let Err(err) = self.transport.send(record.counterparty().id(), proposal) {
            return Err(self.fail(err.into()));
        }
        info!(trade_id = record.trade_id(), counterparty = %record.counterparty(), "proposal sent for countersignature");

        Ok(self.session.insert(next))
    }

    /// Blocks until the counterparty answers or the response timeout passes.
    ///
    /// Messages from other parties or about other trades are skipped, so stale
    /// or redelivered frames never drive this session.
    pub fn await_countersignature(&mut self) -> Result<&WorkflowSession, WorkflowError> {
        let (session, record) = self.require(
            ProtocolState::SentForCountersignature,
            ProtocolState::FullySigned,
        )?;
        let counterparty = record.counterparty().clone();
        let timeout = self.config.response_timeout();
        let deadline = Instant::now() + timeout;

        let signature = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let envelope = match self.transport.receive(remaining) {
                Ok(envelope) => envelope,
                Err(TransportError::Timeout(_)) => {
                    return Err(self.fail(WorkflowError::timeout("countersignature", timeout)));
                }
                Err(err) => return Err(self.fail(err.into())),
            };
            if &envelope.from != counterparty.id() || envelope.message.trade_id() != record.trade_id()
            {
                debug!(trade_id = record.trade_id(), from = %envelope.from, "ignoring unrelated message");
                continue;
            }
            match envelope.message {
                Message::Countersignature { signature, .. } => break signature,
                Message::Refusal { reason, .. } => {
                    return Err(self.fail(WorkflowError::CounterpartyRejected(reason)));
                }
                other => {
                    debug!(trade_id = record.trade_id(), message = ?other, "ignoring unexpected message");
                }
            }
        };

        let signatures = session.signatures().with(counterparty.id(), signature);
        let signed = session
            .with_signatures(signatures)
            .advance(ProtocolState::FullySigned)?;
        self.session = Some(signed.clone());

        if let Err(err) = signed.signatures().verify_all(&record) {
            return Err(self.fail(err));
        }
        info!(trade_id = record.trade_id(), "proposal fully signed");

        Ok(self.session.insert(signed))
    }

    /// FULLY_SIGNED → FINALIZING → FINALIZED through the external finalizer.
    pub fn finalize(&mut self) -> Result<FinalizedAgreement, WorkflowError> {
        let (session, record) = self.require(ProtocolState::FullySigned, ProtocolState::Finalizing)?;
        let finalizing = session.advance(ProtocolState::Finalizing)?;
        self.session = Some(finalizing.clone());

        let receipt = match self.finalizer.finalize(
            &record,
            finalizing.signatures(),
            self.config.finalization_timeout(),
        ) {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.fail(err)),
        };

        let done = finalizing.advance(ProtocolState::Finalized)?;
        self.session = Some(done.clone());
        info!(trade_id = record.trade_id(), hash = %receipt.record_hash, "trade finalized");
        self.notify(
            &record,
            Message::Finalized {
                trade_id: record.trade_id().to_string(),
                receipt: receipt.clone(),
            },
        );

        Ok(FinalizedAgreement {
            record: record.with_status(TradeStatus::Finalized),
            signatures: done.signatures().clone(),
            receipt,
        })
    }

    /// Walk away from the proposal. Only allowed before it is fully signed.
    pub fn cancel(&mut self, reason: &str) -> Result<&WorkflowSession, WorkflowError> {
        let session = self
            .session
            .as_ref()
            .ok_or(WorkflowError::IllegalTransition {
                from: ProtocolState::Building,
                to: ProtocolState::Rejected,
            })?;
        let cancelled = session.cancel(reason)?;

        if session.state() == ProtocolState::SentForCountersignature
            && let Some(record) = session.record()
        {
            self.notify(
                record,
                Message::Abort {
                    trade_id: record.trade_id().to_string(),
                    reason: reason.to_string(),
                },
            );
        }
        warn!(trade_id = cancelled.trade_id(), reason, "proposal cancelled");

        Ok(self.session.insert(cancelled))
    }

    fn build_record(&self, params: &ProposalParams) -> Result<TradeRecord, WorkflowError> {
        let counterparty = self.resolver.resolve(&params.counterparty)?;
        let record = TradeDraft::new()
            .set_trade_id(params.trade_id.as_str())
            .set_initiator(self.identity.party().clone())
            .set_counterparty(counterparty)
            .set_status(TradeStatus::Proposed)
            .set_bought(params.bought_currency.as_str(), params.bought_amount)
            .set_sold(params.sold_currency.as_str(), params.sold_amount)
            .build()?;
        contract::validate(&record, self.identity.public_key())?;

        Ok(record)
    }

    // current session and its record, provided the session sits in `from`
    fn require(
        &self,
        from: ProtocolState,
        to: ProtocolState,
    ) -> Result<(WorkflowSession, TradeRecord), WorkflowError> {
        let illegal = |state| WorkflowError::IllegalTransition { from: state, to };
        let session = self.session.as_ref().ok_or(illegal(ProtocolState::Building))?;
        if session.state() != from {
            return Err(illegal(session.state()));
        }
        let record = session.record().cloned().ok_or(illegal(session.state()))?;

        Ok((session.clone(), record))
    }

    // best effort: the outcome is already decided locally
    fn notify(&self, record: &TradeRecord, message: Message) {
        if let Err(err) = self.transport.send(record.counterparty().id(), message) {
            warn!(trade_id = record.trade_id(), error = %err, "could not notify counterparty");
        }
    }

    // rejects the session; once the proposal is out the counterparty gets an Abort
    fn fail(&mut self, err: WorkflowError) -> WorkflowError {
        let Some(session) = self.session.as_ref().filter(|_| err.is_terminal()) else {
            return err;
        };
        let proposal_out = matches!(
            session.state(),
            ProtocolState::SentForCountersignature
                | ProtocolState::FullySigned
                | ProtocolState::Finalizing
        );
        let record = session.record().cloned();
        let rejected = session.reject(&err);
        warn!(trade_id = rejected.trade_id(), error = %err, "proposal rejected");
        self.session = Some(rejected);

        if proposal_out && let Some(record) = record {
            self.notify(
                &record,
                Message::Abort {
                    trade_id: record.trade_id().to_string(),
                    reason: err.to_string(),
                },
            );
        }
        err
    }
}
