//! Counterparty side of the agreement workflow
//!
//! The responder never relies on the initiator's own checks: every proposal is
//! re-validated against the record invariants, the contract and the initiator's
//! signature before it is countersigned.
//!
//! A countersigned session stays live until the initiator reports the outcome.
//! If no `Finalized` or `Abort` arrives within the outcome timeout the session
//! is rejected locally, so it never sits half-finished.
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::config::WorkflowConfig;
use super::contract;
use super::error::{ErrorKind, WorkflowError};
use super::finality::FinalityReceipt;
use super::party::{Identity, PartyId};
use super::session::{ProtocolState, WorkflowSession};
use super::signature::{Signature, SignatureSet};
use super::trade::TradeRecord;
use super::transport::{Envelope, HandlerResult, Message, MessageHandler, Transport, dispatch_next};

/// Local business check run after the contract passes. `Err` is a refusal reason.
pub type AcceptancePolicy = Box<dyn Fn(&TradeRecord) -> Result<(), String> + Send>;

/// Settled trades remembered for replies and lookups before the oldest are dropped.
pub const DEFAULT_RETENTION: usize = 1024;

pub struct Responder<'a> {
    identity: &'a Identity,
    policy: Option<AcceptancePolicy>,
    outcome_timeout: Duration,
    retention: usize,
    // fully signed, waiting for the initiator's outcome until the deadline
    live: HashMap<String, (WorkflowSession, Instant)>,
    // final snapshots of destroyed sessions, oldest first in `settled_order`
    settled: HashMap<String, WorkflowSession>,
    settled_order: VecDeque<String>,
    receipts: HashMap<String, FinalityReceipt>,
    // record hash and reply per trade id, replayed on redelivery
    replies: HashMap<String, (String, Message)>,
}

impl<'a> Responder<'a> {
    pub fn new(identity: &'a Identity) -> Self {
        Self {
            identity,
            policy: None,
            outcome_timeout: WorkflowConfig::default().outcome_timeout(),
            retention: DEFAULT_RETENTION,
            live: HashMap::new(),
            settled: HashMap::new(),
            settled_order: VecDeque::new(),
            receipts: HashMap::new(),
            replies: HashMap::new(),
        }
    }

    pub fn with_policy<P>(mut self, policy: P) -> Self
    where
        P: Fn(&TradeRecord) -> Result<(), String> + Send + 'static,
    {
        self.policy = Some(Box::new(policy));
        self
    }

    /// How long a countersigned session waits for `Finalized` or `Abort`.
    pub fn with_outcome_timeout(mut self, timeout: Duration) -> Self {
        self.outcome_timeout = timeout;
        self
    }

    /// How many settled trades to remember. Older ones are forgotten, after
    /// which a redelivered proposal for them is treated as new.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Latest snapshot for `trade_id`, live or settled.
    pub fn session(&self, trade_id: &str) -> Option<&WorkflowSession> {
        self.live
            .get(trade_id)
            .map(|(session, _)| session)
            .or_else(|| self.settled.get(trade_id))
    }

    /// The finalizer's receipt, once the initiator reported one.
    pub fn receipt(&self, trade_id: &str) -> Option<&FinalityReceipt> {
        self.receipts.get(trade_id)
    }

    pub fn live_sessions(&self) -> usize {
        self.live.len()
    }

    /// Reject countersigned sessions whose outcome never arrived. Returns how
    /// many were expired.
    pub fn expire_overdue(&mut self) -> usize {
        let now = Instant::now();
        let overdue: Vec<String> = self
            .live
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(trade_id, _)| trade_id.clone())
            .collect();

        for trade_id in &overdue {
            if let Some((session, _)) = self.live.remove(trade_id) {
                let err = WorkflowError::timeout("finalization outcome", self.outcome_timeout);
                warn!(trade_id = %trade_id, error = %err, "no outcome from the initiator");
                self.settle(trade_id, session.reject(&err));
            }
        }
        overdue.len()
    }

    /// Keep handling messages until `trade_id` reaches a terminal state.
    ///
    /// Returns a transport timeout if nothing arrives for `timeout` while the
    /// trade is not live yet. A live trade is waited on until its outcome
    /// deadline at most.
    pub fn serve_until_settled(
        &mut self,
        transport: &dyn Transport,
        trade_id: &str,
        timeout: Duration,
    ) -> Result<WorkflowSession, WorkflowError> {
        loop {
            self.expire_overdue();
            if let Some(done) = self.settled.get(trade_id) {
                return Ok(done.clone());
            }
            let wait = match self.live.get(trade_id) {
                Some((_, deadline)) => deadline.saturating_duration_since(Instant::now()).min(timeout),
                None => timeout,
            };
            match dispatch_next(transport, self, wait) {
                Ok(()) => {}
                Err(err)
                    if err.kind() == ErrorKind::TransportTimeout && self.live.contains_key(trade_id) => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn on_proposal(
        &mut self,
        from: &PartyId,
        record: TradeRecord,
        signature: Signature,
    ) -> HandlerResult {
        let trade_id = record.trade_id().to_string();
        let hash = record.hash()?;

        if let Some((seen, reply)) = self.replies.get(&trade_id) {
            if *seen == hash {
                debug!(trade_id = %trade_id, "duplicate proposal, replaying reply");
                return Ok(Some(reply.clone()));
            }
            warn!(trade_id = %trade_id, "trade id reused by a different proposal");
            return Ok(Some(Message::Refusal {
                trade_id,
                reason: "trade id is already used by another proposal".into(),
            }));
        }

        info!(trade_id = %trade_id, initiator = %record.initiator(), "validating proposal");
        let session = WorkflowSession::respond(record.clone());

        let reply = match self.countersign(from, &record, signature) {
            Ok(countersignature) => {
                let signatures = SignatureSet::new()
                    .with(record.initiator().id(), signature)
                    .with(self.identity.party().id(), countersignature);
                let signed = session
                    .with_signatures(signatures)
                    .advance(ProtocolState::FullySigned)?;
                let deadline = Instant::now() + self.outcome_timeout;
                self.live.insert(trade_id.clone(), (signed, deadline));
                info!(trade_id = %trade_id, "proposal countersigned");

                Message::Countersignature {
                    trade_id: trade_id.clone(),
                    signature: countersignature,
                }
            }
            Err(err) => {
                // every refusal is recorded as CounterpartyRejected, the
                // underlying check stays in the message
                let reason = match err {
                    WorkflowError::CounterpartyRejected(reason) => reason,
                    other => other.to_string(),
                };
                warn!(trade_id = %trade_id, reason = %reason, "refusing proposal");
                let refusal = WorkflowError::CounterpartyRejected(reason.clone());
                self.settle(&trade_id, session.reject(&refusal));

                Message::Refusal {
                    trade_id: trade_id.clone(),
                    reason,
                }
            }
        };
        self.replies.insert(trade_id, (hash, reply.clone()));

        Ok(Some(reply))
    }

    // independent checks, then our own signature
    fn countersign(
        &self,
        from: &PartyId,
        record: &TradeRecord,
        signature: Signature,
    ) -> Result<Signature, WorkflowError> {
        let me = self.identity.party();
        if record.counterparty() != me {
            return Err(WorkflowError::CounterpartyRejected(format!(
                "proposal names {} as counterparty",
                record.counterparty()
            )));
        }
        if from != record.initiator().id() {
            return Err(WorkflowError::CounterpartyRejected(format!(
                "proposal was sent by {from}, not by its initiator"
            )));
        }
        record.check_invariants()?;
        contract::validate(record, signature.signer())?;
        signature.verify(record.initiator(), record)?;
        if let Some(policy) = &self.policy {
            policy(record).map_err(WorkflowError::CounterpartyRejected)?;
        }

        Signature::sign(self.identity, record)
    }

    fn close(&mut self, from: &PartyId, trade_id: &str, outcome: Result<FinalityReceipt, WorkflowError>) {
        let Some((session, _)) = self.live.get(trade_id) else {
            debug!(trade_id, "no live session, ignoring");
            return;
        };
        let Some(record) = session.record() else {
            return;
        };
        if from != record.initiator().id() {
            warn!(trade_id, from = %from, "outcome from a party other than the initiator, ignoring");
            return;
        }

        let closed = match &outcome {
            Ok(receipt) => {
                let matches = receipt.trade_id == trade_id
                    && record.hash().is_ok_and(|hash| hash == receipt.record_hash);
                if !matches {
                    warn!(trade_id, hash = %receipt.record_hash, "receipt does not match the countersigned record, ignoring");
                    return;
                }
                session.advance(ProtocolState::Finalized)
            }
            Err(err) => Ok(session.reject(err)),
        };
        match closed {
            Ok(closed) => {
                info!(trade_id, state = ?closed.state(), "session closed");
                self.live.remove(trade_id);
                if let Ok(receipt) = outcome {
                    self.receipts.insert(trade_id.to_string(), receipt);
                }
                self.settle(trade_id, closed);
            }
            Err(err) => warn!(trade_id, error = %err, "could not close session"),
        }
    }

    // keep the final snapshot, forgetting the oldest beyond the retention limit
    fn settle(&mut self, trade_id: &str, session: WorkflowSession) {
        self.settled.insert(trade_id.to_string(), session);
        self.settled_order.push_back(trade_id.to_string());

        while self.settled_order.len() > self.retention {
            let Some(oldest) = self.settled_order.pop_front() else {
                break;
            };
            self.settled.remove(&oldest);
            self.receipts.remove(&oldest);
            self.replies.remove(&oldest);
        }
    }
}

impl MessageHandler for Responder<'_> {
    fn on_receive(&mut self, envelope: Envelope) -> HandlerResult {
        let from = envelope.from;
        match envelope.message {
            Message::Proposal { record, signature } => self.on_proposal(&from, record, signature),
            Message::Finalized { trade_id, receipt } => {
                self.close(&from, &trade_id, Ok(receipt));
                Ok(None)
            }
            Message::Abort { trade_id, reason } => {
                self.close(&from, &trade_id, Err(WorkflowError::Cancelled(reason)));
                Ok(None)
            }
            other @ (Message::Countersignature { .. } | Message::Refusal { .. }) => {
                warn!(from = %from, trade_id = other.trade_id(), "unexpected message for a responder");
                Ok(None)
            }
        }
    }
}
