//! Message exchange between the two parties of a negotiation
//!
//! The workflow only needs reliable, ordered delivery of at most one in-flight
//! proposal per trade id. Retries and wire formats belong to the transport; the
//! in-process [`ChannelNetwork`] below carries CBOR frames over crossbeam
//! channels and is what the tests and the demo run on.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::error::{TransportError, WorkflowError};
use super::finality::FinalityReceipt;
use super::party::PartyId;
use super::signature::Signature;
use super::trade::TradeRecord;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Initiator → counterparty: the proposal and the initiator's signature.
    #[n(0)]
    Proposal {
        #[n(0)]
        record: TradeRecord,
        #[n(1)]
        signature: Signature,
    },
    /// Counterparty → initiator: signature over the same encoding.
    #[n(1)]
    Countersignature {
        #[n(0)]
        trade_id: String,
        #[n(1)]
        signature: Signature,
    },
    /// Counterparty → initiator: the proposal failed independent checks.
    #[n(2)]
    Refusal {
        #[n(0)]
        trade_id: String,
        #[n(1)]
        reason: String,
    },
    /// Initiator → counterparty: the finalizer committed the trade.
    #[n(3)]
    Finalized {
        #[n(0)]
        trade_id: String,
        #[n(1)]
        receipt: FinalityReceipt,
    },
    /// Initiator → counterparty: the negotiation is over without a trade.
    #[n(4)]
    Abort {
        #[n(0)]
        trade_id: String,
        #[n(1)]
        reason: String,
    },
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    #[n(0)]
    pub from: PartyId,
    #[n(1)]
    pub message: Message,
}

/// Delivery receipt; `frame_hash` is the sha256 of the frame as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub frame_hash: String,
}

pub trait Transport {
    fn send(&self, to: &PartyId, message: Message) -> Result<Ack, TransportError>;
    /// Blocks until a message arrives or `timeout` passes.
    fn receive(&self, timeout: Duration) -> Result<Envelope, TransportError>;
}

/// What a receive handler wants sent back to the sender, if anything.
pub type HandlerResult = Result<Option<Message>, WorkflowError>;

/// Listener registered against a transport.
pub trait MessageHandler {
    fn on_receive(&mut self, envelope: Envelope) -> HandlerResult;
}

impl Message {
    pub fn trade_id(&self) -> &str {
        match self {
            Message::Proposal { record, .. } => record.trade_id(),
            Message::Countersignature { trade_id, .. }
            | Message::Refusal { trade_id, .. }
            | Message::Finalized { trade_id, .. }
            | Message::Abort { trade_id, .. } => trade_id.as_str(),
        }
    }
    fn label(&self) -> &'static str {
        match self {
            Message::Proposal { .. } => "proposal",
            Message::Countersignature { .. } => "countersignature",
            Message::Refusal { .. } => "refusal",
            Message::Finalized { .. } => "finalized",
            Message::Abort { .. } => "abort",
        }
    }
}

/// Receive one message, hand it to `handler` and send any reply back.
pub fn dispatch_next<T, H>(transport: &T, handler: &mut H, timeout: Duration) -> Result<(), WorkflowError>
where
    T: Transport + ?Sized,
    H: MessageHandler + ?Sized,
{
    let envelope = transport.receive(timeout)?;
    let reply_to = envelope.from.clone();

    if let Some(reply) = handler.on_receive(envelope)? {
        transport.send(&reply_to, reply)?;
    }
    Ok(())
}

/// Routing table shared by every endpoint of an in-process network.
#[derive(Debug, Clone, Default)]
pub struct ChannelNetwork {
    routes: Arc<RwLock<HashMap<PartyId, Sender<Vec<u8>>>>>,
}

#[derive(Debug)]
pub struct ChannelEndpoint {
    party: PartyId,
    inbox: Receiver<Vec<u8>>,
    routes: Arc<RwLock<HashMap<PartyId, Sender<Vec<u8>>>>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }
    /// Register `party` and return its endpoint. Re-registering replaces the old inbox.
    pub fn endpoint(&self, party: &PartyId) -> ChannelEndpoint {
        let (tx, rx) = unbounded();
        self.routes.write().insert(party.clone(), tx);

        ChannelEndpoint {
            party: party.clone(),
            inbox: rx,
            routes: Arc::clone(&self.routes),
        }
    }
    /// Drops the route to `party`; later sends to it fail with `UnknownPeer`.
    pub fn disconnect(&self, party: &PartyId) {
        self.routes.write().remove(party);
    }
}

impl ChannelEndpoint {
    pub fn party(&self) -> &PartyId {
        &self.party
    }
    /// Push an already encoded frame, bypassing message encoding.
    pub fn send_frame(&self, to: &PartyId, frame: Vec<u8>) -> Result<Ack, TransportError> {
        let frame_hash = sha256::digest(frame.as_slice());
        let routes = self.routes.read();
        let route = routes
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.to_string()))?;
        route
            .send(frame)
            .map_err(|_| TransportError::Disconnected(to.to_string()))?;

        Ok(Ack { frame_hash })
    }
}

impl Transport for ChannelEndpoint {
    fn send(&self, to: &PartyId, message: Message) -> Result<Ack, TransportError> {
        debug!(from = %self.party, to = %to, trade_id = message.trade_id(), kind = message.label(), "sending");
        let envelope = Envelope {
            from: self.party.clone(),
            message,
        };
        let frame = minicbor::to_vec(&envelope).map_err(|e| TransportError::Malformed(e.to_string()))?;

        self.send_frame(to, frame)
    }

    fn receive(&self, timeout: Duration) -> Result<Envelope, TransportError> {
        let frame = match self.inbox.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TransportError::Disconnected(self.party.to_string()));
            }
        };
        let envelope: Envelope =
            minicbor::decode(&frame).map_err(|e| TransportError::Malformed(e.to_string()))?;
        trace!(to = %self.party, from = %envelope.from, kind = envelope.message.label(), "received");

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abort(trade_id: &str) -> Message {
        Message::Abort {
            trade_id: trade_id.into(),
            reason: "test".into(),
        }
    }

    #[test]
    fn delivers_in_order() {
        let network = ChannelNetwork::new();
        let alice = network.endpoint(&PartyId::from("alice"));
        let bob = network.endpoint(&PartyId::from("bob"));

        alice.send(bob.party(), abort("1")).unwrap();
        alice.send(bob.party(), abort("2")).unwrap();

        let first = bob.receive(Duration::from_millis(100)).unwrap();
        let second = bob.receive(Duration::from_millis(100)).unwrap();
        assert_eq!(first.from, PartyId::from("alice"));
        assert_eq!(first.message.trade_id(), "1");
        assert_eq!(second.message.trade_id(), "2");
    }

    #[test]
    fn ack_hash_is_stable_for_identical_frames() {
        let network = ChannelNetwork::new();
        let alice = network.endpoint(&PartyId::from("alice"));
        let bob = network.endpoint(&PartyId::from("bob"));

        let a = alice.send(bob.party(), abort("1")).unwrap();
        let b = alice.send(bob.party(), abort("1")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn receive_times_out() {
        let network = ChannelNetwork::new();
        let alice = network.endpoint(&PartyId::from("alice"));

        let err = alice.receive(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_millis(10)));
    }

    #[test]
    fn unknown_peer_is_an_error() {
        let network = ChannelNetwork::new();
        let alice = network.endpoint(&PartyId::from("alice"));

        let err = alice.send(&PartyId::from("carol"), abort("1")).unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[test]
    fn garbage_frames_are_malformed() {
        let network = ChannelNetwork::new();
        let alice = network.endpoint(&PartyId::from("alice"));
        let bob = network.endpoint(&PartyId::from("bob"));

        alice.send_frame(bob.party(), vec![0xff, 0x00]).unwrap();
        assert!(matches!(
            bob.receive(Duration::from_millis(100)),
            Err(TransportError::Malformed(_))
        ));
    }

    struct Echo;

    impl MessageHandler for Echo {
        fn on_receive(&mut self, envelope: Envelope) -> HandlerResult {
            Ok(Some(envelope.message))
        }
    }

    #[test]
    fn dispatch_replies_to_sender() {
        let network = ChannelNetwork::new();
        let alice = network.endpoint(&PartyId::from("alice"));
        let bob = network.endpoint(&PartyId::from("bob"));

        alice.send(bob.party(), abort("7")).unwrap();
        dispatch_next(&bob, &mut Echo, Duration::from_millis(100)).unwrap();

        let reply = alice.receive(Duration::from_millis(100)).unwrap();
        assert_eq!(reply.from, PartyId::from("bob"));
        assert_eq!(reply.message, abort("7"));
    }
}
