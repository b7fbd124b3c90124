//! Alice proposes USD 100 against CNY 680 to Bob, Bob countersigns and the
//! in-memory notary commits the trade.
//!
//! Run with `RUST_LOG=debug` to see every message on the wire.

use std::thread;

use anyhow::Context;
use fx_agreement::{
    config::WorkflowConfig,
    finality::InMemoryNotary,
    initiator::{Initiator, ProposalParams},
    party::{Directory, Identity},
    responder::Responder,
    transport::ChannelNetwork,
    utils::new_trade_id,
};
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = WorkflowConfig::load()?;
    let alice = Identity::generate("Alice")?;
    let bob = Identity::generate("Bob")?;
    let directory = Directory::new()
        .with(alice.party().clone())
        .with(bob.party().clone());

    let network = ChannelNetwork::new();
    let alice_net = network.endpoint(alice.party().id());
    let bob_net = network.endpoint(bob.party().id());
    let notary = InMemoryNotary::new();

    let trade_id = new_trade_id()?;
    let params = ProposalParams::new(trade_id.as_str(), "Bob")
        .bought("USD", 100)
        .sold("CNY", 680);

    let (agreement, bob_session) = thread::scope(|s| {
        let bob_side = s.spawn(|| {
            Responder::new(&bob)
                .with_outcome_timeout(config.outcome_timeout())
                .serve_until_settled(&bob_net, &trade_id, config.response_timeout())
        });
        let mut initiator = Initiator::new(&alice, &directory, &alice_net, &notary, config.clone());
        let agreement = initiator.run(params);

        (agreement, bob_side.join())
    });
    let agreement = agreement.context("proposal failed")?;
    let bob_session = bob_session
        .map_err(|_| anyhow::anyhow!("responder thread panicked"))?
        .context("counterparty failed")?;

    let record = &agreement.record;
    info!(
        trade_id = record.trade_id(),
        status = ?record.status(),
        hash = %agreement.receipt.record_hash,
        "agreement committed"
    );
    println!(
        "{} buys {} {} from {} for {} {}",
        record.initiator(),
        record.bought_amount(),
        record.bought_currency(),
        record.counterparty(),
        record.sold_amount(),
        record.sold_currency()
    );
    println!("counterparty session: {:?}", bob_session.state());
    for (party, label) in [(record.initiator(), "initiator"), (record.counterparty(), "counterparty")] {
        if let Some(signature) = agreement.signatures.get(party.id()) {
            println!("{label} signature: {signature:?}");
        }
    }

    Ok(())
}
