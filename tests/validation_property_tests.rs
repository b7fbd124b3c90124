//! Property-based tests for trade records and the contract checks
//!
//! Random terms are pushed through the draft builder and the contract. The
//! properties cover what must hold for every input, not just the scenario
//! amounts.

use fx_agreement::contract;
use fx_agreement::error::ValidationKind;
use fx_agreement::party::{Identity, PartyId};
use fx_agreement::signature::{Signature, SignatureSet};
use fx_agreement::trade::{TradeDraft, TradeRecord};
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

/// ISO-like three letter codes, in either case
fn currency_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z]{3}"
}

fn amount_strategy() -> impl Strategy<Value = i64> {
    0i64..=1_000_000_000_000i64
}

fn negative_strategy() -> impl Strategy<Value = i64> {
    i64::MIN..0i64
}

fn trade_id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,16}"
}

fn desk(name: &str, seed: u8) -> Identity {
    Identity::from_signing_key(name, PartyId::from(name), [seed; 32])
}

fn alice() -> Identity {
    desk("Alice", 1)
}

fn bob() -> Identity {
    desk("Bob", 2)
}

fn build(trade_id: &str, bought: (&str, i64), sold: (&str, i64)) -> TradeRecord {
    TradeDraft::new()
        .set_trade_id(trade_id)
        .set_initiator(alice().party().clone())
        .set_counterparty(bob().party().clone())
        .set_bought(bought.0, bought.1)
        .set_sold(sold.0, sold.1)
        .build()
        .unwrap()
}

// PROPERTY TESTS
proptest! {
    /// Property: non-negative amounts with a proper initiator signature always validate
    #[test]
    fn prop_valid_terms_always_validate(
        trade_id in trade_id_strategy(),
        bought_ccy in currency_strategy(),
        sold_ccy in currency_strategy(),
        bought in amount_strategy(),
        sold in amount_strategy(),
    ) {
        let record = build(&trade_id, (&bought_ccy, bought), (&sold_ccy, sold));
        prop_assert!(contract::validate(&record, alice().public_key()).is_ok());
        prop_assert_eq!(record.bought_currency(), bought_ccy.to_uppercase());
    }

    /// Property: a negative amount on either leg is always NegativeAmount
    #[test]
    fn prop_negative_amount_is_always_refused(
        negative in negative_strategy(),
        other in amount_strategy(),
        on_bought_leg in any::<bool>(),
    ) {
        let (bought, sold) = if on_bought_leg { (negative, other) } else { (other, negative) };
        let record = build("12345", ("USD", bought), ("CNY", sold));

        let err = contract::validate(&record, alice().public_key()).unwrap_err();
        prop_assert_eq!(err.kind, ValidationKind::NegativeAmount);
    }

    /// Property: only the initiator's key can authorise a proposal
    #[test]
    fn prop_foreign_signer_is_unauthorized(seed in 3u8..=255u8, amount in amount_strategy()) {
        let record = build("12345", ("USD", amount), ("CNY", amount));
        let stranger = desk("Mallory", seed);

        let err = contract::validate(&record, stranger.public_key()).unwrap_err();
        prop_assert_eq!(err.kind, ValidationKind::UnauthorizedSigner);

        // the counterparty's key does not count either
        let err = contract::validate(&record, bob().public_key()).unwrap_err();
        prop_assert_eq!(err.kind, ValidationKind::UnauthorizedSigner);
    }

    /// Property: equal terms encode to identical bytes, so both sides sign the same thing
    #[test]
    fn prop_encoding_is_deterministic(
        trade_id in trade_id_strategy(),
        bought in amount_strategy(),
        sold in amount_strategy(),
    ) {
        let first = build(&trade_id, ("usd", bought), ("cny", sold));
        let second = build(&trade_id, ("USD", bought), ("CNY", sold));

        prop_assert_eq!(first.encode().unwrap(), second.encode().unwrap());
        prop_assert_eq!(first.hash().unwrap(), second.hash().unwrap());
    }

    /// Property: a signature never verifies against different terms
    #[test]
    fn prop_signatures_bind_the_terms(amount in amount_strategy(), delta in 1i64..1_000i64) {
        let (alice, bob) = (alice(), bob());
        let signed = build("12345", ("USD", amount), ("CNY", amount));
        let altered = build("12345", ("USD", amount), ("CNY", amount + delta));

        let signatures = SignatureSet::new()
            .with(alice.party().id(), Signature::sign(&alice, &signed).unwrap())
            .with(bob.party().id(), Signature::sign(&bob, &signed).unwrap());

        prop_assert!(signatures.verify_all(&signed).is_ok());
        prop_assert!(signatures.verify_all(&altered).is_err());
    }
}
