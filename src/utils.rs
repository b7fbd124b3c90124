//! Utility functions for identifiers

use bech32::Bech32m;
use uuid7::uuid7;

pub const PARTY_HRP: &str = "party";
pub const TRADE_HRP: &str = "trade";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// A fresh trade id for callers that don't bring their own reference.
pub fn new_trade_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(TRADE_HRP)
}
