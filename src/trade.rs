//! Core trade record and its canonical encoding
use super::error::TradeError;
use super::party::Party;
use chrono::{DateTime, TimeZone, Utc};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TradeStatus {
    #[n(0)]
    Proposed,
    #[n(1)]
    Signed,
    #[n(2)]
    Finalized,
    #[n(3)]
    Rejected,
}

/// One proposed FX trade. Immutable once built; status changes produce a new record.
///
/// Signatures are taken over [`TradeRecord::encode`], so the field indices below
/// are part of the signing payload and must never be renumbered.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct TradeRecord {
    #[n(0)]
    trade_id: String,
    #[n(1)]
    initiator: Party,
    #[n(2)]
    counterparty: Party,
    #[n(3)]
    status: TradeStatus,
    #[n(4)]
    bought_currency: String,
    #[n(5)]
    bought_amount: i64, // signed so the contract can reject negatives
    #[n(6)]
    sold_currency: String,
    #[n(7)]
    sold_amount: i64,
}

// Used for constructing drafts
#[derive(Debug, Default, Clone)]
pub struct TradeDraft {
    trade_id: Option<String>,
    initiator: Option<Party>,
    counterparty: Option<Party>,
    status: Option<TradeStatus>,
    bought_currency: Option<String>,
    bought_amount: i64,
    sold_currency: Option<String>,
    sold_amount: i64,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeDraft {
    /// Construct a new builder object, this becomes the basis for a proposal
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_trade_id(mut self, trade_id: impl Into<String>) -> Self {
        self.trade_id = Some(trade_id.into());
        self
    }
    pub fn set_initiator(mut self, party: Party) -> Self {
        self.initiator = Some(party);
        self
    }
    pub fn set_counterparty(mut self, party: Party) -> Self {
        self.counterparty = Some(party);
        self
    }
    pub fn set_status(mut self, status: TradeStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_bought(mut self, currency: impl Into<String>, amount: i64) -> Self {
        self.bought_currency = Some(currency.into());
        self.bought_amount = amount;
        self
    }
    pub fn set_sold(mut self, currency: impl Into<String>, amount: i64) -> Self {
        self.sold_currency = Some(currency.into());
        self.sold_amount = amount;
        self
    }
    /// Checks the structural invariants and freezes the draft.
    ///
    /// Amount signs are not checked here; the contract reports them as
    /// `NegativeAmount`.
    pub fn build(self) -> Result<TradeRecord, TradeError> {
        let record = TradeRecord {
            trade_id: self.trade_id.ok_or(TradeError::MissingTradeId)?,
            initiator: self.initiator.ok_or(TradeError::MissingParty("initiator"))?,
            counterparty: self
                .counterparty
                .ok_or(TradeError::MissingParty("counterparty"))?,
            status: self.status.unwrap_or(TradeStatus::Proposed),
            bought_currency: normalise_currency(self.bought_currency.as_deref()),
            bought_amount: self.bought_amount,
            sold_currency: normalise_currency(self.sold_currency.as_deref()),
            sold_amount: self.sold_amount,
        };
        record.check_invariants()?;

        Ok(record)
    }
}

fn normalise_currency(code: Option<&str>) -> String {
    code.map(|c| c.trim().to_ascii_uppercase()).unwrap_or_default()
}

impl TradeRecord {
    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }
    pub fn initiator(&self) -> &Party {
        &self.initiator
    }
    pub fn counterparty(&self) -> &Party {
        &self.counterparty
    }
    pub fn participants(&self) -> [&Party; 2] {
        [&self.initiator, &self.counterparty]
    }
    pub fn status(&self) -> TradeStatus {
        self.status
    }
    pub fn bought_currency(&self) -> &str {
        &self.bought_currency
    }
    pub fn bought_amount(&self) -> i64 {
        self.bought_amount
    }
    pub fn sold_currency(&self) -> &str {
        &self.sold_currency
    }
    pub fn sold_amount(&self) -> i64 {
        self.sold_amount
    }
    /// The structural rules every record must satisfy: a non-blank trade id,
    /// two distinct parties and normalised, non-empty currency codes.
    ///
    /// Records built through [`TradeDraft`] always pass. Records decoded from a
    /// peer are checked again before anyone signs them.
    pub fn check_invariants(&self) -> Result<(), TradeError> {
        if self.trade_id.trim().is_empty() {
            return Err(TradeError::MissingTradeId);
        }
        let (initiator, counterparty) = (&self.initiator, &self.counterparty);
        if initiator.id() == counterparty.id() || initiator.owning_key() == counterparty.owning_key()
        {
            return Err(TradeError::SameParty(initiator.id().to_string()));
        }
        for (code, leg) in [(&self.bought_currency, "bought"), (&self.sold_currency, "sold")] {
            if code.is_empty() || *code != normalise_currency(Some(code.as_str())) {
                return Err(TradeError::InvalidCurrency(leg));
            }
        }
        Ok(())
    }
    /// A copy of this record carrying a different status.
    pub fn with_status(&self, status: TradeStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
    /// Canonical CBOR encoding. Equal records always encode to identical bytes.
    pub fn encode(&self) -> Result<Vec<u8>, TradeError> {
        minicbor::to_vec(self).map_err(|e| TradeError::Encoding(e.to_string()))
    }
    /// Parses a canonical encoding and re-checks the record invariants.
    pub fn decode(bytes: &[u8]) -> Result<Self, TradeError> {
        let record: Self =
            minicbor::decode(bytes).map_err(|e| TradeError::Decoding(e.to_string()))?;
        record.check_invariants()?;
        Ok(record)
    }
    // hex sha256 of the canonical encoding
    pub fn hash(&self) -> Result<String, TradeError> {
        let contents = self.encode()?;
        Ok(sha256::digest(contents.as_slice()))
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}
// nanoseconds since the epoch
impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        let nanos = self.0.timestamp_nanos_opt().ok_or_else(|| {
            minicbor::encode::Error::message("timestamp is outside the nanosecond range")
        })?;
        e.i64(nanos)?;
        Ok(())
    }
}
impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        d.i64().map(DateTime::from_timestamp_nanos).map(TimeStamp)
    }
}

#[cfg(test)]
impl TradeRecord {
    /// A record that skipped the draft, as a misbehaving peer could send it.
    pub(crate) fn unchecked(
        trade_id: &str,
        initiator: Party,
        counterparty: Party,
        bought: (&str, i64),
        sold: (&str, i64),
    ) -> Self {
        Self {
            trade_id: trade_id.to_string(),
            initiator,
            counterparty,
            status: TradeStatus::Proposed,
            bought_currency: bought.0.to_string(),
            bought_amount: bought.1,
            sold_currency: sold.0.to_string(),
            sold_amount: sold.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party::Identity;

    fn parties() -> (Party, Party) {
        let alice = Identity::generate("Alice").unwrap();
        let bob = Identity::generate("Bob").unwrap();
        (alice.party().clone(), bob.party().clone())
    }

    fn draft(initiator: Party, counterparty: Party) -> TradeDraft {
        TradeDraft::new()
            .set_trade_id("12345")
            .set_initiator(initiator)
            .set_counterparty(counterparty)
            .set_bought("USD", 100)
            .set_sold("CNY", 680)
    }

    #[test]
    fn blank_fields_fail_the_invariants() {
        let (alice, bob) = parties();
        let blank = TradeRecord::unchecked("", alice.clone(), bob.clone(), ("", 100), ("CNY", 680));
        assert_eq!(blank.check_invariants(), Err(TradeError::MissingTradeId));

        let lower = TradeRecord::unchecked("12345", alice.clone(), bob, ("usd", 100), ("CNY", 680));
        assert_eq!(lower.check_invariants(), Err(TradeError::InvalidCurrency("bought")));

        let same = TradeRecord::unchecked("12345", alice.clone(), alice, ("USD", 100), ("CNY", 680));
        assert!(matches!(same.check_invariants(), Err(TradeError::SameParty(_))));
    }

    #[test]
    fn decode_rechecks_invariants() {
        let (alice, bob) = parties();
        let blank = TradeRecord::unchecked("", alice, bob, ("", 100), ("", 680));
        let bytes = blank.encode().unwrap();

        assert_eq!(TradeRecord::decode(&bytes), Err(TradeError::MissingTradeId));
    }

    #[test]
    fn draft_defaults_to_proposed() {
        let (alice, bob) = parties();
        let record = draft(alice.clone(), bob.clone()).build().unwrap();

        assert_eq!(record.status(), TradeStatus::Proposed);
        assert_eq!(record.initiator(), &alice);
        assert_eq!(record.counterparty(), &bob);
        assert_eq!(record.participants().len(), 2);
    }

    #[test]
    fn currencies_are_normalised() {
        let (alice, bob) = parties();
        let record = draft(alice, bob).set_bought(" usd ", 100).build().unwrap();

        assert_eq!(record.bought_currency(), "USD");
    }

    #[test]
    fn rejects_same_party_on_both_sides() {
        let (alice, _) = parties();
        let err = draft(alice.clone(), alice).build().unwrap_err();

        assert!(matches!(err, TradeError::SameParty(_)));
    }

    #[test]
    fn rejects_empty_currency() {
        let (alice, bob) = parties();
        let err = draft(alice, bob).set_sold("  ", 680).build().unwrap_err();

        assert_eq!(err, TradeError::InvalidCurrency("sold"));
    }

    #[test]
    fn rejects_missing_trade_id() {
        let (alice, bob) = parties();
        let err = draft(alice, bob).set_trade_id("").build().unwrap_err();

        assert_eq!(err, TradeError::MissingTradeId);
    }

    #[test]
    fn negative_amounts_survive_the_draft() {
        let (alice, bob) = parties();
        let record = draft(alice, bob).set_bought("USD", -5).build().unwrap();

        assert_eq!(record.bought_amount(), -5);
    }

    #[test]
    fn with_status_leaves_original_untouched() {
        let (alice, bob) = parties();
        let record = draft(alice, bob).build().unwrap();
        let signed = record.with_status(TradeStatus::Signed);

        assert_eq!(record.status(), TradeStatus::Proposed);
        assert_eq!(signed.status(), TradeStatus::Signed);
        assert_ne!(record.hash().unwrap(), signed.hash().unwrap());
    }

    #[test]
    fn encode_decode_preserves_record() {
        let (alice, bob) = parties();
        let record = draft(alice, bob).build().unwrap();

        let bytes = record.encode().unwrap();
        assert_eq!(TradeRecord::decode(&bytes).unwrap(), record);
    }
}
