//! Party signatures over the canonical trade encoding
use std::collections::BTreeMap;
use std::fmt;

use ed25519_dalek::{Signature as Ed25519Signature, Verifier};

use super::error::WorkflowError;
use super::party::{Identity, Party, PartyId, PublicKey};
use super::trade::TradeRecord;

/// An Ed25519 signature together with the key that produced it.
#[derive(minicbor::Encode, minicbor::Decode, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    #[n(0)]
    signer: PublicKey,
    #[n(1)]
    bytes: SignatureBytes,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct SignatureBytes([u8; 64]);

/// Signatures collected for one record, keyed by party id.
///
/// Adding an entry yields a new set; a set is never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureSet {
    entries: BTreeMap<PartyId, Signature>,
}

impl Signature {
    /// Sign the canonical encoding of `record`.
    pub fn sign(identity: &Identity, record: &TradeRecord) -> Result<Self, WorkflowError> {
        let payload = record.encode()?;

        Ok(Self {
            signer: *identity.public_key(),
            bytes: SignatureBytes(identity.sign(&payload)),
        })
    }
    pub fn from_parts(signer: PublicKey, bytes: [u8; 64]) -> Self {
        Self {
            signer,
            bytes: SignatureBytes(bytes),
        }
    }
    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }
    pub fn to_bytes(&self) -> [u8; 64] {
        self.bytes.0
    }
    /// Checks the signature against `party`'s owning key and the record's encoding.
    pub fn verify(&self, party: &Party, record: &TradeRecord) -> Result<(), WorkflowError> {
        let invalid = |reason: String| WorkflowError::InvalidSignature {
            party: party.id().to_string(),
            reason,
        };
        if &self.signer != party.owning_key() {
            return Err(invalid(format!(
                "signed by {} instead of the party's key {}",
                self.signer,
                party.owning_key()
            )));
        }
        let key = self
            .signer
            .to_verifying_key()
            .map_err(|e| invalid(e.to_string()))?;
        let payload = record.encode()?;

        key.verify(&payload, &Ed25519Signature::from_bytes(&self.bytes.0))
            .map_err(|e| invalid(e.to_string()))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("signer", &self.signer.to_string())
            .field("bytes", &hex::encode(self.bytes.0))
            .finish()
    }
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(&self, party: &PartyId, signature: Signature) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(party.clone(), signature);
        Self { entries }
    }
    pub fn get(&self, party: &PartyId) -> Option<&Signature> {
        self.entries.get(party)
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    /// Verify the signature held for `party`.
    pub fn verify_party(&self, party: &Party, record: &TradeRecord) -> Result<(), WorkflowError> {
        self.get(party.id())
            .ok_or_else(|| WorkflowError::InvalidSignature {
                party: party.id().to_string(),
                reason: "no signature present".into(),
            })?
            .verify(party, record)
    }
    /// Both participants present and both signatures valid.
    pub fn verify_all(&self, record: &TradeRecord) -> Result<(), WorkflowError> {
        for party in record.participants() {
            self.verify_party(party, record)?;
        }
        Ok(())
    }
    pub fn is_fully_signed(&self, record: &TradeRecord) -> bool {
        self.verify_all(record).is_ok()
    }
}

impl<C> minicbor::Encode<C> for SignatureBytes {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for SignatureBytes {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 64] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("signature must be 64 bytes"))?;

        Ok(SignatureBytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::TradeDraft;

    fn setup() -> (Identity, Identity, TradeRecord) {
        let alice = Identity::generate("Alice").unwrap();
        let bob = Identity::generate("Bob").unwrap();
        let record = TradeDraft::new()
            .set_trade_id("12345")
            .set_initiator(alice.party().clone())
            .set_counterparty(bob.party().clone())
            .set_bought("USD", 100)
            .set_sold("CNY", 680)
            .build()
            .unwrap();
        (alice, bob, record)
    }

    #[test]
    fn sign_and_verify() {
        let (alice, _, record) = setup();
        let signature = Signature::sign(&alice, &record).unwrap();

        assert!(signature.verify(alice.party(), &record).is_ok());
    }

    #[test]
    fn altered_record_fails() {
        let (alice, _, record) = setup();
        let signature = Signature::sign(&alice, &record).unwrap();
        let altered = record.with_status(crate::trade::TradeStatus::Finalized);

        assert!(matches!(
            signature.verify(alice.party(), &altered),
            Err(WorkflowError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn signature_by_other_key_fails() {
        let (alice, bob, record) = setup();
        let signature = Signature::sign(&bob, &record).unwrap();

        assert!(signature.verify(alice.party(), &record).is_err());
    }

    #[test]
    fn forged_bytes_fail() {
        let (alice, _, record) = setup();
        let forged = Signature::from_parts(*alice.public_key(), [1u8; 64]);

        assert!(forged.verify(alice.party(), &record).is_err());
    }

    #[test]
    fn set_is_fully_signed_only_with_both_parties() {
        let (alice, bob, record) = setup();
        let one = SignatureSet::new().with(
            alice.party().id(),
            Signature::sign(&alice, &record).unwrap(),
        );
        assert!(!one.is_fully_signed(&record));

        let both = one.with(bob.party().id(), Signature::sign(&bob, &record).unwrap());
        assert!(both.is_fully_signed(&record));
        assert_eq!(one.len(), 1);
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn signature_encoding() {
        let (alice, _, record) = setup();
        let original = Signature::sign(&alice, &record).unwrap();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Signature = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}
