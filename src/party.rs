//! Party identities, signing keys and the identity resolution collaborator
use std::collections::HashMap;
use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use super::error::WorkflowError;
use super::utils::{PARTY_HRP, new_uuid_to_bech32};

/// Stable identifier of a party, a bech32 encoded uuid7.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartyId(String);

/// Ed25519 verifying key bytes, the "owning key" of a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Party {
    #[n(0)]
    name: String,
    #[n(1)]
    id: PartyId,
    #[n(2)]
    owning_key: PublicKey,
}

/// A party together with its private key. Never leaves the local node.
pub struct Identity {
    party: Party,
    signing_key: SigningKey,
}

/// Resolves a human readable party name to its identity on the network.
pub trait IdentityResolver {
    fn resolve(&self, name: &str) -> Result<Party, WorkflowError>;
}

/// In-memory network map, keyed by party name.
#[derive(Debug, Default, Clone)]
pub struct Directory {
    parties: HashMap<String, Party>,
}

impl PartyId {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self(new_uuid_to_bech32(PARTY_HRP)?))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PartyId {
    fn from(value: &str) -> Self {
        PartyId(value.to_string())
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, ed25519_dalek::SignatureError> {
        VerifyingKey::from_bytes(&self.0)
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Party {
    pub fn new(name: impl Into<String>, id: PartyId, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            id,
            owning_key,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn id(&self) -> &PartyId {
        &self.id
    }
    pub fn owning_key(&self) -> &PublicKey {
        &self.owning_key
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl Identity {
    /// Create a new party with a fresh id and key pair.
    pub fn generate(name: &str) -> anyhow::Result<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let party = Party::new(
            name,
            PartyId::new()?,
            signing_key.verifying_key().into(),
        );

        Ok(Self { party, signing_key })
    }
    pub fn from_signing_key(party_name: &str, id: PartyId, secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let party = Party::new(party_name, id, signing_key.verifying_key().into());

        Self { party, signing_key }
    }
    pub fn party(&self) -> &Party {
        &self.party
    }
    pub fn public_key(&self) -> &PublicKey {
        self.party.owning_key()
    }
    pub(crate) fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // keep the signing key out of logs
        f.debug_struct("Identity").field("party", &self.party).finish()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register(&mut self, party: Party) {
        self.parties.insert(party.name().to_string(), party);
    }
    pub fn with(mut self, party: Party) -> Self {
        self.register(party);
        self
    }
}

impl IdentityResolver for Directory {
    fn resolve(&self, name: &str) -> Result<Party, WorkflowError> {
        self.parties
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownParty(name.to_string()))
    }
}

impl<C> minicbor::Encode<C> for PartyId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for PartyId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(PartyId(d.str()?.to_string()))
    }
}

impl<C> minicbor::Encode<C> for PublicKey {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for PublicKey {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 32] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("public key must be 32 bytes"))?;

        Ok(PublicKey(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_encoding() {
        let identity = Identity::generate("Alice").unwrap();
        let original = *identity.public_key();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: PublicKey = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
        assert!(decode.to_verifying_key().is_ok());
    }

    #[test]
    fn party_encoding() {
        let identity = Identity::generate("Bob").unwrap();
        let original = identity.party().clone();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: Party = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn directory_resolves_registered_names() {
        let alice = Identity::generate("Alice").unwrap();
        let directory = Directory::new().with(alice.party().clone());

        assert_eq!(&directory.resolve("Alice").unwrap(), alice.party());
        assert!(matches!(
            directory.resolve("Carol"),
            Err(WorkflowError::UnknownParty(name)) if name == "Carol"
        ));
    }

    #[test]
    fn signing_key_is_deterministic() {
        let id = PartyId::from("party1test");
        let a = Identity::from_signing_key("Alice", id.clone(), [7u8; 32]);
        let b = Identity::from_signing_key("Alice", id, [7u8; 32]);

        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"payload"), b.sign(b"payload"));
    }
}
