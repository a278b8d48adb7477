use crate::*;
use sha2::{Digest, Sha256};

/// One race's wire entry: the encrypted selections, their validity proof
/// and the race's selection bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRace {
    pub selection: RaceSelection,
    pub proof: RaceProof,
    pub bounds: Bounds,
}

/// The wire ballot: everything the tallier receives for one voting
/// session. Assembled once, immutable afterwards, consumed exactly once by
/// the tallier (on cast) or disclosed-and-discarded (on challenge).
///
/// The exact byte encoding is delegated to the serializer; ballots travel
/// as CBOR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBallot {
    pub bid: String,
    pub races: Vec<EncryptedRace>,

    #[serde(with = "hex_serde")]
    pub nonce: Vec<u8>,

    /// The combined public key the booth encrypted under; the tallier
    /// re-derives its own and rejects the ballot on mismatch.
    pub public_key: ElectionPublicKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writeins: Option<SealedWriteIns>,
}

impl WireBallot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BallotError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<WireBallot, BallotError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }

    /// Short hash for audit-log entries.
    pub fn short_hash(&self) -> String {
        let bytes = self.to_bytes().unwrap_or_default();
        hex::encode(&Sha256::digest(&bytes)[..5])
    }
}

/// A proof-less encrypted ballot: one ciphertext per candidate id, the
/// form consumed by the non-NIZK tallier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainBallot {
    pub entries: Vec<PlainVoteEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainVoteEntry {
    pub id: String,
    pub ciphertext: Ciphertext,
}

impl PlainBallot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BallotError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<PlainBallot, BallotError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }
}

/// The audit disclosure for one race: `(candidate-id, r)` pairs in the
/// ballot's candidate order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceRandomness {
    pub values: Vec<(String, ModInt)>,
}

/// The randomness used to encrypt one ballot, disclosed only when the
/// voter challenges instead of casting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotRandomness {
    pub races: Vec<RaceRandomness>,
}

impl BallotRandomness {
    pub fn to_json(&self) -> Result<String, BallotError> {
        Ok(serde_json::to_string(self)?)
    }
}
