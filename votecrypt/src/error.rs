use thiserror::Error;

/// Fatal, election-wide configuration faults. These abort the affected
/// tallier or encrypter instance and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("votecrypt: no public key loaded")]
    KeyNotLoaded,

    #[error("votecrypt: no trustee key shares supplied")]
    NoKeyShares,

    #[error("votecrypt: trustee key shares disagree on group parameters")]
    ShareSetMismatch,

    #[error("votecrypt: combined public key changed during the election")]
    CombinedKeyDrift,

    #[error("votecrypt: private key shares do not match the combined public key")]
    PrivateShareMismatch,
}

/// Per-ballot validation failures. These reject exactly one ballot; the
/// tallier records the rejection and keeps processing.
#[derive(Debug, Error)]
pub enum BallotError {
    #[error("votecrypt: CBOR error deserializing ballot: {0}")]
    CBORDeserialization(#[from] serde_cbor::Error),

    #[error("votecrypt: JSON error serializing disclosure: {0}")]
    JSONSerialization(#[from] serde_json::Error),

    #[error("votecrypt: ballot public key does not match the combined election key")]
    PublicKeyMismatch,

    #[error("votecrypt: proof verification failed for race {0}")]
    ProofRejected(String),

    #[error("votecrypt: candidate ids and ciphertexts do not line up")]
    ShapeMismatch,

    #[error("votecrypt: candidate id {0} missing from its race group")]
    UnknownCandidate(String),

    #[error("votecrypt: selection count outside the race bounds")]
    SelectionCountOutOfBounds,

    #[error("votecrypt: disclosed randomness does not line up with the ballot")]
    RandomnessShapeMismatch,

    #[error("votecrypt: malformed ciphertext")]
    BadCiphertext,

    #[error("votecrypt: write-in seal or open failed")]
    WriteIn,

    #[error("votecrypt: background encryption failed: {0}")]
    EncryptionFailed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Failures surfaced by the piecemeal encrypter: either a misuse of the
/// instance or an encryption failure from a queued card.
#[derive(Debug, Error)]
pub enum PiecemealError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Ballot(#[from] BallotError),
}

/// Protocol desynchronization between the booth and the tallier, or misuse
/// of an encrypter. These indicate a bug in the surrounding orchestration,
/// not adversarial input, and are raised loudly.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("votecrypt: no pending vote for nonce {0}")]
    UnknownNonce(String),

    #[error("votecrypt: nonce {0} already has a pending vote")]
    DuplicateNonce(String),

    #[error("votecrypt: nonce {0} was already confirmed")]
    AlreadyConfirmed(String),

    #[error("votecrypt: cannot mix plain and proof-bearing ballots in one encrypter")]
    MixedEncrypterModes,

    #[error("votecrypt: encrypter has no retained randomness to disclose")]
    Uninitialised,

    #[error("votecrypt: this tallier does not delay ballots for confirmation")]
    NotChallengeDelayed,

    #[error("votecrypt: piecemeal encryption worker is gone")]
    WorkerGone,
}

/// Cryptographic impossibilities. Under honest operation these never occur;
/// any one of them is a tamper or wrong-key signal, surfaced distinctly
/// from ordinary parse errors and never defaulted away.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("votecrypt: decrypted intermediate value is neither the zero nor the one representative")]
    UnexpectedIntermediateValue,

    #[error("votecrypt: disclosed randomness does not correspond to the ciphertext")]
    RandomnessMismatch,

    #[error("votecrypt: exhausted the search space while decrypting a total")]
    SearchSpaceExhausted,

    #[error("votecrypt: ciphertext component is not invertible in the group")]
    NotInvertible,
}

/// Everything a tallier call can surface, classed per the taxonomy above so
/// the dispatcher can tell a fatal configuration fault from a single
/// rejected ballot.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ballot(#[from] BallotError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
