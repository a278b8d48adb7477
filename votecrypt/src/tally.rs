use crate::*;
use indexmap::{IndexMap, IndexSet};

/// The tallier call boundary as seen from the transport layer: the
/// dispatcher feeds inbound `record-votes` / `confirmed` / `challenged`
/// events into one instance, serially, and asks for the report after the
/// voting window closes.
///
/// `report` must not be interleaved with in-flight tallying on the same
/// instance; the `&mut` receivers make one instance single-writer, and
/// nothing more is promised.
pub trait Tallier {
    /// Consumes an encrypted ballot delivered under `nonce`. A per-ballot
    /// validation failure rejects exactly that ballot and leaves the
    /// running totals untouched.
    fn record_votes(&mut self, ballot: &[u8], nonce: &[u8]) -> Result<(), TallyError>;

    /// Cast confirmation for a previously recorded ballot
    /// (challenge-commit variants only).
    fn confirmed(&mut self, nonce: &[u8]) -> Result<(), TallyError>;

    /// Challenge for a previously recorded ballot: the ballot is discarded
    /// from the tally and its raw bytes are returned so the booth's
    /// randomness disclosure can be audited against them.
    fn challenged(&mut self, nonce: &[u8]) -> Result<Vec<u8>, TallyError>;

    /// Decrypts the accumulated totals into per-candidate counts. Only
    /// valid after all tallying activity for the election has ceased.
    fn report(&self) -> Result<IndexMap<String, u64>, TallyError>;
}

/// An audit-log entry for a rejected ballot.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// Hex of the delivery nonce.
    pub nonce: String,
    /// Short hash of the ballot bytes.
    pub ballot: String,
    pub reason: String,
}

/// Tallier for elections without NIZKs: consumes proof-less
/// [`PlainBallot`]s and homomorphically multiplies each entry into the
/// running per-id total. Only the final totals are ever decrypted.
pub struct EncryptedTallier {
    key: CombinedPrivateKey,
    totals: IndexMap<String, Ciphertext>,
    ballots: u64,
    rejected: Vec<Rejection>,
}

impl EncryptedTallier {
    pub fn new(key: CombinedPrivateKey) -> EncryptedTallier {
        EncryptedTallier {
            key,
            totals: IndexMap::new(),
            ballots: 0,
            rejected: Vec::new(),
        }
    }

    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    fn reject(&mut self, ballot: &[u8], nonce: &[u8], error: BallotError) -> TallyError {
        self.rejected.push(Rejection {
            nonce: hex::encode(nonce),
            ballot: short_hash(ballot),
            reason: error.to_string(),
        });
        TallyError::Ballot(error)
    }
}

impl Tallier for EncryptedTallier {
    fn record_votes(&mut self, ballot: &[u8], nonce: &[u8]) -> Result<(), TallyError> {
        let parsed = match PlainBallot::from_bytes(ballot) {
            Ok(parsed) => parsed,
            Err(e) => return Err(self.reject(ballot, nonce, e)),
        };

        // validate the whole ballot before touching any total
        for entry in &parsed.entries {
            if let Err(e) = entry.ciphertext.validate(&self.key.p) {
                return Err(self.reject(ballot, nonce, e));
            }
        }

        for entry in parsed.entries {
            let total = match self.totals.get(&entry.id) {
                Some(total) => total.operate(&entry.ciphertext),
                None => entry.ciphertext.strip_randomness(),
            };
            self.totals.insert(entry.id, total);
        }
        self.ballots += 1;
        Ok(())
    }

    fn confirmed(&mut self, _nonce: &[u8]) -> Result<(), TallyError> {
        Err(ProtocolError::NotChallengeDelayed.into())
    }

    fn challenged(&mut self, _nonce: &[u8]) -> Result<Vec<u8>, TallyError> {
        Err(ProtocolError::NotChallengeDelayed.into())
    }

    fn report(&self) -> Result<IndexMap<String, u64>, TallyError> {
        let mut report = IndexMap::with_capacity(self.totals.len());
        for (id, total) in &self.totals {
            let count = total.decrypt(&self.key, self.ballots)?;
            report.insert(id.clone(), count);
        }
        Ok(report)
    }
}

/// The running homomorphic total of one race group.
#[derive(Debug, Clone)]
pub struct RaceTotal {
    total: RaceSelection,
    sum_proof: SumProof,
    ballots: u64,
}

impl RaceTotal {
    pub fn total(&self) -> &RaceSelection {
        &self.total
    }

    pub fn ballots(&self) -> u64 {
        self.ballots
    }

    /// Verifies the aggregated range statement about this total without
    /// decrypting it.
    pub fn verify(&self, public_key: &ElectionPublicKey) -> bool {
        self.sum_proof
            .verify(&self.total.sum_ciphertext(public_key), public_key)
    }
}

/// NIZK-checked tallier. Re-derives the combined public key for every
/// ballot (combined-key drift is a fatal configuration fault, not a
/// rejection), rejects any ballot whose declared key or proofs do not
/// check out, and accumulates the rest per race group.
pub struct NizkTallier {
    combiner: KeyCombiner,
    public_shares: Vec<PublicKeyShare>,
    private_shares: Vec<PrivateKeyShare>,
    election_key: ElectionPublicKey,
    races: IndexMap<String, RaceTotal>,
    rejected: Vec<Rejection>,
}

impl NizkTallier {
    /// The first key combination runs here, during election setup, so the
    /// combiner cache is established before any concurrent reads.
    pub fn new(
        combiner: KeyCombiner,
        public_shares: Vec<PublicKeyShare>,
        private_shares: Vec<PrivateKeyShare>,
    ) -> Result<NizkTallier, ConfigError> {
        let election_key = combiner.combine_public(&public_shares)?;
        Ok(NizkTallier {
            combiner,
            public_shares,
            private_shares,
            election_key,
            races: IndexMap::new(),
            rejected: Vec::new(),
        })
    }

    pub fn from_store(store: &impl KeyStore, combiner: KeyCombiner) -> Result<NizkTallier, ConfigError> {
        let public_shares = store.load_public_shares()?;
        let private_shares = store.load_private_shares()?;
        NizkTallier::new(combiner, public_shares, private_shares)
    }

    pub fn election_key(&self) -> &ElectionPublicKey {
        &self.election_key
    }

    /// The audit log of rejected ballots.
    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    pub fn race_totals(&self) -> &IndexMap<String, RaceTotal> {
        &self.races
    }

    /// Checks every race total's aggregated range proof, without
    /// decrypting anything.
    pub fn verify_totals(&self) -> bool {
        self.races.values().all(|t| t.verify(&self.election_key))
    }

    fn reject(&mut self, ballot: &[u8], nonce: &[u8], error: BallotError) -> TallyError {
        self.rejected.push(Rejection {
            nonce: hex::encode(nonce),
            ballot: short_hash(ballot),
            reason: error.to_string(),
        });
        TallyError::Ballot(error)
    }

    fn validate(&self, ballot: &WireBallot) -> Result<(), BallotError> {
        if ballot.public_key != self.election_key {
            return Err(BallotError::PublicKeyMismatch);
        }
        for race in &ballot.races {
            race.selection.validate(&self.election_key)?;
            if !race.proof.verify(&race.selection, &self.election_key, race.bounds) {
                return Err(BallotError::ProofRejected(race.selection.race_key()));
            }
        }
        Ok(())
    }

    /// Stages the merged totals for every race of a validated ballot.
    /// Nothing is committed until every race merges cleanly, so a bad
    /// ballot can never leave the accumulators half-updated.
    fn stage(&self, ballot: &WireBallot) -> Result<Vec<(String, RaceTotal)>, BallotError> {
        let mut staged: Vec<(String, RaceTotal)> = Vec::new();
        for race in &ballot.races {
            let key = race.selection.race_key();
            let sum = race.selection.sum_ciphertext(&self.election_key);
            let single = SumProof::single(&sum, race.proof.sum_proof().clone(), race.bounds);

            let base = staged
                .iter()
                .rev()
                .find(|(k, _)| *k == key)
                .map(|(_, t)| t)
                .or_else(|| self.races.get(&key));

            let next = match base {
                Some(prior) => RaceTotal {
                    total: prior.total.operate(&race.selection)?,
                    sum_proof: prior.sum_proof.operate(&single),
                    ballots: prior.ballots + 1,
                },
                None => RaceTotal {
                    total: race.selection.clone(),
                    sum_proof: single,
                    ballots: 1,
                },
            };
            staged.push((key, next));
        }
        Ok(staged)
    }
}

impl Tallier for NizkTallier {
    fn record_votes(&mut self, ballot: &[u8], nonce: &[u8]) -> Result<(), TallyError> {
        // key drift during the election aborts the tallier, it is not a
        // per-ballot rejection
        self.combiner.combine_public(&self.public_shares)?;

        let parsed = match WireBallot::from_bytes(ballot) {
            Ok(parsed) => parsed,
            Err(e) => return Err(self.reject(ballot, nonce, e)),
        };
        if let Err(e) = self.validate(&parsed) {
            return Err(self.reject(ballot, nonce, e));
        }
        let staged = match self.stage(&parsed) {
            Ok(staged) => staged,
            Err(e) => return Err(self.reject(ballot, nonce, e)),
        };
        for (key, total) in staged {
            self.races.insert(key, total);
        }
        Ok(())
    }

    fn confirmed(&mut self, _nonce: &[u8]) -> Result<(), TallyError> {
        Err(ProtocolError::NotChallengeDelayed.into())
    }

    fn challenged(&mut self, _nonce: &[u8]) -> Result<Vec<u8>, TallyError> {
        Err(ProtocolError::NotChallengeDelayed.into())
    }

    fn report(&self) -> Result<IndexMap<String, u64>, TallyError> {
        let key = self
            .combiner
            .combine_private(&self.election_key, &self.private_shares)?;

        let mut report = IndexMap::new();
        for race in self.races.values() {
            for (id, total) in race
                .total
                .candidate_ids()
                .iter()
                .zip(race.total.ciphertexts())
            {
                let count = total.decrypt(&key, race.ballots)?;
                report.insert(id.clone(), count);
            }
        }
        Ok(report)
    }
}

/// Challenge-commit wrapper: ballots are held in a pending-vote store
/// keyed by their delivery nonce until the voter casts (`confirmed`, the
/// inner tallier validates and accumulates) or challenges (`challenged`,
/// the ballot is discarded and handed back for audit).
///
/// A nonce resolves to at most one pending vote. `confirmed` or
/// `challenged` on an unknown nonce is a protocol error, not a no-op: it
/// means the booth and tallier disagree about the challenge-commit mode.
pub struct ChallengeDelayed<T> {
    inner: T,
    pending: IndexMap<Vec<u8>, Vec<u8>>,
    resolved: IndexSet<Vec<u8>>,
}

/// NIZK tallier with the challenge-commit model enabled.
pub type ChallengeDelayedNizkTallier = ChallengeDelayed<NizkTallier>;

/// Non-NIZK tallier with the challenge-commit model enabled.
pub type ChallengeDelayedEncryptedTallier = ChallengeDelayed<EncryptedTallier>;

impl<T: Tallier> ChallengeDelayed<T> {
    pub fn new(inner: T) -> ChallengeDelayed<T> {
        ChallengeDelayed {
            inner,
            pending: IndexMap::new(),
            resolved: IndexSet::new(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn take_pending(&mut self, nonce: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self.pending.shift_remove(nonce) {
            Some(bytes) => {
                self.resolved.insert(nonce.to_vec());
                Ok(bytes)
            }
            None if self.resolved.contains(nonce) => {
                Err(ProtocolError::AlreadyConfirmed(hex::encode(nonce)))
            }
            None => Err(ProtocolError::UnknownNonce(hex::encode(nonce))),
        }
    }
}

impl<T: Tallier> Tallier for ChallengeDelayed<T> {
    fn record_votes(&mut self, ballot: &[u8], nonce: &[u8]) -> Result<(), TallyError> {
        if self.pending.contains_key(nonce) || self.resolved.contains(nonce) {
            return Err(ProtocolError::DuplicateNonce(hex::encode(nonce)).into());
        }
        self.pending.insert(nonce.to_vec(), ballot.to_vec());
        Ok(())
    }

    fn confirmed(&mut self, nonce: &[u8]) -> Result<(), TallyError> {
        let ballot = self.take_pending(nonce)?;
        self.inner.record_votes(&ballot, nonce)
    }

    fn challenged(&mut self, nonce: &[u8]) -> Result<Vec<u8>, TallyError> {
        Ok(self.take_pending(nonce)?)
    }

    fn report(&self) -> Result<IndexMap<String, u64>, TallyError> {
        self.inner.report()
    }
}

fn short_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(&Sha256::digest(bytes)[..5])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        pek: ElectionPublicKey,
        tallier: NizkTallier,
    }

    fn fixture(trustees: usize) -> Fixture {
        let mut rng = rand::thread_rng();
        let params = KeyParameters::generate(64, &mut rng);
        let shares: Vec<_> = (0..trustees)
            .map(|_| generate_key_share(&params, &mut rng))
            .collect();
        let public: Vec<_> = shares.iter().map(|(p, _)| p.clone()).collect();
        let private: Vec<_> = shares.iter().map(|(_, s)| s.clone()).collect();

        let tallier = NizkTallier::new(KeyCombiner::new(), public, private).unwrap();
        let pek = tallier.election_key().clone();
        Fixture { pek, tallier }
    }

    fn ballot_for(pek: &ElectionPublicKey, winner: usize, nonce: &[u8]) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let mut encrypter = BallotEncrypter::new(pek.clone());
        let selections: Vec<_> = (0..2)
            .map(|i| RawSelection::new(format!("B{}", i), (i == winner) as u64))
            .collect();
        let groups = vec![RaceGroup::new(
            vec!["B0".into(), "B1".into()],
            Bounds::new(1, 1),
        )];
        encrypter
            .encrypt_with_proof("bid", &selections, &groups, nonce, &mut rng)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn two_ballots_for_b1_report_two() {
        let Fixture { pek, mut tallier } = fixture(2);

        tallier.record_votes(&ballot_for(&pek, 1, b"n1"), b"n1").unwrap();
        tallier.record_votes(&ballot_for(&pek, 1, b"n2"), b"n2").unwrap();

        assert!(tallier.verify_totals());
        let report = tallier.report().unwrap();
        assert_eq!(report.get("B0"), Some(&0));
        assert_eq!(report.get("B1"), Some(&2));
    }

    #[test]
    fn forged_ballots_are_rejected_and_recorded() {
        let Fixture { pek, mut tallier } = fixture(1);

        // a ballot declaring a different public key
        let mut rng = rand::thread_rng();
        let params = KeyParameters::generate(64, &mut rng);
        let (other_share, _) = generate_key_share(&params, &mut rng);
        let other_pek = KeyCombiner::new().combine_public(&[other_share]).unwrap();
        let foreign = ballot_for(&other_pek, 0, b"n1");
        assert!(matches!(
            tallier.record_votes(&foreign, b"n1"),
            Err(TallyError::Ballot(BallotError::PublicKeyMismatch))
        ));

        // a ballot with a tampered ciphertext
        let mut wire = WireBallot::from_bytes(&ballot_for(&pek, 0, b"n2")).unwrap();
        let race = &wire.races[0];
        let tampered = RaceSelection::new(
            race.selection.candidate_ids().to_vec(),
            race.selection
                .ciphertexts()
                .iter()
                .map(|ct| Ciphertext::from_parts(ct.g().clone(), ct.h().mul(&pek.g)))
                .collect(),
        )
        .unwrap();
        wire.races[0].selection = tampered;
        assert!(matches!(
            tallier.record_votes(&wire.to_bytes().unwrap(), b"n2"),
            Err(TallyError::Ballot(BallotError::ProofRejected(_)))
        ));

        // garbage bytes
        assert!(tallier.record_votes(b"not a ballot", b"n3").is_err());

        assert_eq!(tallier.rejected().len(), 3);
        assert!(tallier.race_totals().is_empty());
        assert!(tallier.report().unwrap().is_empty());
    }

    #[test]
    fn rejected_ballots_do_not_touch_the_total() {
        let Fixture { pek, mut tallier } = fixture(1);

        tallier.record_votes(&ballot_for(&pek, 0, b"n1"), b"n1").unwrap();
        let before: Vec<_> = tallier.race_totals().values().map(|t| t.total().clone()).collect();

        let _ = tallier.record_votes(b"garbage", b"n2");
        let after: Vec<_> = tallier.race_totals().values().map(|t| t.total().clone()).collect();
        assert_eq!(before, after);

        let report = tallier.report().unwrap();
        assert_eq!(report.get("B0"), Some(&1));
        assert_eq!(report.get("B1"), Some(&0));
    }

    #[test]
    fn challenge_commit_state_machine() {
        let Fixture { pek, tallier } = fixture(1);
        let mut tallier = ChallengeDelayed::new(tallier);

        let cast = ballot_for(&pek, 1, b"cast");
        let challenged = ballot_for(&pek, 0, b"chal");

        tallier.record_votes(&cast, b"cast").unwrap();
        tallier.record_votes(&challenged, b"chal").unwrap();
        assert_eq!(tallier.pending(), 2);

        // nothing tallied while pending
        assert!(tallier.report().unwrap().is_empty());

        // cast one, challenge the other
        tallier.confirmed(b"cast").unwrap();
        let disclosed = tallier.challenged(b"chal").unwrap();
        assert_eq!(disclosed, challenged);

        let report = tallier.report().unwrap();
        assert_eq!(report.get("B0"), Some(&0));
        assert_eq!(report.get("B1"), Some(&1));

        // a second confirm of the same nonce is rejected
        assert!(matches!(
            tallier.confirmed(b"cast"),
            Err(TallyError::Protocol(ProtocolError::AlreadyConfirmed(_)))
        ));
        // so is challenging an already-cast ballot
        assert!(matches!(
            tallier.challenged(b"cast"),
            Err(TallyError::Protocol(ProtocolError::AlreadyConfirmed(_)))
        ));
    }

    #[test]
    fn confirm_without_record_is_a_protocol_error() {
        let Fixture { tallier, .. } = fixture(1);
        let mut tallier = ChallengeDelayed::new(tallier);

        assert!(matches!(
            tallier.confirmed(b"nonce-X"),
            Err(TallyError::Protocol(ProtocolError::UnknownNonce(_)))
        ));
    }

    #[test]
    fn duplicate_nonce_cannot_be_recorded_twice() {
        let Fixture { pek, tallier } = fixture(1);
        let mut tallier = ChallengeDelayed::new(tallier);

        let ballot = ballot_for(&pek, 0, b"n1");
        tallier.record_votes(&ballot, b"n1").unwrap();
        assert!(matches!(
            tallier.record_votes(&ballot, b"n1"),
            Err(TallyError::Protocol(ProtocolError::DuplicateNonce(_)))
        ));
    }

    #[test]
    fn immediate_talliers_do_not_take_confirmations() {
        let Fixture { pek, mut tallier } = fixture(1);
        tallier.record_votes(&ballot_for(&pek, 0, b"n1"), b"n1").unwrap();
        assert!(matches!(
            tallier.confirmed(b"n1"),
            Err(TallyError::Protocol(ProtocolError::NotChallengeDelayed))
        ));
    }

    #[test]
    fn plain_tallier_accumulates_without_proofs() {
        let mut rng = rand::thread_rng();
        let params = KeyParameters::generate(64, &mut rng);
        let (public, private) = generate_key_share(&params, &mut rng);
        let combiner = KeyCombiner::new();
        let pek = combiner.combine_public(&[public]).unwrap();
        let sk = combiner.combine_private(&pek, &[private]).unwrap();

        let mut encrypter = BallotEncrypter::new(pek);
        let mut tallier = EncryptedTallier::new(sk);

        for winner in [1usize, 1, 0] {
            let selections: Vec<_> = (0..2)
                .map(|i| RawSelection::new(format!("B{}", i), (i == winner) as u64))
                .collect();
            let ballot = encrypter.encrypt_plain(&selections, &mut rng).unwrap();
            tallier
                .record_votes(&ballot.to_bytes().unwrap(), b"ignored")
                .unwrap();
        }

        let report = tallier.report().unwrap();
        assert_eq!(report.get("B0"), Some(&1));
        assert_eq!(report.get("B1"), Some(&2));
    }
}
