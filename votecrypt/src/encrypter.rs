use crate::*;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;

/// One raw selection as delivered by the booth UI: a candidate id, its
/// 0/1 counter, and optionally a write-in name the voter typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSelection {
    pub candidate_id: String,
    pub selected: u64,
    pub write_in: Option<String>,
}

impl RawSelection {
    pub fn new(candidate_id: impl Into<String>, selected: u64) -> RawSelection {
        RawSelection {
            candidate_id: candidate_id.into(),
            selected,
            write_in: None,
        }
    }
}

/// A caller-supplied race grouping: the candidate ids belonging to one
/// logical contest, in ballot order, plus the contest's selection bounds.
/// The encrypter never infers grouping itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceGroup {
    pub candidates: Vec<String>,
    pub bounds: Bounds,
}

impl RaceGroup {
    pub fn new(candidates: Vec<String>, bounds: Bounds) -> RaceGroup {
        RaceGroup { candidates, bounds }
    }
}

/// Orchestrates ballot encryption for one voting session.
///
/// Owned by the caller and passed through the session context; there is no
/// process-global instance. The randomness used for the most recent ballot
/// is retained so it can be disclosed if the voter challenges instead of
/// casting, retrievable exactly once, and discarded by [`clear`].
///
/// [`clear`]: BallotEncrypter::clear
#[derive(Debug)]
pub struct BallotEncrypter {
    public_key: ElectionPublicKey,
    recent_ballot: Option<WireBallot>,
    recent_random: Option<BallotRandomness>,
}

impl BallotEncrypter {
    pub fn new(public_key: ElectionPublicKey) -> BallotEncrypter {
        BallotEncrypter {
            public_key,
            recent_ballot: None,
            recent_random: None,
        }
    }

    /// Builds an encrypter from stored trustee shares. Fails with a
    /// configuration fault when no key material is loaded.
    pub fn from_store(
        store: &impl KeyStore,
        combiner: &KeyCombiner,
    ) -> Result<BallotEncrypter, ConfigError> {
        let shares = store.load_public_shares()?;
        Ok(BallotEncrypter::new(combiner.combine_public(&shares)?))
    }

    pub fn public_key(&self) -> &ElectionPublicKey {
        &self.public_key
    }

    /// Encrypts a full ballot with validity proofs.
    ///
    /// For each race group, the raw selections belonging to that group are
    /// gathered, each counter is encrypted with fresh randomness, and the
    /// per-candidate plus race-sum proofs are built. Write-in names, if
    /// any, are sealed and attached. The randomness used is recorded per
    /// race for a later challenge disclosure.
    pub fn encrypt_with_proof(
        &mut self,
        bid: impl Into<String>,
        selections: &[RawSelection],
        race_groups: &[RaceGroup],
        nonce: &[u8],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<WireBallot, BallotError> {
        let by_id: HashMap<&str, &RawSelection> = selections
            .iter()
            .map(|s| (s.candidate_id.as_str(), s))
            .collect();

        let mut races = Vec::with_capacity(race_groups.len());
        let mut random = Vec::with_capacity(race_groups.len());
        let mut writeins = Vec::new();

        for group in race_groups {
            let mut plaintexts = Vec::with_capacity(group.candidates.len());
            for id in &group.candidates {
                let raw = by_id
                    .get(id.as_str())
                    .ok_or_else(|| BallotError::UnknownCandidate(id.clone()))?;
                plaintexts.push(raw.selected);
                if let Some(name) = &raw.write_in {
                    writeins.push((id.clone(), name.clone()));
                }
            }

            let (selection, proof) = encrypt_race(
                group.candidates.clone(),
                &plaintexts,
                &self.public_key,
                group.bounds,
                rng,
            )?;
            random.push(race_randomness(&selection)?);
            races.push(EncryptedRace {
                selection,
                proof,
                bounds: group.bounds,
            });
        }

        let writeins = if writeins.is_empty() {
            None
        } else {
            Some(seal_writeins(&writeins, &self.public_key, rng)?)
        };

        let ballot = WireBallot {
            bid: bid.into(),
            races,
            nonce: nonce.to_vec(),
            public_key: self.public_key.clone(),
            writeins,
        };

        self.recent_random = Some(BallotRandomness { races: random });
        self.recent_ballot = Some(ballot.clone());
        Ok(ballot)
    }

    /// Encrypts a ballot without proofs, for elections tallied by the
    /// non-NIZK tallier. Randomness is retained the same way.
    pub fn encrypt_plain(
        &mut self,
        selections: &[RawSelection],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<PlainBallot, BallotError> {
        let mut entries = Vec::with_capacity(selections.len());
        let mut values = Vec::with_capacity(selections.len());
        for raw in selections {
            let ciphertext = Ciphertext::encrypt(&self.public_key, raw.selected, rng);
            let r = ciphertext
                .randomness()
                .ok_or(BallotError::BadCiphertext)?
                .clone();
            values.push((raw.candidate_id.clone(), r));
            entries.push(PlainVoteEntry {
                id: raw.candidate_id.clone(),
                ciphertext,
            });
        }

        self.recent_random = Some(BallotRandomness {
            races: vec![RaceRandomness { values }],
        });
        self.recent_ballot = None;
        Ok(PlainBallot { entries })
    }

    /// The most recent wire ballot, if a proof-bearing encryption has run
    /// since the last [`clear`](BallotEncrypter::clear).
    pub fn recent_ballot(&self) -> Option<&WireBallot> {
        self.recent_ballot.as_ref()
    }

    /// Hands out the randomness of the most recent ballot, exactly once.
    /// A second call, or a call before any encryption, is a protocol
    /// error: it means the surrounding orchestration lost track of the
    /// session lifecycle.
    pub fn take_recent_random(&mut self) -> Result<BallotRandomness, ProtocolError> {
        self.recent_random.take().ok_or(ProtocolError::Uninitialised)
    }

    /// Audit-path decryption of a wire ballot from its disclosed
    /// randomness. The candidate ids in the ballot and the disclosure must
    /// line up one-to-one; any length or id mismatch fails the whole call
    /// rather than producing a partial result.
    pub fn decrypt(
        ballot: &WireBallot,
        randomness: &BallotRandomness,
        public_key: &ElectionPublicKey,
    ) -> Result<Vec<(String, u64)>, BallotError> {
        if ballot.races.len() != randomness.races.len() {
            return Err(BallotError::RandomnessShapeMismatch);
        }

        let mut out = Vec::new();
        for (race, disclosed) in ballot.races.iter().zip(&randomness.races) {
            let ids = race.selection.candidate_ids();
            if disclosed.values.len() != ids.len() {
                return Err(BallotError::RandomnessShapeMismatch);
            }
            for ((id, r), (expected_id, ciphertext)) in disclosed
                .values
                .iter()
                .zip(ids.iter().zip(race.selection.ciphertexts()))
            {
                if id != expected_id {
                    return Err(BallotError::RandomnessShapeMismatch);
                }
                let bit = ciphertext.audit_decrypt_bit(public_key, r)?;
                out.push((id.clone(), bit));
            }
        }
        Ok(out)
    }

    /// Discards the retained ballot and randomness. Call once per
    /// completed voting session before reuse.
    pub fn clear(&mut self) {
        self.recent_ballot = None;
        self.recent_random = None;
    }
}

pub(crate) fn race_randomness(selection: &RaceSelection) -> Result<RaceRandomness, BallotError> {
    let mut values = Vec::with_capacity(selection.candidate_ids().len());
    for (id, ciphertext) in selection
        .candidate_ids()
        .iter()
        .zip(selection.ciphertexts())
    {
        let r = ciphertext
            .randomness()
            .ok_or(BallotError::BadCiphertext)?
            .clone();
        values.push((id.clone(), r));
    }
    Ok(RaceRandomness { values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ElectionPublicKey, CombinedPrivateKey) {
        let mut rng = rand::thread_rng();
        let params = KeyParameters::generate(64, &mut rng);
        let (public, private) = generate_key_share(&params, &mut rng);
        let combiner = KeyCombiner::new();
        let pek = combiner.combine_public(&[public]).unwrap();
        let sk = combiner.combine_private(&pek, &[private]).unwrap();
        (pek, sk)
    }

    fn two_races() -> (Vec<RawSelection>, Vec<RaceGroup>) {
        let selections = vec![
            RawSelection::new("B0", 0),
            RawSelection::new("B1", 1),
            RawSelection::new("C0", 1),
            RawSelection::new("C1", 0),
        ];
        let groups = vec![
            RaceGroup::new(vec!["B0".into(), "B1".into()], Bounds::new(1, 1)),
            RaceGroup::new(vec!["C0".into(), "C1".into()], Bounds::new(1, 1)),
        ];
        (selections, groups)
    }

    #[test]
    fn encrypts_and_audit_decrypts_a_ballot() {
        let (pek, _) = setup();
        let mut rng = rand::thread_rng();
        let (selections, groups) = two_races();

        let mut encrypter = BallotEncrypter::new(pek.clone());
        let ballot = encrypter
            .encrypt_with_proof("bid-1", &selections, &groups, b"nonce-1", &mut rng)
            .unwrap();

        assert_eq!(ballot.races.len(), 2);
        for race in &ballot.races {
            assert!(race.proof.verify(&race.selection, &pek, race.bounds));
        }

        let random = encrypter.take_recent_random().unwrap();
        let plain = BallotEncrypter::decrypt(&ballot, &random, &pek).unwrap();
        assert_eq!(
            plain,
            vec![
                ("B0".to_string(), 0),
                ("B1".to_string(), 1),
                ("C0".to_string(), 1),
                ("C1".to_string(), 0),
            ]
        );
    }

    #[test]
    fn randomness_is_taken_exactly_once() {
        let (pek, _) = setup();
        let mut rng = rand::thread_rng();
        let (selections, groups) = two_races();

        let mut encrypter = BallotEncrypter::new(pek);
        assert!(matches!(
            encrypter.take_recent_random(),
            Err(ProtocolError::Uninitialised)
        ));

        encrypter
            .encrypt_with_proof("bid-1", &selections, &groups, b"nonce-1", &mut rng)
            .unwrap();
        assert!(encrypter.take_recent_random().is_ok());
        assert!(matches!(
            encrypter.take_recent_random(),
            Err(ProtocolError::Uninitialised)
        ));
    }

    #[test]
    fn mismatched_disclosure_is_rejected_whole() {
        let (pek, _) = setup();
        let mut rng = rand::thread_rng();
        let (selections, groups) = two_races();

        let mut encrypter = BallotEncrypter::new(pek.clone());
        let ballot = encrypter
            .encrypt_with_proof("bid-1", &selections, &groups, b"nonce-1", &mut rng)
            .unwrap();
        let random = encrypter.take_recent_random().unwrap();

        // rename one candidate in the disclosure
        let mut renamed = random.clone();
        renamed.races[0].values[0].0 = "ZZ".to_string();
        assert!(matches!(
            BallotEncrypter::decrypt(&ballot, &renamed, &pek),
            Err(BallotError::RandomnessShapeMismatch)
        ));

        // drop a race from the disclosure
        let mut short = random;
        short.races.pop();
        assert!(matches!(
            BallotEncrypter::decrypt(&ballot, &short, &pek),
            Err(BallotError::RandomnessShapeMismatch)
        ));
    }

    #[test]
    fn missing_candidate_in_group_is_an_error() {
        let (pek, _) = setup();
        let mut rng = rand::thread_rng();
        let selections = vec![RawSelection::new("B0", 1)];
        let groups = vec![RaceGroup::new(
            vec!["B0".into(), "B1".into()],
            Bounds::new(1, 1),
        )];

        let mut encrypter = BallotEncrypter::new(pek);
        assert!(matches!(
            encrypter.encrypt_with_proof("bid-1", &selections, &groups, b"n", &mut rng),
            Err(BallotError::UnknownCandidate(id)) if id == "B1"
        ));
    }

    #[test]
    fn clear_discards_session_state() {
        let (pek, _) = setup();
        let mut rng = rand::thread_rng();
        let (selections, groups) = two_races();

        let mut encrypter = BallotEncrypter::new(pek);
        encrypter
            .encrypt_with_proof("bid-1", &selections, &groups, b"nonce-1", &mut rng)
            .unwrap();
        encrypter.clear();
        assert!(encrypter.recent_ballot().is_none());
        assert!(matches!(
            encrypter.take_recent_random(),
            Err(ProtocolError::Uninitialised)
        ));
    }
}
