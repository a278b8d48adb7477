use crate::encrypter::race_randomness;
use crate::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

/// Incremental ballot encrypter that hides encryption latency behind UI
/// navigation.
///
/// Per-card updates are enqueued on a FIFO job channel drained by a single
/// background worker; `update` returns immediately so the UI thread never
/// stalls. The blocking getters enqueue a barrier job behind all pending
/// updates and wait for its reply, so every prior update is reflected in
/// what they return. Once enqueued a job always runs to completion; there
/// is no cancellation.
///
/// An instance operates in exactly one of two modes between `clear` calls:
/// plain or proof-bearing. Mixing them is a programming error in the
/// caller and is rejected at enqueue time.
pub struct PiecemealEncrypter {
    jobs: Sender<Job>,
    mode: Mode,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Plain,
    Proof,
}

enum Job {
    UpdateProof {
        card_id: String,
        plaintexts: Vec<u64>,
        group: RaceGroup,
    },
    UpdatePlain {
        card_id: String,
        selections: Vec<RawSelection>,
    },
    ProofBallot {
        bid: String,
        nonce: Vec<u8>,
        reply: Sender<Result<WireBallot, BallotError>>,
    },
    PlainBallot {
        reply: Sender<Result<PlainBallot, BallotError>>,
    },
    Random {
        reply: Sender<Result<BallotRandomness, BallotError>>,
    },
    Clear {
        reply: Sender<()>,
    },
}

impl PiecemealEncrypter {
    /// Starts the background worker. The worker exits when the encrypter
    /// is dropped and its job channel disconnects.
    pub fn new(public_key: ElectionPublicKey) -> PiecemealEncrypter {
        let (jobs, queue) = channel();
        thread::spawn(move || Worker::new(public_key).run(queue));
        PiecemealEncrypter {
            jobs,
            mode: Mode::Idle,
        }
    }

    /// Enqueues a proof-bearing encryption of one card (one race group).
    /// Shape problems are rejected here, synchronously, so the booth can
    /// hard-stop before the voter moves on; the modular arithmetic itself
    /// happens on the worker.
    pub fn update(
        &mut self,
        card_id: impl Into<String>,
        selections: &[RawSelection],
        group: RaceGroup,
    ) -> Result<(), PiecemealError> {
        if self.mode == Mode::Plain {
            return Err(ProtocolError::MixedEncrypterModes.into());
        }

        let by_id: HashMap<&str, &RawSelection> = selections
            .iter()
            .map(|s| (s.candidate_id.as_str(), s))
            .collect();
        let mut plaintexts = Vec::with_capacity(group.candidates.len());
        for id in &group.candidates {
            let raw = by_id
                .get(id.as_str())
                .ok_or_else(|| BallotError::UnknownCandidate(id.clone()))?;
            if raw.write_in.is_some() {
                // write-ins go through the one-shot encrypter
                return Err(BallotError::WriteIn.into());
            }
            plaintexts.push(raw.selected);
        }
        if !group.bounds.contains(plaintexts.iter().sum()) {
            return Err(BallotError::SelectionCountOutOfBounds.into());
        }

        self.mode = Mode::Proof;
        self.send(Job::UpdateProof {
            card_id: card_id.into(),
            plaintexts,
            group,
        })
    }

    /// Enqueues a proof-less encryption of one card.
    pub fn update_plain(
        &mut self,
        card_id: impl Into<String>,
        selections: &[RawSelection],
    ) -> Result<(), PiecemealError> {
        if self.mode == Mode::Proof {
            return Err(ProtocolError::MixedEncrypterModes.into());
        }
        self.mode = Mode::Plain;
        self.send(Job::UpdatePlain {
            card_id: card_id.into(),
            selections: selections.to_vec(),
        })
    }

    /// Blocks until all pending updates are processed, then returns the
    /// assembled proof-bearing wire ballot.
    pub fn encrypted_ballot(
        &self,
        bid: impl Into<String>,
        nonce: &[u8],
    ) -> Result<WireBallot, PiecemealError> {
        if self.mode == Mode::Plain {
            return Err(ProtocolError::MixedEncrypterModes.into());
        }
        let (reply, result) = channel();
        self.send(Job::ProofBallot {
            bid: bid.into(),
            nonce: nonce.to_vec(),
            reply,
        })?;
        Ok(recv(&result)??)
    }

    /// Blocks until all pending updates are processed, then returns the
    /// assembled plain ballot.
    pub fn plain_ballot(&self) -> Result<PlainBallot, PiecemealError> {
        if self.mode == Mode::Proof {
            return Err(ProtocolError::MixedEncrypterModes.into());
        }
        let (reply, result) = channel();
        self.send(Job::PlainBallot { reply })?;
        Ok(recv(&result)??)
    }

    /// Blocks until all pending updates are processed, then returns the
    /// randomness used for the cached ballot, in canonical card order.
    pub fn recent_random(&self) -> Result<BallotRandomness, PiecemealError> {
        let (reply, result) = channel();
        self.send(Job::Random { reply })?;
        Ok(recv(&result)??)
    }

    /// Synchronously discards all cached ciphertexts and randomness and
    /// resets the mode. Call exactly once per completed voting session
    /// before reuse.
    pub fn clear(&mut self) -> Result<(), PiecemealError> {
        let (reply, result) = channel();
        self.send(Job::Clear { reply })?;
        recv(&result)?;
        self.mode = Mode::Idle;
        Ok(())
    }

    fn send(&self, job: Job) -> Result<(), PiecemealError> {
        self.jobs
            .send(job)
            .map_err(|_| ProtocolError::WorkerGone.into())
    }
}

fn recv<T>(result: &Receiver<T>) -> Result<T, PiecemealError> {
    result
        .recv()
        .map_err(|_| PiecemealError::Protocol(ProtocolError::WorkerGone))
}

enum CardEntry {
    Proof {
        race: EncryptedRace,
        random: RaceRandomness,
    },
    Plain {
        entries: Vec<PlainVoteEntry>,
        random: RaceRandomness,
    },
}

struct Worker {
    public_key: ElectionPublicKey,
    cards: HashMap<String, CardEntry>,
    failed: Option<String>,
    rng: StdRng,
}

impl Worker {
    fn new(public_key: ElectionPublicKey) -> Worker {
        Worker {
            public_key,
            cards: HashMap::new(),
            failed: None,
            rng: StdRng::from_entropy(),
        }
    }

    fn run(mut self, queue: Receiver<Job>) {
        while let Ok(job) = queue.recv() {
            match job {
                Job::UpdateProof {
                    card_id,
                    plaintexts,
                    group,
                } => self.update_proof(card_id, &plaintexts, group),
                Job::UpdatePlain {
                    card_id,
                    selections,
                } => self.update_plain(card_id, &selections),
                Job::ProofBallot { bid, nonce, reply } => {
                    let _ = reply.send(self.assemble_proof(bid, nonce));
                }
                Job::PlainBallot { reply } => {
                    let _ = reply.send(self.assemble_plain());
                }
                Job::Random { reply } => {
                    let _ = reply.send(self.assemble_random());
                }
                Job::Clear { reply } => {
                    self.cards.clear();
                    self.failed = None;
                    let _ = reply.send(());
                }
            }
        }
    }

    fn update_proof(&mut self, card_id: String, plaintexts: &[u64], group: RaceGroup) {
        let bounds = group.bounds;
        let encrypted = encrypt_race(
            group.candidates,
            plaintexts,
            &self.public_key,
            bounds,
            &mut self.rng,
        )
        .and_then(|(selection, proof)| {
            let random = race_randomness(&selection)?;
            Ok((
                EncryptedRace {
                    selection,
                    proof,
                    bounds,
                },
                random,
            ))
        });
        match encrypted {
            Ok((race, random)) => {
                self.cards.insert(card_id, CardEntry::Proof { race, random });
            }
            Err(e) => self.failed = Some(e.to_string()),
        }
    }

    fn update_plain(&mut self, card_id: String, selections: &[RawSelection]) {
        let mut entries = Vec::with_capacity(selections.len());
        let mut values = Vec::with_capacity(selections.len());
        for raw in selections {
            let ciphertext = Ciphertext::encrypt(&self.public_key, raw.selected, &mut self.rng);
            match ciphertext.randomness() {
                Some(r) => values.push((raw.candidate_id.clone(), r.clone())),
                None => {
                    self.failed = Some("missing randomness".to_string());
                    return;
                }
            }
            entries.push(PlainVoteEntry {
                id: raw.candidate_id.clone(),
                ciphertext,
            });
        }
        self.cards.insert(
            card_id,
            CardEntry::Plain {
                entries,
                random: RaceRandomness { values },
            },
        );
    }

    fn check_failed(&self) -> Result<(), BallotError> {
        match &self.failed {
            Some(msg) => Err(BallotError::EncryptionFailed(msg.clone())),
            None => Ok(()),
        }
    }

    /// Card ids sorted by their embedded numeric suffix, so the assembled
    /// ballot is identical no matter which order the UI issued updates in.
    fn canonical_order(&self) -> Vec<&String> {
        let mut ids: Vec<&String> = self.cards.keys().collect();
        ids.sort_by_key(|id| (numeric_suffix(id), (*id).clone()));
        ids
    }

    fn assemble_proof(&self, bid: String, nonce: Vec<u8>) -> Result<WireBallot, BallotError> {
        self.check_failed()?;
        let mut races = Vec::with_capacity(self.cards.len());
        for id in self.canonical_order() {
            if let Some(CardEntry::Proof { race, .. }) = self.cards.get(id) {
                races.push(race.clone());
            }
        }
        Ok(WireBallot {
            bid,
            races,
            nonce,
            public_key: self.public_key.clone(),
            writeins: None,
        })
    }

    fn assemble_plain(&self) -> Result<PlainBallot, BallotError> {
        self.check_failed()?;
        let mut entries = Vec::new();
        for id in self.canonical_order() {
            if let Some(CardEntry::Plain { entries: card, .. }) = self.cards.get(id) {
                entries.extend(card.iter().cloned());
            }
        }
        Ok(PlainBallot { entries })
    }

    fn assemble_random(&self) -> Result<BallotRandomness, BallotError> {
        self.check_failed()?;
        let mut races = Vec::with_capacity(self.cards.len());
        for id in self.canonical_order() {
            let random = match self.cards.get(id) {
                Some(CardEntry::Proof { random, .. }) => random,
                Some(CardEntry::Plain { random, .. }) => random,
                None => continue,
            };
            races.push(random.clone());
        }
        Ok(BallotRandomness { races })
    }
}

fn numeric_suffix(id: &str) -> u64 {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> ElectionPublicKey {
        let mut rng = rand::thread_rng();
        let params = KeyParameters::generate(64, &mut rng);
        let (public, _) = generate_key_share(&params, &mut rng);
        KeyCombiner::new().combine_public(&[public]).unwrap()
    }

    fn card(n: usize, winner: usize) -> (String, Vec<RawSelection>, RaceGroup) {
        let ids: Vec<String> = (0..2).map(|i| format!("R{}C{}", n, i)).collect();
        let selections = ids
            .iter()
            .enumerate()
            .map(|(i, id)| RawSelection::new(id.clone(), (i == winner) as u64))
            .collect();
        (
            format!("card{}", n),
            selections,
            RaceGroup::new(ids, Bounds::new(1, 1)),
        )
    }

    #[test]
    fn update_order_does_not_change_the_ballot_structure() {
        let pek = setup();

        let mut forward = PiecemealEncrypter::new(pek.clone());
        let mut backward = PiecemealEncrypter::new(pek.clone());

        for n in 0..4 {
            let (id, selections, group) = card(n, 0);
            forward.update(id, &selections, group).unwrap();
        }
        for n in (0..4).rev() {
            let (id, selections, group) = card(n, 0);
            backward.update(id, &selections, group).unwrap();
        }

        let a = forward.encrypted_ballot("bid", b"nonce").unwrap();
        let b = backward.encrypted_ballot("bid", b"nonce").unwrap();

        let order = |ballot: &WireBallot| {
            ballot
                .races
                .iter()
                .map(|r| r.selection.race_key())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&a), order(&b));

        // and both audit-decrypt to the same plaintexts
        let ra = forward.recent_random().unwrap();
        let rb = backward.recent_random().unwrap();
        let pa = BallotEncrypter::decrypt(&a, &ra, &pek).unwrap();
        let pb = BallotEncrypter::decrypt(&b, &rb, &pek).unwrap();
        assert_eq!(pa, pb);
    }

    #[test]
    fn updates_supersede_earlier_updates_for_the_same_card() {
        let pek = setup();
        let mut enc = PiecemealEncrypter::new(pek.clone());

        let (id, selections, group) = card(0, 0);
        enc.update(id, &selections, group).unwrap();
        // the voter changes their mind
        let (id, selections, group) = card(0, 1);
        enc.update(id, &selections, group).unwrap();

        let ballot = enc.encrypted_ballot("bid", b"nonce").unwrap();
        let random = enc.recent_random().unwrap();
        let plain = BallotEncrypter::decrypt(&ballot, &random, &pek).unwrap();
        assert_eq!(
            plain,
            vec![("R0C0".to_string(), 0), ("R0C1".to_string(), 1)]
        );
    }

    #[test]
    fn modes_are_mutually_exclusive_until_clear() {
        let pek = setup();
        let mut enc = PiecemealEncrypter::new(pek);

        let (id, selections, group) = card(0, 0);
        enc.update(id, &selections, group.clone()).unwrap();

        assert!(matches!(
            enc.update_plain("card1", &[RawSelection::new("X1", 1)]),
            Err(PiecemealError::Protocol(ProtocolError::MixedEncrypterModes))
        ));
        assert!(matches!(
            enc.plain_ballot(),
            Err(PiecemealError::Protocol(ProtocolError::MixedEncrypterModes))
        ));

        enc.clear().unwrap();
        enc.update_plain("card1", &[RawSelection::new("X1", 1)])
            .unwrap();
    }

    #[test]
    fn bad_updates_are_rejected_synchronously() {
        let pek = setup();
        let mut enc = PiecemealEncrypter::new(pek);

        let (_, _, group) = card(0, 0);
        // overvote
        let overvote = vec![
            RawSelection::new("R0C0", 1),
            RawSelection::new("R0C1", 1),
        ];
        assert!(matches!(
            enc.update("card0", &overvote, group.clone()),
            Err(PiecemealError::Ballot(BallotError::SelectionCountOutOfBounds))
        ));

        // missing candidate
        let missing = vec![RawSelection::new("R0C0", 1)];
        assert!(matches!(
            enc.update("card0", &missing, group),
            Err(PiecemealError::Ballot(BallotError::UnknownCandidate(_)))
        ));
    }

    #[test]
    fn plain_mode_assembles_in_canonical_order() {
        let pek = setup();
        let mut enc = PiecemealEncrypter::new(pek);

        enc.update_plain("card2", &[RawSelection::new("X2", 1)])
            .unwrap();
        enc.update_plain("card1", &[RawSelection::new("X1", 0)])
            .unwrap();

        let ballot = enc.plain_ballot().unwrap();
        let ids: Vec<_> = ballot.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["X1", "X2"]);
    }
}
