use crate::*;
use rand::{CryptoRng, RngCore};

/// One race's encrypted selections: an ordered vector of candidate ids and
/// the ciphertext of each candidate's 0/1 counter. The two vectors line up
/// index-for-index and their shared order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceSelection {
    candidate_ids: Vec<String>,
    ciphertexts: Vec<Ciphertext>,
}

impl RaceSelection {
    pub fn new(
        candidate_ids: Vec<String>,
        ciphertexts: Vec<Ciphertext>,
    ) -> Result<RaceSelection, BallotError> {
        if candidate_ids.is_empty() || candidate_ids.len() != ciphertexts.len() {
            return Err(BallotError::ShapeMismatch);
        }
        Ok(RaceSelection {
            candidate_ids,
            ciphertexts,
        })
    }

    pub fn candidate_ids(&self) -> &[String] {
        &self.candidate_ids
    }

    pub fn ciphertexts(&self) -> &[Ciphertext] {
        &self.ciphertexts
    }

    /// Canonical race-group identity: the comma-joined candidate ids.
    pub fn race_key(&self) -> String {
        self.candidate_ids.join(",")
    }

    /// The homomorphic sum of this race's ciphertexts, the subject of the
    /// race-sum proof.
    pub fn sum_ciphertext(&self, public_key: &ElectionPublicKey) -> Ciphertext {
        self.ciphertexts
            .iter()
            .fold(Ciphertext::identity(&public_key.p), |acc, ct| acc.operate(ct))
    }

    /// Component-wise homomorphic combination with another selection for
    /// the same race. The candidate vectors must match exactly.
    pub fn operate(&self, other: &RaceSelection) -> Result<RaceSelection, BallotError> {
        if self.candidate_ids != other.candidate_ids {
            return Err(BallotError::ShapeMismatch);
        }
        let ciphertexts = self
            .ciphertexts
            .iter()
            .zip(other.ciphertexts.iter())
            .map(|(a, b)| a.operate(b))
            .collect();
        Ok(RaceSelection {
            candidate_ids: self.candidate_ids.clone(),
            ciphertexts,
        })
    }

    /// Gross-shape validation of a wire selection.
    pub fn validate(&self, public_key: &ElectionPublicKey) -> Result<(), BallotError> {
        if self.candidate_ids.is_empty() || self.candidate_ids.len() != self.ciphertexts.len() {
            return Err(BallotError::ShapeMismatch);
        }
        for ciphertext in &self.ciphertexts {
            ciphertext.validate(&public_key.p)?;
        }
        Ok(())
    }
}

/// Proof of race validity: each ciphertext encrypts 0 or 1, and the number
/// of 1s across the race lies within the race bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceProof {
    candidate_proofs: Vec<MembershipProof>,
    sum_proof: MembershipProof,
}

impl RaceProof {
    /// Builds the proof at encryption time. Every ciphertext must still
    /// carry its randomness; the race's summed randomness backs the
    /// sum-in-range proof.
    pub fn compute(
        selection: &RaceSelection,
        public_key: &ElectionPublicKey,
        plaintexts: &[u64],
        bounds: Bounds,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<RaceProof, BallotError> {
        if plaintexts.len() != selection.ciphertexts.len() {
            return Err(BallotError::ShapeMismatch);
        }

        let mut candidate_proofs = Vec::with_capacity(plaintexts.len());
        for (ciphertext, plaintext) in selection.ciphertexts.iter().zip(plaintexts) {
            let r = ciphertext
                .randomness()
                .ok_or(BallotError::BadCiphertext)?
                .clone();
            candidate_proofs.push(MembershipProof::compute(
                ciphertext,
                public_key,
                *plaintext,
                &r,
                &[0, 1],
                rng,
            )?);
        }

        let selected: u64 = plaintexts.iter().sum();
        if !bounds.contains(selected) {
            return Err(BallotError::SelectionCountOutOfBounds);
        }

        let sum_ciphertext = selection.sum_ciphertext(public_key);
        let sum_r = sum_ciphertext
            .randomness()
            .ok_or(BallotError::BadCiphertext)?
            .clone();
        let sum_proof = MembershipProof::compute(
            &sum_ciphertext,
            public_key,
            selected,
            &sum_r,
            &bounds.domain(),
            rng,
        )?;

        Ok(RaceProof {
            candidate_proofs,
            sum_proof,
        })
    }

    /// A race verifies iff every per-candidate proof verifies and the
    /// sum proof verifies against the ciphertext product.
    pub fn verify(
        &self,
        selection: &RaceSelection,
        public_key: &ElectionPublicKey,
        bounds: Bounds,
    ) -> bool {
        if self.candidate_proofs.len() != selection.ciphertexts.len() {
            return false;
        }
        for (proof, ciphertext) in self.candidate_proofs.iter().zip(selection.ciphertexts()) {
            if !proof.verify(ciphertext, public_key, &[0, 1]) {
                return false;
            }
        }
        let sum = selection.sum_ciphertext(public_key);
        self.sum_proof.verify(&sum, public_key, &bounds.domain())
    }

    pub fn sum_proof(&self) -> &MembershipProof {
        &self.sum_proof
    }
}

/// Encrypts one race: a ciphertext per candidate, fresh randomness each,
/// plus the race proof.
pub fn encrypt_race(
    candidate_ids: Vec<String>,
    plaintexts: &[u64],
    public_key: &ElectionPublicKey,
    bounds: Bounds,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<(RaceSelection, RaceProof), BallotError> {
    if candidate_ids.len() != plaintexts.len() {
        return Err(BallotError::ShapeMismatch);
    }
    let ciphertexts = plaintexts
        .iter()
        .map(|m| Ciphertext::encrypt(public_key, *m, rng))
        .collect();
    let selection = RaceSelection::new(candidate_ids, ciphertexts)?;
    let proof = RaceProof::compute(&selection, public_key, plaintexts, bounds, rng)?;
    Ok((selection, proof))
}
