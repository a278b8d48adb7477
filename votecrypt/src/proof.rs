use crate::*;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

/// Non-interactive zero-knowledge proof that the plaintext under a
/// ciphertext lies in a small finite domain, without revealing which
/// member it is.
///
/// For a ciphertext `⟨G, H⟩ = ⟨g^r, h^r f^m⟩` and domain `{d_1, …, d_n}`
/// this is the standard OR-composition: the prover builds a fake
/// commitment for every domain member except the real one, picks the real
/// commitment `y = g^t, z = h^t`, derives the challenge by Fiat–Shamir as
/// `c = SHA-256(g ‖ h ‖ G ‖ H ‖ y_1 ‖ z_1 ‖ …) mod q`, and back-solves the
/// real challenge share `c_x = c − Σ c_i` and response `s_x = c_x·r + t`.
/// The verifier recomputes every commitment from `(s_i, c_i)` and checks
/// that the challenge shares sum to the recomputed hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipProof {
    y: Vec<ModInt>,
    z: Vec<ModInt>,
    s: Vec<ModInt>,
    c: Vec<ModInt>,
}

impl MembershipProof {
    /// Proves `plaintext ∈ domain` for a ciphertext whose randomness the
    /// caller owns. Fails if the plaintext is not actually in the domain:
    /// an honest booth cannot build that proof.
    pub fn compute(
        ciphertext: &Ciphertext,
        public_key: &ElectionPublicKey,
        plaintext: u64,
        randomness: &ModInt,
        domain: &[u64],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<MembershipProof, BallotError> {
        let q = public_key.q();
        let g = &public_key.g;
        let h = &public_key.h;
        let f = &public_key.f;
        let big_g = ciphertext.g();
        let big_h = ciphertext.h();

        let t = ModInt::random(&q, rng);

        let mut transcript = String::new();
        push_transcript(&mut transcript, &[g, h, big_g, big_h]);

        let mut y = Vec::with_capacity(domain.len());
        let mut z = Vec::with_capacity(domain.len());
        let mut s = Vec::with_capacity(domain.len());
        let mut c = Vec::with_capacity(domain.len());
        let mut real_index = None;

        for d in domain {
            let (yi, zi) = if *d == plaintext && real_index.is_none() {
                real_index = Some(y.len());
                s.push(ModInt::from_u64(0, &q));
                c.push(ModInt::from_u64(0, &q));
                (g.pow(&t), h.pow(&t))
            } else {
                let si = ModInt::random(&q, rng);
                let ci = ModInt::random(&q, rng);
                let neg_ci = ci.neg();
                let fpow = f.pow_u64(*d);
                let masked = big_h.div(&fpow).ok_or(BallotError::BadCiphertext)?;
                let yi = g.pow(&si).mul(&big_g.pow(&neg_ci));
                let zi = h.pow(&si).mul(&masked.pow(&neg_ci));
                s.push(si);
                c.push(ci);
                (yi, zi)
            };
            push_transcript(&mut transcript, &[&yi, &zi]);
            y.push(yi);
            z.push(zi);
        }

        let real_index = real_index.ok_or(BallotError::SelectionCountOutOfBounds)?;

        let mut real_c = challenge(&transcript, &q);
        for fake in &c {
            real_c = real_c.sub(fake);
        }
        s[real_index] = real_c.mul(randomness).add(&t);
        c[real_index] = real_c;

        Ok(MembershipProof { y, z, s, c })
    }

    /// Pure verification against a ciphertext, public key and domain.
    /// Rejects proofs built for a different key or a different domain.
    pub fn verify(
        &self,
        ciphertext: &Ciphertext,
        public_key: &ElectionPublicKey,
        domain: &[u64],
    ) -> bool {
        if self.s.len() != domain.len() || self.c.len() != domain.len() {
            return false;
        }

        let q = public_key.q();
        let g = &public_key.g;
        let h = &public_key.h;
        let f = &public_key.f;
        let big_g = ciphertext.g();
        let big_h = ciphertext.h();

        let mut transcript = String::new();
        push_transcript(&mut transcript, &[g, h, big_g, big_h]);

        let mut c_sum = ModInt::from_u64(0, &q);

        for (i, d) in domain.iter().enumerate() {
            // renormalize wire values into Z_q before using them
            let si = ModInt::new(self.s[i].value().clone(), &q);
            let ci = ModInt::new(self.c[i].value().clone(), &q);
            let neg_ci = ci.neg();

            let fpow = f.pow_u64(*d);
            let masked = match big_h.div(&fpow) {
                Some(masked) => masked,
                None => return false,
            };

            let yi = g.pow(&si).mul(&big_g.pow(&neg_ci));
            let zi = h.pow(&si).mul(&masked.pow(&neg_ci));

            c_sum = c_sum.add(&ci);
            push_transcript(&mut transcript, &[&yi, &zi]);
        }

        c_sum == challenge(&transcript, &q)
    }
}

fn push_transcript(transcript: &mut String, values: &[&ModInt]) {
    for value in values {
        transcript.push_str(&value.to_string());
    }
}

fn challenge(transcript: &str, q: &BigUint) -> ModInt {
    let digest = Sha256::digest(transcript.as_bytes());
    ModInt::new(BigUint::from_bytes_be(&digest), q)
}

/// The `[min, max]` selection bound of a race. The bound of a homomorphic
/// sum is the component-wise sum of the operands' bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

impl Bounds {
    pub fn new(min: u64, max: u64) -> Bounds {
        Bounds { min, max }
    }

    pub fn domain(&self) -> Vec<u64> {
        (self.min..=self.max).collect()
    }

    pub fn contains(&self, n: u64) -> bool {
        self.min <= n && n <= self.max
    }

    pub fn operate(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: self.min + other.min,
            max: self.max + other.max,
        }
    }
}

/// Aggregate range proof over a homomorphic total.
///
/// A Fiat–Shamir membership proof cannot be merged algebraically by a
/// party that does not know the combined randomness, and the tallier never
/// learns it. Combination is therefore aggregation: each component keeps
/// its own sum-ciphertext, membership proof and bounds, `operate`
/// concatenates them, and the aggregate verifies a claimed total iff every
/// component proof verifies and the component product equals the total.
/// That establishes "between Σmin and Σmax selections were made" without
/// decrypting anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumProof {
    components: Vec<SumComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SumComponent {
    ciphertext: Ciphertext,
    proof: MembershipProof,
    bounds: Bounds,
}

impl SumProof {
    /// A one-ballot aggregate: the race's summed ciphertext and its
    /// sum-in-range proof.
    pub fn single(ciphertext: &Ciphertext, proof: MembershipProof, bounds: Bounds) -> SumProof {
        SumProof {
            components: vec![SumComponent {
                ciphertext: ciphertext.strip_randomness(),
                proof,
                bounds,
            }],
        }
    }

    pub fn operate(&self, other: &SumProof) -> SumProof {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        SumProof { components }
    }

    /// The range statement this aggregate makes about the total.
    pub fn bounds(&self) -> Bounds {
        self.components
            .iter()
            .fold(Bounds::new(0, 0), |acc, c| acc.operate(&c.bounds))
    }

    /// Verifies the aggregate against a claimed total ciphertext.
    pub fn verify(&self, total: &Ciphertext, public_key: &ElectionPublicKey) -> bool {
        let product = self
            .components
            .iter()
            .fold(Ciphertext::identity(&public_key.p), |acc, c| {
                acc.operate(&c.ciphertext)
            });
        if product != *total {
            return false;
        }
        self.components
            .iter()
            .all(|c| c.proof.verify(&c.ciphertext, public_key, &c.bounds.domain()))
    }
}
