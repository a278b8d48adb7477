use crate::*;
use num_bigint::BigUint;
use num_traits::One;
use rand::{CryptoRng, RngCore};

/// Exponential-ElGamal ciphertext `⟨G, H⟩ = ⟨g^r, h^r · f^m⟩` over `Z_p`.
///
/// The randomness `r` is known only to the encrypting party. It is carried
/// in memory so proofs can be computed and audit disclosures assembled, but
/// it is skipped by serde: the only way `r` leaves the process is inside an
/// explicit [`BallotRandomness`] disclosure after a challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ciphertext {
    g: ModInt,
    h: ModInt,
    #[serde(skip)]
    r: Option<ModInt>,
}

impl Ciphertext {
    /// Builds a ciphertext from received components. No randomness is
    /// attached; wire ciphertexts never carry one.
    pub fn from_parts(g: ModInt, h: ModInt) -> Ciphertext {
        Ciphertext { g, h, r: None }
    }

    /// The multiplicative identity `⟨1, 1⟩` with zero randomness, usable
    /// as the seed of a homomorphic fold.
    pub fn identity(p: &BigUint) -> Ciphertext {
        let q = (p - BigUint::one()) >> 1;
        Ciphertext {
            g: ModInt::from_u64(1, p),
            h: ModInt::from_u64(1, p),
            r: Some(ModInt::from_u64(0, &q)),
        }
    }

    /// Encrypts a vote counter (0 or 1, larger values occur only in
    /// tests of the sum domain) with fresh randomness from `rng`.
    pub fn encrypt(
        public_key: &ElectionPublicKey,
        m: u64,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Ciphertext {
        let r = ModInt::random(&public_key.q(), rng);
        Ciphertext::encrypt_with_randomness(public_key, m, r)
    }

    /// Deterministic encryption with caller-supplied randomness.
    pub fn encrypt_with_randomness(
        public_key: &ElectionPublicKey,
        m: u64,
        r: ModInt,
    ) -> Ciphertext {
        let g = public_key.g.pow(&r);
        let h = public_key.h.pow(&r).mul(&public_key.f.pow_u64(m));
        Ciphertext { g, h, r: Some(r) }
    }

    /// Encrypts an arbitrary group element without the `f^m` exponent
    /// mapping. Used for values that are never homomorphically tallied,
    /// such as the sealed write-in key.
    pub fn encrypt_no_homo(
        public_key: &ElectionPublicKey,
        m: &BigUint,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Ciphertext {
        let r = ModInt::random(&public_key.q(), rng);
        let g = public_key.g.pow(&r);
        let h = public_key
            .h
            .pow(&r)
            .mul(&ModInt::new(m.clone(), &public_key.p));
        Ciphertext { g, h, r: Some(r) }
    }

    pub fn g(&self) -> &ModInt {
        &self.g
    }

    pub fn h(&self) -> &ModInt {
        &self.h
    }

    pub fn randomness(&self) -> Option<&ModInt> {
        self.r.as_ref()
    }

    pub fn strip_randomness(&self) -> Ciphertext {
        Ciphertext {
            g: self.g.clone(),
            h: self.h.clone(),
            r: None,
        }
    }

    /// Component-wise product of two ciphertexts; decrypts to the sum of
    /// the operands' plaintexts. Associative and commutative. Randomness
    /// combines additively when both sides own it.
    pub fn operate(&self, other: &Ciphertext) -> Ciphertext {
        let r = match (&self.r, &other.r) {
            (Some(a), Some(b)) => Some(a.add(b)),
            _ => None,
        };
        Ciphertext {
            g: self.g.mul(&other.g),
            h: self.h.mul(&other.h),
            r,
        }
    }

    /// Gross-shape check for wire ciphertexts: both components must be
    /// nonzero residues of the election modulus.
    pub fn validate(&self, p: &BigUint) -> Result<(), BallotError> {
        let in_group = |c: &ModInt| !c.is_zero() && c.value() < p;
        if in_group(&self.g) && in_group(&self.h) {
            Ok(())
        } else {
            Err(BallotError::BadCiphertext)
        }
    }

    /// Full decryption with the combined private key, finished by a
    /// bounded discrete-log search: finds `m ∈ [0, max]` with `f^m = H/G^x`.
    pub fn decrypt(&self, key: &CombinedPrivateKey, max: u64) -> Result<u64, CryptoError> {
        let target = self.intermediate(&self.g.pow(&key.x))?;
        for m in 0..=max {
            if key.f.pow_u64(m) == target {
                return Ok(m);
            }
        }
        Err(CryptoError::SearchSpaceExhausted)
    }

    /// Decrypts a single-bit ciphertext with the combined private key.
    pub fn decrypt_bit(&self, key: &CombinedPrivateKey) -> Result<u64, CryptoError> {
        let target = self.intermediate(&self.g.pow(&key.x))?;
        map_bit(&target, &key.f)
    }

    /// Recovers the raw group element of a non-homomorphic encryption.
    pub fn decrypt_value(&self, key: &CombinedPrivateKey) -> Result<BigUint, CryptoError> {
        Ok(self.intermediate(&self.g.pow(&key.x))?.value().clone())
    }

    /// Audit-path decryption from disclosed randomness instead of the
    /// private key: first confirms `g^r = G`, then maps `H / h^r`.
    pub fn audit_decrypt_bit(
        &self,
        public_key: &ElectionPublicKey,
        r: &ModInt,
    ) -> Result<u64, CryptoError> {
        if public_key.g.pow(r) != self.g {
            return Err(CryptoError::RandomnessMismatch);
        }
        let target = self.intermediate(&public_key.h.pow(r))?;
        map_bit(&target, &public_key.f)
    }

    fn intermediate(&self, mask: &ModInt) -> Result<ModInt, CryptoError> {
        self.h.div(mask).ok_or(CryptoError::NotInvertible)
    }
}

/// `1 → 0`, `f → 1`; anything else is a tamper or wrong-key signal and is
/// never silently mapped to a bit.
fn map_bit(target: &ModInt, f: &ModInt) -> Result<u64, CryptoError> {
    if target.value().is_one() {
        Ok(0)
    } else if target == f {
        Ok(1)
    } else {
        Err(CryptoError::UnexpectedIntermediateValue)
    }
}

impl PartialEq for Ciphertext {
    fn eq(&self, other: &Ciphertext) -> bool {
        // randomness is bookkeeping, not part of the ciphertext value
        self.g == other.g && self.h == other.h
    }
}

impl Eq for Ciphertext {}
