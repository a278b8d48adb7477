use crate::*;
use num_bigint::BigUint;
use num_traits::One;
use rand::{CryptoRng, RngCore};
use uuid::Uuid;

/// The group an election runs over: a safe prime `p`, a generator `g` of
/// the order-`q` subgroup (`q = (p - 1) / 2`), and the message base `f`
/// used to encode vote counts in the exponent.
///
/// Chosen once per election and shared by every key derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParameters {
    pub p: BigUint,
    pub g: ModInt,
    pub f: ModInt,
}

impl KeyParameters {
    /// Generates fresh parameters with a `bits`-bit safe prime. Squaring a
    /// random element lands `g` in the quadratic-residue subgroup.
    pub fn generate(bits: u64, rng: &mut (impl RngCore + CryptoRng)) -> KeyParameters {
        let p = safe_prime(bits, rng);
        let q = (&p - BigUint::one()) >> 1;
        let one = ModInt::from_u64(1, &p);

        let mut t = ModInt::random(&p, rng);
        while t <= one {
            t = ModInt::random(&p, rng);
        }
        let g = t.pow_u64(2);

        let mut a = ModInt::random(&q, rng);
        while a <= ModInt::from_u64(1, &q) {
            a = ModInt::random(&q, rng);
        }
        let f = g.pow(&a);

        KeyParameters { p, g, f }
    }

    pub fn q(&self) -> BigUint {
        (&self.p - BigUint::one()) >> 1
    }
}

/// One trustee's public key share: the group parameters plus the trustee's
/// public value `h_i = g^{x_i}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyShare {
    pub trustee_id: Uuid,
    pub p: BigUint,
    pub g: ModInt,
    pub f: ModInt,
    pub h: ModInt,
}

/// One trustee's secret exponent `x_i`. Never transmitted; only combined
/// at final-tally time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKeyShare {
    pub trustee_id: Uuid,
    pub p: BigUint,
    pub g: ModInt,
    pub f: ModInt,
    pub x: ModInt,
}

impl PrivateKeyShare {
    /// This trustee's partial decryption of a ciphertext: `G^{x_i}`.
    /// Partials from all trustees multiply into the full `G^x`.
    pub fn partial_decrypt(&self, ciphertext: &Ciphertext) -> ModInt {
        ciphertext.g().pow(&self.x)
    }
}

/// Generates a key pair for one trustee: `x` drawn uniformly from `Z_q`,
/// `h = g^x`.
pub fn generate_key_share(
    params: &KeyParameters,
    rng: &mut (impl RngCore + CryptoRng),
) -> (PublicKeyShare, PrivateKeyShare) {
    let trustee_id = Uuid::new_v4();
    let x = ModInt::random(&params.q(), rng);
    let h = params.g.pow(&x);

    let public = PublicKeyShare {
        trustee_id,
        p: params.p.clone(),
        g: params.g.clone(),
        f: params.f.clone(),
        h,
    };
    let private = PrivateKeyShare {
        trustee_id,
        p: params.p.clone(),
        g: params.g.clone(),
        f: params.f.clone(),
        x,
    };
    (public, private)
}

/// The combined election public key, `h = Π h_i`. Every ballot is
/// encrypted under this key and carries a copy of it for the tallier's
/// mismatch check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionPublicKey {
    pub p: BigUint,
    pub g: ModInt,
    pub h: ModInt,
    pub f: ModInt,
}

impl ElectionPublicKey {
    pub fn q(&self) -> BigUint {
        (&self.p - BigUint::one()) >> 1
    }
}

/// The combined private exponent `x = Σ x_i (mod q)`. Exists only at
/// final-tally time.
#[derive(Debug, Clone)]
pub struct CombinedPrivateKey {
    pub p: BigUint,
    pub g: ModInt,
    pub f: ModInt,
    pub x: ModInt,
}

/// Key-storage collaborator. File formats and directory layout live
/// outside this crate; tests use [`MemKeyStore`].
pub trait KeyStore {
    fn load_public_shares(&self) -> Result<Vec<PublicKeyShare>, ConfigError>;
    fn load_private_shares(&self) -> Result<Vec<PrivateKeyShare>, ConfigError>;
}

/// In-memory key store.
#[derive(Debug, Clone, Default)]
pub struct MemKeyStore {
    pub public_shares: Vec<PublicKeyShare>,
    pub private_shares: Vec<PrivateKeyShare>,
}

impl KeyStore for MemKeyStore {
    fn load_public_shares(&self) -> Result<Vec<PublicKeyShare>, ConfigError> {
        if self.public_shares.is_empty() {
            return Err(ConfigError::KeyNotLoaded);
        }
        Ok(self.public_shares.clone())
    }

    fn load_private_shares(&self) -> Result<Vec<PrivateKeyShare>, ConfigError> {
        if self.private_shares.is_empty() {
            return Err(ConfigError::KeyNotLoaded);
        }
        Ok(self.private_shares.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_shares_agree_with_parameters() {
        let mut rng = rand::thread_rng();
        let params = KeyParameters::generate(64, &mut rng);
        let (public, private) = generate_key_share(&params, &mut rng);

        assert_eq!(public.trustee_id, private.trustee_id);
        assert_eq!(public.p, params.p);
        assert_eq!(public.h, params.g.pow(&private.x));
    }

    #[test]
    fn partial_decryptions_multiply_into_the_combined_mask() {
        let mut rng = rand::thread_rng();
        let params = KeyParameters::generate(64, &mut rng);
        let shares: Vec<_> = (0..3).map(|_| generate_key_share(&params, &mut rng)).collect();
        let public: Vec<_> = shares.iter().map(|(p, _)| p.clone()).collect();
        let private: Vec<_> = shares.iter().map(|(_, s)| s.clone()).collect();

        let combiner = KeyCombiner::new();
        let pek = combiner.combine_public(&public).unwrap();
        let sk = combiner.combine_private(&pek, &private).unwrap();

        let ct = Ciphertext::encrypt(&pek, 1, &mut rng);
        let mut mask = ModInt::from_u64(1, &pek.p);
        for share in &private {
            mask = mask.mul(&share.partial_decrypt(&ct));
        }
        assert_eq!(mask, ct.g().pow(&sk.x));
    }

    #[test]
    fn empty_store_reports_missing_keys() {
        let store = MemKeyStore::default();
        assert!(matches!(
            store.load_public_shares(),
            Err(ConfigError::KeyNotLoaded)
        ));
    }
}
