use crate::*;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Derives the effective election keys from per-trustee shares.
///
/// The combined public key is memoized for the lifetime of the combiner,
/// keyed by a fingerprint of the input share set. Recomputing it must
/// produce the identical key: any divergence means the trustee key material
/// changed mid-election, which is a protocol-fatal configuration fault and
/// not something to retry.
///
/// One combiner instance belongs to one election context (a booth or a
/// tallier); there is no process-global cache. The first combination should
/// happen during election setup so later concurrent reads hit the cache.
#[derive(Debug, Default)]
pub struct KeyCombiner {
    cached: OnceLock<CachedKey>,
}

#[derive(Debug)]
struct CachedKey {
    fingerprint: [u8; 32],
    key: ElectionPublicKey,
}

impl KeyCombiner {
    pub fn new() -> KeyCombiner {
        KeyCombiner::default()
    }

    /// Multiplies the trustee public values into the combined election key
    /// `h = Π h_i`.
    pub fn combine_public(&self, shares: &[PublicKeyShare]) -> Result<ElectionPublicKey, ConfigError> {
        let first = shares.first().ok_or(ConfigError::NoKeyShares)?;
        for share in shares {
            if share.p != first.p || share.g != first.g || share.f != first.f {
                return Err(ConfigError::ShareSetMismatch);
            }
        }

        let mut h = ModInt::from_u64(1, &first.p);
        for share in shares {
            h = h.mul(&share.h);
        }
        let key = ElectionPublicKey {
            p: first.p.clone(),
            g: first.g.clone(),
            h,
            f: first.f.clone(),
        };
        let fingerprint = fingerprint(shares, &key);

        match self.cached.get() {
            Some(cached) => {
                if cached.fingerprint != fingerprint || cached.key != key {
                    return Err(ConfigError::CombinedKeyDrift);
                }
            }
            None => {
                // a concurrent first computation may win the race; the
                // equality check below catches a conflicting winner
                let _ = self.cached.set(CachedKey { fingerprint, key: key.clone() });
                let cached = self.cached.get().ok_or(ConfigError::CombinedKeyDrift)?;
                if cached.key != key {
                    return Err(ConfigError::CombinedKeyDrift);
                }
            }
        }
        Ok(key)
    }

    /// Sums the trustee secret exponents into the combined private key
    /// `x = Σ x_i (mod q)`. Only ever invoked at tally time.
    pub fn combine_private(
        &self,
        public_key: &ElectionPublicKey,
        shares: &[PrivateKeyShare],
    ) -> Result<CombinedPrivateKey, ConfigError> {
        if shares.is_empty() {
            return Err(ConfigError::NoKeyShares);
        }
        for share in shares {
            if share.p != public_key.p || share.g != public_key.g || share.f != public_key.f {
                return Err(ConfigError::ShareSetMismatch);
            }
        }

        let q = public_key.q();
        let mut x = ModInt::from_u64(0, &q);
        for share in shares {
            x = x.add(&share.x);
        }

        // the summed exponent must reproduce the combined public value
        if public_key.g.pow(&x) != public_key.h {
            return Err(ConfigError::PrivateShareMismatch);
        }

        Ok(CombinedPrivateKey {
            p: public_key.p.clone(),
            g: public_key.g.clone(),
            f: public_key.f.clone(),
            x,
        })
    }
}

fn fingerprint(shares: &[PublicKeyShare], key: &ElectionPublicKey) -> [u8; 32] {
    let mut ids: Vec<_> = shares.iter().map(|s| s.trustee_id).collect();
    ids.sort();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
    }
    hasher.update(key.p.to_bytes_be());
    hasher.update(key.g.value().to_bytes_be());
    hasher.update(key.h.value().to_bytes_be());
    hasher.update(key.f.value().to_bytes_be());

    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
