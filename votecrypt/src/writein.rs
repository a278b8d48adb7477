use crate::*;
use aes_gcm::aead::{Aead, NewAead};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use num_bigint::BigUint;
use num_traits::{CheckedSub, One};
use rand::{CryptoRng, RngCore};

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

/// Write-in candidate names sealed under a fresh AES-256-GCM key.
///
/// The AES key rides along with the ballot, encrypted under the election
/// key without the homomorphic exponent mapping. Because the key may be
/// wider than the election modulus, it is split into chunks small enough
/// to be group elements and each chunk is encrypted separately (offset by
/// one so no chunk is the zero element).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedWriteIns {
    sealed_key: Vec<Ciphertext>,
    entries: Vec<SealedWriteIn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedWriteIn {
    pub candidate_id: String,

    #[serde(with = "hex_serde")]
    nonce: Vec<u8>,

    #[serde(with = "hex_serde")]
    body: Vec<u8>,
}

/// Bytes per key chunk so every chunk value stays below the modulus.
fn chunk_bytes(p: &BigUint) -> usize {
    (((p.bits() - 1) / 8).max(1)) as usize
}

/// Seals `(candidate_id, name)` write-ins under a fresh key.
pub fn seal_writeins(
    writeins: &[(String, String)],
    public_key: &ElectionPublicKey,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<SealedWriteIns, BallotError> {
    let mut key_bytes = [0u8; KEY_BYTES];
    rng.fill_bytes(&mut key_bytes);
    let cipher = Aes256Gcm::new(Key::from_slice(&key_bytes));

    let mut entries = Vec::with_capacity(writeins.len());
    for (candidate_id, name) in writeins {
        let mut nonce = [0u8; NONCE_BYTES];
        rng.fill_bytes(&mut nonce);
        let body = cipher
            .encrypt(Nonce::from_slice(&nonce), name.as_bytes())
            .map_err(|_| BallotError::WriteIn)?;
        entries.push(SealedWriteIn {
            candidate_id: candidate_id.clone(),
            nonce: nonce.to_vec(),
            body,
        });
    }

    let chunk = chunk_bytes(&public_key.p);
    let sealed_key = key_bytes
        .chunks(chunk)
        .map(|part| {
            let m = BigUint::from_bytes_be(part) + BigUint::one();
            Ciphertext::encrypt_no_homo(public_key, &m, rng)
        })
        .collect();

    Ok(SealedWriteIns {
        sealed_key,
        entries,
    })
}

impl SealedWriteIns {
    /// Recovers the AES key with the combined private key and opens every
    /// sealed name. Only meaningful after the election, alongside the
    /// final decryption.
    pub fn open(&self, key: &CombinedPrivateKey, p: &BigUint) -> Result<Vec<(String, String)>, BallotError> {
        let chunk = chunk_bytes(p);
        let mut key_bytes = Vec::with_capacity(KEY_BYTES);
        let mut remaining = KEY_BYTES;
        for sealed in &self.sealed_key {
            let value = sealed.decrypt_value(key)?;
            let value = value
                .checked_sub(&BigUint::one())
                .ok_or(BallotError::WriteIn)?;
            let expect = remaining.min(chunk);
            let bytes = value.to_bytes_be();
            if bytes.len() > expect {
                return Err(BallotError::WriteIn);
            }
            key_bytes.extend(std::iter::repeat(0u8).take(expect - bytes.len()));
            key_bytes.extend(bytes);
            remaining -= expect;
        }
        if key_bytes.len() != KEY_BYTES {
            return Err(BallotError::WriteIn);
        }

        let cipher = Aes256Gcm::new(Key::from_slice(&key_bytes));
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let name = cipher
                .decrypt(Nonce::from_slice(&entry.nonce), entry.body.as_slice())
                .map_err(|_| BallotError::WriteIn)?;
            let name = String::from_utf8(name).map_err(|_| BallotError::WriteIn)?;
            out.push((entry.candidate_id.clone(), name));
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
