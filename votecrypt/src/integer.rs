use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Arbitrary-precision integer paired with its modulus.
///
/// All ciphertext and key arithmetic in this crate happens on `ModInt`s. A
/// modulus of zero means the value is a plain (non-modular) integer, which
/// is only used for small domain members and intermediate constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModInt {
    value: BigUint,
    modulus: BigUint,
}

impl ModInt {
    /// Wraps `value` into the group of `modulus`, reducing it first. A
    /// zero modulus yields a plain integer.
    pub fn new(value: BigUint, modulus: &BigUint) -> ModInt {
        if modulus.is_zero() {
            return ModInt::plain(value);
        }
        ModInt {
            value: value % modulus,
            modulus: modulus.clone(),
        }
    }

    /// A plain integer with no modulus attached.
    pub fn plain(value: BigUint) -> ModInt {
        ModInt {
            value,
            modulus: BigUint::zero(),
        }
    }

    pub fn from_u64(value: u64, modulus: &BigUint) -> ModInt {
        ModInt::new(BigUint::from(value), modulus)
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    fn modular(&self) -> bool {
        !self.modulus.is_zero()
    }

    /// `self + b`, reduced when a modulus is attached. The result carries
    /// the receiver's modulus.
    pub fn add(&self, b: &ModInt) -> ModInt {
        let mut sum = &self.value + &b.value;
        if self.modular() {
            sum %= &self.modulus;
        }
        ModInt {
            value: sum,
            modulus: self.modulus.clone(),
        }
    }

    /// Additive inverse: `modulus - value` in a group, plain negation is
    /// not representable and maps to zero only for zero.
    pub fn neg(&self) -> ModInt {
        let value = if self.modular() && !self.value.is_zero() {
            &self.modulus - &self.value
        } else {
            BigUint::zero()
        };
        ModInt {
            value,
            modulus: self.modulus.clone(),
        }
    }

    /// `self - b`, implemented as addition of the additive inverse so the
    /// result stays in the group.
    pub fn sub(&self, b: &ModInt) -> ModInt {
        if self.modular() {
            let b = ModInt::new(b.value.clone(), &self.modulus);
            self.add(&b.neg())
        } else {
            // plain subtraction saturates at zero; callers never subtract
            // below zero outside a group
            let value = if self.value >= b.value {
                &self.value - &b.value
            } else {
                BigUint::zero()
            };
            ModInt::plain(value)
        }
    }

    pub fn mul(&self, b: &ModInt) -> ModInt {
        let mut product = &self.value * &b.value;
        if self.modular() {
            product %= &self.modulus;
        }
        ModInt {
            value: product,
            modulus: self.modulus.clone(),
        }
    }

    /// Multiplicative inverse in the group, `None` when the value shares a
    /// factor with the modulus (a malformed wire value).
    pub fn inverse(&self) -> Option<ModInt> {
        if !self.modular() || self.value.is_zero() {
            return None;
        }
        let a = BigInt::from(self.value.clone());
        let m = BigInt::from(self.modulus.clone());
        let ext = a.extended_gcd(&m);
        if !ext.gcd.is_one() {
            return None;
        }
        let inv = ext.x.mod_floor(&m).to_biguint()?;
        Some(ModInt {
            value: inv,
            modulus: self.modulus.clone(),
        })
    }

    /// `self / b` via the modular inverse of `b`.
    pub fn div(&self, b: &ModInt) -> Option<ModInt> {
        let b = ModInt::new(b.value.clone(), &self.modulus);
        Some(self.mul(&b.inverse()?))
    }

    /// `self ^ exponent`. Only the exponent's value is used; in a group
    /// this is a modular exponentiation.
    pub fn pow(&self, exponent: &ModInt) -> ModInt {
        if self.modular() {
            ModInt {
                value: self.value.modpow(&exponent.value, &self.modulus),
                modulus: self.modulus.clone(),
            }
        } else {
            ModInt::plain(pow_plain(&self.value, &exponent.value))
        }
    }

    pub fn pow_u64(&self, exponent: u64) -> ModInt {
        self.pow(&ModInt::plain(BigUint::from(exponent)))
    }

    /// Uniform sample from `[0, bound)`, carrying `bound` as its modulus.
    pub fn random(bound: &BigUint, rng: &mut (impl RngCore + CryptoRng)) -> ModInt {
        ModInt {
            value: rng.gen_biguint_below(bound),
            modulus: bound.clone(),
        }
    }
}

impl PartialEq for ModInt {
    fn eq(&self, other: &ModInt) -> bool {
        self.value == other.value
    }
}

impl Eq for ModInt {}

impl PartialOrd for ModInt {
    fn partial_cmp(&self, other: &ModInt) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModInt {
    fn cmp(&self, other: &ModInt) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl Hash for ModInt {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl fmt::Display for ModInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

fn pow_plain(base: &BigUint, exponent: &BigUint) -> BigUint {
    let mut result = BigUint::one();
    let mut base = base.clone();
    let mut exp = exponent.clone();
    while !exp.is_zero() {
        if exp.is_odd() {
            result *= &base;
        }
        base = &base * &base;
        exp >>= 1;
    }
    result
}

/// Returns a probable safe prime `p` (both `p` and `(p - 1) / 2` prime)
/// with the requested bit length.
pub fn safe_prime(bits: u64, rng: &mut (impl RngCore + CryptoRng)) -> BigUint {
    let one = BigUint::one();
    loop {
        let q = probable_prime(bits - 1, rng);
        let p = (&q << 1) + &one;
        if is_probable_prime(&p, 40, rng) {
            return p;
        }
    }
}

fn probable_prime(bits: u64, rng: &mut (impl RngCore + CryptoRng)) -> BigUint {
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate |= BigUint::one();
        candidate |= BigUint::one() << (bits - 1);
        if is_probable_prime(&candidate, 40, rng) {
            return candidate;
        }
    }
}

const SMALL_PRIMES: [u32; 15] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

/// Miller-Rabin primality test with `rounds` random bases.
fn is_probable_prime(n: &BigUint, rounds: usize, rng: &mut (impl RngCore + CryptoRng)) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);

    if *n < two {
        return false;
    }
    for small in SMALL_PRIMES.iter() {
        let small = BigUint::from(*small);
        if *n == small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    // n - 1 = 2^s * d with d odd
    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
