// Multi precision modular arithmetic.
//
// Every result is reduced into `[0, modulus)`.
use crate::common::{KexError, Result};
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};

fn check_modulus(modulus: &BigUint) -> Result<()> {
    if *modulus < BigUint::from(2u32) {
        return Err(KexError::InvalidModulus(format!(
            "modulus {} is smaller than 2",
            modulus
        )));
    }
    Ok(())
}

/// Compute base**exponent mod modulus.
///
/// Square-and-multiply over the exponent bits, least significant first.
pub fn pow_mod(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> Result<BigUint> {
    check_modulus(modulus)?;
    let mut ret = BigUint::one();
    let mut b = base % modulus;
    for i in 0..exponent.bits() {
        if exponent.bit(i) {
            ret = (&ret * &b) % modulus;
        }
        b = (&b * &b) % modulus;
    }
    Ok(ret)
}

/// Multiplicative inverse of `value` modulo `modulus`, by extended Euclid.
pub fn mod_inverse(value: &BigUint, modulus: &BigUint) -> Result<BigUint> {
    check_modulus(modulus)?;
    let m = BigInt::from(modulus.clone());
    let mut old_r = BigInt::from(value % modulus);
    let mut r = m.clone();
    let mut old_s = BigInt::one();
    let mut s = BigInt::zero();

    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    // old_r is gcd(value, modulus).
    if !old_r.is_one() {
        return Err(KexError::NoInverse);
    }
    (((old_s % &m) + &m) % &m)
        .to_biguint()
        .ok_or(KexError::NoInverse)
}

#[inline]
pub fn add_mod(a: &BigUint, b: &BigUint, modulus: &BigUint) -> BigUint {
    (a + b) % modulus
}

#[inline]
pub fn sub_mod(a: &BigUint, b: &BigUint, modulus: &BigUint) -> BigUint {
    ((a % modulus) + modulus - (b % modulus)) % modulus
}

#[inline]
pub fn mul_mod(a: &BigUint, b: &BigUint, modulus: &BigUint) -> BigUint {
    (a * b) % modulus
}

/// Big-endian bytes of `value`, left padded with zeroes to `width`.
///
/// Returns `None` if `value` does not fit.
pub fn to_be_bytes_padded(value: &BigUint, width: usize) -> Option<Vec<u8>> {
    let bytes = value.to_bytes_be();
    // to_bytes_be gives [0] for zero.
    let bytes = if value.is_zero() { vec![] } else { bytes };
    if bytes.len() > width {
        return None;
    }
    let mut ret = vec![0u8; width - bytes.len()];
    ret.extend_from_slice(&bytes);
    Some(ret)
}

#[cfg(test)]
fn big(v: u64) -> BigUint {
    BigUint::from(v)
}

#[test]
fn test_pow_mod_small() {
    assert_eq!(pow_mod(&big(2), &big(128), &big(127)).unwrap(), big(4));
    assert_eq!(pow_mod(&big(5), &big(6), &big(23)).unwrap(), big(8));
    assert_eq!(pow_mod(&big(5), &big(15), &big(23)).unwrap(), big(19));
    assert_eq!(pow_mod(&big(7), &big(0), &big(13)).unwrap(), big(1));
    assert_eq!(pow_mod(&big(0), &big(5), &big(13)).unwrap(), big(0));
    // Base larger than the modulus is reduced first.
    assert_eq!(pow_mod(&big(30), &big(2), &big(23)).unwrap(), big(3));
}

#[test]
fn test_pow_mod_matches_reference() {
    use num_bigint::RandBigInt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::seed_from_u64(7);
    for _ in 0..50 {
        let m = rng.gen_biguint(512) + 2u32;
        let b = rng.gen_biguint(600);
        let e = rng.gen_biguint(300);
        assert_eq!(pow_mod(&b, &e, &m).unwrap(), b.modpow(&e, &m));
    }
}

#[test]
fn test_pow_mod_invalid_modulus() {
    assert!(matches!(
        pow_mod(&big(3), &big(3), &big(1)),
        Err(KexError::InvalidModulus(_))
    ));
    assert!(matches!(
        pow_mod(&big(3), &big(3), &big(0)),
        Err(KexError::InvalidModulus(_))
    ));
}

#[test]
fn test_mod_inverse() {
    assert_eq!(mod_inverse(&big(2), &big(17)).unwrap(), big(9));
    assert_eq!(mod_inverse(&big(3), &big(7)).unwrap(), big(5));
    // Works for composite moduli when gcd is 1.
    assert_eq!(mod_inverse(&big(7), &big(15)).unwrap(), big(13));

    use num_bigint::RandBigInt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    let p = BigUint::parse_bytes(
        b"ffffffff00000001000000000000000000000000ffffffffffffffffffffffff",
        16,
    )
    .unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(11);
    for _ in 0..100 {
        let a = rng.gen_biguint_range(&BigUint::one(), &p);
        let inv = mod_inverse(&a, &p).unwrap();
        assert_eq!(mul_mod(&a, &inv, &p), BigUint::one());
    }
}

#[test]
fn test_mod_inverse_fails() {
    assert!(matches!(
        mod_inverse(&big(0), &big(17)),
        Err(KexError::NoInverse)
    ));
    assert!(matches!(
        mod_inverse(&big(34), &big(17)),
        Err(KexError::NoInverse)
    ));
    assert!(matches!(
        mod_inverse(&big(6), &big(15)),
        Err(KexError::NoInverse)
    ));
    assert!(matches!(
        mod_inverse(&big(6), &big(1)),
        Err(KexError::InvalidModulus(_))
    ));
}

#[test]
fn test_sub_mod_wraps() {
    assert_eq!(sub_mod(&big(3), &big(5), &big(17)), big(15));
    assert_eq!(sub_mod(&big(5), &big(22), &big(17)), big(0));
    assert_eq!(add_mod(&big(16), &big(5), &big(17)), big(4));
}

#[test]
fn test_padded_bytes() {
    assert_eq!(to_be_bytes_padded(&big(0x0102), 4).unwrap(), vec![0, 0, 1, 2]);
    assert_eq!(to_be_bytes_padded(&big(0), 2).unwrap(), vec![0, 0]);
    assert!(to_be_bytes_padded(&big(0x010203), 2).is_none());
}
