// Probable prime test for user supplied moduli.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::mp::pow_mod;

const SMALL_PRIMES: [u32; 11] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31];

/// Miller-Rabin with `rounds` random bases.
pub fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n-1 = t * 2^k
    let n_1 = n - 1u32;
    let k = n_1.trailing_zeros().unwrap_or(0);
    let t = &n_1 >> k;

    let mut rng = ChaCha20Rng::from_entropy();
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_1);
        // n > 31 here, so pow_mod cannot fail on the modulus.
        let mut x = match pow_mod(&a, &t, n) {
            Ok(x) => x,
            Err(_) => return false,
        };
        if x.is_one() || x == n_1 {
            continue;
        }
        for _ in 1..k {
            x = (&x * &x) % n;
            if x == n_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[test]
fn test_is_prime() {
    assert!(is_probable_prime(&BigUint::from(13u32), 16));
    assert!(is_probable_prime(&BigUint::from(17u32), 16));
    assert!(is_probable_prime(&BigUint::from(4294967311u64), 16));
    assert!(!is_probable_prime(&BigUint::from(1u32), 16));
    assert!(!is_probable_prime(&BigUint::from(0u32), 16));
    assert!(!is_probable_prime(&BigUint::from(4294967297u64), 16));
    // Carmichael number.
    assert!(!is_probable_prime(&BigUint::from(561u32), 16));
    assert!(!is_probable_prime(&BigUint::from(1105u32 * 1729), 16));

    let p256 = BigUint::parse_bytes(
        b"ffffffff00000001000000000000000000000000ffffffffffffffffffffffff",
        16,
    )
    .unwrap();
    assert!(is_probable_prime(&p256, 16));
    assert!(!is_probable_prime(&(p256 + 2u32), 16));
}
