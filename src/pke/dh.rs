// Finite field Diffie-Hellman.
use crate::common::{KexError, Result};
use crate::mp::pow_mod;
use crate::pke::key::{KeyPair, PublicValue};
use crate::pke::prime::is_probable_prime;
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::Rng;

/// Size of one DH frame on the wire.
pub const DH_FRAME_LEN: usize = 8192;
/// Largest accepted frame, both directions.
pub const DH_MAX_FRAME_LEN: usize = 16 << 20;
/// Bit length of the private exponent.
pub const DH_PRIVATE_BITS: u64 = 4096;
/// Largest accepted private exponent length.
pub const DH_MAX_PRIVATE_BITS: u64 = 65536;

// RFC 3526 group 16, 4096-bit safe prime, little endian u32 words.
const MODP_4096: [u32; 128] = [
    0xffffffff, 0xffffffff, 0x34063199, 0x4df435c9, 0x90a6c08f, 0x86ffb7dc, 0x8d8fddc1, 0x93b4ea98,
    0xd5b05aa9, 0xd0069127, 0x2170481c, 0xb81bdd76, 0xcee2d7af, 0x1f612970, 0x515be7ed, 0x233ba186,
    0xa090c3a2, 0x99b2964f, 0x4e6bc05d, 0x287c5947, 0x1fbecaa6, 0x2e8efc14, 0x04de8ef9, 0xdbbbc2db,
    0x2ad44ce8, 0x2583e9ca, 0xb6150bda, 0x1a946834, 0x6af4e23c, 0x99c32718, 0xbdba5b26, 0x88719a10,
    0xa787e6d7, 0x1a723c12, 0xa9210801, 0x4b82d120, 0xe0fd108e, 0x43db5bfc, 0x74e5ab31, 0x08e24fa0,
    0xbad946e2, 0x770988c0, 0x7a615d6c, 0xbbe11757, 0x177b200c, 0x521f2b18, 0x3ec86a64, 0xd8760273,
    0xd98a0864, 0xf12ffa06, 0x1ad2ee6b, 0xcee3d226, 0x4a25619d, 0x1e8c94e0, 0xdb0933d7, 0xabf5ae8c,
    0xa6e1e4c7, 0xb3970f85, 0x5d060c7d, 0x8aea7157, 0x58dbef0a, 0xecfb8504, 0xdf1cba64, 0xa85521ab,
    0x04507a33, 0xad33170d, 0x8aaac42d, 0x15728e5a, 0x98fa0510, 0x15d22618, 0xea956ae5, 0x3995497c,
    0x95581718, 0xde2bcbf6, 0x6f4c52c9, 0xb5c55df0, 0xec07a28f, 0x9b2783a2, 0x180e8603, 0xe39e772c,
    0x2e36ce3b, 0x32905e46, 0xca18217c, 0xf1746c08, 0x4abc9804, 0x670c354e, 0x7096966d, 0x9ed52907,
    0x208552bb, 0x1c62f356, 0xdca3ad96, 0x83655d23, 0xfd24cf5f, 0x69163fa8, 0x1c55d39a, 0x98da4836,
    0xa163bf05, 0xc2007cb8, 0xece45b3d, 0x49286651, 0x7c4b1fe6, 0xae9f2411, 0x5a899fa5, 0xee386bfb,
    0xf406b7ed, 0x0bff5cb6, 0xa637ed6b, 0xf44c42e9, 0x625e7ec6, 0xe485b576, 0x6d51c245, 0x4fe1356d,
    0xf25f1437, 0x302b0a6d, 0xcd3a431b, 0xef9519b3, 0x8e3404dd, 0x514a0879, 0x3b139b22, 0x020bbea6,
    0x8a67cc74, 0x29024e08, 0x80dc1cd1, 0xc4c6628b, 0x2168c234, 0xc90fdaa2, 0xffffffff, 0xffffffff,
];

/// A DH group: prime modulus p and generator g.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhGroup {
    p: BigUint,
    g: BigUint,
    private_bits: u64,
    frame_len: usize,
}

impl DhGroup {
    /// Validate and build a group. `g` must lie in [2, p-2].
    pub fn new(p: BigUint, g: BigUint) -> Result<Self> {
        if p <= BigUint::from(3u32) || !is_probable_prime(&p, 16) {
            return Err(KexError::InvalidModulus(format!("{:x} is not prime", p)));
        }
        if g < BigUint::from(2u32) || g > &p - 2u32 {
            return Err(KexError::InvalidModulus(format!(
                "generator {} is out of range",
                g
            )));
        }
        let frame_len = DH_FRAME_LEN.max(Self::byte_len(&p));
        Ok(Self {
            p,
            g,
            private_bits: DH_PRIVATE_BITS,
            frame_len,
        })
    }

    /// 4096-bit MODP group, generator 2.
    pub fn modp_4096() -> Self {
        Self {
            p: BigUint::from_slice(&MODP_4096),
            g: BigUint::from(2u32),
            private_bits: DH_PRIVATE_BITS,
            frame_len: DH_FRAME_LEN,
        }
    }

    pub fn with_private_bits(mut self, bits: u64) -> Result<Self> {
        if bits == 0 {
            return Err(KexError::InvalidModulus(
                "private exponent needs at least one bit".to_owned(),
            ));
        }
        if bits > DH_MAX_PRIVATE_BITS {
            return Err(KexError::InvalidModulus(format!(
                "private exponent of {} bits exceeds {}",
                bits, DH_MAX_PRIVATE_BITS
            )));
        }
        self.private_bits = bits;
        Ok(self)
    }

    pub fn with_frame_len(mut self, frame_len: usize) -> Result<Self> {
        if frame_len < Self::byte_len(&self.p) {
            return Err(KexError::InvalidModulus(format!(
                "frame of {} bytes cannot hold the modulus",
                frame_len
            )));
        }
        if frame_len > DH_MAX_FRAME_LEN {
            return Err(KexError::InvalidModulus(format!(
                "frame of {} bytes exceeds {}",
                frame_len, DH_MAX_FRAME_LEN
            )));
        }
        self.frame_len = frame_len;
        Ok(self)
    }

    fn byte_len(p: &BigUint) -> usize {
        ((p.bits() + 7) / 8) as usize
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn g(&self) -> &BigUint {
        &self.g
    }

    pub fn private_bits(&self) -> u64 {
        self.private_bits
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// g^private mod p.
    pub fn public_value(&self, private: &BigUint) -> Result<BigUint> {
        pow_mod(&self.g, private, &self.p)
    }

    /// peer^private mod p.
    pub fn shared_value(&self, peer: &BigUint, private: &BigUint) -> Result<BigUint> {
        pow_mod(peer, private, &self.p)
    }

    /// Private exponent drawn uniformly from [1, 2^private_bits).
    ///
    /// The exponent is not reduced below p.
    pub fn generate_key_pair<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<KeyPair> {
        let upper = BigUint::one() << self.private_bits;
        let private = rng.gen_biguint_range(&BigUint::one(), &upper);
        let public = self.public_value(&private)?;
        Ok(KeyPair {
            private,
            public: PublicValue::Dh(public),
        })
    }
}

#[cfg(test)]
pub(crate) fn toy_group() -> DhGroup {
    DhGroup::new(BigUint::from(23u32), BigUint::from(5u32)).unwrap()
}

#[test]
fn test_toy_exchange() {
    let group = toy_group();
    let a = BigUint::from(6u32);
    let b = BigUint::from(15u32);
    let a_pub = group.public_value(&a).unwrap();
    let b_pub = group.public_value(&b).unwrap();
    assert_eq!(a_pub, BigUint::from(8u32));
    assert_eq!(b_pub, BigUint::from(19u32));
    assert_eq!(group.shared_value(&b_pub, &a).unwrap(), BigUint::from(2u32));
    assert_eq!(group.shared_value(&a_pub, &b).unwrap(), BigUint::from(2u32));
}

#[test]
fn test_modp_4096_constant() {
    let group = DhGroup::modp_4096();
    assert_eq!(group.p().bits(), 4096);
    assert_eq!(group.g(), &BigUint::from(2u32));
    let hex = format!("{:x}", group.p());
    assert!(hex.starts_with("ffffffffffffffffc90fdaa22168c234c4c6628b80dc1cd1"));
    assert!(hex.ends_with("4df435c934063199ffffffffffffffff"));
    assert!(is_probable_prime(group.p(), 4));
}

#[test]
fn test_modp_4096_agreement() {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let group = DhGroup::modp_4096();
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let alice = group.generate_key_pair(&mut rng).unwrap();
    let bob = group.generate_key_pair(&mut rng).unwrap();
    let (PublicValue::Dh(a_pub), PublicValue::Dh(b_pub)) = (&alice.public, &bob.public) else {
        panic!("dh key pair holds a point");
    };
    assert!(alice.private.bits() <= DH_PRIVATE_BITS);
    assert!(a_pub < group.p());
    assert_eq!(
        group.shared_value(b_pub, &alice.private).unwrap(),
        group.shared_value(a_pub, &bob.private).unwrap()
    );
}

#[test]
fn test_invalid_groups() {
    assert!(matches!(
        DhGroup::new(BigUint::from(21u32), BigUint::from(5u32)),
        Err(KexError::InvalidModulus(_))
    ));
    assert!(matches!(
        DhGroup::new(BigUint::from(23u32), BigUint::from(1u32)),
        Err(KexError::InvalidModulus(_))
    ));
    assert!(matches!(
        DhGroup::new(BigUint::from(23u32), BigUint::from(22u32)),
        Err(KexError::InvalidModulus(_))
    ));
    assert!(toy_group().with_private_bits(0).is_err());
    assert!(DhGroup::modp_4096().with_frame_len(511).is_err());
    assert_eq!(
        DhGroup::modp_4096().with_frame_len(512).unwrap().frame_len(),
        512
    );
}

#[test]
fn test_private_bits_bound() {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let group = toy_group().with_private_bits(8).unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(9);
    for _ in 0..200 {
        let pair = group.generate_key_pair(&mut rng).unwrap();
        assert!(pair.private >= BigUint::one());
        assert!(pair.private < BigUint::from(256u32));
    }
}

#[test]
fn test_config_limits() {
    let group = DhGroup::modp_4096();
    assert_eq!(
        group
            .clone()
            .with_private_bits(DH_MAX_PRIVATE_BITS)
            .unwrap()
            .private_bits(),
        DH_MAX_PRIVATE_BITS
    );
    assert!(matches!(
        group.clone().with_private_bits(DH_MAX_PRIVATE_BITS + 1),
        Err(KexError::InvalidModulus(_))
    ));
    assert!(matches!(
        group.clone().with_private_bits(1 << 40),
        Err(KexError::InvalidModulus(_))
    ));
    assert_eq!(
        group
            .clone()
            .with_frame_len(DH_MAX_FRAME_LEN)
            .unwrap()
            .frame_len(),
        DH_MAX_FRAME_LEN
    );
    assert!(matches!(
        group.with_frame_len(DH_MAX_FRAME_LEN + 1),
        Err(KexError::InvalidModulus(_))
    ));
}
