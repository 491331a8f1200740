// Key material produced by one exchange.
use crate::common::{CryptoHash, KexError, Result, SHA256};
use crate::pke::curve::Point;
use num_bigint::BigUint;
use std::fmt;

/// Public value sent to the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicValue {
    /// g^priv mod p.
    Dh(BigUint),
    /// priv * G.
    Ec(Point),
}

impl fmt::Display for PublicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicValue::Dh(v) => write!(f, "{}", v),
            PublicValue::Ec(p) => write!(f, "{}", p),
        }
    }
}

#[derive(Clone, Debug)]
pub struct KeyPair {
    pub private: BigUint,
    pub public: PublicValue,
}

/// Raw shared value plus the SHA-256 digest of its canonical string form.
///
/// DH hashes the shortest lowercase hex of the shared value (no `0x`),
/// ECDH hashes the decimal form of the shared point's x coordinate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedSecret {
    value: BigUint,
    digest: [u8; 32],
}

impl SharedSecret {
    pub fn from_dh(value: BigUint) -> Self {
        let digest = SHA256::hash(format!("{:x}", value).as_bytes());
        Self { value, digest }
    }

    pub fn from_ec(point: &Point) -> Result<Self> {
        match point {
            Point::Infinity => Err(KexError::MalformedWireValue(
                "peer point yields the point at infinity".to_owned(),
            )),
            Point::Affine { x, .. } => {
                let digest = SHA256::hash(x.to_str_radix(10).as_bytes());
                Ok(Self {
                    value: x.clone(),
                    digest,
                })
            }
        }
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// 64 lowercase hex characters.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

#[test]
fn test_dh_digest_uses_bare_hex() {
    let s = SharedSecret::from_dh(BigUint::from(2u32));
    assert_eq!(s.digest(), &SHA256::hash(b"2"));
    assert_eq!(
        s.digest_hex(),
        "d4735e3a265e16eee03f59718b9b5d03019c07d8b6c51f90da3a666eec13ab35"
    );

    // 255 hashes as "ff", never "0xff" or "00ff".
    let s = SharedSecret::from_dh(BigUint::from(255u32));
    assert_eq!(s.digest(), &SHA256::hash(b"ff"));
}

#[test]
fn test_ec_digest_uses_decimal_x() {
    let p = Point::new(BigUint::from(10u32), BigUint::from(6u32));
    let s = SharedSecret::from_ec(&p).unwrap();
    assert_eq!(s.value(), &BigUint::from(10u32));
    assert_eq!(s.digest(), &SHA256::hash(b"10"));
    assert_eq!(s.digest_hex().len(), 64);
    assert!(s.digest_hex().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));

    assert!(matches!(
        SharedSecret::from_ec(&Point::Infinity),
        Err(KexError::MalformedWireValue(_))
    ));
}

#[test]
fn test_digest_is_deterministic() {
    let a = SharedSecret::from_dh(BigUint::from(0xdead_beefu32));
    let b = SharedSecret::from_dh(BigUint::from(0xdead_beefu32));
    assert_eq!(a.digest(), b.digest());
    assert_ne!(a.digest(), SharedSecret::from_dh(BigUint::from(1u32)).digest());
}

#[test]
fn test_public_value_text() {
    assert_eq!(PublicValue::Dh(BigUint::from(19u32)).to_string(), "19");
    let p = Point::new(BigUint::from(6u32), BigUint::from(3u32));
    assert_eq!(PublicValue::Ec(p).to_string(), "{'x': 6, 'y': 3}");
}
