use sha2::{Digest, Sha256};
use std::{io, path::PathBuf};
use thiserror::Error;

use crate::exchange::ExchangeState;

#[derive(Error, Debug)]
pub enum KexError {
    #[error("invalid modulus: {0}")]
    InvalidModulus(String),
    #[error("invalid curve parameters: {0}")]
    InvalidCurveParams(&'static str),
    #[error("no modular inverse exists.")]
    NoInverse,
    #[error("malformed wire value: {0}")]
    MalformedWireValue(String),
    #[error("invalid private key.")]
    InvalidPrivateKey,
    #[error("the point at infinity has no wire encoding.")]
    PointAtInfinity,
    #[error("invalid state: expected {expected:?}, found {found:?}")]
    InvalidState {
        expected: ExchangeState,
        found: ExchangeState,
    },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("failed to write {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, KexError>;

pub trait CryptoHash<const N: usize> {
    fn hash(data: &[u8]) -> [u8; N];
}

/// SHA-256, used to derive the shared secret digest.
pub struct SHA256;

impl CryptoHash<32> for SHA256 {
    fn hash(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }
}

#[test]
fn sha256_test() {
    use hex::FromHex;

    let result = SHA256::hash(b"abc");
    assert_eq!(
        result,
        <[u8; 32]>::from_hex("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
            .unwrap()
    );

    let result = SHA256::hash(&[]);
    assert_eq!(
        result,
        <[u8; 32]>::from_hex("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
            .unwrap()
    );
}
