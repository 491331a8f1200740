// exchange - one single-shot DH / ECDH exchange.
use log::{debug, warn};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;
use std::fmt;

use crate::common::{KexError, Result};
use crate::pke::curve::Curve;
use crate::pke::dh::DhGroup;
use crate::pke::key::{KeyPair, PublicValue, SharedSecret};
use crate::store::{ArtifactSink, Artifacts};
use crate::wire::codec;

/// Linear protocol progress. `Failed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    KeyGenerated,
    LocalSent,
    RemoteReceived,
    SharedComputed,
    Persisted,
    Failed,
}

/// Parameters for one mode of the exchange.
#[derive(Clone, Debug)]
pub enum Suite {
    Dh(DhGroup),
    Ecdh(Curve),
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suite::Dh(group) => write!(f, "dh-{}", group.p().bits()),
            Suite::Ecdh(curve) => write!(f, "ecdh-{}", curve.params().p.bits()),
        }
    }
}

impl Suite {
    pub fn frame_len(&self) -> usize {
        match self {
            Suite::Dh(group) => codec::dh_frame_len(group),
            Suite::Ecdh(curve) => codec::point_frame_len(curve),
        }
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<KeyPair> {
        match self {
            Suite::Dh(group) => group.generate_key_pair(rng),
            Suite::Ecdh(curve) => curve.generate_key_pair(rng),
        }
    }

    fn key_pair_from(&self, private: BigUint) -> Result<KeyPair> {
        if private.is_zero() {
            return Err(KexError::InvalidPrivateKey);
        }
        let public = match self {
            Suite::Dh(group) => PublicValue::Dh(group.public_value(&private)?),
            Suite::Ecdh(curve) => {
                if private >= curve.params().n {
                    return Err(KexError::InvalidPrivateKey);
                }
                PublicValue::Ec(curve.scalar_mul(&private, &curve.params().g)?)
            }
        };
        Ok(KeyPair { private, public })
    }

    fn encode(&self, public: &PublicValue) -> Result<Vec<u8>> {
        match (self, public) {
            (Suite::Dh(group), PublicValue::Dh(v)) => codec::encode_dh(v, group),
            (Suite::Ecdh(curve), PublicValue::Ec(p)) => codec::encode_point(p, curve),
            _ => Err(KexError::MalformedWireValue(
                "public value does not match the exchange mode".to_owned(),
            )),
        }
    }

    fn decode(&self, frame: &[u8]) -> Result<PublicValue> {
        match self {
            Suite::Dh(group) => codec::decode_dh(frame, group).map(PublicValue::Dh),
            Suite::Ecdh(curve) => codec::decode_point(frame, curve).map(PublicValue::Ec),
        }
    }

    fn shared(&self, private: &BigUint, peer: &PublicValue) -> Result<SharedSecret> {
        match (self, peer) {
            (Suite::Dh(group), PublicValue::Dh(v)) => {
                Ok(SharedSecret::from_dh(group.shared_value(v, private)?))
            }
            (Suite::Ecdh(curve), PublicValue::Ec(p)) => {
                SharedSecret::from_ec(&curve.scalar_mul(private, p)?)
            }
            _ => Err(KexError::MalformedWireValue(
                "public value does not match the exchange mode".to_owned(),
            )),
        }
    }
}

/// Drives a single exchange through `ExchangeState`.
///
/// Every operation must be called in state order. Any error leaves the
/// exchange `Failed` and every later call is refused.
#[derive(Debug)]
pub struct KeyExchange {
    suite: Suite,
    state: ExchangeState,
    local: Option<KeyPair>,
    remote: Option<PublicValue>,
    shared: Option<SharedSecret>,
}

impl KeyExchange {
    pub fn new(suite: Suite) -> Self {
        Self {
            suite,
            state: ExchangeState::Idle,
            local: None,
            remote: None,
            shared: None,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    /// Bytes in one frame, in both directions.
    pub fn frame_len(&self) -> usize {
        self.suite.frame_len()
    }

    pub fn local(&self) -> Option<&KeyPair> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&PublicValue> {
        self.remote.as_ref()
    }

    pub fn shared(&self) -> Option<&SharedSecret> {
        self.shared.as_ref()
    }

    /// Mark the exchange failed, e.g. after a transport error.
    pub fn abort(&mut self) {
        if self.state != ExchangeState::Failed {
            warn!("exchange aborted in state {:?}", self.state);
        }
        self.state = ExchangeState::Failed;
    }

    fn enter(&mut self, expected: ExchangeState) -> Result<()> {
        if self.state != expected {
            let found = self.state;
            self.abort();
            return Err(KexError::InvalidState { expected, found });
        }
        Ok(())
    }

    fn advance<T>(&mut self, next: ExchangeState, result: Result<T>) -> Result<T> {
        match result {
            Ok(v) => {
                debug!("{:?} -> {:?}", self.state, next);
                self.state = next;
                Ok(v)
            }
            Err(e) => {
                debug!("{:?} failed: {}", self.state, e);
                self.abort();
                Err(e)
            }
        }
    }

    fn local_pair(&self) -> Result<&KeyPair> {
        self.local.as_ref().ok_or(KexError::InvalidState {
            expected: ExchangeState::KeyGenerated,
            found: self.state,
        })
    }

    /// Idle -> KeyGenerated, with a fresh random key pair.
    pub fn generate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        self.enter(ExchangeState::Idle)?;
        let pair = self.suite.generate(rng);
        let pair = self.advance(ExchangeState::KeyGenerated, pair)?;
        self.local = Some(pair);
        Ok(())
    }

    /// Idle -> KeyGenerated, from a known private scalar.
    pub fn use_private_key(&mut self, private: BigUint) -> Result<()> {
        self.enter(ExchangeState::Idle)?;
        let pair = self.suite.key_pair_from(private);
        let pair = self.advance(ExchangeState::KeyGenerated, pair)?;
        self.local = Some(pair);
        Ok(())
    }

    /// KeyGenerated -> LocalSent. Returns the frame to send.
    pub fn encode_local(&mut self) -> Result<Vec<u8>> {
        self.enter(ExchangeState::KeyGenerated)?;
        let frame = self
            .local_pair()
            .and_then(|pair| self.suite.encode(&pair.public));
        self.advance(ExchangeState::LocalSent, frame)
    }

    /// LocalSent -> RemoteReceived. Rejects malformed peer frames.
    pub fn receive_remote(&mut self, frame: &[u8]) -> Result<()> {
        self.enter(ExchangeState::LocalSent)?;
        let remote = self.suite.decode(frame);
        let remote = self.advance(ExchangeState::RemoteReceived, remote)?;
        self.remote = Some(remote);
        Ok(())
    }

    /// RemoteReceived -> SharedComputed.
    pub fn compute_shared(&mut self) -> Result<&SharedSecret> {
        self.enter(ExchangeState::RemoteReceived)?;
        let shared = match (self.local_pair(), self.remote.as_ref()) {
            (Ok(pair), Some(remote)) => self.suite.shared(&pair.private, remote),
            (Err(e), _) => Err(e),
            (_, None) => Err(KexError::InvalidState {
                expected: ExchangeState::RemoteReceived,
                found: self.state,
            }),
        };
        let shared = self.advance(ExchangeState::SharedComputed, shared)?;
        debug!("shared digest {}", shared.digest_hex());
        Ok(&*self.shared.insert(shared))
    }

    /// Text forms of the private key, public key and digest.
    pub fn artifacts(&self) -> Result<Artifacts> {
        let pair = self.local_pair()?;
        let shared = self.shared.as_ref().ok_or(KexError::InvalidState {
            expected: ExchangeState::SharedComputed,
            found: self.state,
        })?;
        Ok(Artifacts {
            private: pair.private.to_str_radix(10),
            public: pair.public.to_string(),
            shared: shared.digest_hex(),
        })
    }

    /// SharedComputed -> Persisted.
    pub fn persist<S: ArtifactSink + ?Sized>(&mut self, sink: &mut S) -> Result<Artifacts> {
        self.enter(ExchangeState::SharedComputed)?;
        let stored = self
            .artifacts()
            .and_then(|artifacts| sink.store(&artifacts).map(|_| artifacts));
        self.advance(ExchangeState::Persisted, stored)
    }
}

#[cfg(test)]
use crate::common::{CryptoHash, SHA256};
#[cfg(test)]
use crate::pke::{curve::toy_curve, dh::toy_group};
#[cfg(test)]
use crate::store::MemorySink;

#[cfg(test)]
fn run_pair(a: &mut KeyExchange, b: &mut KeyExchange) {
    let a_frame = a.encode_local().unwrap();
    let b_frame = b.encode_local().unwrap();
    a.receive_remote(&b_frame).unwrap();
    b.receive_remote(&a_frame).unwrap();
    a.compute_shared().unwrap();
    b.compute_shared().unwrap();
}

#[test]
fn test_toy_dh_exchange() {
    let mut a = KeyExchange::new(Suite::Dh(toy_group()));
    let mut b = KeyExchange::new(Suite::Dh(toy_group()));
    a.use_private_key(BigUint::from(6u32)).unwrap();
    b.use_private_key(BigUint::from(15u32)).unwrap();
    run_pair(&mut a, &mut b);

    assert_eq!(a.shared().unwrap().value(), &BigUint::from(2u32));
    assert_eq!(a.shared(), b.shared());
    assert_eq!(a.shared().unwrap().digest(), &SHA256::hash(b"2"));

    let mut sink = MemorySink::default();
    let artifacts = a.persist(&mut sink).unwrap();
    assert_eq!(a.state(), ExchangeState::Persisted);
    assert_eq!(artifacts.private, "6");
    assert_eq!(artifacts.public, "8");
    assert_eq!(
        artifacts.shared,
        "d4735e3a265e16eee03f59718b9b5d03019c07d8b6c51f90da3a666eec13ab35"
    );
    assert_eq!(sink.stored, vec![artifacts]);
    assert_eq!(b.artifacts().unwrap().public, "19");
}

#[test]
fn test_toy_ecdh_exchange() {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::seed_from_u64(1);
    for _ in 0..20 {
        let mut a = KeyExchange::new(Suite::Ecdh(toy_curve()));
        let mut b = KeyExchange::new(Suite::Ecdh(toy_curve()));
        a.generate(&mut rng).unwrap();
        b.generate(&mut rng).unwrap();
        run_pair(&mut a, &mut b);
        assert_eq!(a.shared(), b.shared());
        let pub_text = a.artifacts().unwrap().public;
        assert!(pub_text.starts_with("{'x': "));
    }
}

#[test]
fn test_known_ecdh_private_key() {
    let mut a = KeyExchange::new(Suite::Ecdh(toy_curve()));
    a.use_private_key(BigUint::from(2u32)).unwrap();
    assert_eq!(a.encode_local().unwrap(), vec![0x04, 6, 3]);

    let mut bad = KeyExchange::new(Suite::Ecdh(toy_curve()));
    assert!(matches!(
        bad.use_private_key(BigUint::from(19u32)),
        Err(KexError::InvalidPrivateKey)
    ));
    assert_eq!(bad.state(), ExchangeState::Failed);
}

#[test]
fn test_malformed_remote_fails_exchange() {
    let mut a = KeyExchange::new(Suite::Ecdh(toy_curve()));
    a.use_private_key(BigUint::from(3u32)).unwrap();
    a.encode_local().unwrap();
    assert!(matches!(
        a.receive_remote(&[0x04, 5, 2]),
        Err(KexError::MalformedWireValue(_))
    ));
    assert_eq!(a.state(), ExchangeState::Failed);

    // Nothing can be computed or persisted afterwards.
    assert!(matches!(
        a.compute_shared(),
        Err(KexError::InvalidState { .. })
    ));
    let mut sink = MemorySink::default();
    assert!(a.persist(&mut sink).is_err());
    assert!(sink.stored.is_empty());
}

#[test]
fn test_dh_value_out_of_range_fails() {
    let group = toy_group();
    let mut a = KeyExchange::new(Suite::Dh(group.clone()));
    a.use_private_key(BigUint::from(6u32)).unwrap();
    a.encode_local().unwrap();
    let frame = codec::encode_dh(&BigUint::from(23u32), &group).unwrap();
    assert!(matches!(
        a.receive_remote(&frame),
        Err(KexError::MalformedWireValue(_))
    ));
    assert_eq!(a.state(), ExchangeState::Failed);
}

#[test]
fn test_out_of_order_calls() {
    let mut a = KeyExchange::new(Suite::Dh(toy_group()));
    assert!(matches!(
        a.encode_local(),
        Err(KexError::InvalidState {
            expected: ExchangeState::KeyGenerated,
            found: ExchangeState::Idle,
        })
    ));
    assert_eq!(a.state(), ExchangeState::Failed);
    assert!(a.use_private_key(BigUint::from(6u32)).is_err());
}

#[test]
fn test_abort_after_send() {
    let mut a = KeyExchange::new(Suite::Dh(toy_group()));
    a.use_private_key(BigUint::from(6u32)).unwrap();
    a.encode_local().unwrap();
    a.abort();
    assert_eq!(a.state(), ExchangeState::Failed);
    assert!(a.receive_remote(&[0u8; 8192]).is_err());
}
