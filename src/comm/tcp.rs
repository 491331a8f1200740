// TCP transport for one exchange.
//
// Both ends write their frame while reading exactly one peer frame, so
// neither side waits on the other's socket buffer.

use log::{debug, info};
use rand::Rng;
use std::fmt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::common::{KexError, Result};
use crate::exchange::KeyExchange;
use crate::store::{ArtifactSink, Artifacts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens and accepts a single peer.
    Server,
    /// Connects to the server.
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept one peer. The listener is closed when this returns.
pub async fn accept_once(listener: TcpListener) -> Result<TcpStream> {
    let (stream, remote_addr) = listener.accept().await?;
    info!("accepted {}", remote_addr);
    Ok(stream)
}

pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    info!("connected to {}", addr);
    Ok(stream)
}

/// Run `kex` from `Idle` to `Persisted` over `stream`.
///
/// The local frame is encoded before the peer frame is read, but the write
/// and the read run together on the two halves of the stream. A transport
/// error aborts the exchange before anything is persisted.
pub async fn exchange<S, R, K>(
    stream: &mut S,
    kex: &mut KeyExchange,
    rng: &mut R,
    sink: &mut K,
) -> Result<Artifacts>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Rng + ?Sized,
    K: ArtifactSink + ?Sized,
{
    kex.generate(rng)?;
    let frame = kex.encode_local()?;
    let len = kex.frame_len();

    let (mut reader, mut writer) = tokio::io::split(&mut *stream);
    let remote = match tokio::try_join!(
        send_frame(&mut writer, &frame),
        recv_frame(&mut reader, len)
    ) {
        Ok(((), remote)) => remote,
        Err(e) => {
            kex.abort();
            return Err(e);
        }
    };
    debug!("sent {} bytes, received {} bytes", frame.len(), remote.len());
    kex.receive_remote(&remote)?;
    kex.compute_shared()?;
    kex.persist(sink)
}

async fn send_frame<S: AsyncWrite + Unpin>(stream: &mut S, frame: &[u8]) -> Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn recv_frame<S: AsyncRead + Unpin>(stream: &mut S, len: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer).await.map_err(KexError::from)?;
    Ok(buffer)
}

/// Shut down the write half. Errors are ignored, the peer may be gone.
pub async fn close<S: AsyncWrite + Unpin>(stream: &mut S) {
    if let Err(e) = stream.shutdown().await {
        debug!("shutdown: {}", e);
    }
}

#[cfg(test)]
use crate::exchange::{ExchangeState, Suite};
#[cfg(test)]
use crate::pke::{curve::toy_curve, dh::toy_group};
#[cfg(test)]
use crate::store::MemorySink;
#[cfg(test)]
use rand::SeedableRng;
#[cfg(test)]
use rand_chacha::ChaCha20Rng;

#[tokio::test]
async fn test_exchange_over_duplex() -> Result<()> {
    let (mut left, mut right) = tokio::io::duplex(64 * 1024);
    let mut a = KeyExchange::new(Suite::Ecdh(toy_curve()));
    let mut b = KeyExchange::new(Suite::Ecdh(toy_curve()));
    let mut a_sink = MemorySink::default();
    let mut b_sink = MemorySink::default();
    let mut a_rng = ChaCha20Rng::seed_from_u64(5);
    let mut b_rng = ChaCha20Rng::seed_from_u64(6);

    let (a_out, b_out) = tokio::join!(
        exchange(&mut left, &mut a, &mut a_rng, &mut a_sink),
        exchange(&mut right, &mut b, &mut b_rng, &mut b_sink),
    );
    let (a_out, b_out) = (a_out?, b_out?);
    assert_eq!(a_out.shared, b_out.shared);
    assert_eq!(a.state(), ExchangeState::Persisted);
    assert_eq!(a_sink.stored, vec![a_out]);
    assert_eq!(b_sink.stored, vec![b_out]);
    Ok(())
}

#[tokio::test]
async fn test_peer_closes_early() {
    let (mut left, right) = tokio::io::duplex(64 * 1024);
    drop(right);
    let mut a = KeyExchange::new(Suite::Dh(toy_group()));
    let mut sink = MemorySink::default();
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let ret = exchange(&mut left, &mut a, &mut rng, &mut sink).await;
    assert!(matches!(ret, Err(KexError::Transport(_))));
    assert_eq!(a.state(), ExchangeState::Failed);
    assert!(sink.stored.is_empty());
}

#[tokio::test]
async fn test_short_frame_is_transport_error() {
    let (mut left, mut right) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        let mut buf = vec![0u8; 3];
        right.read_exact(&mut buf).await.unwrap();
        // Two bytes, then close.
        right.write_all(&[0x04, 5]).await.unwrap();
    });
    let mut a = KeyExchange::new(Suite::Ecdh(toy_curve()));
    let mut sink = MemorySink::default();
    let mut rng = ChaCha20Rng::seed_from_u64(8);
    let ret = exchange(&mut left, &mut a, &mut rng, &mut sink).await;
    peer.await.unwrap();
    assert!(matches!(ret, Err(KexError::Transport(_))));
    assert!(sink.stored.is_empty());
}

#[tokio::test]
async fn test_frame_larger_than_buffer() -> Result<()> {
    // Each frame is 32 times the pipe capacity.
    let group = toy_group().with_frame_len(256 * 1024)?;
    let (mut left, mut right) = tokio::io::duplex(8 * 1024);
    let mut a = KeyExchange::new(Suite::Dh(group.clone()));
    let mut b = KeyExchange::new(Suite::Dh(group));
    let mut a_sink = MemorySink::default();
    let mut b_sink = MemorySink::default();
    let mut a_rng = ChaCha20Rng::seed_from_u64(10);
    let mut b_rng = ChaCha20Rng::seed_from_u64(11);

    let (a_out, b_out) = tokio::join!(
        exchange(&mut left, &mut a, &mut a_rng, &mut a_sink),
        exchange(&mut right, &mut b, &mut b_rng, &mut b_sink),
    );
    assert_eq!(a_out?.shared, b_out?.shared);
    assert_eq!(b.state(), ExchangeState::Persisted);
    Ok(())
}
