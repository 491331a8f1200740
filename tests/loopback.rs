use kex::comm::tcp;
use kex::common::{CryptoHash, SHA256};
use kex::config::Config;
use kex::exchange::{ExchangeState, KeyExchange, Suite};
use kex::pke::curve::{Curve, CurveParams};
use kex::store::{FileStore, MemorySink};
use kex::KexError;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::{fs, path::PathBuf, time::Duration};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "kex-it-{}-{:016x}",
        tag,
        ChaCha20Rng::from_entropy().next_u64()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Server and client over 127.0.0.1, both persisting to `dir`.
async fn run_pair(suite: Suite, dir: &PathBuf) -> (kex::Result<()>, kex::Result<()>) {
    let listener = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server_suite = suite.clone();
    let server_dir = dir.clone();
    let server = tokio::spawn(async move {
        let mut stream = tcp::accept_once(listener).await?;
        let mut kex = KeyExchange::new(server_suite);
        let mut sink = FileStore::new(server_dir, "server");
        let mut rng = ChaCha20Rng::from_entropy();
        let ret = tcp::exchange(&mut stream, &mut kex, &mut rng, &mut sink).await;
        tcp::close(&mut stream).await;
        ret.map(|_| ())
    });

    let client = async {
        let mut stream = tcp::connect(&addr).await?;
        let mut kex = KeyExchange::new(suite);
        let mut sink = FileStore::new(dir.clone(), "client");
        let mut rng = ChaCha20Rng::from_entropy();
        let ret = tcp::exchange(&mut stream, &mut kex, &mut rng, &mut sink).await;
        tcp::close(&mut stream).await;
        ret.map(|_| ())
    };
    let client = client.await;
    (server.await.unwrap(), client)
}

fn read(dir: &PathBuf, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

#[tokio::test]
async fn test_ecdh_over_tcp() {
    let dir = scratch_dir("ecdh");
    let (server, client) = run_pair(Config::default().suite(true).unwrap(), &dir).await;
    server.unwrap();
    client.unwrap();

    let shared = read(&dir, "server.shared");
    assert_eq!(shared, read(&dir, "client.shared"));
    assert_eq!(shared.len(), 64);
    assert!(shared.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));

    let private = read(&dir, "server.priv");
    assert!(private.chars().all(|c| c.is_ascii_digit()));
    let public = read(&dir, "client.pub");
    assert!(public.starts_with("{'x': ") && public.contains(", 'y': ") && public.ends_with('}'));
    assert_ne!(read(&dir, "server.priv"), read(&dir, "client.priv"));
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_dh_over_tcp() {
    let dir = scratch_dir("dh");
    let (server, client) = run_pair(Config::default().suite(false).unwrap(), &dir).await;
    server.unwrap();
    client.unwrap();

    assert_eq!(read(&dir, "server.shared"), read(&dir, "client.shared"));
    let public = read(&dir, "server.pub");
    assert!(public.chars().all(|c| c.is_ascii_digit()));
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_multi_mib_frame_over_tcp() {
    // 8 MiB frames are far larger than the loopback socket buffers.
    let group = Config::parse("[dh]\nprime = \"17\"\ngenerator = 5\nframe_len = 8388608\n")
        .unwrap()
        .dh_group()
        .unwrap();
    let dir = scratch_dir("large-frame");
    let (server, client) = tokio::time::timeout(
        Duration::from_secs(60),
        run_pair(Suite::Dh(group), &dir),
    )
    .await
    .expect("exchange with 8 MiB frames did not finish");
    server.unwrap();
    client.unwrap();
    assert_eq!(read(&dir, "server.shared"), read(&dir, "client.shared"));
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_fresh_runs_differ() {
    let suite = Suite::Ecdh(Curve::new(CurveParams::secp256r1()));
    let first = scratch_dir("fresh-a");
    let second = scratch_dir("fresh-b");
    let (s, c) = run_pair(suite.clone(), &first).await;
    s.unwrap();
    c.unwrap();
    let (s, c) = run_pair(suite, &second).await;
    s.unwrap();
    c.unwrap();

    assert_ne!(read(&first, "server.priv"), read(&second, "server.priv"));
    assert_ne!(read(&first, "server.shared"), read(&second, "server.shared"));
    fs::remove_dir_all(&first).unwrap();
    fs::remove_dir_all(&second).unwrap();
}

#[tokio::test]
async fn test_off_curve_peer_writes_nothing() {
    let dir = scratch_dir("malformed");
    let listener = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_dir = dir.clone();
    let server = tokio::spawn(async move {
        let mut stream = tcp::accept_once(listener).await?;
        let mut kex = KeyExchange::new(Config::default().suite(true).unwrap());
        let mut sink = FileStore::new(server_dir, "server");
        let mut rng = ChaCha20Rng::from_entropy();
        let ret = tcp::exchange(&mut stream, &mut kex, &mut rng, &mut sink).await;
        tcp::close(&mut stream).await;
        assert_eq!(kex.state(), ExchangeState::Failed);
        ret
    });

    // Tag plus x = 1, y = 1, which is not a P-256 point.
    let mut frame = vec![0u8; 65];
    frame[0] = 0x04;
    frame[32] = 1;
    frame[64] = 1;
    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(&frame).await.unwrap();

    let ret = server.await.unwrap();
    assert!(matches!(ret, Err(KexError::MalformedWireValue(_))));
    assert!(!dir.join("server.priv").exists());
    assert!(!dir.join("server.pub").exists());
    assert!(!dir.join("server.shared").exists());
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nobody listens on.
    let listener = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    assert!(matches!(
        tcp::connect(&addr).await,
        Err(KexError::Transport(_))
    ));
}

#[tokio::test]
async fn test_toy_dh_fixture_over_duplex() {
    let group = Config::parse("[dh]\nprime = \"17\"\ngenerator = 5\nframe_len = 1\n")
        .unwrap()
        .dh_group()
        .unwrap();
    let (mut left, mut right) = tokio::io::duplex(1024);

    let mut a = KeyExchange::new(Suite::Dh(group.clone()));
    let mut b = KeyExchange::new(Suite::Dh(group));
    a.use_private_key(6u32.into()).unwrap();
    b.use_private_key(15u32.into()).unwrap();

    // Keys are already set, so drive the frames by hand.
    let a_frame = a.encode_local().unwrap();
    let b_frame = b.encode_local().unwrap();
    assert_eq!(a_frame, vec![8]);
    assert_eq!(b_frame, vec![19]);
    left.write_all(&a_frame).await.unwrap();
    right.write_all(&b_frame).await.unwrap();

    use tokio::io::AsyncReadExt;
    let mut buf = [0u8; 1];
    right.read_exact(&mut buf).await.unwrap();
    b.receive_remote(&buf).unwrap();
    left.read_exact(&mut buf).await.unwrap();
    a.receive_remote(&buf).unwrap();

    assert_eq!(a.compute_shared().unwrap().digest(), &SHA256::hash(b"2"));
    assert_eq!(b.compute_shared().unwrap().digest(), &SHA256::hash(b"2"));

    let mut sink = MemorySink::default();
    let artifacts = a.persist(&mut sink).unwrap();
    assert_eq!(artifacts.private, "6");
    assert_eq!(artifacts.public, "8");
}
