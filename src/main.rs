use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kex::comm::tcp::{self, Role};
use kex::config::Config;
use kex::exchange::KeyExchange;
use kex::store::FileStore;
use log::{error, info, LevelFilter};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::{path::PathBuf, process::ExitCode};
use tokio::net::TcpStream;

/// Unauthenticated DH / ECDH key exchange over TCP.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for one client, exchange keys, exit.
    Server(ExchangeArgs),
    /// Connect to the server, exchange keys, exit.
    Client(ExchangeArgs),
}

#[derive(clap::Args, Debug)]
struct ExchangeArgs {
    /// Port to listen on or connect to.
    #[arg(short, long)]
    port: u16,
    /// Use ECDH over secp256r1 instead of DH.
    #[arg(short, long)]
    ec: bool,
    /// Write diagnostics to stderr.
    #[arg(short, long)]
    debug: bool,
    /// Directory for <role>.priv, <role>.pub and <role>.shared.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let (role, opts) = match &args.command {
        Command::Server(opts) => (Role::Server, opts),
        Command::Client(opts) => (Role::Client, opts),
    };
    // Without --debug no logger is installed and nothing is printed.
    if opts.debug {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .target(env_logger::Target::Stderr)
            .init();
    }

    match run(role, opts, args.config.as_deref()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(role: Role, opts: &ExchangeArgs, config: Option<&std::path::Path>) -> Result<()> {
    let config = match config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let suite = config.suite(opts.ec)?;
    info!("{} running {}", role, suite);

    let out_dir = opts.out_dir.clone().unwrap_or(config.output_dir.clone());
    let mut sink = FileStore::new(out_dir, role.as_str());
    let mut kex = KeyExchange::new(suite);

    let addr = format!("{}:{}", config.host, opts.port);
    let mut stream = open(role, &addr).await?;

    let mut rng = ChaCha20Rng::from_entropy();
    let ret = tcp::exchange(&mut stream, &mut kex, &mut rng, &mut sink).await;
    tcp::close(&mut stream).await;
    let artifacts = ret.with_context(|| format!("{} exchange failed", role))?;
    info!("shared digest {}", artifacts.shared);
    Ok(())
}

/// Listen and accept one peer, or connect, depending on `role`.
async fn open(role: Role, addr: &str) -> Result<TcpStream> {
    let stream = match role {
        Role::Server => match tcp::bind(addr).await {
            Ok(listener) => tcp::accept_once(listener).await,
            Err(e) => Err(e),
        },
        Role::Client => tcp::connect(addr).await,
    };
    stream.with_context(|| format!("{} cannot reach {}", role, addr))
}

#[tokio::test]
async fn test_bind_failure_has_context() {
    let taken = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();
    let err = open(Role::Server, &addr).await.unwrap_err();
    assert!(format!("{:#}", err).starts_with(&format!("server cannot reach {}", addr)));
}

#[tokio::test]
async fn test_connect_failure_has_context() {
    let listener = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    let err = open(Role::Client, &addr).await.unwrap_err();
    assert!(format!("{:#}", err).starts_with(&format!("client cannot reach {}", addr)));
}
