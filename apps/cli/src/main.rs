//! gemipfs CLI
//!
//! Runs the three node roles of the fetch network: the user-facing proxy,
//! the exit relay, and the repository.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multiaddr::Multiaddr;
use tracing::info;
use url::Url;

use gemipfs_crypto::load_or_generate_identity;
use gemipfs_net::TcpTransport;
use gemipfs_proxy::{load_or_create_ca, Pipeline, ProxyConfig};
use gemipfs_relay::{ExitConfig, ExitHandler};
use gemipfs_repo::{admin_router, public_router, serve_peer, serve_http, FileBlockstore};
use gemipfs_router::{Router, RouterConfig};
use gemipfs_store::CarStore;

/// gemipfs - privacy-preserving shared fetch network
#[derive(Parser)]
#[command(name = "gemipfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the user-facing proxy
    Proxy {
        /// Proxy listen address
        #[arg(long, default_value = ":8080")]
        addr: String,

        /// Relay (exit) host:port
        #[arg(long, default_value = "127.0.0.1:8081")]
        remote: String,

        /// Repository URL
        #[arg(long, default_value = "http://127.0.0.1:8082")]
        repo: String,

        /// Where to store data (a .gemipfs directory is created here)
        #[arg(long, default_value = "./")]
        store: PathBuf,
    },

    /// Run an exit relay
    Relay {
        /// Relay listen address
        #[arg(long, default_value = ":8081")]
        addr: String,

        /// Path to the relay identity key
        #[arg(long, default_value = "gemipfs.key")]
        keyfile: PathBuf,
    },

    /// Run a repository
    Repo {
        /// Backing CAR file
        #[arg(long, default_value = "tmp.car")]
        store: PathBuf,

        /// Public listen address
        #[arg(long, default_value = ":8082")]
        pubaddr: String,

        /// Admin listen address
        #[arg(long, default_value = ":8083")]
        adminaddr: String,

        /// Peer lookup listen address
        #[arg(long, default_value = ":4001")]
        peeraddr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Proxy {
            addr,
            remote,
            repo,
            store,
        } => run_proxy(&addr, &remote, &repo, store).await,
        Commands::Relay { addr, keyfile } => run_relay(&addr, &keyfile).await,
        Commands::Repo {
            store,
            pubaddr,
            adminaddr,
            peeraddr,
        } => run_repo(store, &pubaddr, &adminaddr, &peeraddr).await,
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_proxy(addr: &str, remote: &str, repo: &str, store: PathBuf) -> Result<()> {
    let listen = parse_listen_addr(addr)?;
    let repo_url = Url::parse(repo).context("could not parse repo URL")?;
    let relay_addr = host_port_to_multiaddr(remote).context("could not parse relay address")?;

    // The interception edge roots its leaf certificates here.
    load_or_create_ca(std::path::Path::new("."))?;

    let store_dir = store.join(".gemipfs");
    let car_store = Arc::new(CarStore::new(&store_dir)?);

    let transport = Arc::new(TcpTransport::new());
    let router = Arc::new(Router::new(transport.clone(), RouterConfig::default()));
    let pipeline = Arc::new(Pipeline::new(
        transport,
        router,
        car_store,
        ProxyConfig {
            relay_addr,
            repo_url,
        },
    ));

    let local = gemipfs_proxy::serve(pipeline, listen).await?;
    info!("Proxy ready on {} (relay {})", local, remote);

    wait_for_shutdown().await
}

async fn run_relay(addr: &str, keyfile: &PathBuf) -> Result<()> {
    let listen = parse_listen_addr(addr)?;
    let identity = load_or_generate_identity(keyfile)?;
    let handler = Arc::new(ExitHandler::new(identity, ExitConfig::default()));

    if let Ok(peer_id) = handler.public().peer_id() {
        info!("Relay identity {}", peer_id);
    }

    let local = gemipfs_relay::serve(handler, listen).await?;
    info!("Relay ready on {}", local);

    wait_for_shutdown().await
}

async fn run_repo(store: PathBuf, pubaddr: &str, adminaddr: &str, peeraddr: &str) -> Result<()> {
    let blockstore = Arc::new(FileBlockstore::open(&store)?);
    info!("Repository backed by {:?} ({} blobs)", store, blockstore.len());

    let public = serve_http(
        public_router(blockstore.clone()),
        parse_listen_addr(pubaddr)?,
    )
    .await?;
    let admin = serve_http(admin_router(), parse_listen_addr(adminaddr)?).await?;
    let peer = serve_peer(blockstore, parse_listen_addr(peeraddr)?).await?;
    info!(
        "Repository ready: public {}, admin {}, peer {}",
        public, admin, peer
    );

    wait_for_shutdown().await
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");
    Ok(())
}

/// Accept `:8080` as shorthand for all-interfaces.
fn parse_listen_addr(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .with_context(|| format!("could not parse listen address {}", addr))
}

/// Turn `host:port` into a dialable multiaddr.
fn host_port_to_multiaddr(remote: &str) -> Result<Multiaddr> {
    let (host, port) = remote
        .rsplit_once(':')
        .context("expected host:port")?;
    let addr = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => format!("/ip4/{}/tcp/{}", ip, port),
        Ok(IpAddr::V6(ip)) => format!("/ip6/{}/tcp/{}", ip, port),
        Err(_) => format!("/dns4/{}/tcp/{}", host, port),
    };
    Ok(addr.parse()?)
}
