//! End-to-end resolution pipeline tests.
//!
//! Everything runs in-process: an axum origin server plays the web, an axum
//! repository holds sealed blobs, the relay answers exit streams over the
//! in-memory transport, and the proxy pipeline ties them together.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router as AxumRouter;
use multiaddr::Multiaddr;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use url::Url;

use gemipfs_crypto::IdentityKey;
use gemipfs_net::{MemoryTransport, EXIT_PROTOCOL, ID_PROTOCOL, REPO_PROTOCOL};
use gemipfs_proxy::{Pipeline, ProxyConfig, ProxyError};
use gemipfs_relay::{ExitConfig, ExitHandler};
use gemipfs_repo::{public_router, serve_http, FileBlockstore};
use gemipfs_router::{Router, RouterConfig};
use gemipfs_store::CarStore;

const RELAY_ADDR: &str = "/ip4/127.0.0.1/tcp/9301";

/// A peer id string the repo provider addrs can carry; any valid inline id
/// works, the memory transport matches on the full addr string.
const REPO_PEER: &str = "12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN";

fn relay_addr() -> Multiaddr {
    RELAY_ADDR.parse().unwrap()
}

async fn spawn_origin() -> SocketAddr {
    let app = AxumRouter::new().route(
        "/hello",
        get(|| async { ([("cache-control", "max-age=60")], "hello") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn temp_repo(tag: &str) -> Arc<FileBlockstore> {
    let path = std::env::temp_dir().join(format!(
        "gemipfs-e2e-{}-{}.car",
        tag,
        std::process::id()
    ));
    std::fs::remove_file(&path).ok();
    Arc::new(FileBlockstore::open(path).unwrap())
}

fn temp_store(tag: &str) -> Arc<CarStore> {
    let dir = std::env::temp_dir().join(format!(
        "gemipfs-e2e-store-{}-{}",
        tag,
        std::process::id()
    ));
    std::fs::remove_dir_all(&dir).ok();
    Arc::new(CarStore::new(dir).unwrap())
}

/// Register a relay on the transport, counting exit streams it serves.
fn register_relay(
    transport: &MemoryTransport,
    exit: Arc<ExitHandler>,
    counter: Arc<AtomicUsize>,
) {
    let for_exit = exit.clone();
    transport.register(&relay_addr(), EXIT_PROTOCOL, move |stream| {
        let exit = for_exit.clone();
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            exit.handle_stream(stream).await;
        }
    });

    transport.register(&relay_addr(), ID_PROTOCOL, move |mut stream| {
        let exit = exit.clone();
        async move {
            let bytes = exit.public().to_bytes().unwrap();
            stream.write_all(&bytes).await.ok();
        }
    });
}

fn pipeline_with_relay(
    transport: MemoryTransport,
    store: Arc<CarStore>,
    repo_url: Url,
    index_url: &str,
    relay: Multiaddr,
) -> Pipeline {
    let transport: Arc<MemoryTransport> = Arc::new(transport);
    let router = Arc::new(Router::new(
        transport.clone(),
        RouterConfig {
            cache_size: 64,
            index_url: index_url.to_string(),
        },
    ));
    Pipeline::new(
        transport,
        router,
        store,
        ProxyConfig {
            relay_addr: relay,
            repo_url,
        },
    )
}

fn pipeline_for(
    transport: MemoryTransport,
    store: Arc<CarStore>,
    repo_url: Url,
    index_url: &str,
) -> Pipeline {
    pipeline_with_relay(transport, store, repo_url, index_url, relay_addr())
}

/// No index reachable: discovery degrades to an empty peer list.
const DEAD_INDEX: &str = "http://127.0.0.1:1";

#[tokio::test]
async fn test_fresh_fetch_through_relay() {
    let origin = spawn_origin().await;
    let repo = temp_repo("fresh");
    let repo_addr = serve_http(public_router(repo.clone()), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let repo_url = Url::parse(&format!("http://{}/", repo_addr)).unwrap();

    let transport = MemoryTransport::new();
    let exit = Arc::new(ExitHandler::new(
        IdentityKey::generate_ed25519(),
        ExitConfig::default(),
    ));
    let hits = Arc::new(AtomicUsize::new(0));
    register_relay(&transport, exit, hits.clone());

    let pipeline = pipeline_for(transport, temp_store("fresh"), repo_url, DEAD_INDEX);

    let url = Url::parse(&format!("http://{}/hello", origin)).unwrap();
    let response = pipeline
        .handle("GET", url, Vec::new(), Vec::new())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"hello");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The sealed blob landed in the repository.
    assert_eq!(repo.len(), 1);
    std::fs::remove_file(repo.path()).ok();
}

#[tokio::test]
async fn test_replay_served_from_local_store() {
    let origin = spawn_origin().await;
    let repo = temp_repo("replay");
    let repo_addr = serve_http(public_router(repo.clone()), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let repo_url = Url::parse(&format!("http://{}/", repo_addr)).unwrap();

    let transport = MemoryTransport::new();
    let exit = Arc::new(ExitHandler::new(
        IdentityKey::generate_ed25519(),
        ExitConfig::default(),
    ));
    let hits = Arc::new(AtomicUsize::new(0));
    register_relay(&transport, exit, hits.clone());

    let pipeline = pipeline_for(transport, temp_store("replay"), repo_url, DEAD_INDEX);
    let url = Url::parse(&format!("http://{}/hello", origin)).unwrap();

    let first = pipeline
        .handle("GET", url.clone(), Vec::new(), Vec::new())
        .await
        .unwrap();
    let second = pipeline
        .handle("GET", url, Vec::new(), Vec::new())
        .await
        .unwrap();

    // The replay decrypts to the identical transcript without another exit.
    assert_eq!(first.body, second.body);
    assert_eq!(first.headers, second.headers);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    std::fs::remove_file(repo.path()).ok();
}

#[tokio::test]
async fn test_peer_resolution_serves_other_proxies() {
    // Proxy A populates the repository through the relay; proxy B finds the
    // response through the content index and the repository peer protocol,
    // never contacting a relay.
    let origin = spawn_origin().await;
    let repo = temp_repo("peers");
    let repo_addr = serve_http(public_router(repo.clone()), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let repo_url = Url::parse(&format!("http://{}/", repo_addr)).unwrap();

    let transport = MemoryTransport::new();
    let exit = Arc::new(ExitHandler::new(
        IdentityKey::generate_ed25519(),
        ExitConfig::default(),
    ));
    register_relay(&transport, exit, Arc::new(AtomicUsize::new(0)));

    // Proxy A goes through the relay.
    let pipeline_a = pipeline_for(
        transport.clone(),
        temp_store("peers-a"),
        repo_url.clone(),
        DEAD_INDEX,
    );
    let url = Url::parse(&format!("http://{}/hello", origin)).unwrap();
    pipeline_a
        .handle("GET", url.clone(), Vec::new(), Vec::new())
        .await
        .unwrap();

    // The repository answers peer lookups from its binding table.
    let peer_addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/9310/p2p/{}", REPO_PEER)
        .parse()
        .unwrap();
    let lookup_repo = repo.clone();
    transport.register(&peer_addr, REPO_PROTOCOL, move |mut stream| {
        let repo = lookup_repo.clone();
        async move {
            let mut raw = Vec::new();
            stream.read_to_end(&mut raw).await.ok();
            if let Ok(request) = cid::Cid::try_from(raw.as_slice()) {
                if let Some(response) = repo.lookup(&request) {
                    stream.write_all(&response.to_bytes()).await.ok();
                }
            }
        }
    });

    // A local content index that always advertises the repository peer.
    let index_addr = spawn_index(peer_addr.to_string()).await;

    // Proxy B points at a dead relay; peers are its only road.
    let pipeline_b = pipeline_with_relay(
        transport.clone(),
        temp_store("peers-b"),
        repo_url,
        &format!("http://{}", index_addr),
        "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
    );
    let response = pipeline_b
        .handle("GET", url, Vec::new(), Vec::new())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"hello");

    std::fs::remove_file(repo.path()).ok();
}

/// Content index stub: advertises `provider_addr` for any queried multihash.
async fn spawn_index(provider_addr: String) -> SocketAddr {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use multibase::Base;

    let app = AxumRouter::new().route(
        "/multihash/:mh",
        get(move |axum::extract::Path(mh): axum::extract::Path<String>| {
            let provider_addr = provider_addr.clone();
            async move {
                let decoded = Base::Base58Btc.decode(&mh).unwrap_or_default();
                let body = serde_json::json!({
                    "MultihashResults": [{
                        "Multihash": BASE64.encode(decoded),
                        "ProviderResults": [{
                            "Provider": {
                                "ID": REPO_PEER,
                                "Addrs": [provider_addr],
                            }
                        }]
                    }]
                });
                axum::Json(body)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_tampered_attestation_is_rejected() {
    let origin = spawn_origin().await;
    let repo = temp_repo("tamper");
    let repo_addr = serve_http(public_router(repo.clone()), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let repo_url = Url::parse(&format!("http://{}/", repo_addr)).unwrap();

    let transport = MemoryTransport::new();
    let exit = Arc::new(ExitHandler::new(
        IdentityKey::generate_ed25519(),
        ExitConfig::default(),
    ));

    // A meddling middlebox: forwards the exit exchange but flips the last
    // byte of the attestation (inside the signature field).
    let for_exit = exit.clone();
    transport.register(&relay_addr(), EXIT_PROTOCOL, move |mut stream| {
        let exit = for_exit.clone();
        async move {
            let (mut inner_client, inner_server) = duplex(256 * 1024);
            let task = tokio::spawn(async move {
                exit.handle_stream(Box::new(inner_server)).await;
            });

            let mut query = Vec::new();
            stream.read_to_end(&mut query).await.ok();
            inner_client.write_all(&query).await.ok();
            inner_client.shutdown().await.ok();

            let mut reply = Vec::new();
            inner_client.read_to_end(&mut reply).await.ok();
            task.await.ok();

            if let Some(last) = reply.last_mut() {
                *last ^= 0xFF;
            }
            stream.write_all(&reply).await.ok();
        }
    });
    transport.register(&relay_addr(), ID_PROTOCOL, move |mut stream| {
        let exit = exit.clone();
        async move {
            let bytes = exit.public().to_bytes().unwrap();
            stream.write_all(&bytes).await.ok();
        }
    });

    let pipeline = pipeline_for(transport, temp_store("tamper"), repo_url, DEAD_INDEX);
    let url = Url::parse(&format!("http://{}/hello", origin)).unwrap();

    let result = pipeline.handle("GET", url, Vec::new(), Vec::new()).await;
    assert!(matches!(result, Err(ProxyError::AttestationInvalid)));

    std::fs::remove_file(repo.path()).ok();
}

#[tokio::test]
async fn test_repo_get_failure_surfaces_repo_unavailable() {
    let origin = spawn_origin().await;

    // A repository that accepts uploads but 404s every read.
    let repo = temp_repo("sour");
    let upload_repo = repo.clone();
    let app = AxumRouter::new().route(
        "/",
        get(|| async { axum::http::StatusCode::NOT_FOUND })
            .post(move |body: axum::body::Bytes| {
                let repo = upload_repo.clone();
                async move {
                    let cid = repo.put(&body).unwrap();
                    cid.to_bytes()
                }
            }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let repo_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let repo_url = Url::parse(&format!("http://{}/", repo_addr)).unwrap();

    let transport = MemoryTransport::new();
    let exit = Arc::new(ExitHandler::new(
        IdentityKey::generate_ed25519(),
        ExitConfig::default(),
    ));
    register_relay(&transport, exit, Arc::new(AtomicUsize::new(0)));

    let pipeline = pipeline_for(transport, temp_store("sour"), repo_url, DEAD_INDEX);
    let url = Url::parse(&format!("http://{}/hello", origin)).unwrap();

    let result = pipeline.handle("GET", url, Vec::new(), Vec::new()).await;
    assert!(matches!(result, Err(ProxyError::RepoUnavailable(_))));

    std::fs::remove_file(repo.path()).ok();
}

#[tokio::test]
async fn test_relay_silence_surfaces_upstream_failure() {
    // An origin that refuses connections: the relay closes without an
    // attestation and the proxy reports the upstream failure.
    let repo = temp_repo("silent");
    let repo_addr = serve_http(public_router(repo.clone()), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let repo_url = Url::parse(&format!("http://{}/", repo_addr)).unwrap();

    let transport = MemoryTransport::new();
    let exit = Arc::new(ExitHandler::new(
        IdentityKey::generate_ed25519(),
        ExitConfig {
            fetch_timeout: Duration::from_millis(500),
        },
    ));
    register_relay(&transport, exit, Arc::new(AtomicUsize::new(0)));

    let pipeline = pipeline_for(transport, temp_store("silent"), repo_url, DEAD_INDEX);
    let url = Url::parse("http://127.0.0.1:1/unreachable").unwrap();

    let result = pipeline.handle("GET", url, Vec::new(), Vec::new()).await;
    assert!(matches!(result, Err(ProxyError::UpstreamFetchFailed(_))));

    std::fs::remove_file(repo.path()).ok();
}
