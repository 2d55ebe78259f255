//! Repository HTTP surface.
//!
//! Public: `GET /?cid=<cid>` serves raw sealed bytes, `POST /` stores a blob
//! and answers with the derived CID bytes. Admin: reserved for token
//! issuance.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use cid::Cid;
use tracing::{info, warn};

use crate::blockstore::FileBlockstore;
use crate::Result;

/// Build the public blob router.
pub fn public_router(store: Arc<FileBlockstore>) -> Router {
    Router::new()
        .route("/", get(get_blob).post(post_blob))
        .with_state(store)
}

/// Build the admin router (token issuance stub).
pub fn admin_router() -> Router {
    Router::new().route("/", post(issue_token))
}

/// Bind and serve a router; the server runs in the background.
pub async fn serve_http(router: Router, addr: SocketAddr) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("Repository HTTP on {}", local);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!("Repository HTTP server ended: {}", e);
        }
    });
    Ok(local)
}

async fn get_blob(
    State(store): State<Arc<FileBlockstore>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(raw) = params.get("cid") else {
        return (StatusCode::NOT_ACCEPTABLE, "could not parse query").into_response();
    };
    let Ok(cid) = Cid::try_from(raw.as_str()) else {
        return (StatusCode::NOT_ACCEPTABLE, "could not parse query").into_response();
    };

    match store.get(&cid) {
        Ok(Some(data)) => {
            info!("get {} (resp is {} bytes)", cid, data.len());
            (StatusCode::OK, data).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Blob read failed for {}: {}", cid, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn post_blob(
    State(store): State<Arc<FileBlockstore>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> axum::response::Response {
    let cid = match store.put(&body) {
        Ok(cid) => cid,
        Err(e) => {
            warn!("Blob write failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // The uploader may bind the blob to a request CID for peer lookups.
    if let Some(request) = params.get("request") {
        match Cid::try_from(request.as_str()) {
            Ok(request_cid) => store.bind(request_cid, cid),
            Err(e) => warn!("Ignoring unparsable request binding: {}", e),
        }
    }

    (StatusCode::OK, cid.to_bytes()).into_response()
}

async fn issue_token() -> StatusCode {
    // Reserved for privacy-pass style issuance and redemption.
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gemipfs_core::cid as cids;
    use tower::ServiceExt;

    fn temp_store(tag: &str) -> Arc<FileBlockstore> {
        let path = std::env::temp_dir().join(format!(
            "gemipfs-repo-http-{}-{}.car",
            tag,
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();
        Arc::new(FileBlockstore::open(path).unwrap())
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_post_then_get() {
        let store = temp_store("roundtrip");
        let app = public_router(store.clone());

        let post = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from("sealed response bytes"))
            .unwrap();
        let response = app.clone().oneshot(post).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cid_bytes = body_bytes(response).await;
        let cid = Cid::try_from(cid_bytes.as_slice()).unwrap();
        assert_eq!(cid, cids::sum(b"sealed response bytes"));

        let get = Request::builder()
            .uri(format!("/?cid={}", cid))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"sealed response bytes");

        std::fs::remove_file(store.path()).ok();
    }

    #[tokio::test]
    async fn test_get_unknown_cid_is_404() {
        let store = temp_store("miss");
        let app = public_router(store.clone());

        let missing = cids::sum(b"never stored");
        let get = Request::builder()
            .uri(format!("/?cid={}", missing))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        std::fs::remove_file(store.path()).ok();
    }

    #[tokio::test]
    async fn test_get_bad_cid_is_406() {
        let store = temp_store("badcid");
        let app = public_router(store.clone());

        let get = Request::builder()
            .uri("/?cid=not-a-cid")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

        std::fs::remove_file(store.path()).ok();
    }

    #[tokio::test]
    async fn test_post_with_request_binding() {
        let store = temp_store("binding");
        let app = public_router(store.clone());

        let request_cid = cids::sum(b"the canonical request");
        let post = Request::builder()
            .method("POST")
            .uri(format!("/?request={}", request_cid))
            .body(Body::from("bound sealed bytes"))
            .unwrap();
        let response = app.oneshot(post).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bound = store.lookup(&request_cid).unwrap();
        assert_eq!(bound, cids::sum(b"bound sealed bytes"));

        std::fs::remove_file(store.path()).ok();
    }

    #[tokio::test]
    async fn test_admin_stub_accepts_post() {
        let app = admin_router();
        let post = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(post).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
