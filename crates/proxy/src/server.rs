//! Proxy front server.
//!
//! Accepts plaintext HTTP requests (the TLS-terminating interception edge
//! sits in front) and hands each one to the resolution pipeline. Failures
//! surface as 502-class responses; nothing crashes the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Router;
use tracing::{info, warn};
use url::Url;

use crate::pipeline::Pipeline;
use crate::Result;

/// Largest buffered request body.
const MAX_BODY: usize = 16 * 1024 * 1024;

/// Bind the front server on `addr`; runs in the background.
pub async fn serve(pipeline: Arc<Pipeline>, addr: SocketAddr) -> Result<SocketAddr> {
    let app = Router::new()
        .fallback(handle_request)
        .with_state(pipeline);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("Proxy listening on {}", local);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Proxy server ended: {}", e);
        }
    });
    Ok(local)
}

async fn handle_request(
    State(pipeline): State<Arc<Pipeline>>,
    request: axum::http::Request<Body>,
) -> AxumResponse {
    let (parts, body) = request.into_parts();

    let url = match request_url(&parts) {
        Ok(url) => url,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let headers: Vec<String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| format!("{}: {}", name, v)))
        .collect();

    let body = match to_bytes(body, MAX_BODY).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match pipeline
        .handle(parts.method.as_str(), url, headers, body)
        .await
    {
        Ok(response) => to_axum_response(response),
        Err(e) => {
            warn!("Request failed: {}", e);
            // Resolution failures of every kind surface as a gateway error.
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Rebuild the absolute request URL.
///
/// Proxy-style requests carry an absolute-form URI; intercepted origin-form
/// requests are reassembled from the Host header, assuming the https origin
/// the interception edge terminated.
fn request_url(parts: &axum::http::request::Parts) -> std::result::Result<Url, String> {
    let uri = &parts.uri;
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string()).map_err(|e| e.to_string());
    }

    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing host header".to_string())?;
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Url::parse(&format!("https://{}{}", host, path)).map_err(|e| e.to_string())
}

fn to_axum_response(response: gemipfs_core::httpwire::ResponseParts) -> AxumResponse {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut out = AxumResponse::new(Body::from(response.body));
    *out.status_mut() = status;
    for line in &response.headers {
        if let Some((name, value)) = line.split_once(':') {
            if let (Ok(name), Ok(value)) = (
                name.trim().parse::<HeaderName>(),
                HeaderValue::from_str(value.trim()),
            ) {
                out.headers_mut().append(name, value);
            }
        }
    }
    out
}
