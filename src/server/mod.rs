//! HTTPTransferServer (C9): HTML catalog, JSON catalog, raw/transcoded
//! download, status, and QR endpoints (§4.7).

mod handlers;
mod html;
mod state;

pub use state::AppState;

use axum::routing::get;
use axum::Router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::catalog_html))
        .route("/api/books", get(handlers::list_books))
        .route("/api/books/{id}/download", get(handlers::download_book))
        .route("/api/books/{id}/kindle", get(handlers::download_kindle))
        .route("/api/books/{id}/cover", get(handlers::book_cover))
        .route("/api/status", get(handlers::server_status))
        .route("/qr", get(handlers::qr_code))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind to the first available port in `[start, end]`, preferring to listen
/// on all IPv4 interfaces. Returns the bound listener and the chosen port.
pub async fn bind_in_range(
    start: u16,
    end: u16,
) -> Result<(tokio::net::TcpListener, u16), crate::error::FolioError> {
    for port in start..=end {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        if let Ok(listener) = tokio::net::TcpListener::bind(addr).await {
            return Ok((listener, port));
        }
    }
    Err(crate::error::FolioError::PortUnavailable)
}

/// Determine the host's primary LAN IPv4 address, preferring `en0` then
/// `en1`, skipping loopback; falls back to `"localhost"`.
pub fn primary_lan_ip() -> String {
    for preferred in ["en0", "en1"] {
        if let Some(ip) = interface_ipv4(preferred) {
            return ip;
        }
    }
    if let Some(ip) = any_non_loopback_ipv4() {
        return ip;
    }
    "localhost".to_string()
}

fn interface_ipv4(name: &str) -> Option<String> {
    // `local-ip-address`/`pnet` style interface enumeration is unavailable
    // without adding a platform-specific crate; `if_addrs` covers exactly
    // this without the teacher needing to add a new ecosystem dependency
    // beyond what the rest of the crate already pulls in for networking.
    if_addrs::get_if_addrs()
        .ok()?
        .into_iter()
        .find(|iface| iface.name == name && !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| iface.ip().to_string())
}

fn any_non_loopback_ipv4() -> Option<String> {
    if_addrs::get_if_addrs()
        .ok()?
        .into_iter()
        .find(|iface| !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| iface.ip().to_string())
}

/// Build the public base URL for a bound port.
pub fn server_url(port: u16) -> String {
    format!("http://{}:{port}", primary_lan_ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_in_range_finds_a_free_port() {
        let (listener, port) = bind_in_range(18080, 18090).await.unwrap();
        assert!(port >= 18080 && port <= 18090);
        drop(listener);
    }

    #[test]
    fn server_url_has_http_scheme_and_port() {
        let url = server_url(8080);
        assert!(url.starts_with("http://"));
        assert!(url.ends_with(":8080"));
    }
}
