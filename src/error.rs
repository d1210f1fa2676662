//! Error types for every component, unified at the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by [`crate::converter::Converter`].
#[derive(Error, Debug)]
pub enum ConverterError {
    /// No converter binary could be located.
    #[error("converter binary not found")]
    ConverterMissing,
    /// `source`'s extension is not in the supported-input set.
    #[error("unsupported input format: {0}")]
    UnsupportedInput(String),
    /// `target` is not in the supported-output set.
    #[error("unsupported output format: {0}")]
    UnsupportedOutput(String),
    /// `source` does not exist on disk.
    #[error("source file missing: {0}")]
    SourceMissing(PathBuf),
    /// The job was cancelled before it completed.
    #[error("conversion cancelled")]
    Cancelled,
    /// The subprocess exited non-zero, or exited zero without producing output.
    #[error("conversion process failed (exit {exit_code:?}): {stderr_tail}")]
    ProcessFailed {
        /// Process exit code, if the process actually exited (vs. being killed by a signal).
        exit_code: Option<i32>,
        /// Last portion of captured stderr, for diagnostics.
        stderr_tail: String,
    },
    /// Underlying I/O failure (spawn, read, rename).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`crate::metadata::MetadataAggregator`] and providers.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// No providers are configured.
    #[error("no metadata providers available")]
    NoProvidersAvailable,
    /// Every provider in the ordered list failed.
    #[error("all providers failed: {0:?}")]
    AllProvidersFailed(Vec<String>),
    /// A network-level failure talking to a provider.
    #[error("network error: {0}")]
    Network(String),
    /// The provider had nothing for this query.
    #[error("not found")]
    NotFound,
    /// The provider is rate-limiting this client.
    #[error("rate limited")]
    RateLimited,
    /// The query itself was malformed (e.g. not a valid ISBN).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The provider returned a server-side error.
    #[error("provider server error: {0}")]
    ServerError(String),
}

/// Errors raised by [`crate::smtp::SmtpClient`].
#[derive(Error, Debug)]
pub enum SmtpError {
    /// The TCP connection could not be established.
    #[error("stream setup failed: {0}")]
    StreamSetupFailed(String),
    /// The TLS handshake (implicit or STARTTLS) failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
    /// `AUTH LOGIN` was rejected.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// The server returned a 4xx/5xx response to some command.
    #[error("server rejected command: {code} {text}")]
    ServerRejected {
        /// Three-digit SMTP reply code.
        code: u16,
        /// Reply text (last line of a multi-line response).
        text: String,
    },
    /// A stage of the conversation exceeded its deadline.
    #[error("timeout")]
    Timeout,
    /// The send was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

/// Errors raised by [`crate::delivery::DeliveryService`].
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Destination address is not a recognized Kindle ingest address.
    #[error("invalid destination address: {0}")]
    InvalidDestination(String),
    /// The source file does not exist.
    #[error("source file missing: {0}")]
    SourceMissing(PathBuf),
    /// The source file exceeds the 50 MiB delivery limit.
    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),
    /// No SMTP configuration/credentials are available.
    #[error("delivery is not configured")]
    NotConfigured,
    /// The underlying SMTP send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl From<SmtpError> for DeliveryError {
    fn from(e: SmtpError) -> Self {
        DeliveryError::SendFailed(e.to_string())
    }
}

/// Errors raised by [`crate::discovery::DiscoveryService`].
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Advertising the service failed.
    #[error("advertisement failed: {0}")]
    AdvertisementFailed(String),
    /// Browsing for peers failed.
    #[error("browsing failed: {0}")]
    BrowsingFailed(String),
    /// Resolving a peer's host:port failed or timed out.
    #[error("resolution failed")]
    ResolutionFailed,
    /// The platform denied local-network access.
    #[error("not authorized for local network access")]
    NotAuthorized,
}

/// Top-level error for anything that can cross the HTTP boundary.
#[derive(Error, Debug)]
pub enum FolioError {
    /// No port in the configured range could be bound.
    #[error("no port available in the configured range")]
    PortUnavailable,
    /// The requested book id is not known to the `BookProvider`.
    #[error("book not found: {0}")]
    BookNotFound(String),
    /// A converter-level failure.
    #[error(transparent)]
    Converter(#[from] ConverterError),
    /// A metadata-aggregator failure.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// A delivery failure.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    /// A discovery failure.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// Conversion did not finish within the allotted deadline.
    #[error("conversion timed out")]
    ConversionTimeout,
    /// Generic I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FolioError>;

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{status}</title></head>\
         <body><h1>{status}</h1><p>{msg}</p></body></html>",
        status = status,
        msg = escape_html(message)
    );
    (status, axum::response::Html(body)).into_response()
}

impl IntoResponse for FolioError {
    fn into_response(self) -> Response {
        match &self {
            FolioError::BookNotFound(_) => {
                tracing::warn!(error = %self, "book not found");
                error_page(StatusCode::NOT_FOUND, &self.to_string())
            }
            FolioError::PortUnavailable => {
                tracing::error!(error = %self, "port range exhausted");
                error_page(StatusCode::INTERNAL_SERVER_ERROR, &self.to_string())
            }
            FolioError::Converter(ConverterError::ConverterMissing) => {
                tracing::warn!("converter binary unavailable");
                error_page(StatusCode::SERVICE_UNAVAILABLE, &self.to_string())
            }
            FolioError::ConversionTimeout => {
                tracing::error!("conversion exceeded deadline");
                error_page(StatusCode::GATEWAY_TIMEOUT, &self.to_string())
            }
            _ => {
                tracing::error!(error = %self, "request error");
                error_page(StatusCode::INTERNAL_SERVER_ERROR, &self.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_covers_all_five_entities() {
        let escaped = escape_html("<b>\"Tom & Jerry\"</b>");
        assert_eq!(escaped, "&lt;b&gt;&quot;Tom &amp; Jerry&quot;&lt;/b&gt;");
    }

    #[test]
    fn smtp_error_maps_into_delivery_error() {
        let e: DeliveryError = SmtpError::AuthenticationFailed.into();
        assert!(matches!(e, DeliveryError::SendFailed(_)));
    }
}
