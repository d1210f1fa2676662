//! folio-core: the transfer & delivery core for a personal ebook library
//! server.
//!
//! Serves a directory of ebooks over HTTP to LAN devices, advertises itself
//! via mDNS, transcodes to Kindle-compatible formats on demand, aggregates
//! metadata from public providers, and delivers books to a Kindle ingest
//! address over SMTP.
//!
//! # Features
//!
//! - HTML + JSON catalog, raw and transcoded streaming downloads
//! - On-disk, single-flight conversion cache
//! - OpenLibrary / Google Books metadata aggregation with ISBN validation
//! - Hand-rolled SMTP client with implicit and opportunistic TLS
//! - `_folio._tcp` LAN discovery via mDNS
//! - QR-code rendering of the server's connect URL

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// On-disk transcoded-artifact cache.
pub mod cache;
/// External converter binary wrapper.
pub mod converter;
/// CLI surface and layered configuration.
pub mod config;
/// Kindle email delivery.
pub mod delivery;
/// LAN discovery via mDNS.
pub mod discovery;
/// Error types.
pub mod error;
/// Metadata provider aggregation.
pub mod metadata;
/// Core data model.
pub mod model;
/// `BookProvider`/`SecretStore` contracts and default implementations.
pub mod provider;
/// QR code rendering.
pub mod qrcode;
/// HTTP server.
pub mod server;
/// SMTP client.
pub mod smtp;

pub use config::{Cli, Command, Config};
pub use error::{FolioError, Result};
pub use server::AppState;
