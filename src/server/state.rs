//! Application state shared across handlers.

use crate::cache::ConversionCache;
use crate::config::Config;
use crate::converter::Converter;
use crate::delivery::DeliveryService;
use crate::discovery::DiscoveryService;
use crate::metadata::MetadataAggregator;
use crate::model::{FolioEvent, ServerStatus};
use crate::provider::{BookProvider, SecretStore};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared application state, cheap to clone (everything is `Arc`-backed).
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Book enumeration/resolution collaborator.
    pub provider: Arc<dyn BookProvider>,
    /// Secret storage collaborator (SMTP password, etc.).
    pub secrets: Arc<dyn SecretStore>,
    /// External converter binary wrapper.
    pub converter: Arc<Converter>,
    /// On-disk transcoded-artifact cache.
    pub cache: Arc<ConversionCache>,
    /// Metadata provider fan-out.
    pub metadata: Arc<MetadataAggregator>,
    /// Kindle email delivery.
    pub delivery: Arc<DeliveryService>,
    /// LAN discovery, if advertising/browsing is enabled.
    pub discovery: Option<Arc<DiscoveryService>>,
    /// Crate-wide event bus (status changes, progress ticks, discovery events).
    pub events: broadcast::Sender<FolioEvent>,
    active_downloads: Arc<AtomicUsize>,
    bound: Arc<RwLock<Option<(String, u16)>>>,
}

impl AppState {
    /// Assemble state from already-constructed leaf collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn BookProvider>,
        secrets: Arc<dyn SecretStore>,
        converter: Arc<Converter>,
        cache: Arc<ConversionCache>,
        metadata: Arc<MetadataAggregator>,
        delivery: Arc<DeliveryService>,
        discovery: Option<Arc<DiscoveryService>>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            provider,
            secrets,
            converter,
            cache,
            metadata,
            delivery,
            discovery,
            events,
            active_downloads: Arc::new(AtomicUsize::new(0)),
            bound: Arc::new(RwLock::new(None)),
        }
    }

    /// Record the bound server URL/port and publish a status change.
    pub fn mark_bound(&self, url: String, port: u16) {
        *self.bound.write() = Some((url, port));
        self.publish_status();
    }

    /// Current observable status.
    pub fn status(&self) -> ServerStatus {
        let bound = self.bound.read().clone();
        ServerStatus {
            running: bound.is_some(),
            server_url: bound.as_ref().map(|(url, _)| url.clone()),
            port: bound.as_ref().map(|(_, port)| *port),
            active_downloads: self.active_downloads.load(Ordering::SeqCst),
        }
    }

    /// Increment the in-flight download counter and publish the change.
    pub fn begin_download(&self) {
        self.active_downloads.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(FolioEvent::DownloadCountChanged(
            self.active_downloads.load(Ordering::SeqCst),
        ));
    }

    /// Decrement the in-flight download counter and publish the change.
    /// Must be called on every exit path of a download handler, including errors.
    pub fn end_download(&self) {
        self.active_downloads.fetch_sub(1, Ordering::SeqCst);
        let _ = self.events.send(FolioEvent::DownloadCountChanged(
            self.active_downloads.load(Ordering::SeqCst),
        ));
    }

    fn publish_status(&self) {
        let _ = self.events.send(FolioEvent::ServerStatusChanged(self.status()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FileSecretStore, FsBookProvider};

    fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let provider: Arc<dyn BookProvider> = Arc::new(FsBookProvider::new(dir.path(), true).unwrap());
        let secrets: Arc<dyn SecretStore> =
            Arc::new(FileSecretStore::new(dir.path().join("secrets.json")));
        let converter = Arc::new(Converter::new(None));
        let cache = Arc::new(ConversionCache::new(dir.path().join("cache")).unwrap());
        let metadata = Arc::new(MetadataAggregator::new(Vec::new()));
        let delivery = Arc::new(DeliveryService::new(None));

        AppState::new(
            Arc::new(Config::default()),
            provider,
            secrets,
            converter,
            cache,
            metadata,
            delivery,
            None,
        )
    }

    #[test]
    fn download_counter_increments_and_decrements() {
        let state = test_state();
        assert_eq!(state.status().active_downloads, 0);
        state.begin_download();
        assert_eq!(state.status().active_downloads, 1);
        state.end_download();
        assert_eq!(state.status().active_downloads, 0);
    }

    #[test]
    fn mark_bound_flips_status_to_running() {
        let state = test_state();
        assert!(!state.status().running);
        state.mark_bound("http://localhost:8080".to_string(), 8080);
        let status = state.status();
        assert!(status.running);
        assert_eq!(status.port, Some(8080));
    }
}
