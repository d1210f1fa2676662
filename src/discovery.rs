//! DiscoveryService (C8): `mdns-sd`-backed LAN advertisement and browsing
//! (§4.6).

use crate::error::DiscoveryError;
use crate::model::{DiscoveredPeer, DiscoveryEvent};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::time::Duration;

const SERVICE_TYPE: &str = "_folio._tcp.local.";
const RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Advertises this instance and browses for peers on the LAN.
pub struct DiscoveryService {
    daemon: ServiceDaemon,
    own_instance_name: String,
}

impl DiscoveryService {
    /// Create a service bound to the local mDNS daemon. `instance_name`
    /// identifies this instance so `browse` can filter it out of its own results.
    pub fn new(instance_name: impl Into<String>) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::AdvertisementFailed(e.to_string()))?;
        Ok(Self {
            daemon,
            own_instance_name: instance_name.into(),
        })
    }

    /// Advertise `_folio._tcp` on `port` with the given TXT record entries.
    /// Idempotent: calling this again with a new port re-registers cleanly.
    pub fn advertise(&self, port: u16, txt: HashMap<String, String>) -> Result<(), DiscoveryError> {
        let host_name = format!("{}.local.", hostname());
        let txt_refs: Vec<(&str, &str)> = txt.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &self.own_instance_name,
            &host_name,
            "",
            port,
            &txt_refs[..],
        )
        .map_err(|e| DiscoveryError::AdvertisementFailed(e.to_string()))?
        .enable_addr_auto();

        self.daemon
            .register(info)
            .map_err(|e| DiscoveryError::AdvertisementFailed(e.to_string()))
    }

    /// Stop advertising.
    pub fn unadvertise(&self) -> Result<(), DiscoveryError> {
        self.daemon
            .unregister(&format!("{}.{SERVICE_TYPE}", self.own_instance_name))
            .map_err(|e| DiscoveryError::AdvertisementFailed(e.to_string()))
            .map(|_| ())
    }

    /// Browse for peers, filtering out this instance's own advertisement,
    /// and emit `Added`/`Removed` events as they are observed.
    pub fn browse(&self) -> Result<tokio::sync::mpsc::UnboundedReceiver<DiscoveryEvent>, DiscoveryError> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::BrowsingFailed(e.to_string()))?;
        let own_name = self.own_instance_name.clone();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let id = info.get_fullname().to_string();
                        if id.starts_with(&own_name) {
                            continue;
                        }
                        let peer = DiscoveredPeer {
                            id: id.clone(),
                            name: info.get_fullname().to_string(),
                            host: info.get_hostname().to_string().into(),
                            port: Some(info.get_port()),
                            txt: info
                                .get_properties()
                                .iter()
                                .map(|p| (p.key().to_string(), p.val_str().to_string()))
                                .collect(),
                        };
                        if tx.send(DiscoveryEvent::Added(peer)).is_err() {
                            break;
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        if fullname.starts_with(&own_name) {
                            continue;
                        }
                        if tx.send(DiscoveryEvent::Removed(fullname)).is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(rx)
    }

    /// Resolve a single peer by service name, with a fixed timeout.
    pub async fn resolve(&self, service_name: &str) -> Result<DiscoveredPeer, DiscoveryError> {
        let mut rx = self.browse()?;
        let deadline = tokio::time::sleep(RESOLUTION_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(DiscoveryEvent::Added(peer)) if peer.name == service_name => return Ok(peer),
                        Some(_) => continue,
                        None => return Err(DiscoveryError::ResolutionFailed),
                    }
                }
                _ = &mut deadline => return Err(DiscoveryError::ResolutionFailed),
            }
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "folio-core".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_falls_back_when_env_unset() {
        std::env::remove_var("HOSTNAME");
        assert_eq!(hostname(), "folio-core");
    }
}
