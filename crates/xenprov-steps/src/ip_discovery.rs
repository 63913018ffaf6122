//! Sources of the VM's IP address, polled by [`StepWaitForIp`](crate::StepWaitForIp)
//!
//! [`AddressDiscovery`] is the wait predicate: each evaluation asks its
//! sources in order and stops at the first one that knows the address.

use crate::hypervisor::{HypervisorClient, HypervisorError, VmRef};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};
use xenprov_wait::{BoxError, Predicate};

/// Network key of the first interface's address in guest metrics
const GUEST_IP_KEY: &str = "0/ip";

#[async_trait]
pub trait AddressSource: Send {
    /// Human readable origin, used in operator messages
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "not known yet"
    async fn poll_address(&mut self) -> Result<Option<String>, BoxError>;
}

/// Addresses the guest reported over HTTP during installation.
///
/// Never blocks: one evaluation takes at most one pending message.
pub struct NotificationSource<'a> {
    rx: &'a mut mpsc::Receiver<String>,
}

impl<'a> NotificationSource<'a> {
    pub fn new(rx: &'a mut mpsc::Receiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl AddressSource for NotificationSource<'_> {
    fn name(&self) -> &'static str {
        "HTTP request"
    }

    async fn poll_address(&mut self) -> Result<Option<String>, BoxError> {
        match self.rx.try_recv() {
            Ok(address) => Ok(Some(address)),
            Err(TryRecvError::Empty) => Ok(None),
            // Sender gone; guest tools may still report
            Err(TryRecvError::Disconnected) => Ok(None),
        }
    }
}

/// Address reported by the paravirtual guest tools
pub struct GuestToolsSource<'a> {
    client: &'a dyn HypervisorClient,
    vm: VmRef,
}

impl<'a> GuestToolsSource<'a> {
    pub fn new(client: &'a dyn HypervisorClient, vm: VmRef) -> Self {
        Self { client, vm }
    }

    async fn lookup(&self) -> Result<Option<String>, HypervisorError> {
        let Some(metrics) = self.client.guest_metrics(&self.vm).await? else {
            return Ok(None);
        };
        let networks = self.client.guest_networks(&metrics).await?;
        Ok(networks
            .get(GUEST_IP_KEY)
            .filter(|ip| !ip.is_empty())
            .cloned())
    }
}

#[async_trait]
impl AddressSource for GuestToolsSource<'_> {
    fn name(&self) -> &'static str {
        "XenServer tools"
    }

    async fn poll_address(&mut self) -> Result<Option<String>, BoxError> {
        match self.lookup().await {
            Ok(address) => Ok(address),
            Err(e) if e.is_retryable() => {
                warn!(vm = %self.vm, "Guest metrics not available yet: {}", e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddress {
    pub address: String,
    /// [`AddressSource::name`] of the source that reported it
    pub source: &'static str,
}

pub struct AddressDiscovery<'a> {
    sources: Vec<Box<dyn AddressSource + 'a>>,
    found: Option<DiscoveredAddress>,
}

impl Default for AddressDiscovery<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> AddressDiscovery<'a> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            found: None,
        }
    }

    /// Append a source; earlier sources take precedence
    pub fn with_source(mut self, source: impl AddressSource + 'a) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn found(&self) -> Option<&DiscoveredAddress> {
        self.found.as_ref()
    }

    pub fn into_found(self) -> Option<DiscoveredAddress> {
        self.found
    }
}

#[async_trait]
impl Predicate for AddressDiscovery<'_> {
    async fn check(&mut self) -> Result<bool, BoxError> {
        if self.found.is_some() {
            return Ok(true);
        }
        for source in self.sources.iter_mut() {
            if let Some(address) = source.poll_address().await? {
                debug!(source = source.name(), %address, "Discovered VM address");
                self.found = Some(DiscoveredAddress {
                    address,
                    source: source.name(),
                });
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl AddressSource for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn poll_address(&mut self) -> Result<Option<String>, BoxError> {
            Ok(self.0.map(str::to_string))
        }
    }

    #[tokio::test]
    async fn test_no_sources_never_satisfied() {
        let mut discovery = AddressDiscovery::new();
        assert!(discovery.is_empty());
        assert!(!discovery.check().await.unwrap());
        assert!(discovery.found().is_none());
    }

    #[tokio::test]
    async fn test_notification_source_takes_one_message() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send("10.0.0.5".to_string()).await.unwrap();
        tx.send("10.0.0.6".to_string()).await.unwrap();

        let mut source = NotificationSource::new(&mut rx);
        assert_eq!(source.poll_address().await.unwrap().as_deref(), Some("10.0.0.5"));
        assert_eq!(source.poll_address().await.unwrap().as_deref(), Some("10.0.0.6"));
        assert_eq!(source.poll_address().await.unwrap(), None);

        drop(tx);
        assert_eq!(source.poll_address().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let mut discovery = AddressDiscovery::new()
            .with_source(Fixed(None))
            .with_source(Fixed(Some("10.0.0.7")))
            .with_source(Fixed(Some("10.0.0.8")));

        assert!(discovery.check().await.unwrap());
        let found = discovery.into_found().unwrap();
        assert_eq!(found.address, "10.0.0.7");
        assert_eq!(found.source, "fixed");
    }
}
