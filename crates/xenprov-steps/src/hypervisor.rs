//! Hypervisor management client contract
//!
//! Only the calls the steps make are modelled. Implementations wrap a real
//! XAPI connection; tests use in-memory fakes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Opaque handle of an authenticated XAPI session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionRef(String);

impl SessionRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Session references are credentials; keep them out of logs
impl fmt::Debug for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionRef(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmRef(pub String);

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestMetricsRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleProtocol {
    Vt100,
    Rfb,
    Rdp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Console {
    pub protocol: ConsoleProtocol,
    /// URL of the console, e.g. `https://host/console?ref=OpaqueRef:...`
    pub location: String,
}

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Hypervisor error: {0}")]
    Fatal(String),
}

impl HypervisorError {
    /// Whether a poll may simply try again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HypervisorError::Transport(_) | HypervisorError::NotFound(_)
        )
    }
}

#[async_trait]
pub trait HypervisorClient: Send + Sync {
    /// Session used to authenticate console connections
    fn session(&self) -> SessionRef;

    async fn vm_by_uuid(&self, uuid: &str) -> Result<VmRef, HypervisorError>;

    async fn vm_consoles(&self, vm: &VmRef) -> Result<Vec<Console>, HypervisorError>;

    /// Guest metrics of a running VM; `None` until the guest tools report
    async fn guest_metrics(&self, vm: &VmRef) -> Result<Option<GuestMetricsRef>, HypervisorError>;

    /// Network entries of a guest metrics record, keyed like `"0/ip"`
    async fn guest_networks(
        &self,
        metrics: &GuestMetricsRef,
    ) -> Result<HashMap<String, String>, HypervisorError>;
}
