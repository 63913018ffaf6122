//! Provisioning steps built on the forwarding and wait primitives
//!
//! - [`StepGetVncPort`]: exposes the VM's VNC console on a local port
//! - [`StepWaitForIp`]: waits until the VM's IP address is known
//!
//! The orchestration engine, its shared state and the concrete XAPI client
//! live elsewhere; steps receive what they need as arguments and reach the
//! hypervisor only through [`HypervisorClient`].

pub mod config;
pub mod console;
pub mod error;
pub mod hypervisor;
pub mod ip_discovery;
mod step_get_vnc_port;
mod step_wait_for_ip;
pub mod ui;

pub use config::{CommonConfig, ConfigError, IpGetter, VncConfig, MAX_IP_WAIT_TIMEOUT_SECONDS};
pub use console::vnc_console_location;
pub use error::StepError;
pub use hypervisor::{
    Console, ConsoleProtocol, GuestMetricsRef, HypervisorClient, HypervisorError, SessionRef,
    VmRef,
};
pub use ip_discovery::{
    AddressDiscovery, AddressSource, DiscoveredAddress, GuestToolsSource, NotificationSource,
};
pub use step_get_vnc_port::StepGetVncPort;
pub use step_wait_for_ip::{StepWaitForIp, DEFAULT_IP_POLL_INTERVAL};
pub use ui::{TracingUi, Ui};
