use crate::config::VncConfig;
use crate::console::vnc_console_location;
use crate::error::StepError;
use crate::hypervisor::{HypervisorClient, VmRef};
use crate::ui::Ui;
use std::net::SocketAddr;
use tracing::info;
use xenprov_console::XapiConsoleWrapper;
use xenprov_forward::{join_host_port, tcp_address_from_url, Forwarding};

/// Exposes the VM's VNC console on a local ephemeral port.
///
/// The forwarding stays up until [`cleanup`](Self::cleanup) or drop.
#[derive(Debug, Default)]
pub struct StepGetVncPort {
    forwarding: Option<Forwarding>,
}

impl StepGetVncPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local address of the VNC listener, once the step has run
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.forwarding.as_ref().and_then(Forwarding::local_addr)
    }

    /// Returns `Ok(None)` when VNC is disabled.
    pub async fn run(
        &mut self,
        config: &VncConfig,
        client: &dyn HypervisorClient,
        vm: &VmRef,
        ui: &dyn Ui,
    ) -> Result<Option<SocketAddr>, StepError> {
        if config.disable_vnc {
            return Ok(None);
        }

        ui.say("Step: forward the instance's VNC");

        let result = self.forward(config, client, vm).await;
        match &result {
            Ok(local_addr) => {
                let vnc_url = join_host_port(&local_addr.ip().to_string(), local_addr.port());
                ui.say(&format!("VNC available on vnc://{}", vnc_url));
            }
            Err(e) => ui.error(&e.to_string()),
        }
        result.map(Some)
    }

    async fn forward(
        &mut self,
        config: &VncConfig,
        client: &dyn HypervisorClient,
        vm: &VmRef,
    ) -> Result<SocketAddr, StepError> {
        let location = vnc_console_location(client, vm).await?;
        let (host, port) = tcp_address_from_url(&location)?;

        let session = client.session();
        let wrapper = if config.verify_tls {
            XapiConsoleWrapper::with_verified_tls(&location, session.as_str())?
        } else {
            XapiConsoleWrapper::new(&location, session.as_str())?
        };

        let mut forwarding = Forwarding::new(host, port, wrapper)?.with_bind_ip(config.bind_address);
        if let Some(max_connections) = config.max_connections {
            forwarding = forwarding.with_max_connections(max_connections);
        }

        // A previous run's forwarding is replaced, not leaked
        self.cleanup();

        match forwarding.start().await {
            Ok(local_addr) => {
                info!(vm = %vm, %local_addr, "VNC console forwarded");
                self.forwarding = Some(forwarding);
                Ok(local_addr)
            }
            Err(e) => {
                forwarding.close();
                Err(e.into())
            }
        }
    }

    /// Close the forwarding, if any. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(mut forwarding) = self.forwarding.take() {
            forwarding.close();
        }
    }
}
