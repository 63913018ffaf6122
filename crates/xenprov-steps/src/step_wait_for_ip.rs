use crate::config::CommonConfig;
use crate::error::StepError;
use crate::hypervisor::HypervisorClient;
use crate::ip_discovery::{AddressDiscovery, GuestToolsSource, NotificationSource};
use crate::ui::Ui;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use xenprov_wait::{CancellationToken, InterruptibleWait, WaitError};

pub const DEFAULT_IP_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Waits until the VM's IP address is known.
///
/// The notification channel carries addresses the guest reports over HTTP
/// during installation; guest tools are queried through the hypervisor.
#[derive(Debug)]
pub struct StepWaitForIp {
    notifications: mpsc::Receiver<String>,
    timeout: Duration,
    poll_interval: Duration,
}

impl StepWaitForIp {
    pub fn new(notifications: mpsc::Receiver<String>, timeout: Duration) -> Self {
        Self {
            notifications,
            timeout,
            poll_interval: DEFAULT_IP_POLL_INTERVAL,
        }
    }

    pub fn from_config(notifications: mpsc::Receiver<String>, config: &CommonConfig) -> Self {
        Self::new(notifications, config.ip_wait_timeout())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(
        &mut self,
        config: &CommonConfig,
        client: &dyn HypervisorClient,
        instance_uuid: &str,
        ui: &dyn Ui,
        cancel: &CancellationToken,
    ) -> Result<String, StepError> {
        if let Some(host) = &config.comm_host {
            debug!(comm_host = %host, "Using static communicator host");
            return Ok(host.clone());
        }

        ui.say("Step: Wait for VM's IP to become known to us.");

        let vm = match client.vm_by_uuid(instance_uuid).await {
            Ok(vm) => vm,
            Err(source) => {
                let err = StepError::VmLookup {
                    uuid: instance_uuid.to_string(),
                    source,
                };
                ui.error(&err.to_string());
                return Err(err);
            }
        };

        let mut discovery = AddressDiscovery::new();
        if config.ip_getter.uses_notifications() {
            discovery = discovery.with_source(NotificationSource::new(&mut self.notifications));
        }
        if config.ip_getter.uses_guest_tools() {
            discovery = discovery.with_source(GuestToolsSource::new(client, vm.clone()));
        }

        let result = InterruptibleWait::new(self.timeout, self.poll_interval, &mut discovery)
            .wait(cancel)
            .await;
        if let Err(e) = result {
            let err = StepError::from(e);
            ui.error(&err.to_string());
            return Err(err);
        }

        let Some(found) = discovery.into_found() else {
            // A successful wait always records the address
            let err = StepError::Wait(WaitError::Timeout(self.timeout));
            ui.error(&err.to_string());
            return Err(err);
        };

        ui.message(&format!("Got IP '{}' from {}", found.address, found.source));
        ui.say(&format!("Got IP address '{}'", found.address));
        info!(vm = %vm, address = %found.address, source = found.source, "VM address discovered");

        Ok(found.address)
    }
}
