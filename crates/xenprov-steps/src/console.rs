use crate::error::StepError;
use crate::hypervisor::{ConsoleProtocol, HypervisorClient, VmRef};

/// Location of the VM's VNC (RFB) console
pub async fn vnc_console_location(
    client: &dyn HypervisorClient,
    vm: &VmRef,
) -> Result<String, StepError> {
    let consoles = client.vm_consoles(vm).await?;
    consoles
        .into_iter()
        .find(|console| console.protocol == ConsoleProtocol::Rfb)
        .map(|console| console.location)
        .ok_or_else(|| StepError::NoConsole(vm.clone()))
}
