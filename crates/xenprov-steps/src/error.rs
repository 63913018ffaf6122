use crate::hypervisor::{HypervisorError, VmRef};
use thiserror::Error;
use xenprov_forward::{AddressError, ForwardError, HandshakeError};
use xenprov_wait::WaitError;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Unable to get VM from UUID '{uuid}': {source}")]
    VmLookup {
        uuid: String,
        #[source]
        source: HypervisorError,
    },

    #[error("Hypervisor error: {0}")]
    Hypervisor(#[from] HypervisorError),

    #[error("VM {0} has no VNC console")]
    NoConsole(VmRef),

    #[error("Invalid console address: {0}")]
    Address(#[from] AddressError),

    #[error("{0}")]
    Handshake(#[from] HandshakeError),

    #[error("Failed to forward VNC: {0}")]
    Forward(#[from] ForwardError),

    #[error("Could not get IP address of VM: {0}")]
    Wait(#[from] WaitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_location_error_is_not_prefixed_twice() {
        let err = StepError::from(HandshakeError::InvalidLocation(
            "ftp://pool-master/console: unsupported scheme 'ftp'".to_string(),
        ));
        assert_eq!(
            err.to_string(),
            "Invalid console location: ftp://pool-master/console: unsupported scheme 'ftp'"
        );
    }
}
