//! Operator-facing messages

use tracing::{error, info};

pub trait Ui: Send + Sync {
    /// Announce a step or a major result
    fn say(&self, message: &str);

    /// Detail under the current step
    fn message(&self, message: &str);

    fn error(&self, message: &str);
}

/// Routes operator messages to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        info!(target: "xenprov::ui", "==> {}", message);
    }

    fn message(&self, message: &str) {
        info!(target: "xenprov::ui", "    {}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "xenprov::ui", "{}", message);
    }
}
