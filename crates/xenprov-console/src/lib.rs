//! XAPI console tunnelling
//!
//! XenServer exposes a VM's VNC console behind an HTTP `CONNECT` on the pool
//! master, authenticated with the caller's session cookie. [`XapiConsoleWrapper`]
//! performs that handshake on each outbound connection so a
//! [`Forwarding`](xenprov_forward::Forwarding) can offer the raw RFB stream
//! on a local port.

mod handshake;
mod tls;

pub use handshake::{parse_status_line, XapiConsoleWrapper, MAX_RESPONSE_HEAD};
pub use tls::{ensure_crypto_provider, tls_connector};
