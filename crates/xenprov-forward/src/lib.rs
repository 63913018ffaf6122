//! Handshake-gated TCP forwarding
//!
//! This crate exposes a remote, authentication-gated service on a local
//! ephemeral port. Every accepted connection gets its own outbound connection
//! to the remote target, which is passed through a [`ConnectionWrapper`]
//! before any client bytes are relayed.
//!
//! ```ignore
//! use xenprov_forward::{Forwarding, IdentityWrapper};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut forwarding = Forwarding::new("10.0.0.7", 5900, IdentityWrapper)?;
//! forwarding.start().await?;
//! println!(
//!     "available on {}:{}",
//!     forwarding.service_host(),
//!     forwarding.service_port()
//! );
//! forwarding.close();
//! # Ok(())
//! # }
//! ```

pub mod address;
mod forwarding;
pub mod wrapper;

pub use address::{join_host_port, split_host_port, tcp_address_from_url, AddressError};
pub use forwarding::{ForwardError, Forwarding, RemoteTarget};
pub use wrapper::{
    wrap_fn, BoxedStream, ConnectionWrapper, FnWrapper, ForwardStreamIo, HandshakeError,
    IdentityWrapper,
};

/// Re-export for implementing [`ConnectionWrapper`] outside this crate
pub use async_trait::async_trait;
