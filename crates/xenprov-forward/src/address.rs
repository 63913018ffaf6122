//! Host/port helpers shared by the forwarding and console code

use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Missing port in address '{0}'")]
    MissingPort(String),

    #[error("Invalid port in address '{address}': {port}")]
    InvalidPort { address: String, port: String },

    #[error("Malformed address '{0}'")]
    Malformed(String),

    #[error("Invalid URL '{location}': {reason}")]
    InvalidUrl { location: String, reason: String },

    #[error("Unsupported URL scheme '{scheme}' in '{location}'")]
    UnsupportedScheme { location: String, scheme: String },

    #[error("URL '{0}' has no host")]
    MissingHost(String),
}

/// Split `host:port` (or `[v6]:port`) into its parts.
///
/// The host may be empty (`":5900"`), matching what listeners report for
/// wildcard binds. Callers that need a dialable host check it themselves.
pub fn split_host_port(address: &str) -> Result<(String, u16), AddressError> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| AddressError::Malformed(address.to_string()))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;
        (host, port)
    } else {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;
        if host.contains(':') {
            // Unbracketed IPv6 literal
            return Err(AddressError::Malformed(address.to_string()));
        }
        (host, port)
    };

    let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
        address: address.to_string(),
        port: port.to_string(),
    })?;

    Ok((host.to_string(), port))
}

/// Inverse of [`split_host_port`]; brackets IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Extract the dialable `(host, port)` pair from a console location URL.
///
/// Only `http` and `https` locations are accepted. An explicit port wins,
/// otherwise the scheme default (80/443) is used.
pub fn tcp_address_from_url(location: &str) -> Result<(String, u16), AddressError> {
    let url = Url::parse(location).map_err(|e| AddressError::InvalidUrl {
        location: location.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(AddressError::UnsupportedScheme {
                location: location.to_string(),
                scheme: other.to_string(),
            })
        }
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        _ => return Err(AddressError::MissingHost(location.to_string())),
    };

    let port = url
        .port_or_known_default()
        .ok_or_else(|| AddressError::MissingHost(location.to_string()))?;

    Ok((host, port))
}
