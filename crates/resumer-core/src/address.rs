//! Resolution of the address a replica advertises in the ownership directory.

use resumer_traits::{RedirectTarget, Result, ResumerError};
use std::net::SocketAddr;
use tracing::debug;

/// Pick the address written into ownership records for this replica:
/// the explicit override, else the bound socket address when it is
/// routable, else the hostname with the bound (or configured) port.
pub fn resolve_advertised_address(
    explicit: Option<&str>,
    bound: Option<SocketAddr>,
    configured_port: u16,
) -> Result<RedirectTarget> {
    if let Some(explicit) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
        return RedirectTarget::parse(explicit).ok_or_else(|| {
            ResumerError::invalid_argument(format!(
                "advertised address '{explicit}' is not a valid host:port"
            ))
        });
    }

    if let Some(bound) = bound
        && !bound.ip().is_unspecified()
        && let Some(target) = RedirectTarget::new(bound.ip().to_string(), bound.port())
    {
        return Ok(target);
    }

    let port = bound
        .map(|addr| addr.port())
        .filter(|port| *port != 0)
        .unwrap_or(configured_port);
    let host = local_hostname();
    debug!(%host, port, "Advertising hostname");
    RedirectTarget::new(host, port).ok_or_else(|| {
        ResumerError::invalid_argument("cannot advertise an address without a port")
    })
}

#[cfg(unix)]
fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
fn local_hostname() -> String {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
