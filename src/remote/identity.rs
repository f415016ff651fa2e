//! Local interface detection
//!
//! A cluster server list is usually shared by every node, so each node has to
//! recognize and skip its own entry.

use std::net::{IpAddr, ToSocketAddrs, UdpSocket};

use crate::error::{Error, Result};

/// Arbitrary port for the routing probe; nothing is sent
const PROBE_PORT: u16 = 4242;

/// Split `host[:port]` into its host part
pub fn host_part(server: &str) -> &str {
    if let Some(rest) = server.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match server.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => server,
    }
}

/// True when `server` resolves to an address of one of this machine's
/// interfaces
///
/// Connecting a UDP socket sends nothing but makes the kernel pick the source
/// address it would route from; a match means the peer is this node.
pub fn is_local_interface(server: &str) -> Result<bool> {
    let host = host_part(server);
    let addrs: Vec<IpAddr> = (host, PROBE_PORT)
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve cluster server {}: {}", server, e)))?
        .map(|a| a.ip())
        .collect();

    for addr in addrs {
        if addr.is_loopback() {
            return Ok(true);
        }
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        if socket.connect((addr, PROBE_PORT)).is_err() {
            continue;
        }
        if socket.local_addr()?.ip() == addr {
            return Ok(true);
        }
    }
    Ok(false)
}
