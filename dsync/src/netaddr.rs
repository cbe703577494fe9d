//! Local address detection
//!
//! Connecting a UDP socket sends nothing; it only asks the kernel which
//! interface would route to the target address.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use tracing::{debug, warn};

/// Routable public address used only to pick an outbound interface
pub const DEFAULT_ROUTE_TARGET: &str = "8.8.8.8:80";

/// Address of the interface that routes to `target`, if it is usable
pub fn detect_local_ip(target: &str) -> Option<IpAddr> {
    let bind: SocketAddr = match target.parse::<SocketAddr>() {
        Ok(addr) if addr.is_ipv6() => SocketAddr::from(([0u16; 8], 0)),
        _ => SocketAddr::from(([0u8; 4], 0)),
    };

    let routed = UdpSocket::bind(bind).and_then(|socket| {
        socket.connect(target)?;
        socket.local_addr()
    });

    match routed {
        Ok(addr) if is_usable(addr.ip()) => {
            debug!(ip = %addr.ip(), "Detected local IP address");
            Some(addr.ip())
        }
        Ok(addr) => {
            warn!(ip = %addr.ip(), "Detected address is not usable as a C-MOVE destination");
            None
        }
        Err(e) => {
            warn!(error = %e, "Could not detect local IP address");
            None
        }
    }
}

fn is_usable(ip: IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}
