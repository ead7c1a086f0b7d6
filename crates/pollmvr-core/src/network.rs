//! Local interface and serial port enumeration.

use std::net::Ipv4Addr;
use std::time::Duration;

use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::protocol::constants::{ROBE_BAUD_RATE, ROBE_PRODUCT_NAME};
use crate::transport::{RobeTransport, SerialPortLink, TransportError};

/// An IPv4 address an ArtPoll can be sent from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    /// Interface name, or a description for the wildcard entry.
    pub name: String,
    pub ip: Ipv4Addr,
    /// Directed broadcast of the subnet.
    pub broadcast: Ipv4Addr,
}

/// IPv4 addresses of the local interfaces, link-local ones only on request.
///
/// Outside Windows the list starts with the `0.0.0.0` wildcard.
pub fn list_interfaces(include_link_local: bool) -> Vec<InterfaceAddress> {
    let mut result = Vec::new();
    if !cfg!(windows) {
        result.push(InterfaceAddress {
            name: "All Network Interfaces".to_string(),
            ip: Ipv4Addr::UNSPECIFIED,
            broadcast: Ipv4Addr::BROADCAST,
        });
    }
    for iface in datalink::interfaces() {
        for net in &iface.ips {
            let IpNetwork::V4(v4) = net else {
                continue;
            };
            if !is_selectable(v4.ip(), include_link_local) {
                continue;
            }
            result.push(InterfaceAddress {
                name: iface.name.clone(),
                ip: v4.ip(),
                broadcast: v4.broadcast(),
            });
        }
    }
    debug!(count = result.len(), "Listed interfaces");
    result
}

fn is_selectable(ip: Ipv4Addr, include_link_local: bool) -> bool {
    !ip.is_unspecified() && (include_link_local || !ip.is_link_local())
}

/// A serial port that might be a DMX interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortCandidate {
    pub name: String,
    pub product: Option<String>,
    /// USB product string names a Robe interface.
    pub robe: bool,
}

pub fn list_serial_ports() -> Result<Vec<SerialPortCandidate>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::OpenFailed(format!("cannot enumerate ports: {e}")))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let product = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => usb.product,
                _ => None,
            };
            let robe = product.as_deref().is_some_and(is_robe_product);
            SerialPortCandidate {
                name: p.port_name,
                product,
                robe,
            }
        })
        .collect())
}

fn is_robe_product(product: &str) -> bool {
    product.contains(ROBE_PRODUCT_NAME)
}

/// Ports whose product string names a Robe interface and that answer the
/// info request.
pub fn find_robe_interfaces(timeout: Duration) -> Result<Vec<SerialPortCandidate>, TransportError> {
    let mut found = Vec::new();
    for candidate in list_serial_ports()?.into_iter().filter(|c| c.robe) {
        let link = match SerialPortLink::open(&candidate.name, ROBE_BAUD_RATE) {
            Ok(link) => link,
            Err(e) => {
                warn!(port = %candidate.name, error = %e, "Cannot open candidate port");
                continue;
            }
        };
        let mut transport = RobeTransport::new(link).with_timeout(timeout);
        match transport.probe() {
            Ok(true) => {
                info!(port = %candidate.name, "Robe interface found");
                found.push(candidate);
            }
            Ok(false) => debug!(port = %candidate.name, "No info response"),
            Err(e) => warn!(port = %candidate.name, error = %e, "Probe failed"),
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_local_filter() {
        let link_local = Ipv4Addr::new(169, 254, 3, 4);
        assert!(!is_selectable(link_local, false));
        assert!(is_selectable(link_local, true));
        assert!(is_selectable(Ipv4Addr::new(10, 0, 0, 2), false));
        assert!(!is_selectable(Ipv4Addr::UNSPECIFIED, true));
    }

    #[test]
    fn test_robe_product_match() {
        assert!(is_robe_product("Runit WTX"));
        assert!(is_robe_product("Robe Runit WTX (COM4)"));
        assert!(!is_robe_product("FT232R USB UART"));
    }

    #[test]
    fn test_wildcard_first_outside_windows() {
        let interfaces = list_interfaces(false);
        if !cfg!(windows) {
            assert_eq!(interfaces[0].ip, Ipv4Addr::UNSPECIFIED);
        }
        assert!(interfaces.iter().skip(1).all(|i| !i.ip.is_link_local()));
    }
}
