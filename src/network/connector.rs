//! Turns a device descriptor into a connected stream
//!
//! Every failure is reported as a [`TransportError`]; the calling loop
//! sleeps and retries. Nothing here blocks longer than the connect timeout.

use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};

use crate::config::NetworkConfig;
use crate::constants::{FORWARD_STRIDE, FORWARD_WINDOW};
use crate::device::{DeviceDescriptor, DeviceKind, Locators, LOCALHOST};
use crate::error::TransportError;
use crate::network::socket::dial;

/// Local port choice for a debug-bridge forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardPlan {
    pub local_port: u16,
    /// Drop the bridge's existing forwards before adding this one
    pub clear_existing: bool,
}

/// Pick the local port for a forward to `target_port`.
///
/// Each bridge instance owns the window `[base, base + 8]` where
/// `base = target_port + iteration * 10`. A tracked port below the window
/// is moved up to `base`; one past the window wraps back to `base` and
/// clears stale forwards.
pub fn plan_forward(current: u16, target_port: u16, iteration: u16) -> ForwardPlan {
    let base = u32::from(target_port) + u32::from(iteration) * u32::from(FORWARD_STRIDE);
    let base = base.min(u32::from(u16::MAX)) as u16;
    let current32 = u32::from(current);

    if current < base {
        ForwardPlan { local_port: base, clear_existing: false }
    } else if current32 > u32::from(base) + u32::from(FORWARD_WINDOW) {
        ForwardPlan { local_port: base, clear_existing: true }
    } else {
        ForwardPlan { local_port: current, clear_existing: false }
    }
}

pub struct TransportConnector {
    locators: Locators,
    network: NetworkConfig,
    /// Local port of the current bridge forward or multiplexer connection
    local_port: Mutex<u16>,
}

impl TransportConnector {
    pub fn new(locators: Locators, network: NetworkConfig) -> Self {
        Self {
            locators,
            network,
            local_port: Mutex::new(0),
        }
    }

    pub fn locators(&self) -> &Locators {
        &self.locators
    }

    /// Port most recently used for a forwarded or multiplexed connection
    pub fn local_port(&self) -> u16 {
        *self.local_port.lock()
    }

    pub fn reset_local_port(&self) {
        *self.local_port.lock() = 0;
    }

    /// Open a stream to the device
    pub fn connect(&self, device: &DeviceDescriptor) -> Result<TcpStream, TransportError> {
        tracing::debug!("connect device: id={} kind={:?}", device.id, device.kind);

        match device.kind {
            DeviceKind::DirectIp => self.dial_remote(&device.address, device.port),
            DeviceKind::Discovery => self.connect_discovered(device),
            DeviceKind::DebugBridge => self.connect_bridge(device),
            DeviceKind::Multiplexer => self.connect_multiplexer(device),
            DeviceKind::None => Err(TransportError::Unresolved),
        }
    }

    fn connect_discovered(&self, device: &DeviceDescriptor) -> Result<TcpStream, TransportError> {
        match self.locators.discovery.lookup(&device.id) {
            Some(found) => self.dial_remote(&found.address, device.port),
            None => {
                self.locators.discovery.reload();
                Err(TransportError::NotFound { kind: DeviceKind::Discovery, id: device.id.clone() })
            }
        }
    }

    fn connect_bridge(&self, device: &DeviceDescriptor) -> Result<TcpStream, TransportError> {
        let bridge = &self.locators.bridge;
        let Some(found) = bridge.lookup(&device.id) else {
            bridge.reload();
            return Err(TransportError::NotFound { kind: DeviceKind::DebugBridge, id: device.id.clone() });
        };

        if bridge.is_offline(&found) {
            tracing::error!("device is offline: {}", device.id);
            return Err(TransportError::Offline(device.id.clone()));
        }

        let mut local_port = self.local_port.lock();
        let plan = plan_forward(*local_port, device.port, bridge.iteration());
        *local_port = plan.local_port;
        if plan.clear_existing {
            bridge.clear_forwards(&found);
        }

        tracing::debug!("bridge: mapping {} -> {}", plan.local_port, device.port);
        if !bridge.add_forward(&found, plan.local_port, device.port) {
            *local_port = plan.local_port.saturating_add(1);
            return Err(TransportError::ForwardFailed { local: plan.local_port, remote: device.port });
        }

        let addr = SocketAddr::new(IpAddr::from([127, 0, 0, 1]), plan.local_port);
        match dial(addr, None, self.network.connect_timeout()) {
            Ok(stream) => Ok(stream),
            Err(source) => {
                bridge.clear_forwards(&found);
                Err(TransportError::Dial { addr, source })
            }
        }
    }

    fn connect_multiplexer(&self, device: &DeviceDescriptor) -> Result<TcpStream, TransportError> {
        let mux = &self.locators.multiplexer;
        let Some(found) = mux.lookup(&device.id) else {
            mux.reload();
            return Err(TransportError::NotFound { kind: DeviceKind::Multiplexer, id: device.id.clone() });
        };

        let (stream, port) = mux.connect(&found, device.port).map_err(TransportError::Multiplexer)?;
        *self.local_port.lock() = port;
        tracing::debug!("multiplexer: connected via local port {}", port);
        Ok(stream)
    }

    fn dial_remote(&self, address: &str, port: u16) -> Result<TcpStream, TransportError> {
        let addr = resolve(address, port)?;
        dial(addr, self.network.bind_address, self.network.connect_timeout())
            .map_err(|source| TransportError::Dial { addr, source })
    }

    /// Address the device is reachable at, for diagnostics
    pub fn remote_url(&self, device: &DeviceDescriptor) -> Option<String> {
        let port = match device.kind {
            DeviceKind::DebugBridge | DeviceKind::Multiplexer => self.local_port(),
            _ => device.port,
        };
        let address = if device.address.is_empty() { LOCALHOST } else { device.address.as_str() };
        (port > 0).then(|| format!("http://{}:{}", address, port))
    }
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (address, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))
}
