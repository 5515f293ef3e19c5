//! Device descriptors and the locator collaborators
//!
//! Discovery, the debug bridge and the device multiplexer each keep their
//! own view of reachable devices. Their wire protocols live outside this
//! crate; the engine only needs lookup, rescan and (for the bridge and the
//! multiplexer) the connect primitives declared here.

use serde::{Deserialize, Serialize};
use std::net::TcpStream;
use std::sync::Arc;

use crate::error::ConfigError;

/// Address used for forwarded and multiplexed connections
pub const LOCALHOST: &str = "127.0.0.1";

/// Transport used to reach a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    None,
    /// Plain TCP to a user-supplied address
    DirectIp,
    /// Reverse port-forward through a debug bridge
    DebugBridge,
    /// USB device proxy
    Multiplexer,
    /// Local-network service discovery
    Discovery,
}

/// Resolved identity, address and transport of the target device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            kind,
        }
    }

    /// Whether the descriptor names a reachable transport
    pub fn is_resolved(&self) -> bool {
        self.kind != DeviceKind::None && !self.id.is_empty() && self.port > 0
    }
}

/// What the user picked before activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// Connect straight to `address:port`
    Direct { address: String, port: u32 },
    /// A device id taken from one of the locator listings
    Known { id: String, port: u32 },
}

/// Source of known devices for one transport kind
pub trait DeviceLocator: Send + Sync {
    /// Devices seen in the last scan
    fn list_known(&self) -> Vec<DeviceDescriptor>;

    /// Trigger an asynchronous rescan; returns immediately
    fn reload(&self);

    /// Look a device up by id in the last scan
    fn lookup(&self, id: &str) -> Option<DeviceDescriptor>;
}

/// Debug bridge with reverse port forwarding
pub trait DebugBridge: DeviceLocator {
    fn is_offline(&self, device: &DeviceDescriptor) -> bool;

    /// Index of the bridge instance, used to spread local port windows
    fn iteration(&self) -> u16;

    /// Map `local_port` on this host to `remote_port` on the device
    fn add_forward(&self, device: &DeviceDescriptor, local_port: u16, remote_port: u16) -> bool;

    fn clear_forwards(&self, device: &DeviceDescriptor);
}

/// USB device multiplexer
pub trait Multiplexer: DeviceLocator {
    /// Open a connection to `port` on the device. Also returns the local
    /// port the multiplexer used, for diagnostics.
    fn connect(&self, device: &DeviceDescriptor, port: u16) -> std::io::Result<(TcpStream, u16)>;
}

/// Locator that never knows any device
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevices;

impl DeviceLocator for NoDevices {
    fn list_known(&self) -> Vec<DeviceDescriptor> {
        Vec::new()
    }

    fn reload(&self) {}

    fn lookup(&self, _id: &str) -> Option<DeviceDescriptor> {
        None
    }
}

impl DebugBridge for NoDevices {
    fn is_offline(&self, _device: &DeviceDescriptor) -> bool {
        true
    }

    fn iteration(&self) -> u16 {
        0
    }

    fn add_forward(&self, _device: &DeviceDescriptor, _local_port: u16, _remote_port: u16) -> bool {
        false
    }

    fn clear_forwards(&self, _device: &DeviceDescriptor) {}
}

impl Multiplexer for NoDevices {
    fn connect(&self, _device: &DeviceDescriptor, _port: u16) -> std::io::Result<(TcpStream, u16)> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no multiplexer"))
    }
}

/// The locator set used by a session
#[derive(Clone)]
pub struct Locators {
    pub discovery: Arc<dyn DeviceLocator>,
    pub bridge: Arc<dyn DebugBridge>,
    pub multiplexer: Arc<dyn Multiplexer>,
}

impl Locators {
    pub fn new(
        discovery: Arc<dyn DeviceLocator>,
        bridge: Arc<dyn DebugBridge>,
        multiplexer: Arc<dyn Multiplexer>,
    ) -> Self {
        Self {
            discovery,
            bridge,
            multiplexer,
        }
    }

    /// Locators for sessions that only ever dial direct addresses
    pub fn direct_only() -> Self {
        Self::new(Arc::new(NoDevices), Arc::new(NoDevices), Arc::new(NoDevices))
    }

    /// List known devices for a transport kind
    pub fn list_known(&self, kind: DeviceKind) -> Vec<DeviceDescriptor> {
        match kind {
            DeviceKind::Discovery => self.discovery.list_known(),
            DeviceKind::DebugBridge => self.bridge.list_known(),
            DeviceKind::Multiplexer => self.multiplexer.list_known(),
            DeviceKind::DirectIp | DeviceKind::None => Vec::new(),
        }
    }

    /// Rescan the locator behind a transport kind
    pub fn reload(&self, kind: DeviceKind) {
        match kind {
            DeviceKind::Discovery => self.discovery.reload(),
            DeviceKind::DebugBridge => self.bridge.reload(),
            DeviceKind::Multiplexer => self.multiplexer.reload(),
            DeviceKind::DirectIp | DeviceKind::None => {}
        }
    }

    pub fn reload_all(&self) {
        self.discovery.reload();
        self.bridge.reload();
        self.multiplexer.reload();
    }

    /// Validate a selection and work out which transport reaches it.
    ///
    /// Known ids are probed in discovery, bridge, multiplexer order; an
    /// offline bridge device does not resolve.
    pub fn resolve(&self, selection: &DeviceSelection) -> Result<DeviceDescriptor, ConfigError> {
        match selection {
            DeviceSelection::Direct { address, port } => {
                let port = valid_port(*port)?;
                let address = address.trim();
                if address.is_empty() {
                    return Err(ConfigError::MissingAddress);
                }
                Ok(DeviceDescriptor::new(address, address, port, DeviceKind::DirectIp))
            }
            DeviceSelection::Known { id, port } => {
                if id.is_empty() {
                    return Err(ConfigError::EmptyDeviceId);
                }
                let port = valid_port(*port)?;

                if let Some(dev) = self.discovery.lookup(id) {
                    return Ok(DeviceDescriptor::new(id.as_str(), dev.address, port, DeviceKind::Discovery));
                }

                if let Some(dev) = self.bridge.lookup(id) {
                    if self.bridge.is_offline(&dev) {
                        tracing::error!("Bridge device {} is offline", id);
                        return Err(ConfigError::UnresolvedDevice(id.clone()));
                    }
                    return Ok(DeviceDescriptor::new(id.as_str(), LOCALHOST, port, DeviceKind::DebugBridge));
                }

                if self.multiplexer.lookup(id).is_some() {
                    return Ok(DeviceDescriptor::new(id.as_str(), LOCALHOST, port, DeviceKind::Multiplexer));
                }

                Err(ConfigError::UnresolvedDevice(id.clone()))
            }
        }
    }
}

impl std::fmt::Debug for Locators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locators").finish_non_exhaustive()
    }
}

fn valid_port(port: u32) -> Result<u16, ConfigError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ConfigError::InvalidPort(port)),
    }
}
