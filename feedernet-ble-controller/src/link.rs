//! Boundary between the provisioning core and the radio.
//!
//! The radio talks to the core through [`LinkEvent`]s. The core talks back
//! through the [`LinkProvider`] and [`Transport`] traits, whose methods only
//! queue work and return immediately; results arrive later as events.

use std::fmt;

use uuid::Uuid;

/// Opaque identifier of a discovered peripheral, stable for a scan session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A discovered feeder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: DeviceId,
    /// Advertised local name, if any
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<DeviceId>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }

    /// Match by name or id fragment, the way operators type them
    pub fn matches(&self, pattern: &str) -> bool {
        self.id.as_str().contains(pattern)
            || self.name.as_deref().is_some_and(|n| n.contains(pattern))
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.id)
    }
}

/// GATT properties the core cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharProps,
}

/// Everything the radio reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    AdapterStateChanged {
        powered_on: bool,
    },
    /// Advertisement from a peripheral matching the scan filter. Repeats are normal.
    Discovered(DeviceHandle),
    Connected(DeviceId),
    Disconnected(DeviceId),
    ServicesDiscovered {
        id: DeviceId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        id: DeviceId,
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    },
    Subscribed {
        id: DeviceId,
        characteristic: Uuid,
    },
    ValueUpdated {
        id: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl LinkEvent {
    /// The peripheral this event is about, if any
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            LinkEvent::AdapterStateChanged { .. } => None,
            LinkEvent::Discovered(handle) => Some(&handle.id),
            LinkEvent::Connected(id) | LinkEvent::Disconnected(id) => Some(id),
            LinkEvent::ServicesDiscovered { id, .. }
            | LinkEvent::CharacteristicsDiscovered { id, .. }
            | LinkEvent::Subscribed { id, .. }
            | LinkEvent::ValueUpdated { id, .. } => Some(id),
        }
    }
}

/// Work the core asks of the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    StartScan {
        service: Uuid,
    },
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices {
        id: DeviceId,
        service: Uuid,
    },
    DiscoverCharacteristics {
        id: DeviceId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    Subscribe {
        id: DeviceId,
        characteristic: Uuid,
    },
    Write {
        id: DeviceId,
        characteristic: Uuid,
        data: Vec<u8>,
    },
}

impl LinkRequest {
    /// What the link reports when it cannot carry this request out.
    ///
    /// A failed connection or discovery step ends the feeder's session.
    /// Scan control and writes have no session event to report.
    pub fn failure_event(&self) -> Option<LinkEvent> {
        match self {
            LinkRequest::StartScan { .. } | LinkRequest::StopScan | LinkRequest::Write { .. } => {
                None
            }
            LinkRequest::Connect(id)
            | LinkRequest::Disconnect(id)
            | LinkRequest::DiscoverServices { id, .. }
            | LinkRequest::DiscoverCharacteristics { id, .. }
            | LinkRequest::Subscribe { id, .. } => Some(LinkEvent::Disconnected(id.clone())),
        }
    }
}

/// Discovery and connection management
pub trait LinkProvider {
    /// Start discovery filtered to `service`, reporting duplicates
    fn start_scan(&mut self, service: Uuid);

    fn stop_scan(&mut self);

    fn connect(&mut self, id: &DeviceId);

    fn disconnect(&mut self, id: &DeviceId);

    fn discover_services(&mut self, id: &DeviceId, service: Uuid);

    fn discover_characteristics(&mut self, id: &DeviceId, service: Uuid, characteristics: &[Uuid]);

    /// Enable notifications on a characteristic
    fn subscribe(&mut self, id: &DeviceId, characteristic: Uuid);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("link to {0} is closed")]
    Closed(DeviceId),
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Unacknowledged writes
pub trait Transport {
    /// Queue one write. Returning `Ok` only means the write was handed over.
    fn write_without_response(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError>;
}

/// Records requests instead of performing them
impl LinkProvider for Vec<LinkRequest> {
    fn start_scan(&mut self, service: Uuid) {
        self.push(LinkRequest::StartScan { service });
    }

    fn stop_scan(&mut self) {
        self.push(LinkRequest::StopScan);
    }

    fn connect(&mut self, id: &DeviceId) {
        self.push(LinkRequest::Connect(id.clone()));
    }

    fn disconnect(&mut self, id: &DeviceId) {
        self.push(LinkRequest::Disconnect(id.clone()));
    }

    fn discover_services(&mut self, id: &DeviceId, service: Uuid) {
        self.push(LinkRequest::DiscoverServices {
            id: id.clone(),
            service,
        });
    }

    fn discover_characteristics(&mut self, id: &DeviceId, service: Uuid, characteristics: &[Uuid]) {
        self.push(LinkRequest::DiscoverCharacteristics {
            id: id.clone(),
            service,
            characteristics: characteristics.to_vec(),
        });
    }

    fn subscribe(&mut self, id: &DeviceId, characteristic: Uuid) {
        self.push(LinkRequest::Subscribe {
            id: id.clone(),
            characteristic,
        });
    }
}

impl Transport for Vec<LinkRequest> {
    fn write_without_response(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.push(LinkRequest::Write {
            id: id.clone(),
            characteristic,
            data: data.to_vec(),
        });
        Ok(())
    }
}
