//! Per-feeder connection state machine.

use std::collections::BTreeSet;
use std::fmt;

use feedernet_proto::ble::{REQUIRED_CHARACTERISTICS, WIFI_CREDENTIALS_UUID};
use feedernet_proto::{StatusEntry, decode_status};
use uuid::Uuid;

use crate::link::{CharProps, CharacteristicInfo, DeviceHandle, DeviceId};

/// Where a feeder is in the provisioning handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Discovered,
    Connecting,
    Connected,
    ServiceFound,
    CharacteristicsFound,
    SubscribedToStatus,
    ReadyForCredentials,
    Disconnected,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Disconnected)
    }

    /// Status notifications only mean something once we are subscribed
    pub fn accepts_status(&self) -> bool {
        matches!(self, Phase::SubscribedToStatus | Phase::ReadyForCredentials)
    }

    /// Operator-facing progress text
    pub fn progress_label(&self) -> &'static str {
        match self {
            Phase::Discovered => "Found feeder.",
            Phase::Connecting => "Connecting...",
            Phase::Connected => "Connected, checking services...",
            Phase::ServiceFound => "Checking feeder characteristics...",
            Phase::CharacteristicsFound => "Subscribing to status updates...",
            Phase::SubscribedToStatus => "Checking credentials characteristic...",
            Phase::ReadyForCredentials => "Ready for credentials.",
            Phase::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Discovered => "discovered",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::ServiceFound => "service-found",
            Phase::CharacteristicsFound => "characteristics-found",
            Phase::SubscribedToStatus => "subscribed",
            Phase::ReadyForCredentials => "ready",
            Phase::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Inputs that move a session between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    LinkConnected,
    ServiceLocated,
    CharacteristicsLocated,
    SubscriptionAcknowledged,
    CredentialsWritable,
    LinkDisconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {event:?} while {from}")]
pub struct TransitionError {
    pub from: Phase,
    pub event: SessionEvent,
}

/// One feeder seen during the current scan
#[derive(Debug, Clone)]
pub struct DeviceSession {
    handle: DeviceHandle,
    phase: Phase,
    last_status: Option<StatusEntry>,
    located: BTreeSet<Uuid>,
    credentials_props: Option<CharProps>,
}

impl DeviceSession {
    pub fn new(handle: DeviceHandle) -> Self {
        Self {
            handle,
            phase: Phase::Discovered,
            last_status: None,
            located: BTreeSet::new(),
            credentials_props: None,
        }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn id(&self) -> &DeviceId {
        &self.handle.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_status(&self) -> Option<&StatusEntry> {
        self.last_status.as_ref()
    }

    pub fn can_write_credentials(&self) -> bool {
        self.phase == Phase::ReadyForCredentials
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<Phase, TransitionError> {
        use Phase::*;
        use SessionEvent::*;

        let next = match (self.phase, event) {
            (Discovered, ConnectRequested) => Connecting,
            (Connecting, LinkConnected) => Connected,
            (Connected, ServiceLocated) => ServiceFound,
            (ServiceFound, CharacteristicsLocated) if self.has_required_characteristics() => {
                CharacteristicsFound
            }
            (CharacteristicsFound, SubscriptionAcknowledged) => SubscribedToStatus,
            (SubscribedToStatus, CredentialsWritable) => ReadyForCredentials,
            (from, LinkDisconnected) if !from.is_terminal() => Disconnected,
            (from, event) => return Err(TransitionError { from, event }),
        };

        log::debug!("{}: {} -> {}", self.handle.id, self.phase, next);
        self.phase = next;
        Ok(next)
    }

    /// Remember which feeder characteristics were located. Returns true once
    /// all required ones have been seen.
    pub fn record_characteristics(&mut self, found: &[CharacteristicInfo]) -> bool {
        for characteristic in found {
            if !REQUIRED_CHARACTERISTICS.contains(&characteristic.uuid) {
                continue;
            }
            self.located.insert(characteristic.uuid);
            if characteristic.uuid == WIFI_CREDENTIALS_UUID {
                self.credentials_props = Some(characteristic.properties);
            }
        }
        self.has_required_characteristics()
    }

    pub fn has_required_characteristics(&self) -> bool {
        REQUIRED_CHARACTERISTICS
            .iter()
            .all(|uuid| self.located.contains(uuid))
    }

    /// Whether the credentials characteristic can take our writes.
    ///
    /// `strict` demands the write-without-response property. Otherwise the
    /// characteristic only has to have been located.
    pub fn credentials_writable(&self, strict: bool) -> bool {
        match self.credentials_props {
            Some(props) => !strict || props.write_without_response,
            None => false,
        }
    }

    /// Store a status notification. Payloads that arrive before the
    /// subscription is acknowledged, or that do not decode, are dropped and
    /// the previous status is kept.
    pub fn update_status(&mut self, raw: &[u8]) -> Option<&StatusEntry> {
        if !self.phase.accepts_status() {
            log::debug!(
                "{}: status payload while {}, ignoring",
                self.handle.id,
                self.phase
            );
            return None;
        }
        let entry = decode_status(raw)?;
        self.last_status = Some(entry);
        self.last_status.as_ref()
    }

    /// Later advertisements may carry a name the first one lacked
    pub fn refresh_name(&mut self, name: Option<String>) -> bool {
        match name {
            Some(name) if self.handle.name.as_deref() != Some(name.as_str()) => {
                self.handle.name = Some(name);
                true
            }
            _ => false,
        }
    }
}
