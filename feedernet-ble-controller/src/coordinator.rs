//! Provisioning coordinator - owns every feeder session of a scan cycle
//!
//! Radio callbacks are fed in through [`ProvisioningCoordinator::handle_event`].
//! The coordinator moves the matching [`DeviceSession`] along, asks the link
//! for the next discovery step, and queues [`Notification`]s for whoever
//! renders progress. Nothing in here blocks or awaits.

use std::collections::{BTreeMap, VecDeque};

use feedernet_proto::ble::{
    REQUIRED_CHARACTERISTICS, SERVICE_UUID, STATUS_UUID, WIFI_CREDENTIALS_UUID,
};
use feedernet_proto::{StatusEntry, encode};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProvisionerConfig;
use crate::error::ProvisionError;
use crate::link::{CharacteristicInfo, DeviceHandle, DeviceId, LinkEvent, LinkProvider, Transport};
use crate::session::{DeviceSession, Phase, SessionEvent};

/// Render updates for a front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ScanStarted,
    ScanStopped,
    /// The set of tracked feeders, or a name, changed
    DevicesChanged,
    PhaseChanged { id: DeviceId, phase: Phase },
    ReadyForCredentials { handle: DeviceHandle },
    StatusUpdated { id: DeviceId, entry: StatusEntry },
    CredentialsSent { id: DeviceId, chunks: usize },
    AdapterUnavailable,
}

pub struct ProvisioningCoordinator<L, T> {
    config: ProvisionerConfig,
    link: L,
    transport: T,
    sessions: BTreeMap<DeviceId, DeviceSession>,
    scanning: bool,
    notifications: VecDeque<Notification>,
}

impl<L: LinkProvider, T: Transport> ProvisioningCoordinator<L, T> {
    pub fn new(config: ProvisionerConfig, link: L, transport: T) -> Self {
        Self {
            config,
            link,
            transport,
            sessions: BTreeMap::new(),
            scanning: false,
            notifications: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn sessions(&self) -> impl Iterator<Item = &DeviceSession> {
        self.sessions.values()
    }

    pub fn session(&self, id: &DeviceId) -> Option<&DeviceSession> {
        self.sessions.get(id)
    }

    pub fn phase(&self, id: &DeviceId) -> Option<Phase> {
        self.sessions.get(id).map(DeviceSession::phase)
    }

    /// Drain queued render updates, oldest first
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    fn notify(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
    }

    /// Forget every feeder and scan for the service again
    pub fn start_scan(&mut self) {
        self.sessions.clear();
        self.scanning = true;
        info!("Scanning for feeders advertising {SERVICE_UUID}");
        self.link.start_scan(SERVICE_UUID);
        self.notify(Notification::ScanStarted);
        self.notify(Notification::DevicesChanged);
    }

    pub fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        self.link.stop_scan();
        self.notify(Notification::ScanStopped);
    }

    /// Single intake for everything the link reports
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::AdapterStateChanged { powered_on } => self.on_adapter_state(powered_on),
            LinkEvent::Discovered(handle) => self.on_discovered(handle),
            LinkEvent::Connected(id) => self.on_connected(&id),
            LinkEvent::Disconnected(id) => self.on_disconnected(&id),
            LinkEvent::ServicesDiscovered { id, services } => self.on_service_found(&id, &services),
            LinkEvent::CharacteristicsDiscovered {
                id,
                service,
                characteristics,
            } => self.on_characteristics_found(&id, service, &characteristics),
            LinkEvent::Subscribed { id, characteristic } => self.on_subscribed(&id, characteristic),
            LinkEvent::ValueUpdated {
                id,
                characteristic,
                value,
            } => self.on_status_value(&id, characteristic, &value),
        }
    }

    pub fn on_adapter_state(&mut self, powered_on: bool) {
        if powered_on {
            self.start_scan();
        } else {
            warn!("Bluetooth unavailable");
            self.scanning = false;
            self.notify(Notification::AdapterUnavailable);
        }
    }

    pub fn on_discovered(&mut self, handle: DeviceHandle) {
        if let Some(session) = self.sessions.get_mut(&handle.id) {
            if session.refresh_name(handle.name) {
                self.notify(Notification::DevicesChanged);
            }
            return;
        }

        info!("Found feeder: {handle}");
        let id = handle.id.clone();
        self.sessions.insert(id.clone(), DeviceSession::new(handle));
        self.notify(Notification::DevicesChanged);

        if self.config.stop_scan_on_first_match {
            self.stop_scan();
        } else if let Err(e) = self.connect(&id) {
            warn!("{id}: {e}");
        }
    }

    /// Operator picked a feeder
    pub fn connect(&mut self, id: &DeviceId) -> Result<(), ProvisionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ProvisionError::UnknownDevice(id.clone()))?;
        let phase = session.apply(SessionEvent::ConnectRequested)?;
        info!("Connecting to {}", session.handle());
        self.link.connect(id);
        self.notify(Notification::PhaseChanged {
            id: id.clone(),
            phase,
        });
        Ok(())
    }

    /// Ask the link to drop a feeder. The session goes away once the link
    /// reports the disconnect.
    pub fn disconnect(&mut self, id: &DeviceId) -> Result<(), ProvisionError> {
        if !self.sessions.contains_key(id) {
            return Err(ProvisionError::UnknownDevice(id.clone()));
        }
        info!("Disconnecting from {id}");
        self.link.disconnect(id);
        Ok(())
    }

    fn advance(&mut self, id: &DeviceId, event: SessionEvent) -> Option<Phase> {
        let Some(session) = self.sessions.get_mut(id) else {
            debug!("ignoring {event:?} for untracked device {id}");
            return None;
        };
        match session.apply(event) {
            Ok(phase) => {
                info!("{id}: {}", phase.progress_label());
                self.notify(Notification::PhaseChanged {
                    id: id.clone(),
                    phase,
                });
                Some(phase)
            }
            Err(e) => {
                warn!("{id}: {e}");
                None
            }
        }
    }

    pub fn on_connected(&mut self, id: &DeviceId) {
        if self.advance(id, SessionEvent::LinkConnected).is_some() {
            self.link.discover_services(id, SERVICE_UUID);
        }
    }

    pub fn on_service_found(&mut self, id: &DeviceId, services: &[Uuid]) {
        if !services.contains(&SERVICE_UUID) {
            debug!("{id}: feeder service not among {services:?}");
            return;
        }
        if self.advance(id, SessionEvent::ServiceLocated).is_some() {
            self.link
                .discover_characteristics(id, SERVICE_UUID, &REQUIRED_CHARACTERISTICS);
        }
    }

    pub fn on_characteristics_found(
        &mut self,
        id: &DeviceId,
        service: Uuid,
        characteristics: &[CharacteristicInfo],
    ) {
        if service != SERVICE_UUID {
            debug!("{id}: characteristics of foreign service {service}");
            return;
        }
        let Some(session) = self.sessions.get_mut(id) else {
            debug!("ignoring characteristics for untracked device {id}");
            return;
        };
        if session.phase() != Phase::ServiceFound {
            debug!("{id}: characteristics while {}, ignoring", session.phase());
            return;
        }
        if !session.record_characteristics(characteristics) {
            info!("{id}: waiting for the remaining feeder characteristics");
            return;
        }
        if self.advance(id, SessionEvent::CharacteristicsLocated).is_some() {
            self.link.subscribe(id, STATUS_UUID);
        }
    }

    pub fn on_subscribed(&mut self, id: &DeviceId, characteristic: Uuid) {
        if characteristic != STATUS_UUID {
            debug!("{id}: subscribed to {characteristic}, not the status characteristic");
            return;
        }
        if self
            .advance(id, SessionEvent::SubscriptionAcknowledged)
            .is_none()
        {
            return;
        }

        let strict = self.config.require_write_without_response;
        let writable = self
            .sessions
            .get(id)
            .is_some_and(|session| session.credentials_writable(strict));
        if !writable {
            warn!("{id}: credentials characteristic does not support write without response");
            return;
        }

        if self.advance(id, SessionEvent::CredentialsWritable).is_some()
            && let Some(session) = self.sessions.get(id)
        {
            let handle = session.handle().clone();
            self.notify(Notification::ReadyForCredentials { handle });
        }
    }

    pub fn on_status_value(&mut self, id: &DeviceId, characteristic: Uuid, value: &[u8]) {
        if characteristic != STATUS_UUID {
            debug!("{id}: value from {characteristic}, ignoring");
            return;
        }
        let Some(session) = self.sessions.get_mut(id) else {
            debug!("ignoring status for untracked device {id}");
            return;
        };
        let Some(entry) = session.update_status(value).cloned() else {
            return;
        };
        info!("{id}: {entry}");
        self.notify(Notification::StatusUpdated {
            id: id.clone(),
            entry,
        });
    }

    pub fn on_disconnected(&mut self, id: &DeviceId) {
        if self.advance(id, SessionEvent::LinkDisconnected).is_some() {
            self.sessions.remove(id);
            self.notify(Notification::DevicesChanged);
        }
    }

    /// Frame the credentials and write every chunk, in order, to the feeder.
    ///
    /// Returns the number of chunks written. Writes are unacknowledged; the
    /// feeder answers through status notifications.
    pub fn submit_credentials(
        &mut self,
        id: &DeviceId,
        ssid: &str,
        password: &str,
    ) -> Result<usize, ProvisionError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| ProvisionError::UnknownDevice(id.clone()))?;
        if !session.can_write_credentials() {
            return Err(ProvisionError::NotReady {
                phase: session.phase(),
            });
        }

        let chunks = encode(ssid, password, &self.config.token, self.config.chunk_size)?;
        info!(
            "Sending credentials for {ssid:?} to {id} in {} chunk(s)",
            chunks.len()
        );
        for (written, chunk) in chunks.iter().enumerate() {
            self.transport
                .write_without_response(id, WIFI_CREDENTIALS_UUID, chunk.as_bytes())
                .map_err(|source| ProvisionError::Transport { written, source })?;
        }

        self.notify(Notification::CredentialsSent {
            id: id.clone(),
            chunks: chunks.len(),
        });
        if self.config.rescan_after_submit {
            self.start_scan();
        }
        Ok(chunks.len())
    }
}
