//! btleplug-backed link for provisioning FeederNet feeders
//!
//! A single driver task owns the adapter. The coordinator's requests are
//! queued to it over a channel and executed in order, so credential chunks
//! reach the radio in the order they were written. Adapter events and
//! characteristic notifications come back as [`LinkEvent`]s.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use feedernet_proto::ble::{SERVICE_UUID, characteristic_name};
use feedernet_proto::{Credentials, StatusEntry};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ProvisionerConfig;
use crate::coordinator::{Notification, ProvisioningCoordinator};
use crate::error::ControllerError;
use crate::link::{
    CharProps, CharacteristicInfo, DeviceHandle, DeviceId, LinkEvent, LinkProvider, LinkRequest,
    Transport, TransportError,
};
use crate::session::Phase;

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, ControllerError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(ControllerError::NoAdapter)
}

/// Sending half of the driver's request queue
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<LinkRequest>,
}

impl RequestQueue {
    fn send(&self, request: LinkRequest) {
        if let Err(e) = self.tx.send(request) {
            warn!("BLE driver stopped, dropping {:?}", e.0);
        }
    }
}

impl LinkProvider for RequestQueue {
    fn start_scan(&mut self, service: Uuid) {
        self.send(LinkRequest::StartScan { service });
    }

    fn stop_scan(&mut self) {
        self.send(LinkRequest::StopScan);
    }

    fn connect(&mut self, id: &DeviceId) {
        self.send(LinkRequest::Connect(id.clone()));
    }

    fn disconnect(&mut self, id: &DeviceId) {
        self.send(LinkRequest::Disconnect(id.clone()));
    }

    fn discover_services(&mut self, id: &DeviceId, service: Uuid) {
        self.send(LinkRequest::DiscoverServices {
            id: id.clone(),
            service,
        });
    }

    fn discover_characteristics(&mut self, id: &DeviceId, service: Uuid, characteristics: &[Uuid]) {
        self.send(LinkRequest::DiscoverCharacteristics {
            id: id.clone(),
            service,
            characteristics: characteristics.to_vec(),
        });
    }

    fn subscribe(&mut self, id: &DeviceId, characteristic: Uuid) {
        self.send(LinkRequest::Subscribe {
            id: id.clone(),
            characteristic,
        });
    }
}

impl Transport for RequestQueue {
    fn write_without_response(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.tx
            .send(LinkRequest::Write {
                id: id.clone(),
                characteristic,
                data: data.to_vec(),
            })
            .map_err(|_| TransportError::Closed(id.clone()))
    }
}

/// Owns the adapter and the peripherals it has handed out
struct Driver {
    adapter: Adapter,
    events: mpsc::UnboundedSender<LinkEvent>,
    peripherals: HashMap<DeviceId, Peripheral>,
    ids: HashMap<PeripheralId, DeviceId>,
    scan_service: Option<Uuid>,
}

/// A running driver: its request queue, its events, and the task itself
pub type DriverLink = (RequestQueue, mpsc::UnboundedReceiver<LinkEvent>, JoinHandle<()>);

/// Start the driver task on `adapter`.
///
/// The task runs until every clone of the returned [`RequestQueue`] is
/// dropped, after executing whatever is still queued. Await the handle to
/// be sure teardown requests reached the radio.
pub fn spawn_driver(adapter: Adapter) -> DriverLink {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let driver = Driver {
        adapter,
        events: event_tx,
        peripherals: HashMap::new(),
        ids: HashMap::new(),
        scan_service: None,
    };
    let task = tokio::spawn(async move {
        if let Err(e) = driver.run(request_rx).await {
            error!("BLE driver failed: {e}");
        }
    });

    (RequestQueue { tx: request_tx }, event_rx, task)
}

/// Open the default adapter and start a driver on it
pub async fn open_link() -> Result<DriverLink, ControllerError> {
    let adapter = get_adapter().await?;
    Ok(spawn_driver(adapter))
}

/// Wait for a driver whose request queue has been dropped
async fn join_driver(task: JoinHandle<()>) {
    if let Err(e) = task.await {
        error!("BLE driver task ended abnormally: {e}");
    }
}

fn characteristic_label(uuid: &Uuid) -> String {
    characteristic_name(uuid).map_or_else(|| uuid.to_string(), str::to_string)
}

impl Driver {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<LinkRequest>,
    ) -> Result<(), ControllerError> {
        let mut central = self.adapter.events().await?;
        // Having an adapter at all is as close to "powered on" as every
        // platform gets
        self.emit(LinkEvent::AdapterStateChanged { powered_on: true });

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let failure = request.failure_event();
                    if let Err(e) = self.execute(request).await {
                        warn!("BLE request failed: {e}");
                        if let Some(event) = failure {
                            self.abandon(event).await;
                        }
                    }
                }
                event = central.next() => {
                    let Some(event) = event else {
                        self.emit(LinkEvent::AdapterStateChanged { powered_on: false });
                        break;
                    };
                    if let Err(e) = self.on_central_event(event).await {
                        debug!("ignoring adapter event: {e}");
                    }
                }
            }
        }

        if self.scan_service.is_some() {
            let _ = self.adapter.stop_scan().await;
        }
        Ok(())
    }

    fn emit(&self, event: LinkEvent) {
        // Nobody listening means the flow is over
        let _ = self.events.send(event);
    }

    /// Drop the link to a peripheral whose session step failed and report it
    async fn abandon(&self, event: LinkEvent) {
        if let Some(peripheral) = event.device().and_then(|id| self.peripherals.get(id))
            && peripheral.is_connected().await.unwrap_or(false)
            && let Err(e) = peripheral.disconnect().await
        {
            debug!("disconnect after failed request: {e}");
        }
        self.emit(event);
    }

    fn peripheral(&self, id: &DeviceId) -> Result<&Peripheral, ControllerError> {
        self.peripherals
            .get(id)
            .ok_or_else(|| ControllerError::UnknownPeripheral(id.clone()))
    }

    fn characteristic(
        peripheral: &Peripheral,
        id: &DeviceId,
        uuid: Uuid,
    ) -> Result<Characteristic, ControllerError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| ControllerError::MissingCharacteristic {
                id: id.clone(),
                uuid,
            })
    }

    async fn on_central_event(&mut self, event: CentralEvent) -> Result<(), ControllerError> {
        match event {
            CentralEvent::DeviceDiscovered(pid) | CentralEvent::DeviceUpdated(pid) => {
                self.on_advertisement(pid).await?;
            }
            CentralEvent::DeviceDisconnected(pid) => {
                if let Some(id) = self.ids.get(&pid) {
                    self.emit(LinkEvent::Disconnected(id.clone()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_advertisement(&mut self, pid: PeripheralId) -> Result<(), ControllerError> {
        let Some(service) = self.scan_service else {
            return Ok(());
        };
        let peripheral = self.adapter.peripheral(&pid).await?;
        let Some(props) = peripheral.properties().await? else {
            return Ok(());
        };

        // Scan filters are not honoured everywhere, so check here too
        let advertises_service =
            props.services.contains(&service) || props.service_data.contains_key(&service);
        if !advertises_service {
            return Ok(());
        }

        let id = DeviceId::new(pid.to_string());
        self.ids.insert(pid, id.clone());
        self.peripherals.insert(id.clone(), peripheral);
        self.emit(LinkEvent::Discovered(DeviceHandle::new(id, props.local_name)));
        Ok(())
    }

    async fn execute(&mut self, request: LinkRequest) -> Result<(), ControllerError> {
        if !matches!(request, LinkRequest::Write { .. }) {
            debug!("executing {request:?}");
        }
        match request {
            LinkRequest::StartScan { service } => {
                self.scan_service = Some(service);
                self.adapter
                    .start_scan(ScanFilter {
                        services: vec![service],
                    })
                    .await?;
            }
            LinkRequest::StopScan => {
                self.scan_service = None;
                self.adapter.stop_scan().await?;
            }
            LinkRequest::Connect(id) => {
                self.peripheral(&id)?.connect().await?;
                self.emit(LinkEvent::Connected(id));
            }
            LinkRequest::Disconnect(id) => {
                let peripheral = self.peripheral(&id)?;
                if peripheral.is_connected().await? {
                    peripheral.disconnect().await?;
                }
                self.emit(LinkEvent::Disconnected(id));
            }
            LinkRequest::DiscoverServices { id, service } => {
                let peripheral = self.peripheral(&id)?;
                peripheral.discover_services().await?;
                let services: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid).collect();
                debug!("{id}: services {services:?}, looking for {service}");
                self.emit(LinkEvent::ServicesDiscovered { id, services });
            }
            LinkRequest::DiscoverCharacteristics {
                id,
                service,
                characteristics,
            } => {
                let found: Vec<CharacteristicInfo> = self
                    .peripheral(&id)?
                    .characteristics()
                    .into_iter()
                    .filter(|c| c.service_uuid == service && characteristics.contains(&c.uuid))
                    .map(|c| CharacteristicInfo {
                        uuid: c.uuid,
                        properties: char_props(c.properties),
                    })
                    .collect();
                self.emit(LinkEvent::CharacteristicsDiscovered {
                    id,
                    service,
                    characteristics: found,
                });
            }
            LinkRequest::Subscribe { id, characteristic } => {
                let peripheral = self.peripheral(&id)?.clone();
                let target = Self::characteristic(&peripheral, &id, characteristic)?;
                debug!("{id}: subscribing to {}", characteristic_label(&characteristic));

                // Open the stream first so the first notification is not lost
                let mut stream = peripheral.notifications().await?;
                peripheral.subscribe(&target).await?;

                let events = self.events.clone();
                let forward_id = id.clone();
                tokio::spawn(async move {
                    while let Some(notification) = stream.next().await {
                        debug!(
                            "{forward_id}: {} bytes from {}",
                            notification.value.len(),
                            characteristic_label(&notification.uuid)
                        );
                        let event = LinkEvent::ValueUpdated {
                            id: forward_id.clone(),
                            characteristic: notification.uuid,
                            value: notification.value,
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    debug!("{forward_id}: notification stream closed");
                });

                self.emit(LinkEvent::Subscribed { id, characteristic });
            }
            LinkRequest::Write {
                id,
                characteristic,
                data,
            } => {
                let peripheral = self.peripheral(&id)?;
                let target = Self::characteristic(peripheral, &id, characteristic)?;
                debug!(
                    "{id}: writing {} bytes to {}",
                    data.len(),
                    characteristic_label(&characteristic)
                );
                peripheral
                    .write(&target, &data, WriteType::WithoutResponse)
                    .await?;
            }
        }
        Ok(())
    }
}

fn char_props(flags: CharPropFlags) -> CharProps {
    CharProps {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
    }
}

/// Scan for feeders advertising the provisioning service
pub async fn scan(duration: Duration) -> Result<Vec<DeviceHandle>, ControllerError> {
    let (mut link, mut events, driver) = open_link().await?;
    link.start_scan(SERVICE_UUID);

    let deadline = Instant::now() + duration;
    let mut devices: Vec<DeviceHandle> = Vec::new();
    let result = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep_until(deadline) => break Ok(devices),
        };
        match event {
            Some(LinkEvent::Discovered(handle)) => {
                match devices.iter_mut().find(|d| d.id == handle.id) {
                    Some(known) if handle.name.is_some() => known.name = handle.name,
                    Some(_) => {}
                    None => devices.push(handle),
                }
            }
            Some(LinkEvent::AdapterStateChanged { powered_on: false }) => {
                break Err(ControllerError::AdapterUnavailable);
            }
            Some(_) => {}
            None => break Err(ControllerError::LinkClosed),
        }
    };

    link.stop_scan();
    drop(link);
    join_driver(driver).await;
    result
}

/// What a provisioning run achieved
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub device: DeviceHandle,
    pub chunks: usize,
    /// Last status the feeder reported, if it reported any before the run ended
    pub status: Option<StatusEntry>,
}

/// Find a feeder, send it WiFi credentials, and follow its status updates.
///
/// # Arguments
/// * `target` - Device name/id fragment, or None to take the first feeder found
/// * `on_progress` - Called with every coordinator notification, for display
///
/// Returns once the feeder reports a terminal status or drops the link after
/// receiving credentials, and the driver has carried out the teardown.
pub async fn provision(
    config: ProvisionerConfig,
    target: Option<&str>,
    credentials: &Credentials,
    timeout: Duration,
    on_progress: impl FnMut(&Notification),
) -> Result<ProvisionOutcome, ControllerError> {
    config.validate()?;
    let (queue, mut events, driver) = open_link().await?;
    let mut coordinator = ProvisioningCoordinator::new(config, queue.clone(), queue);

    let result = run_provisioning(
        &mut coordinator,
        &mut events,
        target,
        credentials,
        timeout,
        on_progress,
    )
    .await;

    // Closing the queue lets the driver finish the teardown and stop
    drop(coordinator);
    join_driver(driver).await;
    result
}

/// Drive `coordinator` from `events` until the run for one feeder is over.
///
/// The adapter coming up starts the scan. `Discovered` events that do not
/// match `target` never reach the coordinator. The first feeder left is
/// connected and gets the credentials as soon as it is ready. Teardown
/// requests (disconnect, stop scan) are queued on the way out.
pub async fn run_provisioning<L: LinkProvider, T: Transport>(
    coordinator: &mut ProvisioningCoordinator<L, T>,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    target: Option<&str>,
    credentials: &Credentials,
    timeout: Duration,
    mut on_progress: impl FnMut(&Notification),
) -> Result<ProvisionOutcome, ControllerError> {
    let deadline = Instant::now() + timeout;
    let mut selected: Option<DeviceId> = None;
    let mut outcome: Option<ProvisionOutcome> = None;

    let result = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep_until(deadline) => {
                break Err(match (&outcome, &selected) {
                    (None, None) => ControllerError::NoFeeder,
                    (Some(_), _) => ControllerError::Timeout {
                        after: timeout,
                        stage: "waiting for feeder status".to_string(),
                    },
                    (None, Some(id)) => ControllerError::Timeout {
                        after: timeout,
                        stage: coordinator
                            .phase(id)
                            .map_or("connecting", |p| p.progress_label())
                            .to_string(),
                    },
                });
            }
        };
        let Some(event) = event else {
            break Err(ControllerError::LinkClosed);
        };
        if let LinkEvent::Discovered(handle) = &event
            && !target.is_none_or(|t| handle.matches(t))
        {
            debug!("skipping {handle}");
            continue;
        }
        coordinator.handle_event(event);

        let mut finished = None;
        for notification in coordinator.take_notifications() {
            on_progress(&notification);
            match notification {
                Notification::AdapterUnavailable => {
                    finished = Some(Err(ControllerError::AdapterUnavailable));
                }
                Notification::DevicesChanged if selected.is_none() => {
                    let Some(id) = coordinator.sessions().next().map(|s| s.id().clone()) else {
                        continue;
                    };
                    info!("Selected feeder {id}");
                    if coordinator.phase(&id) == Some(Phase::Discovered)
                        && let Err(e) = coordinator.connect(&id)
                    {
                        finished = Some(Err(e.into()));
                    }
                    selected = Some(id);
                }
                Notification::ReadyForCredentials { handle }
                    if selected.as_ref() == Some(&handle.id) =>
                {
                    match coordinator.submit_credentials(
                        &handle.id,
                        credentials.ssid(),
                        credentials.password(),
                    ) {
                        Ok(chunks) => {
                            outcome = Some(ProvisionOutcome {
                                device: handle,
                                chunks,
                                status: None,
                            });
                            if coordinator.config().rescan_after_submit {
                                // The session is gone, no status will reach it
                                finished = outcome.take().map(Ok);
                            }
                        }
                        Err(e) => finished = Some(Err(e.into())),
                    }
                }
                Notification::StatusUpdated { id, entry } if selected.as_ref() == Some(&id) => {
                    if let Some(outcome) = outcome.as_mut() {
                        let terminal = entry.is_terminal();
                        outcome.status = Some(entry);
                        if terminal {
                            finished = Some(Ok(outcome.clone()));
                        }
                    }
                }
                Notification::PhaseChanged {
                    id,
                    phase: Phase::Disconnected,
                } if selected.as_ref() == Some(&id) => {
                    // Feeders drop the link to join WiFi
                    finished = Some(match outcome.take() {
                        Some(outcome) => Ok(outcome),
                        None => Err(ControllerError::Disconnected(id)),
                    });
                }
                _ => {}
            }
        }
        if let Some(result) = finished {
            break result;
        }
    };

    if let Some(id) = &selected
        && coordinator.session(id).is_some()
    {
        let _ = coordinator.disconnect(id);
    }
    coordinator.stop_scan();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedernet_proto::Severity;
    use feedernet_proto::ble::{DEVICE_ID_UUID, STATUS_UUID, WIFI_CREDENTIALS_UUID};

    type Coordinator = ProvisioningCoordinator<Vec<LinkRequest>, Vec<LinkRequest>>;

    const PATIENCE: Duration = Duration::from_secs(5);

    fn coordinator() -> Coordinator {
        ProvisioningCoordinator::new(ProvisionerConfig::default(), Vec::new(), Vec::new())
    }

    fn feeder(id: &str) -> DeviceHandle {
        DeviceHandle::new(id, Some(format!("FeederNet {id}")))
    }

    /// What a feeder in pairing mode reports, from advertisement to status
    /// subscription, when every request succeeds
    fn handshake(handle: &DeviceHandle) -> Vec<LinkEvent> {
        let id = handle.id.clone();
        vec![
            LinkEvent::Discovered(handle.clone()),
            LinkEvent::Connected(id.clone()),
            LinkEvent::ServicesDiscovered {
                id: id.clone(),
                services: vec![SERVICE_UUID],
            },
            LinkEvent::CharacteristicsDiscovered {
                id: id.clone(),
                service: SERVICE_UUID,
                characteristics: vec![
                    CharacteristicInfo {
                        uuid: DEVICE_ID_UUID,
                        properties: CharProps::default(),
                    },
                    CharacteristicInfo {
                        uuid: STATUS_UUID,
                        properties: CharProps {
                            notify: true,
                            ..CharProps::default()
                        },
                    },
                    CharacteristicInfo {
                        uuid: WIFI_CREDENTIALS_UUID,
                        properties: CharProps {
                            write_without_response: true,
                            ..CharProps::default()
                        },
                    },
                ],
            },
            LinkEvent::Subscribed {
                id,
                characteristic: STATUS_UUID,
            },
        ]
    }

    fn status(id: &DeviceId, code: &str) -> LinkEvent {
        LinkEvent::ValueUpdated {
            id: id.clone(),
            characteristic: STATUS_UUID,
            value: code.as_bytes().to_vec(),
        }
    }

    /// Queue `script` behind the adapter coming up. Keep the sender alive to
    /// have a quiet link rather than a closed one.
    fn link_events(
        script: Vec<LinkEvent>,
    ) -> (mpsc::UnboundedSender<LinkEvent>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(LinkEvent::AdapterStateChanged { powered_on: true }).unwrap();
        for event in script {
            tx.send(event).unwrap();
        }
        (tx, rx)
    }

    async fn run(
        c: &mut Coordinator,
        events: &mut mpsc::UnboundedReceiver<LinkEvent>,
        target: Option<&str>,
        timeout: Duration,
    ) -> Result<ProvisionOutcome, ControllerError> {
        let credentials = Credentials::new("MyHomeNetwork", "SuperSecret123");
        run_provisioning(c, events, target, &credentials, timeout, |_| {}).await
    }

    #[tokio::test]
    async fn disconnect_after_submit_is_success() {
        let handle = feeder("AA:01");
        let mut script = handshake(&handle);
        script.push(LinkEvent::Disconnected(handle.id.clone()));
        let (_tx, mut events) = link_events(script);
        let mut c = coordinator();

        let outcome = run(&mut c, &mut events, None, PATIENCE).await.unwrap();
        assert_eq!(outcome.device, handle);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(outcome.status, None);
        assert_eq!(c.transport().len(), 3);
        // The feeder already dropped the link
        assert!(!c.link().contains(&LinkRequest::Disconnect(handle.id)));
    }

    #[tokio::test]
    async fn disconnect_before_submit_is_an_error() {
        let handle = feeder("AA:01");
        let mut script = handshake(&handle);
        script.truncate(2);
        script.push(LinkEvent::Disconnected(handle.id.clone()));
        let (_tx, mut events) = link_events(script);
        let mut c = coordinator();

        let result = run(&mut c, &mut events, None, PATIENCE).await;
        assert!(matches!(result, Err(ControllerError::Disconnected(id)) if id == handle.id));
        assert!(c.transport().is_empty());
        assert_eq!(c.sessions().count(), 0);
    }

    #[tokio::test]
    async fn failed_connect_ends_the_run() {
        let handle = feeder("AA:01");
        let failure = LinkRequest::Connect(handle.id.clone()).failure_event().unwrap();
        let (_tx, mut events) = link_events(vec![LinkEvent::Discovered(handle.clone()), failure]);
        let mut c = coordinator();

        let result = run(&mut c, &mut events, None, PATIENCE).await;
        assert!(matches!(result, Err(ControllerError::Disconnected(id)) if id == handle.id));
    }

    #[tokio::test]
    async fn failed_subscribe_ends_the_run() {
        let handle = feeder("AA:01");
        let mut script = handshake(&handle);
        let subscribe = LinkRequest::Subscribe {
            id: handle.id.clone(),
            characteristic: STATUS_UUID,
        };
        script.pop();
        script.push(subscribe.failure_event().unwrap());
        let (_tx, mut events) = link_events(script);
        let mut c = coordinator();

        let result = run(&mut c, &mut events, None, PATIENCE).await;
        assert!(matches!(result, Err(ControllerError::Disconnected(_))));
        assert!(c.link().contains(&subscribe));
        assert!(c.transport().is_empty());
    }

    #[tokio::test]
    async fn device_pattern_skips_other_feeders() {
        let other = DeviceHandle::new("11:22", Some("Bowl Sensor".to_string()));
        let handle = feeder("AA:01");
        let mut script = vec![LinkEvent::Discovered(other.clone())];
        script.extend(handshake(&handle));
        script.push(LinkEvent::Disconnected(handle.id.clone()));
        let (_tx, mut events) = link_events(script);
        let mut c = coordinator();

        let outcome = run(&mut c, &mut events, Some("FeederNet"), PATIENCE)
            .await
            .unwrap();
        assert_eq!(outcome.device.id, handle.id);
        assert!(c.session(&other.id).is_none());
        assert!(!c.link().contains(&LinkRequest::Connect(other.id)));
        assert!(c.link().contains(&LinkRequest::Connect(handle.id)));
    }

    #[tokio::test]
    async fn terminal_status_ends_the_run_and_disconnects() {
        let handle = feeder("AA:01");
        let mut script = handshake(&handle);
        script.push(status(&handle.id, "STATUS_WIFI_FOUND"));
        script.push(status(&handle.id, "STATUS_SUCCESS"));
        let (_tx, mut events) = link_events(script);
        let mut seen = Vec::new();
        let mut c = coordinator();

        let credentials = Credentials::new("MyHomeNetwork", "SuperSecret123");
        let outcome = run_provisioning(
            &mut c,
            &mut events,
            None,
            &credentials,
            PATIENCE,
            |n: &Notification| seen.push(n.clone()),
        )
        .await
        .unwrap();

        let status = outcome.status.unwrap();
        assert_eq!(status.severity, Severity::Success);
        assert_eq!(c.link().last(), Some(&LinkRequest::Disconnect(handle.id.clone())));
        assert!(seen.contains(&Notification::CredentialsSent {
            id: handle.id,
            chunks: 3
        }));
        assert_eq!(
            seen.iter()
                .filter(|n| matches!(n, Notification::StatusUpdated { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn quiet_link_times_out_with_the_stage() {
        let (_tx, mut events) = link_events(Vec::new());
        let mut c = coordinator();
        let result = run(&mut c, &mut events, None, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ControllerError::NoFeeder)));

        let handle = feeder("AA:01");
        let mut script = handshake(&handle);
        script.truncate(2);
        let (_tx, mut events) = link_events(script);
        let mut c = coordinator();
        let result = run(&mut c, &mut events, None, Duration::from_millis(50)).await;
        let Err(ControllerError::Timeout { stage, .. }) = &result else {
            panic!("expected a timeout, got {result:?}");
        };
        assert_eq!(stage, Phase::Connected.progress_label());
        assert_eq!(c.link().last(), Some(&LinkRequest::Disconnect(handle.id)));
    }

    #[tokio::test]
    async fn closed_or_unpowered_link_ends_the_run() {
        let (tx, mut events) = link_events(Vec::new());
        drop(tx);
        let result = run(&mut coordinator(), &mut events, None, PATIENCE).await;
        assert!(matches!(result, Err(ControllerError::LinkClosed)));

        let (_tx, mut events) =
            link_events(vec![LinkEvent::AdapterStateChanged { powered_on: false }]);
        let result = run(&mut coordinator(), &mut events, None, PATIENCE).await;
        assert!(matches!(result, Err(ControllerError::AdapterUnavailable)));
    }
}
