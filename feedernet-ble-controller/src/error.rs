use std::time::Duration;

use feedernet_proto::FrameError;

use crate::config::ConfigError;
use crate::link::{DeviceId, TransportError};
use crate::session::{Phase, TransitionError};

/// Why a request to the coordinator was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("device {0} is not tracked")]
    UnknownDevice(DeviceId),
    #[error("device is not ready for credentials ({phase})")]
    NotReady { phase: Phase },
    #[error("cannot encode credentials: {0}")]
    InvalidInput(#[from] FrameError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("write failed after {written} chunk(s): {source}")]
    Transport {
        written: usize,
        #[source]
        source: TransportError,
    },
}

/// Errors from the radio-facing flows
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("Bluetooth is unavailable")]
    AdapterUnavailable,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("device {0} is not known to the adapter")]
    UnknownPeripheral(DeviceId),
    #[error("device {id} has no characteristic {uuid}")]
    MissingCharacteristic { id: DeviceId, uuid: uuid::Uuid },
    #[error("no feeder found")]
    NoFeeder,
    #[error("feeder {0} disconnected before credentials were sent")]
    Disconnected(DeviceId),
    #[error("timed out after {after:?} ({stage})")]
    Timeout { after: Duration, stage: String },
    #[error("BLE driver stopped")]
    LinkClosed,
}
