//! FeederNet BLE Controller
//!
//! BLE client for handing WiFi credentials to FeederNet feeders.
//!
//! The provisioning core ([`coordinator`], [`session`]) is synchronous and
//! radio-agnostic: it consumes [`link::LinkEvent`]s and issues requests
//! through the [`link::LinkProvider`] and [`link::Transport`] traits. The
//! [`ble`] module plugs it into a real adapter via btleplug.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use feedernet_ble_controller::{ProvisionerConfig, ble};
//! use feedernet_proto::Credentials;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Scan for feeders
//!     for device in ble::scan(Duration::from_secs(5)).await? {
//!         println!("{device}");
//!     }
//!
//!     // Provision the first one found
//!     let credentials = Credentials::new("MySSID", "MyPassword");
//!     let outcome = ble::provision(
//!         ProvisionerConfig::load_default()?,
//!         None,
//!         &credentials,
//!         Duration::from_secs(60),
//!         |n| println!("{n:?}"),
//!     )
//!     .await?;
//!     println!("{:?}", outcome.status);
//!
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod link;
pub mod session;

pub use config::{ConfigError, ProvisionerConfig};
pub use coordinator::{Notification, ProvisioningCoordinator};
pub use error::{ControllerError, ProvisionError};
pub use link::{DeviceHandle, DeviceId, LinkEvent, LinkProvider, LinkRequest, Transport};
pub use session::{DeviceSession, Phase};
