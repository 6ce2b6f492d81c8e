//! # Radio SDK - control FSAPI internet radios
//!
//! A framework-facing layer over `radio-state`: one [`Radio`] handle per
//! device, a [`RadioSystem`] registry driven by an external discovery
//! mechanism, and [`RadioConfig`] loaded from JSON.
//!
//! ```rust,no_run
//! use radio_sdk::{Radio, RadioConfig, PropertyValue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), radio_sdk::SdkError> {
//!     let config = RadioConfig::default();
//!     let radio = Radio::connect("192.168.1.40", "Kitchen radio", &config).await?;
//!
//!     println!("{} volume: {:?}", radio.name, radio.get_property("volume")?);
//!     radio.set_property("volume", PropertyValue::Int(8)).await?;
//!     radio.invoke_action("next").await?;
//!
//!     let mut events = radio.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod radio;
mod system;

pub use config::RadioConfig;
pub use error::SdkError;
pub use radio::Radio;
pub use system::RadioSystem;

pub use fsapi::{ConnectionState, ListOrigin};
pub use radio_state::{
    names, Action, Capabilities, DeviceEvent, Lifecycle, ModeEntry, Origin, PropertyValue,
};
