//! Radio State Synchronization
//!
//! Keeps a typed local model of an FSAPI internet radio consistent with the
//! device across reconnects, session loss and the long-poll notification feed.
//!
//! # Architecture
//!
//! ```text
//! Connection (fsapi) ──get/set──▶ DeviceSyncEngine ──apply──▶ PropertyStore ──▶ DeviceEvent
//!        ▲                             │ refresh / notify          │ hooks (muted, power, ...)
//!        └──────── GET_NOTIFIES ◀──────┘                           ▼
//!                                                             PropertyKind codec
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fsapi::{Connection, FsapiClient};
//! use fsapi_transport::HttpTransport;
//! use radio_state::{DeviceSyncEngine, EngineOptions, PropertyValue};
//!
//! let transport = Arc::new(HttpTransport::new()?);
//! let connection = Arc::new(Connection::new(FsapiClient::new(transport, "192.168.1.40", "1234")));
//! let engine = DeviceSyncEngine::start(connection, EngineOptions::default()).await?;
//!
//! let mut events = engine.subscribe();
//! engine.set_property("volume", PropertyValue::Int(8)).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod capabilities;
pub mod codec;
pub mod engine;
pub mod error;
pub mod logging;
pub mod property;
pub mod store;

pub use capabilities::{Capabilities, FmRange, ModeEntry, ModeList};
pub use codec::{compose_info, BoolMapping, CodecError, PropertyKind, PropertyValue, StepRange};
pub use engine::{DeviceSyncEngine, EngineOptions, Lifecycle};
pub use error::{Result, StateError};
pub use logging::{init_logging, init_logging_from_env, LoggingMode};
pub use property::{names, Action, PropertyDef, ReadSource};
pub use store::{DeviceEvent, Derived, Hook, Origin, PropertyStore, UpdateContext};
