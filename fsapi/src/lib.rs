//! Session-based client for the FSAPI internet radio control protocol
//!
//! This crate sits on top of the private `fsapi-transport` crate and adds
//! the protocol itself: session creation, typed status handling, list
//! pagination, change-notification long-polls and the bounded
//! reconnect-and-retry policy.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fsapi::{Connection, FsapiClient, nodes};
//! use fsapi_transport::HttpTransport;
//!
//! let transport = Arc::new(HttpTransport::new()?);
//! let connection = Connection::new(FsapiClient::new(transport, "192.168.1.40", "1234"));
//!
//! connection.connect().await?;
//! let power = connection.get(nodes::POWER).await?;
//! connection.set(nodes::PLAY_CONTROL, nodes::control::NEXT).await?;
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod nodes;
pub mod response;

pub use client::{ClientOptions, FsapiClient, ListOrigin, MAX_LIST_PAGES};
pub use connection::{Connection, ConnectionState};
pub use error::{ApiError, Result};
pub use response::{ListItem, ListPage, Notifications, Status, ValueType, WireValue};
