//! Session lifecycle and the bounded reconnect-and-retry policy
//!
//! [`Connection`] wraps an [`FsapiClient`] with the connectivity state
//! machine:
//!
//! ```text
//! Disconnected --connect ok--> Connected
//! Connected --session fault--> Reconnecting --session + retry ok--> Connected
//!                                           --either fails-------> Disconnected
//! ```
//!
//! Every get/set/list call and every reconnect runs under one per-device
//! lock so a reconnect never races another call's read of the session id.
//! The notification long-poll runs outside that lock; when it fails the
//! caller hands its epoch to [`Connection::recover`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::client::FsapiClient;
use crate::error::{ApiError, Result};
use crate::response::{ListItem, Notifications, WireValue};

/// Connectivity of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Connected or in the middle of recovering a connected session
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnecting)
    }
}

enum Call<'a> {
    Get(&'a str),
    Set(&'a str, &'a str),
    List(&'a str),
}

enum Reply {
    Value(WireValue),
    Ack,
    Items(Vec<ListItem>),
}

pub struct Connection {
    client: FsapiClient,
    state: watch::Sender<ConnectionState>,
    epoch: AtomicU64,
    call_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Connection {
    /// Wrap a client; the connection starts out `Disconnected`
    pub fn new(client: FsapiClient) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client,
            state,
            epoch: AtomicU64::new(0),
            call_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &FsapiClient {
        &self.client
    }

    pub fn address(&self) -> &str {
        self.client.address()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Incremented by every successful CREATE_SESSION
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shut down for good; later calls fail with [`ApiError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Establish a session if there is none
    ///
    /// Used for the first connection and by liveness probes. A connection
    /// that is already up is left untouched.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.call_lock.lock().await;
        self.ensure_open()?;

        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        match self.open_session().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Re-establish the session after the long-poll failed in `failed_epoch`
    ///
    /// Returns the epoch of the session opened here, or `None` when another
    /// call already replaced that session. No call is retried here: the sync
    /// loop restarts from a full refresh instead.
    pub async fn recover(&self, failed_epoch: u64) -> Result<Option<u64>> {
        let _guard = self.call_lock.lock().await;
        self.ensure_open()?;

        if self.epoch() != failed_epoch {
            debug!(address = %self.address(), "session already replaced");
            return Ok(None);
        }
        if self.state() == ConnectionState::Disconnected {
            return Err(ApiError::Disconnected);
        }

        self.set_state(ConnectionState::Reconnecting);
        match self.open_session().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(Some(self.epoch()))
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(ApiError::SessionExpired {
                    source: Box::new(e),
                })
            }
        }
    }

    /// Give up on the session of `failed_epoch` without reconnecting
    ///
    /// For a long-poll that failed again right after [`Connection::recover`]:
    /// the retry is spent, so the device stays down until [`Connection::connect`].
    /// Returns false when that session was already replaced.
    pub async fn mark_disconnected(&self, failed_epoch: u64) -> bool {
        let _guard = self.call_lock.lock().await;
        if self.epoch() != failed_epoch {
            return false;
        }

        self.set_state(ConnectionState::Disconnected);
        true
    }

    pub async fn get(&self, node: &str) -> Result<WireValue> {
        match self.execute(Call::Get(node)).await? {
            Reply::Value(value) => Ok(value),
            _ => Err(ApiError::Malformed(format!("unexpected reply for GET/{}", node))),
        }
    }

    pub async fn set(&self, node: &str, value: &str) -> Result<()> {
        match self.execute(Call::Set(node, value)).await? {
            Reply::Ack => Ok(()),
            _ => Err(ApiError::Malformed(format!("unexpected reply for SET/{}", node))),
        }
    }

    /// Read a complete list; a session fault restarts the whole list once
    pub async fn get_list(&self, node: &str) -> Result<Vec<ListItem>> {
        match self.execute(Call::List(node)).await? {
            Reply::Items(items) => Ok(items),
            _ => Err(ApiError::Malformed(format!("unexpected reply for list {}", node))),
        }
    }

    /// One long-poll; never reconnects and never takes the call lock
    pub async fn poll_notifications(&self) -> Result<Notifications> {
        self.ensure_open()?;
        if !self.is_connected() {
            return Err(ApiError::Disconnected);
        }
        self.client.get_notifications().await
    }

    async fn execute(&self, call: Call<'_>) -> Result<Reply> {
        let _guard = self.call_lock.lock().await;
        self.ensure_open()?;

        if self.state() == ConnectionState::Disconnected {
            return Err(ApiError::Disconnected);
        }

        let first = match self.dispatch(&call).await {
            Ok(reply) => return Ok(reply),
            Err(e) if !e.is_session_fault() => return Err(e),
            Err(e) => e,
        };

        warn!(address = %self.address(), error = %first, "call failed; renewing session");
        self.set_state(ConnectionState::Reconnecting);

        if let Err(e) = self.open_session().await {
            self.set_state(ConnectionState::Disconnected);
            return Err(ApiError::SessionExpired {
                source: Box::new(e),
            });
        }

        match self.dispatch(&call).await {
            Ok(reply) => {
                self.set_state(ConnectionState::Connected);
                Ok(reply)
            }
            Err(e) if !e.is_session_fault() => {
                // The device answered; the session itself is fine.
                self.set_state(ConnectionState::Connected);
                Err(e)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(ApiError::SessionExpired {
                    source: Box::new(e),
                })
            }
        }
    }

    async fn dispatch(&self, call: &Call<'_>) -> Result<Reply> {
        match call {
            Call::Get(node) => self.client.get(node).await.map(Reply::Value),
            Call::Set(node, value) => self.client.set(node, value).await.map(|_| Reply::Ack),
            Call::List(node) => self.client.get_list(node).await.map(Reply::Items),
        }
    }

    async fn open_session(&self) -> Result<()> {
        self.client.create_session().await?;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(address = %self.address(), epoch, "new session epoch");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ApiError::Closed)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            info!(address = %self.address(), state = ?next, "connection state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsapi_transport::testing::{xml, Scripted, ScriptedTransport};
    use std::sync::Arc;

    const POWER: &str = "GET/netremote.sys.power";

    fn connection(transport: &Arc<ScriptedTransport>) -> Connection {
        Connection::new(FsapiClient::new(transport.clone(), "10.0.0.5", "1234"))
    }

    #[tokio::test]
    async fn test_connect_transitions() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_xml("CREATE_SESSION", xml::session("42"));

        let connection = connection(&transport);
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        connection.connect().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.epoch(), 1);

        // Already connected: no second session
        connection.connect().await.unwrap();
        assert_eq!(transport.count("CREATE_SESSION"), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_disconnected() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("CREATE_SESSION", Scripted::NetworkFailure);

        let connection = connection(&transport);
        assert!(connection.connect().await.is_err());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.epoch(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_calls_fail_fast() {
        let transport = Arc::new(ScriptedTransport::new());
        let connection = connection(&transport);

        let err = connection.get("netremote.sys.power").await.unwrap_err();
        assert!(matches!(err, ApiError::Disconnected));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_node_unavailable_does_not_reconnect() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_xml("CREATE_SESSION", xml::session("42"));
        transport.push_xml(
            "GET/netremote.spotify.username",
            xml::status("FS_NODE_DOES_NOT_EXIST"),
        );

        let connection = connection(&transport);
        connection.connect().await.unwrap();

        let err = connection
            .get("netremote.spotify.username")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NodeUnavailable { .. }));
        assert_eq!(transport.count("CREATE_SESSION"), 1);
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_reconnect_failure_disconnects() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_xml("CREATE_SESSION", xml::session("42"));
        transport.push(POWER, Scripted::Empty);
        transport.push("CREATE_SESSION", Scripted::NetworkFailure);

        let connection = connection(&transport);
        connection.connect().await.unwrap();

        let err = connection.get("netremote.sys.power").await.unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired { .. }));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(transport.count(POWER), 1);
    }

    #[tokio::test]
    async fn test_recover_skips_stale_epoch() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_xml("CREATE_SESSION", xml::session("42"));
        transport.push_xml("CREATE_SESSION", xml::session("43"));

        let connection = connection(&transport);
        connection.connect().await.unwrap();

        assert_eq!(connection.recover(1).await.unwrap(), Some(2));
        assert_eq!(connection.epoch(), 2);

        // A second failure reported for epoch 1 is already handled
        assert_eq!(connection.recover(1).await.unwrap(), None);
        assert_eq!(transport.count("CREATE_SESSION"), 2);
        assert_eq!(connection.client().session_id().as_deref(), Some("43"));
    }

    #[tokio::test]
    async fn test_mark_disconnected_needs_current_epoch() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_xml("CREATE_SESSION", xml::session("42"));
        transport.push_xml("CREATE_SESSION", xml::session("43"));

        let connection = connection(&transport);
        connection.connect().await.unwrap();
        connection.recover(1).await.unwrap();

        assert!(!connection.mark_disconnected(1).await);
        assert_eq!(connection.state(), ConnectionState::Connected);

        assert!(connection.mark_disconnected(2).await);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            connection.get("netremote.sys.power").await,
            Err(ApiError::Disconnected)
        ));
        assert_eq!(transport.count("CREATE_SESSION"), 2);
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_work() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_xml("CREATE_SESSION", xml::session("42"));

        let connection = connection(&transport);
        connection.connect().await.unwrap();
        connection.close();

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(connection.connect().await, Err(ApiError::Closed)));
        assert!(matches!(
            connection.set("netremote.sys.power", "1").await,
            Err(ApiError::Closed)
        ));
        assert_eq!(transport.count("CREATE_SESSION"), 1);
    }

    #[tokio::test]
    async fn test_state_changes_are_observable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_xml("CREATE_SESSION", xml::session("42"));

        let connection = connection(&transport);
        let mut rx = connection.subscribe();

        connection.connect().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);
    }
}
