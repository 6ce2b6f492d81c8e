//! Per-device synchronization between the device and the property store
//!
//! One [`DeviceSyncEngine`] owns one device. It bootstraps capabilities,
//! then runs a single background task that for every connection epoch:
//!
//! 1. waits until the connection is up,
//! 2. refreshes every property,
//! 3. long-polls for notifications until the epoch ends.
//!
//! A second task forwards connection state changes as
//! [`DeviceEvent::ConnectivityChanged`]. Both tasks are aborted by
//! [`DeviceSyncEngine::stop`], and every continuation checks the stopped
//! flag before touching state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fsapi::{nodes, ApiError, Connection, ConnectionState, Notifications, WireValue};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::capabilities::{self, Capabilities};
use crate::codec::{compose_info, PropertyValue};
use crate::error::{Result, StateError};
use crate::property::{self, names, Action, ReadSource, INFO_FIELDS};
use crate::store::{Applied, DeviceEvent, PropertyStore};

/// Device lifetime as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    Created,
    Bootstrapping,
    /// Refreshed and listening for notifications
    Live,
    Disconnected,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Percentage of the device volume range exposed to callers
    pub volume_limit_percent: u8,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            volume_limit_percent: 100,
        }
    }
}

struct Shared {
    connection: Arc<Connection>,
    store: PropertyStore,
    capabilities: Capabilities,
    lifecycle: watch::Sender<Lifecycle>,
    stopped: AtomicBool,
}

pub struct DeviceSyncEngine {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceSyncEngine {
    /// Connect, bootstrap and start synchronizing
    ///
    /// Fails when the first session or the capability read fails; nothing
    /// is left running in that case.
    pub async fn start(connection: Arc<Connection>, options: EngineOptions) -> Result<Self> {
        let (lifecycle, _) = watch::channel(Lifecycle::Created);

        connection.connect().await?;
        lifecycle.send_replace(Lifecycle::Bootstrapping);

        let capabilities = capabilities::bootstrap(&connection).await?;

        let mut store = PropertyStore::new(property::property_table(
            &capabilities,
            options.volume_limit_percent,
        ));
        for (name, hook) in property::standard_hooks(capabilities.modes.clone()) {
            store.add_hook(name, hook);
        }

        let shared = Arc::new(Shared {
            connection,
            store,
            capabilities,
            lifecycle,
            stopped: AtomicBool::new(false),
        });

        let tasks = vec![
            tokio::spawn(sync_loop(shared.clone())),
            tokio::spawn(forward_connectivity(shared.clone())),
        ];

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.shared.capabilities
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.shared.connection
    }

    pub fn store(&self) -> &PropertyStore {
        &self.shared.store
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.borrow()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.shared.lifecycle.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.store.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Cached value of a property
    pub fn get_property(&self, key: &str) -> Result<Option<PropertyValue>> {
        let name = self.shared.resolve(key)?;
        Ok(self.shared.store.get(name))
    }

    /// Cache `value` optimistically and write it to the device
    ///
    /// On failure the cached value stays as written; the next refresh or
    /// notification reconciles it. Returns the value after clamping.
    pub async fn set_property(&self, key: &str, value: PropertyValue) -> Result<PropertyValue> {
        self.shared.ensure_running()?;
        let name = self.shared.resolve(key)?;

        let write = self.shared.store.apply_local_write(name, &value)?;
        debug!(property = name, wire = %write.wire, "writing property");

        if let Err(e) = self.shared.connection.set(write.node, &write.wire).await {
            warn!(property = name, error = %e, "write failed; keeping optimistic value");
            return Err(e.into());
        }

        Ok(write.applied)
    }

    pub async fn invoke_action(&self, action: Action) -> Result<()> {
        self.shared.ensure_running()?;
        debug!(%action, "invoking action");

        self.shared
            .connection
            .set(nodes::PLAY_CONTROL, action.control_value())
            .await
            .map_err(Into::into)
    }

    /// Re-read every property from the device
    pub async fn refresh_all(&self) -> Result<()> {
        self.shared.refresh_all().await
    }

    /// Re-read one property from the device
    pub async fn refresh_property(&self, key: &str) -> Result<()> {
        self.shared.ensure_running()?;
        let name = self.shared.resolve(key)?;
        self.shared.refresh_property(name).await
    }

    /// Route a batch of changed nodes into the store
    pub async fn dispatch_notifications(&self, changes: BTreeMap<String, WireValue>) -> Result<()> {
        self.shared.ensure_running()?;
        self.shared.dispatch_notifications(changes).await;
        Ok(())
    }

    /// Reconnect if the device is down
    pub async fn revive(&self) -> Result<()> {
        self.shared.ensure_running()?;
        if self.shared.connection.is_connected() {
            return Ok(());
        }
        self.shared.connection.connect().await.map_err(Into::into)
    }

    /// Stop for good
    ///
    /// In-flight calls finish but their results are discarded. Idempotent.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.lifecycle.send_replace(Lifecycle::Stopped);
        self.shared.connection.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(address = %self.shared.connection.address(), "device stopped");
    }
}

impl Drop for DeviceSyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(StateError::Stopped)
        } else {
            Ok(())
        }
    }

    fn resolve(&self, key: &str) -> Result<&'static str> {
        self.store
            .resolve(key)
            .ok_or_else(|| StateError::UnknownProperty(key.to_string()))
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        if self.is_stopped() {
            return;
        }
        self.lifecycle.send_if_modified(|current| {
            if *current == next || *current == Lifecycle::Stopped {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn refresh_all(&self) -> Result<()> {
        self.ensure_running()?;
        debug!(address = %self.connection.address(), "refreshing all properties");

        for name in self.store.names().iter().copied() {
            // Read together with info
            if name == names::COVER {
                continue;
            }
            match self.refresh_property(name).await {
                Ok(()) => {}
                Err(StateError::Api(e)) if is_connection_loss(&e) => return Err(e.into()),
                Err(StateError::Stopped) => return Err(StateError::Stopped),
                Err(StateError::Api(ApiError::NodeUnavailable { node, .. })) => {
                    debug!(property = name, node = %node, "not available on this device");
                }
                Err(e) => warn!(property = name, error = %e, "refresh failed"),
            }
        }
        Ok(())
    }

    async fn refresh_property(&self, name: &'static str) -> Result<()> {
        let def = self
            .store
            .definition(name)
            .ok_or_else(|| StateError::UnknownProperty(name.to_string()))?;

        match def.source {
            ReadSource::Node(node) => {
                let value = self.connection.get(node).await?;
                self.ensure_running()?;
                let applied = self.store.apply_remote_update(name, value.as_str())?;
                self.follow_up(applied).await;
                Ok(())
            }
            ReadSource::Composite(_) => self.refresh_info().await,
        }
    }

    /// Read the four now-playing fields in order, then the cover
    async fn refresh_info(&self) -> Result<()> {
        let mut fields = Vec::with_capacity(INFO_FIELDS.len());
        for node in INFO_FIELDS {
            fields.push(self.connection.get(node).await?.raw);
        }
        self.ensure_running()?;

        let text = compose_info(&fields[0], &fields[1], &fields[2], &fields[3]);
        self.store
            .apply_remote_value(names::INFO, PropertyValue::Text(text))?;

        let cover = self.connection.get(nodes::INFO_GRAPHIC).await?;
        self.ensure_running()?;
        self.store.apply_remote_update(names::COVER, cover.as_str())?;
        Ok(())
    }

    async fn follow_up(&self, applied: Applied) {
        for name in applied.refetch {
            if self.is_stopped() {
                return;
            }
            // Refetch targets never request refetches themselves
            let result = match self.store.definition(name).map(|d| d.source) {
                Some(ReadSource::Node(node)) => match self.connection.get(node).await {
                    Ok(value) if !self.is_stopped() => self
                        .store
                        .apply_remote_update(name, value.as_str())
                        .map(|_| ()),
                    Ok(_) => return,
                    Err(e) => Err(e.into()),
                },
                Some(ReadSource::Composite(_)) => self.refresh_info().await,
                None => Err(StateError::UnknownProperty(name.to_string())),
            };

            if let Err(e) = result {
                debug!(property = name, error = %e, "refetch failed");
            }
        }
    }

    async fn dispatch_notifications(&self, changes: BTreeMap<String, WireValue>) {
        trace!(changes = ?changes, "notifications");
        let mut refresh_info = false;

        for (node, value) in changes {
            if self.is_stopped() {
                return;
            }

            if INFO_FIELDS.iter().any(|field| field.eq_ignore_ascii_case(&node)) {
                refresh_info = true;
                continue;
            }

            let Some(name) = self.store.by_read_node(&node) else {
                trace!(node = %node, "notification for unregistered node");
                continue;
            };

            match self.store.apply_remote_update(name, value.as_str()) {
                Ok(applied) => self.follow_up(applied).await,
                Err(e) => warn!(node = %node, error = %e, "cannot apply notification"),
            }
        }

        if refresh_info && !self.is_stopped() {
            if let Err(e) = self.refresh_info().await {
                debug!(error = %e, "info refresh failed");
            }
        }
    }
}

fn is_connection_loss(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::Disconnected | ApiError::SessionExpired { .. } | ApiError::Closed
    )
}

/// Refresh then poll, once per connection epoch, until stopped
async fn sync_loop(shared: Arc<Shared>) {
    let mut states = shared.connection.subscribe();
    // Epoch opened by this loop's own recovery; its first poll is the retry
    let mut retry_epoch = None;

    loop {
        if shared.is_stopped() {
            return;
        }

        if states
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .is_err()
        {
            return;
        }

        let epoch = shared.connection.epoch();
        match shared.refresh_all().await {
            Ok(()) => {}
            Err(StateError::Stopped) => return,
            Err(e) => {
                debug!(error = %e, "refresh interrupted");
                continue;
            }
        }

        if shared.connection.epoch() != epoch {
            continue;
        }
        shared.set_lifecycle(Lifecycle::Live);

        retry_epoch = poll_epoch(&shared, epoch, retry_epoch == Some(epoch)).await;
    }
}

/// Long-poll until this epoch's session is gone
///
/// Returns the epoch opened by recovering from a failed poll. When
/// `is_retry` is set and the first poll fails, the device is marked
/// disconnected instead and waits for a liveness probe.
async fn poll_epoch(shared: &Shared, epoch: u64, is_retry: bool) -> Option<u64> {
    let mut states = shared.connection.subscribe();
    let mut answered = false;

    loop {
        if shared.is_stopped() || shared.connection.epoch() != epoch {
            return None;
        }

        // An outstanding poll belongs to the old session once another call
        // reconnects or gives up, so stop waiting for it.
        let outcome = tokio::select! {
            outcome = shared.connection.poll_notifications() => outcome,
            _ = epoch_ended(&mut states, shared, epoch) => return None,
        };

        match outcome {
            Ok(Notifications::Timeout) => answered = true,
            Ok(Notifications::Changes(changes)) => {
                answered = true;
                if shared.is_stopped() {
                    return None;
                }
                shared.dispatch_notifications(changes).await;
            }
            Err(ApiError::Closed) => return None,
            Err(e) => {
                if shared.is_stopped() {
                    return None;
                }
                warn!(address = %shared.connection.address(), error = %e, "notification poll failed");

                if is_retry && !answered {
                    if shared.connection.mark_disconnected(epoch).await {
                        info!("notifications failed again after reconnect; waiting for liveness probe");
                        shared.set_lifecycle(Lifecycle::Disconnected);
                    }
                    return None;
                }

                return match shared.connection.recover(epoch).await {
                    Ok(recovered) => recovered,
                    Err(e) => {
                        info!(error = %e, "device unreachable; waiting for liveness probe");
                        shared.set_lifecycle(Lifecycle::Disconnected);
                        None
                    }
                };
            }
        }
    }
}

async fn epoch_ended(states: &mut watch::Receiver<ConnectionState>, shared: &Shared, epoch: u64) {
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        if state == ConnectionState::Disconnected || shared.connection.epoch() != epoch {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// Publish connectivity transitions as device events
async fn forward_connectivity(shared: Arc<Shared>) {
    let mut states = shared.connection.subscribe();
    let mut connected = states.borrow_and_update().is_connected();

    while states.changed().await.is_ok() {
        if shared.is_stopped() {
            return;
        }

        let now = states.borrow_and_update().is_connected();
        if now == connected {
            continue;
        }
        connected = now;

        if !connected {
            shared.set_lifecycle(Lifecycle::Disconnected);
        }
        info!(address = %shared.connection.address(), connected, "connectivity changed");
        shared.store.emit(DeviceEvent::ConnectivityChanged { connected });
    }
}
