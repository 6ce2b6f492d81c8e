//! Radio handle
//!
//! The surface a hub framework talks to: connectivity and property events,
//! cached reads, writes, actions, `stop` and `revive`.

use std::sync::Arc;

use fsapi::{Connection, FsapiClient};
use fsapi_transport::{HttpTransport, Transport};
use radio_state::{
    names, Action, Capabilities, DeviceEvent, DeviceSyncEngine, Lifecycle, PropertyValue,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::{RadioConfig, SdkError};

/// Handle to one managed radio
///
/// Cheap to clone; all clones drive the same device. Dropping the last
/// clone stops the device.
#[derive(Clone)]
pub struct Radio {
    /// Stable id, `frontier-silicon-<radioId>`
    pub id: String,
    /// Friendly name reported by the radio, or the advertised one
    pub name: String,
    pub address: String,
    engine: Arc<DeviceSyncEngine>,
}

impl Radio {
    /// Connect over HTTP and start synchronizing
    pub async fn connect(
        address: &str,
        advertised_name: &str,
        config: &RadioConfig,
    ) -> Result<Self, SdkError> {
        let transport = Arc::new(HttpTransport::with_config(config.transport_config())?);
        Self::with_transport(transport, address, advertised_name, config).await
    }

    /// Start synchronizing over any transport
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        address: &str,
        advertised_name: &str,
        config: &RadioConfig,
    ) -> Result<Self, SdkError> {
        config.validate()?;

        let client =
            FsapiClient::with_options(transport, address, &config.pin, config.client_options());
        let connection = Arc::new(Connection::new(client));
        let engine = DeviceSyncEngine::start(connection, config.engine_options()).await?;

        let caps = engine.capabilities();
        let name = caps
            .friendly_name
            .clone()
            .unwrap_or_else(|| advertised_name.to_string());
        let id = caps.device_id();
        info!(%id, %name, %address, "radio ready");

        Ok(Self {
            id,
            name,
            address: address.to_string(),
            engine: Arc::new(engine),
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.engine.capabilities()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.connection().is_connected()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.engine.lifecycle()
    }

    /// Connectivity and property events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.engine.subscribe()
    }

    pub fn get_property(&self, key: &str) -> Result<Option<PropertyValue>, SdkError> {
        Ok(self.engine.get_property(key)?)
    }

    /// All cached values, in property table order
    pub fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        self.engine.store().snapshot()
    }

    pub async fn set_property(
        &self,
        key: &str,
        value: PropertyValue,
    ) -> Result<PropertyValue, SdkError> {
        Ok(self.engine.set_property(key, value).await?)
    }

    /// Parse `input` according to the property's kind, then write it
    pub async fn set_property_str(&self, key: &str, input: &str) -> Result<PropertyValue, SdkError> {
        let name = self
            .engine
            .store()
            .resolve(key)
            .ok_or_else(|| radio_state::StateError::UnknownProperty(key.to_string()))?;
        let def = self
            .engine
            .store()
            .definition(name)
            .ok_or_else(|| radio_state::StateError::UnknownProperty(key.to_string()))?;

        let value = def
            .kind
            .parse_input(input)
            .map_err(|e| radio_state::StateError::InvalidValue {
                property: name.to_string(),
                reason: e.to_string(),
            })?;

        self.set_property(name, value).await
    }

    pub async fn invoke_action(&self, name: &str) -> Result<(), SdkError> {
        let action: Action = name
            .parse()
            .map_err(|_| SdkError::UnknownAction(name.to_string()))?;
        Ok(self.engine.invoke_action(action).await?)
    }

    /// Mode labels currently offered, including a transient unlisted one
    pub fn mode_options(&self) -> Vec<String> {
        self.engine.store().options(names::MODE).unwrap_or_default()
    }

    /// Property and action names relevant to the active mode
    pub fn visible_properties(&self) -> &'static [&'static str] {
        let modes = &self.capabilities().modes;
        self.engine
            .get_property(names::MODE)
            .ok()
            .flatten()
            .and_then(|mode| mode.as_str().and_then(|label| modes.by_label(label)).cloned())
            .map(|entry| entry.visible_properties())
            .unwrap_or(&["power", "mode", "volume", "muted"])
    }

    /// Reconnect if the radio is down; a liveness probe calls this
    pub async fn revive(&self) -> Result<(), SdkError> {
        Ok(self.engine.revive().await?)
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    pub fn engine(&self) -> &DeviceSyncEngine {
        &self.engine
    }
}

impl std::fmt::Debug for Radio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Radio")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
